//! The core PBFT state machine.
//!
//! Implements the three-phase protocol for one block at a time:
//! PrePrepare → Prepare → Commit, with view change on timeout.
//!
//! The engine is deterministic: given the same sequence of inputs it makes
//! the same transitions and emits the same messages. Networking, timers
//! and persistence live in [`crate::node`]; this module only decides.

use {
    crate::{
        config::PbftConfig,
        error::ConsensusError,
        leader,
        types::{
            ConsensusMessage, ConsensusState, CheckpointVote, Phase, PrePrepare, ViewChange, Vote,
        },
        validator_set::{ValidatorInfo, ValidatorSet},
    },
    log::*,
    ogp_crypto::{Hash, Keypair, Signature},
    ogp_ledger::{BlockCandidate, BlockSeal, ConsensusSignature, LedgerError},
    std::collections::{BTreeMap, HashMap, HashSet, VecDeque},
};

/// What the node should do with the phase timer after an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimerCommand {
    #[default]
    Keep,
    Start,
    Cancel,
}

/// A quorum of commits for one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitCertificate {
    pub view: u64,
    pub seq: u64,
    pub candidate: BlockCandidate,
    /// Commit signatures over the candidate digest, in validator-set order.
    pub signatures: Vec<ConsensusSignature>,
    pub quorum: usize,
}

impl CommitCertificate {
    pub fn seal(&self) -> BlockSeal {
        BlockSeal {
            header: self.candidate.header,
            transactions: self.candidate.transactions.clone(),
            signatures: self.signatures.clone(),
            quorum: self.quorum,
        }
    }
}

/// A checkpoint a quorum of validators agreed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StableCheckpoint {
    pub seq: u64,
    pub height: u64,
    pub last_hash: Hash,
}

/// Result of processing a consensus input.
#[derive(Debug, Default)]
pub struct EngineOutput {
    /// Messages to publish, each on its own topic.
    pub messages: Vec<ConsensusMessage>,
    /// Set once a commit quorum formed; the node seals the block.
    pub committed: Option<CommitCertificate>,
    pub stable_checkpoint: Option<StableCheckpoint>,
    /// A view adopted from a quorum of view-change votes.
    pub adopted_view: Option<u64>,
    pub timer: TimerCommand,
}

impl EngineOutput {
    fn empty() -> Self {
        Self::default()
    }
}

/// The round currently in flight.
#[derive(Debug)]
struct Round {
    view: u64,
    seq: u64,
    digest: Hash,
    candidate: BlockCandidate,
    prepares: HashMap<String, Signature>,
    commits: HashMap<String, Signature>,
}

/// Position of a vote relative to the node's progress.
enum Slot {
    Current,
    Future,
    Stale,
}

/// The PBFT consensus engine.
pub struct PbftEngine {
    config: PbftConfig,
    identity: String,
    keypair: Keypair,
    validator_set: ValidatorSet,
    state: ConsensusState,
    round: Option<Round>,
    /// Prepares and commits that arrived before their round.
    buffered: VecDeque<ConsensusMessage>,
    /// new_view → (validator → last_seq)
    view_changes: BTreeMap<u64, HashMap<String, u64>>,
    checkpoint_votes: HashMap<StableCheckpointKey, HashSet<String>>,
    stable_checkpoint: Option<StableCheckpoint>,
    commits_since_checkpoint: u64,
}

type StableCheckpointKey = (u64, u64, Hash);

impl PbftEngine {
    pub fn new(
        config: PbftConfig,
        identity: impl Into<String>,
        keypair: Keypair,
        validator_set: ValidatorSet,
    ) -> Self {
        let state = ConsensusState::new(config.f, config.watermark_window);
        Self {
            config,
            identity: identity.into(),
            keypair,
            validator_set,
            state,
            round: None,
            buffered: VecDeque::new(),
            view_changes: BTreeMap::new(),
            checkpoint_votes: HashMap::new(),
            stable_checkpoint: None,
            commits_since_checkpoint: 0,
        }
    }

    /// Continue from a recovered chain head: never reuse `seq` or anything
    /// below it.
    pub fn resume_from(&mut self, view: u64, seq: u64) {
        self.state.view = self.state.view.max(view);
        self.state.observe_sequence(seq);
        if seq > 0 {
            self.state.advance_watermarks(seq);
        }
        info!(
            "{} resuming at view={} seq={}",
            self.identity, self.state.view, self.state.seq
        );
    }

    // -- Accessors --

    pub fn state(&self) -> &ConsensusState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    pub fn view(&self) -> u64 {
        self.state.view
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn public_key(&self) -> ogp_crypto::PublicKey {
        self.keypair.public_key()
    }

    pub fn validator_set(&self) -> &ValidatorSet {
        &self.validator_set
    }

    pub fn config(&self) -> &PbftConfig {
        &self.config
    }

    /// Matching messages needed, from the current set size.
    pub fn quorum(&self) -> usize {
        self.validator_set.quorum()
    }

    pub fn leader(&self) -> Option<&ValidatorInfo> {
        leader::leader_for_view(&self.validator_set, self.state.view)
    }

    pub fn is_leader(&self) -> bool {
        leader::is_leader(&self.validator_set, &self.identity, self.state.view)
    }

    pub fn stable_checkpoint(&self) -> Option<StableCheckpoint> {
        self.stable_checkpoint
    }

    pub fn buffered_len(&self) -> usize {
        self.buffered.len()
    }

    // -- Leader --

    /// Start a round as leader.
    ///
    /// `build` receives the `(view, seq)` the block must carry and returns
    /// the candidate, or `None` when there is nothing to propose; the
    /// sequence number is only consumed once a candidate exists.
    pub fn propose<F>(&mut self, build: F) -> Result<EngineOutput, ConsensusError>
    where
        F: FnOnce(u64, u64) -> Result<Option<BlockCandidate>, LedgerError>,
    {
        if !self.is_leader() {
            return Err(ConsensusError::NotLeader {
                view: self.state.view,
                leader: self.leader().map(|v| v.id.clone()),
            });
        }
        if self.state.phase != Phase::Idle {
            return Err(ConsensusError::RoundInProgress(self.state.phase));
        }
        let seq = self.state.seq.saturating_add(1);
        if !self.state.in_watermark(seq) {
            return Err(ConsensusError::OutsideWatermark {
                seq,
                low: self.state.low_watermark,
                high: self.state.high_watermark,
            });
        }
        let view = self.state.view;
        let Some(candidate) = build(view, seq)? else {
            return Err(ConsensusError::NothingToPropose);
        };
        self.state.next_sequence();

        let pre_prepare = PrePrepare::signed(candidate, &self.identity, &self.keypair);
        info!(
            "{} pre-prepare view={view} seq={seq} block={} digest={}",
            self.identity,
            pre_prepare.candidate.header.index,
            pre_prepare.digest.short()
        );
        let prepare = Vote::signed(view, seq, pre_prepare.digest, &self.identity, &self.keypair);
        self.open_round(&pre_prepare, prepare.signature);

        let mut output = EngineOutput {
            messages: vec![
                ConsensusMessage::PrePrepare(pre_prepare),
                ConsensusMessage::Prepare(prepare),
            ],
            timer: TimerCommand::Start,
            ..EngineOutput::default()
        };
        self.check_prepare_quorum(&mut output);
        self.drain_buffer(&mut output);
        Ok(output)
    }

    // -- Inbound --

    /// Process one message from another validator.
    ///
    /// Replays are dropped first, then anything not signed by a member of
    /// the validator set. `stage` adopts an accepted pre-prepare's batch
    /// into the ledger; its failure rejects the proposal.
    pub fn on_message<F>(&mut self, message: ConsensusMessage, stage: F) -> EngineOutput
    where
        F: FnOnce(&BlockCandidate) -> Result<(), LedgerError>,
    {
        if !self.state.dedup(message.message_id()) {
            debug!(
                "{} dropping replayed {} from {}",
                self.identity,
                message.kind(),
                message.sender()
            );
            return EngineOutput::empty();
        }
        if !self.authenticate(&message) {
            warn!(
                "{} dropping unauthenticated {} claiming {}",
                self.identity,
                message.kind(),
                message.sender()
            );
            return EngineOutput::empty();
        }

        match message {
            ConsensusMessage::PrePrepare(pp) => self.on_pre_prepare(pp, stage),
            ConsensusMessage::Prepare(_) | ConsensusMessage::Commit(_) => {
                let mut output = EngineOutput::empty();
                self.on_vote(message, &mut output);
                output
            }
            ConsensusMessage::ViewChange(vc) => self.on_view_change(vc),
            ConsensusMessage::Checkpoint(cp) => self.on_checkpoint(cp),
        }
    }

    fn authenticate(&self, message: &ConsensusMessage) -> bool {
        self.validator_set
            .public_key_of(message.sender())
            .is_some_and(|public_key| message.verify_signature(public_key))
    }

    fn on_pre_prepare<F>(&mut self, pp: PrePrepare, stage: F) -> EngineOutput
    where
        F: FnOnce(&BlockCandidate) -> Result<(), LedgerError>,
    {
        if !leader::is_leader(&self.validator_set, &pp.leader, pp.view) {
            warn!(
                "{} rejecting pre-prepare from {}: not the leader of view {}",
                self.identity, pp.leader, pp.view
            );
            return EngineOutput::empty();
        }
        if pp.view != self.state.view {
            debug!(
                "{} ignoring pre-prepare for view {} while in view {}",
                self.identity, pp.view, self.state.view
            );
            return EngineOutput::empty();
        }
        if self.state.phase != Phase::Idle {
            debug!(
                "{} ignoring pre-prepare seq={}: phase is {}",
                self.identity, pp.seq, self.state.phase
            );
            return EngineOutput::empty();
        }
        if !self.state.in_watermark(pp.seq) || pp.seq <= self.state.seq {
            warn!(
                "{} rejecting pre-prepare seq={}: last seq {}, watermarks [{}, {}]",
                self.identity,
                pp.seq,
                self.state.seq,
                self.state.low_watermark,
                self.state.high_watermark
            );
            return EngineOutput::empty();
        }
        if !pp.is_consistent() {
            warn!(
                "{} rejecting pre-prepare seq={}: digest does not match candidate",
                self.identity, pp.seq
            );
            return EngineOutput::empty();
        }
        if let Err(e) = stage(&pp.candidate) {
            warn!(
                "{} rejecting pre-prepare seq={}: {e}",
                self.identity, pp.seq
            );
            return EngineOutput::empty();
        }

        self.state.observe_sequence(pp.seq);
        let prepare = Vote::signed(pp.view, pp.seq, pp.digest, &self.identity, &self.keypair);
        self.open_round(&pp, prepare.signature);
        debug!(
            "{} accepted pre-prepare view={} seq={} from {}",
            self.identity, pp.view, pp.seq, pp.leader
        );

        let mut output = EngineOutput {
            messages: vec![ConsensusMessage::Prepare(prepare)],
            timer: TimerCommand::Start,
            ..EngineOutput::default()
        };
        self.check_prepare_quorum(&mut output);
        self.drain_buffer(&mut output);
        output
    }

    fn open_round(&mut self, pp: &PrePrepare, own_prepare: Signature) {
        let mut prepares = HashMap::new();
        prepares.insert(self.identity.clone(), own_prepare);
        self.round = Some(Round {
            view: pp.view,
            seq: pp.seq,
            digest: pp.digest,
            candidate: pp.candidate.clone(),
            prepares,
            commits: HashMap::new(),
        });
        self.state.phase = Phase::PrePrepare;
    }

    fn slot(&self, view: u64, seq: u64) -> Slot {
        if let Some(round) = &self.round {
            if round.view == view && round.seq == seq {
                return Slot::Current;
            }
        }
        let ahead = view > self.state.view || (view == self.state.view && seq > self.state.seq);
        if ahead && self.state.in_watermark(seq) {
            Slot::Future
        } else {
            Slot::Stale
        }
    }

    /// Handle a prepare or commit that already passed dedup and signature
    /// checks.
    fn on_vote(&mut self, message: ConsensusMessage, output: &mut EngineOutput) {
        let (is_commit, vote) = match &message {
            ConsensusMessage::Prepare(vote) => (false, vote),
            ConsensusMessage::Commit(vote) => (true, vote),
            _ => return,
        };

        match self.slot(vote.view, vote.seq) {
            Slot::Stale => {
                debug!(
                    "{} dropping stale {} view={} seq={} from {}",
                    self.identity,
                    message.kind(),
                    vote.view,
                    vote.seq,
                    vote.validator_id
                );
            }
            Slot::Future => self.buffer(message),
            Slot::Current => {
                let ready = if is_commit {
                    Phase::Prepare
                } else {
                    Phase::PrePrepare
                };
                if self.state.phase < ready {
                    self.buffer(message);
                    return;
                }
                if self.state.phase > ready {
                    // Quorum for this phase already formed.
                    return;
                }
                let Some(round) = self.round.as_mut() else {
                    return;
                };
                if vote.digest != round.digest {
                    warn!(
                        "{} {} from {} for seq={} carries a conflicting digest",
                        self.identity,
                        message.kind(),
                        vote.validator_id,
                        vote.seq
                    );
                    return;
                }
                let votes = if is_commit {
                    &mut round.commits
                } else {
                    &mut round.prepares
                };
                votes.insert(vote.validator_id.clone(), vote.signature);
                if is_commit {
                    self.check_commit_quorum(output);
                } else {
                    self.check_prepare_quorum(output);
                }
            }
        }
    }

    fn buffer(&mut self, message: ConsensusMessage) {
        if self.config.max_buffered_messages == 0 {
            return;
        }
        if self.buffered.len() >= self.config.max_buffered_messages {
            if let Some(evicted) = self.buffered.pop_front() {
                debug!(
                    "{} buffer full, evicting {} from {}",
                    self.identity,
                    evicted.kind(),
                    evicted.sender()
                );
            }
        }
        self.buffered.push_back(message);
    }

    /// Re-run buffered votes against the current round.
    fn drain_buffer(&mut self, output: &mut EngineOutput) {
        let pending = std::mem::take(&mut self.buffered);
        for message in pending {
            self.on_vote(message, output);
        }
    }

    fn check_prepare_quorum(&mut self, output: &mut EngineOutput) {
        let quorum = self.quorum();
        let Some(round) = self.round.as_mut() else {
            return;
        };
        if self.state.phase != Phase::PrePrepare || round.prepares.len() < quorum {
            return;
        }

        self.state.phase = Phase::Prepare;
        let commit = Vote::signed(round.view, round.seq, round.digest, &self.identity, &self.keypair);
        round
            .commits
            .insert(self.identity.clone(), commit.signature);
        info!(
            "{} prepared view={} seq={} with {} prepares",
            self.identity,
            round.view,
            round.seq,
            round.prepares.len()
        );
        output.messages.push(ConsensusMessage::Commit(commit));
        output.timer = TimerCommand::Start;

        self.check_commit_quorum(output);
        self.drain_buffer(output);
    }

    fn check_commit_quorum(&mut self, output: &mut EngineOutput) {
        let quorum = self.quorum();
        let Some(round) = self.round.as_ref() else {
            return;
        };
        if self.state.phase != Phase::Prepare || round.commits.len() < quorum {
            return;
        }

        self.state.phase = Phase::Commit;
        let signatures = self
            .validator_set
            .iter()
            .filter_map(|validator| {
                round
                    .commits
                    .get(&validator.id)
                    .map(|signature| ConsensusSignature {
                        validator_id: validator.id.clone(),
                        signature: *signature,
                        public_key: validator.public_key,
                    })
            })
            .collect();
        info!(
            "{} commit quorum view={} seq={} ({} of {} commits)",
            self.identity,
            round.view,
            round.seq,
            round.commits.len(),
            self.validator_set.len()
        );
        output.committed = Some(CommitCertificate {
            view: round.view,
            seq: round.seq,
            candidate: round.candidate.clone(),
            signatures,
            quorum,
        });
    }

    // -- After commit --

    /// The node sealed and persisted the certified block at `height`.
    ///
    /// Returns to idle, and every `checkpoint_interval` commits emits this
    /// node's checkpoint vote.
    pub fn on_commit_applied(&mut self, height: u64, last_hash: Hash) -> EngineOutput {
        let seq = self.round.take().map_or(self.state.seq, |round| round.seq);
        self.state.reset();
        let mut output = EngineOutput {
            timer: TimerCommand::Cancel,
            ..EngineOutput::default()
        };

        self.commits_since_checkpoint = self.commits_since_checkpoint.saturating_add(1);
        if self.commits_since_checkpoint < self.config.checkpoint_interval {
            return output;
        }
        self.commits_since_checkpoint = 0;
        match CheckpointVote::signed(seq, height, last_hash, &self.identity, &self.keypair) {
            Ok(vote) => {
                self.record_checkpoint_vote(&vote, &mut output);
                output.messages.push(ConsensusMessage::Checkpoint(vote));
            }
            Err(e) => error!("{} could not sign checkpoint: {e}", self.identity),
        }
        output
    }

    // -- View change --

    /// The phase timer expired. Abandons the round, moves to the next view
    /// and votes for it. Idle nodes ignore the expiry.
    pub fn on_timeout(&mut self) -> EngineOutput {
        if self.state.phase == Phase::Idle {
            return EngineOutput::empty();
        }
        let abandoned = self.round.take().map(|round| round.seq);
        let phase = self.state.phase;
        let Some(previous_leader) = self.state.rotate_leader(&self.validator_set) else {
            return EngineOutput::empty();
        };
        self.state.reset();
        self.retain_future_buffer();

        let new_view = self.state.view;
        warn!(
            "{} view change {} -> {new_view}: timed out in {phase} (seq {:?}, leader was {}), \
             new leader {:?}",
            self.identity,
            new_view.saturating_sub(1),
            abandoned,
            previous_leader.id,
            self.leader().map(|v| &v.id)
        );

        let mut output = EngineOutput {
            timer: TimerCommand::Cancel,
            ..EngineOutput::default()
        };
        self.view_changes = self.view_changes.split_off(&new_view);
        match ViewChange::signed(new_view, self.state.seq, &self.identity, &self.keypair) {
            Ok(vc) => {
                self.view_changes
                    .entry(new_view)
                    .or_default()
                    .insert(self.identity.clone(), vc.last_seq);
                output.messages.push(ConsensusMessage::ViewChange(vc));
            }
            Err(e) => error!("{} could not sign view change: {e}", self.identity),
        }
        output
    }

    /// Collect a view-change vote and adopt its view once a quorum agrees.
    ///
    /// Votes for views at or below the current one carry no weight, not even
    /// their sequence number. The adopted sequence is the (f+1)-th highest
    /// reported in the quorum, so up to f validators cannot inflate it.
    fn on_view_change(&mut self, vc: ViewChange) -> EngineOutput {
        if vc.new_view <= self.state.view {
            debug!(
                "{} ignoring view change for stale view {} from {}",
                self.identity, vc.new_view, vc.validator_id
            );
            return EngineOutput::empty();
        }
        let horizon = self
            .state
            .view
            .saturating_add(self.config.view_change_lookahead);
        if vc.new_view > horizon {
            warn!(
                "{} dropping view change for view {} from {}: beyond view {horizon}",
                self.identity, vc.new_view, vc.validator_id
            );
            return EngineOutput::empty();
        }
        if vc.last_seq > self.state.high_watermark {
            warn!(
                "{} dropping view change from {}: last_seq {} above high watermark {}",
                self.identity, vc.validator_id, vc.last_seq, self.state.high_watermark
            );
            return EngineOutput::empty();
        }

        let quorum = self.validator_set.quorum();
        let votes = self.view_changes.entry(vc.new_view).or_default();
        votes.insert(vc.validator_id.clone(), vc.last_seq);
        if votes.len() < quorum {
            debug!(
                "{} has {} view-change votes for view {}",
                self.identity,
                votes.len(),
                vc.new_view
            );
            return EngineOutput::empty();
        }

        let mut reported: Vec<u64> = votes.values().copied().collect();
        reported.sort_unstable_by(|a, b| b.cmp(a));
        let faulty = self.validator_set.len().saturating_sub(quorum);
        let agreed_seq = reported.get(faulty).copied().unwrap_or(0);

        let new_view = vc.new_view;
        self.state.view = new_view;
        self.state.observe_sequence(agreed_seq);
        self.state.reset();
        self.round = None;
        self.retain_future_buffer();
        self.view_changes = self.view_changes.split_off(&new_view.saturating_add(1));
        info!(
            "{} adopted view {new_view} from view-change quorum, leader {:?}",
            self.identity,
            self.leader().map(|v| &v.id)
        );
        EngineOutput {
            adopted_view: Some(new_view),
            timer: TimerCommand::Cancel,
            ..EngineOutput::default()
        }
    }

    fn retain_future_buffer(&mut self) {
        let view = self.state.view;
        self.buffered.retain(|message| match message {
            ConsensusMessage::Prepare(vote) | ConsensusMessage::Commit(vote) => vote.view >= view,
            _ => false,
        });
    }

    // -- Checkpoints --

    fn on_checkpoint(&mut self, vote: CheckpointVote) -> EngineOutput {
        let mut output = EngineOutput::empty();
        self.record_checkpoint_vote(&vote, &mut output);
        output
    }

    fn record_checkpoint_vote(&mut self, vote: &CheckpointVote, output: &mut EngineOutput) {
        if self
            .stable_checkpoint
            .is_some_and(|stable| vote.seq <= stable.seq)
        {
            return;
        }
        if vote.seq > self.state.high_watermark {
            debug!(
                "{} ignoring checkpoint vote seq={} above high watermark {}",
                self.identity, vote.seq, self.state.high_watermark
            );
            return;
        }
        let key = (vote.seq, vote.height, vote.last_hash);
        let voters = self.checkpoint_votes.entry(key).or_default();
        voters.insert(vote.validator_id.clone());
        if voters.len() < self.validator_set.quorum() {
            return;
        }

        let stable = StableCheckpoint {
            seq: vote.seq,
            height: vote.height,
            last_hash: vote.last_hash,
        };
        self.stable_checkpoint = Some(stable);
        self.state.advance_watermarks(stable.seq);
        self.checkpoint_votes
            .retain(|(seq, _, _), _| *seq > stable.seq);
        info!(
            "{} stable checkpoint seq={} height={} hash={}; watermarks [{}, {}]",
            self.identity,
            stable.seq,
            stable.height,
            stable.last_hash.short(),
            self.state.low_watermark,
            self.state.high_watermark
        );
        output.stable_checkpoint = Some(stable);
    }
}

impl std::fmt::Debug for PbftEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PbftEngine")
            .field("identity", &self.identity)
            .field("view", &self.state.view)
            .field("seq", &self.state.seq)
            .field("phase", &self.state.phase)
            .field("buffered", &self.buffered.len())
            .finish()
    }
}
