//! Core types for the PBFT protocol.
//!
//! Defines the wire messages (pre-prepare, prepare, commit, view change,
//! checkpoint), the per-node consensus state and the health snapshot.

use {
    crate::{leader, validator_set::ValidatorSet, validator_set::ValidatorInfo},
    ogp_consensus_net::Topic,
    ogp_crypto::{hashv, sign, verify, verify_bytes, CryptoError, Hash, Keypair, PublicKey, Signature},
    ogp_ledger::BlockCandidate,
    ogp_resilience::CircuitState,
    serde::{Deserialize, Serialize},
    std::{collections::HashSet, fmt},
};

/// Minimum number of matching messages needed to advance a phase among `n`
/// validators: `floor(2n/3) + 1`.
pub fn quorum(n: usize) -> usize {
    n.saturating_mul(2).checked_div(3).unwrap_or(0).saturating_add(1)
}

// ---------------------------------------------------------------------------
// Consensus messages
// ---------------------------------------------------------------------------

/// A leader's proposal for sequence `seq` in `view`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrePrepare {
    pub view: u64,
    pub seq: u64,
    /// Hash of the candidate header; the value the round agrees on.
    pub digest: Hash,
    pub candidate: BlockCandidate,
    pub leader: String,
    /// Leader's signature over `digest`.
    pub signature: Signature,
}

impl PrePrepare {
    pub fn signed(candidate: BlockCandidate, leader: &str, keypair: &Keypair) -> Self {
        let digest = candidate.digest();
        Self {
            view: candidate.header.view,
            seq: candidate.header.seq,
            digest,
            signature: keypair.sign_bytes(digest.as_ref()),
            candidate,
            leader: leader.to_string(),
        }
    }

    /// The envelope fields agree with the carried candidate.
    pub fn is_consistent(&self) -> bool {
        self.candidate.digest() == self.digest
            && self.candidate.header.view == self.view
            && self.candidate.header.seq == self.seq
    }
}

/// A prepare or commit vote for a digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub view: u64,
    pub seq: u64,
    pub digest: Hash,
    pub validator_id: String,
    /// Signature over `digest`. Commit signatures double as block signatures.
    pub signature: Signature,
}

impl Vote {
    pub fn signed(view: u64, seq: u64, digest: Hash, validator_id: &str, keypair: &Keypair) -> Self {
        Self {
            view,
            seq,
            digest,
            validator_id: validator_id.to_string(),
            signature: keypair.sign_bytes(digest.as_ref()),
        }
    }
}

#[derive(Serialize)]
struct ViewChangeContent<'a> {
    new_view: u64,
    last_seq: u64,
    validator_id: &'a str,
}

/// A validator's request to move to `new_view`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewChange {
    pub new_view: u64,
    /// Highest sequence number the sender has used or accepted.
    pub last_seq: u64,
    pub validator_id: String,
    pub signature: Signature,
}

impl ViewChange {
    pub fn signed(
        new_view: u64,
        last_seq: u64,
        validator_id: &str,
        keypair: &Keypair,
    ) -> Result<Self, CryptoError> {
        let signature = sign(
            &ViewChangeContent {
                new_view,
                last_seq,
                validator_id,
            },
            Some(keypair),
        )?;
        Ok(Self {
            new_view,
            last_seq,
            validator_id: validator_id.to_string(),
            signature,
        })
    }

    fn verify(&self, public_key: &PublicKey) -> bool {
        let content = ViewChangeContent {
            new_view: self.new_view,
            last_seq: self.last_seq,
            validator_id: &self.validator_id,
        };
        verify(&content, &self.signature, public_key)
    }
}

#[derive(Serialize)]
struct CheckpointContent<'a> {
    seq: u64,
    height: u64,
    last_hash: &'a Hash,
    validator_id: &'a str,
}

/// A validator's claim that the chain head after `seq` is `(height, last_hash)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointVote {
    pub seq: u64,
    pub height: u64,
    pub last_hash: Hash,
    pub validator_id: String,
    pub signature: Signature,
}

impl CheckpointVote {
    pub fn signed(
        seq: u64,
        height: u64,
        last_hash: Hash,
        validator_id: &str,
        keypair: &Keypair,
    ) -> Result<Self, CryptoError> {
        let signature = sign(
            &CheckpointContent {
                seq,
                height,
                last_hash: &last_hash,
                validator_id,
            },
            Some(keypair),
        )?;
        Ok(Self {
            seq,
            height,
            last_hash,
            validator_id: validator_id.to_string(),
            signature,
        })
    }

    fn verify(&self, public_key: &PublicKey) -> bool {
        let content = CheckpointContent {
            seq: self.seq,
            height: self.height,
            last_hash: &self.last_hash,
            validator_id: &self.validator_id,
        };
        verify(&content, &self.signature, public_key)
    }
}

/// Messages exchanged between validators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsensusMessage {
    PrePrepare(PrePrepare),
    Prepare(Vote),
    Commit(Vote),
    ViewChange(ViewChange),
    Checkpoint(CheckpointVote),
}

impl ConsensusMessage {
    pub fn topic(&self) -> Topic {
        match self {
            ConsensusMessage::PrePrepare(_) => Topic::PrePrepare,
            ConsensusMessage::Prepare(_) => Topic::Prepare,
            ConsensusMessage::Commit(_) => Topic::Commit,
            ConsensusMessage::ViewChange(_) => Topic::ViewChange,
            ConsensusMessage::Checkpoint(_) => Topic::Checkpoint,
        }
    }

    /// Validator that signed this message.
    pub fn sender(&self) -> &str {
        match self {
            ConsensusMessage::PrePrepare(pp) => &pp.leader,
            ConsensusMessage::Prepare(vote) | ConsensusMessage::Commit(vote) => &vote.validator_id,
            ConsensusMessage::ViewChange(vc) => &vc.validator_id,
            ConsensusMessage::Checkpoint(cp) => &cp.validator_id,
        }
    }

    /// Content id used for at-most-once processing.
    ///
    /// Covers the signature, so a forged copy cannot claim the id of the
    /// genuine message; Ed25519 is deterministic, so honest replays collide.
    pub fn message_id(&self) -> Hash {
        match self {
            ConsensusMessage::PrePrepare(pp) => hashv(&[
                b"pre-prepare",
                &pp.view.to_le_bytes(),
                &pp.seq.to_le_bytes(),
                pp.digest.as_ref(),
                pp.leader.as_bytes(),
                pp.signature.as_ref(),
            ]),
            ConsensusMessage::Prepare(vote) => vote_id(b"prepare", vote),
            ConsensusMessage::Commit(vote) => vote_id(b"commit", vote),
            ConsensusMessage::ViewChange(vc) => hashv(&[
                b"viewchange",
                &vc.new_view.to_le_bytes(),
                &vc.last_seq.to_le_bytes(),
                vc.validator_id.as_bytes(),
                vc.signature.as_ref(),
            ]),
            ConsensusMessage::Checkpoint(cp) => hashv(&[
                b"checkpoint",
                &cp.seq.to_le_bytes(),
                &cp.height.to_le_bytes(),
                cp.last_hash.as_ref(),
                cp.validator_id.as_bytes(),
                cp.signature.as_ref(),
            ]),
        }
    }

    /// Whether the claimed sender signed this message.
    pub fn verify_signature(&self, public_key: &PublicKey) -> bool {
        match self {
            ConsensusMessage::PrePrepare(pp) => {
                verify_bytes(pp.digest.as_ref(), &pp.signature, public_key)
            }
            ConsensusMessage::Prepare(vote) | ConsensusMessage::Commit(vote) => {
                verify_bytes(vote.digest.as_ref(), &vote.signature, public_key)
            }
            ConsensusMessage::ViewChange(vc) => vc.verify(public_key),
            ConsensusMessage::Checkpoint(cp) => cp.verify(public_key),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn decode(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }

    /// Human-readable tag for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ConsensusMessage::PrePrepare(_) => "pre-prepare",
            ConsensusMessage::Prepare(_) => "prepare",
            ConsensusMessage::Commit(_) => "commit",
            ConsensusMessage::ViewChange(_) => "viewchange",
            ConsensusMessage::Checkpoint(_) => "checkpoint",
        }
    }
}

fn vote_id(tag: &[u8], vote: &Vote) -> Hash {
    hashv(&[
        tag,
        &vote.view.to_le_bytes(),
        &vote.seq.to_le_bytes(),
        vote.digest.as_ref(),
        vote.validator_id.as_bytes(),
        vote.signature.as_ref(),
    ])
}

// ---------------------------------------------------------------------------
// Consensus state
// ---------------------------------------------------------------------------

/// Where the node is within a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    /// No round in flight.
    Idle,
    /// A pre-prepare was sent or accepted; collecting prepares.
    PrePrepare,
    /// Prepare quorum reached; collecting commits.
    Prepare,
    /// Commit quorum reached; the block is being sealed.
    Commit,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Idle => write!(f, "idle"),
            Phase::PrePrepare => write!(f, "pre-prepare"),
            Phase::Prepare => write!(f, "prepare"),
            Phase::Commit => write!(f, "commit"),
        }
    }
}

/// Message ids remembered per dedup generation before the oldest
/// generation is dropped.
pub const DEFAULT_MESSAGE_ID_LIMIT: usize = 65_536;

/// View, sequence and watermark bookkeeping for one node.
///
/// Message ids are kept in two generations. The current one rolls over into
/// the retired one whenever a checkpoint becomes stable or the current one
/// fills up, and the previous retired generation is forgotten. Anything old
/// enough to be forgotten is also below the sequence and view checks that
/// follow dedup.
#[derive(Debug, Clone)]
pub struct ConsensusState {
    pub view: u64,
    /// Highest sequence number this node has used or accepted.
    pub seq: u64,
    /// Maximum tolerated faulty validators.
    pub f: usize,
    pub low_watermark: u64,
    pub high_watermark: u64,
    pub phase: Phase,
    watermark_window: u64,
    message_ids: HashSet<Hash>,
    retired_ids: HashSet<Hash>,
    message_id_limit: usize,
}

impl ConsensusState {
    pub fn new(f: usize, watermark_window: u64) -> Self {
        Self {
            view: 0,
            seq: 0,
            f,
            low_watermark: 0,
            high_watermark: watermark_window,
            phase: Phase::Idle,
            watermark_window,
            message_ids: HashSet::new(),
            retired_ids: HashSet::new(),
            message_id_limit: DEFAULT_MESSAGE_ID_LIMIT,
        }
    }

    pub fn with_message_id_limit(mut self, limit: usize) -> Self {
        self.message_id_limit = limit.max(1);
        self
    }

    /// Take the next sequence number. Strictly increasing.
    pub fn next_sequence(&mut self) -> u64 {
        self.seq = self.seq.saturating_add(1);
        self.seq
    }

    /// Raise the counter to a sequence number seen from another node, so
    /// this node never proposes it again.
    pub fn observe_sequence(&mut self, seq: u64) {
        self.seq = self.seq.max(seq);
    }

    pub fn in_watermark(&self, seq: u64) -> bool {
        self.low_watermark <= seq && seq <= self.high_watermark
    }

    /// Record `message_id`; true only the first time it is seen within the
    /// two remembered generations.
    pub fn dedup(&mut self, message_id: Hash) -> bool {
        if self.retired_ids.contains(&message_id) || !self.message_ids.insert(message_id) {
            return false;
        }
        if self.message_ids.len() >= self.message_id_limit {
            self.retire_message_ids();
        }
        true
    }

    /// Number of message ids currently remembered.
    pub fn tracked_message_ids(&self) -> usize {
        self.message_ids.len().saturating_add(self.retired_ids.len())
    }

    fn retire_message_ids(&mut self) {
        self.retired_ids = std::mem::take(&mut self.message_ids);
    }

    /// Slide the window past a stable checkpoint at `stable_seq`.
    pub fn advance_watermarks(&mut self, stable_seq: u64) {
        self.low_watermark = stable_seq.saturating_add(1);
        self.high_watermark = self.low_watermark.saturating_add(self.watermark_window);
        self.retire_message_ids();
    }

    /// Return the leader of the current view, then move to the next view.
    ///
    /// An empty set has no leader and leaves the view unchanged.
    pub fn rotate_leader(&mut self, validators: &ValidatorSet) -> Option<ValidatorInfo> {
        let leader = leader::leader_for_view(validators, self.view)?.clone();
        self.view = self.view.saturating_add(1);
        Some(leader)
    }

    pub fn reset(&mut self) {
        self.phase = Phase::Idle;
    }
}

/// What an external monitor polls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsensusHealth {
    pub phase: Phase,
    pub view: u64,
    pub seq: u64,
    pub leader: Option<String>,
    pub height: u64,
    pub low_watermark: u64,
    pub high_watermark: u64,
    pub breaker: CircuitState,
}
