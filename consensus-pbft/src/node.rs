//! The PBFT node driver.
//!
//! Owns one [`PbftEngine`] together with the ledger chain, circuit breaker,
//! checkpoint store and transport, and runs them on a single tokio task:
//!
//! ```text
//!   NodeHandle ──commands──┐
//!   transport ───inbound───┼──► select! ──► PbftEngine ──► EngineOutput
//!   PhaseTimer ──expiries──┤                                  │
//!   checkpoint interval ───┘          publish / commit_block / save
//! ```
//!
//! Inputs are processed one at a time, so the engine and the chain never
//! see concurrent mutation. Proposals, publishes and checkpoint saves go
//! through the node's [`CircuitBreaker`]. Sealing a certified block does
//! not: the rest of the quorum has committed it, so the node keeps retrying
//! the write on every phase expiry and only reports the outcome to the
//! breaker.

use {
    crate::{
        config::PbftConfig,
        engine::{CommitCertificate, EngineOutput, PbftEngine, StableCheckpoint, TimerCommand},
        error::{ConsensusError, NodeError},
        timeout::PhaseTimer,
        types::{ConsensusHealth, ConsensusMessage, Phase},
        validator_set::ValidatorSet,
    },
    log::*,
    ogp_consensus_net::{ConsensusTransport, InboundMessage, Topic},
    ogp_crypto::Keypair,
    ogp_ledger::{BalanceSheet, Block, BlockSummary, LedgerChain, Transaction},
    ogp_resilience::{CircuitBreaker, CircuitBreakerConfig, GuardError},
    ogp_snapshots::CheckpointStore,
    std::{
        sync::Arc,
        time::{Duration, SystemTime, UNIX_EPOCH},
    },
    tokio::{
        sync::{mpsc, oneshot, watch, Mutex},
        task::JoinHandle,
        time::{interval_at, Instant, MissedTickBehavior},
    },
};

/// Everything a node needs to start.
pub struct NodeSetup {
    pub config: PbftConfig,
    pub breaker_config: CircuitBreakerConfig,
    pub keypair: Keypair,
    pub validators: ValidatorSet,
    /// A fresh or recovered chain. Checked for integrity before starting.
    pub chain: LedgerChain,
    /// Also determines the node id.
    pub transport: Arc<dyn ConsensusTransport>,
    pub checkpoints: Arc<dyn CheckpointStore>,
}

/// Requests from a [`NodeHandle`] to the node task.
enum NodeEvent {
    Submit(Transaction, oneshot::Sender<Result<(), ConsensusError>>),
    Propose(oneshot::Sender<Result<u64, ConsensusError>>),
    Health(oneshot::Sender<ConsensusHealth>),
    LatestBlock(oneshot::Sender<Block>),
    ChainValid(oneshot::Sender<bool>),
    Balances(oneshot::Sender<BalanceSheet>),
    Summary(oneshot::Sender<Vec<BlockSummary>>),
    Shutdown(oneshot::Sender<()>),
}

/// Client side of a running node. Cheap to clone.
#[derive(Clone, Debug)]
pub struct NodeHandle {
    node_id: String,
    commands: mpsc::Sender<NodeEvent>,
    height: watch::Receiver<u64>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl NodeHandle {
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    async fn request<T>(
        &self,
        event: impl FnOnce(oneshot::Sender<T>) -> NodeEvent,
    ) -> Result<T, ConsensusError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(event(tx))
            .await
            .map_err(|_| ConsensusError::NodeStopped)?;
        rx.await.map_err(|_| ConsensusError::NodeStopped)
    }

    /// Validate `tx` and add it to this node's pending buffer.
    pub async fn submit(&self, tx: Transaction) -> Result<(), ConsensusError> {
        self.request(|reply| NodeEvent::Submit(tx, reply)).await?
    }

    /// Propose the pending buffer as the next block. Only the leader of the
    /// current view may propose. Returns the sequence number used.
    pub async fn propose(&self) -> Result<u64, ConsensusError> {
        self.request(NodeEvent::Propose).await?
    }

    pub async fn health(&self) -> Result<ConsensusHealth, ConsensusError> {
        self.request(NodeEvent::Health).await
    }

    pub async fn latest_block(&self) -> Result<Block, ConsensusError> {
        self.request(NodeEvent::LatestBlock).await
    }

    pub async fn is_chain_valid(&self) -> Result<bool, ConsensusError> {
        self.request(NodeEvent::ChainValid).await
    }

    pub async fn balances(&self) -> Result<BalanceSheet, ConsensusError> {
        self.request(NodeEvent::Balances).await
    }

    pub async fn ledger_summary(&self) -> Result<Vec<BlockSummary>, ConsensusError> {
        self.request(NodeEvent::Summary).await
    }

    /// Height of the chain head as last published by the node.
    pub fn height(&self) -> u64 {
        *self.height.borrow()
    }

    /// Wait until the chain reaches `height`, then return the head block.
    pub async fn wait_for_height(
        &self,
        height: u64,
        timeout: Duration,
    ) -> Result<Block, ConsensusError> {
        let mut watcher = self.height.clone();
        let reached = tokio::time::timeout(timeout, async move {
            watcher.wait_for(|h| *h >= height).await.map(|_| ())
        })
        .await;
        match reached {
            Ok(Ok(_)) => self.latest_block().await,
            Ok(Err(_)) => Err(ConsensusError::NodeStopped),
            Err(_) => Err(ConsensusError::Timeout {
                height,
                waited: timeout,
            }),
        }
    }

    /// Stop the node task and wait for it to finish.
    pub async fn shutdown(&self) {
        if self.request(NodeEvent::Shutdown).await.is_err() {
            debug!("{} already stopped", self.node_id);
        }
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("{} node task ended abnormally: {e}", self.node_id);
            }
        }
    }
}

/// The state owned by one node task.
pub struct PbftNode {
    engine: PbftEngine,
    chain: LedgerChain,
    transport: Arc<dyn ConsensusTransport>,
    checkpoints: Arc<dyn CheckpointStore>,
    breaker: CircuitBreaker,
    timer: PhaseTimer,
    height: watch::Sender<u64>,
    /// A certified block whose write failed, retried on the next expiry.
    unsealed: Option<CommitCertificate>,
}

impl PbftNode {
    /// Check the setup, subscribe to every consensus topic and start the
    /// node task.
    pub async fn spawn(setup: NodeSetup) -> Result<NodeHandle, NodeError> {
        let NodeSetup {
            config,
            breaker_config,
            keypair,
            validators,
            chain,
            transport,
            checkpoints,
        } = setup;
        config.validate()?;
        breaker_config.validate()?;

        if let Some(index) = chain.first_invalid_index() {
            error!("refusing to start on a corrupted ledger: block {index} is invalid");
            return Err(NodeError::CorruptLedger { index });
        }
        let node_id = transport.node_id().to_string();
        if validators.public_key_of(&node_id) != Some(&keypair.public_key()) {
            return Err(NodeError::NotAValidator(node_id));
        }

        let (inbound_tx, inbound_rx) = mpsc::channel(config.event_buffer_size);
        for topic in Topic::ALL {
            transport.subscribe(topic, inbound_tx.clone()).await?;
        }
        let (command_tx, command_rx) = mpsc::channel(config.event_buffer_size);
        let (expiry_tx, expiry_rx) = mpsc::channel(16);
        let (height_tx, height_rx) = watch::channel(chain.height());

        let head = chain.latest_block();
        let mut engine = PbftEngine::new(config.clone(), node_id.clone(), keypair, validators);
        engine.resume_from(head.view(), head.seq());

        let node = PbftNode {
            engine,
            timer: PhaseTimer::new(config.phase_timeout(), expiry_tx),
            chain,
            transport,
            checkpoints,
            breaker: CircuitBreaker::new(breaker_config),
            height: height_tx,
            unsealed: None,
        };
        info!(
            "{node_id} starting at height {} view {} as one of {} validators",
            node.chain.height(),
            node.engine.view(),
            node.engine.validator_set().len()
        );
        let task: JoinHandle<()> = tokio::spawn(node.run(
            command_rx,
            inbound_rx,
            expiry_rx,
            config.checkpoint_period(),
        ));

        Ok(NodeHandle {
            node_id,
            commands: command_tx,
            height: height_rx,
            task: Arc::new(Mutex::new(Some(task))),
        })
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<NodeEvent>,
        mut inbound: mpsc::Receiver<InboundMessage>,
        mut expiries: mpsc::Receiver<u64>,
        checkpoint_period: Duration,
    ) {
        let first_tick = Instant::now()
            .checked_add(checkpoint_period)
            .unwrap_or_else(Instant::now);
        let mut checkpoint_tick = interval_at(first_tick, checkpoint_period);
        checkpoint_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else {
                        debug!("{} all handles dropped", self.engine.identity());
                        break;
                    };
                    if let NodeEvent::Shutdown(reply) = command {
                        let _ = reply.send(());
                        break;
                    }
                    self.handle_command(command).await;
                }
                Some(envelope) = inbound.recv() => self.handle_inbound(envelope).await,
                Some(generation) = expiries.recv() => self.handle_expiry(generation).await,
                _ = checkpoint_tick.tick() => self.save_checkpoint().await,
            }
        }
        self.timer.cancel();
        info!(
            "{} stopped at height {}",
            self.engine.identity(),
            self.chain.height()
        );
    }

    async fn handle_command(&mut self, command: NodeEvent) {
        match command {
            NodeEvent::Submit(tx, reply) => {
                let result = self.chain.add_transaction(tx).map_err(ConsensusError::from);
                if let Err(e) = &result {
                    debug!("{} rejected transaction: {e}", self.engine.identity());
                }
                let _ = reply.send(result);
            }
            NodeEvent::Propose(reply) => {
                let result = self.propose().await;
                let _ = reply.send(result);
            }
            NodeEvent::Health(reply) => {
                let _ = reply.send(self.health());
            }
            NodeEvent::LatestBlock(reply) => {
                let _ = reply.send(self.chain.latest_block().clone());
            }
            NodeEvent::ChainValid(reply) => {
                let _ = reply.send(self.chain.is_chain_valid());
            }
            NodeEvent::Balances(reply) => {
                let _ = reply.send(BalanceSheet::from_blocks(self.chain.blocks()));
            }
            NodeEvent::Summary(reply) => {
                let _ = reply.send(self.chain.ledger_summary());
            }
            NodeEvent::Shutdown(reply) => {
                let _ = reply.send(());
            }
        }
    }

    fn health(&self) -> ConsensusHealth {
        let state = self.engine.state();
        ConsensusHealth {
            phase: state.phase,
            view: state.view,
            seq: state.seq,
            leader: self.engine.leader().map(|v| v.id.clone()),
            height: self.chain.height(),
            low_watermark: state.low_watermark,
            high_watermark: state.high_watermark,
            breaker: self.breaker.state(),
        }
    }

    async fn propose(&mut self) -> Result<u64, ConsensusError> {
        if !self.breaker.can_proceed() {
            let retry_in = self.breaker.retry_in();
            warn!(
                "{} not proposing: circuit open, retry in {retry_in:?}",
                self.engine.identity()
            );
            return Err(ConsensusError::CircuitOpen { retry_in });
        }
        let timestamp = now_millis();
        let chain = &self.chain;
        let output = self
            .engine
            .propose(|view, seq| chain.candidate(view, seq, timestamp))?;
        let seq = self.engine.state().seq;
        self.apply(output).await;
        Ok(seq)
    }

    async fn handle_inbound(&mut self, envelope: InboundMessage) {
        let message = match ConsensusMessage::decode(&envelope.payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(
                    "{} undecodable {} payload from {}: {e}",
                    self.engine.identity(),
                    envelope.topic,
                    envelope.sender
                );
                return;
            }
        };
        if message.sender() != envelope.sender || message.topic() != envelope.topic {
            warn!(
                "{} dropping {} on {} from {}: envelope does not match signer {}",
                self.engine.identity(),
                message.kind(),
                envelope.topic,
                envelope.sender,
                message.sender()
            );
            return;
        }

        let chain = &mut self.chain;
        let output = self
            .engine
            .on_message(message, |candidate| chain.stage_proposal(candidate));
        self.apply(output).await;
    }

    async fn handle_expiry(&mut self, generation: u64) {
        if !self.timer.is_current(generation) {
            debug!(
                "{} ignoring stale timer {generation}",
                self.engine.identity()
            );
            return;
        }
        let unsealed = self.unsealed.take();
        if self.engine.phase() == Phase::Idle {
            self.timer.cancel();
            return;
        }
        if let Some(certificate) = unsealed {
            if self.engine.phase() == Phase::Commit && certificate.view == self.engine.view() {
                info!(
                    "{} retrying commit of seq={}",
                    self.engine.identity(),
                    certificate.seq
                );
                if let Some(next) = self.seal(certificate).await {
                    self.apply(next).await;
                }
                return;
            }
        }
        self.breaker.record_failure();
        let output = self.engine.on_timeout();
        self.apply(output).await;
    }

    /// Carry out what the engine decided, including any follow-up output
    /// produced by sealing a certified block.
    async fn apply(&mut self, mut output: EngineOutput) {
        loop {
            match output.timer {
                TimerCommand::Start => {
                    self.timer.start();
                }
                TimerCommand::Cancel => self.timer.cancel(),
                TimerCommand::Keep => {}
            }
            self.broadcast(&output.messages).await;
            if let Some(stable) = output.stable_checkpoint {
                self.on_stable_checkpoint(stable);
            }
            if let Some(view) = output.adopted_view {
                if let Some(stale) = self.unsealed.take() {
                    warn!(
                        "{} dropping unsealed seq={} after moving to view {view}",
                        self.engine.identity(),
                        stale.seq
                    );
                }
                debug!("{} now in view {view}", self.engine.identity());
            }
            let Some(certificate) = output.committed.take() else {
                break;
            };
            match self.seal(certificate).await {
                Some(next) => output = next,
                None => break,
            }
        }
    }

    async fn broadcast(&self, messages: &[ConsensusMessage]) {
        for message in messages {
            let payload = match message.encode() {
                Ok(payload) => payload,
                Err(e) => {
                    error!(
                        "{} could not encode {}: {e}",
                        self.engine.identity(),
                        message.kind()
                    );
                    continue;
                }
            };
            let transport = &self.transport;
            let topic = message.topic();
            match self
                .breaker
                .guard(|| transport.publish(topic, payload))
                .await
            {
                Ok(()) => {}
                Err(GuardError::CircuitOpen { retry_in }) => warn!(
                    "{} not publishing {}: circuit open, retry in {retry_in:?}",
                    self.engine.identity(),
                    message.kind()
                ),
                Err(GuardError::Inner(e)) => warn!(
                    "{} failed to publish {}: {e}",
                    self.engine.identity(),
                    message.kind()
                ),
            }
        }
    }

    /// Persist a certified block, save the head checkpoint and return the
    /// engine to idle.
    ///
    /// A failed write keeps the round in commit, holds on to the certificate
    /// and restarts the phase timer so the next expiry tries again.
    async fn seal(&mut self, certificate: CommitCertificate) -> Option<EngineOutput> {
        let block = match self.chain.commit_block(certificate.seal()).await {
            Ok(Some(block)) => {
                self.breaker.record_success();
                block
            }
            Ok(None) => {
                warn!(
                    "{} certified seq={} with an empty batch",
                    self.engine.identity(),
                    certificate.seq
                );
                return None;
            }
            Err(e) => {
                self.breaker.record_failure();
                error!(
                    "{} failed to commit seq={} view={}, will retry: {e}",
                    self.engine.identity(),
                    certificate.seq,
                    certificate.view
                );
                self.unsealed = Some(certificate);
                self.timer.start();
                return None;
            }
        };

        self.save_checkpoint().await;
        let output = self.engine.on_commit_applied(block.index(), *block.hash());
        self.timer.cancel();
        self.height.send_replace(block.index());
        info!(
            "{} committed block #{} view={} seq={} with {} of {} signatures",
            self.engine.identity(),
            block.index(),
            certificate.view,
            certificate.seq,
            certificate.signatures.len(),
            self.engine.validator_set().len()
        );
        Some(output)
    }

    async fn save_checkpoint(&self) {
        let checkpoint = self.chain.checkpoint();
        let store = &self.checkpoints;
        match self.breaker.call(|| store.save(&checkpoint)).await {
            Ok(()) => debug!(
                "{} checkpoint saved at height {}",
                self.engine.identity(),
                checkpoint.height
            ),
            Err(e) => warn!(
                "{} checkpoint at height {} not saved: {e}",
                self.engine.identity(),
                checkpoint.height
            ),
        }
    }

    fn on_stable_checkpoint(&self, stable: StableCheckpoint) {
        let head = self.chain.checkpoint();
        if stable.height <= head.height
            && self
                .chain
                .blocks()
                .iter()
                .any(|block| block.index() == stable.height && *block.hash() == stable.last_hash)
        {
            return;
        }
        warn!(
            "{} stable checkpoint height={} hash={} does not match local chain (head {})",
            self.engine.identity(),
            stable.height,
            stable.last_hash.short(),
            head.height
        );
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
