//! In-process fabric connecting several nodes inside one runtime.
//!
//! Every node gets a [`LoopbackTransport`] from a shared [`LoopbackBus`].
//! The bus can take a node offline (its publishes fail and nothing reaches
//! it) and can silently drop a whole topic to simulate a partial partition.

use {
    crate::{
        error::{Result, TransportError},
        message::{Envelope, InboundMessage, Topic},
        transport::ConsensusTransport,
    },
    async_trait::async_trait,
    log::*,
    parking_lot::RwLock,
    std::{
        collections::{HashMap, HashSet},
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
    },
    tokio::sync::mpsc,
};

#[derive(Default)]
struct BusState {
    subscribers: HashMap<Topic, Vec<(String, mpsc::Sender<InboundMessage>)>>,
    offline: HashSet<String>,
    dropped_topics: HashSet<Topic>,
}

/// Shared registry of loopback subscribers.
#[derive(Clone, Default)]
pub struct LoopbackBus {
    state: Arc<RwLock<BusState>>,
}

impl LoopbackBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport publishing as `node_id` on this bus.
    pub fn transport(&self, node_id: impl Into<String>) -> Arc<LoopbackTransport> {
        Arc::new(LoopbackTransport {
            node_id: node_id.into(),
            bus: self.clone(),
            published: AtomicUsize::new(0),
        })
    }

    pub fn set_offline(&self, node_id: &str, offline: bool) {
        let mut state = self.state.write();
        if offline {
            state.offline.insert(node_id.to_string());
        } else {
            state.offline.remove(node_id);
        }
        info!("loopback node {node_id} offline={offline}");
    }

    pub fn is_offline(&self, node_id: &str) -> bool {
        self.state.read().offline.contains(node_id)
    }

    /// Stop (or resume) delivering `topic` to anyone. Publishes still succeed.
    pub fn set_topic_dropped(&self, topic: Topic, dropped: bool) {
        let mut state = self.state.write();
        if dropped {
            state.dropped_topics.insert(topic);
        } else {
            state.dropped_topics.remove(&topic);
        }
    }

    fn subscribe(&self, node_id: &str, topic: Topic, handler: mpsc::Sender<InboundMessage>) {
        self.state
            .write()
            .subscribers
            .entry(topic)
            .or_default()
            .push((node_id.to_string(), handler));
    }

    async fn deliver(&self, envelope: Envelope) -> Result<()> {
        // Clone the targets out so no lock is held across an await.
        let targets: Vec<mpsc::Sender<InboundMessage>> = {
            let state = self.state.read();
            if state.offline.contains(&envelope.sender) {
                return Err(TransportError::Offline(envelope.sender));
            }
            if state.dropped_topics.contains(&envelope.topic) {
                debug!("loopback dropping {} from {}", envelope.topic, envelope.sender);
                return Ok(());
            }
            state
                .subscribers
                .get(&envelope.topic)
                .map(|subs| {
                    subs.iter()
                        .filter(|(id, _)| *id != envelope.sender && !state.offline.contains(id))
                        .map(|(_, tx)| tx.clone())
                        .collect()
                })
                .unwrap_or_default()
        };

        for tx in targets {
            if tx.send(envelope.clone()).await.is_err() {
                debug!("loopback subscriber for {} is gone", envelope.topic);
            }
        }
        Ok(())
    }
}

/// One node's handle on a [`LoopbackBus`].
pub struct LoopbackTransport {
    node_id: String,
    bus: LoopbackBus,
    published: AtomicUsize,
}

impl LoopbackTransport {
    /// Number of publish calls that reached this transport, failed ones included.
    pub fn publish_count(&self) -> usize {
        self.published.load(Ordering::Relaxed)
    }

    pub fn bus(&self) -> &LoopbackBus {
        &self.bus
    }
}

#[async_trait]
impl ConsensusTransport for LoopbackTransport {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    async fn publish(&self, topic: Topic, payload: Vec<u8>) -> Result<()> {
        self.published.fetch_add(1, Ordering::Relaxed);
        self.bus
            .deliver(Envelope::new(topic, self.node_id.clone(), payload))
            .await
    }

    async fn subscribe(&self, topic: Topic, handler: mpsc::Sender<InboundMessage>) -> Result<()> {
        self.bus.subscribe(&self.node_id, topic, handler);
        Ok(())
    }
}
