//! TCP transport for consensus message delivery.
//!
//! ## Wire format
//!
//! Every message on the wire is length-prefixed:
//!
//! ```text
//! [4 bytes: payload length (u32-le)] [N bytes: bincode Envelope]
//! ```
//!
//! The listener reads the 4-byte header, validates the length against
//! `max_message_size`, then reads exactly that many bytes and queues the
//! decoded [`Envelope`]. A dispatch task drains the queue, which holds at
//! most `channel_buffer_size` envelopes, into the subscribers of each topic.

use {
    crate::{
        config::TransportConfig,
        error::{Result, TransportError},
        message::{Envelope, InboundMessage, Topic},
        transport::ConsensusTransport,
    },
    async_trait::async_trait,
    log::*,
    parking_lot::RwLock,
    std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration},
    tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::{TcpListener, TcpStream},
        sync::mpsc,
        task::JoinHandle,
    },
};

type Subscribers = Arc<RwLock<HashMap<Topic, Vec<mpsc::Sender<InboundMessage>>>>>;

/// Publishes to a static peer list and serves inbound frames to subscribers.
pub struct TcpTransport {
    config: TransportConfig,
    local_addr: SocketAddr,
    subscribers: Subscribers,
    accept_task: JoinHandle<()>,
    dispatch_task: JoinHandle<()>,
}

impl TcpTransport {
    /// Bind the listener and start accepting connections.
    ///
    /// Spawns a Tokio task per accepted connection.
    pub async fn start(config: TransportConfig) -> Result<Self> {
        config.validate()?;
        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        info!(
            "consensus transport for {} listening on {}",
            config.node_id, local_addr
        );

        let subscribers = Subscribers::default();
        let (inbound_tx, inbound_rx) = mpsc::channel(config.channel_buffer_size);
        let dispatch_task = tokio::spawn(dispatch(inbound_rx, subscribers.clone()));
        let accept_task = {
            let max_msg = config.max_message_size;
            tokio::spawn(async move {
                loop {
                    match listener.accept().await {
                        Ok((stream, addr)) => {
                            debug!("accepted consensus connection from {}", addr);
                            tokio::spawn(handle_connection(
                                stream,
                                addr,
                                inbound_tx.clone(),
                                max_msg,
                            ));
                        }
                        Err(e) => {
                            error!("accept error: {}", e);
                        }
                    }
                }
            })
        };

        Ok(Self {
            config,
            local_addr,
            subscribers,
            accept_task,
            dispatch_task,
        })
    }

    /// The address the listener is bound to (useful when port = 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Replace the peer list. Nodes started on ephemeral ports learn each
    /// other's addresses only after binding.
    pub fn set_peers(&mut self, peers: Vec<SocketAddr>) {
        self.config.peers = peers;
    }

    pub fn peers(&self) -> &[SocketAddr] {
        &self.config.peers
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.accept_task.abort();
        self.dispatch_task.abort();
    }
}

#[async_trait]
impl ConsensusTransport for TcpTransport {
    fn node_id(&self) -> &str {
        &self.config.node_id
    }

    /// Fails only when no peer at all could be reached; partial delivery is
    /// logged and left to consensus timeouts.
    async fn publish(&self, topic: Topic, payload: Vec<u8>) -> Result<()> {
        let envelope = Envelope::new(topic, self.config.node_id.clone(), payload);
        let frame = envelope.serialize_framed(self.config.max_message_size)?;
        let peers = &self.config.peers;
        let failures = broadcast_frame(
            peers,
            frame,
            Duration::from_millis(self.config.connect_timeout_ms),
        )
        .await;
        for (addr, e) in &failures {
            warn!("{} to {} failed: {}", topic, addr, e);
        }
        if !peers.is_empty() && failures.len() == peers.len() {
            return Err(TransportError::Unreachable(peers.len()));
        }
        Ok(())
    }

    async fn subscribe(&self, topic: Topic, handler: mpsc::Sender<InboundMessage>) -> Result<()> {
        self.subscribers
            .write()
            .entry(topic)
            .or_default()
            .push(handler);
        Ok(())
    }
}

/// Read length-prefixed envelopes from `stream` until EOF or error.
async fn handle_connection(
    mut stream: TcpStream,
    addr: SocketAddr,
    inbound: mpsc::Sender<InboundMessage>,
    max_message_size: usize,
) {
    let mut header_buf = [0u8; 4];

    loop {
        if let Err(e) = stream.read_exact(&mut header_buf).await {
            if e.kind() != std::io::ErrorKind::UnexpectedEof {
                warn!("header read error from {}: {}", addr, e);
            }
            break;
        }

        let len = Envelope::read_frame_len(&header_buf);
        if len > max_message_size {
            warn!(
                "peer {} sent oversized frame ({} > {}), dropping connection",
                addr, len, max_message_size
            );
            break;
        }

        let mut payload = vec![0u8; len];
        if let Err(e) = stream.read_exact(&mut payload).await {
            warn!("payload read error from {}: {}", addr, e);
            break;
        }

        match Envelope::deserialize(&payload) {
            Ok(envelope) => {
                debug!("received {} from {} ({})", envelope.topic, envelope.sender, addr);
                if inbound.send(envelope).await.is_err() {
                    debug!("transport shut down, closing connection from {}", addr);
                    break;
                }
            }
            Err(e) => {
                // Keep the connection; one bad frame does not poison the stream.
                warn!("deserialization error from {}: {}", addr, e);
            }
        }
    }

    debug!("connection to {} closed", addr);
}

/// Hand queued envelopes to the subscribers of their topic.
async fn dispatch(mut inbound: mpsc::Receiver<InboundMessage>, subscribers: Subscribers) {
    while let Some(envelope) = inbound.recv().await {
        let targets = subscribers
            .read()
            .get(&envelope.topic)
            .cloned()
            .unwrap_or_default();
        for tx in targets {
            if tx.send(envelope.clone()).await.is_err() {
                debug!("subscriber for {} is gone", envelope.topic);
            }
        }
    }
}

// ── Outbound sending ────────────────────────────────────────────────────────

/// Send one frame to every address concurrently over fresh connections.
///
/// Returns the addresses where sending failed.
async fn broadcast_frame(
    addrs: &[SocketAddr],
    frame: Vec<u8>,
    connect_timeout: Duration,
) -> Vec<(SocketAddr, TransportError)> {
    let frame = Arc::new(frame);
    let mut handles = Vec::with_capacity(addrs.len());
    for &addr in addrs {
        let frame = frame.clone();
        handles.push(tokio::spawn(async move {
            let result = async {
                let mut stream = tokio::time::timeout(connect_timeout, TcpStream::connect(addr))
                    .await
                    .map_err(|_| std::io::Error::from(std::io::ErrorKind::TimedOut))??;
                stream.write_all(&frame).await?;
                stream.flush().await?;
                Ok::<(), std::io::Error>(())
            }
            .await;
            (addr, result)
        }));
    }

    let mut failures = Vec::new();
    for (handle, &addr) in handles.into_iter().zip(addrs) {
        match handle.await {
            Ok((_, Ok(()))) => {}
            Ok((addr, Err(e))) => failures.push((addr, TransportError::Io(e))),
            Err(e) => failures.push((addr, TransportError::Io(std::io::Error::other(e)))),
        }
    }
    failures
}
