//! Phase timeout for the PBFT node.
//!
//! At most one timer is outstanding. Every start bumps a generation number
//! and aborts the previous sleep; the expiry carries the generation it was
//! started with so the node can discard one that raced with a restart.

use {
    log::*,
    std::time::Duration,
    tokio::{sync::mpsc, task::JoinHandle},
};

#[derive(Debug)]
pub struct PhaseTimer {
    duration: Duration,
    generation: u64,
    handle: Option<JoinHandle<()>>,
    expiry_tx: mpsc::Sender<u64>,
}

impl PhaseTimer {
    /// Expiries are delivered as generation numbers on `expiry_tx`.
    pub fn new(duration: Duration, expiry_tx: mpsc::Sender<u64>) -> Self {
        Self {
            duration,
            generation: 0,
            handle: None,
            expiry_tx,
        }
    }

    /// Start (or restart) the timer. Returns the new generation.
    pub fn start(&mut self) -> u64 {
        self.cancel();
        self.generation = self.generation.wrapping_add(1);
        let generation = self.generation;
        let duration = self.duration;
        let expiry_tx = self.expiry_tx.clone();
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if expiry_tx.send(generation).await.is_err() {
                debug!("phase timer {generation} fired after node stopped");
            }
        }));
        generation
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// Whether an expiry for `generation` belongs to the running timer.
    pub fn is_current(&self, generation: u64) -> bool {
        self.handle.is_some() && generation == self.generation
    }

    pub fn is_active(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}

impl Drop for PhaseTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
