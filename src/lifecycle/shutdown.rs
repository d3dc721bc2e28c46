//! Drain coordination for the listener set.
//!
//! # Responsibilities
//! - Tell every accept loop that the process has begun draining
//! - Make that decision single-shot, so the manager's shutdown cannot run
//!   twice
//!
//! The manager holds the [`DrainControl`]; each listener's start task is
//! handed a [`DrainSignal`] before it begins accepting. The begun-draining
//! state is sticky: a signal obtained after the fact still resolves, which
//! a plain broadcast channel would miss.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

/// Write half: flips the process into draining exactly once.
pub struct DrainControl {
    draining: Arc<AtomicBool>,
    tx: broadcast::Sender<()>,
}

impl DrainControl {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            draining: Arc::new(AtomicBool::new(false)),
            tx,
        }
    }

    /// Hand out a signal for one listener task.
    pub fn signal(&self) -> DrainSignal {
        DrainSignal {
            draining: self.draining.clone(),
            rx: self.tx.subscribe(),
        }
    }

    /// Begin draining and wake every signal. Returns `false` when an
    /// earlier call already did.
    pub fn begin(&self) -> bool {
        if self.draining.swap(true, Ordering::SeqCst) {
            return false;
        }
        let _ = self.tx.send(());
        true
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }
}

impl Default for DrainControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Read half: resolves once draining begins.
pub struct DrainSignal {
    draining: Arc<AtomicBool>,
    rx: broadcast::Receiver<()>,
}

impl DrainSignal {
    /// Wait for the drain to begin; immediate when it already has.
    pub async fn wait(&mut self) {
        if self.draining.load(Ordering::SeqCst) {
            return;
        }
        let _ = self.rx.recv().await;
    }
}
