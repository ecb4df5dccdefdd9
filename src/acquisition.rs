//! # Acquisition Control Module
//!
//! The recorder's way of talking back to the host.
//!
//! The host polls [`AcquisitionControl::is_active`] to learn whether the run should
//! continue. Fatal configuration mismatches call [`AcquisitionControl::abort`], which
//! clears that flag and broadcasts a [`RecorderUpdate`] to every subscriber.
//! Subscribers receive updates over unbounded channels, so the recording thread never
//! blocks on a slow listener.

use crate::session::RecordMode;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Notifications published by the recording session
#[derive(Debug, Clone, PartialEq)]
pub enum RecorderUpdate {
    ModeSelected(RecordMode),
    Aborted { reason: String },
    FilesClosed { mode: RecordMode },
}

/// Shared acquisition-active flag plus update fan-out
#[derive(Clone)]
pub struct AcquisitionControl {
    active: Arc<AtomicBool>,
    subscribers: Arc<Mutex<Vec<Sender<RecorderUpdate>>>>,
}

impl AcquisitionControl {
    pub fn new() -> Self {
        Self {
            active: Arc::new(AtomicBool::new(true)),
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Host-side switch, e.g. when the user restarts acquisition
    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    /// Receive every update published from now on
    pub fn subscribe(&self) -> Receiver<RecorderUpdate> {
        let (tx, rx) = unbounded();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Stop acquisition for the whole run and tell everyone why
    pub fn abort(&self, reason: impl Into<String>) {
        let reason = reason.into();
        log::error!("Stopping acquisition: {}", reason);
        self.active.store(false, Ordering::Release);
        self.publish(RecorderUpdate::Aborted { reason });
    }

    pub fn publish(&self, update: RecorderUpdate) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // Dropped receivers are forgotten
        subscribers.retain(|tx| tx.send(update.clone()).is_ok());
    }
}

impl Default for AcquisitionControl {
    fn default() -> Self {
        Self::new()
    }
}
