use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard},
};

use thiserror::Error;
use tokio::{sync::broadcast, time};
use tracing::warn;

/// Process-wide synchronization status.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncStatus {
    NotStarted,
    InProgress {
        /// `0.0..=100.0`, non-decreasing within a pass.
        percent: f64,
        /// Expected wall-clock time left, when rate-limited requests dominate it.
        estimated_remaining: Option<time::Duration>,
    },
    Synced,
    Interrupted,
    /// No active identity could be resolved.
    Unauthorized,
    Failed(String),
    ShutdownInitiated,
    Shutdown,
}

impl SyncStatus {
    pub fn in_progress(percent: f64) -> Self {
        Self::InProgress {
            percent: percent.clamp(0.0, 100.0),
            estimated_remaining: None,
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "Not started"),
            Self::InProgress {
                percent,
                estimated_remaining: Some(eta),
            } => write!(f, "In progress: {percent:.1}% (about {}s left)", eta.as_secs()),
            Self::InProgress { percent, .. } => write!(f, "In progress: {percent:.1}%"),
            Self::Synced => write!(f, "Synced"),
            Self::Interrupted => write!(f, "Interrupted"),
            Self::Unauthorized => write!(f, "Unauthorized"),
            Self::Failed(reason) => write!(f, "Failed: {reason}"),
            Self::ShutdownInitiated => write!(f, "Shutdown initiated"),
            Self::Shutdown => write!(f, "Shutdown"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Progress sink error: {0}")]
pub struct ProgressSinkError(pub String);

/// External consumer of status changes. Failures are logged and never fail a pass.
pub trait ProgressSink: Send + Sync {
    fn publish(&self, status: &SyncStatus) -> Result<(), ProgressSinkError>;
}

pub type SyncTransmitter = broadcast::Sender<SyncStatus>;
pub type SyncReceiver = broadcast::Receiver<SyncStatus>;

pub trait SyncReader: Send + Sync + 'static {
    fn update_receiver(&self) -> SyncReceiver;
    fn status_snapshot(&self) -> SyncStatus;
}

pub(crate) struct SyncStatusManager {
    status: Mutex<SyncStatus>,
    update_tx: SyncTransmitter,
    sinks: Vec<Arc<dyn ProgressSink>>,
}

impl fmt::Debug for SyncStatusManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncStatusManager")
            .field("status", &self.status)
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl SyncStatusManager {
    pub fn new(update_tx: SyncTransmitter, sinks: Vec<Arc<dyn ProgressSink>>) -> Arc<Self> {
        Arc::new(Self {
            status: Mutex::new(SyncStatus::NotStarted),
            update_tx,
            sinks,
        })
    }

    fn lock(&self) -> MutexGuard<'_, SyncStatus> {
        self.status
            .lock()
            .expect("`SyncStatusManager` mutex can't be poisoned")
    }

    fn update_status_guard(
        &self,
        mut status_guard: MutexGuard<'_, SyncStatus>,
        new_status: SyncStatus,
    ) {
        *status_guard = new_status.clone();
        drop(status_guard);

        for sink in &self.sinks {
            if let Err(e) = sink.publish(&new_status) {
                warn!(error = %e, status = %new_status, "failed to publish sync status");
            }
        }

        // Ignore no-receivers errors
        let _ = self.update_tx.send(new_status);
    }

    pub fn update(&self, new_status: SyncStatus) {
        let status_guard = self.lock();
        self.update_status_guard(status_guard, new_status);
    }

    /// Publishes progress of the running pass, never moving the percentage backward.
    pub fn update_progress(&self, percent: f64, estimated_remaining: Option<time::Duration>) {
        let status_guard = self.lock();

        let percent = match &*status_guard {
            SyncStatus::InProgress {
                percent: current, ..
            } => percent.max(*current),
            _ => percent,
        };

        let new_status = SyncStatus::InProgress {
            percent: percent.clamp(0.0, 100.0),
            estimated_remaining,
        };

        if *status_guard == new_status {
            return;
        }

        self.update_status_guard(status_guard, new_status);
    }
}

impl SyncReader for SyncStatusManager {
    fn update_receiver(&self) -> SyncReceiver {
        self.update_tx.subscribe()
    }

    fn status_snapshot(&self) -> SyncStatus {
        self.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingSink;

    impl ProgressSink for FailingSink {
        fn publish(&self, _status: &SyncStatus) -> Result<(), ProgressSinkError> {
            Err(ProgressSinkError("transport closed".to_string()))
        }
    }

    #[test]
    fn progress_is_monotonic_within_a_pass() {
        let (update_tx, _) = broadcast::channel(16);
        let manager = SyncStatusManager::new(update_tx, vec![Arc::new(FailingSink)]);

        manager.update(SyncStatus::in_progress(0.0));
        manager.update_progress(40.0, None);
        manager.update_progress(25.0, None);

        assert_eq!(manager.status_snapshot(), SyncStatus::in_progress(40.0));

        // A new pass starts from scratch
        manager.update(SyncStatus::in_progress(0.0));
        manager.update_progress(10.0, None);

        assert_eq!(manager.status_snapshot(), SyncStatus::in_progress(10.0));
    }

    #[test]
    fn broadcasts_updates_despite_sink_failures() {
        let (update_tx, _) = broadcast::channel(16);
        let manager = SyncStatusManager::new(update_tx, vec![Arc::new(FailingSink)]);
        let mut rx = manager.update_receiver();

        manager.update(SyncStatus::Failed("boom".to_string()));

        assert_eq!(rx.try_recv().unwrap(), SyncStatus::Failed("boom".to_string()));
    }
}
