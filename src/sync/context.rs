use std::{
    fmt,
    sync::{Arc, Mutex},
};

use tokio::time;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::util::now_mts;

use super::{
    error::{ConfigResult, Interrupted, SyncConfigError},
    state::SyncStatusManager,
};

/// Identifies one synchronization pass. Lowercase ASCII alphanumerics, at most 32 characters, so
/// it can be embedded in table names.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunId(String);

impl RunId {
    pub fn generate() -> Self {
        let mut id = Uuid::new_v4().simple().to_string();
        id.truncate(12);
        Self(id)
    }

    pub fn parse(value: &str) -> ConfigResult<Self> {
        let valid = !value.is_empty()
            && value.len() <= 32
            && value
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit());

        if !valid {
            return Err(SyncConfigError::InvalidRunId(value.to_string()));
        }

        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Explicit state of one pass, handed to every stage of the pipeline.
#[derive(Debug, Clone)]
pub struct SyncRunContext {
    run_id: RunId,
    cancel: CancellationToken,
    status_manager: Arc<SyncStatusManager>,
    started_at: i64,
}

impl SyncRunContext {
    pub(crate) fn new(
        run_id: RunId,
        cancel: CancellationToken,
        status_manager: Arc<SyncStatusManager>,
    ) -> Self {
        Self {
            run_id,
            cancel,
            status_manager,
            started_at: now_mts(),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_started_at(mut self, started_at: i64) -> Self {
        self.started_at = started_at;
        self
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// The pass clock: every "now" within the pass refers to its start.
    pub fn started_at(&self) -> i64 {
        self.started_at
    }

    pub(crate) fn status_manager(&self) -> &Arc<SyncStatusManager> {
        &self.status_manager
    }

    pub fn is_interrupted(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn check_interrupt(&self) -> Result<(), Interrupted> {
        if self.cancel.is_cancelled() {
            return Err(Interrupted);
        }
        Ok(())
    }

    /// Sleeps for `duration`, waking early on interruption.
    pub async fn sleep(&self, duration: time::Duration) -> Result<(), Interrupted> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(Interrupted),
            _ = time::sleep(duration) => Ok(()),
        }
    }

    /// Drives `future` to completion unless the pass is interrupted first.
    pub async fn interruptible<F: Future>(&self, future: F) -> Result<F::Output, Interrupted> {
        self.check_interrupt()?;

        tokio::select! {
            _ = self.cancel.cancelled() => Err(Interrupted),
            output = future => Ok(output),
        }
    }
}

/// Hands out one cancellation token per queue run, all children of a root token cancelled on
/// shutdown.
#[derive(Debug, Default)]
pub(crate) struct Interrupter {
    root: CancellationToken,
    current: Mutex<CancellationToken>,
}

impl Interrupter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn next_token(&self) -> CancellationToken {
        let token = self.root.child_token();
        *self
            .current
            .lock()
            .expect("`Interrupter` mutex can't be poisoned") = token.clone();
        token
    }

    /// Interrupts the running queue run, if any. Later runs are unaffected.
    pub fn interrupt(&self) {
        self.current
            .lock()
            .expect("`Interrupter` mutex can't be poisoned")
            .cancel();
    }

    pub fn shutdown(&self) {
        self.root.cancel();
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::broadcast;

    use super::*;

    #[test]
    fn run_ids_are_table_name_safe() {
        let id = RunId::generate();
        assert_eq!(id.as_str().len(), 12);
        assert!(RunId::parse(id.as_str()).is_ok());

        assert!(RunId::parse("abc123").is_ok());
        assert!(matches!(
            RunId::parse("ABC"),
            Err(SyncConfigError::InvalidRunId(_))
        ));
        assert!(RunId::parse("a_b").is_err());
        assert!(RunId::parse("").is_err());
    }

    #[tokio::test]
    async fn interrupter_cancels_only_the_current_token() {
        let interrupter = Interrupter::new();

        let first = interrupter.next_token();
        interrupter.interrupt();
        assert!(first.is_cancelled());

        let second = interrupter.next_token();
        assert!(!second.is_cancelled());

        interrupter.shutdown();
        assert!(second.is_cancelled());
        assert!(interrupter.next_token().is_cancelled());
    }

    #[tokio::test]
    async fn sleep_wakes_on_interrupt() {
        let (update_tx, _) = broadcast::channel(4);
        let cancel = CancellationToken::new();
        let ctx = SyncRunContext::new(
            RunId::generate(),
            cancel.clone(),
            SyncStatusManager::new(update_tx, Vec::new()),
        );

        cancel.cancel();

        let res = ctx.sleep(time::Duration::from_secs(3600)).await;
        assert_eq!(res, Err(Interrupted));
        assert_eq!(ctx.check_interrupt(), Err(Interrupted));
    }
}
