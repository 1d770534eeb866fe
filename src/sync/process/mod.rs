use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::{auth::AuthProvider, db::Storage, util::AbortOnDropHandle};

use super::{
    context::Interrupter,
    queue::SyncQueue,
    schema::CollectionSelector,
    state::{SyncStatus, SyncStatusManager},
};

pub(crate) mod checker;
pub(crate) mod error;
pub(crate) mod fetch;
pub(crate) mod hooks;
pub(crate) mod inserter;
pub(crate) mod step_tracker;
pub(crate) mod temp_tables;

use error::{ProcessResult, SyncProcessError};
use temp_tables::{CleanupScope, TempTables};

/// Background task owning the sync queue: cleans up after a previous process, runs the startup
/// sync, then processes the queue on every trigger until shutdown.
pub(super) struct SyncProcess {
    storage: Arc<dyn Storage>,
    auth: Arc<dyn AuthProvider>,
    queue: Arc<SyncQueue>,
    interrupter: Arc<Interrupter>,
    shutdown_rx: broadcast::Receiver<()>,
    trigger_rx: mpsc::Receiver<Vec<CollectionSelector>>,
    status_manager: Arc<SyncStatusManager>,
}

impl SyncProcess {
    pub fn spawn(
        storage: Arc<dyn Storage>,
        auth: Arc<dyn AuthProvider>,
        queue: Arc<SyncQueue>,
        interrupter: Arc<Interrupter>,
        shutdown_tx: broadcast::Sender<()>,
        trigger_rx: mpsc::Receiver<Vec<CollectionSelector>>,
        status_manager: Arc<SyncStatusManager>,
    ) -> AbortOnDropHandle<()> {
        // Subscribed before spawning so an immediate shutdown is never missed
        let shutdown_rx = shutdown_tx.subscribe();

        tokio::spawn(async move {
            let process = Self {
                storage,
                auth,
                queue,
                interrupter,
                shutdown_rx,
                trigger_rx,
                status_manager,
            };

            process.run().await
        })
        .into()
    }

    /// Drops staging tables left by interrupted or crashed passes, and queues a full sync when any
    /// identity asks for one on startup.
    async fn startup(&self) -> ProcessResult<()> {
        let dropped = TempTables::new(self.storage.clone())
            .cleanup(CleanupScope::All)
            .await
            .map_err(SyncProcessError::StartupCleanup)?;

        if dropped > 0 {
            info!(dropped, "discarded staging tables of previous runs");
        }

        let startup_sync_required = match self.auth.resolve_active_identities().await {
            Ok(identities) => identities
                .values()
                .any(|auth| auth.is_sync_on_startup_required),
            Err(e) => {
                warn!(error = %e, "could not resolve identities on startup");
                false
            }
        };

        if startup_sync_required {
            self.queue.add(&[CollectionSelector::All]).await?;
        }

        Ok(())
    }

    async fn process_queue(&self) {
        match self.queue.process().await {
            Ok(Some(report)) => debug!(?report, "sync queue run finished"),
            Ok(None) => {}
            Err(e) => {
                error!(error = %e, "sync queue run failed");
                self.status_manager.update(SyncStatus::Failed(e.to_string()));
            }
        }
    }

    async fn handle_trigger(&mut self, mut selectors: Vec<CollectionSelector>) {
        // Coalesce triggers sent while the previous run was going
        while let Ok(more) = self.trigger_rx.try_recv() {
            selectors.extend(more);
        }

        if let Err(e) = self.queue.add(&selectors).await {
            warn!(error = %e, "rejected sync trigger");
            self.status_manager.update(SyncStatus::Failed(e.to_string()));
            return;
        }

        self.process_queue().await;
    }

    async fn run(mut self) {
        match self.startup().await {
            Ok(()) => self.process_queue().await,
            Err(e) => {
                error!(error = %e, "sync startup failed");
                self.status_manager.update(SyncStatus::Failed(e.to_string()));
            }
        }

        loop {
            tokio::select! {
                shutdown_res = self.shutdown_rx.recv() => {
                    if let Err(e) = shutdown_res {
                        warn!(error = %e, "sync shutdown signal lost");
                    }
                    self.interrupter.shutdown();
                    return;
                }
                trigger = self.trigger_rx.recv() => {
                    let Some(selectors) = trigger else {
                        // Every controller is gone
                        return;
                    };
                    self.handle_trigger(selectors).await;
                }
            }
        }
    }
}
