use std::sync::{Arc, Mutex};

use tokio::{
    sync::{broadcast, mpsc},
    time,
};

use crate::{
    api::{RemoteApi, RetryingRemoteApi},
    auth::AuthProvider,
    db::Storage,
    util::AbortOnDropHandle,
};

use super::{
    config::{SyncConfig, SyncControllerConfig},
    context::Interrupter,
    error::{Result, SyncError},
    process::{
        SyncProcess,
        hooks::{SyncHook, default_hooks},
        inserter::DataInserter,
    },
    queue::{SyncJob, SyncQueue},
    schema::{CollectionRegistry, CollectionSelector},
    state::{ProgressSink, SyncReader, SyncReceiver, SyncStatus, SyncStatusManager},
};

/// Handle to a running sync process.
#[derive(Debug)]
pub struct SyncController {
    config: SyncControllerConfig,
    handle: Mutex<Option<AbortOnDropHandle<()>>>,
    shutdown_tx: broadcast::Sender<()>,
    trigger_tx: mpsc::Sender<Vec<CollectionSelector>>,
    queue: Arc<SyncQueue>,
    interrupter: Arc<Interrupter>,
    status_manager: Arc<SyncStatusManager>,
}

impl SyncController {
    fn new(
        config: &SyncConfig,
        handle: AbortOnDropHandle<()>,
        shutdown_tx: broadcast::Sender<()>,
        trigger_tx: mpsc::Sender<Vec<CollectionSelector>>,
        queue: Arc<SyncQueue>,
        interrupter: Arc<Interrupter>,
        status_manager: Arc<SyncStatusManager>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config: config.into(),
            handle: Mutex::new(Some(handle)),
            shutdown_tx,
            trigger_tx,
            queue,
            interrupter,
            status_manager,
        })
    }

    pub fn reader(&self) -> Arc<dyn SyncReader> {
        self.status_manager.clone()
    }

    pub fn update_receiver(&self) -> SyncReceiver {
        self.status_manager.update_receiver()
    }

    pub fn status_snapshot(&self) -> SyncStatus {
        self.status_manager.status_snapshot()
    }

    /// Queues a sync of `selectors` and wakes the process. Jobs already covered by a pending job
    /// are not queued again.
    pub async fn trigger(&self, selectors: Vec<CollectionSelector>) -> Result<()> {
        self.trigger_tx
            .send(selectors)
            .await
            .map_err(SyncError::SendTriggerFailed)
    }

    /// Jobs not yet finished, oldest first. Jobs in [`JobState::Error`] are retried on the next
    /// trigger.
    ///
    /// [`JobState::Error`]: crate::sync::JobState::Error
    pub async fn pending_jobs(&self) -> Result<Vec<SyncJob>> {
        Ok(self.queue.pending_jobs().await?)
    }

    /// Interrupts the running pass, if any. Its job is left in the queue and its staging tables
    /// are discarded on the next startup.
    pub fn interrupt(&self) {
        self.interrupter.interrupt();
    }

    fn try_consume_handle(&self) -> Option<AbortOnDropHandle<()>> {
        self.handle
            .lock()
            .expect("`SyncController` mutex can't be poisoned")
            .take()
    }

    /// Interrupts the running pass and waits for the process to stop, aborting it after the
    /// shutdown timeout.
    ///
    /// Can only be called once per controller. Returns an error if the process had to be aborted,
    /// or if it was already shut down.
    pub async fn shutdown(&self) -> Result<()> {
        let Some(mut handle) = self.try_consume_handle() else {
            return Err(SyncError::SyncAlreadyShutdown);
        };

        self.status_manager.update(SyncStatus::ShutdownInitiated);

        self.interrupter.shutdown();

        let shutdown_send_res = self.shutdown_tx.send(()).map_err(|e| {
            handle.abort();
            SyncError::SendShutdownSignalFailed(e)
        });

        let shutdown_res = match shutdown_send_res {
            Ok(_) => {
                tokio::select! {
                    join_res = &mut handle => {
                        join_res.map_err(SyncError::SyncProcessTaskJoin)
                    }
                    _ = time::sleep(self.config.shutdown_timeout()) => {
                        handle.abort();
                        Err(SyncError::ShutdownTimeout)
                    }
                }
            }
            Err(e) => Err(e),
        };

        self.status_manager.update(SyncStatus::Shutdown);

        shutdown_res
    }
}

/// Builder of the background sync process.
pub struct SyncEngine {
    config: SyncConfig,
    storage: Arc<dyn Storage>,
    api: Arc<dyn RemoteApi>,
    auth: Arc<dyn AuthProvider>,
    registry: Arc<CollectionRegistry>,
    hooks: Vec<Arc<dyn SyncHook>>,
    sinks: Vec<Arc<dyn ProgressSink>>,
}

impl SyncEngine {
    /// Engine over the standard collections, with currency conversion and sub-account balance
    /// recalculation as reconciliation hooks.
    pub fn new(
        config: impl Into<SyncConfig>,
        storage: Arc<dyn Storage>,
        api: Arc<dyn RemoteApi>,
        auth: Arc<dyn AuthProvider>,
    ) -> Self {
        let config = config.into();
        let hooks = default_hooks(&config);

        Self {
            config,
            storage,
            api,
            auth,
            registry: CollectionRegistry::standard(),
            hooks,
            sinks: Vec::new(),
        }
    }

    pub fn with_registry(mut self, registry: Arc<CollectionRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Adds a hook, run after the ones already registered.
    pub fn with_hook(mut self, hook: Arc<dyn SyncHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Replaces every registered hook.
    pub fn with_hooks(mut self, hooks: Vec<Arc<dyn SyncHook>>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Validates the hooks against the registry and spawns the sync process. Must be called within
    /// a Tokio runtime.
    pub fn start(self) -> Result<Arc<SyncController>> {
        for hook in &self.hooks {
            hook.validate(&self.registry)?;
        }

        let (update_tx, _) = broadcast::channel::<SyncStatus>(100);
        let status_manager = SyncStatusManager::new(update_tx, self.sinks);

        // Internal channel for shutdown signal
        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let (trigger_tx, trigger_rx) = mpsc::channel::<Vec<CollectionSelector>>(16);

        let interrupter = Interrupter::new();

        let api: Arc<dyn RemoteApi> = RetryingRemoteApi::new(&self.config, self.api);

        let inserter = DataInserter::new(
            &self.config,
            self.storage.clone(),
            api,
            self.auth.clone(),
            self.registry.clone(),
            self.hooks,
        );

        let queue = Arc::new(SyncQueue::new(
            &self.config,
            self.storage.clone(),
            self.registry,
            Arc::new(inserter),
            interrupter.clone(),
            status_manager.clone(),
        ));

        let handle = SyncProcess::spawn(
            self.storage,
            self.auth,
            queue.clone(),
            interrupter.clone(),
            shutdown_tx.clone(),
            trigger_rx,
            status_manager.clone(),
        );

        Ok(SyncController::new(
            &self.config,
            handle,
            shutdown_tx,
            trigger_tx,
            queue,
            interrupter,
            status_manager,
        ))
    }
}
