use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use serde_json::Value;
use strum::Display;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::{
    api::RemoteApi,
    auth::{AuthProvider, AuthRecord},
    db::{
        Storage, StorageTransaction,
        models::{Filter, ID_FIELD, Record},
    },
    sync::{
        config::SyncConfig,
        context::SyncRunContext,
        schema::{
            CollectionRegistry, CollectionRole, CollectionSchema, CollectionSelector, USERS_TABLE,
        },
        state::SyncStatus,
    },
};

use super::{
    checker::{PendingSchema, SyncChecker},
    error::{Result, SyncPassError},
    fetch::StepFetcher,
    hooks::{HookContext, SyncHook, run_hooks},
    step_tracker::StepTracker,
    temp_tables::{CleanupScope, TempTables},
};

/// How a pass ended, when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum PassOutcome {
    Completed,
    /// No active identity, or the exchange rejected its credentials.
    Unauthorized,
    Interrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
enum PassState {
    Init,
    ResolveAuth,
    PrivateFanout,
    PublicFanout,
    Reconcile,
    Promote,
    Done,
}

/// Runs one synchronization pass over the collections of a job.
#[async_trait]
pub(crate) trait PassRunner: Send + Sync {
    async fn run_pass(
        &self,
        ctx: &SyncRunContext,
        selector: &CollectionSelector,
    ) -> Result<PassOutcome>;
}

/// Fetches pending ranges into staging tables, reconciles them and promotes them atomically.
pub(crate) struct DataInserter {
    storage: Arc<dyn Storage>,
    auth: Arc<dyn AuthProvider>,
    registry: Arc<CollectionRegistry>,
    hooks: Vec<Arc<dyn SyncHook>>,
    checker: SyncChecker,
    fetcher: StepFetcher,
    temp_tables: TempTables,
}

/// Progress of a pass: one unit per identity, plus one for public collections.
struct PassProgress {
    units: usize,
    done: usize,
}

impl PassProgress {
    fn publish(&self, ctx: &SyncRunContext, fraction: f64, eta: Option<time::Duration>) {
        let percent = (self.done as f64 + fraction.clamp(0.0, 1.0)) / self.units as f64 * 100.0;
        ctx.status_manager().update_progress(percent, eta);
    }
}

impl DataInserter {
    pub fn new(
        config: &SyncConfig,
        storage: Arc<dyn Storage>,
        api: Arc<dyn RemoteApi>,
        auth: Arc<dyn AuthProvider>,
        registry: Arc<CollectionRegistry>,
        hooks: Vec<Arc<dyn SyncHook>>,
    ) -> Self {
        Self {
            checker: SyncChecker::new(config, storage.clone(), registry.clone()),
            fetcher: StepFetcher::new(config, api, storage.clone()),
            temp_tables: TempTables::new(storage.clone()),
            storage,
            auth,
            registry,
            hooks,
        }
    }

    /// Fetches every step of `pending`, replacing each with its updated state.
    async fn fetch_pending(
        &self,
        ctx: &SyncRunContext,
        pending: &mut PendingSchema,
        auth: Option<&AuthRecord>,
        progress: &PassProgress,
    ) -> Result<()> {
        if pending.is_empty() {
            return Ok(());
        }

        self.temp_tables
            .create_temp_schema_for(pending, ctx.run_id())
            .await?;

        let total = pending.step_count();
        let mut remaining_candles = pending
            .collections()
            .iter()
            .filter(|c| c.schema.role() == CollectionRole::Candles)
            .map(|c| c.steps.len())
            .sum::<usize>();
        let mut fetched = 0;

        for collection in pending.collections_mut() {
            let schema = collection.schema.clone();

            for step in collection.steps.iter_mut() {
                ctx.check_interrupt()?;

                let credentials = auth.and_then(|auth| {
                    auth.fanout()
                        .into_iter()
                        .find(|(sub_user_id, _)| *sub_user_id == step.selector.sub_user_id)
                        .map(|(_, credentials)| credentials)
                });

                *step = self.fetcher.fetch_step(ctx, &schema, step, credentials).await?;

                fetched += 1;
                if schema.role() == CollectionRole::Candles {
                    remaining_candles -= 1;
                }

                let eta = (remaining_candles > 0)
                    .then(|| self.fetcher.candles_request_interval() * remaining_candles as u32);
                progress.publish(ctx, fetched as f64 / total as f64, eta);
            }
        }

        Ok(())
    }

    async fn write_promotion(
        tx: &mut dyn StorageTransaction,
        ctx: &SyncRunContext,
        pending: &PendingSchema,
        cleared_users: &[i64],
    ) -> Result<()> {
        let promoted = TempTables::promote(tx, pending, ctx.run_id()).await?;

        for collection in pending.collections() {
            for step in &collection.steps {
                StepTracker::record_step_result(tx, step).await?;
            }
        }

        let mut patch = Record::new();
        patch.insert("isSyncOnStartupRequired".to_string(), Value::Bool(false));

        for user_id in cleared_users {
            tx.update_where(USERS_TABLE, &Filter::new().eq(ID_FIELD, *user_id), &patch)
                .await?;
        }

        debug!(run_id = %ctx.run_id(), promoted, "promotion written");

        Ok(())
    }

    /// Promotes staged rows and step states in one transaction.
    async fn promote(
        &self,
        ctx: &SyncRunContext,
        pending: &PendingSchema,
        cleared_users: &[i64],
    ) -> Result<()> {
        let mut tx = self.storage.begin().await?;

        match Self::write_promotion(tx.as_mut(), ctx, pending, cleared_users).await {
            Ok(()) => tx.commit().await?,
            Err(e) => {
                if let Err(rollback_error) = tx.rollback().await {
                    warn!(error = %rollback_error, "failed to roll back promotion");
                }
                return Err(e);
            }
        }

        Ok(())
    }

    async fn execute(
        &self,
        ctx: &SyncRunContext,
        selector: &CollectionSelector,
    ) -> Result<PassOutcome> {
        let selected: Vec<Arc<CollectionSchema>> = self.registry.select(selector);

        let mut state = PassState::Init;
        let mut identities = BTreeMap::new();
        let mut pending = PendingSchema::new();
        let mut progress = PassProgress { units: 1, done: 0 };

        loop {
            ctx.check_interrupt()?;

            debug!(run_id = %ctx.run_id(), %state, "sync pass state");

            state = match state {
                PassState::Init => {
                    self.registry.validate_selector(selector)?;
                    ctx.status_manager().update(SyncStatus::in_progress(0.0));
                    PassState::ResolveAuth
                }
                PassState::ResolveAuth => {
                    identities = self.auth.resolve_active_identities().await?;

                    if identities.is_empty() {
                        info!(run_id = %ctx.run_id(), "no active identity, skipping pass");
                        return Ok(PassOutcome::Unauthorized);
                    }

                    progress.units = identities.len() + 1;
                    PassState::PrivateFanout
                }
                PassState::PrivateFanout => {
                    for auth in identities.values() {
                        let mut private = self.checker.check_new_data(ctx, auth, &selected).await?;
                        self.fetch_pending(ctx, &mut private, Some(auth), &progress)
                            .await?;
                        pending.merge(private);

                        progress.done += 1;
                        progress.publish(ctx, 0.0, None);
                    }
                    PassState::PublicFanout
                }
                PassState::PublicFanout => {
                    let mut public = self
                        .checker
                        .check_new_public_data(ctx, &identities, &selected)
                        .await?;
                    self.fetch_pending(ctx, &mut public, None, &progress).await?;
                    pending.merge(public);
                    PassState::Reconcile
                }
                PassState::Reconcile => {
                    let hints = pending.names();
                    let hook_ctx = HookContext::new(ctx, &self.storage, &self.registry, &identities);
                    run_hooks(&self.hooks, &hook_ctx, Some(hints.as_slice())).await?;
                    PassState::Promote
                }
                PassState::Promote => {
                    let cleared_users: Vec<i64> = if *selector == CollectionSelector::All {
                        identities
                            .values()
                            .filter(|auth| auth.is_sync_on_startup_required)
                            .map(|auth| auth.user_id)
                            .collect()
                    } else {
                        Vec::new()
                    };

                    if !pending.is_empty() || !cleared_users.is_empty() {
                        self.promote(ctx, &pending, &cleared_users).await?;
                    }
                    PassState::Done
                }
                PassState::Done => {
                    info!(
                        run_id = %ctx.run_id(),
                        collections = pending.collections().len(),
                        steps = pending.step_count(),
                        "sync pass completed"
                    );
                    return Ok(PassOutcome::Completed);
                }
            };
        }
    }

    async fn discard_staging(&self, ctx: &SyncRunContext) {
        if let Err(e) = self
            .temp_tables
            .cleanup(CleanupScope::Run(ctx.run_id()))
            .await
        {
            warn!(run_id = %ctx.run_id(), error = %e, "failed to discard staging tables");
        }
    }
}

#[async_trait]
impl PassRunner for DataInserter {
    async fn run_pass(
        &self,
        ctx: &SyncRunContext,
        selector: &CollectionSelector,
    ) -> Result<PassOutcome> {
        info!(run_id = %ctx.run_id(), %selector, "sync pass started");

        let status_manager = ctx.status_manager();

        match self.execute(ctx, selector).await {
            Ok(PassOutcome::Completed) => {
                status_manager.update(SyncStatus::Synced);
                Ok(PassOutcome::Completed)
            }
            Ok(outcome) => {
                self.discard_staging(ctx).await;
                status_manager.update(SyncStatus::Unauthorized);
                Ok(outcome)
            }
            Err(e) if e.is_interrupted() => {
                // Staging tables are left for the startup cleanup
                info!(run_id = %ctx.run_id(), "sync pass interrupted");
                status_manager.update(SyncStatus::Interrupted);
                Ok(PassOutcome::Interrupted)
            }
            Err(SyncPassError::RemoteApi(e)) if e.is_unauthorized() => {
                warn!(run_id = %ctx.run_id(), error = %e, "credentials rejected, ending pass");
                self.discard_staging(ctx).await;
                status_manager.update(SyncStatus::Unauthorized);
                Ok(PassOutcome::Unauthorized)
            }
            Err(e) => {
                error!(run_id = %ctx.run_id(), error = %e, "sync pass failed");
                self.discard_staging(ctx).await;
                status_manager.update(SyncStatus::Failed(e.to_string()));
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests;
