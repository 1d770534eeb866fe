use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use tracing::info;

use crate::{
    auth::AuthRecord,
    db::Storage,
    sync::{
        config::SyncConfig,
        context::SyncRunContext,
        error::SyncConfigError,
        schema::{CollectionRegistry, CollectionRole, CollectionSchema},
    },
};

use super::temp_tables::temp_name;

mod convert_currencies;
pub(crate) mod error;
mod recalc_sub_account_ledgers;

use error::Result;

pub use convert_currencies::ConvertCurrenciesHook;
pub use recalc_sub_account_ledgers::RecalcSubAccountLedgersHook;

/// What a hook can see of the running pass.
pub struct HookContext<'a> {
    run: &'a SyncRunContext,
    storage: &'a Arc<dyn Storage>,
    registry: &'a CollectionRegistry,
    identities: &'a BTreeMap<String, AuthRecord>,
}

impl<'a> HookContext<'a> {
    pub(crate) fn new(
        run: &'a SyncRunContext,
        storage: &'a Arc<dyn Storage>,
        registry: &'a CollectionRegistry,
        identities: &'a BTreeMap<String, AuthRecord>,
    ) -> Self {
        Self {
            run,
            storage,
            registry,
            identities,
        }
    }

    pub fn run(&self) -> &SyncRunContext {
        self.run
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        self.storage
    }

    pub fn registry(&self) -> &CollectionRegistry {
        self.registry
    }

    pub fn identities(&self) -> &BTreeMap<String, AuthRecord> {
        self.identities
    }

    /// Tables holding rows of `collection`: the pass's staging table first, then the main table.
    pub fn tables(&self, collection: &str) -> [String; 2] {
        [
            temp_name(collection, self.run.run_id()),
            collection.to_string(),
        ]
    }
}

/// What one hook invocation changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HookReport {
    pub rows_updated: u64,
    pub batches: u32,
}

impl HookReport {
    fn add(&mut self, other: HookReport) {
        self.rows_updated += other.rows_updated;
        self.batches += other.batches;
    }
}

/// Post-fetch reconciliation over staged and stored rows.
///
/// Hooks run after every fetch of a pass and before promotion. They must be idempotent: a hook
/// that stops halfway leaves rows it will pick up again on its next invocation.
#[async_trait]
pub trait SyncHook: Send + Sync {
    fn name(&self) -> &'static str;

    /// Checks that `registry` holds every collection the hook works on.
    fn validate(&self, registry: &CollectionRegistry) -> std::result::Result<(), SyncConfigError>;

    /// `hints` names the collections fetched by the pass; `None` asks for a full run.
    async fn execute(&self, ctx: &HookContext<'_>, hints: Option<&[String]>) -> Result<HookReport>;
}

pub(crate) fn require_role<'r>(
    registry: &'r CollectionRegistry,
    hook: &'static str,
    role: CollectionRole,
    collection: &str,
) -> std::result::Result<&'r Arc<CollectionSchema>, SyncConfigError> {
    registry
        .by_role(role)
        .ok_or_else(|| SyncConfigError::HookMissingCollection {
            hook,
            collection: collection.to_string(),
        })
}

/// Whether a hook reading `collections` should run for a pass that fetched `hints`.
pub(crate) fn is_hinted(hints: Option<&[String]>, collections: &[&str]) -> bool {
    hints.is_none_or(|hints| {
        hints
            .iter()
            .any(|hint| collections.contains(&hint.as_str()))
    })
}

/// Balance recalculation runs first, so converted balances use recalculated values.
pub(crate) fn default_hooks(config: &SyncConfig) -> Vec<Arc<dyn SyncHook>> {
    vec![
        Arc::new(RecalcSubAccountLedgersHook::new(config)),
        Arc::new(ConvertCurrenciesHook::new(config)),
    ]
}

/// Runs `hooks` in order, stopping at the first failure.
pub(crate) async fn run_hooks(
    hooks: &[Arc<dyn SyncHook>],
    ctx: &HookContext<'_>,
    hints: Option<&[String]>,
) -> Result<HookReport> {
    let mut total = HookReport::default();

    for hook in hooks {
        ctx.run().check_interrupt()?;

        let report = hook.execute(ctx, hints).await?;

        info!(
            run_id = %ctx.run().run_id(),
            hook = hook.name(),
            rows_updated = report.rows_updated,
            batches = report.batches,
            "hook finished"
        );

        total.add(report);
    }

    Ok(total)
}
