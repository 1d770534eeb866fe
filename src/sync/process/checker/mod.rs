use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    auth::AuthRecord,
    db::{
        Storage,
        models::{ElemQuery, Filter, Record, SortKey, record_i64, record_str},
    },
    shared::{Timeframe, pair_symbol},
    sync::{
        config::{CheckerConfig, SyncConfig},
        context::SyncRunContext,
        schema::{
            CollectionRegistry, CollectionRole, CollectionSchema, PUBLIC_COLLS_CONF_TABLE,
            USER_ID_FIELD,
        },
    },
};

use super::{
    error::Result,
    step_tracker::{
        StepTracker,
        step_data::{StepSelector, SyncUserStepData},
    },
    temp_tables::temp_name,
};

/// Steps of one collection that still have data to fetch.
#[derive(Debug, Clone)]
pub struct PendingCollection {
    pub schema: Arc<CollectionSchema>,
    pub steps: Vec<SyncUserStepData>,
}

/// Work left for a pass, grouped by collection in registry order of discovery.
#[derive(Debug, Clone, Default)]
pub struct PendingSchema {
    collections: Vec<PendingCollection>,
}

impl PendingSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, schema: &Arc<CollectionSchema>, step: SyncUserStepData) {
        match self
            .collections
            .iter_mut()
            .find(|pending| pending.schema.name() == schema.name())
        {
            Some(pending) => pending.steps.push(step),
            None => self.collections.push(PendingCollection {
                schema: schema.clone(),
                steps: vec![step],
            }),
        }
    }

    pub fn merge(&mut self, other: PendingSchema) {
        for collection in other.collections {
            for step in collection.steps {
                self.push(&collection.schema, step);
            }
        }
    }

    pub fn collections(&self) -> &[PendingCollection] {
        &self.collections
    }

    pub fn collections_mut(&mut self) -> &mut [PendingCollection] {
        &mut self.collections
    }

    pub fn names(&self) -> Vec<String> {
        self.collections
            .iter()
            .map(|pending| pending.schema.name().to_string())
            .collect()
    }

    pub fn step_count(&self) -> usize {
        self.collections.iter().map(|c| c.steps.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }
}

/// Decides, per collection and selector, which ranges a pass must fetch.
pub(crate) struct SyncChecker {
    storage: Arc<dyn Storage>,
    registry: Arc<CollectionRegistry>,
    tracker: StepTracker,
    config: CheckerConfig,
}

impl SyncChecker {
    pub fn new(
        config: &SyncConfig,
        storage: Arc<dyn Storage>,
        registry: Arc<CollectionRegistry>,
    ) -> Self {
        Self {
            tracker: StepTracker::new(config, storage.clone()),
            storage,
            registry,
            config: config.into(),
        }
    }

    async fn check_step(
        &self,
        ctx: &SyncRunContext,
        schema: &Arc<CollectionSchema>,
        selector: StepSelector,
        start: i64,
        pending: &mut PendingSchema,
    ) -> Result<()> {
        ctx.check_interrupt()?;

        let temp = temp_name(schema.name(), ctx.run_id());
        let (step, _) = self
            .tracker
            .get_last_synced_info(schema, &selector, start, ctx.started_at(), &temp)
            .await?;

        if step.has_pending() {
            pending.push(schema, step);
        }

        Ok(())
    }

    /// Private collections of `auth` with pending steps, one step per linked sub-user.
    pub async fn check_new_data(
        &self,
        ctx: &SyncRunContext,
        auth: &AuthRecord,
        collections: &[Arc<CollectionSchema>],
    ) -> Result<PendingSchema> {
        let start = auth
            .sync_start_mts
            .unwrap_or(self.config.private_sync_start_mts());

        let mut pending = PendingSchema::new();

        for schema in collections.iter().filter(|schema| schema.is_private()) {
            for (sub_user_id, _) in auth.fanout() {
                let selector = StepSelector::private(auth.user_id, sub_user_id);
                self.check_step(ctx, schema, selector, start, &mut pending)
                    .await?;
            }
        }

        debug!(
            run_id = %ctx.run_id(),
            user_id = auth.user_id,
            steps = pending.step_count(),
            "checked private collections"
        );

        Ok(pending)
    }

    /// Public collections with pending steps. Configurable collections get one step per configured
    /// `(symbol, timeframe)`; candles additionally cover every ledger currency of `identities`.
    pub async fn check_new_public_data(
        &self,
        ctx: &SyncRunContext,
        identities: &BTreeMap<String, AuthRecord>,
        collections: &[Arc<CollectionSchema>],
    ) -> Result<PendingSchema> {
        let user_ids: Vec<i64> = identities.values().map(|auth| auth.user_id).collect();

        let mut pending = PendingSchema::new();

        for schema in collections.iter().filter(|schema| schema.is_public()) {
            let targets = if !schema.is_append_only() || !schema.role().is_configurable() {
                BTreeMap::from([(StepSelector::default(), 0)])
            } else {
                let mut targets = self.configured_targets(schema, &user_ids).await?;

                if schema.role() == CollectionRole::Candles {
                    for (selector, start) in self.ledger_candle_targets(ctx, &user_ids).await? {
                        targets
                            .entry(selector)
                            .and_modify(|current: &mut i64| *current = (*current).min(start))
                            .or_insert(start);
                    }
                }

                targets
            };

            for (selector, start) in targets {
                self.check_step(ctx, schema, selector, start, &mut pending)
                    .await?;
            }
        }

        debug!(
            run_id = %ctx.run_id(),
            steps = pending.step_count(),
            "checked public collections"
        );

        Ok(pending)
    }

    /// `publicCollsConf` entries of `schema`, grouped by `(symbol, timeframe)` at the earliest
    /// configured start.
    async fn configured_targets(
        &self,
        schema: &CollectionSchema,
        user_ids: &[i64],
    ) -> Result<BTreeMap<StepSelector, i64>> {
        let mut targets = BTreeMap::new();

        if user_ids.is_empty() {
            return Ok(targets);
        }

        let rows = self
            .storage
            .get_elems(
                PUBLIC_COLLS_CONF_TABLE,
                &ElemQuery::new(
                    Filter::new()
                        .eq("confName", schema.name())
                        .is_in(USER_ID_FIELD, user_ids.iter().map(|&id| id.into()).collect()),
                ),
            )
            .await?;

        for row in &rows {
            let Some(symbol) = record_str(row, "symbol") else {
                warn!(collection = schema.name(), "skipping public config without symbol");
                continue;
            };

            let timeframe = if schema.timeframe_field().is_some() {
                let configured = record_str(row, "timeframe").map(str::parse::<Timeframe>);
                match configured {
                    Some(Ok(timeframe)) => Some(timeframe),
                    Some(Err(e)) => {
                        warn!(collection = schema.name(), error = %e, "skipping public config");
                        continue;
                    }
                    None => Some(self.config.candles_timeframe()),
                }
            } else {
                None
            };

            let start = record_i64(row, "start").unwrap_or(0);
            let selector = StepSelector::public(Some(symbol.to_string()), timeframe);

            targets
                .entry(selector)
                .and_modify(|current: &mut i64| *current = (*current).min(start))
                .or_insert(start);
        }

        Ok(targets)
    }

    /// Candle steps pricing every ledger currency of `user_ids` in the conversion target, each
    /// starting at the earliest ledger entry of that currency, staged or stored.
    async fn ledger_candle_targets(
        &self,
        ctx: &SyncRunContext,
        user_ids: &[i64],
    ) -> Result<BTreeMap<StepSelector, i64>> {
        let mut earliest: BTreeMap<String, i64> = BTreeMap::new();

        let Some(ledgers) = self.registry.by_role(CollectionRole::Ledgers) else {
            return Ok(BTreeMap::new());
        };
        let Some(date_field) = ledgers.date_field() else {
            return Ok(BTreeMap::new());
        };

        if user_ids.is_empty() {
            return Ok(BTreeMap::new());
        }

        let temp = temp_name(ledgers.name(), ctx.run_id());
        let mut tables = vec![ledgers.name().to_string()];
        if self.storage.table_exists(&temp).await? {
            tables.push(temp);
        }

        for table in &tables {
            let mut seen: BTreeSet<String> = BTreeSet::new();

            loop {
                ctx.check_interrupt()?;

                let mut filter = Filter::new()
                    .is_in(USER_ID_FIELD, user_ids.iter().map(|&id| id.into()).collect())
                    .is_not_null("currency")
                    .is_not_null(date_field);
                for currency in &seen {
                    filter = filter.ne("currency", currency.as_str());
                }

                let rows = self
                    .storage
                    .get_elems(
                        table,
                        &ElemQuery::new(filter)
                            .sorted_by(SortKey::asc(date_field))
                            .limit(1),
                    )
                    .await?;

                let Some((currency, mts)) = rows
                    .first()
                    .and_then(|row| currency_and_mts(row, date_field))
                else {
                    break;
                };

                earliest
                    .entry(currency.clone())
                    .and_modify(|current| *current = (*current).min(mts))
                    .or_insert(mts);
                seen.insert(currency);
            }
        }

        let target = self.config.convert_target();
        let timeframe = self.config.candles_timeframe();

        Ok(earliest
            .into_iter()
            .filter(|(currency, _)| currency != target)
            .map(|(currency, start)| {
                let selector =
                    StepSelector::public(Some(pair_symbol(&currency, target)), Some(timeframe));
                (selector, start)
            })
            .collect())
    }
}

fn currency_and_mts(row: &Record, date_field: &str) -> Option<(String, i64)> {
    let currency = match row.get("currency")? {
        Value::String(currency) => currency.clone(),
        _ => return None,
    };
    Some((currency, record_i64(row, date_field)?))
}

#[cfg(test)]
mod tests;
