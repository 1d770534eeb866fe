use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt, stream};
use serde_json::Value;
use tracing::debug;

use crate::{
    auth::AuthRecord,
    db::models::{
        ElemQuery, Filter, ID_FIELD, Record, SortKey, record_f64, record_i64, record_str,
    },
    sync::{
        config::{HookConfig, SyncConfig},
        error::SyncConfigError,
        schema::{
            CollectionRegistry, CollectionRole, CollectionSchema, SUB_USER_ID_FIELD, USER_ID_FIELD,
        },
    },
};

use super::{
    HookContext, HookReport, SyncHook,
    error::{HookError, Result},
    is_hinted, require_role,
};

const HOOK_NAME: &str = "recalcSubAccountLedgers";

const RECALCED_FIELD: &str = "_isBalanceRecalced";
const NATIVE_BALANCE_FIELD: &str = "_nativeBalance";

/// `(sub_user_id, currency, wallet, mts)`
type BalanceKey = (i64, String, Option<String>, i64);

/// Rewrites the balance of sub-account ledger rows as the sum, over every linked sub-user, of that
/// sub-user's own balance in the same currency and wallet at the row's time.
///
/// Each sub-user's own balance is kept in `_nativeBalance`. Recalculated rows lose their converted
/// balance, so currency conversion prices it again.
pub struct RecalcSubAccountLedgersHook {
    config: HookConfig,
}

impl RecalcSubAccountLedgersHook {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            config: config.into(),
        }
    }

    /// `_nativeBalance` of the newest row of `key.0` at or before `key.3`, across staged and
    /// stored ledgers.
    async fn native_balance_at(
        ctx: &HookContext<'_>,
        user_id: i64,
        date_field: &str,
        tables: &[String],
        key: &BalanceKey,
    ) -> Result<Option<f64>> {
        let (sub_user_id, currency, wallet, at) = key;

        let filter = Filter::new()
            .eq(USER_ID_FIELD, user_id)
            .eq(SUB_USER_ID_FIELD, *sub_user_id)
            .eq("currency", currency.as_str())
            .eq_or_null("wallet", wallet.as_deref())
            .lte(date_field, *at)
            .is_not_null(NATIVE_BALANCE_FIELD);

        let mut newest: Option<(i64, f64)> = None;

        for table in tables {
            let rows = ctx
                .storage()
                .get_elems(
                    table,
                    &ElemQuery::new(filter.clone())
                        .sorted_by(SortKey::desc(date_field))
                        .sorted_by(SortKey::desc(ID_FIELD))
                        .limit(1),
                )
                .await?;

            let found = rows.first().and_then(|row| {
                Some((
                    record_i64(row, date_field)?,
                    record_f64(row, NATIVE_BALANCE_FIELD)?,
                ))
            });

            // Staged rows come first and win ties
            if let Some((mts, balance)) = found
                && newest.is_none_or(|(newest_mts, _)| mts > newest_mts)
            {
                newest = Some((mts, balance));
            }
        }

        Ok(newest.map(|(_, balance)| balance))
    }

    async fn recalc_table(
        &self,
        ctx: &HookContext<'_>,
        auth: &AuthRecord,
        schema: &CollectionSchema,
        table: &str,
        tables: &[String],
    ) -> Result<HookReport> {
        let Some(date_field) = schema.date_field() else {
            return Ok(HookReport::default());
        };

        let sub_user_ids: Vec<i64> = auth.sub_users.iter().map(|sub| sub.sub_user_id).collect();
        let batch_size = self.config.recalc_batch_size().get();

        let mut report = HookReport::default();
        let mut cache: BTreeMap<BalanceKey, Option<f64>> = BTreeMap::new();

        for _ in 0..self.config.max_iterations().get() {
            ctx.run().check_interrupt()?;

            let rows = ctx
                .storage()
                .get_elems(
                    table,
                    &ElemQuery::new(
                        Filter::new()
                            .eq(USER_ID_FIELD, auth.user_id)
                            .is_not_null(SUB_USER_ID_FIELD)
                            .is_not_null(date_field)
                            .is_null(RECALCED_FIELD),
                    )
                    .sorted_by(SortKey::asc(date_field))
                    .sorted_by(SortKey::asc(ID_FIELD))
                    .limit(batch_size),
                )
                .await?;

            if rows.is_empty() {
                break;
            }

            for row in &rows {
                let id = record_i64(row, ID_FIELD).ok_or_else(|| HookError::InvalidRow {
                    hook: HOOK_NAME,
                    table: table.to_string(),
                    reason: format!("missing `{ID_FIELD}`"),
                })?;

                let patch = match (record_str(row, "currency"), record_i64(row, date_field)) {
                    (Some(currency), Some(mts)) => {
                        let wallet = record_str(row, "wallet").map(str::to_string);
                        let keys: Vec<BalanceKey> = sub_user_ids
                            .iter()
                            .map(|&sub| (sub, currency.to_string(), wallet.clone(), mts))
                            .collect();

                        self.fill_balances(ctx, auth.user_id, date_field, tables, &keys, &mut cache)
                            .await?;

                        let balance: f64 = keys
                            .iter()
                            .filter_map(|key| cache.get(key).copied().flatten())
                            .sum();

                        recalced_patch(Some(balance))
                    }
                    // Nothing to aggregate; only mark the row as done
                    _ => recalced_patch(None),
                };

                report.rows_updated += ctx
                    .storage()
                    .update_where(table, &Filter::new().eq(ID_FIELD, id), &patch)
                    .await?;
            }

            report.batches += 1;

            debug!(table, user_id = auth.user_id, rows = rows.len(), "recalculated batch");

            if (rows.len() as u64) < batch_size {
                break;
            }
        }

        Ok(report)
    }

    async fn fill_balances(
        &self,
        ctx: &HookContext<'_>,
        user_id: i64,
        date_field: &str,
        tables: &[String],
        keys: &[BalanceKey],
        cache: &mut BTreeMap<BalanceKey, Option<f64>>,
    ) -> Result<()> {
        let missing: Vec<BalanceKey> = keys
            .iter()
            .filter(|key| !cache.contains_key(*key))
            .cloned()
            .collect();

        let balances: Vec<(BalanceKey, Option<f64>)> = stream::iter(missing)
            .map(|key| async move {
                let balance =
                    Self::native_balance_at(ctx, user_id, date_field, tables, &key).await?;
                Ok::<_, HookError>((key, balance))
            })
            .buffer_unordered(self.config.lookup_concurrency().get())
            .try_collect()
            .await?;

        cache.extend(balances);

        Ok(())
    }
}

fn recalced_patch(balance: Option<f64>) -> Record {
    let mut patch = Record::new();
    if let Some(balance) = balance {
        patch.insert("balance".to_string(), balance.into());
        patch.insert("balanceUsd".to_string(), Value::Null);
    }
    patch.insert(RECALCED_FIELD.to_string(), true.into());
    patch
}

#[async_trait]
impl SyncHook for RecalcSubAccountLedgersHook {
    fn name(&self) -> &'static str {
        HOOK_NAME
    }

    fn validate(&self, registry: &CollectionRegistry) -> std::result::Result<(), SyncConfigError> {
        require_role(registry, HOOK_NAME, CollectionRole::Ledgers, "ledgers")?;
        Ok(())
    }

    async fn execute(&self, ctx: &HookContext<'_>, hints: Option<&[String]>) -> Result<HookReport> {
        let Some(ledgers) = ctx.registry().by_role(CollectionRole::Ledgers) else {
            return Ok(HookReport::default());
        };

        if !is_hinted(hints, &[ledgers.name()]) {
            return Ok(HookReport::default());
        }

        if ctx.identities().is_empty() {
            return Err(HookError::NoIdentities { hook: HOOK_NAME });
        }

        let mut tables = Vec::new();
        for table in ctx.tables(ledgers.name()) {
            if ctx.storage().table_exists(&table).await? {
                tables.push(table);
            }
        }

        let mut report = HookReport::default();

        for auth in ctx.identities().values().filter(|auth| auth.is_sub_account()) {
            for table in &tables {
                report.add(self.recalc_table(ctx, auth, ledgers, table, &tables).await?);
            }
        }

        Ok(report)
    }
}
