use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt, stream};
use serde_json::Value;
use tracing::debug;

use crate::{
    db::models::{
        ElemQuery, Filter, ID_FIELD, Record, SortKey, record_f64, record_i64, record_str,
    },
    shared::pair_symbol,
    sync::{
        config::{HookConfig, SyncConfig},
        error::SyncConfigError,
        schema::{CollectionRegistry, CollectionRole, CollectionSchema},
    },
};

use super::{
    HookContext, HookReport, SyncHook,
    error::{HookError, Result},
    is_hinted, require_role,
};

const HOOK_NAME: &str = "convertCurrencies";

/// Collection whose amounts are converted, and the `(source, converted)` field pairs.
struct ConversionTarget {
    role: CollectionRole,
    collection: &'static str,
    fields: &'static [(&'static str, &'static str)],
}

const TARGETS: [ConversionTarget; 2] = [
    ConversionTarget {
        role: CollectionRole::Ledgers,
        collection: "ledgers",
        fields: &[
            ("amount", "amountUsd"),
            ("balance", "balanceUsd"),
            ("_nativeBalance", "_nativeBalanceUsd"),
        ],
    },
    ConversionTarget {
        role: CollectionRole::Movements,
        collection: "movements",
        fields: &[("amount", "amountUsd"), ("fees", "feesUsd")],
    },
];

/// Fills the converted amount fields of ledgers and movements with the close of the newest
/// candle at or before each row.
///
/// Rows still missing a converted field are picked up in `_id` order. Rows that cannot be priced
/// yet are left untouched for a later pass.
pub struct ConvertCurrenciesHook {
    config: HookConfig,
}

impl ConvertCurrenciesHook {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            config: config.into(),
        }
    }

    async fn existing_tables(ctx: &HookContext<'_>, collection: &str) -> Result<Vec<String>> {
        let mut tables = Vec::new();
        for table in ctx.tables(collection) {
            if ctx.storage().table_exists(&table).await? {
                tables.push(table);
            }
        }
        Ok(tables)
    }

    /// Close of the newest `currency` candle at or before `at`, staged candles first.
    async fn price_at(
        &self,
        ctx: &HookContext<'_>,
        candles: &CollectionSchema,
        candle_tables: &[String],
        currency: &str,
        at: i64,
    ) -> Result<Option<f64>> {
        let (Some(date_field), Some(symbol_field), Some(timeframe_field)) = (
            candles.date_field(),
            candles.symbol_field(),
            candles.timeframe_field(),
        ) else {
            return Ok(None);
        };

        let filter = Filter::new()
            .eq(symbol_field, pair_symbol(currency, self.config.convert_target()))
            .eq(timeframe_field, self.config.candles_timeframe().as_str())
            .lte(date_field, at)
            .is_not_null("close");

        for table in candle_tables {
            let rows = ctx
                .storage()
                .get_elems(
                    table,
                    &ElemQuery::new(filter.clone())
                        .sorted_by(SortKey::desc(date_field))
                        .limit(1),
                )
                .await?;

            if let Some(close) = rows.first().and_then(|row| record_f64(row, "close")) {
                return Ok(Some(close));
            }
        }

        Ok(None)
    }

    /// Prices every `(currency, mts)` of `rows` missing from `cache`.
    async fn fill_prices(
        &self,
        ctx: &HookContext<'_>,
        candles: &CollectionSchema,
        candle_tables: &[String],
        date_field: &str,
        rows: &[Record],
        cache: &mut BTreeMap<(String, i64), Option<f64>>,
    ) -> Result<()> {
        let missing: BTreeSet<(String, i64)> = rows
            .iter()
            .filter_map(|row| Self::price_key(row, date_field))
            .filter(|key| !cache.contains_key(key))
            .collect();

        let target = self.config.convert_target();

        let prices: Vec<((String, i64), Option<f64>)> = stream::iter(missing)
            .map(|(currency, mts)| async move {
                let price = if currency == target {
                    Some(1.0)
                } else {
                    self.price_at(ctx, candles, candle_tables, &currency, mts)
                        .await?
                };
                Ok::<_, HookError>(((currency, mts), price))
            })
            .buffer_unordered(self.config.lookup_concurrency().get())
            .try_collect()
            .await?;

        cache.extend(prices);

        Ok(())
    }

    fn price_key(row: &Record, date_field: &str) -> Option<(String, i64)> {
        let currency = record_str(row, "currency")?;
        let mts = record_i64(row, date_field)?;
        Some((currency.to_string(), mts))
    }

    /// Converts rows of `table` missing `converted` while holding `source`, writing the `patched`
    /// pairs.
    #[allow(clippy::too_many_arguments)]
    async fn convert_sweep(
        &self,
        ctx: &HookContext<'_>,
        table: &str,
        date_field: &str,
        (source, converted): (&str, &str),
        patched: &[(&str, &str)],
        candles: &CollectionSchema,
        candle_tables: &[String],
        cache: &mut BTreeMap<(String, i64), Option<f64>>,
    ) -> Result<HookReport> {
        let batch_size = self.config.conversion_batch_size().get();
        let mut report = HookReport::default();
        let mut watermark = 0;

        for _ in 0..self.config.max_iterations().get() {
            ctx.run().check_interrupt()?;

            let rows = ctx
                .storage()
                .get_elems(
                    table,
                    &ElemQuery::new(
                        Filter::new()
                            .is_null(converted)
                            .is_not_null("currency")
                            .is_not_null(source)
                            .gt(ID_FIELD, watermark),
                    )
                    .sorted_by(SortKey::asc(ID_FIELD))
                    .limit(batch_size),
                )
                .await?;

            let Some(last_id) = rows.last().and_then(|row| record_i64(row, ID_FIELD)) else {
                break;
            };
            watermark = last_id;

            self.fill_prices(ctx, candles, candle_tables, date_field, &rows, cache)
                .await?;

            for row in &rows {
                let price = Self::price_key(row, date_field)
                    .and_then(|key| cache.get(&key).copied().flatten());
                let (Some(price), Some(id)) = (price, record_i64(row, ID_FIELD)) else {
                    continue;
                };

                let mut patch = Record::new();
                for (source, converted) in patched {
                    let value = record_f64(row, source).map_or(Value::Null, |v| (v * price).into());
                    patch.insert(converted.to_string(), value);
                }

                report.rows_updated += ctx
                    .storage()
                    .update_where(table, &Filter::new().eq(ID_FIELD, id), &patch)
                    .await?;
            }

            report.batches += 1;

            debug!(table, converted, watermark, "converted batch");

            if (rows.len() as u64) < batch_size {
                break;
            }
        }

        Ok(report)
    }

    async fn convert_table(
        &self,
        ctx: &HookContext<'_>,
        schema: &CollectionSchema,
        table: &str,
        target: &ConversionTarget,
        candles: &CollectionSchema,
        candle_tables: &[String],
    ) -> Result<HookReport> {
        let Some(date_field) = schema.date_field() else {
            return Ok(HookReport::default());
        };

        let mut report = HookReport::default();
        let mut cache = BTreeMap::new();

        // Fresh rows get every pair at once. Later sweeps reprice a single field, e.g. the
        // balance of a recalculated sub-account ledger.
        for (index, pair) in target.fields.iter().enumerate() {
            let patched = if index == 0 {
                target.fields
            } else {
                &target.fields[index..=index]
            };

            report.add(
                self.convert_sweep(
                    ctx,
                    table,
                    date_field,
                    *pair,
                    patched,
                    candles,
                    candle_tables,
                    &mut cache,
                )
                .await?,
            );
        }

        Ok(report)
    }
}

#[async_trait]
impl SyncHook for ConvertCurrenciesHook {
    fn name(&self) -> &'static str {
        HOOK_NAME
    }

    fn validate(&self, registry: &CollectionRegistry) -> std::result::Result<(), SyncConfigError> {
        require_role(registry, HOOK_NAME, CollectionRole::Candles, "candles")?;
        for target in &TARGETS {
            require_role(registry, HOOK_NAME, target.role, target.collection)?;
        }
        Ok(())
    }

    async fn execute(&self, ctx: &HookContext<'_>, hints: Option<&[String]>) -> Result<HookReport> {
        let registry = ctx.registry();

        let Some(candles) = registry.by_role(CollectionRole::Candles) else {
            return Ok(HookReport::default());
        };

        let mut watched = vec![candles.name()];
        watched.extend(
            TARGETS
                .iter()
                .filter_map(|target| registry.by_role(target.role))
                .map(|schema| schema.name()),
        );

        if !is_hinted(hints, &watched) {
            return Ok(HookReport::default());
        }

        let candle_tables = Self::existing_tables(ctx, candles.name()).await?;

        let mut report = HookReport::default();

        for target in &TARGETS {
            let Some(schema) = registry.by_role(target.role) else {
                continue;
            };

            for table in Self::existing_tables(ctx, schema.name()).await? {
                report.add(
                    self.convert_table(ctx, schema, &table, target, candles, &candle_tables)
                        .await?,
                );
            }
        }

        Ok(report)
    }
}
