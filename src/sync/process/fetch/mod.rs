use std::sync::{Arc, Mutex};

use tokio::time::{self, Instant};
use tracing::{debug, warn};

use crate::{
    api::{
        RemoteApi,
        models::{ApiCredentials, FetchRequest},
    },
    db::{
        Storage,
        models::{Record, record_i64},
    },
    sync::{
        config::{FetchConfig, SyncConfig},
        context::SyncRunContext,
        schema::{CollectionRole, CollectionSchema},
    },
    util::MtsExt,
};

use super::{
    error::Result,
    step_tracker::step_data::{HalfOutcome, SyncUserStepData},
    temp_tables::temp_name,
};

/// Paginated fetch of pending step ranges into the run's staging tables.
pub(crate) struct StepFetcher {
    api: Arc<dyn RemoteApi>,
    storage: Arc<dyn Storage>,
    config: FetchConfig,
    last_candles_request: Mutex<Option<Instant>>,
}

impl StepFetcher {
    pub fn new(config: &SyncConfig, api: Arc<dyn RemoteApi>, storage: Arc<dyn Storage>) -> Self {
        Self {
            api,
            storage,
            config: config.into(),
            last_candles_request: Mutex::new(None),
        }
    }

    pub fn candles_request_interval(&self) -> time::Duration {
        self.config.candles_request_interval()
    }

    /// Waits until the candles rate ceiling allows another request.
    async fn pace(&self, ctx: &SyncRunContext, schema: &CollectionSchema) -> Result<()> {
        if schema.role() != CollectionRole::Candles {
            return Ok(());
        }

        let wait = self
            .last_candles_request
            .lock()
            .expect("`StepFetcher` mutex can't be poisoned")
            .map(|at| {
                self.config
                    .candles_request_interval()
                    .saturating_sub(at.elapsed())
            });

        if let Some(wait) = wait
            && !wait.is_zero()
        {
            ctx.sleep(wait).await?;
        }

        *self
            .last_candles_request
            .lock()
            .expect("`StepFetcher` mutex can't be poisoned") = Some(Instant::now());

        Ok(())
    }

    async fn stage(
        &self,
        ctx: &SyncRunContext,
        schema: &CollectionSchema,
        step: &SyncUserStepData,
        items: &[Record],
    ) -> Result<u64> {
        if items.is_empty() {
            return Ok(0);
        }

        let stamp = step.selector.stamp(schema);
        let rows: Vec<Record> = items
            .iter()
            .map(|item| schema.normalize(item, &stamp))
            .collect();

        let written = self
            .storage
            .insert_replacing(
                &temp_name(schema.name(), ctx.run_id()),
                &rows,
                schema.unique_key(),
            )
            .await?;

        Ok(written)
    }

    fn request(
        schema: &CollectionSchema,
        step: &SyncUserStepData,
        credentials: Option<&ApiCredentials>,
        start: i64,
        end: i64,
    ) -> FetchRequest {
        FetchRequest {
            credentials: credentials.cloned(),
            start,
            end,
            limit: schema.max_limit(),
            symbol: step.selector.symbol.clone(),
            timeframe: step.selector.timeframe,
        }
    }

    /// Fetches `[start, end]` newest first, moving the cursor backward.
    async fn fetch_range(
        &self,
        ctx: &SyncRunContext,
        schema: &CollectionSchema,
        step: &SyncUserStepData,
        credentials: Option<&ApiCredentials>,
        start: i64,
        end: i64,
    ) -> Result<HalfOutcome> {
        let date_field = schema.date_field().unwrap_or_default();
        let step_key = step.step_key();

        let mut end = end;
        let mut empty_retries = 0;
        let mut stalls = 0;
        let mut staged = 0;

        loop {
            ctx.check_interrupt()?;

            if end < start {
                return Ok(HalfOutcome::Completed);
            }

            self.pace(ctx, schema).await?;

            let request = Self::request(schema, step, credentials, start, end);
            let page = match ctx
                .interruptible(self.api.fetch(schema.api_method(), &request))
                .await?
            {
                Ok(page) => page,
                Err(e) if e.is_unauthorized() => return Err(e.into()),
                Err(e) => {
                    warn!(
                        step_key,
                        end = %end.format_mts(),
                        error = %e,
                        "fetch stopped early, range left pending"
                    );
                    return Ok(HalfOutcome::Partial { reached: end });
                }
            };

            if page.items.is_empty() && page.next_cursor.is_none() {
                if empty_retries < self.config.empty_page_retries() {
                    empty_retries += 1;
                    continue;
                }
                return Ok(HalfOutcome::Completed);
            }

            staged += self.stage(ctx, schema, step, &page.items).await?;

            let oldest = page
                .items
                .iter()
                .filter_map(|item| record_i64(item, date_field))
                .min();

            if oldest.is_some_and(|oldest| oldest <= start) {
                return Ok(HalfOutcome::Completed);
            }

            if let Some(budget) = self.config.max_rows_per_step()
                && staged >= budget.get()
            {
                debug!(step_key, staged, "row budget reached");
                return Ok(HalfOutcome::Partial {
                    reached: oldest.unwrap_or(end),
                });
            }

            let Some(next_end) = page.next_cursor else {
                return Ok(HalfOutcome::Completed);
            };

            if next_end >= end {
                stalls += 1;
                if stalls >= self.config.max_cursor_stalls().get() {
                    warn!(step_key, end = %end.format_mts(), stalls, "cursor is not advancing, stopping");
                    return Ok(HalfOutcome::Partial {
                        reached: oldest.unwrap_or(end),
                    });
                }
                continue;
            }

            stalls = 0;
            end = next_end;
        }
    }

    /// Fetches the whole current state of a snapshot collection.
    async fn fetch_snapshot(
        &self,
        ctx: &SyncRunContext,
        schema: &CollectionSchema,
        step: &SyncUserStepData,
        credentials: Option<&ApiCredentials>,
    ) -> Result<HalfOutcome> {
        ctx.check_interrupt()?;

        let request = Self::request(schema, step, credentials, step.base_start, step.base_end);
        let page = match ctx
            .interruptible(self.api.fetch(schema.api_method(), &request))
            .await?
        {
            Ok(page) => page,
            Err(e) if e.is_unauthorized() => return Err(e.into()),
            Err(e) => {
                warn!(step_key = step.step_key(), error = %e, "snapshot fetch failed");
                return Ok(HalfOutcome::Partial {
                    reached: step.base_end,
                });
            }
        };

        self.stage(ctx, schema, step, &page.items).await?;

        Ok(HalfOutcome::Completed)
    }

    /// Fetches the pending halves of `step`, base first, and returns its updated state.
    pub async fn fetch_step(
        &self,
        ctx: &SyncRunContext,
        schema: &CollectionSchema,
        step: &SyncUserStepData,
        credentials: Option<&ApiCredentials>,
    ) -> Result<SyncUserStepData> {
        if !schema.is_append_only() {
            let base = if step.is_base_step_ready {
                HalfOutcome::Skipped
            } else {
                self.fetch_snapshot(ctx, schema, step, credentials).await?
            };

            return Ok(step.completed(base, HalfOutcome::Skipped, ctx.started_at()));
        }

        let base = if step.is_base_step_ready {
            HalfOutcome::Skipped
        } else {
            self.fetch_range(ctx, schema, step, credentials, step.base_start, step.base_end)
                .await?
        };

        let curr = if step.is_curr_step_ready {
            HalfOutcome::Skipped
        } else {
            self.fetch_range(ctx, schema, step, credentials, step.curr_start, step.curr_end)
                .await?
        };

        debug!(
            run_id = %ctx.run_id(),
            step_key = step.step_key(),
            ?base,
            ?curr,
            "fetched step"
        );

        Ok(step.completed(base, curr, ctx.started_at()))
    }
}

#[cfg(test)]
mod tests;
