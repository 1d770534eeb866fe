use std::num::{NonZeroU32, NonZeroU64, NonZeroUsize};

use tokio::time;

use crate::shared::Timeframe;

/// Configuration for the synchronization engine.
#[derive(Clone, Debug)]
pub struct SyncConfig {
    rest_api_cooldown: time::Duration,
    rest_api_error_cooldown: time::Duration,
    rest_api_error_max_trials: NonZeroU64,
    candles_requests_per_minute: NonZeroU32,
    current_step_staleness: time::Duration,
    base_step_recheck_interval: time::Duration,
    snapshot_staleness: time::Duration,
    empty_page_retries: u32,
    max_cursor_stalls: NonZeroU32,
    max_rows_per_step: Option<NonZeroU64>,
    private_sync_start_mts: i64,
    convert_target: String,
    candles_timeframe: Timeframe,
    conversion_batch_size: NonZeroU64,
    recalc_batch_size: NonZeroU64,
    hook_max_iterations: NonZeroU32,
    lookup_concurrency: NonZeroUsize,
    queue_max_iterations: NonZeroU32,
    shutdown_timeout: time::Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            rest_api_cooldown: time::Duration::ZERO,
            rest_api_error_cooldown: time::Duration::from_secs(10),
            rest_api_error_max_trials: 3.try_into().expect("not zero"),
            candles_requests_per_minute: 10.try_into().expect("not zero"),
            current_step_staleness: time::Duration::from_secs(60 * 60),
            base_step_recheck_interval: time::Duration::from_secs(365 * 24 * 60 * 60),
            snapshot_staleness: time::Duration::from_secs(24 * 60 * 60),
            empty_page_retries: 1,
            max_cursor_stalls: 2.try_into().expect("not zero"),
            max_rows_per_step: None,
            private_sync_start_mts: 0,
            convert_target: "USD".to_string(),
            candles_timeframe: Timeframe::OneDay,
            conversion_batch_size: 10_000.try_into().expect("not zero"),
            recalc_batch_size: 20_000.try_into().expect("not zero"),
            hook_max_iterations: 100.try_into().expect("not zero"),
            lookup_concurrency: 16.try_into().expect("not zero"),
            queue_max_iterations: 100.try_into().expect("not zero"),
            shutdown_timeout: time::Duration::from_secs(6),
        }
    }
}

impl SyncConfig {
    /// Returns the pause after each successful REST API request.
    pub fn rest_api_cooldown(&self) -> time::Duration {
        self.rest_api_cooldown
    }

    /// Returns the cooldown period after REST API errors before retrying.
    pub fn rest_api_error_cooldown(&self) -> time::Duration {
        self.rest_api_error_cooldown
    }

    /// Returns the maximum number of attempts for a REST API request failing with transient
    /// errors.
    pub fn rest_api_error_max_trials(&self) -> NonZeroU64 {
        self.rest_api_error_max_trials
    }

    /// Returns the request ceiling for the candles endpoint, in requests per minute.
    pub fn candles_requests_per_minute(&self) -> NonZeroU32 {
        self.candles_requests_per_minute
    }

    /// Returns how old the last synchronized point may be before the current step is pending.
    pub fn current_step_staleness(&self) -> time::Duration {
        self.current_step_staleness
    }

    /// Returns the interval after which a completed base step is checked again in full.
    pub fn base_step_recheck_interval(&self) -> time::Duration {
        self.base_step_recheck_interval
    }

    /// Returns how old a snapshot collection may be before it is fetched again.
    pub fn snapshot_staleness(&self) -> time::Duration {
        self.snapshot_staleness
    }

    /// Returns how many times an empty page with no cursor is requested again before the range is
    /// considered exhausted.
    pub fn empty_page_retries(&self) -> u32 {
        self.empty_page_retries
    }

    /// Returns how many consecutive non-advancing cursors stop a fetch loop.
    pub fn max_cursor_stalls(&self) -> NonZeroU32 {
        self.max_cursor_stalls
    }

    /// Returns the maximum number of rows fetched for one half of a step in a single pass.
    pub fn max_rows_per_step(&self) -> Option<NonZeroU64> {
        self.max_rows_per_step
    }

    /// Returns the default lower bound of private collections, in milliseconds since the epoch.
    pub fn private_sync_start_mts(&self) -> i64 {
        self.private_sync_start_mts
    }

    /// Returns the currency amounts are converted to.
    pub fn convert_target(&self) -> &str {
        &self.convert_target
    }

    /// Returns the candles timeframe used for synchronization and price lookups.
    pub fn candles_timeframe(&self) -> Timeframe {
        self.candles_timeframe
    }

    pub fn conversion_batch_size(&self) -> NonZeroU64 {
        self.conversion_batch_size
    }

    pub fn recalc_batch_size(&self) -> NonZeroU64 {
        self.recalc_batch_size
    }

    /// Returns the maximum number of batches a hook processes per table in one invocation.
    pub fn hook_max_iterations(&self) -> NonZeroU32 {
        self.hook_max_iterations
    }

    /// Returns the maximum number of concurrent storage lookups within a hook batch.
    pub fn lookup_concurrency(&self) -> NonZeroUsize {
        self.lookup_concurrency
    }

    /// Returns the maximum number of jobs a single queue run processes.
    pub fn queue_max_iterations(&self) -> NonZeroU32 {
        self.queue_max_iterations
    }

    /// Returns the timeout duration for graceful shutdown operations.
    pub fn shutdown_timeout(&self) -> time::Duration {
        self.shutdown_timeout
    }

    /// Sets the pause after each successful REST API request.
    ///
    /// Default: `0` milliseconds
    pub fn with_rest_api_cooldown(mut self, millis: u64) -> Self {
        self.rest_api_cooldown = time::Duration::from_millis(millis);
        self
    }

    /// Sets the cooldown period after REST API errors before retrying.
    ///
    /// Default: `10` seconds
    pub fn with_rest_api_error_cooldown(mut self, secs: u64) -> Self {
        self.rest_api_error_cooldown = time::Duration::from_secs(secs);
        self
    }

    /// Sets the maximum number of attempts for REST API requests.
    ///
    /// Default: `3`
    pub fn with_rest_api_error_max_trials(mut self, max_trials: NonZeroU64) -> Self {
        self.rest_api_error_max_trials = max_trials;
        self
    }

    /// Sets the request ceiling for the candles endpoint.
    ///
    /// Default: `10` requests per minute
    pub fn with_candles_requests_per_minute(mut self, rpm: NonZeroU32) -> Self {
        self.candles_requests_per_minute = rpm;
        self
    }

    /// Sets the staleness threshold of current steps.
    ///
    /// Default: `60` minutes
    pub fn with_current_step_staleness(mut self, mins: u64) -> Self {
        self.current_step_staleness = time::Duration::from_secs(mins * 60);
        self
    }

    /// Sets the full re-check interval of base steps.
    ///
    /// Default: `365` days
    pub fn with_base_step_recheck_interval(mut self, days: u64) -> Self {
        self.base_step_recheck_interval = time::Duration::from_secs(days * 24 * 60 * 60);
        self
    }

    /// Sets the staleness threshold of snapshot collections.
    ///
    /// Default: `24` hours
    pub fn with_snapshot_staleness(mut self, hours: u64) -> Self {
        self.snapshot_staleness = time::Duration::from_secs(hours * 60 * 60);
        self
    }

    /// Sets how many times an empty page with no cursor is requested again.
    ///
    /// Default: `1`
    pub fn with_empty_page_retries(mut self, retries: u32) -> Self {
        self.empty_page_retries = retries;
        self
    }

    /// Sets how many consecutive non-advancing cursors stop a fetch loop.
    ///
    /// Default: `2`
    pub fn with_max_cursor_stalls(mut self, stalls: NonZeroU32) -> Self {
        self.max_cursor_stalls = stalls;
        self
    }

    /// Sets the row budget of each step half. `None` fetches each range in full.
    ///
    /// Default: `None`
    pub fn with_max_rows_per_step(mut self, rows: Option<NonZeroU64>) -> Self {
        self.max_rows_per_step = rows;
        self
    }

    /// Sets the default lower bound of private collections. Identities may override it.
    ///
    /// Default: `0` (the epoch)
    pub fn with_private_sync_start_mts(mut self, mts: i64) -> Self {
        self.private_sync_start_mts = mts;
        self
    }

    /// Sets the conversion target currency.
    ///
    /// Default: `USD`
    pub fn with_convert_target(mut self, currency: impl Into<String>) -> Self {
        self.convert_target = currency.into();
        self
    }

    /// Sets the candles timeframe.
    ///
    /// Default: [`Timeframe::OneDay`]
    pub fn with_candles_timeframe(mut self, timeframe: Timeframe) -> Self {
        self.candles_timeframe = timeframe;
        self
    }

    /// Default: `10000`
    pub fn with_conversion_batch_size(mut self, size: NonZeroU64) -> Self {
        self.conversion_batch_size = size;
        self
    }

    /// Default: `20000`
    pub fn with_recalc_batch_size(mut self, size: NonZeroU64) -> Self {
        self.recalc_batch_size = size;
        self
    }

    /// Sets the maximum number of batches a hook processes per table in one invocation.
    ///
    /// Default: `100`
    pub fn with_hook_max_iterations(mut self, iterations: NonZeroU32) -> Self {
        self.hook_max_iterations = iterations;
        self
    }

    /// Sets the maximum number of concurrent storage lookups within a hook batch.
    ///
    /// Default: `16`
    pub fn with_lookup_concurrency(mut self, concurrency: NonZeroUsize) -> Self {
        self.lookup_concurrency = concurrency;
        self
    }

    /// Sets the maximum number of jobs a single queue run processes.
    ///
    /// Default: `100`
    pub fn with_queue_max_iterations(mut self, iterations: NonZeroU32) -> Self {
        self.queue_max_iterations = iterations;
        self
    }

    /// Sets the timeout duration for graceful shutdown operations.
    ///
    /// Default: `6` seconds
    pub fn with_shutdown_timeout(mut self, secs: u64) -> Self {
        self.shutdown_timeout = time::Duration::from_secs(secs);
        self
    }
}

fn as_millis(duration: time::Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

#[derive(Debug)]
pub(crate) struct SyncControllerConfig {
    shutdown_timeout: time::Duration,
}

impl SyncControllerConfig {
    pub fn shutdown_timeout(&self) -> time::Duration {
        self.shutdown_timeout
    }
}

impl From<&SyncConfig> for SyncControllerConfig {
    fn from(value: &SyncConfig) -> Self {
        Self {
            shutdown_timeout: value.shutdown_timeout,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct StepTrackerConfig {
    current_staleness_ms: i64,
    base_recheck_ms: i64,
    snapshot_staleness_ms: i64,
}

impl StepTrackerConfig {
    pub fn current_staleness_ms(&self) -> i64 {
        self.current_staleness_ms
    }

    pub fn base_recheck_ms(&self) -> i64 {
        self.base_recheck_ms
    }

    pub fn snapshot_staleness_ms(&self) -> i64 {
        self.snapshot_staleness_ms
    }
}

impl From<&SyncConfig> for StepTrackerConfig {
    fn from(value: &SyncConfig) -> Self {
        Self {
            current_staleness_ms: as_millis(value.current_step_staleness),
            base_recheck_ms: as_millis(value.base_step_recheck_interval),
            snapshot_staleness_ms: as_millis(value.snapshot_staleness),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct CheckerConfig {
    private_sync_start_mts: i64,
    convert_target: String,
    candles_timeframe: Timeframe,
}

impl CheckerConfig {
    pub fn private_sync_start_mts(&self) -> i64 {
        self.private_sync_start_mts
    }

    pub fn convert_target(&self) -> &str {
        &self.convert_target
    }

    pub fn candles_timeframe(&self) -> Timeframe {
        self.candles_timeframe
    }
}

impl From<&SyncConfig> for CheckerConfig {
    fn from(value: &SyncConfig) -> Self {
        Self {
            private_sync_start_mts: value.private_sync_start_mts,
            convert_target: value.convert_target.clone(),
            candles_timeframe: value.candles_timeframe,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct FetchConfig {
    candles_request_interval: time::Duration,
    empty_page_retries: u32,
    max_cursor_stalls: NonZeroU32,
    max_rows_per_step: Option<NonZeroU64>,
}

impl FetchConfig {
    /// Minimum spacing between candles requests.
    pub fn candles_request_interval(&self) -> time::Duration {
        self.candles_request_interval
    }

    pub fn empty_page_retries(&self) -> u32 {
        self.empty_page_retries
    }

    pub fn max_cursor_stalls(&self) -> NonZeroU32 {
        self.max_cursor_stalls
    }

    pub fn max_rows_per_step(&self) -> Option<NonZeroU64> {
        self.max_rows_per_step
    }
}

impl From<&SyncConfig> for FetchConfig {
    fn from(value: &SyncConfig) -> Self {
        Self {
            candles_request_interval: time::Duration::from_secs(60)
                / value.candles_requests_per_minute.get(),
            empty_page_retries: value.empty_page_retries,
            max_cursor_stalls: value.max_cursor_stalls,
            max_rows_per_step: value.max_rows_per_step,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct HookConfig {
    convert_target: String,
    candles_timeframe: Timeframe,
    conversion_batch_size: NonZeroU64,
    recalc_batch_size: NonZeroU64,
    max_iterations: NonZeroU32,
    lookup_concurrency: NonZeroUsize,
}

impl HookConfig {
    pub fn convert_target(&self) -> &str {
        &self.convert_target
    }

    pub fn candles_timeframe(&self) -> Timeframe {
        self.candles_timeframe
    }

    pub fn conversion_batch_size(&self) -> NonZeroU64 {
        self.conversion_batch_size
    }

    pub fn recalc_batch_size(&self) -> NonZeroU64 {
        self.recalc_batch_size
    }

    pub fn max_iterations(&self) -> NonZeroU32 {
        self.max_iterations
    }

    pub fn lookup_concurrency(&self) -> NonZeroUsize {
        self.lookup_concurrency
    }
}

impl From<&SyncConfig> for HookConfig {
    fn from(value: &SyncConfig) -> Self {
        Self {
            convert_target: value.convert_target.clone(),
            candles_timeframe: value.candles_timeframe,
            conversion_batch_size: value.conversion_batch_size,
            recalc_batch_size: value.recalc_batch_size,
            max_iterations: value.hook_max_iterations,
            lookup_concurrency: value.lookup_concurrency,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct QueueConfig {
    max_iterations: NonZeroU32,
}

impl QueueConfig {
    pub fn max_iterations(&self) -> NonZeroU32 {
        self.max_iterations
    }
}

impl From<&SyncConfig> for QueueConfig {
    fn from(value: &SyncConfig) -> Self {
        Self {
            max_iterations: value.queue_max_iterations,
        }
    }
}
