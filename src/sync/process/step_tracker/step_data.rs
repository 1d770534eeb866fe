use std::fmt;

use serde_json::Value;

use crate::{
    db::models::{Filter, Record, record_i64, record_str},
    shared::Timeframe,
    sync::schema::{CollectionSchema, SUB_USER_ID_FIELD, USER_ID_FIELD},
};

use super::super::error::{Result, SyncPassError};

/// Which slice of a collection a step covers: one owner for private collections, one
/// `(symbol, timeframe)` for configurable public ones, everything otherwise.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StepSelector {
    pub user_id: Option<i64>,
    pub sub_user_id: Option<i64>,
    pub symbol: Option<String>,
    pub timeframe: Option<Timeframe>,
}

impl StepSelector {
    pub fn private(user_id: i64, sub_user_id: Option<i64>) -> Self {
        Self {
            user_id: Some(user_id),
            sub_user_id,
            ..Default::default()
        }
    }

    pub fn public(symbol: Option<String>, timeframe: Option<Timeframe>) -> Self {
        Self {
            symbol,
            timeframe,
            ..Default::default()
        }
    }

    /// Rows of `schema` this selector owns.
    pub fn row_filter(&self, schema: &CollectionSchema) -> Filter {
        let mut filter = Filter::new();

        if !schema.is_public() {
            filter = filter
                .eq_or_null(USER_ID_FIELD, self.user_id)
                .eq_or_null(SUB_USER_ID_FIELD, self.sub_user_id);
        }

        if let (Some(field), Some(symbol)) = (schema.symbol_field(), &self.symbol) {
            filter = filter.eq(field, symbol.as_str());
        }

        if let (Some(field), Some(timeframe)) = (schema.timeframe_field(), self.timeframe) {
            filter = filter.eq(field, timeframe.as_str());
        }

        filter
    }

    /// Values stamped on every row fetched for this selector.
    pub fn stamp(&self, schema: &CollectionSchema) -> Record {
        let mut stamp = Record::new();

        if !schema.is_public() {
            stamp.insert(USER_ID_FIELD.to_string(), self.user_id.into());
            stamp.insert(SUB_USER_ID_FIELD.to_string(), self.sub_user_id.into());
        }

        if let (Some(field), Some(symbol)) = (schema.symbol_field(), &self.symbol) {
            stamp.insert(field.to_string(), symbol.as_str().into());
        }

        if let (Some(field), Some(timeframe)) = (schema.timeframe_field(), self.timeframe) {
            stamp.insert(field.to_string(), timeframe.as_str().into());
        }

        stamp
    }
}

impl fmt::Display for StepSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn part<T: fmt::Display>(value: &Option<T>) -> String {
            value
                .as_ref()
                .map_or_else(|| "-".to_string(), |v| v.to_string())
        }

        write!(
            f,
            "{}:{}:{}:{}",
            part(&self.user_id),
            part(&self.sub_user_id),
            part(&self.symbol),
            part(&self.timeframe)
        )
    }
}

/// Synchronization state of one collection slice.
///
/// The base half is the historical backfill `[base_start, base_end]`; the current half is the
/// rolling window `[curr_start, curr_end]` up to the pass clock. While a half is pending its range
/// is the range left to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncUserStepData {
    pub collection: String,
    pub selector: StepSelector,
    pub base_start: i64,
    pub base_end: i64,
    pub is_base_step_ready: bool,
    pub curr_start: i64,
    pub curr_end: i64,
    pub is_curr_step_ready: bool,
    /// When the base half was last completed (or the snapshot last fetched).
    pub synced_at: Option<i64>,
}

impl SyncUserStepData {
    pub fn step_key(&self) -> String {
        format!("{}:{}", self.collection, self.selector)
    }

    pub fn is_fully_synced(&self) -> bool {
        self.is_base_step_ready && self.is_curr_step_ready
    }

    pub fn has_pending(&self) -> bool {
        !self.is_fully_synced()
    }

    /// Applies the result of fetching this step's pending halves in a pass started at
    /// `synced_at`. A partially fetched half keeps only its still-missing range pending.
    pub fn completed(
        &self,
        base: HalfOutcome,
        curr: HalfOutcome,
        synced_at: i64,
    ) -> SyncUserStepData {
        let mut next = self.clone();

        match base {
            HalfOutcome::Skipped => {}
            HalfOutcome::Completed => {
                next.is_base_step_ready = true;
                next.synced_at = Some(synced_at);
            }
            HalfOutcome::Partial { reached } => {
                next.base_end = reached.clamp(next.base_start, next.base_end);
            }
        }

        match curr {
            HalfOutcome::Skipped => {}
            HalfOutcome::Completed => {
                next.is_curr_step_ready = true;
            }
            HalfOutcome::Partial { reached } => {
                next.curr_end = reached.clamp(next.curr_start, next.curr_end);
                next.is_curr_step_ready = false;
            }
        }

        if next.synced_at.is_none() && next.is_base_step_ready {
            next.synced_at = Some(synced_at);
        }

        next
    }

    pub fn to_record(&self) -> Record {
        let mut record = Record::new();
        let mut set = |field: &str, value: Value| {
            record.insert(field.to_string(), value);
        };

        set("stepKey", self.step_key().into());
        set("collName", self.collection.as_str().into());
        set(USER_ID_FIELD, self.selector.user_id.into());
        set(SUB_USER_ID_FIELD, self.selector.sub_user_id.into());
        set("symbol", self.selector.symbol.clone().into());
        set(
            "timeframe",
            self.selector.timeframe.map(|tf| tf.as_str()).into(),
        );
        set("baseStart", self.base_start.into());
        set("baseEnd", self.base_end.into());
        set("isBaseStepReady", self.is_base_step_ready.into());
        set("currStart", self.curr_start.into());
        set("currEnd", self.curr_end.into());
        set("isCurrStepReady", self.is_curr_step_ready.into());
        set("syncedAt", self.synced_at.into());

        record
    }

    pub fn from_record(record: &Record) -> Result<Self> {
        let step_key = record_str(record, "stepKey").unwrap_or_default().to_string();

        let invalid = |reason: &str| SyncPassError::InvalidBookkeeping {
            step_key: step_key.clone(),
            reason: reason.to_string(),
        };

        let int = |field: &str| {
            record_i64(record, field).ok_or_else(|| invalid(&format!("missing `{field}`")))
        };
        let flag = |field: &str| {
            record
                .get(field)
                .and_then(Value::as_bool)
                .ok_or_else(|| invalid(&format!("missing `{field}`")))
        };

        let collection = record_str(record, "collName")
            .ok_or_else(|| invalid("missing `collName`"))?
            .to_string();

        let timeframe = record_str(record, "timeframe")
            .map(|tf| tf.parse::<Timeframe>())
            .transpose()
            .map_err(|e| invalid(&e.to_string()))?;

        Ok(Self {
            collection,
            selector: StepSelector {
                user_id: record_i64(record, USER_ID_FIELD),
                sub_user_id: record_i64(record, SUB_USER_ID_FIELD),
                symbol: record_str(record, "symbol").map(str::to_string),
                timeframe,
            },
            base_start: int("baseStart")?,
            base_end: int("baseEnd")?,
            is_base_step_ready: flag("isBaseStepReady")?,
            curr_start: int("currStart")?,
            curr_end: int("currEnd")?,
            is_curr_step_ready: flag("isCurrStepReady")?,
            synced_at: record_i64(record, "syncedAt"),
        })
    }
}

/// How the fetch of one step half ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalfOutcome {
    /// The half was not pending.
    Skipped,
    Completed,
    /// Stopped early; data older than `reached` is still missing.
    Partial { reached: i64 },
}
