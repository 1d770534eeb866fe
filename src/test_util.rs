use std::{
    collections::{BTreeMap, VecDeque},
    sync::Mutex,
};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::{
    api::{
        RemoteApi,
        error::{RemoteApiError, Result},
        models::{FetchPage, FetchRequest},
    },
    db::models::{Record, record_i64, record_str},
    sync::{
        context::{RunId, SyncRunContext},
        state::SyncStatusManager,
    },
};

/// Field a mock row may carry to restrict it to one API key.
pub(crate) const MOCK_API_KEY_FIELD: &str = "_apiKey";

pub(crate) fn rec(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

/// Context of a pass `run_id` started at `started_at`, with its cancellation token.
pub(crate) fn run_context(run_id: &str, started_at: i64) -> (SyncRunContext, CancellationToken) {
    let (update_tx, _) = broadcast::channel(64);
    let cancel = CancellationToken::new();
    let ctx = SyncRunContext::new(
        RunId::parse(run_id).expect("valid run id"),
        cancel.clone(),
        SyncStatusManager::new(update_tx, Vec::new()),
    )
    .with_started_at(started_at);

    (ctx, cancel)
}

#[derive(Default)]
struct MockMethod {
    date_field: Option<String>,
    rows: Vec<Record>,
}

/// Scripted [`RemoteApi`] paginating in-memory rows newest first, like the exchange does.
///
/// Rows carrying `_symbol` or `symbol` are only returned for requests of that symbol; rows
/// carrying [`MOCK_API_KEY_FIELD`] only for that API key.
#[derive(Default)]
pub(crate) struct MockRemoteApi {
    methods: Mutex<BTreeMap<String, MockMethod>>,
    failures: Mutex<BTreeMap<String, VecDeque<RemoteApiError>>>,
    calls: Mutex<Vec<(String, FetchRequest)>>,
}

impl MockRemoteApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(self, method: &str, date_field: Option<&str>, rows: Vec<Value>) -> Self {
        self.push_rows(method, date_field, rows);
        self
    }

    pub fn push_rows(&self, method: &str, date_field: Option<&str>, rows: Vec<Value>) {
        let mut methods = self.methods.lock().unwrap();
        let entry = methods.entry(method.to_string()).or_default();
        entry.date_field = date_field.map(str::to_string);
        entry.rows.extend(rows.into_iter().map(rec));
    }

    /// Makes the next request to `method` fail with `error`.
    pub fn fail_next(&self, method: &str, error: RemoteApiError) {
        self.failures
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back(error);
    }

    pub fn calls(&self, method: &str) -> Vec<FetchRequest> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, request)| request.clone())
            .collect()
    }

    fn matches(row: &Record, request: &FetchRequest) -> bool {
        let symbol = record_str(row, "_symbol").or_else(|| record_str(row, "symbol"));
        if let (Some(symbol), Some(requested)) = (symbol, &request.symbol)
            && symbol != requested
        {
            return false;
        }

        if let Some(key) = record_str(row, MOCK_API_KEY_FIELD) {
            return request
                .credentials
                .as_ref()
                .is_some_and(|creds| creds.api_key() == key);
        }

        true
    }
}

#[async_trait]
impl RemoteApi for MockRemoteApi {
    async fn fetch(&self, method: &str, request: &FetchRequest) -> Result<FetchPage> {
        self.calls
            .lock()
            .unwrap()
            .push((method.to_string(), request.clone()));

        if let Some(error) = self
            .failures
            .lock()
            .unwrap()
            .get_mut(method)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }

        let methods = self.methods.lock().unwrap();
        let Some(source) = methods.get(method) else {
            return Ok(FetchPage::empty());
        };

        let mut rows: Vec<Record> = source
            .rows
            .iter()
            .filter(|row| Self::matches(row, request))
            .cloned()
            .collect();

        let Some(date_field) = &source.date_field else {
            return Ok(FetchPage::new(rows, None));
        };

        rows.retain(|row| {
            record_i64(row, date_field).is_some_and(|mts| mts >= request.start && mts <= request.end)
        });
        rows.sort_by_key(|row| std::cmp::Reverse(record_i64(row, date_field)));
        rows.truncate(request.limit as usize);

        let next_cursor = if rows.len() as u64 == request.limit {
            rows.last()
                .and_then(|row| record_i64(row, date_field))
                .map(|oldest| oldest - 1)
        } else {
            None
        };

        Ok(FetchPage::new(rows, next_cursor))
    }
}
