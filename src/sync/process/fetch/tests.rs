use async_trait::async_trait;
use serde_json::json;

use crate::{
    api::{
        error::{RemoteApiError, Result as ApiResult},
        models::{FetchPage, FetchRequest},
    },
    db::MemoryStorage,
    db::models::{ID_FIELD, record_i64},
    sync::{
        process::{
            error::SyncPassError,
            step_tracker::{StepObservation, evaluate_step, step_data::StepSelector},
        },
        schema::CollectionKind,
    },
    test_util::{MockRemoteApi, rec, run_context},
};

use super::*;

fn small_ledgers() -> CollectionSchema {
    CollectionSchema::new("ledgers", "getLedgers", CollectionKind::PRIVATE_APPEND_ONLY)
        .with_fields(&["id", "mts", "currency", "amount"])
        .with_date_field("mts")
        .with_unique_key(&["id", "user_id"])
        .with_max_limit(2)
}

fn pending_step(base: (i64, i64), curr: (i64, i64)) -> SyncUserStepData {
    SyncUserStepData {
        collection: "ledgers".to_string(),
        selector: StepSelector::private(1, None),
        base_start: base.0,
        base_end: base.1,
        is_base_step_ready: false,
        curr_start: curr.0,
        curr_end: curr.1,
        is_curr_step_ready: false,
        synced_at: None,
    }
}

fn fetcher(config: &SyncConfig, api: Arc<dyn RemoteApi>, storage: &MemoryStorage) -> StepFetcher {
    StepFetcher::new(config, api, Arc::new(storage.clone()))
}

#[tokio::test]
async fn pages_backward_through_both_halves() -> Result<()> {
    let storage = MemoryStorage::new();
    let api = Arc::new(MockRemoteApi::new().with_rows(
        "getLedgers",
        Some("mts"),
        vec![
            json!({"id": 1, "mts": 100, "currency": "BTC", "amount": 1.0}),
            json!({"id": 2, "mts": 200, "currency": "BTC", "amount": 1.0}),
            json!({"id": 3, "mts": 300, "currency": "BTC", "amount": 1.0}),
            json!({"id": 4, "mts": 600, "currency": "BTC", "amount": 1.0}),
            json!({"id": 5, "mts": 700, "currency": "BTC", "amount": 1.0}),
        ],
    ));
    let fetcher = fetcher(&SyncConfig::default(), api.clone(), &storage);
    let (ctx, _) = run_context("run1", 900);
    let schema = small_ledgers();

    let step = pending_step((0, 500), (500, 900));
    let done = fetcher.fetch_step(&ctx, &schema, &step, None).await?;

    assert!(done.is_fully_synced());
    assert_eq!(done.synced_at, Some(900));

    let staged = storage.rows("tmp_sync_run1_ledgers");
    assert_eq!(staged.len(), 5);
    assert!(staged.iter().all(|row| row["user_id"] == json!(1)));
    assert!(staged.iter().all(|row| row["subUserId"].is_null()));
    assert!(storage.rows("ledgers").is_empty());

    // Base: [0, 500] in two full pages (300, 200), then (100) with no cursor
    let calls = api.calls("getLedgers");
    assert_eq!(calls[0].end, 500);
    assert_eq!(calls[1].end, 199);

    Ok(())
}

#[tokio::test]
async fn empty_pages_are_retried_once() -> Result<()> {
    let storage = MemoryStorage::new();
    let api = Arc::new(MockRemoteApi::new());
    let fetcher = fetcher(&SyncConfig::default(), api.clone(), &storage);
    let (ctx, _) = run_context("run1", 900);

    let mut step = pending_step((0, 500), (500, 900));
    step.is_curr_step_ready = true;

    let done = fetcher.fetch_step(&ctx, &small_ledgers(), &step, None).await?;

    assert!(done.is_fully_synced());
    assert_eq!(api.calls("getLedgers").len(), 2);

    Ok(())
}

#[tokio::test]
async fn remote_failures_leave_the_half_pending() -> Result<()> {
    let storage = MemoryStorage::new();
    let api = Arc::new(MockRemoteApi::new().with_rows(
        "getLedgers",
        Some("mts"),
        vec![json!({"id": 1, "mts": 100, "currency": "BTC", "amount": 1.0})],
    ));
    api.fail_next(
        "getLedgers",
        RemoteApiError::MaxTrialsReached {
            error: Box::new(RemoteApiError::RateLimited {
                method: "getLedgers".to_string(),
            }),
            trials: 3.try_into().unwrap(),
        },
    );
    let fetcher = fetcher(&SyncConfig::default(), api.clone(), &storage);
    let (ctx, _) = run_context("run1", 900);

    let step = pending_step((0, 500), (500, 900));
    let done = fetcher.fetch_step(&ctx, &small_ledgers(), &step, None).await?;

    assert!(!done.is_base_step_ready);
    assert_eq!((done.base_start, done.base_end), (0, 500));
    assert!(done.is_curr_step_ready);
    assert_eq!(done.synced_at, None);

    Ok(())
}

#[tokio::test]
async fn unauthorized_aborts_the_step() -> Result<()> {
    let storage = MemoryStorage::new();
    let api = Arc::new(MockRemoteApi::new());
    api.fail_next(
        "getLedgers",
        RemoteApiError::Unauthorized {
            method: "getLedgers".to_string(),
        },
    );
    let fetcher = fetcher(&SyncConfig::default(), api, &storage);
    let (ctx, _) = run_context("run1", 900);

    let res = fetcher
        .fetch_step(&ctx, &small_ledgers(), &pending_step((0, 500), (500, 900)), None)
        .await;

    assert!(matches!(res, Err(SyncPassError::RemoteApi(e)) if e.is_unauthorized()));

    Ok(())
}

/// Always returns the same full page and a cursor that never moves.
struct StuckApi;

#[async_trait]
impl RemoteApi for StuckApi {
    async fn fetch(&self, _method: &str, request: &FetchRequest) -> ApiResult<FetchPage> {
        Ok(FetchPage::new(
            vec![
                rec(json!({"id": 9, "mts": 450})),
                rec(json!({"id": 8, "mts": 400})),
            ],
            Some(request.end),
        ))
    }
}

#[tokio::test]
async fn stalled_cursor_ends_the_loop() -> Result<()> {
    let storage = MemoryStorage::new();
    let config = SyncConfig::default().with_max_cursor_stalls(2.try_into().unwrap());
    let fetcher = fetcher(&config, Arc::new(StuckApi), &storage);
    let (ctx, _) = run_context("run1", 900);

    let mut step = pending_step((0, 500), (500, 900));
    step.is_curr_step_ready = true;

    let done = fetcher.fetch_step(&ctx, &small_ledgers(), &step, None).await?;

    assert!(!done.is_base_step_ready);
    assert_eq!((done.base_start, done.base_end), (0, 400));
    assert_eq!(storage.rows("tmp_sync_run1_ledgers").len(), 2);

    Ok(())
}

#[tokio::test]
async fn row_budget_stops_early() -> Result<()> {
    let storage = MemoryStorage::new();
    let api = Arc::new(MockRemoteApi::new().with_rows(
        "getLedgers",
        Some("mts"),
        (1..=6)
            .map(|i| json!({"id": i, "mts": i * 50, "currency": "BTC", "amount": 1.0}))
            .collect(),
    ));
    let config = SyncConfig::default().with_max_rows_per_step(Some(3.try_into().unwrap()));
    let fetcher = fetcher(&config, api, &storage);
    let (ctx, _) = run_context("run1", 900);

    let mut step = pending_step((0, 500), (500, 900));
    step.is_curr_step_ready = true;

    let done = fetcher.fetch_step(&ctx, &small_ledgers(), &step, None).await?;

    assert!(!done.is_base_step_ready);
    assert_eq!(done.base_end, 150);
    assert_eq!(storage.rows("tmp_sync_run1_ledgers").len(), 4);

    Ok(())
}

#[tokio::test]
async fn budgeted_current_half_converges_over_passes() -> Result<()> {
    let storage = MemoryStorage::new();
    let api = Arc::new(MockRemoteApi::new().with_rows(
        "getLedgers",
        Some("mts"),
        (1..=6)
            .map(|i| json!({"id": i, "mts": 500 + i * 50, "currency": "BTC", "amount": 1.0}))
            .collect(),
    ));
    let config = SyncConfig::default().with_max_rows_per_step(Some(3.try_into().unwrap()));
    let fetcher = fetcher(&config, api.clone(), &storage);
    let schema = small_ledgers();
    let unique_key = vec!["id".to_string(), "user_id".to_string()];

    let mut step = pending_step((0, 500), (500, 900));
    step.is_base_step_ready = true;
    step.synced_at = Some(900);

    let mut passes = 0;
    while step.has_pending() {
        passes += 1;
        assert!(passes <= 3, "current half still pending: {step:?}");

        let now = 900 + passes;
        let run_id = format!("run{passes}");
        let (ctx, _) = run_context(&run_id, now);

        let done = fetcher.fetch_step(&ctx, &schema, &step, None).await?;

        // Promote what the pass staged
        let staged: Vec<Record> = storage
            .rows(&format!("tmp_sync_{run_id}_ledgers"))
            .into_iter()
            .map(|mut row| {
                row.remove(ID_FIELD);
                row
            })
            .collect();
        storage.insert_replacing("ledgers", &staged, &unique_key).await?;

        let mts: Vec<i64> = storage
            .rows("ledgers")
            .iter()
            .filter_map(|row| record_i64(row, "mts"))
            .collect();
        let observation = StepObservation {
            stored: Some(done),
            oldest_main: mts.iter().min().copied(),
            newest_main: mts.iter().max().copied(),
            newest_temp: None,
        };

        step = evaluate_step(&(&config).into(), &schema, &step.selector, &observation, 0, now + 1);
    }

    assert!(passes > 1);
    assert_eq!(storage.rows("ledgers").len(), 6);

    // Later passes only page through the range left missing
    let calls = api.calls("getLedgers");
    assert_eq!(calls.iter().filter(|call| call.end == 900).count(), 1);

    Ok(())
}

#[tokio::test]
async fn interrupted_pass_stops_before_fetching() -> Result<()> {
    let storage = MemoryStorage::new();
    let api = Arc::new(MockRemoteApi::new());
    let fetcher = fetcher(&SyncConfig::default(), api.clone(), &storage);
    let (ctx, cancel) = run_context("run1", 900);

    cancel.cancel();

    let res = fetcher
        .fetch_step(&ctx, &small_ledgers(), &pending_step((0, 500), (500, 900)), None)
        .await;

    assert!(matches!(res, Err(e) if e.is_interrupted()));
    assert!(api.calls("getLedgers").is_empty());

    Ok(())
}
