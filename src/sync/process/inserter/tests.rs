use std::sync::Mutex;

use serde_json::json;

use crate::{
    api::{error::RemoteApiError, models::ApiCredentials},
    auth::StaticAuthProvider,
    db::{
        MemoryStorage,
        models::{ElemQuery, record_i64},
    },
    sync::{
        error::SyncConfigError,
        process::{
            hooks::{HookReport, error::HookError},
            temp_tables::TEMP_TABLE_PREFIX,
        },
        schema::{CollectionKind, SYNC_USER_STEPS_TABLE},
        state::SyncReader,
    },
    test_util::{MockRemoteApi, rec, run_context},
};

use super::*;

fn registry() -> Arc<CollectionRegistry> {
    Arc::new(
        CollectionRegistry::new(vec![
            CollectionSchema::new("ledgers", "getLedgers", CollectionKind::PRIVATE_APPEND_ONLY)
                .with_role(CollectionRole::Ledgers)
                .with_fields(&["id", "mts", "currency", "amount"])
                .with_date_field("mts")
                .with_unique_key(&["id", "user_id"])
                .with_max_limit(2),
            CollectionSchema::new("currencies", "getCurrencies", CollectionKind::PUBLIC_SNAPSHOT)
                .with_fields(&["id", "name"])
                .with_unique_key(&["id"]),
        ])
        .unwrap(),
    )
}

fn ledger_rows() -> Vec<Value> {
    vec![
        json!({"id": 1, "mts": 100, "currency": "BTC", "amount": 1.0}),
        json!({"id": 2, "mts": 300, "currency": "BTC", "amount": 2.0}),
        json!({"id": 3, "mts": 700, "currency": "BTC", "amount": 3.0}),
    ]
}

fn api() -> Arc<MockRemoteApi> {
    Arc::new(
        MockRemoteApi::new()
            .with_rows("getLedgers", Some("mts"), ledger_rows())
            .with_rows(
                "getCurrencies",
                None,
                vec![json!({"id": "BTC", "name": "Bitcoin"})],
            ),
    )
}

fn auth(record: AuthRecord) -> Arc<dyn AuthProvider> {
    Arc::new(StaticAuthProvider::new().with_identity("user1", record))
}

fn inserter(
    config: &SyncConfig,
    storage: &MemoryStorage,
    api: Arc<MockRemoteApi>,
    auth: Arc<dyn AuthProvider>,
    hooks: Vec<Arc<dyn SyncHook>>,
) -> DataInserter {
    DataInserter::new(
        config,
        Arc::new(storage.clone()),
        api,
        auth,
        registry(),
        hooks,
    )
}

/// Counts main ledger rows while the pass reconciles, before promotion.
struct MainRowsProbe {
    storage: MemoryStorage,
    seen: Mutex<Vec<usize>>,
}

#[async_trait]
impl SyncHook for MainRowsProbe {
    fn name(&self) -> &'static str {
        "mainRowsProbe"
    }

    fn validate(&self, _registry: &CollectionRegistry) -> std::result::Result<(), SyncConfigError> {
        Ok(())
    }

    async fn execute(
        &self,
        _ctx: &HookContext<'_>,
        _hints: Option<&[String]>,
    ) -> std::result::Result<HookReport, HookError> {
        self.seen
            .lock()
            .unwrap()
            .push(self.storage.rows("ledgers").len());
        Ok(HookReport::default())
    }
}

struct FailingHook;

#[async_trait]
impl SyncHook for FailingHook {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn validate(&self, _registry: &CollectionRegistry) -> std::result::Result<(), SyncConfigError> {
        Ok(())
    }

    async fn execute(
        &self,
        _ctx: &HookContext<'_>,
        _hints: Option<&[String]>,
    ) -> std::result::Result<HookReport, HookError> {
        Err(HookError::Generic {
            hook: "failing",
            reason: "boom".to_string(),
        })
    }
}

#[tokio::test]
async fn staged_rows_become_visible_on_promotion() -> Result<()> {
    let storage = MemoryStorage::new();
    let probe = Arc::new(MainRowsProbe {
        storage: storage.clone(),
        seen: Mutex::new(Vec::new()),
    });
    let inserter = inserter(
        &SyncConfig::default(),
        &storage,
        api(),
        auth(AuthRecord::new(1, ApiCredentials::new("key", "secret"))),
        vec![probe.clone() as Arc<dyn SyncHook>],
    );
    let (ctx, _) = run_context("run1", 900);

    let outcome = inserter.run_pass(&ctx, &CollectionSelector::All).await?;

    assert_eq!(outcome, PassOutcome::Completed);
    assert_eq!(*probe.seen.lock().unwrap(), vec![0]);

    let ledgers = storage.rows("ledgers");
    assert_eq!(ledgers.len(), 3);
    assert!(ledgers.iter().all(|row| row["user_id"] == json!(1)));
    assert_eq!(storage.rows("currencies").len(), 1);

    assert!(storage.list_tables(TEMP_TABLE_PREFIX).await?.is_empty());
    assert_eq!(ctx.status_manager().status_snapshot(), SyncStatus::Synced);

    let steps = storage
        .get_elems(SYNC_USER_STEPS_TABLE, &ElemQuery::new(Filter::new()))
        .await?;
    assert_eq!(steps.len(), 2);
    assert!(
        steps
            .iter()
            .all(|row| record_i64(row, "syncedAt") == Some(900))
    );

    Ok(())
}

#[tokio::test]
async fn repeated_passes_do_not_duplicate_rows() -> Result<()> {
    let storage = MemoryStorage::new();
    let api = api();
    let inserter = inserter(
        &SyncConfig::default().with_current_step_staleness(0),
        &storage,
        api.clone(),
        auth(AuthRecord::new(1, ApiCredentials::new("key", "secret"))),
        Vec::new(),
    );

    let (first, _) = run_context("run1", 900);
    inserter.run_pass(&first, &CollectionSelector::All).await?;

    api.push_rows(
        "getLedgers",
        Some("mts"),
        vec![json!({"id": 4, "mts": 950, "currency": "BTC", "amount": 4.0})],
    );

    let (second, _) = run_context("run2", 1_000);
    let outcome = inserter.run_pass(&second, &CollectionSelector::All).await?;
    assert_eq!(outcome, PassOutcome::Completed);

    let ids: Vec<i64> = storage
        .rows("ledgers")
        .iter()
        .filter_map(|row| record_i64(row, "id"))
        .collect();
    assert_eq!(ids.len(), 4);
    assert!(ids.contains(&4));

    // The snapshot is still fresh and is not fetched again
    assert_eq!(api.calls("getCurrencies").len(), 1);
    assert_eq!(storage.rows("currencies").len(), 1);

    Ok(())
}

#[tokio::test]
async fn rejected_credentials_end_the_pass_unauthorized() -> Result<()> {
    let storage = MemoryStorage::new();
    let api = api();
    api.fail_next(
        "getLedgers",
        RemoteApiError::Unauthorized {
            method: "getLedgers".to_string(),
        },
    );
    let inserter = inserter(
        &SyncConfig::default(),
        &storage,
        api,
        auth(AuthRecord::new(1, ApiCredentials::new("key", "secret"))),
        Vec::new(),
    );
    let (ctx, _) = run_context("run1", 900);

    let outcome = inserter.run_pass(&ctx, &CollectionSelector::All).await?;

    assert_eq!(outcome, PassOutcome::Unauthorized);
    assert_eq!(ctx.status_manager().status_snapshot(), SyncStatus::Unauthorized);
    assert!(storage.rows("ledgers").is_empty());
    assert!(storage.list_tables(TEMP_TABLE_PREFIX).await?.is_empty());
    assert!(
        storage
            .get_elems(SYNC_USER_STEPS_TABLE, &ElemQuery::new(Filter::new()))
            .await?
            .is_empty()
    );

    Ok(())
}

#[tokio::test]
async fn no_identity_means_unauthorized() -> Result<()> {
    let storage = MemoryStorage::new();
    let api = api();
    let inserter = inserter(
        &SyncConfig::default(),
        &storage,
        api.clone(),
        Arc::new(StaticAuthProvider::new()),
        Vec::new(),
    );
    let (ctx, _) = run_context("run1", 900);

    let outcome = inserter.run_pass(&ctx, &CollectionSelector::Public).await?;

    assert_eq!(outcome, PassOutcome::Unauthorized);
    assert!(api.calls("getCurrencies").is_empty());

    Ok(())
}

#[tokio::test]
async fn interrupted_pass_keeps_main_tables_untouched() -> Result<()> {
    let storage = MemoryStorage::new();
    let inserter = inserter(
        &SyncConfig::default(),
        &storage,
        api(),
        auth(AuthRecord::new(1, ApiCredentials::new("key", "secret"))),
        Vec::new(),
    );
    let (ctx, cancel) = run_context("run1", 900);
    cancel.cancel();

    let outcome = inserter.run_pass(&ctx, &CollectionSelector::All).await?;

    assert_eq!(outcome, PassOutcome::Interrupted);
    assert_eq!(ctx.status_manager().status_snapshot(), SyncStatus::Interrupted);
    assert!(storage.rows("ledgers").is_empty());

    Ok(())
}

#[tokio::test]
async fn hook_failures_discard_staged_rows() -> Result<()> {
    let storage = MemoryStorage::new();
    let inserter = inserter(
        &SyncConfig::default(),
        &storage,
        api(),
        auth(AuthRecord::new(1, ApiCredentials::new("key", "secret"))),
        vec![Arc::new(FailingHook) as Arc<dyn SyncHook>],
    );
    let (ctx, _) = run_context("run1", 900);

    let res = inserter.run_pass(&ctx, &CollectionSelector::All).await;

    assert!(matches!(res, Err(SyncPassError::Hook(HookError::Generic { .. }))));
    assert!(matches!(
        ctx.status_manager().status_snapshot(),
        SyncStatus::Failed(_)
    ));
    assert!(storage.rows("ledgers").is_empty());
    assert!(storage.list_tables(TEMP_TABLE_PREFIX).await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn full_pass_clears_the_startup_flag() -> Result<()> {
    let storage = MemoryStorage::new();
    storage
        .insert_replacing(
            USERS_TABLE,
            &[rec(json!({"email": "a@b.c", "isSyncOnStartupRequired": true}))],
            &[],
        )
        .await?;
    let user_id = record_i64(&storage.rows(USERS_TABLE)[0], ID_FIELD).unwrap();

    let record = AuthRecord::new(user_id, ApiCredentials::new("key", "secret"))
        .with_sync_on_startup_required(true);
    let inserter = inserter(&SyncConfig::default(), &storage, api(), auth(record), Vec::new());

    let (ctx, _) = run_context("run1", 900);
    inserter
        .run_pass(&ctx, &CollectionSelector::Collection("ledgers".to_string()))
        .await?;
    assert_eq!(
        storage.rows(USERS_TABLE)[0]["isSyncOnStartupRequired"],
        json!(true)
    );

    let (ctx, _) = run_context("run2", 1_000);
    inserter.run_pass(&ctx, &CollectionSelector::All).await?;
    assert_eq!(
        storage.rows(USERS_TABLE)[0]["isSyncOnStartupRequired"],
        json!(false)
    );

    Ok(())
}
