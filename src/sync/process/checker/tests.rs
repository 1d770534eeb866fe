use serde_json::json;

use crate::{
    api::models::ApiCredentials,
    db::MemoryStorage,
    sync::schema::CollectionSelector,
    test_util::{rec, run_context},
};

use super::*;

fn registry() -> Arc<CollectionRegistry> {
    CollectionRegistry::standard()
}

fn collections(names: &[&str]) -> Vec<Arc<CollectionSchema>> {
    names
        .iter()
        .map(|name| registry().get(name).cloned().expect("registered"))
        .collect()
}

fn checker(storage: &MemoryStorage) -> SyncChecker {
    SyncChecker::new(
        &SyncConfig::default(),
        Arc::new(storage.clone()),
        registry(),
    )
}

fn creds(key: &str) -> ApiCredentials {
    ApiCredentials::new(key, "secret")
}

#[tokio::test]
async fn private_steps_fan_out_per_sub_user() -> Result<()> {
    let storage = MemoryStorage::new();
    let (ctx, _) = run_context("run1", 1_000);

    let plain = AuthRecord::new(1, creds("a")).with_sync_start_mts(100);
    let pending = checker(&storage)
        .check_new_data(&ctx, &plain, &collections(&["ledgers", "symbols"]))
        .await?;

    assert_eq!(pending.names(), vec!["ledgers".to_string()]);
    let step = &pending.collections()[0].steps[0];
    assert_eq!(step.selector, StepSelector::private(1, None));
    assert_eq!((step.base_start, step.base_end), (100, 1_000));

    let master = AuthRecord::new(2, creds("m"))
        .with_sub_user(21, creds("s1"))
        .with_sub_user(22, creds("s2"));
    let pending = checker(&storage)
        .check_new_data(&ctx, &master, &collections(&["ledgers", "movements"]))
        .await?;

    assert_eq!(pending.step_count(), 4);
    let selectors: Vec<_> = pending.collections()[0]
        .steps
        .iter()
        .map(|step| step.selector.clone())
        .collect();
    assert_eq!(
        selectors,
        vec![
            StepSelector::private(2, Some(21)),
            StepSelector::private(2, Some(22)),
        ]
    );

    Ok(())
}

#[tokio::test]
async fn candles_cover_ledger_currencies_and_configured_symbols() -> Result<()> {
    let storage = MemoryStorage::new();
    let (ctx, _) = run_context("run1", 10_000);

    storage
        .insert_replacing(
            "ledgers",
            &[
                rec(json!({"id": 1, "user_id": 1, "currency": "BTC", "mts": 500})),
                rec(json!({"id": 2, "user_id": 1, "currency": "BTC", "mts": 300})),
                rec(json!({"id": 3, "user_id": 1, "currency": "USD", "mts": 100})),
                rec(json!({"id": 4, "user_id": 9, "currency": "XRP", "mts": 50})),
            ],
            &[],
        )
        .await?;
    storage
        .insert_replacing(
            "tmp_sync_run1_ledgers",
            &[
                rec(json!({"id": 5, "user_id": 1, "currency": "ETH", "mts": 700})),
                rec(json!({"id": 6, "user_id": 1, "currency": "BTC", "mts": 200})),
            ],
            &[],
        )
        .await?;
    storage
        .insert_replacing(
            PUBLIC_COLLS_CONF_TABLE,
            &[
                rec(json!({"user_id": 1, "confName": "candles", "symbol": "tBTCUSD", "timeframe": "1D", "start": 150})),
                rec(json!({"user_id": 1, "confName": "candles", "symbol": "tLTCUSD", "timeframe": "1h", "start": 10})),
                rec(json!({"user_id": 1, "confName": "publicTrades", "symbol": "tBTCUSD", "start": 40})),
                rec(json!({"user_id": 1, "confName": "publicTrades", "symbol": "tBTCUSD", "start": 20})),
            ],
            &[],
        )
        .await?;

    let identities = BTreeMap::from([("u1".to_string(), AuthRecord::new(1, creds("a")))]);

    let pending = checker(&storage)
        .check_new_public_data(
            &ctx,
            &identities,
            &registry().select(&CollectionSelector::Public),
        )
        .await?;

    let candles = pending
        .collections()
        .iter()
        .find(|c| c.schema.name() == "candles")
        .expect("candles pending");
    let targets: Vec<_> = candles
        .steps
        .iter()
        .map(|step| {
            (
                step.selector.symbol.clone().unwrap_or_default(),
                step.selector.timeframe,
                step.base_start,
            )
        })
        .collect();

    assert_eq!(
        targets,
        vec![
            ("tBTCUSD".to_string(), Some(Timeframe::OneDay), 150),
            ("tETHUSD".to_string(), Some(Timeframe::OneDay), 700),
            ("tLTCUSD".to_string(), Some(Timeframe::OneHour), 10),
        ]
    );

    let trades = pending
        .collections()
        .iter()
        .find(|c| c.schema.name() == "publicTrades")
        .expect("public trades pending");
    assert_eq!(trades.steps.len(), 1);
    assert_eq!(trades.steps[0].base_start, 20);

    // Snapshots yield one step each; no user configured tickers
    assert!(pending.names().contains(&"symbols".to_string()));
    assert!(!pending.names().contains(&"tickersHistory".to_string()));

    Ok(())
}

#[tokio::test]
async fn fully_synced_steps_are_filtered_out() -> Result<()> {
    let storage = MemoryStorage::new();
    let (ctx, _) = run_context("run1", 1_000);

    let step = SyncUserStepData {
        collection: "symbols".to_string(),
        selector: StepSelector::default(),
        base_start: 0,
        base_end: 900,
        is_base_step_ready: true,
        curr_start: 900,
        curr_end: 900,
        is_curr_step_ready: true,
        synced_at: Some(900),
    };
    storage
        .insert_replacing(
            crate::sync::schema::SYNC_USER_STEPS_TABLE,
            &[step.to_record()],
            &["stepKey".to_string()],
        )
        .await?;

    let pending = checker(&storage)
        .check_new_public_data(&ctx, &BTreeMap::new(), &collections(&["symbols", "futures"]))
        .await?;

    assert_eq!(pending.names(), vec!["futures".to_string()]);

    Ok(())
}
