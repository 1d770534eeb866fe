use serde_json::json;

use crate::db::models::SortKey;

use super::*;

fn rec(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

fn key(fields: &[&str]) -> Vec<String> {
    fields.iter().map(|f| f.to_string()).collect()
}

#[tokio::test]
async fn insert_replacing_keeps_id_and_overwrites_provided_fields() -> Result<()> {
    let storage = MemoryStorage::new();
    let unique = key(&["id", "user_id"]);

    storage
        .insert_replacing(
            "ledgers",
            &[
                rec(json!({"id": 1, "user_id": 7, "amount": 1.5, "amountUsd": null})),
                rec(json!({"id": 2, "user_id": 7, "amount": 2.0})),
            ],
            &unique,
        )
        .await?;

    storage
        .insert_replacing(
            "ledgers",
            &[rec(json!({"id": 1, "user_id": 7, "amountUsd": 30000.0}))],
            &unique,
        )
        .await?;

    let rows = storage.rows("ledgers");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["_id"], json!(1));
    assert_eq!(rows[0]["amount"], json!(1.5));
    assert_eq!(rows[0]["amountUsd"], json!(30000.0));
    assert_eq!(rows[1]["_id"], json!(2));

    Ok(())
}

#[tokio::test]
async fn filters_follow_sql_null_semantics() -> Result<()> {
    let storage = MemoryStorage::new();
    storage
        .insert_replacing(
            "t",
            &[
                rec(json!({"k": 1, "v": null})),
                rec(json!({"k": 2, "v": 5})),
                rec(json!({"k": 3})),
            ],
            &[],
        )
        .await?;

    let ne = storage
        .get_elems("t", &ElemQuery::new(Filter::new().ne("v", 7)))
        .await?;
    assert_eq!(ne.len(), 1);

    let nulls = storage
        .get_elems("t", &ElemQuery::new(Filter::new().is_null("v")))
        .await?;
    assert_eq!(nulls.len(), 2);

    let in_list = storage
        .get_elems(
            "t",
            &ElemQuery::new(Filter::new().is_in("k", vec![json!(1), json!(3)])),
        )
        .await?;
    assert_eq!(in_list.len(), 2);

    Ok(())
}

#[tokio::test]
async fn sort_places_nulls_last_ascending_and_first_descending() -> Result<()> {
    let storage = MemoryStorage::new();
    storage
        .insert_replacing(
            "t",
            &[
                rec(json!({"mts": 20})),
                rec(json!({"mts": null})),
                rec(json!({"mts": 10})),
            ],
            &[],
        )
        .await?;

    let asc = storage
        .get_elems("t", &ElemQuery::default().sorted_by(SortKey::asc("mts")))
        .await?;
    let asc: Vec<_> = asc.iter().map(|r| r["mts"].clone()).collect();
    assert_eq!(asc, vec![json!(10), json!(20), Value::Null]);

    let desc = storage
        .get_elems(
            "t",
            &ElemQuery::default().sorted_by(SortKey::desc("mts")).limit(2),
        )
        .await?;
    let desc: Vec<_> = desc.iter().map(|r| r["mts"].clone()).collect();
    assert_eq!(desc, vec![Value::Null, json!(20)]);

    Ok(())
}

#[tokio::test]
async fn transaction_is_invisible_until_commit() -> Result<()> {
    let storage = MemoryStorage::new();
    storage
        .insert_replacing("tmp", &[rec(json!({"id": 1, "x": "a"}))], &[])
        .await?;

    let mut tx = storage.begin().await?;
    tx.merge_table("tmp", "main", &key(&["id"])).await?;
    tx.drop_table("tmp").await?;

    assert!(storage.rows("main").is_empty());
    assert!(storage.table_exists("tmp").await?);

    tx.commit().await?;

    assert_eq!(storage.rows("main").len(), 1);
    assert!(!storage.table_exists("tmp").await?);

    Ok(())
}

#[tokio::test]
async fn rollback_discards_changes() -> Result<()> {
    let storage = MemoryStorage::new();

    let mut tx = storage.begin().await?;
    tx.insert_replacing("main", &[rec(json!({"id": 1}))], &[])
        .await?;
    tx.rollback().await?;

    assert!(!storage.table_exists("main").await?);

    Ok(())
}

#[tokio::test]
async fn list_tables_matches_prefix_literally() -> Result<()> {
    let storage = MemoryStorage::new();
    storage.create_table_like("tmp_sync_a_ledgers", "ledgers").await?;
    storage.create_table_like("tmpXsync", "ledgers").await?;
    storage.create_table_like("ledgers", "ledgers").await?;

    let tables = storage.list_tables("tmp_sync_").await?;
    assert_eq!(tables, vec!["tmp_sync_a_ledgers".to_string()]);

    Ok(())
}
