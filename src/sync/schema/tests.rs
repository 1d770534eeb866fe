use serde_json::json;

use super::*;

#[test]
fn standard_registry_is_valid() {
    let registry = CollectionRegistry::standard();

    let ledgers = registry.get("ledgers").expect("ledgers registered");
    assert!(ledgers.is_private());
    assert!(ledgers.is_append_only());
    assert_eq!(ledgers.role(), CollectionRole::Ledgers);
    assert_eq!(ledgers.date_field(), Some("mts"));
    assert!(registry.by_role(CollectionRole::Candles).is_some());
    assert!(registry.by_role(CollectionRole::Movements).is_some());
}

#[test]
fn select_never_returns_hidden_collections() {
    let registry = CollectionRegistry::standard();

    let all = registry.select(&CollectionSelector::All);
    assert!(all.iter().all(|schema| !schema.is_hidden()));
    assert!(!all.iter().any(|schema| schema.name() == "positionsSnapshot"));

    let hidden = registry.select(&CollectionSelector::Collection("positionsSnapshot".into()));
    assert!(hidden.is_empty());

    let public = registry.select(&CollectionSelector::Public);
    assert!(public.iter().all(|schema| schema.is_public()));

    let private = registry.select(&CollectionSelector::Private);
    assert!(private.iter().all(|schema| schema.is_private()));
    assert_eq!(all.len(), public.len() + private.len());
}

#[test]
fn rejects_duplicate_and_malformed_collections() {
    let ok = || {
        CollectionSchema::new("a", "getA", CollectionKind::PUBLIC_APPEND_ONLY)
            .with_fields(&["id", "mts"])
            .with_date_field("mts")
            .with_unique_key(&["id"])
    };

    assert!(CollectionRegistry::new(vec![ok()]).is_ok());

    assert_eq!(
        CollectionRegistry::new(vec![ok(), ok()]).unwrap_err(),
        SchemaError::DuplicateCollection("a".into())
    );

    let no_date = CollectionSchema::new("b", "getB", CollectionKind::PUBLIC_APPEND_ONLY)
        .with_fields(&["id"])
        .with_unique_key(&["id"]);
    assert_eq!(
        CollectionRegistry::new(vec![no_date]).unwrap_err(),
        SchemaError::MissingDateField("b".into())
    );

    let bad_key = ok().with_unique_key(&["nope"]);
    assert!(matches!(
        CollectionRegistry::new(vec![bad_key]).unwrap_err(),
        SchemaError::UndeclaredField { .. }
    ));

    let bad_name = CollectionSchema::new("a-b", "getA", CollectionKind::PUBLIC_SNAPSHOT)
        .with_fields(&["id"])
        .with_unique_key(&["id"]);
    assert_eq!(
        CollectionRegistry::new(vec![bad_name]).unwrap_err(),
        SchemaError::InvalidName("a-b".into())
    );
}

#[test]
fn normalize_projects_fields_and_applies_stamp_and_copies() {
    let registry = CollectionRegistry::standard();
    let ledgers = registry.get("ledgers").unwrap();

    let item = json!({
        "id": 10,
        "currency": "BTC",
        "mts": 1000,
        "amount": 0.5,
        "balance": 1.5,
        "user_id": 999,
        "unknown": "dropped"
    });
    let stamp = json!({"user_id": 7, "subUserId": null});

    let row = ledgers.normalize(item.as_object().unwrap(), stamp.as_object().unwrap());

    assert_eq!(row["user_id"], json!(7));
    assert_eq!(row["subUserId"], Value::Null);
    assert_eq!(row["_nativeBalance"], json!(1.5));
    assert_eq!(row["amountUsd"], Value::Null);
    assert!(!row.contains_key("unknown"));
    assert!(!row.contains_key(ID_FIELD));
}

#[test]
fn selector_parsing() {
    assert_eq!("ALL".parse::<CollectionSelector>().unwrap(), CollectionSelector::All);
    assert_eq!("public".parse::<CollectionSelector>().unwrap(), CollectionSelector::Public);
    assert_eq!(
        "ledgers".parse::<CollectionSelector>().unwrap(),
        CollectionSelector::Collection("ledgers".into())
    );
    assert!(matches!(
        "led gers".parse::<CollectionSelector>(),
        Err(SyncConfigError::InvalidSelector(_))
    ));

    let registry = CollectionRegistry::standard();
    assert!(
        registry
            .validate_selector(&CollectionSelector::Collection("nope".into()))
            .is_err()
    );
    assert!(registry.validate_selector(&CollectionSelector::Private).is_ok());
}
