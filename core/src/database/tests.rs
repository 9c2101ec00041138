use std::sync::Arc;
use std::thread;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::tempdir;

use super::*;
use crate::error::DynaError;
use crate::storage::Value;

fn people_columns() -> Vec<ColumnDefinition> {
    vec![
        ColumnDefinition::new("id", "Integer").primary_key().autoincrement(),
        ColumnDefinition::new("name", "String").with_length(50),
        ColumnDefinition::new("age", "Integer"),
        ColumnDefinition::new("city", "String"),
    ]
}

fn doc(value: serde_json::Value) -> Row {
    serde_json::from_value(value).unwrap()
}

fn criteria(value: serde_json::Value) -> Criteria {
    serde_json::from_value(value).unwrap()
}

fn seeded() -> Database {
    let db = Database::in_memory().unwrap();
    assert!(db.create_table("people", &people_columns()).unwrap());
    let inserted = db
        .insert_many(
            "people",
            vec![
                doc(json!({"name": "ann", "age": 31, "city": "oslo"})),
                doc(json!({"name": "bob", "age": 25, "city": "rome"})),
                doc(json!({"name": "cid", "age": 47, "city": "oslo"})),
                doc(json!({"name": "dee", "age": 25, "city": "lima"})),
                doc(json!({"name": "eve", "age": 38, "city": "oslo"})),
                doc(json!({"name": "fay", "age": 19, "city": "rome"})),
            ],
        )
        .unwrap();
    assert_eq!(inserted, 6);
    db
}

fn names(rows: &[Row]) -> Vec<String> {
    rows.iter()
        .map(|r| match r.get("name") {
            Some(Value::String(s)) => s.clone(),
            other => panic!("unexpected name {:?}", other),
        })
        .collect()
}

#[test]
fn test_create_is_idempotent_and_listed() {
    let db = Database::in_memory().unwrap();
    assert!(db.create_table("people", &people_columns()).unwrap());
    assert_eq!(db.list_tables().unwrap(), vec!["people"]);

    let different = vec![ColumnDefinition::new("other", "Json")];
    assert!(!db.create_table("people", &different).unwrap());

    let schema = db.describe_table("people").unwrap();
    assert_eq!(
        schema.column_names().collect::<Vec<_>>(),
        vec!["id", "name", "age", "city"]
    );
}

#[test]
fn test_create_validation_errors() {
    let db = Database::in_memory().unwrap();
    assert!(matches!(
        db.create_table("t", &[]),
        Err(DynaError::InvalidSchema(_))
    ));
    assert_eq!(
        db.create_table("t", &[ColumnDefinition::new("x", "Blob")]),
        Err(DynaError::UnsupportedType("Blob".into()))
    );
    assert!(db.list_tables().unwrap().is_empty());
}

#[test]
fn test_delete_table() {
    let db = seeded();
    assert!(!db.delete_table("ghosts").unwrap());
    assert!(db.delete_table("people").unwrap());
    assert!(db.list_tables().unwrap().is_empty());
    assert_eq!(
        db.query("people", &QueryParams::default()),
        Err(DynaError::TableNotFound("people".into()))
    );
}

#[test]
fn test_insert_many_restricts_to_declared_columns() {
    let db = Database::in_memory().unwrap();
    db.create_table("people", &people_columns()).unwrap();
    db.insert_many(
        "people",
        vec![
            doc(json!({"name": "ann", "age": 31, "nickname": "a"})),
            doc(json!({"name": "bob", "shoe_size": 44})),
        ],
    )
    .unwrap();

    let rows = db.query("people", &QueryParams::default()).unwrap();
    assert_eq!(
        serde_json::to_value(&rows).unwrap(),
        json!([
            {"id": 1, "name": "ann", "age": 31, "city": null},
            {"id": 2, "name": "bob", "age": null, "city": null},
        ])
    );
}

#[test]
fn test_insert_into_missing_table() {
    let db = Database::in_memory().unwrap();
    assert_eq!(
        db.insert_one("nowhere", doc(json!({"a": 1}))),
        Err(DynaError::TableNotFound("nowhere".into()))
    );
}

#[test]
fn test_sort_is_non_decreasing() {
    let db = seeded();
    let rows = db
        .query("people", &QueryParams::default().sort_by("age", "asc"))
        .unwrap();

    let ages: Vec<i64> = rows
        .iter()
        .map(|r| match r.get("age") {
            Some(Value::Integer(a)) => *a,
            other => panic!("unexpected age {:?}", other),
        })
        .collect();
    assert_eq!(ages.len(), 6);
    assert!(ages.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn test_skip_and_limit_window_the_sorted_result() {
    let db = seeded();
    let all = db
        .query("people", &QueryParams::default().sort_by("name", "asc"))
        .unwrap();
    let page = db
        .query(
            "people",
            &QueryParams::default().sort_by("name", "asc").skip(2).limit(3),
        )
        .unwrap();
    assert_eq!(page, all[2..5].to_vec());

    let tail = db
        .query("people", &QueryParams::default().sort_by("name", "asc").skip(4))
        .unwrap();
    assert_eq!(names(&tail), vec!["eve", "fay"]);
}

#[test]
fn test_filter_then_sort_then_page() {
    let db = seeded();
    let params = QueryParams::default()
        .filter("city", "oslo")
        .project(["name"])
        .sort_by("age", "desc")
        .limit(2);
    let rows = db.query("people", &params).unwrap();
    assert_eq!(rows, vec![doc(json!({"name": "cid"})), doc(json!({"name": "eve"}))]);
}

#[test]
fn test_query_errors() {
    let db = seeded();
    assert!(matches!(
        db.query("people", &QueryParams::default().filter("planet", "mars")),
        Err(DynaError::UnknownColumn { .. })
    ));
    assert!(matches!(
        db.query("people", &QueryParams::default().project(["height"])),
        Err(DynaError::UnknownColumn { .. })
    ));
    assert_eq!(
        db.query("people", &QueryParams::default().sort_by("age", "up")),
        Err(DynaError::InvalidSortDirection("up".into()))
    );
    assert!(matches!(
        db.query("people", &QueryParams::default().skip(-1)),
        Err(DynaError::InvalidPagination(_))
    ));
    assert_eq!(
        db.query("people", &QueryParams::default().sort_by("height", "asc")),
        Err(DynaError::UnknownColumn {
            table: "people".into(),
            column: "height".into(),
        })
    );
}

#[test]
fn test_update_many_touches_only_matches() {
    let db = seeded();
    let modified = db
        .update_many(
            "people",
            &criteria(json!({"age": 25})),
            &criteria(json!({"city": "nice"})),
        )
        .unwrap();
    assert_eq!(modified, 2);

    let moved = db
        .query(
            "people",
            &QueryParams::default().filter("city", "nice").sort_by("name", "asc"),
        )
        .unwrap();
    assert_eq!(names(&moved), vec!["bob", "dee"]);

    let rome = db
        .query("people", &QueryParams::default().filter("city", "rome"))
        .unwrap();
    assert_eq!(names(&rome), vec!["fay"]);

    assert_eq!(
        db.update_many("people", &criteria(json!({"age": 99})), &criteria(json!({"city": "x"})))
            .unwrap(),
        0
    );
}

#[test]
fn test_update_errors() {
    let db = seeded();
    assert_eq!(
        db.update_many("people", &Criteria::new(), &Assignments::new()),
        Err(DynaError::EmptyUpdate)
    );
    assert!(matches!(
        db.update_many("people", &Criteria::new(), &criteria(json!({"mood": "ok"}))),
        Err(DynaError::UnknownColumn { .. })
    ));
    assert_eq!(
        db.update_many("ghosts", &Criteria::new(), &criteria(json!({"a": 1}))),
        Err(DynaError::TableNotFound("ghosts".into()))
    );
}

#[test]
fn test_delete_many_removes_exact_matches() {
    let db = seeded();
    let deleted = db
        .delete_many("people", &criteria(json!({"city": "oslo"})))
        .unwrap();
    assert_eq!(deleted, 3);

    let again = db
        .query("people", &QueryParams::default().filter("city", "oslo"))
        .unwrap();
    assert!(again.is_empty());
    assert_eq!(db.query("people", &QueryParams::default()).unwrap().len(), 3);
    assert_eq!(db.delete_many("people", &criteria(json!({"city": "oslo"}))).unwrap(), 0);
}

#[test]
fn test_delete_many_errors() {
    let db = seeded();
    assert_eq!(
        db.delete_many("people", &criteria(json!({"planet": 1}))),
        Err(DynaError::UnknownColumn {
            table: "people".into(),
            column: "planet".into(),
        })
    );
    assert_eq!(db.query("people", &QueryParams::default()).unwrap().len(), 6);
    assert_eq!(
        db.delete_many("ghosts", &Criteria::new()),
        Err(DynaError::TableNotFound("ghosts".into()))
    );
}

#[test]
fn test_insert_on_locked_database_is_insert_failed() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("locked.db");
    let config = StorageConfig {
        busy_timeout_ms: 50,
        ..StorageConfig::file(&path)
    };
    let db = Database::open(&config).unwrap();
    assert!(db
        .create_table("t", &[ColumnDefinition::new("a", "Integer")])
        .unwrap());

    let holder = rusqlite::Connection::open(&path).unwrap();
    holder.execute_batch("BEGIN IMMEDIATE;").unwrap();

    let err = db.insert_one("t", doc(json!({"a": 2}))).unwrap_err();
    assert!(matches!(err, DynaError::InsertFailed(_)), "got {:?}", err);
    let err = db
        .insert_many("t", vec![doc(json!({"a": 3})), doc(json!({"a": 4}))])
        .unwrap_err();
    assert!(matches!(err, DynaError::InsertFailed(_)), "got {:?}", err);

    holder.execute_batch("ROLLBACK;").unwrap();
    assert!(db.query("t", &QueryParams::default()).unwrap().is_empty());
    assert!(db.insert_one("t", doc(json!({"a": 5}))).unwrap());
}

#[test]
fn test_columns_differing_only_in_case_are_rejected() {
    let db = Database::in_memory().unwrap();
    let columns = vec![
        ColumnDefinition::new("a", "Integer"),
        ColumnDefinition::new("A", "String"),
    ];
    assert!(matches!(
        db.create_table("t", &columns),
        Err(DynaError::InvalidSchema(_))
    ));
    assert!(db.list_tables().unwrap().is_empty());
}

#[test]
fn test_autoincrement_and_default_scenario() {
    let db = Database::in_memory().unwrap();
    let columns = vec![
        ColumnDefinition::new("id", "Integer").primary_key().autoincrement(),
        ColumnDefinition::new("name", "String").with_length(50),
        ColumnDefinition::new("active", "Boolean").with_default(true),
    ];
    assert!(db.create_table("t", &columns).unwrap());
    assert!(db.insert_one("t", doc(json!({"name": "a"}))).unwrap());

    let rows = db.query("t", &QueryParams::default()).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("active"), Some(&Value::Boolean(true)));
    assert!(matches!(rows[0].get("id"), Some(Value::Integer(_))));
    assert_eq!(rows[0].get("name"), Some(&Value::from("a")));
}

#[test]
fn test_typed_values_survive_storage() {
    let db = Database::in_memory().unwrap();
    let columns = vec![
        ColumnDefinition::new("at", "DateTime"),
        ColumnDefinition::new("meta", "JSON"),
        ColumnDefinition::new("score", "Float"),
    ];
    db.create_table("events", &columns).unwrap();
    db.insert_one(
        "events",
        doc(json!({"at": "2024-05-06T07:08:09", "meta": {"tags": ["x"]}, "score": 3})),
    )
    .unwrap();

    let rows = db
        .query("events", &QueryParams::default().filter("at", "2024-05-06 07:08:09"))
        .unwrap();
    assert_eq!(
        serde_json::to_value(&rows).unwrap(),
        json!([{"at": "2024-05-06T07:08:09", "meta": {"tags": ["x"]}, "score": 3.0}])
    );
}

#[test]
fn test_parallel_creates_on_pooled_file_database() {
    let dir = tempdir().unwrap();
    let config = StorageConfig {
        max_connections: 4,
        ..StorageConfig::file(dir.path().join("race.db"))
    };
    let db = Arc::new(Database::open(&config).unwrap());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let db = Arc::clone(&db);
            thread::spawn(move || db.create_table("dup", &people_columns()))
        })
        .collect();

    let created: Vec<bool> = handles
        .into_iter()
        .map(|h| h.join().unwrap().unwrap())
        .collect();
    assert_eq!(created.iter().filter(|&&c| c).count(), 1);
    assert_eq!(created.iter().filter(|&&c| !c).count(), 7);
    assert_eq!(db.list_tables().unwrap(), vec!["dup"]);
}

#[test]
fn test_parallel_creates_across_handles() {
    let dir = tempdir().unwrap();
    let config = StorageConfig::file(dir.path().join("shared.db"));
    Database::open(&config).unwrap();

    // separate catalogs share no name locks; the engine's duplicate error
    // decides the race
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let config = config.clone();
            thread::spawn(move || {
                Database::open(&config)
                    .unwrap()
                    .create_table("dup", &people_columns())
            })
        })
        .collect();

    let created: Vec<bool> = handles
        .into_iter()
        .map(|h| h.join().unwrap().unwrap())
        .collect();
    assert_eq!(created.iter().filter(|&&c| c).count(), 1);
}

#[test]
fn test_expired_deadline_times_out_without_effect() {
    let dir = tempdir().unwrap();
    let config = StorageConfig::file(dir.path().join("slow.db"));

    let hurried = Database::open(&config)
        .unwrap()
        .with_operation_timeout(Some(Duration::ZERO));
    assert_eq!(
        hurried.create_table("t", &people_columns()),
        Err(DynaError::Timeout)
    );

    let db = Database::open(&config).unwrap();
    assert!(db.list_tables().unwrap().is_empty());
}
