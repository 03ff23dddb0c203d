use tempfile::TempDir;
use tinydb::{ColumnDef, DataType, Database, TableSchema, Value};

fn users_schema() -> TableSchema {
    TableSchema::new(
        "users",
        vec![
            ColumnDef::new("id", DataType::Integer).primary_key(),
            ColumnDef::new("name", DataType::Text).not_null(),
        ],
    )
}

fn setup() -> (Database, TempDir) {
    let dir = TempDir::new().unwrap();
    let db = Database::create(&dir.path().join("test.db")).unwrap();
    (db, dir)
}

fn count_rows(db: &mut Database, table: &str) -> usize {
    db.scan(table, None, None, true)
        .unwrap()
        .map(|r| r.unwrap())
        .count()
}

#[test]
fn test_crud_round_trip() {
    let (mut db, _dir) = setup();
    db.create_table(users_schema()).unwrap();

    db.insert("users", vec![Value::Integer(1), Value::Text("Alice".into())])
        .unwrap();
    db.insert("users", vec![Value::Integer(2), Value::Text("Bob".into())])
        .unwrap();

    db.update(
        "users",
        &[Value::Integer(2)],
        vec![Value::Integer(2), Value::Text("Carol".into())],
    )
    .unwrap();

    let rows: Vec<Vec<Value>> = db
        .scan("users", None, None, true)
        .unwrap()
        .map(|r| r.unwrap())
        .collect();
    assert_eq!(
        rows,
        vec![
            vec![Value::Integer(1), Value::Text("Alice".into())],
            vec![Value::Integer(2), Value::Text("Carol".into())],
        ]
    );

    assert_eq!(db.delete("users", &[Value::Integer(1)]).unwrap(), 1);
    assert_eq!(count_rows(&mut db, "users"), 1);
}

#[test]
fn test_get_point_lookup() {
    let (mut db, _dir) = setup();
    db.create_table(users_schema()).unwrap();

    db.insert("users", vec![Value::Integer(7), Value::Text("Grace".into())])
        .unwrap();

    let row = db.get("users", &[Value::Integer(7)]).unwrap().unwrap();
    assert_eq!(row, vec![Value::Integer(7), Value::Text("Grace".into())]);
    assert!(db.get("users", &[Value::Integer(8)]).unwrap().is_none());
}

#[test]
fn test_persistence_across_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("test.db");

    {
        let mut db = Database::create(&path).unwrap();
        db.create_table(users_schema()).unwrap();
        db.insert("users", vec![Value::Integer(1), Value::Text("Alice".into())])
            .unwrap();
        db.close().unwrap();
    }

    let mut db = Database::open(&path).unwrap();
    assert_eq!(db.list_tables(), vec!["users".to_string()]);
    let row = db.get("users", &[Value::Integer(1)]).unwrap().unwrap();
    assert_eq!(row[1], Value::Text("Alice".into()));
    db.close().unwrap();
}

#[test]
fn test_last_committed_value_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("test.db");

    {
        let mut db = Database::create(&path).unwrap();
        db.create_table(users_schema()).unwrap();
        for round in 0..5 {
            let name = format!("round-{}", round);
            if round == 0 {
                db.insert("users", vec![Value::Integer(1), Value::Text(name)])
                    .unwrap();
            } else {
                db.update(
                    "users",
                    &[Value::Integer(1)],
                    vec![Value::Integer(1), Value::Text(name)],
                )
                .unwrap();
            }
        }
        db.close().unwrap();
    }

    let mut db = Database::open(&path).unwrap();
    let row = db.get("users", &[Value::Integer(1)]).unwrap().unwrap();
    assert_eq!(row[1], Value::Text("round-4".into()));
}

#[test]
fn test_update_changes_primary_key() {
    let (mut db, _dir) = setup();
    db.create_table(users_schema()).unwrap();
    db.insert("users", vec![Value::Integer(1), Value::Text("Alice".into())])
        .unwrap();
    db.insert("users", vec![Value::Integer(2), Value::Text("Bob".into())])
        .unwrap();

    db.update(
        "users",
        &[Value::Integer(1)],
        vec![Value::Integer(9), Value::Text("Alice".into())],
    )
    .unwrap();
    assert!(db.get("users", &[Value::Integer(1)]).unwrap().is_none());
    assert!(db.get("users", &[Value::Integer(9)]).unwrap().is_some());

    // Moving onto an occupied key is a duplicate.
    assert!(matches!(
        db.update(
            "users",
            &[Value::Integer(9)],
            vec![Value::Integer(2), Value::Text("Alice".into())],
        ),
        Err(tinydb::TinyError::DuplicateKey(_))
    ));

    // Updating a missing key reports it.
    assert!(matches!(
        db.update(
            "users",
            &[Value::Integer(100)],
            vec![Value::Integer(100), Value::Text("X".into())],
        ),
        Err(tinydb::TinyError::NotFound(_))
    ));
}

#[test]
fn test_unknown_table_not_found() {
    let (mut db, _dir) = setup();
    assert!(matches!(
        db.insert("ghost", vec![Value::Integer(1)]),
        Err(tinydb::TinyError::NotFound(_))
    ));
    assert!(db.get("ghost", &[Value::Integer(1)]).is_err());
    assert!(db.drop_table("ghost").is_err());
}

#[test]
fn test_second_handle_refused() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("test.db");
    let db = Database::create(&path).unwrap();

    assert!(matches!(
        Database::open(&path),
        Err(tinydb::TinyError::Busy(_))
    ));
    db.close().unwrap();

    let db = Database::open(&path).unwrap();
    db.close().unwrap();
}

#[test]
fn test_all_value_types_round_trip() {
    use rust_decimal::Decimal;
    use std::str::FromStr;

    let (mut db, _dir) = setup();
    db.create_table(TableSchema::new(
        "mixed",
        vec![
            ColumnDef::new("id", DataType::Integer).primary_key(),
            ColumnDef::new("t", DataType::Text),
            ColumnDef::new("r", DataType::Real),
            ColumnDef::new("b", DataType::Boolean),
            ColumnDef::new("ts", DataType::Timestamp),
            ColumnDef::new("bin", DataType::Blob),
            ColumnDef::new("d", DataType::Decimal),
        ],
    ))
    .unwrap();

    let row = vec![
        Value::Integer(1),
        Value::Text("text".into()),
        Value::Real(2.5),
        Value::Boolean(true),
        Value::Timestamp(1_700_000_000_000_000),
        Value::Blob(vec![0, 1, 2, 255]),
        Value::Decimal(Decimal::from_str("12.34").unwrap()),
    ];
    db.insert("mixed", row.clone()).unwrap();

    assert_eq!(db.get("mixed", &[Value::Integer(1)]).unwrap().unwrap(), row);

    let nulls = vec![
        Value::Integer(2),
        Value::Null,
        Value::Null,
        Value::Null,
        Value::Null,
        Value::Null,
        Value::Null,
    ];
    db.insert("mixed", nulls.clone()).unwrap();
    assert_eq!(db.get("mixed", &[Value::Integer(2)]).unwrap().unwrap(), nulls);
}

#[test]
fn test_large_row_overflow() {
    let (mut db, _dir) = setup();
    db.create_table(TableSchema::new(
        "blobs",
        vec![
            ColumnDef::new("id", DataType::Integer).primary_key(),
            ColumnDef::new("data", DataType::Blob),
        ],
    ))
    .unwrap();

    let big: Vec<u8> = (0..100_000).map(|i| (i % 251) as u8).collect();
    db.insert("blobs", vec![Value::Integer(1), Value::Blob(big.clone())])
        .unwrap();

    let row = db.get("blobs", &[Value::Integer(1)]).unwrap().unwrap();
    assert_eq!(row[1], Value::Blob(big));
}
