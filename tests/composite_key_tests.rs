use tempfile::TempDir;
use tinydb::{ColumnDef, DataType, Database, TableSchema, TinyError, Value};

fn setup() -> (Database, TempDir) {
    let dir = TempDir::new().unwrap();
    let mut db = Database::create(&dir.path().join("test.db")).unwrap();
    db.create_table(
        TableSchema::new(
            "events",
            vec![
                ColumnDef::new("stream", DataType::Text),
                ColumnDef::new("seq", DataType::Integer),
                ColumnDef::new("body", DataType::Text),
            ],
        )
        .with_primary_key(&["stream", "seq"]),
    )
    .unwrap();
    (db, dir)
}

fn insert(db: &mut Database, stream: &str, seq: i64, body: &str) {
    db.insert(
        "events",
        vec![
            Value::Text(stream.into()),
            Value::Integer(seq),
            Value::Text(body.into()),
        ],
    )
    .unwrap();
}

#[test]
fn test_composite_get_and_delete() {
    let (mut db, _dir) = setup();
    insert(&mut db, "a", 1, "first");
    insert(&mut db, "a", 2, "second");
    insert(&mut db, "b", 1, "other");

    let key = [Value::Text("a".into()), Value::Integer(2)];
    let row = db.get("events", &key).unwrap().unwrap();
    assert_eq!(row[2], Value::Text("second".into()));

    assert_eq!(db.delete("events", &key).unwrap(), 1);
    assert!(db.get("events", &key).unwrap().is_none());
    // Same seq under a different stream is untouched.
    assert!(db
        .get("events", &[Value::Text("b".into()), Value::Integer(1)])
        .unwrap()
        .is_some());
}

#[test]
fn test_composite_duplicate_detected() {
    let (mut db, _dir) = setup();
    insert(&mut db, "a", 1, "first");
    let err = db
        .insert(
            "events",
            vec![
                Value::Text("a".into()),
                Value::Integer(1),
                Value::Text("again".into()),
            ],
        )
        .unwrap_err();
    assert!(matches!(err, TinyError::DuplicateKey(_)));
}

#[test]
fn test_composite_order_field_by_field() {
    let (mut db, _dir) = setup();
    // Deliberately interleaved so byte-concatenation bugs would misorder
    // ("ab",1) against ("a",2).
    insert(&mut db, "ab", 1, "x");
    insert(&mut db, "a", 2, "x");
    insert(&mut db, "a", 10, "x");
    insert(&mut db, "b", 1, "x");
    insert(&mut db, "a", 1, "x");

    let keys: Vec<(String, i64)> = db
        .scan("events", None, None, true)
        .unwrap()
        .map(|r| {
            let row = r.unwrap();
            (
                row[0].as_str().unwrap().to_string(),
                row[1].as_i64().unwrap(),
            )
        })
        .collect();
    assert_eq!(
        keys,
        vec![
            ("a".to_string(), 1),
            ("a".to_string(), 2),
            ("a".to_string(), 10),
            ("ab".to_string(), 1),
            ("b".to_string(), 1),
        ]
    );
}

#[test]
fn test_composite_range_scan_by_prefix() {
    let (mut db, _dir) = setup();
    for seq in 1..=5 {
        insert(&mut db, "a", seq, "x");
        insert(&mut db, "b", seq, "x");
    }

    // Full-key bounds select a window within one stream.
    let lo = [Value::Text("a".into()), Value::Integer(2)];
    let hi = [Value::Text("a".into()), Value::Integer(4)];
    let seqs: Vec<i64> = db
        .scan("events", Some(&lo), Some(&hi), true)
        .unwrap()
        .map(|r| r.unwrap()[1].as_i64().unwrap())
        .collect();
    assert_eq!(seqs, vec![2, 3, 4]);
}

#[test]
fn test_composite_pk_columns_not_null() {
    let (mut db, _dir) = setup();
    let err = db
        .insert(
            "events",
            vec![Value::Text("a".into()), Value::Null, Value::Text("x".into())],
        )
        .unwrap_err();
    assert!(matches!(err, TinyError::Constraint(_)));
}

#[test]
fn test_composite_key_arity_enforced() {
    let (mut db, _dir) = setup();
    insert(&mut db, "a", 1, "x");
    assert!(db.get("events", &[Value::Text("a".into())]).is_err());
}

#[test]
fn test_negative_integer_component_order() {
    let dir = TempDir::new().unwrap();
    let mut db = Database::create(&dir.path().join("test.db")).unwrap();
    db.create_table(TableSchema::new(
        "signed",
        vec![
            ColumnDef::new("k", DataType::Integer).primary_key(),
            ColumnDef::new("v", DataType::Text),
        ],
    ))
    .unwrap();

    for k in [0i64, -5, 7, i64::MIN, i64::MAX, -1] {
        db.insert("signed", vec![Value::Integer(k), Value::Text("x".into())])
            .unwrap();
    }
    let keys: Vec<i64> = db
        .scan("signed", None, None, true)
        .unwrap()
        .map(|r| r.unwrap()[0].as_i64().unwrap())
        .collect();
    assert_eq!(keys, vec![i64::MIN, -5, -1, 0, 7, i64::MAX]);
}
