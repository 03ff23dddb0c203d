use tempfile::TempDir;
use tinydb::{ColumnDef, DataType, Database, TableSchema, TinyError, Value};

fn setup() -> (Database, TempDir) {
    let dir = TempDir::new().unwrap();
    let mut db = Database::create(&dir.path().join("test.db")).unwrap();
    db.create_table(TableSchema::new(
        "users",
        vec![
            ColumnDef::new("id", DataType::Integer).primary_key(),
            ColumnDef::new("name", DataType::Text).not_null(),
        ],
    ))
    .unwrap();
    (db, dir)
}

#[test]
fn test_not_null_rejected() {
    let (mut db, _dir) = setup();
    let err = db
        .insert("users", vec![Value::Integer(1), Value::Null])
        .unwrap_err();
    assert!(matches!(err, TinyError::Constraint(_)));
    assert!(db.get("users", &[Value::Integer(1)]).unwrap().is_none());
}

#[test]
fn test_duplicate_key_rejected() {
    let (mut db, _dir) = setup();
    db.insert("users", vec![Value::Integer(1), Value::Text("A".into())])
        .unwrap();
    let err = db
        .insert("users", vec![Value::Integer(1), Value::Text("X".into())])
        .unwrap_err();
    assert!(matches!(err, TinyError::DuplicateKey(_)));

    // The original row is untouched.
    let row = db.get("users", &[Value::Integer(1)]).unwrap().unwrap();
    assert_eq!(row[1], Value::Text("A".into()));
}

#[test]
fn test_type_mismatch_rejected() {
    let (mut db, _dir) = setup();
    let err = db
        .insert("users", vec![Value::Text("one".into()), Value::Text("A".into())])
        .unwrap_err();
    assert!(matches!(err, TinyError::Constraint(_)));

    let err = db
        .insert("users", vec![Value::Integer(1), Value::Integer(2)])
        .unwrap_err();
    assert!(matches!(err, TinyError::Constraint(_)));
}

#[test]
fn test_wrong_arity_rejected() {
    let (mut db, _dir) = setup();
    assert!(db.insert("users", vec![Value::Integer(1)]).is_err());
    assert!(db
        .insert(
            "users",
            vec![
                Value::Integer(1),
                Value::Text("A".into()),
                Value::Integer(9)
            ],
        )
        .is_err());
}

#[test]
fn test_null_primary_key_rejected() {
    let (mut db, _dir) = setup();
    let err = db
        .insert("users", vec![Value::Null, Value::Text("A".into())])
        .unwrap_err();
    assert!(matches!(err, TinyError::Constraint(_)));
}

fn fk_setup() -> (Database, TempDir) {
    let (mut db, dir) = setup();
    db.create_table(TableSchema::new(
        "posts",
        vec![
            ColumnDef::new("id", DataType::Integer).primary_key(),
            ColumnDef::new("author", DataType::Integer).references("users", "id"),
        ],
    ))
    .unwrap();
    db.insert("users", vec![Value::Integer(1), Value::Text("Alice".into())])
        .unwrap();
    (db, dir)
}

#[test]
fn test_fk_insert_must_match() {
    let (mut db, _dir) = fk_setup();

    db.insert("posts", vec![Value::Integer(10), Value::Integer(1)])
        .unwrap();

    let err = db
        .insert("posts", vec![Value::Integer(11), Value::Integer(99)])
        .unwrap_err();
    assert!(matches!(err, TinyError::Constraint(_)));

    // A nullable FK accepts NULL.
    db.insert("posts", vec![Value::Integer(12), Value::Null])
        .unwrap();
}

#[test]
fn test_fk_delete_referent_blocked() {
    let (mut db, _dir) = fk_setup();
    db.insert("posts", vec![Value::Integer(10), Value::Integer(1)])
        .unwrap();

    let err = db.delete("users", &[Value::Integer(1)]).unwrap_err();
    assert!(matches!(err, TinyError::Constraint(_)));
    // Referent still present after the failed delete.
    assert!(db.get("users", &[Value::Integer(1)]).unwrap().is_some());

    // Remove the referencing row, then the delete goes through.
    db.delete("posts", &[Value::Integer(10)]).unwrap();
    db.delete("users", &[Value::Integer(1)]).unwrap();
}

#[test]
fn test_fk_checked_at_commit_in_explicit_tx() {
    let (mut db, _dir) = fk_setup();

    // Child first, parent second: valid at commit.
    db.begin().unwrap();
    db.insert("posts", vec![Value::Integer(20), Value::Integer(2)])
        .unwrap();
    db.insert("users", vec![Value::Integer(2), Value::Text("Bob".into())])
        .unwrap();
    db.commit().unwrap();
    assert!(db.get("posts", &[Value::Integer(20)]).unwrap().is_some());

    // Dangling reference at commit aborts the transaction.
    db.begin().unwrap();
    db.insert("posts", vec![Value::Integer(21), Value::Integer(77)])
        .unwrap();
    let err = db.commit().unwrap_err();
    assert!(matches!(err, TinyError::Constraint(_)));
    assert!(db.get("posts", &[Value::Integer(21)]).unwrap().is_none());
}

#[test]
fn test_fk_delete_and_reinsert_in_tx() {
    let (mut db, _dir) = fk_setup();
    db.insert("posts", vec![Value::Integer(10), Value::Integer(1)])
        .unwrap();

    // Deleting the parent is fine when it is back by commit time.
    db.begin().unwrap();
    db.delete("users", &[Value::Integer(1)]).unwrap();
    db.insert("users", vec![Value::Integer(1), Value::Text("Alice2".into())])
        .unwrap();
    db.commit().unwrap();
    assert!(db.get("users", &[Value::Integer(1)]).unwrap().is_some());
}

#[test]
fn test_fk_to_unknown_table_rejected() {
    let (mut db, _dir) = setup();
    let err = db
        .create_table(TableSchema::new(
            "orphans",
            vec![
                ColumnDef::new("id", DataType::Integer).primary_key(),
                ColumnDef::new("parent", DataType::Integer).references("nowhere", "id"),
            ],
        ))
        .unwrap_err();
    assert!(matches!(err, TinyError::Schema(_)));
}

#[test]
fn test_drop_referenced_table_rejected() {
    let (mut db, _dir) = fk_setup();
    let err = db.drop_table("users").unwrap_err();
    assert!(matches!(err, TinyError::Schema(_)));

    db.drop_table("posts").unwrap();
    db.drop_table("users").unwrap();
    assert!(db.list_tables().is_empty());
}
