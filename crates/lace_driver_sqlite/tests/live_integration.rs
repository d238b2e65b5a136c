use lace_core::{
    parse_connstr, Connection, DbDriver, DbError, QueryRequest, RecordIdentity, RowDelete,
    RowInsert, RowPatch, Value,
};
use lace_driver_sqlite::SqliteDriver;

fn connect_sqlite() -> Result<Box<dyn Connection>, DbError> {
    let temp_dir = tempfile::tempdir().expect("tempdir");
    let db_path = temp_dir.path().join("test.sqlite");

    let connstr = parse_connstr(&format!("sqlite://{}", db_path.display()))
        .map_err(|e| DbError::connection_failed(e.to_string()))?;

    let driver = SqliteDriver::new();
    let connection = driver.connect(&connstr)?;
    assert!(connection.ping());

    // Leak the tempdir so the file survives for the connection's lifetime;
    // the OS reclaims it when the process exits.
    std::mem::forget(temp_dir);

    Ok(connection)
}

#[test]
fn connect_ping_query_and_schema() -> Result<(), DbError> {
    let connection = connect_sqlite()?;

    connection.exec(&QueryRequest::new("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL)"))?;
    connection.exec(&QueryRequest::new("INSERT INTO users (name) VALUES ('alice')"))?;

    let result = connection.query(&QueryRequest::new("SELECT id, name FROM users"))?;
    assert_eq!(result.rows.len(), 1);

    assert!(connection.list_databases()?.is_empty());
    assert_eq!(connection.list_tables()?, vec!["users".to_string()]);

    Ok(())
}

#[test]
fn schema_introspection_reports_pk_fk_and_indexes() -> Result<(), DbError> {
    let connection = connect_sqlite()?;

    connection.exec(&QueryRequest::new(
        "CREATE TABLE test_users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            email TEXT UNIQUE,
            age INTEGER DEFAULT 0
        )",
    ))?;
    connection.exec(&QueryRequest::new(
        "CREATE TABLE test_orders (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES test_users(id),
            amount REAL NOT NULL
        )",
    ))?;
    connection.exec(&QueryRequest::new("CREATE INDEX idx_orders_user_id ON test_orders(user_id)"))?;

    let users_schema = connection.get_table_schema("test_users")?;
    let id_col = users_schema.columns.iter().find(|c| c.name == "id").expect("id column");
    assert!(id_col.primary_key);
    assert!(id_col.auto_increment);

    let name_col = users_schema.columns.iter().find(|c| c.name == "name").expect("name column");
    assert!(!name_col.nullable);

    let orders_schema = connection.get_table_schema("test_orders")?;
    assert!(!orders_schema.indexes.is_empty());
    assert!(!orders_schema.foreign_keys.is_empty());
    let fk = &orders_schema.foreign_keys[0];
    assert_eq!(fk.ref_table, "test_users");
    assert_eq!(fk.ref_column, "id");

    Ok(())
}

#[test]
fn crud_round_trip_via_primary_key() -> Result<(), DbError> {
    let connection = connect_sqlite()?;

    connection.exec(&QueryRequest::new(
        "CREATE TABLE crud_test (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL, value INTEGER DEFAULT 0)",
    ))?;

    let insert_result = connection.insert_row(&RowInsert::new(
        "crud_test".to_string(),
        None,
        vec!["name".to_string(), "value".to_string()],
        vec![Value::Text("alice".to_string()), Value::Int(42)],
    ))?;
    assert_eq!(insert_result.affected_rows, 1);
    let inserted_id = insert_result.returning_row.unwrap()[0].clone();

    let update_result = connection.update_row(&RowPatch::new(
        RecordIdentity::composite(vec!["id".to_string()], vec![inserted_id.clone()]),
        "crud_test".to_string(),
        None,
        vec![("value".to_string(), Value::Int(99))],
    ))?;
    assert_eq!(update_result.affected_rows, 1);
    assert_eq!(update_result.returning_row.unwrap()[2], Value::Int(99));

    let delete_result = connection.delete_row(&RowDelete::new(
        RecordIdentity::composite(vec!["id".to_string()], vec![inserted_id]),
        "crud_test".to_string(),
        None,
    ))?;
    assert_eq!(delete_result.affected_rows, 1);

    let remaining = connection.query(&QueryRequest::new("SELECT * FROM crud_test"))?;
    assert!(remaining.rows.is_empty());

    Ok(())
}

#[test]
fn paging_and_filtered_count() -> Result<(), DbError> {
    let connection = connect_sqlite()?;

    connection.exec(&QueryRequest::new("CREATE TABLE browse_test (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL)"))?;

    for i in 1..=25 {
        connection.exec(&QueryRequest::new(format!("INSERT INTO browse_test (name) VALUES ('item_{}')", i)))?;
    }

    assert_eq!(connection.count_rows("browse_test", None)?, 25);

    let filtered_count = connection.count_rows("browse_test", Some("\"name\" LIKE 'item_1%'"))?;
    assert!(filtered_count > 0 && filtered_count < 25);

    let page1 = connection.query_page("browse_test", None, Some("\"id\" ASC"), 0, 10)?;
    assert_eq!(page1.rows.len(), 10);

    let page2 = connection.query_page("browse_test", None, Some("\"id\" ASC"), 10, 10)?;
    assert_eq!(page2.rows.len(), 10);
    assert_ne!(page1.rows[0], page2.rows[0]);

    let filtered = connection.query_page("browse_test", Some("\"name\" = 'item_5'"), None, 0, 100)?;
    assert_eq!(filtered.rows.len(), 1);

    Ok(())
}

#[test]
fn estimate_row_count_is_unavailable_and_exact_count_works() -> Result<(), DbError> {
    let connection = connect_sqlite()?;
    connection.exec(&QueryRequest::new("CREATE TABLE t (id INTEGER PRIMARY KEY)"))?;
    assert_eq!(connection.estimate_row_count("t")?, -1);
    assert_eq!(connection.count_rows("t", None)?, 0);
    Ok(())
}

#[test]
fn cancel_handle_is_idempotent() -> Result<(), DbError> {
    let connection = connect_sqlite()?;
    let handle = connection.prepare_cancel().expect("sqlite always exposes a cancel handle");
    handle.cancel()?;
    handle.cancel()?;
    assert!(handle.is_cancelled());
    Ok(())
}
