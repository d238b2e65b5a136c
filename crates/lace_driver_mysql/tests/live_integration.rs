use lace_core::{
    parse_connstr, Connection, DbDriver, DbError, QueryRequest, RecordIdentity, RowDelete,
    RowInsert, RowPatch, Value,
};
use lace_driver_mysql::MySqlDriver;
use lace_test_support::containers::with_mysql_url;

fn with_connection<T>(run: impl FnOnce(Box<dyn Connection>) -> Result<T, DbError>) -> Result<T, DbError> {
    with_mysql_url(|url| {
        let connstr = parse_connstr(&url).map_err(|e| DbError::connection_failed(e.to_string()))?;
        let driver = MySqlDriver::new();
        let connection = driver.connect(&connstr)?;
        assert!(connection.ping());
        run(connection)
    })
}

#[test]
#[ignore = "requires Docker daemon"]
fn connect_ping_query_and_schema() -> Result<(), DbError> {
    with_connection(|connection| {
        connection.exec(&QueryRequest::new(
            "CREATE TABLE users (id INT AUTO_INCREMENT PRIMARY KEY, name TEXT NOT NULL)",
        ))?;
        connection.exec(&QueryRequest::new("INSERT INTO users (name) VALUES ('alice')"))?;

        let result = connection.query(&QueryRequest::new("SELECT id, name FROM users"))?;
        assert_eq!(result.rows.len(), 1);

        let databases = connection.list_databases()?;
        assert!(databases.iter().any(|d| d.is_current));
        assert_eq!(connection.list_tables()?, vec!["users".to_string()]);

        Ok(())
    })
}

#[test]
#[ignore = "requires Docker daemon"]
fn schema_introspection_reports_pk_fk_indexes_and_tinyint_bool() -> Result<(), DbError> {
    with_connection(|connection| {
        connection.exec(&QueryRequest::new(
            "CREATE TABLE test_users (
                id INT AUTO_INCREMENT PRIMARY KEY,
                name VARCHAR(255) NOT NULL,
                email VARCHAR(255) UNIQUE,
                active TINYINT(1) NOT NULL DEFAULT 1
            )",
        ))?;
        connection.exec(&QueryRequest::new(
            "CREATE TABLE test_orders (
                id INT AUTO_INCREMENT PRIMARY KEY,
                user_id INT NOT NULL,
                amount DECIMAL(10,2) NOT NULL,
                FOREIGN KEY (user_id) REFERENCES test_users(id)
            )",
        ))?;
        connection.exec(&QueryRequest::new("CREATE INDEX idx_orders_user_id ON test_orders(user_id)"))?;

        let users_schema = connection.get_table_schema("test_users")?;
        let id_col = users_schema.columns.iter().find(|c| c.name == "id").expect("id column");
        assert!(id_col.primary_key);
        assert!(id_col.auto_increment);

        let name_col = users_schema.columns.iter().find(|c| c.name == "name").expect("name column");
        assert!(!name_col.nullable);

        let active_col = users_schema.columns.iter().find(|c| c.name == "active").expect("active column");
        assert_eq!(active_col.logical_type, lace_core::LogicalType::Bool);

        let orders_schema = connection.get_table_schema("test_orders")?;
        assert!(!orders_schema.indexes.is_empty());
        assert!(!orders_schema.foreign_keys.is_empty());
        let fk = &orders_schema.foreign_keys[0];
        assert_eq!(fk.ref_table, "test_users");
        assert_eq!(fk.ref_column, "id");

        connection.exec(&QueryRequest::new("INSERT INTO test_users (name, active) VALUES ('bob', 0)"))?;
        let rows = connection.query(&QueryRequest::new("SELECT active FROM test_users WHERE name = 'bob'"))?;
        assert_eq!(rows.rows[0][0], Value::Bool(false));

        Ok(())
    })
}

#[test]
#[ignore = "requires Docker daemon"]
fn crud_round_trip_via_reselect_after_mutation() -> Result<(), DbError> {
    with_connection(|connection| {
        connection.exec(&QueryRequest::new(
            "CREATE TABLE crud_test (id INT AUTO_INCREMENT PRIMARY KEY, name TEXT NOT NULL, value INT DEFAULT 0)",
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
    })
}

#[test]
#[ignore = "requires Docker daemon"]
fn paging_and_filtered_count() -> Result<(), DbError> {
    with_connection(|connection| {
        connection.exec(&QueryRequest::new(
            "CREATE TABLE browse_test (id INT AUTO_INCREMENT PRIMARY KEY, name TEXT NOT NULL)",
        ))?;

        for i in 1..=25 {
            connection.exec(&QueryRequest::new(format!("INSERT INTO browse_test (name) VALUES ('item_{}')", i)))?;
        }

        assert_eq!(connection.count_rows("browse_test", None)?, 25);

        let filtered_count = connection.count_rows("browse_test", Some("name LIKE 'item_1%'"))?;
        assert!(filtered_count > 0 && filtered_count < 25);

        let page1 = connection.query_page("browse_test", None, Some("id ASC"), 0, 10)?;
        assert_eq!(page1.rows.len(), 10);

        let page2 = connection.query_page("browse_test", None, Some("id ASC"), 10, 10)?;
        assert_eq!(page2.rows.len(), 10);
        assert_ne!(page1.rows[0], page2.rows[0]);

        let filtered = connection.query_page("browse_test", Some("name = 'item_5'"), None, 0, 100)?;
        assert_eq!(filtered.rows.len(), 1);

        Ok(())
    })
}

#[test]
#[ignore = "requires Docker daemon"]
fn estimate_row_count_is_information_schema_based() -> Result<(), DbError> {
    with_connection(|connection| {
        connection.exec(&QueryRequest::new("CREATE TABLE t (id INT AUTO_INCREMENT PRIMARY KEY)"))?;
        // freshly created, empty table: MySQL's TABLE_ROWS estimate is 0, not unavailable.
        assert_eq!(connection.estimate_row_count("t")?, 0);
        assert_eq!(connection.count_rows("t", None)?, 0);
        Ok(())
    })
}

#[test]
#[ignore = "requires Docker daemon"]
fn cancel_handle_is_idempotent() -> Result<(), DbError> {
    with_connection(|connection| {
        let handle = connection.prepare_cancel().expect("mysql always exposes a cancel handle");
        handle.cancel()?;
        handle.cancel()?;
        assert!(handle.is_cancelled());
        Ok(())
    })
}
