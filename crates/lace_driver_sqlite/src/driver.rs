use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use lace_core::{
    enforce_max_result_rows, reselect_after_mutation, ColumnInfo, ColumnMeta, Connection, ConnStr,
    ConnectionStatus, CrudResult, DbDriver, DbError, ForeignKeyInfo, ForeignKeyRef, FormattedError,
    IndexInfo, LogicalType, QueryCancelHandle, QueryRequest, QueryResult, RecordIdentity, Row,
    RowDelete, RowInsert, RowPatch, SqlDialect, SqlQueryBuilder, SqliteDialect, TableSchema, Value,
    MAX_RESULT_ROWS,
};
use rusqlite::types::ValueRef;
use rusqlite::{Connection as RusqliteConnection, InterruptHandle};

static DIALECT: SqliteDialect = SqliteDialect;

/// Driver factory for embedded SQLite files, registered once at process
/// init alongside the PostgreSQL and MySQL drivers.
pub struct SqliteDriver;

impl SqliteDriver {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SqliteDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl DbDriver for SqliteDriver {
    fn display_name(&self) -> &'static str {
        "SQLite"
    }

    fn connect(&self, connstr: &ConnStr) -> Result<Box<dyn Connection>, DbError> {
        let path = &connstr.database;
        let conn = RusqliteConnection::open(path).map_err(|e| {
            log::warn!("sqlite: failed to open {}: {}", path, e);
            DbError::ConnectionFailed(FormattedError::new(e.to_string()))
        })?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| DbError::ConnectionFailed(FormattedError::new(e.to_string())))?;

        let interrupt_handle = conn.get_interrupt_handle();
        log::debug!("sqlite: connected to {}", path);

        Ok(Box::new(SqliteConnection {
            conn: Mutex::new(conn),
            interrupt_handle,
            cancelled: Arc::new(AtomicBool::new(false)),
            status: Mutex::new(ConnectionStatus::Connected),
            max_result_rows: MAX_RESULT_ROWS,
        }))
    }
}

pub struct SqliteConnection {
    conn: Mutex<RusqliteConnection>,
    interrupt_handle: InterruptHandle,
    cancelled: Arc<AtomicBool>,
    status: Mutex<ConnectionStatus>,
    max_result_rows: i64,
}

pub struct SqliteCancelHandle {
    cancelled: Arc<AtomicBool>,
    interrupt_handle: InterruptHandle,
}

impl QueryCancelHandle for SqliteCancelHandle {
    /// SQLite's cancellation is a soft-interrupt flag the engine polls
    /// between opcodes; there is no protocol-level cancel to send.
    fn cancel(&self) -> Result<(), DbError> {
        log::debug!("sqlite: cancelling running query");
        self.cancelled.store(true, Ordering::SeqCst);
        self.interrupt_handle.interrupt();
        Ok(())
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl SqliteConnection {
    fn run(&self, req: &QueryRequest) -> Result<QueryResult, DbError> {
        self.cancelled.store(false, Ordering::SeqCst);
        let start = Instant::now();

        let conn = self.conn.lock().expect("sqlite connection mutex poisoned");

        let mut stmt = conn.prepare(&req.sql).map_err(|e| self.wrap_error(&e))?;
        let column_names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let columns: Vec<ColumnMeta> = column_names
            .iter()
            .map(|name| ColumnMeta { name: name.clone(), type_name: "TEXT".to_string(), nullable: true })
            .collect();
        let column_count = columns.len();

        let params = bind_params(&req.params);
        let params_ref: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p as &dyn rusqlite::ToSql).collect();

        let mut rows_out: Vec<Row> = Vec::new();
        let mut result_rows = stmt.query(params_ref.as_slice()).map_err(|e| self.wrap_error(&e))?;

        loop {
            match result_rows.next() {
                Ok(Some(row)) => {
                    let mut values = Vec::with_capacity(column_count);
                    for i in 0..column_count {
                        values.push(sqlite_value_to_value(row, i));
                    }
                    rows_out.push(values);
                    if let Some(limit) = req.limit
                        && rows_out.len() >= limit as usize
                    {
                        break;
                    }
                    if self.max_result_rows > 0 && rows_out.len() as i64 > self.max_result_rows {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => return Err(self.wrap_error(&e)),
            }
        }

        enforce_max_result_rows(&mut rows_out, self.max_result_rows)?;
        let mut result = QueryResult::for_select(columns, rows_out, -1);
        result.execution_time = start.elapsed();
        Ok(result)
    }

    fn wrap_error(&self, e: &rusqlite::Error) -> DbError {
        if self.cancelled.load(Ordering::SeqCst) {
            return DbError::Cancelled;
        }
        format_sqlite_error(e)
    }

    fn primary_key_columns(&self, table: &str) -> Result<Vec<(String, bool)>, DbError> {
        let schema = self.get_table_schema(table)?;
        Ok(schema.columns.into_iter().filter(|c| c.primary_key).map(|c| (c.name, c.auto_increment)).collect())
    }
}

impl Connection for SqliteConnection {
    fn disconnect(&mut self) -> Result<(), DbError> {
        log::debug!("sqlite: disconnecting");
        *self.status.lock().expect("status mutex poisoned") = ConnectionStatus::Disconnected;
        Ok(())
    }

    fn ping(&self) -> bool {
        let conn = self.conn.lock().expect("sqlite connection mutex poisoned");
        conn.execute_batch("SELECT 1").is_ok()
    }

    fn status(&self) -> ConnectionStatus {
        *self.status.lock().expect("status mutex poisoned")
    }

    fn list_tables(&self) -> Result<Vec<String>, DbError> {
        let conn = self.conn.lock().expect("sqlite connection mutex poisoned");
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name")
            .map_err(|e| format_sqlite_error(&e))?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| format_sqlite_error(&e))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| format_sqlite_error(&e))?;
        Ok(names)
    }

    fn get_table_schema(&self, qualified_name: &str) -> Result<TableSchema, DbError> {
        let conn = self.conn.lock().expect("sqlite connection mutex poisoned");

        let mut columns = Vec::new();
        {
            let mut stmt = conn
                .prepare(&format!("PRAGMA table_info({})", DIALECT.quote_identifier(qualified_name)))
                .map_err(|e| format_sqlite_error(&e))?;
            let mut pragma_rows = stmt.query([]).map_err(|e| format_sqlite_error(&e))?;
            while let Some(row) = pragma_rows.next().map_err(|e| format_sqlite_error(&e))? {
                let name: String = row.get(1).map_err(|e| format_sqlite_error(&e))?;
                let type_name: String = row.get(2).map_err(|e| format_sqlite_error(&e))?;
                let not_null: i64 = row.get(3).map_err(|e| format_sqlite_error(&e))?;
                let default_expr: Option<String> = row.get(4).map_err(|e| format_sqlite_error(&e))?;
                let pk_index: i64 = row.get(5).map_err(|e| format_sqlite_error(&e))?;

                columns.push(ColumnInfo {
                    name,
                    logical_type: lace_core::infer_logical_type(&type_name),
                    driver_type_name: type_name,
                    nullable: not_null == 0,
                    primary_key: pk_index > 0,
                    auto_increment: pk_index == 1,
                    default_expr,
                    foreign_key_ref: None,
                    max_length: None,
                });
            }
        }

        if columns.is_empty() {
            return Err(DbError::object_not_found(format!("table {} not found", qualified_name)));
        }

        let mut indexes = Vec::new();
        {
            let mut stmt = conn
                .prepare(&format!("PRAGMA index_list({})", DIALECT.quote_identifier(qualified_name)))
                .map_err(|e| format_sqlite_error(&e))?;
            let index_names: Vec<(String, bool, bool)> = stmt
                .query_map([], |row| {
                    let name: String = row.get(1)?;
                    let unique: i64 = row.get(2)?;
                    let origin: String = row.get(3)?;
                    Ok((name, unique != 0, origin == "pk"))
                })
                .map_err(|e| format_sqlite_error(&e))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| format_sqlite_error(&e))?;

            for (index_name, is_unique, is_primary) in index_names {
                let mut info_stmt = conn
                    .prepare(&format!("PRAGMA index_info({})", DIALECT.quote_identifier(&index_name)))
                    .map_err(|e| format_sqlite_error(&e))?;
                let cols: Vec<String> = info_stmt
                    .query_map([], |row| row.get::<_, String>(2))
                    .map_err(|e| format_sqlite_error(&e))?
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| format_sqlite_error(&e))?;
                indexes.push(IndexInfo { name: index_name, columns: cols, is_unique, is_primary });
            }
        }

        let mut foreign_keys = Vec::new();
        {
            let mut stmt = conn
                .prepare(&format!("PRAGMA foreign_key_list({})", DIALECT.quote_identifier(qualified_name)))
                .map_err(|e| format_sqlite_error(&e))?;
            let mut fk_rows = stmt.query([]).map_err(|e| format_sqlite_error(&e))?;
            while let Some(row) = fk_rows.next().map_err(|e| format_sqlite_error(&e))? {
                let ref_table: String = row.get(2).map_err(|e| format_sqlite_error(&e))?;
                let from_col: String = row.get(3).map_err(|e| format_sqlite_error(&e))?;
                let to_col: String = row.get(4).map_err(|e| format_sqlite_error(&e))?;
                foreign_keys.push(ForeignKeyInfo { name: None, column: from_col, ref_table, ref_column: to_col });
            }
        }

        for fk in &foreign_keys {
            if let Some(col) = columns.iter_mut().find(|c| c.name == fk.column) {
                col.foreign_key_ref =
                    Some(ForeignKeyRef { table: fk.ref_table.clone(), column: fk.ref_column.clone() });
            }
        }

        Ok(TableSchema {
            qualified_name: qualified_name.to_string(),
            columns,
            indexes,
            foreign_keys,
            approximate_row_count: None,
        })
    }

    fn query(&self, req: &QueryRequest) -> Result<QueryResult, DbError> {
        self.run(req)
    }

    fn exec(&self, req: &QueryRequest) -> Result<u64, DbError> {
        self.cancelled.store(false, Ordering::SeqCst);
        let conn = self.conn.lock().expect("sqlite connection mutex poisoned");
        let params = bind_params(&req.params);
        let params_ref: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p as &dyn rusqlite::ToSql).collect();
        let affected = conn.execute(&req.sql, params_ref.as_slice()).map_err(|e| self.wrap_error(&e))?;
        Ok(affected as u64)
    }

    fn query_page(
        &self,
        table: &str,
        where_clause: Option<&str>,
        order_by: Option<&str>,
        offset: u32,
        limit: u32,
    ) -> Result<QueryResult, DbError> {
        let mut sql = format!("SELECT * FROM {}", DIALECT.quote_identifier(table));
        if let Some(w) = where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(w);
        }
        if let Some(o) = order_by {
            sql.push_str(" ORDER BY ");
            sql.push_str(o);
        }
        sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset));

        let mut result = self.run(&QueryRequest::new(sql))?;
        result.source_table = Some(table.to_string());
        Ok(result)
    }

    fn update_row(&self, patch: &RowPatch) -> Result<CrudResult, DbError> {
        let builder = SqlQueryBuilder::new(&DIALECT);
        let Some((sql, params)) = builder.build_update(patch, false) else {
            return Ok(CrudResult::empty());
        };
        let affected = self.exec(&QueryRequest::new(sql).with_params(params))?;
        if affected == 0 {
            return Ok(CrudResult::empty());
        }
        let row = reselect_after_mutation(self, &DIALECT, patch.schema.as_deref(), &patch.table, &patch.identity)?;
        Ok(CrudResult::new(affected, row))
    }

    fn insert_row(&self, insert: &RowInsert) -> Result<CrudResult, DbError> {
        let builder = SqlQueryBuilder::new(&DIALECT);
        let Some((sql, params)) = builder.build_insert(insert, false) else {
            return Ok(CrudResult::empty());
        };
        self.exec(&QueryRequest::new(sql).with_params(params))?;

        let rowid = {
            let conn = self.conn.lock().expect("sqlite connection mutex poisoned");
            conn.last_insert_rowid()
        };

        let pk_columns = self.primary_key_columns(&insert.table)?;
        let row = if pk_columns.len() == 1 && pk_columns[0].1 {
            let identity = RecordIdentity::composite(vec![pk_columns[0].0.clone()], vec![Value::Int(rowid)]);
            reselect_after_mutation(self, &DIALECT, insert.schema.as_deref(), &insert.table, &identity)?
        } else {
            None
        };

        Ok(CrudResult::new(1, row))
    }

    fn delete_row(&self, delete: &RowDelete) -> Result<CrudResult, DbError> {
        let builder = SqlQueryBuilder::new(&DIALECT);
        let Some((sql, params)) = builder.build_delete(delete, false) else {
            return Ok(CrudResult::empty());
        };
        let affected = self.exec(&QueryRequest::new(sql).with_params(params))?;
        Ok(CrudResult::new(affected, None))
    }

    fn prepare_cancel(&self) -> Option<Arc<dyn QueryCancelHandle>> {
        Some(Arc::new(SqliteCancelHandle {
            cancelled: Arc::clone(&self.cancelled),
            interrupt_handle: self.interrupt_handle.clone(),
        }))
    }

    fn dialect(&self) -> &dyn SqlDialect {
        &DIALECT
    }

    /// SQLite keeps no statistics table cheap enough to estimate from;
    /// every caller falls back to an exact `COUNT(*)`, per §4.4.
    fn estimate_row_count(&self, _table: &str) -> Result<i64, DbError> {
        Ok(-1)
    }

    fn count_rows(&self, table: &str, where_clause: Option<&str>) -> Result<i64, DbError> {
        let mut sql = format!("SELECT COUNT(*) FROM {}", DIALECT.quote_identifier(table));
        if let Some(w) = where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(w);
        }
        let result = self.run(&QueryRequest::new(sql))?;
        Ok(result.rows.first().and_then(|r| r.first()).and_then(|v| v.to_int()).unwrap_or(0))
    }
}

fn bind_params(values: &[Value]) -> Vec<rusqlite::types::Value> {
    values.iter().map(value_to_rusqlite).collect()
}

fn value_to_rusqlite(value: &Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as RV;
    match value {
        Value::Null => RV::Null,
        Value::Bool(b) => RV::Integer(*b as i64),
        Value::Int(i) => RV::Integer(*i),
        Value::Float(f) => RV::Real(*f),
        Value::Text(s) | Value::Json(s) | Value::Decimal(s) => RV::Text(s.clone()),
        Value::Bytes(b) => RV::Blob(b.clone()),
        Value::DateTime(dt) => RV::Text(dt.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
        Value::Date(d) => RV::Text(d.format("%Y-%m-%d").to_string()),
        Value::Time(t) => RV::Text(t.format("%H:%M:%S%.f").to_string()),
    }
}

fn sqlite_value_to_value(row: &rusqlite::Row, idx: usize) -> Value {
    match row.get_ref(idx) {
        Ok(ValueRef::Null) => Value::Null,
        Ok(ValueRef::Integer(i)) => Value::Int(i),
        Ok(ValueRef::Real(f)) => Value::Float(f),
        Ok(ValueRef::Text(t)) => match std::str::from_utf8(t) {
            Ok(s) => Value::text_checked(s),
            Err(_) => Value::bytes_checked(t.to_vec()),
        },
        Ok(ValueRef::Blob(b)) => Value::bytes_checked(b.to_vec()),
        Err(_) => Value::Null,
    }
}

fn format_sqlite_error(e: &rusqlite::Error) -> DbError {
    match e {
        rusqlite::Error::SqliteFailure(err, msg) => {
            let message = msg.clone().unwrap_or_else(|| format!("{:?}", err.code));
            let formatted = FormattedError::new(message).with_code(format!("{:?}", err.code));
            match err.code {
                rusqlite::ErrorCode::ConstraintViolation => DbError::ConstraintViolation(formatted),
                _ => DbError::QueryFailed(formatted),
            }
        }
        other => DbError::query_failed(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_memory() -> SqliteConnection {
        let conn = RusqliteConnection::open_in_memory().unwrap();
        let interrupt_handle = conn.get_interrupt_handle();
        SqliteConnection {
            conn: Mutex::new(conn),
            interrupt_handle,
            cancelled: Arc::new(AtomicBool::new(false)),
            status: Mutex::new(ConnectionStatus::Connected),
            max_result_rows: MAX_RESULT_ROWS,
        }
    }

    fn seed(conn: &SqliteConnection) {
        conn.exec(&QueryRequest::new(
            "CREATE TABLE users (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL, age INTEGER)",
        ))
        .unwrap();
        conn.exec(&QueryRequest::new("INSERT INTO users (name, age) VALUES ('Alice', 30), ('Bob', 25)"))
            .unwrap();
    }

    #[test]
    fn lists_tables_excluding_sqlite_internal() {
        let conn = open_memory();
        seed(&conn);
        assert_eq!(conn.list_tables().unwrap(), vec!["users".to_string()]);
    }

    #[test]
    fn schema_reports_primary_key_and_types() {
        let conn = open_memory();
        seed(&conn);
        let schema = conn.get_table_schema("users").unwrap();
        assert_eq!(schema.columns.len(), 3);
        let id_col = schema.columns.iter().find(|c| c.name == "id").unwrap();
        assert!(id_col.primary_key);
        assert!(id_col.auto_increment);
        assert_eq!(id_col.logical_type, LogicalType::Int);
    }

    #[test]
    fn query_page_applies_offset_and_limit() {
        let conn = open_memory();
        seed(&conn);
        let page = conn.query_page("users", None, Some("\"id\" ASC"), 1, 1).unwrap();
        assert_eq!(page.rows.len(), 1);
        assert_eq!(page.rows[0][1], Value::Text("Bob".to_string()));
        assert_eq!(page.source_table.as_deref(), Some("users"));
    }

    #[test]
    fn count_rows_matches_filtered_predicate() {
        let conn = open_memory();
        seed(&conn);
        assert_eq!(conn.count_rows("users", None).unwrap(), 2);
        assert_eq!(conn.count_rows("users", Some("\"age\" >= 30")).unwrap(), 1);
    }

    #[test]
    fn estimate_row_count_is_always_unavailable() {
        let conn = open_memory();
        seed(&conn);
        assert_eq!(conn.estimate_row_count("users").unwrap(), -1);
    }

    #[test]
    fn update_row_reselects_and_returns_new_value() {
        let conn = open_memory();
        seed(&conn);
        let identity = RecordIdentity::composite(vec!["id".to_string()], vec![Value::Int(1)]);
        let patch = RowPatch::new(
            identity,
            "users".to_string(),
            None,
            vec![("name".to_string(), Value::Text("Alicia".to_string()))],
        );
        let result = conn.update_row(&patch).unwrap();
        assert_eq!(result.affected_rows, 1);
        let row = result.returning_row.unwrap();
        assert_eq!(row[1], Value::Text("Alicia".to_string()));
    }

    #[test]
    fn insert_row_returns_autoincrement_identity() {
        let conn = open_memory();
        seed(&conn);
        let insert = RowInsert::new(
            "users".to_string(),
            None,
            vec!["name".to_string(), "age".to_string()],
            vec![Value::Text("Carol".to_string()), Value::Int(40)],
        );
        let result = conn.insert_row(&insert).unwrap();
        assert_eq!(result.affected_rows, 1);
        let row = result.returning_row.unwrap();
        assert_eq!(row[1], Value::Text("Carol".to_string()));
    }

    #[test]
    fn delete_row_removes_matching_identity() {
        let conn = open_memory();
        seed(&conn);
        let identity = RecordIdentity::composite(vec!["id".to_string()], vec![Value::Int(2)]);
        let delete = RowDelete::new(identity, "users".to_string(), None);
        let result = conn.delete_row(&delete).unwrap();
        assert_eq!(result.affected_rows, 1);
        assert_eq!(conn.count_rows("users", None).unwrap(), 1);
    }

    #[test]
    fn run_truncates_and_errors_past_max_result_rows() {
        let mut conn = open_memory();
        seed(&conn);
        conn.max_result_rows = 1;
        let err = conn.run(&QueryRequest::new("SELECT * FROM users")).unwrap_err();
        assert!(matches!(err, DbError::ResultTooLarge(2)));
    }

    #[test]
    fn cancel_handle_interrupts_engine() {
        let conn = open_memory();
        seed(&conn);
        let handle = conn.prepare_cancel().unwrap();
        assert!(!handle.is_cancelled());
        handle.cancel().unwrap();
        assert!(handle.is_cancelled());
    }
}
