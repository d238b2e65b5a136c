//! An in-memory [`DbDriver`]/[`Connection`] pair for exercising callers of
//! `lace_core` (the async runner, the UI layer) without a real backend.
//!
//! Every operation is configurable ahead of time via [`FakeDriver`]'s
//! builder methods; calls are counted in [`FakeDriverStats`] so tests can
//! assert on what was actually invoked.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use lace_core::{
    ConnStr, Connection, ConnectionStatus, CrudResult, DatabaseInfo, DbDriver, DbError,
    QueryCancelHandle, QueryRequest, QueryResult, RowDelete, RowInsert, RowPatch, SqlDialect,
    SqliteDialect, TableSchema,
};

/// Canned outcome for a `query`/`query_page` call.
#[derive(Debug, Clone)]
pub enum FakeQueryOutcome {
    Rows(QueryResult),
    Fail(String),
}

impl FakeQueryOutcome {
    fn into_result(self) -> Result<QueryResult, DbError> {
        match self {
            Self::Rows(r) => Ok(r),
            Self::Fail(msg) => Err(DbError::query_failed(msg)),
        }
    }
}

/// Call counters, shared between a [`FakeDriver`] and every [`FakeConnection`]
/// it hands out, so tests can inspect activity after the fact.
#[derive(Debug, Default)]
pub struct FakeDriverStats {
    pub connect_calls: AtomicU64,
    pub query_calls: AtomicU64,
    pub exec_calls: AtomicU64,
    pub ping_calls: AtomicU64,
    pub cancel_calls: AtomicU64,
}

/// Configurable fake implementation of [`DbDriver`].
///
/// Construct with [`FakeDriver::new`], configure the canned responses it
/// should hand back, then call `connect` (directly, or through the
/// `DbDriver` trait) to obtain a [`FakeConnection`].
pub struct FakeDriver {
    display_name: &'static str,
    fail_connect: Mutex<Option<String>>,
    schema: Mutex<Option<TableSchema>>,
    tables: Mutex<Vec<String>>,
    databases: Mutex<Vec<DatabaseInfo>>,
    query_outcomes: Mutex<Vec<FakeQueryOutcome>>,
    exec_result: Mutex<Result<u64, String>>,
    estimate_row_count: Mutex<i64>,
    row_count: Mutex<i64>,
    ping_result: Arc<AtomicBool>,
    stats: Arc<FakeDriverStats>,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self {
            display_name: "Fake",
            fail_connect: Mutex::new(None),
            schema: Mutex::new(None),
            tables: Mutex::new(Vec::new()),
            databases: Mutex::new(Vec::new()),
            query_outcomes: Mutex::new(Vec::new()),
            exec_result: Mutex::new(Ok(0)),
            estimate_row_count: Mutex::new(-1),
            row_count: Mutex::new(0),
            ping_result: Arc::new(AtomicBool::new(true)),
            stats: Arc::new(FakeDriverStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<FakeDriverStats> {
        Arc::clone(&self.stats)
    }

    pub fn fail_connect_with(&self, msg: impl Into<String>) {
        *self.fail_connect.lock().unwrap() = Some(msg.into());
    }

    pub fn with_tables(self, tables: Vec<String>) -> Self {
        *self.tables.lock().unwrap() = tables;
        self
    }

    pub fn with_databases(self, databases: Vec<DatabaseInfo>) -> Self {
        *self.databases.lock().unwrap() = databases;
        self
    }

    pub fn with_schema(self, schema: TableSchema) -> Self {
        *self.schema.lock().unwrap() = Some(schema);
        self
    }

    pub fn with_query_outcome(self, outcome: FakeQueryOutcome) -> Self {
        self.query_outcomes.lock().unwrap().push(outcome);
        self
    }

    pub fn with_exec_result(self, affected_rows: u64) -> Self {
        *self.exec_result.lock().unwrap() = Ok(affected_rows);
        self
    }

    pub fn with_exec_failure(self, msg: impl Into<String>) -> Self {
        *self.exec_result.lock().unwrap() = Err(msg.into());
        self
    }

    pub fn with_estimate_row_count(self, estimate: i64) -> Self {
        *self.estimate_row_count.lock().unwrap() = estimate;
        self
    }

    pub fn with_row_count(self, count: i64) -> Self {
        *self.row_count.lock().unwrap() = count;
        self
    }

    pub fn set_ping(&self, alive: bool) {
        self.ping_result.store(alive, Ordering::SeqCst);
    }
}

impl Default for FakeDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl DbDriver for FakeDriver {
    fn display_name(&self) -> &'static str {
        self.display_name
    }

    fn connect(&self, _connstr: &ConnStr) -> Result<Box<dyn Connection>, DbError> {
        self.stats.connect_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(msg) = self.fail_connect.lock().unwrap().clone() {
            return Err(DbError::connection_failed(msg));
        }

        Ok(Box::new(FakeConnection {
            schema: Mutex::new(self.schema.lock().unwrap().clone()),
            tables: Mutex::new(self.tables.lock().unwrap().clone()),
            databases: Mutex::new(self.databases.lock().unwrap().clone()),
            query_outcomes: Mutex::new(self.query_outcomes.lock().unwrap().clone()),
            exec_result: Mutex::new(self.exec_result.lock().unwrap().clone()),
            estimate_row_count: *self.estimate_row_count.lock().unwrap(),
            row_count: *self.row_count.lock().unwrap(),
            ping_result: Arc::clone(&self.ping_result),
            status: Mutex::new(ConnectionStatus::Connected),
            dialect: SqliteDialect,
            stats: Arc::clone(&self.stats),
        }))
    }
}

/// Connection handed out by [`FakeDriver::connect`].
pub struct FakeConnection {
    schema: Mutex<Option<TableSchema>>,
    tables: Mutex<Vec<String>>,
    databases: Mutex<Vec<DatabaseInfo>>,
    query_outcomes: Mutex<Vec<FakeQueryOutcome>>,
    exec_result: Mutex<Result<u64, String>>,
    estimate_row_count: i64,
    row_count: i64,
    ping_result: Arc<AtomicBool>,
    status: Mutex<ConnectionStatus>,
    dialect: SqliteDialect,
    stats: Arc<FakeDriverStats>,
}

impl FakeConnection {
    fn next_query_outcome(&self) -> Result<QueryResult, DbError> {
        self.stats.query_calls.fetch_add(1, Ordering::SeqCst);
        let mut outcomes = self.query_outcomes.lock().unwrap();
        if outcomes.is_empty() {
            return Ok(QueryResult::empty());
        }
        outcomes.remove(0).into_result()
    }
}

impl Connection for FakeConnection {
    fn disconnect(&mut self) -> Result<(), DbError> {
        *self.status.lock().unwrap() = ConnectionStatus::Disconnected;
        Ok(())
    }

    fn ping(&self) -> bool {
        self.stats.ping_calls.fetch_add(1, Ordering::SeqCst);
        self.ping_result.load(Ordering::SeqCst)
    }

    fn status(&self) -> ConnectionStatus {
        *self.status.lock().unwrap()
    }

    fn list_tables(&self) -> Result<Vec<String>, DbError> {
        Ok(self.tables.lock().unwrap().clone())
    }

    fn list_databases(&self) -> Result<Vec<DatabaseInfo>, DbError> {
        Ok(self.databases.lock().unwrap().clone())
    }

    fn get_table_schema(&self, qualified_name: &str) -> Result<TableSchema, DbError> {
        self.schema
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| DbError::object_not_found(format!("no fake schema for {qualified_name}")))
    }

    fn query(&self, _req: &QueryRequest) -> Result<QueryResult, DbError> {
        self.next_query_outcome()
    }

    fn exec(&self, _req: &QueryRequest) -> Result<u64, DbError> {
        self.stats.exec_calls.fetch_add(1, Ordering::SeqCst);
        self.exec_result
            .lock()
            .unwrap()
            .clone()
            .map_err(DbError::query_failed)
    }

    fn query_page(
        &self,
        _table: &str,
        _where_clause: Option<&str>,
        _order_by: Option<&str>,
        _offset: u32,
        _limit: u32,
    ) -> Result<QueryResult, DbError> {
        self.next_query_outcome()
    }

    fn update_row(&self, patch: &RowPatch) -> Result<CrudResult, DbError> {
        let affected = self.exec_result.lock().unwrap().clone().map_err(DbError::query_failed)?;
        if affected == 0 {
            return Ok(CrudResult::empty());
        }
        let row = patch
            .identity
            .values
            .iter()
            .cloned()
            .chain(patch.changes.iter().map(|(_, v)| v.clone()))
            .collect();
        Ok(CrudResult::success(row))
    }

    fn insert_row(&self, insert: &RowInsert) -> Result<CrudResult, DbError> {
        let affected = self.exec_result.lock().unwrap().clone().map_err(DbError::query_failed)?;
        if affected == 0 {
            return Ok(CrudResult::empty());
        }
        Ok(CrudResult::success(insert.values.clone()))
    }

    fn delete_row(&self, _delete: &RowDelete) -> Result<CrudResult, DbError> {
        let affected = self.exec_result.lock().unwrap().clone().map_err(DbError::query_failed)?;
        Ok(CrudResult::new(affected, None))
    }

    fn prepare_cancel(&self) -> Option<Arc<dyn QueryCancelHandle>> {
        Some(Arc::new(FakeCancelHandle {
            cancelled: Arc::new(AtomicBool::new(false)),
            stats: Arc::clone(&self.stats),
        }))
    }

    fn dialect(&self) -> &dyn SqlDialect {
        &self.dialect
    }

    fn estimate_row_count(&self, _table: &str) -> Result<i64, DbError> {
        Ok(self.estimate_row_count)
    }

    fn count_rows(&self, _table: &str, _where_clause: Option<&str>) -> Result<i64, DbError> {
        Ok(self.row_count)
    }
}

struct FakeCancelHandle {
    cancelled: Arc<AtomicBool>,
    stats: Arc<FakeDriverStats>,
}

impl QueryCancelHandle for FakeCancelHandle {
    fn cancel(&self) -> Result<(), DbError> {
        self.stats.cancel_calls.fetch_add(1, Ordering::SeqCst);
        self.cancelled.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lace_core::{ColumnInfo, LogicalType};

    fn sample_schema() -> TableSchema {
        TableSchema {
            qualified_name: "users".to_string(),
            columns: vec![ColumnInfo {
                name: "id".to_string(),
                logical_type: LogicalType::Int,
                driver_type_name: "INTEGER".to_string(),
                nullable: false,
                primary_key: true,
                auto_increment: true,
                default_expr: None,
                foreign_key_ref: None,
                max_length: None,
            }],
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
            approximate_row_count: None,
        }
    }

    #[test]
    fn connect_fails_when_configured() {
        let driver = FakeDriver::new();
        driver.fail_connect_with("boom");
        let connstr = lace_core::parse_connstr("sqlite://./ignored.db").unwrap();
        let err = driver.connect(&connstr).unwrap_err();
        assert!(matches!(err, DbError::ConnectionFailed(_)));
    }

    #[test]
    fn tracks_call_counts() {
        let driver = FakeDriver::new().with_tables(vec!["users".to_string()]);
        let stats = driver.stats();
        let connstr = lace_core::parse_connstr("sqlite://./ignored.db").unwrap();
        let conn = driver.connect(&connstr).unwrap();

        assert!(conn.ping());
        assert_eq!(conn.list_tables().unwrap(), vec!["users".to_string()]);
        assert_eq!(stats.connect_calls.load(Ordering::SeqCst), 1);
        assert_eq!(stats.ping_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn get_table_schema_returns_configured_schema() {
        let driver = FakeDriver::new().with_schema(sample_schema());
        let connstr = lace_core::parse_connstr("sqlite://./ignored.db").unwrap();
        let conn = driver.connect(&connstr).unwrap();

        let schema = conn.get_table_schema("users").unwrap();
        assert_eq!(schema.qualified_name, "users");
        assert_eq!(schema.primary_key_columns(), vec!["id"]);
    }

    #[test]
    fn cancel_handle_reports_cancelled() {
        let driver = FakeDriver::new();
        let connstr = lace_core::parse_connstr("sqlite://./ignored.db").unwrap();
        let conn = driver.connect(&connstr).unwrap();

        let handle = conn.prepare_cancel().unwrap();
        assert!(!handle.is_cancelled());
        handle.cancel().unwrap();
        assert!(handle.is_cancelled());
    }
}
