use crate::{DbError, Value};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Default cap on the number of rows a single `query`/`query_page` call
/// returns, per `Connection.max_result_rows`. Drivers truncate to this
/// unless the connection was configured with a different limit.
pub const MAX_RESULT_ROWS: i64 = 1_048_576;

/// Truncate `rows` to `max_result_rows` in place, returning
/// `DbError::ResultTooLarge` with the pre-truncation count when the cap was
/// exceeded. A non-positive `max_result_rows` disables the cap.
pub fn enforce_max_result_rows(rows: &mut Vec<Row>, max_result_rows: i64) -> Result<(), DbError> {
    if max_result_rows <= 0 {
        return Ok(());
    }
    let original_len = rows.len();
    if original_len as i64 <= max_result_rows {
        return Ok(());
    }
    rows.truncate(max_result_rows as usize);
    Err(DbError::ResultTooLarge(original_len as u64))
}

#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
    pub sql: String,
    pub params: Vec<Value>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub statement_timeout: Option<Duration>,
}

impl QueryRequest {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            ..Default::default()
        }
    }

    pub fn with_params(mut self, params: Vec<Value>) -> Self {
        self.params = params;
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }
}

pub type Row = Vec<Value>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    pub type_name: String,
    pub nullable: bool,
}

/// Result of executing a statement.
///
/// `rows_affected` is `-1` for SELECT statements (use `rows.len()`/`total_rows`
/// instead); for INSERT/UPDATE/DELETE it carries the affected row count and
/// `rows`/`columns` are empty. `total_rows` is the full matching count for a
/// SELECT — it may exceed `rows.len()` when only a page was loaded.
/// `source_table` is the single FROM target the driver could attribute every
/// projected column to; when `None`, cell edits are disabled for this result.
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<Row>,
    pub total_rows: i64,
    pub rows_affected: i64,
    pub has_more: bool,
    pub source_table: Option<String>,
    pub error: Option<String>,
    pub execution_time: Duration,
}

impl QueryResult {
    pub fn empty() -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            total_rows: 0,
            rows_affected: -1,
            has_more: false,
            source_table: None,
            error: None,
            execution_time: Duration::ZERO,
        }
    }

    pub fn for_select(columns: Vec<ColumnMeta>, rows: Vec<Row>, total_rows: i64) -> Self {
        Self {
            has_more: (rows.len() as i64) < total_rows,
            columns,
            rows,
            total_rows,
            rows_affected: -1,
            source_table: None,
            error: None,
            execution_time: Duration::ZERO,
        }
    }

    pub fn for_exec(rows_affected: i64) -> Self {
        Self {
            rows_affected,
            ..Self::empty()
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }
}

/// Handle for cancelling a running query.
///
/// Returned by `execute_with_handle()`. The internal data is driver-specific
/// (PostgreSQL cancel token, MySQL connection id) but opaque to the caller.
#[derive(Debug, Clone)]
pub struct QueryHandle {
    pub id: Uuid,
}

impl QueryHandle {
    pub fn new() -> Self {
        Self { id: Uuid::new_v4() }
    }
}

impl Default for QueryHandle {
    fn default() -> Self {
        Self::new()
    }
}
