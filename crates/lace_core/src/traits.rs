use std::sync::Arc;

use crate::{
    CrudResult, DatabaseInfo, DbError, QueryRequest, QueryResult, RecordIdentity, RowDelete,
    RowInsert, RowPatch, SqlDialect, TableSchema,
};

/// Liveness of a connection as last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Error,
}

/// Handle for cancelling a running query.
///
/// Each database driver implements this trait to provide database-specific
/// cancellation logic: SQLite polls a soft-interrupt flag, PostgreSQL sends
/// a protocol-level cancel request, MySQL issues `KILL QUERY` on a side
/// connection. The handle is obtained with `Connection::prepare_cancel`
/// before a long-running call and freed after.
pub trait QueryCancelHandle: Send + Sync {
    /// Attempt to cancel the in-flight query. Best-effort: the query may
    /// have already completed, or the driver may not support cancellation.
    fn cancel(&self) -> Result<(), DbError>;

    /// Check if cancellation has been requested.
    fn is_cancelled(&self) -> bool;
}

/// A no-op cancel handle for drivers that don't support cancellation.
#[derive(Clone)]
pub struct NoopCancelHandle;

impl QueryCancelHandle for NoopCancelHandle {
    fn cancel(&self) -> Result<(), DbError> {
        Ok(())
    }

    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Factory for creating database connections, one implementation per
/// supported engine (SQLite, PostgreSQL, MySQL/MariaDB).
pub trait DbDriver: Send + Sync {
    /// Human-readable name for UI display (e.g., "PostgreSQL").
    fn display_name(&self) -> &'static str;

    /// Open a connection from a parsed connection string.
    fn connect(&self, connstr: &crate::connstr::ConnStr) -> Result<Box<dyn Connection>, DbError>;
}

/// Active database connection. The UI and async runner interact
/// exclusively through this trait, never accessing driver internals.
/// Implementations must be thread-safe (`Send + Sync`): a connection is
/// invoked only from the single async worker that currently owns it, but
/// the owning thread may change between operations.
pub trait Connection: Send + Sync {
    /// Close the connection and release resources.
    fn disconnect(&mut self) -> Result<(), DbError>;

    /// Attempts a silent reconnect on failure; returns whether the
    /// connection is alive afterward. Typically issues `SELECT 1`.
    fn ping(&self) -> bool;

    /// Current liveness as last observed (no I/O).
    fn status(&self) -> ConnectionStatus;

    /// List all tables (and views) visible to this connection, qualified
    /// per §3's `TableSchema::qualified_name` convention.
    fn list_tables(&self) -> Result<Vec<String>, DbError>;

    /// List databases on the server. Returns an empty list for SQLite.
    fn list_databases(&self) -> Result<Vec<DatabaseInfo>, DbError> {
        Ok(Vec::new())
    }

    /// Fetch full schema for one table: columns, indexes, foreign keys.
    fn get_table_schema(&self, qualified_name: &str) -> Result<TableSchema, DbError>;

    /// Execute a SQL statement and return a result set. Used for SELECT
    /// and for DDL that returns no rows.
    fn query(&self, req: &QueryRequest) -> Result<QueryResult, DbError>;

    /// Execute a mutating statement (INSERT/UPDATE/DELETE) and return the
    /// number of affected rows.
    fn exec(&self, req: &QueryRequest) -> Result<u64, DbError>;

    /// Fetch one page of a table: `OFFSET offset LIMIT limit`, optionally
    /// ordered. `where_clause`, when present, is appended verbatim (already
    /// compiled by the filter compiler).
    fn query_page(
        &self,
        table: &str,
        where_clause: Option<&str>,
        order_by: Option<&str>,
        offset: u32,
        limit: u32,
    ) -> Result<QueryResult, DbError>;

    /// Update one row identified by its (possibly composite) primary key.
    /// Returns the post-update row when the driver can cheaply provide one
    /// (`RETURNING` on PostgreSQL, re-select on SQLite/MySQL).
    fn update_row(&self, patch: &RowPatch) -> Result<CrudResult, DbError>;

    /// Insert a new row, returning the inserted row when available.
    fn insert_row(&self, insert: &RowInsert) -> Result<CrudResult, DbError>;

    /// Delete a row identified by its primary key.
    fn delete_row(&self, delete: &RowDelete) -> Result<CrudResult, DbError>;

    /// Begin a transaction. Optional: most operations here are autocommit
    /// single statements: Non-goals exclude transaction orchestration.
    fn begin(&self) -> Result<(), DbError> {
        Err(DbError::NotSupported("transactions not supported by this driver".to_string()))
    }

    fn commit(&self) -> Result<(), DbError> {
        Err(DbError::NotSupported("transactions not supported by this driver".to_string()))
    }

    fn rollback(&self) -> Result<(), DbError> {
        Err(DbError::NotSupported("transactions not supported by this driver".to_string()))
    }

    /// Obtain a cancel handle for a call about to be made on this
    /// connection. Called by the async runner before dispatching to the
    /// driver; `None` when the driver has nothing meaningful to cancel.
    fn prepare_cancel(&self) -> Option<Arc<dyn QueryCancelHandle>> {
        None
    }

    /// Returns the SQL dialect for this connection, used by the filter
    /// compiler and CRUD statement builder.
    fn dialect(&self) -> &dyn SqlDialect;

    /// Approximate row count for a table, or `-1` when unavailable.
    /// SQLite always returns `-1` (no cheap estimate); PostgreSQL reads
    /// `pg_class.reltuples`; MySQL reads `information_schema.tables`.
    fn estimate_row_count(&self, table: &str) -> Result<i64, DbError>;

    /// Exact row count for a table, optionally filtered by a
    /// pre-compiled WHERE fragment.
    fn count_rows(&self, table: &str, where_clause: Option<&str>) -> Result<i64, DbError>;
}

/// Convenience used by drivers lacking `RETURNING`: re-fetch a row by
/// identity after a mutation so `CrudResult::returning_row` is populated.
pub fn reselect_after_mutation(
    conn: &dyn Connection,
    dialect: &dyn SqlDialect,
    schema: Option<&str>,
    table: &str,
    identity: &RecordIdentity,
) -> Result<Option<crate::Row>, DbError> {
    use crate::sql_query_builder::SqlQueryBuilder;

    let builder = SqlQueryBuilder::new(dialect);
    let Some((sql, params)) = builder.build_select_by_identity(schema, table, identity) else {
        return Ok(None);
    };

    let result = conn.query(&QueryRequest::new(sql).with_params(params))?;
    Ok(result.rows.into_iter().next())
}
