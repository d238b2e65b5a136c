#![allow(clippy::result_large_err)]

mod arena;
mod async_op;
mod connection_tree;
mod connstr;
mod crud;
mod error;
mod error_formatter;
mod escaper;
mod filter;
mod history;
mod history_manager;
mod paging;
mod profile;
mod query;
mod query_safety;
mod schema;
mod session_store;
mod sql_dialect;
mod sql_query_builder;
mod traits;
mod value;
mod workspace;

pub use arena::{align_up, secure_wipe, secure_wipe_secret, Arena, ArenaMark, StringBuilder};
pub use async_op::{AsyncOperation, OperationKind, OperationState};
pub use connection_tree::{ConnectionTree, ConnectionTreeNode, ConnectionTreeNodeKind, ConnectionTreeStore};
pub use connstr::{parse as parse_connstr, ConnStr, Driver, OptionMap};
pub use crud::{CrudResult, RecordIdentity, RowDelete, RowInsert, RowPatch, RowState, MAX_PK_COLUMNS};
pub use error::DbError;
pub use error_formatter::{
    sanitize_uri, ConnectionErrorFormatter, DefaultErrorFormatter, ErrorLocation, FormattedError,
    QueryErrorFormatter,
};
pub use escaper::{
    build_pk_where, escape_identifier_backtick, escape_identifier_dquote,
    split_qualified_table_dquote, unquote_backtick, unquote_dquote,
};
pub use filter::{
    build_order_by, build_where, Filter, FilterOp, SortDirection, SortEntry, MAX_SORT_COLUMNS,
    RAW_SENTINEL,
};
pub use history::{HistoryEntry, HistoryEntryType, HistoryLog, HistoryStore};
pub use history_manager::HistoryManager;
pub use paging::{resolve_unfiltered_total, PagingWindow, DEFAULT_PAGE_SIZE, ROW_COUNT_EXACT_THRESHOLD};
pub use profile::{ConnectionProfile, ConnectionProfileRecord};
pub use query::{enforce_max_result_rows, ColumnMeta, QueryHandle, QueryRequest, QueryResult, Row, MAX_RESULT_ROWS};
pub use query_safety::is_safe_read_query;
pub use schema::{
    infer_logical_type, infer_logical_type_postgres, ColumnInfo, DatabaseInfo, ForeignKeyInfo,
    ForeignKeyRef, IndexInfo, LogicalType, TableSchema, ViewInfo,
};
pub use session_store::{
    query_tab_request, restore_session, ConnectionPool, DriverRegistry, FilterRecord,
    PasswordPrompt, SessionManifest, SessionSettings, SessionStore, SortRecord, TabRecord,
    TabRestoreOutcome, TabTypeRecord, TabUiState, WorkspaceRecord,
};
pub use sql_dialect::{MySqlDialect, PlaceholderStyle, PostgresDialect, RegexStyle, SqlDialect, SqliteDialect};
pub use sql_query_builder::SqlQueryBuilder;
pub use traits::{
    reselect_after_mutation, Connection, ConnectionStatus, DbDriver, NoopCancelHandle,
    QueryCancelHandle,
};
pub use value::{Value, MAX_FIELD_SIZE};
pub use workspace::{Tab, TabKind, Workspace, WorkspaceSet, MAX_WORKSPACES};

pub use chrono;

/// Safely truncate a string at a character boundary, appending "..." if
/// truncated — used wherever a preview of a SQL statement or value is
/// rendered at a fixed width.
pub fn truncate_string_safe(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }

    let truncate_at = max_len.saturating_sub(3);
    let safe_end = s
        .char_indices()
        .take_while(|(idx, _)| *idx <= truncate_at)
        .last()
        .map(|(idx, _)| idx)
        .unwrap_or(0);

    format!("{}...", &s[..safe_end])
}
