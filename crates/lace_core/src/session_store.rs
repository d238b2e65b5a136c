//! Workspace/tab session persistence and restore, per the external JSON
//! schema at `<config_dir>/session.json`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::connection_tree::ConnectionTree;
use crate::connstr::{ConnStr, Driver};
use crate::filter::{Filter, FilterOp, SortDirection, SortEntry};
use crate::paging::{resolve_unfiltered_total, PagingWindow, DEFAULT_PAGE_SIZE};
use crate::query::QueryRequest;
use crate::traits::{Connection, DbDriver};
use crate::workspace::{Tab, TabKind, Workspace, WorkspaceSet};
use crate::DbError;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

const MAX_SESSION_FILE_BYTES: u64 = 10 * 1024 * 1024;
const SESSION_FILE: &str = "session.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub header_visible: bool,
    pub status_visible: bool,
    pub page_size: u32,
    /// When unset, cursor/scroll and inner-panel cursors are not restored
    /// from a saved session — only visibility flags always persist.
    pub restore_cursor_position: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            header_visible: true,
            status_visible: true,
            page_size: DEFAULT_PAGE_SIZE,
            restore_cursor_position: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TabTypeRecord {
    Table,
    Query,
    Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SortRecord {
    pub column: String,
    pub direction: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterRecord {
    pub column: String,
    pub op: i32,
    pub value: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TabUiState {
    pub sidebar_visible: bool,
    pub focused_panel: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TabRecord {
    #[serde(rename = "type")]
    pub tab_type: TabTypeRecord,
    pub connection_id: Uuid,
    pub table_name: Option<String>,
    pub cursor: [u64; 2],
    pub scroll: [u64; 2],
    pub sort: Vec<SortRecord>,
    pub filters: Vec<FilterRecord>,
    pub query_text: Option<String>,
    pub query_cursor: Option<[usize; 2]>,
    pub query_scroll_line: Option<usize>,
    pub query_scroll_col: Option<usize>,
    pub ui: TabUiState,
}

impl Default for TabRecord {
    fn default() -> Self {
        Self {
            tab_type: TabTypeRecord::Connection,
            connection_id: Uuid::nil(),
            table_name: None,
            cursor: [0, 0],
            scroll: [0, 0],
            sort: Vec::new(),
            filters: Vec::new(),
            query_text: None,
            query_cursor: None,
            query_scroll_line: None,
            query_scroll_col: None,
            ui: TabUiState::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceRecord {
    pub name: String,
    pub current_tab: usize,
    pub tabs: Vec<TabRecord>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionManifest {
    pub settings: SessionSettings,
    pub workspaces: Vec<WorkspaceRecord>,
    pub current_workspace: usize,
}

impl Default for TabTypeRecord {
    fn default() -> Self {
        TabTypeRecord::Connection
    }
}

/// Reads/writes `<config_dir>/session.json`. Tolerant of a missing,
/// corrupt, or oversized file: all three are treated as "no prior session"
/// rather than a hard error, per the restore algorithm's first step.
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new() -> Result<Self, DbError> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| DbError::IoError(std::io::Error::other("could not resolve config directory")))?;
        std::fs::create_dir_all(&config_dir).map_err(DbError::IoError)?;
        Ok(Self::at_path(config_dir.join(SESSION_FILE)))
    }

    pub fn at_path(path: PathBuf) -> Self {
        Self { path }
    }

    /// Parse the file, substituting defaults for missing/mistyped fields
    /// rather than failing outright. A missing file or one over the size
    /// cap returns an empty manifest.
    pub fn load(&self) -> SessionManifest {
        let Ok(metadata) = std::fs::metadata(&self.path) else {
            return SessionManifest::default();
        };
        if metadata.len() > MAX_SESSION_FILE_BYTES {
            return SessionManifest::default();
        }
        let Ok(content) = std::fs::read_to_string(&self.path) else {
            return SessionManifest::default();
        };
        serde_json::from_str(&content).unwrap_or_default()
    }

    /// Persist `manifest`, unless `has_active_connection` is false, in
    /// which case any existing file is deleted instead.
    pub fn save(&self, manifest: &SessionManifest, has_active_connection: bool) -> Result<(), DbError> {
        if !has_active_connection {
            if self.path.exists() {
                std::fs::remove_file(&self.path).map_err(DbError::IoError)?;
            }
            return Ok(());
        }

        let content = serde_json::to_string_pretty(manifest)
            .map_err(|e| DbError::InvalidProfile(e.to_string()))?;
        std::fs::write(&self.path, content).map_err(DbError::IoError)?;
        enforce_owner_only(&self.path)?;
        Ok(())
    }
}

#[cfg(unix)]
fn enforce_owner_only(path: &std::path::Path) -> Result<(), DbError> {
    let mut perms = std::fs::metadata(path).map_err(DbError::IoError)?.permissions();
    perms.set_mode(0o600);
    std::fs::set_permissions(path, perms).map_err(DbError::IoError)
}

#[cfg(not(unix))]
fn enforce_owner_only(_path: &std::path::Path) -> Result<(), DbError> {
    Ok(())
}

/// Host hook for the auth-retry loop in step 2 of the restore algorithm.
/// `None` means no interactive host is available, so an auth failure skips
/// the tab instead of looping.
pub trait PasswordPrompt {
    /// Ask the user for a password for `profile_name`. `None` means the
    /// user cancelled.
    fn prompt(&self, profile_name: &str) -> Option<String>;
}

/// Resolves a `Driver` to the `DbDriver` implementation that opens it.
pub trait DriverRegistry {
    fn driver_for(&self, driver: Driver) -> Option<&dyn DbDriver>;
}

/// Looks up (or opens) the live `Connection` for a `connstr`, reusing a
/// pooled entry when one matches.
pub trait ConnectionPool {
    fn get_or_connect(
        &mut self,
        connection_id: Uuid,
        connstr: &ConnStr,
        driver: &dyn DbDriver,
    ) -> Result<(), DbError>;

    fn connection(&self, connection_id: Uuid) -> Option<&dyn Connection>;
}

/// Outcome of restoring a single tab: either a ready `Tab`, or a skip
/// reason (non-auth connection failure, vanished table, etc).
pub enum TabRestoreOutcome {
    Restored(Tab),
    Skipped { reason: String },
}

/// Runs the restore algorithm from §4.12: reconnect per tab (retrying
/// through an auth-failure/password-prompt loop when a host callback is
/// registered), re-resolve schema-dependent state, re-page to the saved
/// cursor, and drop tabs or whole workspaces that can't be revived.
///
/// A single bad tab never aborts the rest of the workspace; the overall
/// restore only fails if it ends with zero workspaces.
pub fn restore_session(
    manifest: &SessionManifest,
    tree: &ConnectionTree,
    registry: &dyn DriverRegistry,
    pool: &mut dyn ConnectionPool,
    password_prompt: Option<&dyn PasswordPrompt>,
) -> Result<WorkspaceSet, DbError> {
    let mut set = WorkspaceSet::new();

    for ws_record in &manifest.workspaces {
        let mut workspace = Workspace::new(ws_record.name.clone());

        for tab_record in &ws_record.tabs {
            match restore_tab(
                tab_record,
                tree,
                registry,
                pool,
                password_prompt,
                manifest.settings.restore_cursor_position,
            ) {
                TabRestoreOutcome::Restored(tab) => workspace.push_tab(tab),
                TabRestoreOutcome::Skipped { reason } => {
                    log::debug!("session restore: skipped tab for connection {}: {}", tab_record.connection_id, reason);
                    continue;
                }
            }
        }

        if !workspace.is_empty() {
            workspace.current_tab = ws_record.current_tab.min(workspace.tabs.len() - 1);
            set.push(workspace);
        }
    }

    set.current_workspace = manifest.current_workspace.min(set.workspaces.len().saturating_sub(1));

    if set.workspaces.is_empty() && !manifest.workspaces.is_empty() {
        return Err(DbError::ConnectionFailed(crate::FormattedError::new(
            "session restore failed: no workspace could be revived",
        )));
    }

    Ok(set)
}

fn restore_tab(
    record: &TabRecord,
    tree: &ConnectionTree,
    registry: &dyn DriverRegistry,
    pool: &mut dyn ConnectionPool,
    password_prompt: Option<&dyn PasswordPrompt>,
    restore_cursor_position: bool,
) -> TabRestoreOutcome {
    let Some(node) = tree.get(record.connection_id) else {
        log::warn!("session restore: connection {} no longer saved, skipping tab", record.connection_id);
        return TabRestoreOutcome::Skipped { reason: "connection no longer saved".to_string() };
    };

    let mut profile = match tree.connection_profile(node.id, None) {
        Some(p) => p,
        None => {
            log::warn!("session restore: node {} is not a connection, skipping tab", node.id);
            return TabRestoreOutcome::Skipped { reason: "not a connection node".to_string() };
        }
    };

    let Some(driver) = registry.driver_for(profile.driver) else {
        log::warn!("session restore: no driver registered for {:?}, skipping tab", profile.driver);
        return TabRestoreOutcome::Skipped { reason: "driver unavailable".to_string() };
    };

    loop {
        let connstr = profile.to_connstr();
        match pool.get_or_connect(record.connection_id, &connstr, driver) {
            Ok(()) => break,
            Err(e) if e.looks_like_auth_failure() => {
                let Some(prompt) = password_prompt else {
                    log::warn!("session restore: auth failed for '{}' with no password prompt available", profile.name);
                    return TabRestoreOutcome::Skipped { reason: "auth failed, no prompt available".to_string() };
                };
                match prompt.prompt(&profile.name) {
                    Some(password) => profile.set_password(Some(password)),
                    None => {
                        log::debug!("session restore: auth retry cancelled for '{}'", profile.name);
                        return TabRestoreOutcome::Skipped { reason: "auth retry cancelled".to_string() };
                    }
                }
            }
            Err(e) => {
                log::warn!("session restore: failed to connect to '{}': {}", profile.name, e);
                return TabRestoreOutcome::Skipped { reason: e.to_string() };
            }
        }
    }

    let Some(conn) = pool.connection(record.connection_id) else {
        log::warn!("session restore: connection '{}' vanished right after connect", profile.name);
        return TabRestoreOutcome::Skipped { reason: "connection vanished after connect".to_string() };
    };

    match record.tab_type {
        TabTypeRecord::Connection => {
            TabRestoreOutcome::Restored(Tab::new_connection(record.connection_id, profile.name.clone()))
        }
        TabTypeRecord::Query => {
            let mut tab = Tab::new_query(record.connection_id);
            if let TabKind::Query { query_text, query_cursor, query_scroll_line, query_scroll_col } =
                &mut tab.kind
            {
                *query_text = record.query_text.clone().unwrap_or_default();
                if restore_cursor_position {
                    *query_cursor = record.query_cursor.map(|c| (c[0], c[1])).unwrap_or((0, 0));
                    *query_scroll_line = record.query_scroll_line.unwrap_or(0);
                    *query_scroll_col = record.query_scroll_col.unwrap_or(0);
                }
            }
            TabRestoreOutcome::Restored(tab)
        }
        TabTypeRecord::Table => restore_table_tab(record, conn, restore_cursor_position),
    }
}

/// Resolve a table's `total_rows` for paging, per spec §4.10 steps 2-3: the
/// *unfiltered* total goes through the estimate-then-promote-to-exact
/// heuristic, but a filtered count is always exact regardless of table
/// size — it must never substitute the driver's unfiltered
/// `estimate_row_count` for a real `COUNT(*) WHERE …`.
fn resolve_table_total(conn: &dyn Connection, table_name: &str, where_clause: Option<&str>) -> (i64, bool) {
    if let Some(filter_where) = where_clause {
        (conn.count_rows(table_name, Some(filter_where)).unwrap_or(0), false)
    } else {
        let estimate = conn.estimate_row_count(table_name).unwrap_or(-1);
        resolve_unfiltered_total(estimate, || conn.count_rows(table_name, None).unwrap_or(0))
    }
}

fn restore_table_tab(record: &TabRecord, conn: &dyn Connection, restore_cursor_position: bool) -> TabRestoreOutcome {
    let Some(table_name) = &record.table_name else {
        log::warn!("session restore: table tab for connection {} is missing a table name", record.connection_id);
        return TabRestoreOutcome::Skipped { reason: "table tab missing table_name".to_string() };
    };

    let schema = match conn.get_table_schema(table_name) {
        Ok(s) => s,
        Err(e) => {
            log::warn!("session restore: table '{}' unavailable, restoring with an error tab: {}", table_name, e);
            let mut tab = Tab::new_table(record.connection_id, table_name.clone());
            tab.set_table_error(format!("table unavailable: {}", e));
            return TabRestoreOutcome::Restored(tab);
        }
    };

    let sort: Vec<SortEntry> = record
        .sort
        .iter()
        .filter_map(|s| {
            schema.column_index(&s.column).map(|idx| SortEntry {
                column_index: idx,
                direction: if s.direction == 0 { SortDirection::Asc } else { SortDirection::Desc },
            })
        })
        .collect();

    let filters: Vec<Filter> = record
        .filters
        .iter()
        .filter_map(|f| {
            schema
                .column_index(&f.column)
                .map(|idx| Filter::new(idx, filter_op_from_i32(f.op), f.value.clone()))
        })
        .collect();

    let where_clause = crate::filter::build_where(&filters, &schema, conn.dialect());
    let order_by = crate::filter::build_order_by(&sort, &schema, conn.dialect());

    let (total_rows, approximate) = resolve_table_total(conn, table_name, where_clause.as_deref());

    let mut window = PagingWindow::new(DEFAULT_PAGE_SIZE);
    window.total_rows = total_rows;
    window.row_count_approximate = approximate;

    let abs_cursor = (record.cursor[0] as u32).min(total_rows.max(1) as u32 - 1);
    let offset = window.centered_load_offset(abs_cursor);

    let page = conn.query_page(table_name, where_clause.as_deref(), order_by.as_deref(), offset, window.page_size);

    let mut tab = Tab::new_table(record.connection_id, table_name.clone());
    if let TabKind::Table {
        cursor_row,
        cursor_col,
        scroll_row,
        scroll_col,
        loaded_count,
        column_count,
        sort: tab_sort,
        filters: tab_filters,
        table_error,
        ..
    } = &mut tab.kind
    {
        match page {
            Ok(result) => {
                window.loaded_offset = offset;
                window.loaded_count = result.rows.len() as u32;
                *loaded_count = window.loaded_count as u64;
                *column_count = result.columns.len();
                if restore_cursor_position {
                    *cursor_row = window.to_relative_cursor(abs_cursor) as u64;
                    *cursor_col = (record.cursor[1] as usize).min(column_count.saturating_sub(1));
                    *scroll_row = record.scroll[0].min(*loaded_count);
                    *scroll_col = record.scroll[1] as usize;
                }
                *tab_sort = sort;
                *tab_filters = filters;
            }
            Err(e) => {
                log::warn!("session restore: failed to load page for table '{}': {}", table_name, e);
                *table_error = Some(format!("failed to load page: {}", e));
            }
        }
    }

    TabRestoreOutcome::Restored(tab)
}

fn filter_op_from_i32(op: i32) -> FilterOp {
    match op {
        0 => FilterOp::Eq,
        1 => FilterOp::Ne,
        2 => FilterOp::Gt,
        3 => FilterOp::Ge,
        4 => FilterOp::Lt,
        5 => FilterOp::Le,
        6 => FilterOp::In,
        7 => FilterOp::Contains,
        8 => FilterOp::Regex,
        9 => FilterOp::Between,
        10 => FilterOp::IsEmpty,
        11 => FilterOp::IsNotEmpty,
        12 => FilterOp::IsNull,
        13 => FilterOp::IsNotNull,
        _ => FilterOp::Raw,
    }
}

/// Build a `QueryRequest` for an ad hoc query tab's current text, used by
/// the caller when executing a restored query tab for the first time.
pub fn query_tab_request(text: &str) -> QueryRequest {
    QueryRequest::new(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_file_returns_default_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::at_path(dir.path().join("session.json"));
        let manifest = store.load();
        assert!(manifest.workspaces.is_empty());
    }

    #[test]
    fn load_tolerates_corrupt_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, b"{not valid json").unwrap();
        let store = SessionStore::at_path(path);
        let manifest = store.load();
        assert!(manifest.workspaces.is_empty());
    }

    #[test]
    fn load_tolerates_missing_fields_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, br#"{"workspaces": [{"name": "w"}]}"#).unwrap();
        let store = SessionStore::at_path(path);
        let manifest = store.load();
        assert_eq!(manifest.workspaces.len(), 1);
        assert_eq!(manifest.workspaces[0].current_tab, 0);
        assert!(manifest.settings.header_visible);
    }

    #[test]
    fn save_without_active_connection_deletes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, b"{}").unwrap();
        let store = SessionStore::at_path(path.clone());
        store.save(&SessionManifest::default(), false).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn save_with_active_connection_writes_and_locks_down() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let store = SessionStore::at_path(path.clone());
        store.save(&SessionManifest::default(), true).unwrap();
        assert!(path.exists());

        #[cfg(unix)]
        {
            let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o600);
        }
    }

    #[test]
    fn oversized_file_is_treated_as_no_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let huge = vec![b' '; (MAX_SESSION_FILE_BYTES + 1) as usize];
        std::fs::write(&path, huge).unwrap();
        let store = SessionStore::at_path(path);
        assert!(store.load().workspaces.is_empty());
    }

    struct NoDrivers;
    impl DriverRegistry for NoDrivers {
        fn driver_for(&self, _driver: Driver) -> Option<&dyn DbDriver> {
            None
        }
    }
    struct EmptyPool;
    impl ConnectionPool for EmptyPool {
        fn get_or_connect(&mut self, _id: Uuid, _cs: &ConnStr, _driver: &dyn DbDriver) -> Result<(), DbError> {
            Ok(())
        }
        fn connection(&self, _id: Uuid) -> Option<&dyn Connection> {
            None
        }
    }

    #[test]
    fn restore_skips_tabs_whose_connection_is_gone() {
        let tree = ConnectionTree::new();
        let manifest = SessionManifest {
            settings: SessionSettings::default(),
            workspaces: vec![WorkspaceRecord {
                name: "w".to_string(),
                current_tab: 0,
                tabs: vec![TabRecord { connection_id: Uuid::new_v4(), ..Default::default() }],
            }],
            current_workspace: 0,
        };

        let mut pool = EmptyPool;
        let set = restore_session(&manifest, &tree, &NoDrivers, &mut pool, None).unwrap();
        assert!(set.workspaces.is_empty());
    }

    #[test]
    fn filtered_total_is_always_exact_even_above_promote_threshold() {
        use lace_test_support::fake_driver::FakeDriver;

        // The unfiltered table is huge (well above the promote-to-exact
        // threshold), but a filter is active, so the total must come from
        // an exact COUNT(*) WHERE, not the unfiltered estimate.
        let driver = FakeDriver::new().with_estimate_row_count(5_000_000).with_row_count(42);
        let connstr = crate::connstr::parse("sqlite:///tmp/x.db").unwrap();
        let conn = driver.connect(&connstr).unwrap();

        let (total, approximate) = resolve_table_total(conn.as_ref(), "users", Some("\"status\" = 'active'"));
        assert_eq!(total, 42);
        assert!(!approximate);
    }

    #[test]
    fn unfiltered_total_still_uses_promote_to_exact_heuristic() {
        use lace_test_support::fake_driver::FakeDriver;

        let driver = FakeDriver::new().with_estimate_row_count(5_000_000).with_row_count(42);
        let connstr = crate::connstr::parse("sqlite:///tmp/x.db").unwrap();
        let conn = driver.connect(&connstr).unwrap();

        let (total, approximate) = resolve_table_total(conn.as_ref(), "users", None);
        assert_eq!(total, 5_000_000);
        assert!(approximate);
    }
}
