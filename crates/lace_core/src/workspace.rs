//! Tab/workspace navigation model. The TUI thread is the only caller into
//! this module (per the concurrency model's single-owner rule), so none of
//! it needs synchronization of its own.

use uuid::Uuid;

use crate::filter::{Filter, SortEntry};

/// What a tab is showing. A `Connection` tab is the landing page for a
/// connection before a table or query is chosen.
#[derive(Debug, Clone)]
pub enum TabKind {
    Connection,
    Table {
        table_name: String,
        cursor_row: u64,
        cursor_col: usize,
        scroll_row: u64,
        scroll_col: usize,
        loaded_count: u64,
        column_count: usize,
        sort: Vec<SortEntry>,
        filters: Vec<Filter>,
        /// Set when the tab's connection or table no longer resolves; the
        /// tab renders only the sidebar and this message.
        table_error: Option<String>,
    },
    Query {
        query_text: String,
        query_cursor: (usize, usize),
        query_scroll_line: usize,
        query_scroll_col: usize,
    },
}

#[derive(Debug, Clone)]
pub struct Tab {
    pub name: String,
    pub connection_id: Uuid,
    pub kind: TabKind,
}

impl Tab {
    pub fn new_connection(connection_id: Uuid, name: impl Into<String>) -> Self {
        Self { name: name.into(), connection_id, kind: TabKind::Connection }
    }

    pub fn new_table(connection_id: Uuid, table_name: impl Into<String>) -> Self {
        let table_name = table_name.into();
        Self {
            name: table_name.clone(),
            connection_id,
            kind: TabKind::Table {
                table_name,
                cursor_row: 0,
                cursor_col: 0,
                scroll_row: 0,
                scroll_col: 0,
                loaded_count: 0,
                column_count: 0,
                sort: Vec::new(),
                filters: Vec::new(),
                table_error: None,
            },
        }
    }

    pub fn new_query(connection_id: Uuid) -> Self {
        Self {
            name: "Query".to_string(),
            connection_id,
            kind: TabKind::Query {
                query_text: String::new(),
                query_cursor: (0, 0),
                query_scroll_line: 0,
                query_scroll_col: 0,
            },
        }
    }

    /// Move the table cursor by `(row_d, col_d)`, clamping to the loaded
    /// row/column bounds and keeping the cursor within the visible window
    /// by adjusting scroll.
    pub fn move_cursor(&mut self, row_d: i64, col_d: i64, visible_rows: u64) {
        let TabKind::Table { cursor_row, cursor_col, scroll_row, loaded_count, column_count, .. } =
            &mut self.kind
        else {
            return;
        };

        *cursor_row = clamp_cursor(*cursor_row, row_d, *loaded_count);
        *cursor_col = clamp_cursor_usize(*cursor_col, col_d, *column_count);

        ensure_visible(cursor_row, scroll_row, visible_rows);
    }

    pub fn page_up(&mut self, visible_rows: u64) {
        self.move_cursor(-(visible_rows as i64), 0, visible_rows);
    }

    pub fn page_down(&mut self, visible_rows: u64) {
        self.move_cursor(visible_rows as i64, 0, visible_rows);
    }

    pub fn home(&mut self, visible_rows: u64) {
        if let TabKind::Table { cursor_row, scroll_row, .. } = &mut self.kind {
            *cursor_row = 0;
            *scroll_row = 0;
        }
        let _ = visible_rows;
    }

    pub fn end(&mut self, visible_rows: u64) {
        let TabKind::Table { cursor_row, scroll_row, loaded_count, .. } = &mut self.kind else {
            return;
        };
        *cursor_row = loaded_count.saturating_sub(1);
        ensure_visible(cursor_row, scroll_row, visible_rows);
    }

    pub fn column_first(&mut self) {
        if let TabKind::Table { cursor_col, scroll_col, .. } = &mut self.kind {
            *cursor_col = 0;
            *scroll_col = 0;
        }
    }

    pub fn column_last(&mut self) {
        if let TabKind::Table { cursor_col, column_count, .. } = &mut self.kind {
            *cursor_col = column_count.saturating_sub(1);
        }
    }

    pub fn is_table(&self) -> bool {
        matches!(self.kind, TabKind::Table { .. })
    }

    pub fn table_error(&self) -> Option<&str> {
        match &self.kind {
            TabKind::Table { table_error, .. } => table_error.as_deref(),
            _ => None,
        }
    }

    pub fn set_table_error(&mut self, message: impl Into<String>) {
        if let TabKind::Table { table_error, .. } = &mut self.kind {
            *table_error = Some(message.into());
        }
    }
}

fn clamp_cursor(current: u64, delta: i64, count: u64) -> u64 {
    if count == 0 {
        return 0;
    }
    let next = current as i64 + delta;
    next.clamp(0, count as i64 - 1) as u64
}

fn clamp_cursor_usize(current: usize, delta: i64, count: usize) -> usize {
    if count == 0 {
        return 0;
    }
    let next = current as i64 + delta;
    next.clamp(0, count as i64 - 1) as usize
}

fn ensure_visible(cursor_row: &mut u64, scroll_row: &mut u64, visible_rows: u64) {
    if visible_rows == 0 {
        return;
    }
    if *cursor_row < *scroll_row {
        *scroll_row = *cursor_row;
    } else if *cursor_row >= *scroll_row + visible_rows {
        *scroll_row = *cursor_row + 1 - visible_rows;
    }
}

#[derive(Debug, Clone, Default)]
pub struct Workspace {
    pub name: String,
    pub tabs: Vec<Tab>,
    pub current_tab: usize,
}

impl Workspace {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), tabs: Vec::new(), current_tab: 0 }
    }

    pub fn current(&self) -> Option<&Tab> {
        self.tabs.get(self.current_tab)
    }

    pub fn current_mut(&mut self) -> Option<&mut Tab> {
        self.tabs.get_mut(self.current_tab)
    }

    pub fn push_tab(&mut self, tab: Tab) {
        self.tabs.push(tab);
        self.current_tab = self.tabs.len() - 1;
    }

    pub fn close_tab(&mut self, index: usize) {
        if index >= self.tabs.len() {
            return;
        }
        self.tabs.remove(index);
        if self.current_tab >= self.tabs.len() {
            self.current_tab = self.tabs.len().saturating_sub(1);
        }
    }

    pub fn switch_tab(&mut self, index: usize) {
        if index < self.tabs.len() {
            self.current_tab = index;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }
}

/// Default cap on the number of open workspaces, configurable per §3.
pub const MAX_WORKSPACES: usize = 16;

/// Holds every open workspace; `current_workspace` is reclamped whenever the
/// array shrinks so it never points past the end.
#[derive(Debug, Clone)]
pub struct WorkspaceSet {
    pub workspaces: Vec<Workspace>,
    pub current_workspace: usize,
    pub max_workspaces: usize,
}

impl Default for WorkspaceSet {
    fn default() -> Self {
        Self { workspaces: Vec::new(), current_workspace: 0, max_workspaces: MAX_WORKSPACES }
    }
}

impl WorkspaceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_workspaces(max_workspaces: usize) -> Self {
        Self { max_workspaces, ..Self::default() }
    }

    pub fn current(&self) -> Option<&Workspace> {
        self.workspaces.get(self.current_workspace)
    }

    pub fn current_mut(&mut self) -> Option<&mut Workspace> {
        self.workspaces.get_mut(self.current_workspace)
    }

    /// Append a workspace, evicting the oldest one first if the set is
    /// already at `max_workspaces` rather than growing past the cap.
    pub fn push(&mut self, workspace: Workspace) {
        if self.workspaces.len() >= self.max_workspaces && !self.workspaces.is_empty() {
            self.workspaces.remove(0);
        }
        self.workspaces.push(workspace);
        self.current_workspace = self.workspaces.len() - 1;
    }

    /// Close a workspace, shifting the array and reclamping the current
    /// index rather than leaving it dangling past the new end.
    pub fn close(&mut self, index: usize) {
        if index >= self.workspaces.len() {
            return;
        }
        self.workspaces.remove(index);
        if self.workspaces.is_empty() {
            self.current_workspace = 0;
        } else if self.current_workspace >= self.workspaces.len() {
            self.current_workspace = self.workspaces.len() - 1;
        } else if index < self.current_workspace {
            self.current_workspace -= 1;
        }
    }

    /// Drop workspaces left with no tabs, as the session restore algorithm
    /// does after per-tab failures might have emptied one out.
    pub fn prune_empty(&mut self) {
        let was_current = self.workspaces.get(self.current_workspace).map(|w| w as *const _);
        self.workspaces.retain(|w| !w.is_empty());
        self.current_workspace = match was_current {
            Some(ptr) => self
                .workspaces
                .iter()
                .position(|w| w as *const _ == ptr)
                .unwrap_or(0),
            None => 0,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loaded_tab(loaded: u64, cols: usize) -> Tab {
        let mut tab = Tab::new_table(Uuid::new_v4(), "t");
        if let TabKind::Table { loaded_count, column_count, .. } = &mut tab.kind {
            *loaded_count = loaded;
            *column_count = cols;
        }
        tab
    }

    #[test]
    fn move_cursor_clamps_to_loaded_count() {
        let mut tab = loaded_tab(5, 3);
        tab.move_cursor(-10, 0, 10);
        if let TabKind::Table { cursor_row, .. } = &tab.kind {
            assert_eq!(*cursor_row, 0);
        }
        tab.move_cursor(100, 0, 10);
        if let TabKind::Table { cursor_row, .. } = &tab.kind {
            assert_eq!(*cursor_row, 4);
        }
    }

    #[test]
    fn move_cursor_clamps_column_to_schema_width() {
        let mut tab = loaded_tab(5, 3);
        tab.move_cursor(0, 100, 10);
        if let TabKind::Table { cursor_col, .. } = &tab.kind {
            assert_eq!(*cursor_col, 2);
        }
    }

    #[test]
    fn scroll_follows_cursor_to_stay_visible() {
        let mut tab = loaded_tab(100, 3);
        tab.move_cursor(50, 0, 10);
        if let TabKind::Table { scroll_row, cursor_row, .. } = &tab.kind {
            assert_eq!(*cursor_row, 50);
            assert!(*scroll_row <= 50 && *scroll_row + 10 > 50);
        }
    }

    #[test]
    fn workspace_close_reclamps_current_tab() {
        let mut ws = Workspace::new("w");
        ws.push_tab(Tab::new_connection(Uuid::new_v4(), "a"));
        ws.push_tab(Tab::new_connection(Uuid::new_v4(), "b"));
        ws.close_tab(1);
        assert_eq!(ws.current_tab, 0);
    }

    #[test]
    fn workspace_set_close_reclamps_current_workspace() {
        let mut set = WorkspaceSet::new();
        set.push(Workspace::new("a"));
        set.push(Workspace::new("b"));
        set.push(Workspace::new("c"));
        set.current_workspace = 2;
        set.close(2);
        assert_eq!(set.current_workspace, 1);
    }

    #[test]
    fn push_evicts_oldest_once_at_cap() {
        let mut set = WorkspaceSet::with_max_workspaces(2);
        set.push(Workspace::new("a"));
        set.push(Workspace::new("b"));
        set.push(Workspace::new("c"));
        assert_eq!(set.workspaces.len(), 2);
        assert_eq!(set.workspaces[0].name, "b");
        assert_eq!(set.workspaces[1].name, "c");
    }

    #[test]
    fn prune_empty_removes_workspaces_with_no_tabs() {
        let mut set = WorkspaceSet::new();
        let mut a = Workspace::new("a");
        a.push_tab(Tab::new_connection(Uuid::new_v4(), "t"));
        set.push(a);
        set.push(Workspace::new("empty"));
        set.prune_empty();
        assert_eq!(set.workspaces.len(), 1);
        assert_eq!(set.workspaces[0].name, "a");
    }
}
