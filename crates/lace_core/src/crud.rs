use crate::{Row, Value};

/// Maximum number of columns a composite primary key may carry.
pub const MAX_PK_COLUMNS: usize = 16;

/// Identification of a row for UPDATE/DELETE, as a composite primary key.
#[derive(Debug, Clone)]
pub struct RecordIdentity {
    pub columns: Vec<String>,
    pub values: Vec<Value>,
}

impl RecordIdentity {
    pub fn composite(columns: Vec<String>, values: Vec<Value>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    pub fn is_valid(&self) -> bool {
        !self.columns.is_empty()
            && self.columns.len() == self.values.len()
            && self.columns.len() <= MAX_PK_COLUMNS
    }
}

/// Changes to apply to a single row via UPDATE.
#[derive(Debug, Clone)]
pub struct RowPatch {
    pub identity: RecordIdentity,
    pub table: String,
    pub schema: Option<String>,
    /// Column changes: (column_name, new_value).
    pub changes: Vec<(String, Value)>,
}

impl RowPatch {
    pub fn new(
        identity: RecordIdentity,
        table: String,
        schema: Option<String>,
        changes: Vec<(String, Value)>,
    ) -> Self {
        Self {
            identity,
            table,
            schema,
            changes,
        }
    }

    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }
}

/// Data for INSERT.
#[derive(Debug, Clone)]
pub struct RowInsert {
    pub table: String,
    pub schema: Option<String>,
    pub columns: Vec<String>,
    pub values: Vec<Value>,
}

impl RowInsert {
    pub fn new(table: String, schema: Option<String>, columns: Vec<String>, values: Vec<Value>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self {
            table,
            schema,
            columns,
            values,
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.columns.is_empty() && self.columns.len() == self.values.len()
    }
}

/// Data for DELETE.
#[derive(Debug, Clone)]
pub struct RowDelete {
    pub identity: RecordIdentity,
    pub table: String,
    pub schema: Option<String>,
}

impl RowDelete {
    pub fn new(identity: RecordIdentity, table: String, schema: Option<String>) -> Self {
        Self {
            identity,
            table,
            schema,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.identity.is_valid()
    }
}

/// State of a row during editing in a table tab.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RowState {
    #[default]
    Clean,
    Dirty,
    Saving,
    Error(String),
    PendingInsert,
    PendingDelete,
}

impl RowState {
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Clean)
    }

    pub fn has_pending_changes(&self) -> bool {
        matches!(self, Self::Dirty | Self::PendingInsert | Self::PendingDelete)
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Error(msg) => Some(msg),
            _ => None,
        }
    }
}

/// Result of a CRUD mutation.
#[derive(Debug, Clone)]
pub struct CrudResult {
    pub affected_rows: u64,
    /// The row after the mutation, from `RETURNING` or a driver-issued
    /// re-query for dialects that lack it.
    pub returning_row: Option<Row>,
}

impl CrudResult {
    pub fn new(affected_rows: u64, returning_row: Option<Row>) -> Self {
        Self {
            affected_rows,
            returning_row,
        }
    }

    pub fn success(returning_row: Row) -> Self {
        Self {
            affected_rows: 1,
            returning_row: Some(returning_row),
        }
    }

    pub fn empty() -> Self {
        Self {
            affected_rows: 0,
            returning_row: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_rejects_more_than_max_pk_columns() {
        let columns: Vec<String> = (0..MAX_PK_COLUMNS + 1).map(|i| format!("c{}", i)).collect();
        let values: Vec<Value> = (0..MAX_PK_COLUMNS + 1).map(|i| Value::Int(i as i64)).collect();
        let identity = RecordIdentity::composite(columns, values);
        assert!(!identity.is_valid());
    }

    #[test]
    fn identity_accepts_exactly_max_pk_columns() {
        let columns: Vec<String> = (0..MAX_PK_COLUMNS).map(|i| format!("c{}", i)).collect();
        let values: Vec<Value> = (0..MAX_PK_COLUMNS).map(|i| Value::Int(i as i64)).collect();
        let identity = RecordIdentity::composite(columns, values);
        assert!(identity.is_valid());
    }
}
