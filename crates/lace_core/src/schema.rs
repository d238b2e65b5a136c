use serde::{Deserialize, Serialize};

/// A database visible on the server (PostgreSQL) or the single file database
/// (SQLite reports exactly one, MySQL reports the schemas it can see).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseInfo {
    pub name: String,
    pub is_current: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    /// Logical type inferred from `driver_type_name` by substring match.
    pub logical_type: LogicalType,
    pub driver_type_name: String,
    pub nullable: bool,
    pub primary_key: bool,
    pub auto_increment: bool,
    pub default_expr: Option<String>,
    pub foreign_key_ref: Option<ForeignKeyRef>,
    pub max_length: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicalType {
    Int,
    Float,
    Bool,
    Blob,
    Date,
    Timestamp,
    Text,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKeyRef {
    pub table: String,
    pub column: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    pub columns: Vec<String>,
    pub is_unique: bool,
    pub is_primary: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKeyInfo {
    pub name: Option<String>,
    pub column: String,
    pub ref_table: String,
    pub ref_column: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewInfo {
    pub name: String,
    pub schema: Option<String>,
}

/// Full schema for a single table, as returned by `get_table_schema`.
///
/// `qualified_name` is `schema.table` for PostgreSQL, bare `table` for
/// SQLite and MySQL (MySQL's schema is implicitly the connection's current
/// database).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    pub qualified_name: String,
    pub columns: Vec<ColumnInfo>,
    pub indexes: Vec<IndexInfo>,
    pub foreign_keys: Vec<ForeignKeyInfo>,
    pub approximate_row_count: Option<i64>,
}

impl TableSchema {
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn primary_key_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name.as_str())
            .collect()
    }
}

/// Infer a logical type from a driver-native type name via substring match.
/// Used by the SQLite and MySQL drivers, whose type names have a distinct
/// `DATE` category alongside `TIMESTAMP`/`DATETIME` (spec §4.4/§4.6).
pub fn infer_logical_type(driver_type_name: &str) -> LogicalType {
    let upper = driver_type_name.to_ascii_uppercase();

    if upper == "DATE" {
        return LogicalType::Date;
    }
    if upper.contains("TIMESTAMP") || upper.contains("DATETIME") {
        return LogicalType::Timestamp;
    }
    if upper.starts_with("BOOL") {
        return LogicalType::Bool;
    }
    if upper.contains("BLOB") || upper.contains("BINARY") || upper.contains("BYTEA") {
        return LogicalType::Blob;
    }
    if upper.contains("INT") || upper == "OID" {
        return LogicalType::Int;
    }
    if upper.contains("FLOAT")
        || upper.contains("DOUBLE")
        || upper.contains("REAL")
        || upper.contains("NUMERIC")
        || upper.contains("DECIMAL")
    {
        return LogicalType::Float;
    }

    LogicalType::Text
}

/// Infer a logical type from a PostgreSQL `udt_name`, per spec §4.5's table:
/// unlike SQLite/MySQL, PostgreSQL has no separate `DATE` category — `date`,
/// `time`/`timetz`, `timestamp`/`timestamptz` all fold into `Timestamp`.
pub fn infer_logical_type_postgres(udt_name: &str) -> LogicalType {
    let upper = udt_name.to_ascii_uppercase();

    if upper.contains("BOOL") {
        return LogicalType::Bool;
    }
    if upper == "BYTEA" {
        return LogicalType::Blob;
    }
    if upper == "INT2" || upper == "INT4" || upper == "INT8" || upper == "OID" {
        return LogicalType::Int;
    }
    if upper == "FLOAT4" || upper == "FLOAT8" || upper == "NUMERIC" {
        return LogicalType::Float;
    }
    if upper.starts_with("TIME") || upper.starts_with("DATE") {
        return LogicalType::Timestamp;
    }

    LogicalType::Text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_type_by_substring() {
        assert_eq!(infer_logical_type("VARCHAR(255)"), LogicalType::Text);
        assert_eq!(infer_logical_type("INTEGER"), LogicalType::Int);
        assert_eq!(infer_logical_type("NUMERIC(10,2)"), LogicalType::Float);
        assert_eq!(infer_logical_type("TIMESTAMPTZ"), LogicalType::Timestamp);
        assert_eq!(infer_logical_type("DATE"), LogicalType::Date);
        assert_eq!(infer_logical_type("BOOLEAN"), LogicalType::Bool);
        assert_eq!(infer_logical_type("BYTEA"), LogicalType::Blob);
    }

    #[test]
    fn postgres_mapping_folds_date_and_time_into_timestamp() {
        assert_eq!(infer_logical_type_postgres("date"), LogicalType::Timestamp);
        assert_eq!(infer_logical_type_postgres("time"), LogicalType::Timestamp);
        assert_eq!(infer_logical_type_postgres("timetz"), LogicalType::Timestamp);
        assert_eq!(infer_logical_type_postgres("timestamp"), LogicalType::Timestamp);
        assert_eq!(infer_logical_type_postgres("timestamptz"), LogicalType::Timestamp);
        assert_eq!(infer_logical_type_postgres("int4"), LogicalType::Int);
        assert_eq!(infer_logical_type_postgres("numeric"), LogicalType::Float);
        assert_eq!(infer_logical_type_postgres("bytea"), LogicalType::Blob);
        assert_eq!(infer_logical_type_postgres("bool"), LogicalType::Bool);
        assert_eq!(infer_logical_type_postgres("varchar"), LogicalType::Text);
    }

    #[test]
    fn column_index_lookup() {
        let schema = TableSchema {
            qualified_name: "public.users".into(),
            columns: vec![ColumnInfo {
                name: "id".into(),
                logical_type: LogicalType::Int,
                driver_type_name: "INTEGER".into(),
                nullable: false,
                primary_key: true,
                auto_increment: true,
                default_expr: None,
                foreign_key_ref: None,
                max_length: None,
            }],
            indexes: vec![],
            foreign_keys: vec![],
            approximate_row_count: None,
        };
        assert_eq!(schema.column_index("id"), Some(0));
        assert_eq!(schema.column_index("missing"), None);
        assert_eq!(schema.primary_key_columns(), vec!["id"]);
    }
}
