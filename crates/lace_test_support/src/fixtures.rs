//! Small builders for the value/row/schema shapes `lace_core` passes
//! around, so driver and fake-driver tests don't repeat boilerplate.

use lace_core::{
    infer_logical_type, ColumnInfo, ColumnMeta, ForeignKeyInfo, IndexInfo, Row, TableSchema, Value,
};

pub fn column_meta(name: impl Into<String>, type_name: impl Into<String>, nullable: bool) -> ColumnMeta {
    ColumnMeta {
        name: name.into(),
        type_name: type_name.into(),
        nullable,
    }
}

pub fn int_cell(value: i64) -> Value {
    Value::Int(value)
}

pub fn text_cell(value: impl Into<String>) -> Value {
    Value::Text(value.into())
}

pub fn row(values: Vec<Value>) -> Row {
    values
}

/// A column with the common defaults: not nullable, not a primary key, no
/// foreign key, no declared max length.
pub fn plain_column(name: impl Into<String>, driver_type_name: impl Into<String>) -> ColumnInfo {
    let driver_type_name = driver_type_name.into();
    let logical_type = infer_logical_type(&driver_type_name);
    ColumnInfo {
        name: name.into(),
        logical_type,
        driver_type_name,
        nullable: false,
        primary_key: false,
        auto_increment: false,
        default_expr: None,
        foreign_key_ref: None,
        max_length: None,
    }
}

pub fn primary_key_column(name: impl Into<String>, driver_type_name: impl Into<String>) -> ColumnInfo {
    ColumnInfo {
        primary_key: true,
        auto_increment: true,
        ..plain_column(name, driver_type_name)
    }
}

pub fn single_column_index(name: impl Into<String>, column: impl Into<String>, unique: bool) -> IndexInfo {
    IndexInfo {
        name: name.into(),
        columns: vec![column.into()],
        is_unique: unique,
        is_primary: false,
    }
}

pub fn foreign_key(
    column: impl Into<String>,
    ref_table: impl Into<String>,
    ref_column: impl Into<String>,
) -> ForeignKeyInfo {
    ForeignKeyInfo {
        name: None,
        column: column.into(),
        ref_table: ref_table.into(),
        ref_column: ref_column.into(),
    }
}

pub fn table_schema(qualified_name: impl Into<String>, columns: Vec<ColumnInfo>) -> TableSchema {
    TableSchema {
        qualified_name: qualified_name.into(),
        columns,
        indexes: Vec::new(),
        foreign_keys: Vec::new(),
        approximate_row_count: None,
    }
}
