use crate::Value;
use crate::arena::StringBuilder;
use crate::crud::{RecordIdentity, RowDelete, RowInsert, RowPatch};
use crate::sql_dialect::SqlDialect;

/// Builds parameterised CRUD statements for a specific dialect.
///
/// Every mutation here (update/insert/delete) binds values as query
/// parameters rather than embedding literals — unlike the filter compiler's
/// WHERE fragments, which are user-authored predicate text and travel as
/// quote-doubled literals instead.
pub struct SqlQueryBuilder<'a> {
    dialect: &'a dyn SqlDialect,
}

impl<'a> SqlQueryBuilder<'a> {
    pub fn new(dialect: &'a dyn SqlDialect) -> Self {
        Self { dialect }
    }

    /// Build an UPDATE statement from a `RowPatch`.
    ///
    /// `UPDATE "schema"."table" SET "col1" = $1, "col2" = $2 WHERE "pk" = $3`
    /// (with `RETURNING *` appended when requested and supported).
    pub fn build_update(&self, patch: &RowPatch, with_returning: bool) -> Option<(String, Vec<Value>)> {
        if patch.changes.is_empty() || !patch.identity.is_valid() {
            return None;
        }

        let table = self.dialect.qualified_table(patch.schema.as_deref(), &patch.table);

        let mut params = Vec::with_capacity(patch.changes.len() + patch.identity.values.len());
        let mut next = 1usize;

        let set_clause: Vec<String> = patch
            .changes
            .iter()
            .map(|(col, val)| {
                let placeholder = self.dialect.placeholder(next);
                next += 1;
                params.push(val.clone());
                format!("{} = {}", self.dialect.quote_identifier(col), placeholder)
            })
            .collect();

        let where_clause = self.build_where_params(&patch.identity, &mut next, &mut params);

        let mut builder = StringBuilder::new();
        builder
            .push_str("UPDATE ")
            .push_str(&table)
            .push_str(" SET ")
            .push_str(&set_clause.join(", "))
            .push_str(" WHERE ")
            .push_str(&where_clause);

        if with_returning && self.dialect.supports_returning() {
            builder.push_str(" RETURNING *");
        }

        Some((builder.finish()?, params))
    }

    /// Build an INSERT statement from a `RowInsert`.
    ///
    /// `INSERT INTO "table" ("col1", "col2") VALUES ($1, $2)`.
    pub fn build_insert(&self, insert: &RowInsert, with_returning: bool) -> Option<(String, Vec<Value>)> {
        if insert.columns.is_empty() {
            return None;
        }

        let table = self.dialect.qualified_table(insert.schema.as_deref(), &insert.table);

        let columns_str = insert
            .columns
            .iter()
            .map(|c| self.dialect.quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ");

        let placeholders: Vec<String> = (1..=insert.values.len())
            .map(|i| self.dialect.placeholder(i))
            .collect();

        let mut builder = StringBuilder::new();
        builder
            .push_str("INSERT INTO ")
            .push_str(&table)
            .push_str(" (")
            .push_str(&columns_str)
            .push_str(") VALUES (")
            .push_str(&placeholders.join(", "))
            .push(')');

        if with_returning && self.dialect.supports_returning() {
            builder.push_str(" RETURNING *");
        }

        Some((builder.finish()?, insert.values.clone()))
    }

    /// Build a DELETE statement from a `RowDelete`.
    ///
    /// `DELETE FROM "table" WHERE "id" = $1`.
    pub fn build_delete(&self, delete: &RowDelete, with_returning: bool) -> Option<(String, Vec<Value>)> {
        if !delete.identity.is_valid() {
            return None;
        }

        let table = self.dialect.qualified_table(delete.schema.as_deref(), &delete.table);

        let mut params = Vec::with_capacity(delete.identity.values.len());
        let mut next = 1usize;
        let where_clause = self.build_where_params(&delete.identity, &mut next, &mut params);

        let mut builder = StringBuilder::new();
        builder.push_str("DELETE FROM ").push_str(&table).push_str(" WHERE ").push_str(&where_clause);

        if with_returning && self.dialect.supports_returning() {
            builder.push_str(" RETURNING *");
        }

        Some((builder.finish()?, params))
    }

    /// Build a SELECT to re-fetch a row by identity.
    ///
    /// Used by drivers without `RETURNING` (SQLite, MySQL) to re-query the
    /// affected row after a mutation.
    pub fn build_select_by_identity(
        &self,
        schema: Option<&str>,
        table: &str,
        identity: &RecordIdentity,
    ) -> Option<(String, Vec<Value>)> {
        if !identity.is_valid() {
            return None;
        }

        let table_ref = self.dialect.qualified_table(schema, table);
        let mut params = Vec::with_capacity(identity.values.len());
        let mut next = 1usize;
        let where_clause = self.build_where_params(identity, &mut next, &mut params);

        let mut builder = StringBuilder::new();
        builder
            .push_str("SELECT * FROM ")
            .push_str(&table_ref)
            .push_str(" WHERE ")
            .push_str(&where_clause)
            .push_str(" LIMIT 1");

        Some((builder.finish()?, params))
    }

    /// Non-parameterised WHERE fragment for composite identity, using
    /// literal embedding. Kept for callers (tests, logging) that want the
    /// fully-rendered statement text rather than bound parameters.
    pub fn build_where_clause(&self, identity: &RecordIdentity) -> Option<String> {
        if !identity.is_valid() {
            return None;
        }

        let conditions: Vec<String> = identity
            .columns
            .iter()
            .zip(identity.values.iter())
            .map(|(col, val)| {
                let col_quoted = self.dialect.quote_identifier(col);
                if val.is_null() {
                    format!("{} IS NULL", col_quoted)
                } else {
                    format!("{} = {}", col_quoted, self.dialect.value_to_literal(val))
                }
            })
            .collect();

        Some(conditions.join(" AND "))
    }

    fn build_where_params(
        &self,
        identity: &RecordIdentity,
        next: &mut usize,
        params: &mut Vec<Value>,
    ) -> String {
        identity
            .columns
            .iter()
            .zip(identity.values.iter())
            .map(|(col, val)| {
                let col_quoted = self.dialect.quote_identifier(col);
                if val.is_null() {
                    format!("{} IS NULL", col_quoted)
                } else {
                    let placeholder = self.dialect.placeholder(*next);
                    *next += 1;
                    params.push(val.clone());
                    format!("{} = {}", col_quoted, placeholder)
                }
            })
            .collect::<Vec<_>>()
            .join(" AND ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql_dialect::PostgresDialect;

    #[test]
    fn build_update_binds_parameters() {
        let dialect = PostgresDialect;
        let builder = SqlQueryBuilder::new(&dialect);

        let patch = RowPatch::new(
            RecordIdentity::composite(vec!["id".to_string()], vec![Value::Int(7)]),
            "users".to_string(),
            Some("public".to_string()),
            vec![("na\"me".to_string(), Value::Text("Bob".to_string()))],
        );

        let (sql, params) = builder.build_update(&patch, false).unwrap();
        assert_eq!(
            sql,
            "UPDATE \"public\".\"users\" SET \"na\"\"me\" = $1 WHERE \"id\" = $2"
        );
        assert_eq!(params, vec![Value::Text("Bob".to_string()), Value::Int(7)]);
    }

    #[test]
    fn build_insert_binds_parameters() {
        let dialect = PostgresDialect;
        let builder = SqlQueryBuilder::new(&dialect);

        let insert = RowInsert::new(
            "users".to_string(),
            None,
            vec!["name".to_string(), "age".to_string()],
            vec![Value::Text("Alice".to_string()), Value::Int(25)],
        );

        let (sql, params) = builder.build_insert(&insert, false).unwrap();
        assert_eq!(sql, "INSERT INTO \"users\" (\"name\", \"age\") VALUES ($1, $2)");
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn build_delete_binds_parameters() {
        let dialect = PostgresDialect;
        let builder = SqlQueryBuilder::new(&dialect);

        let delete = RowDelete::new(
            RecordIdentity::composite(vec!["id".to_string()], vec![Value::Int(42)]),
            "users".to_string(),
            None,
        );

        let (sql, params) = builder.build_delete(&delete, false).unwrap();
        assert_eq!(sql, "DELETE FROM \"users\" WHERE \"id\" = $1");
        assert_eq!(params, vec![Value::Int(42)]);
    }

    #[test]
    fn build_where_clause_literal_embeds_null() {
        let dialect = PostgresDialect;
        let builder = SqlQueryBuilder::new(&dialect);

        let identity = RecordIdentity::composite(vec!["status".to_string()], vec![Value::Null]);
        assert_eq!(builder.build_where_clause(&identity).unwrap(), "\"status\" IS NULL");
    }
}
