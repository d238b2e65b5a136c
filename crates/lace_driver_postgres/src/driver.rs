use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use lace_core::{
    enforce_max_result_rows, ColumnInfo, ColumnMeta, Connection, ConnStr, ConnectionStatus,
    CrudResult, DatabaseInfo, DbDriver, DbError, ErrorLocation, ForeignKeyInfo, ForeignKeyRef,
    FormattedError, IndexInfo, PostgresDialect, QueryCancelHandle, QueryRequest, QueryResult, Row,
    RowDelete, RowInsert, RowPatch, SqlDialect, SqlQueryBuilder, TableSchema, Value,
    MAX_RESULT_ROWS,
};
use native_tls::TlsConnector;
use postgres::types::ToSql;
use postgres::{CancelToken, Client, Config, NoTls};
use postgres_native_tls::MakeTlsConnector;

static DIALECT: PostgresDialect = PostgresDialect;
const DEFAULT_SCHEMA: &str = "public";

/// Driver factory for PostgreSQL, registered alongside the SQLite and MySQL
/// drivers.
pub struct PostgresDriver;

impl PostgresDriver {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PostgresDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl DbDriver for PostgresDriver {
    fn display_name(&self) -> &'static str {
        "PostgreSQL"
    }

    /// Connects via a keyword-based parameter list rather than a
    /// string-concatenated DSN, so user/password never travel through
    /// string interpolation.
    fn connect(&self, connstr: &ConnStr) -> Result<Box<dyn Connection>, DbError> {
        let host = connstr.host.clone();
        let port = connstr.get_port().unwrap_or(5432);
        let user = connstr.user.clone().unwrap_or_else(|| "postgres".to_string());
        let password = connstr.password.clone().unwrap_or_default();
        let database = connstr.database.clone();
        let ssl_mode = connstr.options.get("sslmode").unwrap_or("prefer").to_string();

        let mut config = Config::new();
        config
            .host(&host)
            .port(port)
            .user(&user)
            .password(&password)
            .dbname(&database)
            .connect_timeout(std::time::Duration::from_secs(30))
            .application_name("lace");

        let client = match connect_with_ssl_mode(&config, &ssl_mode, &host, port) {
            Ok(client) => client,
            Err(e) => {
                log::warn!("postgres: failed to connect to {}:{}: {}", host, port, e);
                return Err(e);
            }
        };

        if client.is_closed() {
            return Err(DbError::connection_failed("connection closed immediately after handshake"));
        }

        log::debug!("postgres: connected to {}:{}/{}", host, port, database);

        let cancel_token = client.cancel_token();

        Ok(Box::new(PostgresConnection {
            client: Mutex::new(client),
            cancel_token,
            cancelled: Arc::new(AtomicBool::new(false)),
            status: Mutex::new(ConnectionStatus::Connected),
            max_result_rows: MAX_RESULT_ROWS,
        }))
    }
}

fn connect_with_ssl_mode(config: &Config, ssl_mode: &str, host: &str, port: u16) -> Result<Client, DbError> {
    match ssl_mode {
        "disable" => config.connect(NoTls).map_err(|e| format_pg_connection_error(&e, host, port)),
        mode @ ("require" | "verify-full" | "verify-ca" | "prefer") => {
            let connector = TlsConnector::builder()
                .danger_accept_invalid_certs(mode == "prefer")
                .build()
                .map_err(|e| DbError::connection_failed(format!("TLS setup failed: {}", e)))?;
            let tls = MakeTlsConnector::new(connector);

            match config.connect(tls) {
                Ok(client) => Ok(client),
                Err(_) if mode == "prefer" => {
                    config.connect(NoTls).map_err(|e| format_pg_connection_error(&e, host, port))
                }
                Err(e) => Err(format_pg_connection_error(&e, host, port)),
            }
        }
        other => Err(DbError::InvalidProfile(format!("unknown sslmode: {}", other))),
    }
}

pub struct PostgresConnection {
    client: Mutex<Client>,
    cancel_token: CancelToken,
    cancelled: Arc<AtomicBool>,
    status: Mutex<ConnectionStatus>,
    max_result_rows: i64,
}

pub struct PostgresCancelHandle {
    cancel_token: CancelToken,
    cancelled: Arc<AtomicBool>,
}

impl QueryCancelHandle for PostgresCancelHandle {
    /// Protocol-level cancel: PostgreSQL accepts a cancel request on a
    /// fresh connection carrying the server-issued secret key captured in
    /// the cancel token when the original connection was opened.
    fn cancel(&self) -> Result<(), DbError> {
        log::debug!("postgres: cancelling running query");
        self.cancelled.store(true, Ordering::SeqCst);
        self.cancel_token.cancel_query(NoTls).map_err(|e| DbError::query_failed(e.to_string()))?;
        Ok(())
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl PostgresConnection {
    fn run(&self, req: &QueryRequest) -> Result<QueryResult, DbError> {
        self.cancelled.store(false, Ordering::SeqCst);
        let start = Instant::now();

        let boxed = bind_params(&req.params);
        let params: Vec<&(dyn ToSql + Sync)> = boxed.iter().map(|p| p.as_ref()).collect();

        let mut client = self.client.lock().expect("postgres connection mutex poisoned");
        let rows = client.query(&req.sql, &params).map_err(|e| self.wrap_error(&e))?;

        if rows.is_empty() {
            let mut result = QueryResult::for_select(Vec::new(), Vec::new(), 0);
            result.execution_time = start.elapsed();
            return Ok(result);
        }

        let columns: Vec<ColumnMeta> = rows[0]
            .columns()
            .iter()
            .map(|col| ColumnMeta { name: col.name().to_string(), type_name: col.type_().name().to_string(), nullable: true })
            .collect();

        let limit = req.limit.map(|l| l as usize).unwrap_or(rows.len());
        let mut result_rows: Vec<Row> = rows
            .iter()
            .take(limit)
            .map(|row| (0..columns.len()).map(|i| postgres_value_to_value(row, i)).collect())
            .collect();

        enforce_max_result_rows(&mut result_rows, self.max_result_rows)?;

        let mut result = QueryResult::for_select(columns, result_rows, -1);
        result.execution_time = start.elapsed();
        Ok(result)
    }

    fn run_returning(&self, sql: &str, params: &[Value]) -> Result<Option<Row>, DbError> {
        let boxed = bind_params(params);
        let bound: Vec<&(dyn ToSql + Sync)> = boxed.iter().map(|p| p.as_ref()).collect();

        let mut client = self.client.lock().expect("postgres connection mutex poisoned");
        let rows = client.query(sql, &bound).map_err(|e| self.wrap_error(&e))?;
        let Some(row) = rows.into_iter().next() else { return Ok(None) };
        let values = (0..row.columns().len()).map(|i| postgres_value_to_value(&row, i)).collect();
        Ok(Some(values))
    }

    fn wrap_error(&self, e: &postgres::Error) -> DbError {
        if self.cancelled.load(Ordering::SeqCst) || e.code() == Some(&postgres::error::SqlState::QUERY_CANCELED) {
            return DbError::Cancelled;
        }
        format_pg_query_error(e)
    }

    fn resolve_schema(&self) -> Result<String, DbError> {
        let mut client = self.client.lock().expect("postgres connection mutex poisoned");
        let row = client.query_one("SELECT current_schema()", &[]).map_err(|e| format_pg_query_error(&e))?;
        Ok(row.try_get::<_, Option<String>>(0).ok().flatten().unwrap_or_else(|| DEFAULT_SCHEMA.to_string()))
    }

    fn split_schema_table<'a>(&self, qualified_name: &'a str, fallback_schema: &'a str) -> (&'a str, &'a str) {
        match qualified_name.split_once('.') {
            Some((schema, table)) => (schema, table),
            None => (fallback_schema, qualified_name),
        }
    }
}

impl Connection for PostgresConnection {
    fn disconnect(&mut self) -> Result<(), DbError> {
        log::debug!("postgres: disconnecting");
        *self.status.lock().expect("status mutex poisoned") = ConnectionStatus::Disconnected;
        Ok(())
    }

    fn ping(&self) -> bool {
        let mut client = match self.client.lock() {
            Ok(c) => c,
            Err(_) => return false,
        };
        client.simple_query("SELECT 1").is_ok()
    }

    fn status(&self) -> ConnectionStatus {
        *self.status.lock().expect("status mutex poisoned")
    }

    fn list_tables(&self) -> Result<Vec<String>, DbError> {
        let mut client = self.client.lock().expect("postgres connection mutex poisoned");
        let rows = client
            .query(
                "SELECT table_schema, table_name FROM information_schema.tables \
                 WHERE table_schema NOT IN ('pg_catalog', 'information_schema') \
                 ORDER BY table_schema, table_name",
                &[],
            )
            .map_err(|e| format_pg_query_error(&e))?;

        Ok(rows
            .iter()
            .map(|row| {
                let schema: String = row.get(0);
                let table: String = row.get(1);
                if schema == DEFAULT_SCHEMA {
                    table
                } else {
                    format!("{}.{}", schema, table)
                }
            })
            .collect())
    }

    fn list_databases(&self) -> Result<Vec<DatabaseInfo>, DbError> {
        let mut client = self.client.lock().expect("postgres connection mutex poisoned");
        let rows = client
            .query(
                "SELECT datname, datname = current_database() FROM pg_database WHERE datistemplate = false ORDER BY datname",
                &[],
            )
            .map_err(|e| format_pg_query_error(&e))?;
        Ok(rows.iter().map(|row| DatabaseInfo { name: row.get(0), is_current: row.get(1) }).collect())
    }

    fn get_table_schema(&self, qualified_name: &str) -> Result<TableSchema, DbError> {
        let current_schema = self.resolve_schema()?;
        let (schema, table) = self.split_schema_table(qualified_name, &current_schema);
        let schema = schema.to_string();
        let table = table.to_string();

        let mut client = self.client.lock().expect("postgres connection mutex poisoned");

        let column_rows = client
            .query(
                r#"
                SELECT
                    c.column_name,
                    c.data_type,
                    c.udt_name,
                    c.is_nullable = 'YES' AS nullable,
                    c.column_default,
                    c.character_maximum_length,
                    COALESCE(
                        (SELECT true FROM information_schema.table_constraints tc
                         JOIN information_schema.key_column_usage kcu
                           ON tc.constraint_name = kcu.constraint_name
                          AND tc.table_schema = kcu.table_schema
                         WHERE tc.constraint_type = 'PRIMARY KEY'
                           AND tc.table_schema = c.table_schema
                           AND tc.table_name = c.table_name
                           AND kcu.column_name = c.column_name),
                        false
                    ) AS is_pk
                FROM information_schema.columns c
                WHERE c.table_schema = $1 AND c.table_name = $2
                ORDER BY c.ordinal_position
                "#,
                &[&schema, &table],
            )
            .map_err(|e| format_pg_query_error(&e))?;

        if column_rows.is_empty() {
            return Err(DbError::object_not_found(format!("table {} not found", qualified_name)));
        }

        let mut columns: Vec<ColumnInfo> = column_rows
            .iter()
            .map(|row| {
                let udt_name: String = row.get(2);
                let default_expr: Option<String> = row.get(4);
                let is_pk: bool = row.get(6);
                ColumnInfo {
                    name: row.get(0),
                    logical_type: lace_core::infer_logical_type_postgres(&udt_name),
                    driver_type_name: row.get(1),
                    nullable: row.get(3),
                    primary_key: is_pk,
                    auto_increment: default_expr.as_deref().is_some_and(|d| d.contains("nextval")),
                    default_expr,
                    foreign_key_ref: None,
                    max_length: row.get::<_, Option<i32>>(5).map(|n| n as u64),
                }
            })
            .collect();

        let index_rows = client
            .query(
                r#"
                SELECT
                    i.relname AS index_name,
                    array_agg(a.attname ORDER BY k.n) AS columns,
                    ix.indisunique AS is_unique,
                    ix.indisprimary AS is_primary
                FROM pg_index ix
                JOIN pg_class i ON i.oid = ix.indexrelid
                JOIN pg_class t ON t.oid = ix.indrelid
                JOIN pg_namespace n ON n.oid = t.relnamespace
                JOIN LATERAL unnest(ix.indkey) WITH ORDINALITY AS k(attnum, n) ON true
                JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum
                WHERE n.nspname = $1 AND t.relname = $2
                GROUP BY i.relname, ix.indisunique, ix.indisprimary
                ORDER BY i.relname
                "#,
                &[&schema, &table],
            )
            .map_err(|e| format_pg_query_error(&e))?;

        let indexes: Vec<IndexInfo> = index_rows
            .iter()
            .map(|row| IndexInfo { name: row.get(0), columns: row.get(1), is_unique: row.get(2), is_primary: row.get(3) })
            .collect();

        let fk_rows = client
            .query(
                r#"
                SELECT
                    kcu.column_name,
                    ccu.table_name AS ref_table,
                    ccu.column_name AS ref_column,
                    tc.constraint_name
                FROM information_schema.table_constraints tc
                JOIN information_schema.key_column_usage kcu
                  ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema
                JOIN information_schema.constraint_column_usage ccu
                  ON tc.constraint_name = ccu.constraint_name AND tc.table_schema = ccu.table_schema
                WHERE tc.constraint_type = 'FOREIGN KEY' AND tc.table_schema = $1 AND tc.table_name = $2
                "#,
                &[&schema, &table],
            )
            .map_err(|e| format_pg_query_error(&e))?;

        let foreign_keys: Vec<ForeignKeyInfo> = fk_rows
            .iter()
            .map(|row| ForeignKeyInfo {
                name: Some(row.get::<_, String>(3)),
                column: row.get(0),
                ref_table: row.get(1),
                ref_column: row.get(2),
            })
            .collect();

        for fk in &foreign_keys {
            if let Some(col) = columns.iter_mut().find(|c| c.name == fk.column) {
                col.foreign_key_ref = Some(ForeignKeyRef { table: fk.ref_table.clone(), column: fk.ref_column.clone() });
            }
        }

        let qualified_name = if schema == DEFAULT_SCHEMA { table.clone() } else { format!("{}.{}", schema, table) };

        Ok(TableSchema { qualified_name, columns, indexes, foreign_keys, approximate_row_count: None })
    }

    fn query(&self, req: &QueryRequest) -> Result<QueryResult, DbError> {
        self.run(req)
    }

    fn exec(&self, req: &QueryRequest) -> Result<u64, DbError> {
        self.cancelled.store(false, Ordering::SeqCst);
        let boxed = bind_params(&req.params);
        let params: Vec<&(dyn ToSql + Sync)> = boxed.iter().map(|p| p.as_ref()).collect();
        let mut client = self.client.lock().expect("postgres connection mutex poisoned");
        client.execute(&req.sql, &params).map_err(|e| self.wrap_error(&e))
    }

    fn query_page(
        &self,
        table: &str,
        where_clause: Option<&str>,
        order_by: Option<&str>,
        offset: u32,
        limit: u32,
    ) -> Result<QueryResult, DbError> {
        let current_schema = self.resolve_schema()?;
        let (schema, bare_table) = self.split_schema_table(table, &current_schema);
        let qualified = DIALECT.qualified_table(Some(schema), bare_table);

        let mut sql = format!("SELECT * FROM {}", qualified);
        if let Some(w) = where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(w);
        }
        if let Some(o) = order_by {
            sql.push_str(" ORDER BY ");
            sql.push_str(o);
        }
        sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset));

        let mut result = self.run(&QueryRequest::new(sql))?;
        result.source_table = Some(table.to_string());
        Ok(result)
    }

    fn update_row(&self, patch: &RowPatch) -> Result<CrudResult, DbError> {
        let builder = SqlQueryBuilder::new(&DIALECT);
        let Some((sql, params)) = builder.build_update(patch, true) else {
            return Ok(CrudResult::empty());
        };
        let row = self.run_returning(&sql, &params)?;
        Ok(match row {
            Some(row) => CrudResult::new(1, Some(row)),
            None => CrudResult::empty(),
        })
    }

    fn insert_row(&self, insert: &RowInsert) -> Result<CrudResult, DbError> {
        let builder = SqlQueryBuilder::new(&DIALECT);
        let Some((sql, params)) = builder.build_insert(insert, true) else {
            return Ok(CrudResult::empty());
        };
        let row = self.run_returning(&sql, &params)?;
        Ok(match row {
            Some(row) => CrudResult::new(1, Some(row)),
            None => CrudResult::empty(),
        })
    }

    fn delete_row(&self, delete: &RowDelete) -> Result<CrudResult, DbError> {
        let builder = SqlQueryBuilder::new(&DIALECT);
        let Some((sql, params)) = builder.build_delete(delete, true) else {
            return Ok(CrudResult::empty());
        };
        let row = self.run_returning(&sql, &params)?;
        Ok(CrudResult::new(if row.is_some() { 1 } else { 0 }, row))
    }

    fn prepare_cancel(&self) -> Option<Arc<dyn QueryCancelHandle>> {
        Some(Arc::new(PostgresCancelHandle { cancel_token: self.cancel_token.clone(), cancelled: Arc::clone(&self.cancelled) }))
    }

    fn dialect(&self) -> &dyn SqlDialect {
        &DIALECT
    }

    /// Reads the planner's last-analyse estimate from `pg_class.reltuples`.
    /// A never-analysed table reports a negative estimate, treated as
    /// unavailable.
    fn estimate_row_count(&self, table: &str) -> Result<i64, DbError> {
        let current_schema = self.resolve_schema()?;
        let (schema, bare_table) = self.split_schema_table(table, &current_schema);

        let mut client = self.client.lock().expect("postgres connection mutex poisoned");
        let row = client
            .query_opt(
                "SELECT c.reltuples FROM pg_class c JOIN pg_namespace n ON n.oid = c.relnamespace \
                 WHERE n.nspname = $1 AND c.relname = $2",
                &[&schema, &bare_table],
            )
            .map_err(|e| format_pg_query_error(&e))?;

        match row {
            Some(row) => {
                let estimate: f32 = row.get(0);
                if estimate < 0.0 {
                    Ok(-1)
                } else {
                    Ok(estimate as i64)
                }
            }
            None => Ok(-1),
        }
    }

    fn count_rows(&self, table: &str, where_clause: Option<&str>) -> Result<i64, DbError> {
        let current_schema = self.resolve_schema()?;
        let (schema, bare_table) = self.split_schema_table(table, &current_schema);
        let qualified = DIALECT.qualified_table(Some(schema), bare_table);

        let mut sql = format!("SELECT COUNT(*) FROM {}", qualified);
        if let Some(w) = where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(w);
        }
        let result = self.run(&QueryRequest::new(sql))?;
        Ok(result.rows.first().and_then(|r| r.first()).and_then(|v| v.to_int()).unwrap_or(0))
    }
}

fn bind_params(values: &[Value]) -> Vec<Box<dyn ToSql + Sync>> {
    values.iter().map(to_sql_param).collect()
}

fn to_sql_param(value: &Value) -> Box<dyn ToSql + Sync> {
    match value {
        Value::Null => Box::new(Option::<String>::None),
        Value::Bool(b) => Box::new(*b),
        Value::Int(i) => Box::new(*i),
        Value::Float(f) => Box::new(*f),
        Value::Text(s) | Value::Json(s) | Value::Decimal(s) => Box::new(s.clone()),
        Value::Bytes(b) => Box::new(b.clone()),
        Value::DateTime(dt) => Box::new(dt.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
        Value::Date(d) => Box::new(d.format("%Y-%m-%d").to_string()),
        Value::Time(t) => Box::new(t.format("%H:%M:%S%.f").to_string()),
    }
}

fn postgres_value_to_value(row: &postgres::Row, idx: usize) -> Value {
    let col_type = row.columns()[idx].type_();

    match col_type.name() {
        "bool" => row.try_get::<_, bool>(idx).map(Value::Bool).unwrap_or(Value::Null),
        "int2" => row.try_get::<_, i16>(idx).map(|v| Value::Int(v as i64)).unwrap_or(Value::Null),
        "int4" | "oid" => row.try_get::<_, i32>(idx).map(|v| Value::Int(v as i64)).unwrap_or(Value::Null),
        "int8" => row.try_get::<_, i64>(idx).map(Value::Int).unwrap_or(Value::Null),
        "float4" => row.try_get::<_, f32>(idx).map(|v| Value::Float(v as f64)).unwrap_or(Value::Null),
        "float8" | "numeric" => row.try_get::<_, f64>(idx).map(Value::Float).unwrap_or(Value::Null),
        "bytea" => row.try_get::<_, Vec<u8>>(idx).map(Value::bytes_checked).unwrap_or(Value::Null),
        _ => match row.try_get::<_, Option<String>>(idx) {
            Ok(Some(s)) => Value::text_checked(s),
            Ok(None) => Value::Null,
            Err(_) => Value::Null,
        },
    }
}

fn format_pg_connection_error(e: &postgres::Error, host: &str, port: u16) -> DbError {
    let source = e.to_string();

    if source.contains("password authentication failed") || source.contains("no password was provided") {
        return DbError::AuthFailed(FormattedError::new("Authentication failed. Check your username and password."));
    }

    let message = if source.contains("timed out") {
        format!("Connection to {}:{} timed out.", host, port)
    } else if source.contains("Connection refused") {
        format!("Connection refused at {}:{}.", host, port)
    } else if source.contains("does not exist") {
        format!("Database or user does not exist: {}", source)
    } else {
        format!("Connection error: {}", source)
    };

    DbError::ConnectionFailed(FormattedError::new(message))
}

fn format_pg_query_error(e: &postgres::Error) -> DbError {
    if let Some(db_err) = e.as_db_error() {
        let mut formatted = FormattedError::new(db_err.message().to_string()).with_code(db_err.code().code().to_string());
        if let Some(detail) = db_err.detail() {
            formatted = formatted.with_detail(detail.to_string());
        }
        if let Some(hint) = db_err.hint() {
            formatted = formatted.with_hint(hint.to_string());
        }

        let mut location = ErrorLocation::new();
        if let Some(constraint) = db_err.constraint() {
            location = location.with_constraint(constraint.to_string());
        }
        if let Some(table) = db_err.table() {
            location = location.with_table(table.to_string());
        }
        if !location.is_empty() {
            formatted = formatted.with_location(location);
        }

        return match *db_err.code() {
            postgres::error::SqlState::UNIQUE_VIOLATION | postgres::error::SqlState::FOREIGN_KEY_VIOLATION => {
                DbError::ConstraintViolation(formatted)
            }
            postgres::error::SqlState::SYNTAX_ERROR => DbError::SyntaxError(formatted),
            _ => DbError::QueryFailed(formatted),
        };
    }

    DbError::query_failed(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dialect_is_postgres() {
        assert_eq!(DIALECT.name(), "postgres");
        assert!(DIALECT.supports_returning());
    }

    #[test]
    fn unknown_sslmode_is_rejected() {
        let config = Config::new();
        let err = connect_with_ssl_mode(&config, "bogus", "localhost", 5432).unwrap_err();
        assert!(matches!(err, DbError::InvalidProfile(_)));
    }
}
