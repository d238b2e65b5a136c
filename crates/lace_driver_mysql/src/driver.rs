use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use lace_core::{
    enforce_max_result_rows, reselect_after_mutation, ColumnInfo, ColumnMeta, Connection, ConnStr,
    ConnectionStatus, CrudResult, DatabaseInfo, DbDriver, DbError, ErrorLocation, ForeignKeyInfo,
    ForeignKeyRef, FormattedError, IndexInfo, MySqlDialect, QueryCancelHandle, QueryRequest,
    QueryResult, RecordIdentity, Row, RowDelete, RowInsert, RowPatch, SqlDialect, SqlQueryBuilder,
    TableSchema, Value, MAX_RESULT_ROWS,
};
use mysql::prelude::Queryable;
use mysql::{Conn, Opts, OptsBuilder, Params, SslOpts, Value as MySqlValue};

static DIALECT: MySqlDialect = MySqlDialect;

/// Driver factory for MySQL and MariaDB, registered alongside the SQLite and
/// PostgreSQL drivers. MariaDB speaks the same wire protocol and is routed
/// through this same driver by the connection-string parser's `Driver`
/// enum — there is no separate dialect needed.
pub struct MySqlDriver;

impl MySqlDriver {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MySqlDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl DbDriver for MySqlDriver {
    fn display_name(&self) -> &'static str {
        "MySQL"
    }

    fn connect(&self, connstr: &ConnStr) -> Result<Box<dyn Connection>, DbError> {
        let host = connstr.host.clone();
        let port = connstr.get_port().unwrap_or(3306);
        let user = connstr.user.clone().unwrap_or_else(|| "root".to_string());
        let password = connstr.password.clone();
        let database = connstr.database.clone();
        let ssl_mode = connstr.options.get("sslmode").unwrap_or("disable").to_string();

        let mut builder = OptsBuilder::new()
            .ip_or_hostname(Some(host.clone()))
            .tcp_port(port)
            .user(Some(user))
            .pass(password)
            .db_name(Some(database));

        if let Some(ssl_opts) = ssl_opts_for_mode(&ssl_mode)? {
            builder = builder.ssl_opts(ssl_opts);
        }

        let opts: Opts = builder.into();

        let mut conn = Conn::new(opts.clone()).map_err(|e| {
            let err = format_mysql_connection_error(&e, &host, port);
            log::warn!("mysql: failed to connect to {}:{}: {}", host, port, err);
            err
        })?;

        let connection_id: u64 = conn
            .query_first("SELECT CONNECTION_ID()")
            .map_err(|e| format_mysql_connection_error(&e, &host, port))?
            .unwrap_or(0);

        log::debug!("mysql: connected to {}:{} (connection id {})", host, port, connection_id);

        Ok(Box::new(MySqlConnection {
            conn: Mutex::new(conn),
            opts,
            connection_id,
            cancelled: Arc::new(AtomicBool::new(false)),
            status: Mutex::new(ConnectionStatus::Connected),
            max_result_rows: MAX_RESULT_ROWS,
        }))
    }
}

fn ssl_opts_for_mode(mode: &str) -> Result<Option<SslOpts>, DbError> {
    match mode {
        "disable" => Ok(None),
        "require" | "prefer" | "verify-full" | "verify-ca" => Ok(Some(
            SslOpts::default()
                .with_danger_accept_invalid_certs(mode != "verify-full" && mode != "verify-ca")
                .with_danger_skip_domain_validation(mode == "prefer" || mode == "require"),
        )),
        other => Err(DbError::InvalidProfile(format!("unknown sslmode: {}", other))),
    }
}

pub struct MySqlConnection {
    conn: Mutex<Conn>,
    opts: Opts,
    connection_id: u64,
    cancelled: Arc<AtomicBool>,
    status: Mutex<ConnectionStatus>,
    max_result_rows: i64,
}

pub struct MySqlCancelHandle {
    opts: Opts,
    connection_id: u64,
    cancelled: Arc<AtomicBool>,
}

impl QueryCancelHandle for MySqlCancelHandle {
    /// MySQL has no protocol-level cancel; this opens a side connection and
    /// issues `KILL QUERY` against the connection id captured at connect
    /// time, a best-effort approach since the target query may already have
    /// finished by the time the side connection is established.
    fn cancel(&self) -> Result<(), DbError> {
        log::debug!("mysql: cancelling query on connection {}", self.connection_id);
        self.cancelled.store(true, Ordering::SeqCst);
        let mut side = Conn::new(self.opts.clone()).map_err(|e| DbError::query_failed(e.to_string()))?;
        side.query_drop(format!("KILL QUERY {}", self.connection_id))
            .map_err(|e| DbError::query_failed(e.to_string()))?;
        Ok(())
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl MySqlConnection {
    fn run(&self, req: &QueryRequest) -> Result<QueryResult, DbError> {
        self.cancelled.store(false, Ordering::SeqCst);
        let start = Instant::now();

        let mut conn = self.conn.lock().expect("mysql connection mutex poisoned");
        let params = bind_params(&req.params);
        let mut exec_result = conn.exec_iter(&req.sql, params).map_err(|e| self.wrap_error(&e))?;

        let raw_columns = exec_result.columns();
        let columns: Vec<ColumnMeta> = raw_columns
            .as_ref()
            .iter()
            .map(|c| ColumnMeta {
                name: c.name_str().to_string(),
                type_name: format!("{:?}", c.column_type()),
                nullable: true,
            })
            .collect();
        // TINYINT(1) is MySQL's boolean convention; column_length() is the display
        // width, which is 1 for the bool-like form and wider for a plain tinyint.
        let bool_columns: Vec<bool> = raw_columns
            .as_ref()
            .iter()
            .map(|c| c.column_type() == mysql::consts::ColumnType::MYSQL_TYPE_TINY && c.column_length() == 1)
            .collect();
        let column_count = columns.len();

        let mut rows_out: Vec<Row> = Vec::new();
        for row_result in exec_result.by_ref() {
            let row: mysql::Row = row_result.map_err(|e| self.wrap_error(&e))?;
            let mut values = Vec::with_capacity(column_count);
            for i in 0..column_count {
                let raw = row.as_ref(i).cloned().unwrap_or(MySqlValue::NULL);
                values.push(if bool_columns[i] {
                    mysql_tinyint_to_bool(&raw)
                } else {
                    mysql_value_to_value(&raw)
                });
            }
            rows_out.push(values);
            if let Some(limit) = req.limit
                && rows_out.len() >= limit as usize
            {
                break;
            }
            if self.max_result_rows > 0 && rows_out.len() as i64 > self.max_result_rows {
                break;
            }
        }

        enforce_max_result_rows(&mut rows_out, self.max_result_rows)?;
        let mut result = QueryResult::for_select(columns, rows_out, -1);
        result.execution_time = start.elapsed();
        Ok(result)
    }

    fn wrap_error(&self, e: &mysql::Error) -> DbError {
        if self.cancelled.load(Ordering::SeqCst) {
            return DbError::Cancelled;
        }
        format_mysql_query_error(e)
    }

    fn auto_increment_pk(&self, table: &str) -> Result<Option<String>, DbError> {
        let schema = self.get_table_schema(table)?;
        Ok(schema
            .columns
            .into_iter()
            .find(|c| c.primary_key && c.auto_increment)
            .map(|c| c.name))
    }
}

impl Connection for MySqlConnection {
    fn disconnect(&mut self) -> Result<(), DbError> {
        log::debug!("mysql: disconnecting connection {}", self.connection_id);
        *self.status.lock().expect("status mutex poisoned") = ConnectionStatus::Disconnected;
        Ok(())
    }

    fn ping(&self) -> bool {
        let mut conn = match self.conn.lock() {
            Ok(c) => c,
            Err(_) => return false,
        };
        conn.query_drop("SELECT 1").is_ok()
    }

    fn status(&self) -> ConnectionStatus {
        *self.status.lock().expect("status mutex poisoned")
    }

    fn list_tables(&self) -> Result<Vec<String>, DbError> {
        let mut conn = self.conn.lock().expect("mysql connection mutex poisoned");
        conn.query(
            "SELECT TABLE_NAME FROM information_schema.tables \
             WHERE TABLE_SCHEMA = DATABASE() AND TABLE_TYPE = 'BASE TABLE' ORDER BY TABLE_NAME",
        )
        .map_err(|e| format_mysql_query_error(&e))
    }

    fn list_databases(&self) -> Result<Vec<DatabaseInfo>, DbError> {
        let mut conn = self.conn.lock().expect("mysql connection mutex poisoned");
        let rows: Vec<(String, bool)> = conn
            .query(
                "SELECT SCHEMA_NAME, SCHEMA_NAME = DATABASE() FROM information_schema.SCHEMATA \
                 WHERE SCHEMA_NAME NOT IN ('information_schema', 'mysql', 'performance_schema', 'sys') \
                 ORDER BY SCHEMA_NAME",
            )
            .map_err(|e| format_mysql_query_error(&e))?;
        Ok(rows.into_iter().map(|(name, is_current)| DatabaseInfo { name, is_current }).collect())
    }

    fn get_table_schema(&self, qualified_name: &str) -> Result<TableSchema, DbError> {
        let table = qualified_name.to_string();
        let mut conn = self.conn.lock().expect("mysql connection mutex poisoned");

        let column_rows: Vec<(String, String, String, String, Option<String>, String, Option<u64>)> = conn
            .exec(
                "SELECT COLUMN_NAME, DATA_TYPE, COLUMN_TYPE, IS_NULLABLE, COLUMN_DEFAULT, EXTRA, \
                        CHARACTER_MAXIMUM_LENGTH \
                 FROM information_schema.columns \
                 WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? \
                 ORDER BY ORDINAL_POSITION",
                (table.clone(),),
            )
            .map_err(|e| format_mysql_query_error(&e))?;

        if column_rows.is_empty() {
            return Err(DbError::object_not_found(format!("table {} not found", qualified_name)));
        }

        let pk_rows: Vec<String> = conn
            .exec(
                "SELECT COLUMN_NAME FROM information_schema.key_column_usage \
                 WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? AND CONSTRAINT_NAME = 'PRIMARY'",
                (table.clone(),),
            )
            .map_err(|e| format_mysql_query_error(&e))?;

        let mut columns: Vec<ColumnInfo> = column_rows
            .into_iter()
            .map(|(name, data_type, column_type, is_nullable, default_expr, extra, max_length)| {
                let logical_type = if column_type.eq_ignore_ascii_case("tinyint(1)") {
                    lace_core::infer_logical_type("BOOLEAN")
                } else {
                    lace_core::infer_logical_type(&data_type)
                };
                ColumnInfo {
                    primary_key: pk_rows.contains(&name),
                    auto_increment: extra.to_ascii_lowercase().contains("auto_increment"),
                    name,
                    logical_type,
                    driver_type_name: column_type,
                    nullable: is_nullable.eq_ignore_ascii_case("YES"),
                    default_expr,
                    foreign_key_ref: None,
                    max_length,
                }
            })
            .collect();

        let index_rows: Vec<(String, String, i64, i64)> = conn
            .exec(
                "SELECT INDEX_NAME, COLUMN_NAME, NON_UNIQUE, SEQ_IN_INDEX \
                 FROM information_schema.statistics \
                 WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? \
                 ORDER BY INDEX_NAME, SEQ_IN_INDEX",
                (table.clone(),),
            )
            .map_err(|e| format_mysql_query_error(&e))?;

        let mut indexes: Vec<IndexInfo> = Vec::new();
        for (index_name, column_name, non_unique, _seq) in index_rows {
            if let Some(existing) = indexes.iter_mut().find(|idx: &&mut IndexInfo| idx.name == index_name) {
                existing.columns.push(column_name);
            } else {
                indexes.push(IndexInfo {
                    is_primary: index_name == "PRIMARY",
                    is_unique: non_unique == 0,
                    name: index_name,
                    columns: vec![column_name],
                });
            }
        }

        let fk_rows: Vec<(String, String, String, String)> = conn
            .exec(
                "SELECT COLUMN_NAME, REFERENCED_TABLE_NAME, REFERENCED_COLUMN_NAME, CONSTRAINT_NAME \
                 FROM information_schema.key_column_usage \
                 WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? AND REFERENCED_TABLE_NAME IS NOT NULL",
                (table.clone(),),
            )
            .map_err(|e| format_mysql_query_error(&e))?;

        let foreign_keys: Vec<ForeignKeyInfo> = fk_rows
            .into_iter()
            .map(|(column, ref_table, ref_column, name)| ForeignKeyInfo {
                name: Some(name),
                column,
                ref_table,
                ref_column,
            })
            .collect();

        for fk in &foreign_keys {
            if let Some(col) = columns.iter_mut().find(|c| c.name == fk.column) {
                col.foreign_key_ref = Some(ForeignKeyRef { table: fk.ref_table.clone(), column: fk.ref_column.clone() });
            }
        }

        Ok(TableSchema { qualified_name: table, columns, indexes, foreign_keys, approximate_row_count: None })
    }

    fn query(&self, req: &QueryRequest) -> Result<QueryResult, DbError> {
        self.run(req)
    }

    fn exec(&self, req: &QueryRequest) -> Result<u64, DbError> {
        self.cancelled.store(false, Ordering::SeqCst);
        let mut conn = self.conn.lock().expect("mysql connection mutex poisoned");
        let params = bind_params(&req.params);
        conn.exec_drop(&req.sql, params).map_err(|e| self.wrap_error(&e))?;
        Ok(conn.affected_rows())
    }

    fn query_page(
        &self,
        table: &str,
        where_clause: Option<&str>,
        order_by: Option<&str>,
        offset: u32,
        limit: u32,
    ) -> Result<QueryResult, DbError> {
        let mut sql = format!("SELECT * FROM {}", DIALECT.quote_identifier(table));
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
        let Some((sql, params)) = builder.build_update(patch, false) else {
            return Ok(CrudResult::empty());
        };
        let affected = self.exec(&QueryRequest::new(sql).with_params(params))?;
        if affected == 0 {
            return Ok(CrudResult::empty());
        }
        let row = reselect_after_mutation(self, &DIALECT, patch.schema.as_deref(), &patch.table, &patch.identity)?;
        Ok(CrudResult::new(affected, row))
    }

    fn insert_row(&self, insert: &RowInsert) -> Result<CrudResult, DbError> {
        let builder = SqlQueryBuilder::new(&DIALECT);
        let Some((sql, params)) = builder.build_insert(insert, false) else {
            return Ok(CrudResult::empty());
        };
        self.exec(&QueryRequest::new(sql).with_params(params))?;

        let last_id = {
            let mut conn = self.conn.lock().expect("mysql connection mutex poisoned");
            conn.last_insert_id()
        };

        let pk_column = self.auto_increment_pk(&insert.table)?;
        let row = match (pk_column, last_id) {
            (Some(col), id) if id > 0 => {
                let identity = RecordIdentity::composite(vec![col], vec![Value::Int(id as i64)]);
                reselect_after_mutation(self, &DIALECT, insert.schema.as_deref(), &insert.table, &identity)?
            }
            _ => None,
        };

        Ok(CrudResult::new(1, row))
    }

    fn delete_row(&self, delete: &RowDelete) -> Result<CrudResult, DbError> {
        let builder = SqlQueryBuilder::new(&DIALECT);
        let Some((sql, params)) = builder.build_delete(delete, false) else {
            return Ok(CrudResult::empty());
        };
        let affected = self.exec(&QueryRequest::new(sql).with_params(params))?;
        Ok(CrudResult::new(affected, None))
    }

    fn prepare_cancel(&self) -> Option<Arc<dyn QueryCancelHandle>> {
        Some(Arc::new(MySqlCancelHandle {
            opts: self.opts.clone(),
            connection_id: self.connection_id,
            cancelled: Arc::clone(&self.cancelled),
        }))
    }

    fn dialect(&self) -> &dyn SqlDialect {
        &DIALECT
    }

    /// Reads the InnoDB persistent-statistics estimate from
    /// `information_schema.tables.TABLE_ROWS`, refreshed by `ANALYZE TABLE`
    /// and periodic background sampling rather than kept exact. A missing
    /// row reports unavailable.
    fn estimate_row_count(&self, table: &str) -> Result<i64, DbError> {
        let mut conn = self.conn.lock().expect("mysql connection mutex poisoned");
        let estimate: Option<Option<i64>> = conn
            .exec_first(
                "SELECT TABLE_ROWS FROM information_schema.tables \
                 WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?",
                (table.to_string(),),
            )
            .map_err(|e| format_mysql_query_error(&e))?;

        Ok(estimate.flatten().unwrap_or(-1))
    }

    fn count_rows(&self, table: &str, where_clause: Option<&str>) -> Result<i64, DbError> {
        let mut sql = format!("SELECT COUNT(*) FROM {}", DIALECT.quote_identifier(table));
        if let Some(w) = where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(w);
        }
        let result = self.run(&QueryRequest::new(sql))?;
        Ok(result.rows.first().and_then(|r| r.first()).and_then(|v| v.to_int()).unwrap_or(0))
    }
}

fn bind_params(values: &[Value]) -> Params {
    let mysql_values: Vec<MySqlValue> = values.iter().map(to_mysql_value).collect();
    Params::from(mysql_values)
}

fn to_mysql_value(value: &Value) -> MySqlValue {
    match value {
        Value::Null => MySqlValue::NULL,
        Value::Bool(b) => MySqlValue::Int(*b as i64),
        Value::Int(i) => MySqlValue::Int(*i),
        Value::Float(f) => MySqlValue::Double(*f),
        Value::Text(s) | Value::Json(s) | Value::Decimal(s) => MySqlValue::Bytes(s.clone().into_bytes()),
        Value::Bytes(b) => MySqlValue::Bytes(b.clone()),
        Value::DateTime(dt) => MySqlValue::Bytes(dt.format("%Y-%m-%d %H:%M:%S%.f").to_string().into_bytes()),
        Value::Date(d) => MySqlValue::Bytes(d.format("%Y-%m-%d").to_string().into_bytes()),
        Value::Time(t) => MySqlValue::Bytes(t.format("%H:%M:%S%.f").to_string().into_bytes()),
    }
}

fn mysql_tinyint_to_bool(value: &MySqlValue) -> Value {
    match value {
        MySqlValue::NULL => Value::Null,
        MySqlValue::Int(i) => Value::Bool(*i != 0),
        MySqlValue::UInt(u) => Value::Bool(*u != 0),
        other => mysql_value_to_value(other),
    }
}

fn mysql_value_to_value(value: &MySqlValue) -> Value {
    match value {
        MySqlValue::NULL => Value::Null,
        MySqlValue::Bytes(bytes) => match std::str::from_utf8(bytes) {
            Ok(s) => Value::text_checked(s),
            Err(_) => Value::bytes_checked(bytes.clone()),
        },
        MySqlValue::Int(i) => Value::Int(*i),
        MySqlValue::UInt(u) => Value::Int(i64::try_from(*u).unwrap_or(i64::MAX)),
        MySqlValue::Float(f) => Value::Float(*f as f64),
        MySqlValue::Double(d) => Value::Float(*d),
        MySqlValue::Date(year, month, day, hour, minute, second, micros) => {
            let Some(date) = NaiveDate::from_ymd_opt(*year as i32, *month as u32, *day as u32) else {
                return Value::Null;
            };
            if *hour == 0 && *minute == 0 && *second == 0 && *micros == 0 {
                return Value::Date(date);
            }
            let Some(time) = NaiveTime::from_hms_micro_opt(*hour as u32, *minute as u32, *second as u32, *micros)
            else {
                return Value::Null;
            };
            Value::DateTime(Utc.from_utc_datetime(&NaiveDateTime::new(date, time)))
        }
        MySqlValue::Time(negative, days, hours, minutes, seconds, micros) => {
            let total_seconds = i64::from(*days) * 86_400
                + i64::from(*hours) * 3_600
                + i64::from(*minutes) * 60
                + i64::from(*seconds);
            let total_seconds = if *negative { -total_seconds } else { total_seconds };
            let normalized = total_seconds.rem_euclid(86_400) as u32;
            match NaiveTime::from_num_seconds_from_midnight_opt(normalized, micros * 1_000) {
                Some(t) => Value::Time(t),
                None => Value::Null,
            }
        }
    }
}

fn format_mysql_connection_error(e: &mysql::Error, host: &str, port: u16) -> DbError {
    let source = e.to_string();

    if source.contains("Access denied") || source.contains("No password supplied") {
        return DbError::AuthFailed(FormattedError::new("Authentication failed. Check your username and password."));
    }

    let message = if source.contains("timed out") {
        format!("Connection to {}:{} timed out.", host, port)
    } else if source.contains("Connection refused") {
        format!("Connection refused at {}:{}.", host, port)
    } else if source.contains("Unknown database") {
        format!("Database does not exist: {}", source)
    } else {
        format!("Connection error: {}", source)
    };

    DbError::ConnectionFailed(FormattedError::new(message))
}

fn format_mysql_query_error(e: &mysql::Error) -> DbError {
    if let mysql::Error::MySqlError(server_error) = e {
        let mut formatted =
            FormattedError::new(server_error.message.clone()).with_code(server_error.code.to_string());

        let mut location = ErrorLocation::new();
        if let Some(constraint) = extract_constraint_name(&server_error.message) {
            location = location.with_constraint(constraint);
        }
        if !location.is_empty() {
            formatted = formatted.with_location(location);
        }

        return match server_error.code {
            1062 | 1452 | 1451 => DbError::ConstraintViolation(formatted),
            1064 => DbError::SyntaxError(formatted),
            1045 | 1044 => DbError::AuthFailed(formatted),
            1146 => DbError::ObjectNotFound(formatted),
            1213 => DbError::TransactionFailed(formatted),
            _ => DbError::QueryFailed(formatted),
        };
    }

    DbError::query_failed(e.to_string())
}

/// MySQL reports the offending unique/foreign-key constraint inline in the
/// error message (`... for key 'users.email_unique'`) rather than as a
/// structured field the driver can read separately.
fn extract_constraint_name(message: &str) -> Option<String> {
    let marker = "for key '";
    let start = message.find(marker)? + marker.len();
    let end = message[start..].find('\'')? + start;
    Some(message[start..end].to_string())
}
