use crate::Value;

/// Placeholder style for parameterized queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `?` placeholders (SQLite, MySQL/MariaDB).
    QuestionMark,
    /// `$1`, `$2`, … (PostgreSQL).
    DollarNumber,
}

/// How a dialect renders a `REGEX` filter against its nearest equivalent
/// operator, per §4.8.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegexStyle {
    /// MySQL/MariaDB: `col REGEXP 'pattern'`.
    Regexp,
    /// PostgreSQL: `col ~ 'pattern'`.
    Tilde,
    /// SQLite has no native regex operator; fall back to `GLOB '*pattern*'`.
    Glob,
}

/// Database-specific SQL syntax: quoting, qualification, literal rendering,
/// and placeholder style.
pub trait SqlDialect: Send + Sync {
    /// Quote an identifier (table or column name).
    fn quote_identifier(&self, name: &str) -> String;

    /// Build a qualified table reference, e.g. `"public"."users"` or
    /// `` `users` `` (MySQL has no schema prefix; the current database is
    /// implicit on the connection).
    fn qualified_table(&self, schema: Option<&str>, table: &str) -> String;

    /// Render a `Value` as a SQL literal. Used for filter WHERE fragments,
    /// which travel as escaped literal text rather than bound parameters.
    fn value_to_literal(&self, value: &Value) -> String;

    /// Escape a string for embedding inside a single-quoted literal.
    fn escape_string(&self, s: &str) -> String;

    fn placeholder_style(&self) -> PlaceholderStyle;

    /// Render the Nth (1-based) placeholder for a bound parameter.
    fn placeholder(&self, index: usize) -> String {
        match self.placeholder_style() {
            PlaceholderStyle::QuestionMark => "?".to_string(),
            PlaceholderStyle::DollarNumber => format!("${}", index),
        }
    }

    fn regex_style(&self) -> RegexStyle;

    /// Whether this dialect supports `RETURNING` on INSERT/UPDATE/DELETE.
    fn supports_returning(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str;
}

fn value_to_literal_default(dialect: &dyn SqlDialect, value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => {
            if f.is_nan() {
                "'NaN'".to_string()
            } else if f.is_infinite() {
                if *f > 0.0 {
                    "'Infinity'".to_string()
                } else {
                    "'-Infinity'".to_string()
                }
            } else {
                f.to_string()
            }
        }
        Value::Text(s) | Value::Json(s) => format!("'{}'", dialect.escape_string(s)),
        Value::Bytes(b) => {
            let hex: String = b.iter().map(|byte| format!("{:02x}", byte)).collect();
            format!("X'{}'", hex)
        }
        Value::Decimal(s) => s.clone(),
        Value::DateTime(dt) => format!("'{}'", dt.format("%Y-%m-%d %H:%M:%S%.f")),
        Value::Date(d) => format!("'{}'", d.format("%Y-%m-%d")),
        Value::Time(t) => format!("'{}'", t.format("%H:%M:%S%.f")),
    }
}

/// SQLite: double-quoted identifiers, `?` placeholders, GLOB-based regex
/// fallback, no schema qualification.
pub struct SqliteDialect;

impl SqlDialect for SqliteDialect {
    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn qualified_table(&self, _schema: Option<&str>, table: &str) -> String {
        self.quote_identifier(table)
    }

    fn value_to_literal(&self, value: &Value) -> String {
        value_to_literal_default(self, value)
    }

    fn escape_string(&self, s: &str) -> String {
        s.replace('\'', "''")
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::QuestionMark
    }

    fn regex_style(&self) -> RegexStyle {
        RegexStyle::Glob
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}

/// PostgreSQL: double-quoted identifiers, schema-qualified tables,
/// `$1`-style placeholders, native `~` regex, RETURNING support.
pub struct PostgresDialect;

impl SqlDialect for PostgresDialect {
    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn qualified_table(&self, schema: Option<&str>, table: &str) -> String {
        match schema {
            Some(s) => format!("{}.{}", self.quote_identifier(s), self.quote_identifier(table)),
            None => self.quote_identifier(table),
        }
    }

    fn value_to_literal(&self, value: &Value) -> String {
        value_to_literal_default(self, value)
    }

    fn escape_string(&self, s: &str) -> String {
        s.replace('\'', "''")
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::DollarNumber
    }

    fn regex_style(&self) -> RegexStyle {
        RegexStyle::Tilde
    }

    fn supports_returning(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "postgres"
    }
}

/// MySQL/MariaDB: backtick identifiers, no schema prefix (current database
/// is implicit), `?` placeholders, `REGEXP`.
pub struct MySqlDialect;

impl SqlDialect for MySqlDialect {
    fn quote_identifier(&self, name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }

    fn qualified_table(&self, _schema: Option<&str>, table: &str) -> String {
        self.quote_identifier(table)
    }

    fn value_to_literal(&self, value: &Value) -> String {
        value_to_literal_default(self, value)
    }

    fn escape_string(&self, s: &str) -> String {
        s.replace('\'', "''")
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::QuestionMark
    }

    fn regex_style(&self) -> RegexStyle {
        RegexStyle::Regexp
    }

    fn name(&self) -> &'static str {
        "mysql"
    }
}
