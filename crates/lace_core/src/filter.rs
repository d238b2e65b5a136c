use crate::arena::StringBuilder;
use crate::sql_dialect::{RegexStyle, SqlDialect};
use crate::{TableSchema, Value};

/// Sentinel `column_index` for a RAW filter, whose `value` is an arbitrary
/// SQL boolean expression emitted verbatim inside parentheses.
pub const RAW_SENTINEL: usize = usize::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    In,
    Contains,
    Regex,
    Between,
    IsEmpty,
    IsNotEmpty,
    IsNull,
    IsNotNull,
    Raw,
}

impl FilterOp {
    fn requires_value(&self) -> bool {
        !matches!(self, FilterOp::IsNull | FilterOp::IsNotNull | FilterOp::Raw)
    }
}

#[derive(Debug, Clone)]
pub struct Filter {
    pub column_index: usize,
    pub operator: FilterOp,
    pub value: String,
    pub value2: Option<String>,
}

impl Filter {
    pub fn raw(expr: impl Into<String>) -> Self {
        Self {
            column_index: RAW_SENTINEL,
            operator: FilterOp::Raw,
            value: expr.into(),
            value2: None,
        }
    }

    pub fn new(column_index: usize, operator: FilterOp, value: impl Into<String>) -> Self {
        Self {
            column_index,
            operator,
            value: value.into(),
            value2: None,
        }
    }

    pub fn between(column_index: usize, lo: impl Into<String>, hi: impl Into<String>) -> Self {
        Self {
            column_index,
            operator: FilterOp::Between,
            value: lo.into(),
            value2: Some(hi.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone)]
pub struct SortEntry {
    pub column_index: usize,
    pub direction: SortDirection,
}

pub const MAX_SORT_COLUMNS: usize = 16;

/// Compile a filter list into a WHERE fragment (without the `WHERE` keyword)
/// using the schema's column names and the connection's SQL dialect. Returns
/// `None` when every filter was skipped.
pub fn build_where(filters: &[Filter], schema: &TableSchema, dialect: &dyn SqlDialect) -> Option<String> {
    let mut builder = StringBuilder::new();
    let mut clause_count = 0;

    for filter in filters {
        if filter.operator.requires_value() && filter.value.is_empty() {
            continue;
        }

        let clause = if filter.operator == FilterOp::Raw {
            format!("({})", filter.value)
        } else {
            if filter.column_index >= schema.column_count() {
                continue;
            }
            let column = &schema.columns[filter.column_index];
            let col = dialect.quote_identifier(&column.name);
            emit_clause(&col, filter, dialect)
        };

        if clause_count > 0 {
            builder.push_str(" AND ");
        }
        builder.push_str(&clause);
        clause_count += 1;
    }

    if clause_count == 0 {
        None
    } else {
        builder.finish()
    }
}

/// Compile sort entries into an ORDER BY fragment (without the keyword).
pub fn build_order_by(sorts: &[SortEntry], schema: &TableSchema, dialect: &dyn SqlDialect) -> Option<String> {
    let mut builder = StringBuilder::new();
    let mut entry_count = 0;

    for sort in sorts.iter().take(MAX_SORT_COLUMNS) {
        if sort.column_index >= schema.column_count() {
            continue;
        }
        let col = dialect.quote_identifier(&schema.columns[sort.column_index].name);
        let dir = match sort.direction {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        };

        if entry_count > 0 {
            builder.push_str(", ");
        }
        builder.push_str(&col);
        builder.push(' ');
        builder.push_str(dir);
        entry_count += 1;
    }

    if entry_count == 0 {
        None
    } else {
        builder.finish()
    }
}

fn emit_clause(col: &str, filter: &Filter, dialect: &dyn SqlDialect) -> String {
    let lit = |s: &str| format!("'{}'", escape_single_quote(s));

    match filter.operator {
        FilterOp::Eq => format!("{} = {}", col, lit(&filter.value)),
        FilterOp::Ne => format!("{} <> {}", col, lit(&filter.value)),
        FilterOp::Gt => format!("{} > {}", col, lit(&filter.value)),
        FilterOp::Ge => format!("{} >= {}", col, lit(&filter.value)),
        FilterOp::Lt => format!("{} < {}", col, lit(&filter.value)),
        FilterOp::Le => format!("{} <= {}", col, lit(&filter.value)),
        FilterOp::In => format!("{} IN ({})", col, emit_in_list(&filter.value)),
        FilterOp::Contains => format!("{} LIKE {}", col, lit(&format!("%{}%", filter.value))),
        FilterOp::Regex => emit_regex(col, &filter.value, dialect),
        FilterOp::Between => {
            let hi = filter.value2.as_deref().unwrap_or("");
            format!("{} BETWEEN {} AND {}", col, lit(&filter.value), lit(hi))
        }
        FilterOp::IsEmpty => format!("{} = ''", col),
        FilterOp::IsNotEmpty => format!("{} <> ''", col),
        FilterOp::IsNull => format!("{} IS NULL", col),
        FilterOp::IsNotNull => format!("{} IS NOT NULL", col),
        FilterOp::Raw => unreachable!("raw filters are emitted before reaching here"),
    }
}

fn emit_regex(col: &str, pattern: &str, dialect: &dyn SqlDialect) -> String {
    let escaped = escape_single_quote(pattern);
    match dialect.regex_style() {
        RegexStyle::Regexp => format!("{} REGEXP '{}'", col, escaped),
        RegexStyle::Tilde => format!("{} ~ '{}'", col, escaped),
        RegexStyle::Glob => format!("{} GLOB '*{}*'", col, escaped),
    }
}

fn escape_single_quote(s: &str) -> String {
    s.replace('\'', "''")
}

/// Parse an `IN` filter value into a comma-joined SQL literal list, handling
/// quoted strings, bare numerics, and `\,`-escaped commas inside an
/// unquoted item. On parse failure the filter degrades to `IN (NULL)`
/// (matches nothing) rather than producing invalid SQL.
fn emit_in_list(raw: &str) -> String {
    let items = match split_in_list(raw) {
        Some(items) if !items.is_empty() => items,
        _ => return "NULL".to_string(),
    };

    items
        .into_iter()
        .map(|item| {
            if item.parse::<f64>().is_ok() {
                item
            } else {
                format!("'{}'", escape_single_quote(&item))
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn split_in_list(raw: &str) -> Option<Vec<String>> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&',') => {
                current.push(',');
                chars.next();
            }
            '\'' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                items.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }

    if in_quotes {
        return None;
    }

    if !current.trim().is_empty() || !items.is_empty() {
        items.push(current.trim().to_string());
    }

    Some(items.into_iter().filter(|s| !s.is_empty()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnInfo, LogicalType};
    use crate::sql_dialect::PostgresDialect;

    fn schema() -> TableSchema {
        TableSchema {
            qualified_name: "users".into(),
            columns: vec![
                ColumnInfo {
                    name: "name".into(),
                    logical_type: LogicalType::Text,
                    driver_type_name: "TEXT".into(),
                    nullable: true,
                    primary_key: false,
                    auto_increment: false,
                    default_expr: None,
                    foreign_key_ref: None,
                    max_length: None,
                },
                ColumnInfo {
                    name: "age".into(),
                    logical_type: LogicalType::Int,
                    driver_type_name: "INT".into(),
                    nullable: true,
                    primary_key: false,
                    auto_increment: false,
                    default_expr: None,
                    foreign_key_ref: None,
                    max_length: None,
                },
            ],
            indexes: vec![],
            foreign_keys: vec![],
            approximate_row_count: None,
        }
    }

    #[test]
    fn composes_where_scenario_1() {
        let dialect = PostgresDialect;
        let s = schema();
        let filters = vec![
            Filter::new(0, FilterOp::Contains, "oe"),
            Filter::new(1, FilterOp::Ge, "21"),
        ];
        let where_clause = build_where(&filters, &s, &dialect).unwrap();
        assert_eq!(where_clause, "\"name\" LIKE '%oe%' AND \"age\" >= '21'");
    }

    #[test]
    fn empty_value_is_skipped() {
        let dialect = PostgresDialect;
        let s = schema();
        let filters = vec![Filter::new(0, FilterOp::Eq, "")];
        assert!(build_where(&filters, &s, &dialect).is_none());
    }

    #[test]
    fn out_of_range_column_is_skipped() {
        let dialect = PostgresDialect;
        let s = schema();
        let filters = vec![Filter::new(99, FilterOp::Eq, "x")];
        assert!(build_where(&filters, &s, &dialect).is_none());
    }

    #[test]
    fn raw_filter_emits_verbatim() {
        let dialect = PostgresDialect;
        let s = schema();
        let filters = vec![Filter::raw("age > 10 OR age IS NULL")];
        assert_eq!(
            build_where(&filters, &s, &dialect).unwrap(),
            "(age > 10 OR age IS NULL)"
        );
    }

    #[test]
    fn in_list_parses_mixed_items() {
        let dialect = PostgresDialect;
        let s = schema();
        let filters = vec![Filter::new(0, FilterOp::In, "'a,b',c,3")];
        assert_eq!(
            build_where(&filters, &s, &dialect).unwrap(),
            "\"name\" IN ('a,b', 'c', 3)"
        );
    }

    #[test]
    fn unterminated_quote_falls_back_to_null() {
        let dialect = PostgresDialect;
        let s = schema();
        let filters = vec![Filter::new(0, FilterOp::In, "'unterminated")];
        assert_eq!(build_where(&filters, &s, &dialect).unwrap(), "\"name\" IN (NULL)");
    }

    #[test]
    fn order_by_respects_max_sort_columns() {
        let dialect = PostgresDialect;
        let s = schema();
        let sorts: Vec<SortEntry> = (0..20)
            .map(|_| SortEntry {
                column_index: 0,
                direction: SortDirection::Asc,
            })
            .collect();
        let order_by = build_order_by(&sorts, &s, &dialect).unwrap();
        assert_eq!(order_by.matches(',').count() + 1, MAX_SORT_COLUMNS);
    }
}
