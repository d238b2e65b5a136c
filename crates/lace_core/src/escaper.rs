use crate::sql_dialect::PlaceholderStyle;

/// Wrap an identifier in double quotes, doubling any embedded quote.
/// SQLite and PostgreSQL both use this form.
pub fn escape_identifier_dquote(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Wrap an identifier in backticks, doubling any embedded backtick.
/// MySQL/MariaDB form.
pub fn escape_identifier_backtick(s: &str) -> String {
    format!("`{}`", s.replace('`', "``"))
}

/// Remove a dialect's identifier quoting, inverse of `escape_identifier_*`.
pub fn unquote_dquote(s: &str) -> String {
    let inner = s.strip_prefix('"').and_then(|s| s.strip_suffix('"')).unwrap_or(s);
    inner.replace("\"\"", "\"")
}

pub fn unquote_backtick(s: &str) -> String {
    let inner = s.strip_prefix('`').and_then(|s| s.strip_suffix('`')).unwrap_or(s);
    inner.replace("``", "`")
}

/// Split a PostgreSQL-style schema-qualified table name on the first `.`,
/// quoting each half independently and rejoining. `users` stays unqualified;
/// `public.users` becomes `"public"."users"`.
pub fn split_qualified_table_dquote(qualified: &str) -> String {
    match qualified.split_once('.') {
        Some((schema, table)) => format!("{}.{}", escape_identifier_dquote(schema), escape_identifier_dquote(table)),
        None => escape_identifier_dquote(qualified),
    }
}

/// Compose `col1 = ? AND col2 = ?` (or `$1, $2…` for PostgreSQL) for a
/// composite primary key, starting numbering at `start_index` for
/// `DollarNumber` dialects.
pub fn build_pk_where(
    cols: &[String],
    placeholder_style: PlaceholderStyle,
    start_index: usize,
    quote: fn(&str) -> String,
) -> String {
    cols.iter()
        .enumerate()
        .map(|(i, col)| {
            let placeholder = match placeholder_style {
                PlaceholderStyle::QuestionMark => "?".to_string(),
                PlaceholderStyle::DollarNumber => format!("${}", start_index + i),
            };
            format!("{} = {}", quote(col), placeholder)
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dquote_round_trips() {
        let escaped = escape_identifier_dquote("a\"b");
        assert_eq!(escaped, "\"a\"\"b\"");
        assert_eq!(unquote_dquote(&escaped), "a\"b");
    }

    #[test]
    fn backtick_round_trips() {
        let escaped = escape_identifier_backtick("a`b");
        assert_eq!(escaped, "`a``b`");
        assert_eq!(unquote_backtick(&escaped), "a`b");
    }

    #[test]
    fn splits_schema_qualified_table() {
        assert_eq!(split_qualified_table_dquote("public.users"), "\"public\".\"users\"");
        assert_eq!(split_qualified_table_dquote("users"), "\"users\"");
    }

    #[test]
    fn build_pk_where_question_mark() {
        let cols = vec!["id".to_string()];
        let where_clause = build_pk_where(&cols, PlaceholderStyle::QuestionMark, 1, escape_identifier_dquote);
        assert_eq!(where_clause, "\"id\" = ?");
    }

    #[test]
    fn build_pk_where_dollar_number_composite() {
        let cols = vec!["tenant_id".to_string(), "user_id".to_string()];
        let where_clause = build_pk_where(&cols, PlaceholderStyle::DollarNumber, 3, escape_identifier_dquote);
        assert_eq!(where_clause, "\"tenant_id\" = $3 AND \"user_id\" = $4");
    }
}
