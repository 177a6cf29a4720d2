// relay-core/src/domain/naming.rs
//
// Identifier rules shared by the whole platform: how a pipeline display
// name becomes a SQL table name, how column keys are normalized for the
// knowledge base, and how column references are pulled out of SQL
// expressions.

use std::sync::LazyLock;

use regex::Regex;

/// Connection names: letter first, then letters/digits/underscore/hyphen,
/// 2..=63 chars total.
pub static CONNECTION_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)] // pattern is a compile-time constant
    Regex::new(r"^[A-Za-z][A-Za-z0-9_-]{1,62}$").unwrap()
});

static COLUMN_REF_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"\b(\w+\.\w+)\b").unwrap()
});

static METRIC_REF_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"\$\{(\w+)\}").unwrap()
});

/// Convert a pipeline display name into a safe SQL table name.
///
/// Rules:
/// - lowercase
/// - spaces and hyphens become underscores
/// - strip everything that is not `[a-z0-9_]`
/// - prefix with `t_` when the result starts with a digit
pub fn derive_table_name(name: &str) -> String {
    let mut table: String = name
        .to_lowercase()
        .replace([' ', '-'], "_")
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_')
        .collect();
    if table.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        table = format!("t_{table}");
    }
    table
}

/// Entity names follow the same convention as derived table names.
pub fn normalize_entity_name(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .replace([' ', '-'], "_")
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_')
        .collect()
}

/// Key used for ColumnKnowledge lookups: `lower(name).trim().replace(' ', '_')`.
pub fn normalize_column_key(name: &str) -> String {
    name.to_lowercase().trim().replace(' ', "_")
}

/// Extract `table.column` references from a SQL expression.
///
/// `SUM(orders.total)` yields `["orders.total"]`; `COUNT(*)` yields `[]`.
pub fn extract_column_references(expression: &str) -> Vec<String> {
    COLUMN_REF_RE
        .find_iter(expression)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Extract `${metric}` interpolation tokens from a metric expression,
/// deduplicated in first-seen order.
pub fn extract_metric_references(expression: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for cap in METRIC_REF_RE.captures_iter(expression) {
        let name = cap[1].to_string();
        if !seen.contains(&name) {
            seen.push(name);
        }
    }
    seen
}

/// Short opaque identifier with a kind prefix, e.g. `pipe-3fa9c1d2`.
pub fn short_id(prefix: &str) -> String {
    let raw = uuid::Uuid::new_v4().simple().to_string();
    format!("{prefix}-{}", &raw[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_table_name_spaces_and_case() {
        assert_eq!(derive_table_name("My Pipeline"), "my_pipeline");
        assert_eq!(derive_table_name("Demo Orders"), "demo_orders");
    }

    #[test]
    fn test_derive_table_name_leading_digit() {
        assert_eq!(derive_table_name("2024 sales"), "t_2024_sales");
    }

    #[test]
    fn test_derive_table_name_strips_specials() {
        assert_eq!(derive_table_name("users@v2!"), "usersv2");
        assert_eq!(derive_table_name("a-b c"), "a_b_c");
    }

    #[test]
    fn test_column_reference_extraction() {
        assert_eq!(
            extract_column_references("SUM(orders.total)"),
            vec!["orders.total"]
        );
        assert!(extract_column_references("COUNT(*)").is_empty());
        assert_eq!(
            extract_column_references("orders.amount / NULLIF(customers.visits, 0)"),
            vec!["orders.amount", "customers.visits"]
        );
    }

    #[test]
    fn test_metric_reference_extraction_dedupes() {
        assert_eq!(
            extract_metric_references("${revenue} / NULLIF(${order_count},0) + ${revenue}"),
            vec!["revenue", "order_count"]
        );
    }

    #[test]
    fn test_normalize_column_key() {
        assert_eq!(normalize_column_key("Order Total "), "order_total");
        assert_eq!(normalize_column_key("customer_id"), "customer_id");
    }

    #[test]
    fn test_connection_name_pattern() {
        assert!(CONNECTION_NAME_RE.is_match("prod_mysql-01"));
        assert!(!CONNECTION_NAME_RE.is_match("1bad"));
        assert!(!CONNECTION_NAME_RE.is_match("x"));
        assert!(!CONNECTION_NAME_RE.is_match("has space"));
    }
}
