//! SQL helper functions for the `SQLite` index.
//!
//! Query construction utilities shared by the text and vector search paths:
//! FTS5 query sanitization and filter clause building with numbered
//! parameters.

use crate::models::SearchFilter;

/// Sanitizes free text into an FTS5 match expression.
///
/// Each alphanumeric token is double-quoted (neutralizing FTS5 operators
/// like `NEAR`, `*`, and column filters) and tokens are OR-joined so any
/// term can contribute to the BM25 ranking.
#[must_use]
pub fn sanitize_fts_query(query: &str) -> String {
    let tokens: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{t}\""))
        .collect();
    tokens.join(" OR ")
}

/// Builds a WHERE clause fragment from a search filter with numbered
/// parameters.
///
/// Returns the clause (prefixed with ` AND ` when non-empty), the parameter
/// values in order, and the next free parameter index. The date range is
/// deliberately absent: it is applied after fusion, not per source.
#[must_use]
pub fn build_filter_clause(filter: &SearchFilter, start_param: usize) -> (String, Vec<String>, usize) {
    let mut conditions = Vec::new();
    let mut params = Vec::new();
    let mut param_idx = start_param;

    if let Some(namespace) = filter.namespace {
        conditions.push(format!("m.namespace = ?{param_idx}"));
        params.push(namespace.as_str().to_string());
        param_idx += 1;
    }
    if let Some(spec) = &filter.spec {
        conditions.push(format!("m.spec = ?{param_idx}"));
        params.push(spec.clone());
        param_idx += 1;
    }
    if let Some(domain) = filter.domain {
        conditions.push(format!("m.domain = ?{param_idx}"));
        params.push(domain.as_str().to_string());
        param_idx += 1;
    }
    if let Some(status) = filter.status {
        conditions.push(format!("m.status = ?{param_idx}"));
        params.push(status.as_str().to_string());
        param_idx += 1;
    }

    if conditions.is_empty() {
        (String::new(), params, param_idx)
    } else {
        (format!(" AND {}", conditions.join(" AND ")), params, param_idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MemoryStatus, Namespace};

    #[test]
    fn test_sanitize_fts_query() {
        assert_eq!(sanitize_fts_query("jwt auth"), "\"jwt\" OR \"auth\"");
        // Operators and punctuation are neutralized.
        assert_eq!(sanitize_fts_query("a NEAR b*"), "\"a\" OR \"NEAR\" OR \"b\"");
        assert_eq!(sanitize_fts_query("\"quoted\""), "\"quoted\"");
        assert_eq!(sanitize_fts_query("!!!"), "");
    }

    #[test]
    fn test_build_filter_clause_empty() {
        let (clause, params, next) = build_filter_clause(&SearchFilter::new(), 2);
        assert!(clause.is_empty());
        assert!(params.is_empty());
        assert_eq!(next, 2);
    }

    #[test]
    fn test_build_filter_clause_full() {
        let filter = SearchFilter::new()
            .with_namespace(Namespace::Decisions)
            .with_spec("storage")
            .with_status(MemoryStatus::Active);

        let (clause, params, next) = build_filter_clause(&filter, 2);
        assert_eq!(
            clause,
            " AND m.namespace = ?2 AND m.spec = ?3 AND m.status = ?4"
        );
        assert_eq!(params, vec!["decisions", "storage", "active"]);
        assert_eq!(next, 5);
    }
}
