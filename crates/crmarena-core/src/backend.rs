// Backend query capability
//
// The CRM backend is an opaque `execute(query) -> rows | error` capability.
// A query the backend rejects is an ordinary outcome (status 0) that the
// agent sees as an observation; only transport failures are `Err`.
//
// The helpers at the bottom implement the shaping every connector applies
// to raw results: fence stripping, search detection, record cleanup and
// error payload formatting.

use crate::error::Result;
use async_trait::async_trait;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::{Arc, OnceLock};

/// One result row, keyed by field name
pub type Record = Map<String, Value>;

/// Result of a single backend query
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    /// Status 1: rows (possibly empty)
    Rows(Vec<Record>),
    /// Status 0: backend-reported error, already formatted as `"CODE: message"`
    Error(String),
}

impl QueryOutcome {
    /// 1 for rows, 0 for a backend-reported error
    pub fn status(&self) -> u8 {
        match self {
            QueryOutcome::Rows(_) => 1,
            QueryOutcome::Error(_) => 0,
        }
    }

    /// Text handed to the agent
    pub fn to_observation(&self) -> String {
        match self {
            QueryOutcome::Rows(rows) => Value::Array(rows.iter().cloned().map(Value::Object).collect())
                .to_string(),
            QueryOutcome::Error(message) => message.clone(),
        }
    }

    /// Rows, or the backend error as `Err`
    pub fn into_rows(self) -> std::result::Result<Vec<Record>, String> {
        match self {
            QueryOutcome::Rows(rows) => Ok(rows),
            QueryOutcome::Error(message) => Err(message),
        }
    }
}

/// The backend query-execution capability
#[async_trait]
pub trait QueryBackend: Send + Sync {
    /// Run a relational query or a full-text search.
    ///
    /// `Ok(QueryOutcome::Error(_))` is a rejected query; `Err` is a transport failure.
    async fn execute(&self, query: &str) -> Result<QueryOutcome>;
}

/// Shared backend handle injected into environments and tool calls
pub type SharedBackend = Arc<dyn QueryBackend>;

/// Creates one fresh backend per episode
#[async_trait]
pub trait BackendFactory: Send + Sync {
    async fn connect(&self) -> Result<SharedBackend>;
}

// ============================================================================
// Result shaping helpers
// ============================================================================

/// Reserved keyword that prefixes full-text search queries
pub const SEARCH_KEYWORD: &str = "FIND";

/// Whether a query is a full-text search (as opposed to a relational query)
pub fn is_search_query(query: &str) -> bool {
    query.trim_start().starts_with(SEARCH_KEYWORD)
}

fn fence_patterns() -> &'static [Regex; 2] {
    static PATTERNS: OnceLock<[Regex; 2]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            Regex::new(r"(?s)```(?:sql|SQL|soql|SOQL)?([\s\S]+?)```").expect("valid regex"),
            Regex::new(r"(?s)```([\s\S]+?)```").expect("valid regex"),
        ]
    })
}

/// Strip a markdown code fence around a relational query.
///
/// When a fence is present its body is taken and whitespace is collapsed to
/// single spaces; otherwise the query is returned unchanged.
pub fn preprocess_query(query: &str) -> String {
    for pattern in fence_patterns() {
        if let Some(body) = pattern.captures(query).and_then(|c| c.get(1)) {
            return body.as_str().split_whitespace().collect::<Vec<_>>().join(" ");
        }
    }
    query.to_string()
}

/// Remove backend metadata and columns that are null in every row.
///
/// Column names are taken from the first row.
pub fn clean_records(mut rows: Vec<Record>) -> Vec<Record> {
    if rows.is_empty() {
        return rows;
    }
    for row in rows.iter_mut() {
        row.remove("attributes");
    }

    let all_null: Vec<String> = rows[0]
        .keys()
        .filter(|key| {
            rows.iter()
                .all(|row| row.get(key.as_str()).map_or(true, Value::is_null))
        })
        .cloned()
        .collect();

    if !all_null.is_empty() {
        for row in rows.iter_mut() {
            for key in &all_null {
                row.remove(key);
            }
        }
    }
    rows
}

/// Format a backend error body (`[{"errorCode": ..., "message": ...}]`).
///
/// Falls back to the raw text when the body is not in that shape.
pub fn format_backend_error(body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let first = match &parsed {
        Some(Value::Array(items)) => items.first(),
        Some(value @ Value::Object(_)) => Some(value),
        _ => None,
    };

    match first.and_then(|err| {
        let code = err.get("errorCode")?.as_str()?;
        let message = err.get("message")?.as_str()?;
        Some(format!("{code}: {message}"))
    }) {
        Some(formatted) => formatted,
        None => body.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_is_search_query() {
        assert!(is_search_query("FIND {shoes} IN ALL FIELDS"));
        assert!(!is_search_query("SELECT Id FROM Case"));
        assert!(!is_search_query("find {lowercase}"));
    }

    #[test]
    fn test_preprocess_query_strips_fences() {
        assert_eq!(
            preprocess_query("```sql\nSELECT Id\n  FROM Case\n```"),
            "SELECT Id FROM Case"
        );
        assert_eq!(
            preprocess_query("Here:\n```\nSELECT Name FROM Account\n```"),
            "SELECT Name FROM Account"
        );
        assert_eq!(preprocess_query("SELECT Id FROM Case"), "SELECT Id FROM Case");
    }

    #[test]
    fn test_clean_records() {
        let rows = vec![
            record(json!({"attributes": {"type": "Case"}, "Id": "500A", "ClosedDate": null, "Status": "New"})),
            record(json!({"attributes": {"type": "Case"}, "Id": "500B", "ClosedDate": null, "Status": null})),
        ];
        let cleaned = clean_records(rows);
        assert_eq!(cleaned[0], record(json!({"Id": "500A", "Status": "New"})));
        assert_eq!(cleaned[1], record(json!({"Id": "500B", "Status": null})));
    }

    #[test]
    fn test_format_backend_error() {
        let body = r#"[{"message": "unexpected token: BAD", "errorCode": "MALFORMED_QUERY"}]"#;
        assert_eq!(format_backend_error(body), "MALFORMED_QUERY: unexpected token: BAD");
        assert_eq!(format_backend_error("gateway timeout"), "gateway timeout");
    }

    #[test]
    fn test_outcome_observation() {
        let outcome = QueryOutcome::Rows(vec![record(json!({"expr0": 100}))]);
        assert_eq!(outcome.status(), 1);
        assert_eq!(outcome.to_observation(), r#"[{"expr0":100}]"#);
        assert_eq!(QueryOutcome::Rows(vec![]).to_observation(), "[]");

        let err = QueryOutcome::Error("MALFORMED_QUERY: x".into());
        assert_eq!(err.status(), 0);
        assert_eq!(err.to_observation(), "MALFORMED_QUERY: x");
    }
}
