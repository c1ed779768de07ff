//! Search query classification.
//!
//! A query containing at least one recognized field operator is an
//! operator search and goes to the paginated advanced-search path:
//! - `from:alice@example.com`, `to:team@example.com`, `subject:meeting`
//! - `in:inbox`, `label:work`
//! - `is:unread`, `is:read`, `is:starred`
//! - `has:attachment`
//! - `before:2024/12/01`, `after:2024-01-01`
//!
//! Anything else is a plain free-text search.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

const OPERATORS: [&str; 9] = [
    "from", "to", "subject", "in", "label", "is", "has", "before", "after",
];

/// Parsed operator filters for an advanced search.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilters {
    /// Free-text terms left over after operators were removed.
    #[serde(default)]
    pub terms: Vec<String>,
    /// `from:` values.
    #[serde(default)]
    pub from: Vec<String>,
    /// `to:` values.
    #[serde(default)]
    pub to: Vec<String>,
    /// `subject:` values.
    #[serde(default)]
    pub subject: Vec<String>,
    /// `in:` folder restriction.
    #[serde(default)]
    pub folder: Option<String>,
    /// `label:` values.
    #[serde(default)]
    pub labels: Vec<String>,
    /// `is:unread` / `is:read`.
    #[serde(default)]
    pub is_unread: Option<bool>,
    /// `is:starred`.
    #[serde(default)]
    pub is_starred: Option<bool>,
    /// `has:attachment`.
    #[serde(default)]
    pub has_attachment: Option<bool>,
    /// `before:` date bound.
    #[serde(default)]
    pub before: Option<DateTime<Utc>>,
    /// `after:` date bound.
    #[serde(default)]
    pub after: Option<DateTime<Utc>>,
}

impl SearchFilters {
    /// Returns true if at least one field operator was recognized.
    #[must_use]
    pub fn has_operators(&self) -> bool {
        !self.from.is_empty()
            || !self.to.is_empty()
            || !self.subject.is_empty()
            || self.folder.is_some()
            || !self.labels.is_empty()
            || self.is_unread.is_some()
            || self.is_starred.is_some()
            || self.has_attachment.is_some()
            || self.before.is_some()
            || self.after.is_some()
    }
}

/// How a search query is routed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryKind {
    /// Empty or whitespace-only: clears the search.
    Empty,
    /// Plain free-text search (unpaginated).
    FreeText(String),
    /// Operator search with its parsed filters (paginated).
    Operator(SearchFilters),
}

/// Classifies a raw query string.
#[must_use]
pub fn classify_query(raw: &str) -> QueryKind {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return QueryKind::Empty;
    }

    let filters = parse_filters(trimmed);
    if filters.has_operators() {
        QueryKind::Operator(filters)
    } else {
        QueryKind::FreeText(trimmed.to_string())
    }
}

/// Parses operator filters out of a query. Unknown `key:value` pairs are
/// kept as free-text terms.
#[must_use]
pub fn parse_filters(input: &str) -> SearchFilters {
    let mut filters = SearchFilters::default();
    let mut rest = input.trim_start();

    while !rest.is_empty() {
        let (token, consumed) = next_token(rest);
        rest = rest[consumed..].trim_start();

        let Some((key, value)) = split_operator(&token) else {
            if !token.is_empty() {
                filters.terms.push(token);
            }
            continue;
        };

        match key.as_str() {
            "from" => filters.from.push(value),
            "to" => filters.to.push(value),
            "subject" => filters.subject.push(value),
            "in" => filters.folder = Some(value),
            "label" => filters.labels.push(value),
            "is" => match value.to_lowercase().as_str() {
                "unread" => filters.is_unread = Some(true),
                "read" => filters.is_unread = Some(false),
                "starred" => filters.is_starred = Some(true),
                _ => filters.terms.push(token.clone()),
            },
            "has" if value.eq_ignore_ascii_case("attachment") => {
                filters.has_attachment = Some(true);
            }
            "before" | "after" => match parse_date(&value) {
                Some(date) if key == "before" => filters.before = Some(date),
                Some(date) => filters.after = Some(date),
                None => filters.terms.push(token.clone()),
            },
            _ => filters.terms.push(token.clone()),
        }
    }

    filters
}

/// Reads one whitespace-delimited token, keeping a quoted operator value
/// (`subject:"weekly sync"`) or quoted phrase together. Returns the token
/// with quotes removed and the number of bytes consumed.
fn next_token(input: &str) -> (String, usize) {
    let mut token = String::new();
    let mut in_quotes = false;

    for (idx, c) in input.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            c if c.is_whitespace() && !in_quotes => return (token, idx),
            c => token.push(c),
        }
    }

    (token, input.len())
}

/// Splits `key:value` when `key` is a known operator and `value` is non-empty.
fn split_operator(token: &str) -> Option<(String, String)> {
    let (key, value) = token.split_once(':')?;
    let key = key.to_lowercase();
    if !OPERATORS.contains(&key.as_str()) || value.is_empty() {
        return None;
    }
    Some((key, value.to_string()))
}

/// Parses `YYYY/MM/DD` or `YYYY-MM-DD` as midnight UTC.
fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    let normalized = value.replace('/', "-");
    let date = NaiveDate::parse_from_str(&normalized, "%Y-%m-%d").ok()?;
    let midnight = date.and_hms_opt(0, 0, 0)?;
    Some(Utc.from_utc_datetime(&midnight))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_empty() {
        assert_eq!(classify_query(""), QueryKind::Empty);
        assert_eq!(classify_query("   \t"), QueryKind::Empty);
    }

    #[test]
    fn test_classify_free_text() {
        assert_eq!(
            classify_query("  quarterly report "),
            QueryKind::FreeText("quarterly report".to_string())
        );
    }

    #[test]
    fn test_classify_operator_search() {
        let QueryKind::Operator(filters) = classify_query("from:alice@example.com has:attachment")
        else {
            panic!("expected operator search");
        };
        assert_eq!(filters.from, vec!["alice@example.com"]);
        assert_eq!(filters.has_attachment, Some(true));
        assert!(filters.terms.is_empty());
    }

    #[test]
    fn test_unknown_operator_is_free_text() {
        assert_eq!(
            classify_query("http://example.com"),
            QueryKind::FreeText("http://example.com".to_string())
        );
        assert_eq!(
            classify_query("ratio 3:1"),
            QueryKind::FreeText("ratio 3:1".to_string())
        );
    }

    #[test]
    fn test_quoted_values_and_terms() {
        let filters = parse_filters(r#"subject:"weekly sync" budget is:unread"#);
        assert_eq!(filters.subject, vec!["weekly sync"]);
        assert_eq!(filters.terms, vec!["budget"]);
        assert_eq!(filters.is_unread, Some(true));
    }

    #[test]
    fn test_dates() {
        let filters = parse_filters("after:2024/01/15 before:2024-02-01");
        assert_eq!(
            filters.after.map(|d| d.format("%Y-%m-%d").to_string()),
            Some("2024-01-15".to_string())
        );
        assert_eq!(
            filters.before.map(|d| d.format("%Y-%m-%d").to_string()),
            Some("2024-02-01".to_string())
        );
    }

    #[test]
    fn test_invalid_date_kept_as_term() {
        let filters = parse_filters("before:yesterday");
        assert!(filters.before.is_none());
        assert_eq!(filters.terms, vec!["before:yesterday"]);
        assert!(!filters.has_operators());
    }

    #[test]
    fn test_operator_key_case_insensitive() {
        let filters = parse_filters("FROM:bob@example.com IN:Archive label:work");
        assert_eq!(filters.from, vec!["bob@example.com"]);
        assert_eq!(filters.folder.as_deref(), Some("Archive"));
        assert_eq!(filters.labels, vec!["work"]);
    }
}
