//! Identity matching for mock resolution.
//!
//! An identity is the string a stream or mock definition is keyed on. It is
//! usually an absolute URL but may be any opaque token, so every function
//! here degrades gracefully when URL parsing fails.

use std::collections::HashMap;

/// Value of a single query key. Repeated keys accumulate into `Multi`,
/// preserving encounter order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryValue {
    Single(String),
    Multi(Vec<String>),
}

impl QueryValue {
    fn push(&mut self, value: String) {
        match self {
            QueryValue::Single(first) => {
                *self = QueryValue::Multi(vec![std::mem::take(first), value]);
            }
            QueryValue::Multi(values) => values.push(value),
        }
    }
}

/// Query-matching policy applied on top of base equality.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum QueryPolicy {
    /// Only the base (scheme+host+path) must match. The default.
    #[default]
    IgnoreQuery,
    /// Every query key/value pair must match exactly, order-independent,
    /// same cardinality.
    MatchAllQueries,
    /// Only the listed keys must match presence and value; everything else
    /// is ignored on both sides.
    MatchKeys(Vec<String>),
}

/// Strip the query component from an identity.
///
/// Well-formed absolute URLs reduce to `scheme://host/path` with scheme and
/// host lowercased. Anything else falls back to the substring before `?`.
pub fn normalize_base(identity: &str) -> String {
    match split_absolute(identity) {
        Some((scheme, host, path)) => {
            let path = path.split(['?', '#']).next().unwrap_or("");
            let path = if path.is_empty() { "/" } else { path };
            format!("{}://{}{}", scheme.to_lowercase(), host.to_lowercase(), path)
        }
        None => match identity.find('?') {
            Some(idx) => identity[..idx].to_string(),
            None => identity.to_string(),
        },
    }
}

/// Split `scheme://host/path...` into its parts, or `None` when the
/// identity is not shaped like an absolute URL.
fn split_absolute(identity: &str) -> Option<(&str, &str, &str)> {
    let (scheme, rest) = identity.split_once("://")?;
    if scheme.is_empty() || !scheme.chars().all(|c| c.is_ascii_alphanumeric() || "+-.".contains(c))
    {
        return None;
    }
    let (host, path) = match rest.find(['/', '?', '#']) {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, ""),
    };
    if host.is_empty() {
        return None;
    }
    Some((scheme, host, path))
}

/// Parse the query component of an identity into a key -> value mapping.
///
/// Repeated keys accumulate into a list in encounter order. Identities
/// without a query component yield an empty mapping; nothing here errors.
pub fn parse_query(identity: &str) -> HashMap<String, QueryValue> {
    let mut params = HashMap::new();
    let Some(idx) = identity.find('?') else {
        return params;
    };
    let mut query = &identity[idx + 1..];
    if split_absolute(identity).is_some() {
        // Fragments only exist on well-formed URLs; opaque strings keep them.
        if let Some(hash) = query.find('#') {
            query = &query[..hash];
        }
    }
    for pair in query.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = match pair.split_once('=') {
            Some((k, v)) => (k, v),
            None => (pair, ""),
        };
        if key.is_empty() {
            continue;
        }
        let key = decode_component(key);
        let value = decode_component(value);
        match params.get_mut(&key) {
            Some(existing) => existing.push(value),
            None => {
                params.insert(key, QueryValue::Single(value));
            }
        }
    }
    params
}

fn decode_component(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(|c| c.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

/// Decide whether a candidate identity pattern matches a requested identity
/// under the given query policy.
///
/// Exact string equality between the two raw identities always matches,
/// regardless of policy. Otherwise the bases must be equal, and the policy
/// decides how much of the query component must agree.
pub fn matches(candidate: &str, requested: &str, policy: &QueryPolicy) -> bool {
    if candidate == requested {
        return true;
    }
    if normalize_base(candidate) != normalize_base(requested) {
        return false;
    }
    match policy {
        QueryPolicy::IgnoreQuery => true,
        QueryPolicy::MatchAllQueries => {
            let candidate_params = parse_query(candidate);
            let requested_params = parse_query(requested);
            if candidate_params.len() != requested_params.len() {
                return false;
            }
            candidate_params
                .iter()
                .all(|(key, value)| requested_params.get(key) == Some(value))
        }
        QueryPolicy::MatchKeys(keys) => {
            if keys.is_empty() {
                return true;
            }
            let candidate_params = parse_query(candidate);
            let requested_params = parse_query(requested);
            keys.iter().all(|key| {
                match (candidate_params.get(key), requested_params.get(key)) {
                    (Some(a), Some(b)) => a == b,
                    _ => false,
                }
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_base_strips_query() {
        assert_eq!(
            normalize_base("https://api.example.com/v1/items?id=1&trace=42"),
            "https://api.example.com/v1/items"
        );
    }

    #[test]
    fn test_normalize_base_no_path() {
        assert_eq!(normalize_base("https://api.example.com"), "https://api.example.com/");
        assert_eq!(normalize_base("https://api.example.com?x=1"), "https://api.example.com/");
    }

    #[test]
    fn test_normalize_base_lowercases_scheme_and_host() {
        assert_eq!(
            normalize_base("HTTPS://API.Example.com/Path"),
            "https://api.example.com/Path"
        );
    }

    #[test]
    fn test_normalize_base_opaque_string() {
        assert_eq!(normalize_base("orders-feed?region=eu"), "orders-feed");
        assert_eq!(normalize_base("orders-feed"), "orders-feed");
    }

    #[test]
    fn test_parse_query_simple() {
        let params = parse_query("https://api/x?page=1&sort=desc");
        assert_eq!(params.get("page"), Some(&QueryValue::Single("1".to_string())));
        assert_eq!(params.get("sort"), Some(&QueryValue::Single("desc".to_string())));
    }

    #[test]
    fn test_parse_query_repeated_keys_accumulate_in_order() {
        let params = parse_query("https://api/x?tag=a&tag=b&tag=c");
        assert_eq!(
            params.get("tag"),
            Some(&QueryValue::Multi(vec![
                "a".to_string(),
                "b".to_string(),
                "c".to_string()
            ]))
        );
    }

    #[test]
    fn test_parse_query_decodes_components() {
        let params = parse_query("https://api/x?name=hello%20world");
        assert_eq!(
            params.get("name"),
            Some(&QueryValue::Single("hello world".to_string()))
        );
    }

    #[test]
    fn test_parse_query_bare_key_and_empty_value() {
        let params = parse_query("feed?flag&empty=");
        assert_eq!(params.get("flag"), Some(&QueryValue::Single(String::new())));
        assert_eq!(params.get("empty"), Some(&QueryValue::Single(String::new())));
    }

    #[test]
    fn test_parse_query_no_query_component() {
        assert!(parse_query("https://api/x").is_empty());
        assert!(parse_query("opaque-token").is_empty());
    }

    #[test]
    fn test_matches_default_policy_ignores_queries() {
        // Equal bases match regardless of query content.
        assert!(matches(
            "https://api/x?id=1",
            "https://api/x?id=2&other=3",
            &QueryPolicy::IgnoreQuery
        ));
        assert!(matches("https://api/x", "https://api/x?id=2", &QueryPolicy::IgnoreQuery));
    }

    #[test]
    fn test_matches_different_base_fails() {
        assert!(!matches("https://api/x", "https://api/y", &QueryPolicy::IgnoreQuery));
        assert!(!matches(
            "https://api/x",
            "https://other/x",
            &QueryPolicy::MatchAllQueries
        ));
    }

    #[test]
    fn test_matches_exact_string_short_circuits_policy() {
        // Raw equality wins even under a policy the queries would fail.
        assert!(matches(
            "https://api/x?id=1",
            "https://api/x?id=1",
            &QueryPolicy::MatchKeys(vec!["missing".to_string()])
        ));
    }

    #[test]
    fn test_match_all_queries_cardinality() {
        // Mismatched key counts always fail, independent of values.
        assert!(!matches(
            "https://api/x?a=1",
            "https://api/x?a=1&b=2",
            &QueryPolicy::MatchAllQueries
        ));
        assert!(!matches(
            "https://api/x?a=1&b=2",
            "https://api/x?a=1",
            &QueryPolicy::MatchAllQueries
        ));
    }

    #[test]
    fn test_match_all_queries_exact() {
        assert!(matches(
            "https://api/x?a=1&b=2",
            "https://api/x?b=2&a=1",
            &QueryPolicy::MatchAllQueries
        ));
        assert!(!matches(
            "https://api/x?a=1&b=2",
            "https://api/x?a=1&b=3",
            &QueryPolicy::MatchAllQueries
        ));
    }

    #[test]
    fn test_match_all_queries_list_order_matters() {
        assert!(matches(
            "https://api/x?t=a&t=b",
            "https://api/x?t=a&t=b",
            &QueryPolicy::MatchAllQueries
        ));
        assert!(!matches(
            "https://api/x?t=a&t=b",
            "https://api/x?t=b&t=a",
            &QueryPolicy::MatchAllQueries
        ));
    }

    #[test]
    fn test_match_keys_ignores_unlisted() {
        let policy = QueryPolicy::MatchKeys(vec!["id".to_string()]);
        assert!(matches("https://api/x?id=1", "https://api/x?id=1&trace=42", &policy));
        assert!(matches("https://api/x?id=1&debug=yes", "https://api/x?id=1", &policy));
        assert!(!matches("https://api/x?id=1", "https://api/x?id=2", &policy));
    }

    #[test]
    fn test_match_keys_requires_presence_on_both_sides() {
        let policy = QueryPolicy::MatchKeys(vec!["id".to_string()]);
        assert!(!matches("https://api/x", "https://api/x?id=1", &policy));
        assert!(!matches("https://api/x?id=1", "https://api/x", &policy));
    }

    #[test]
    fn test_match_keys_empty_list_is_base_match() {
        let policy = QueryPolicy::MatchKeys(Vec::new());
        assert!(matches("https://api/x?a=1", "https://api/x?b=2", &policy));
    }

    #[test]
    fn test_opaque_identities_match_by_prefix_base() {
        assert!(matches("orders-feed?v=1", "orders-feed?v=2", &QueryPolicy::IgnoreQuery));
        assert!(!matches("orders-feed", "invoices-feed", &QueryPolicy::IgnoreQuery));
    }
}
