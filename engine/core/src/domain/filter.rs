// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Filter Engine
//!
//! A uniform query language used everywhere a predicate over nodes is
//! needed: `find`, smart folders, workflow applicability, feature triggers
//! and access checks. A filter is a `[field, operator, value]` triple;
//! filters compose into an AND-conjunction (`NodeFilters1D`) or a
//! disjunction of conjunctions (DNF). The in-memory evaluator defined here
//! is the canonical semantics; backend translators must over-approximate
//! and let the engine post-filter.
//!
//! Field paths are dotted and descend into the metadata envelope and the
//! `properties` map. A missing intermediate key yields "absent", which no
//! operator matches except `!=`, `not-in`, `not-contains` and
//! `contains-none`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

use crate::domain::errors::AntboxError;

// ============================================================================
// Operators
// ============================================================================

/// Closed operator set. `as_str` values are the wire/textual forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOperator {
    #[serde(rename = "==")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = "<=")]
    LessThanOrEqual,
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = ">=")]
    GreaterThanOrEqual,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "not-in")]
    NotIn,
    #[serde(rename = "contains")]
    Contains,
    #[serde(rename = "not-contains")]
    NotContains,
    #[serde(rename = "contains-all")]
    ContainsAll,
    #[serde(rename = "contains-any")]
    ContainsAny,
    #[serde(rename = "contains-none")]
    ContainsNone,
    #[serde(rename = "match")]
    Match,
    #[serde(rename = "~=")]
    Similarity,
}

/// Operators ordered longest-first so that textual parsing never truncates
/// `contains-all` to `contains` or `>=` to `>`.
const OPERATORS_LONGEST_FIRST: [FilterOperator; 15] = [
    FilterOperator::ContainsNone,
    FilterOperator::NotContains,
    FilterOperator::ContainsAll,
    FilterOperator::ContainsAny,
    FilterOperator::Contains,
    FilterOperator::NotIn,
    FilterOperator::Match,
    FilterOperator::In,
    FilterOperator::Equal,
    FilterOperator::NotEqual,
    FilterOperator::LessThanOrEqual,
    FilterOperator::GreaterThanOrEqual,
    FilterOperator::Similarity,
    FilterOperator::LessThan,
    FilterOperator::GreaterThan,
];

impl FilterOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOperator::Equal => "==",
            FilterOperator::NotEqual => "!=",
            FilterOperator::LessThan => "<",
            FilterOperator::LessThanOrEqual => "<=",
            FilterOperator::GreaterThan => ">",
            FilterOperator::GreaterThanOrEqual => ">=",
            FilterOperator::In => "in",
            FilterOperator::NotIn => "not-in",
            FilterOperator::Contains => "contains",
            FilterOperator::NotContains => "not-contains",
            FilterOperator::ContainsAll => "contains-all",
            FilterOperator::ContainsAny => "contains-any",
            FilterOperator::ContainsNone => "contains-none",
            FilterOperator::Match => "match",
            FilterOperator::Similarity => "~=",
        }
    }

    /// True when the operator matches an absent field
    pub fn matches_absent(&self) -> bool {
        matches!(
            self,
            FilterOperator::NotEqual
                | FilterOperator::NotIn
                | FilterOperator::NotContains
                | FilterOperator::ContainsNone
        )
    }
}

impl std::fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Filters
// ============================================================================

/// One `[field, operator, value]` triple. Serializes as a 3-element array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeFilter(pub String, pub FilterOperator, pub Value);

impl NodeFilter {
    pub fn new(field: impl Into<String>, operator: FilterOperator, value: Value) -> Self {
        Self(field.into(), operator, value)
    }

    pub fn field(&self) -> &str {
        &self.0
    }

    pub fn operator(&self) -> FilterOperator {
        self.1
    }

    pub fn value(&self) -> &Value {
        &self.2
    }
}

/// AND-conjunction of filters
pub type NodeFilters1D = Vec<NodeFilter>;

/// Either a single conjunction or a disjunction of conjunctions (DNF).
/// A node satisfies the predicate iff at least one conjunction is fully
/// satisfied. The empty conjunction matches everything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeFilters {
    And(NodeFilters1D),
    Or(Vec<NodeFilters1D>),
}

impl Default for NodeFilters {
    fn default() -> Self {
        NodeFilters::And(Vec::new())
    }
}

impl NodeFilters {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        match self {
            NodeFilters::And(fs) => fs.is_empty(),
            NodeFilters::Or(groups) => groups.iter().all(|g| g.is_empty()),
        }
    }

    /// Canonical DNF view: a list of conjunctions
    pub fn to_dnf(&self) -> Vec<NodeFilters1D> {
        match self {
            NodeFilters::And(fs) => vec![fs.clone()],
            NodeFilters::Or(groups) => groups.clone(),
        }
    }

    /// Evaluate against a node metadata document
    pub fn is_satisfied_by(&self, metadata: &Value) -> bool {
        match self {
            NodeFilters::And(fs) => fs.iter().all(|f| evaluate(metadata, f)),
            NodeFilters::Or(groups) => groups
                .iter()
                .any(|g| g.iter().all(|f| evaluate(metadata, f))),
        }
    }

    /// Add a conjunctive clause to every DNF group
    pub fn with_clause(self, filter: NodeFilter) -> Self {
        match self {
            NodeFilters::And(mut fs) => {
                fs.push(filter);
                NodeFilters::And(fs)
            }
            NodeFilters::Or(mut groups) => {
                for g in &mut groups {
                    g.push(filter.clone());
                }
                NodeFilters::Or(groups)
            }
        }
    }
}

impl From<NodeFilters1D> for NodeFilters {
    fn from(fs: NodeFilters1D) -> Self {
        NodeFilters::And(fs)
    }
}

// ============================================================================
// Evaluation
// ============================================================================

/// Dotted-path descent into a metadata document. Missing intermediate keys
/// yield `None`.
pub fn lookup_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = doc;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn order_of(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn as_list(value: &Value) -> Option<&Vec<Value>> {
    value.as_array()
}

fn match_regex(pattern: &str) -> Option<Regex> {
    // Whitespace in the pattern matches any run of characters; everything
    // else is literal. Case-insensitive.
    static WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));
    let escaped = regex::escape(pattern);
    let relaxed = WS.replace_all(&escaped, ".*?");
    Regex::new(&format!("(?i){}", relaxed)).ok()
}

/// Canonical single-filter evaluation
pub fn evaluate(metadata: &Value, filter: &NodeFilter) -> bool {
    let NodeFilter(field, op, expected) = filter;
    let actual = lookup_path(metadata, field);

    let Some(actual) = actual else {
        return op.matches_absent();
    };

    match op {
        FilterOperator::Equal => actual == expected,
        FilterOperator::NotEqual => actual != expected,
        FilterOperator::LessThan => order_of(actual, expected) == Some(Ordering::Less),
        FilterOperator::LessThanOrEqual => matches!(
            order_of(actual, expected),
            Some(Ordering::Less) | Some(Ordering::Equal)
        ),
        FilterOperator::GreaterThan => order_of(actual, expected) == Some(Ordering::Greater),
        FilterOperator::GreaterThanOrEqual => matches!(
            order_of(actual, expected),
            Some(Ordering::Greater) | Some(Ordering::Equal)
        ),
        FilterOperator::In => as_list(expected).is_some_and(|l| l.contains(actual)),
        FilterOperator::NotIn => !as_list(expected).is_some_and(|l| l.contains(actual)),
        FilterOperator::Contains => as_list(actual).is_some_and(|l| l.contains(expected)),
        FilterOperator::NotContains => !as_list(actual).is_some_and(|l| l.contains(expected)),
        FilterOperator::ContainsAll => match (as_list(actual), as_list(expected)) {
            (Some(have), Some(want)) => want.iter().all(|v| have.contains(v)),
            _ => false,
        },
        FilterOperator::ContainsAny => match (as_list(actual), as_list(expected)) {
            (Some(have), Some(want)) => want.iter().any(|v| have.contains(v)),
            _ => false,
        },
        FilterOperator::ContainsNone => match (as_list(actual), as_list(expected)) {
            (Some(have), Some(want)) => !want.iter().any(|v| have.contains(v)),
            _ => true,
        },
        FilterOperator::Match => match (actual.as_str(), expected.as_str()) {
            (Some(text), Some(pattern)) => match_regex(pattern)
                .map(|re| re.is_match(text))
                .unwrap_or(false),
            _ => false,
        },
        // Backend-delegated semantic similarity; locally always true so that
        // translated queries over-approximate.
        FilterOperator::Similarity => true,
    }
}

// ============================================================================
// Textual form
// ============================================================================

/// Parse the textual filter form.
///
/// OR groups are separated by `|`, AND clauses by `,`. Quoted values
/// (`"…"`) and list values (`(v1,"v2",…)`) suppress splitting. A bare
/// string with no operator is not a filter.
pub fn parse(input: &str) -> Result<NodeFilters, AntboxError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(AntboxError::BadRequest("empty filter expression".into()));
    }

    let groups = split_top_level(input, '|');
    let mut dnf: Vec<NodeFilters1D> = Vec::with_capacity(groups.len());
    for group in &groups {
        let mut conjunction = Vec::new();
        for clause in split_top_level(group, ',') {
            conjunction.push(parse_clause(clause.trim())?);
        }
        dnf.push(conjunction);
    }

    if dnf.len() == 1 {
        Ok(NodeFilters::And(dnf.into_iter().next().unwrap_or_default()))
    } else {
        Ok(NodeFilters::Or(dnf))
    }
}

/// Split on `separator` outside quotes and parentheses
fn split_top_level(input: &str, separator: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut depth = 0usize;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            '\\' if in_quotes => {
                current.push(c);
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            '(' if !in_quotes => {
                depth += 1;
                current.push(c);
            }
            ')' if !in_quotes => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            c if c == separator && !in_quotes && depth == 0 => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    parts.push(current);
    parts
}

fn parse_clause(clause: &str) -> Result<NodeFilter, AntboxError> {
    let field_end = clause
        .find(char::is_whitespace)
        .ok_or_else(|| bad_clause(clause))?;
    let field = &clause[..field_end];
    let rest = clause[field_end..].trim_start();

    let op = OPERATORS_LONGEST_FIRST
        .iter()
        .find(|op| {
            let token = op.as_str();
            if !rest.starts_with(token) {
                return false;
            }
            // Word operators need a token boundary; symbolic ones do not.
            let tail = &rest[token.len()..];
            let symbolic = !token.starts_with(|c: char| c.is_ascii_alphabetic());
            symbolic
                || tail.is_empty()
                || tail.starts_with(|c: char| c.is_whitespace())
                || tail.starts_with('(')
                || tail.starts_with('"')
        })
        .copied()
        .ok_or_else(|| bad_clause(clause))?;

    let raw_value = rest[op.as_str().len()..].trim();
    if raw_value.is_empty() {
        return Err(bad_clause(clause));
    }

    Ok(NodeFilter::new(field, op, parse_value(raw_value)?))
}

fn bad_clause(clause: &str) -> AntboxError {
    AntboxError::BadRequest(format!("not a filter clause: '{}'", clause))
}

fn parse_value(raw: &str) -> Result<Value, AntboxError> {
    if let Some(inner) = raw.strip_prefix('(').and_then(|r| r.strip_suffix(')')) {
        let items = split_top_level(inner, ',')
            .into_iter()
            .map(|item| parse_scalar(item.trim()))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Value::Array(items));
    }
    parse_scalar(raw)
}

fn parse_scalar(raw: &str) -> Result<Value, AntboxError> {
    if let Some(inner) = raw.strip_prefix('"').and_then(|r| r.strip_suffix('"')) {
        return Ok(Value::String(inner.replace("\\\"", "\"")));
    }
    if raw == "true" {
        return Ok(Value::Bool(true));
    }
    if raw == "false" {
        return Ok(Value::Bool(false));
    }
    if let Ok(n) = raw.parse::<i64>() {
        return Ok(Value::Number(n.into()));
    }
    if let Ok(f) = raw.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return Ok(Value::Number(n));
        }
    }
    Ok(Value::String(raw.to_string()))
}

/// Canonical textual rendering; `parse(format(f))` yields the same DNF.
pub fn format(filters: &NodeFilters) -> String {
    filters
        .to_dnf()
        .iter()
        .map(|group| {
            group
                .iter()
                .map(format_clause)
                .collect::<Vec<_>>()
                .join(", ")
        })
        .collect::<Vec<_>>()
        .join(" | ")
}

fn format_clause(filter: &NodeFilter) -> String {
    format!(
        "{} {} {}",
        filter.field(),
        filter.operator(),
        format_value(filter.value())
    )
}

fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => format!("\"{}\"", s.replace('"', "\\\"")),
        Value::Array(items) => format!(
            "({})",
            items.iter().map(format_value).collect::<Vec<_>>().join(",")
        ),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> Value {
        json!({
            "uuid": "node-0001",
            "title": "Quarterly Report",
            "mimetype": "application/pdf",
            "parent": "--root--",
            "size": 1024,
            "tags": ["finance", "q3"],
            "properties": {
                "billing:code": "ABC"
            }
        })
    }

    #[test]
    fn test_equality_and_absence() {
        let d = doc();
        assert!(evaluate(&d, &NodeFilter::new("title", FilterOperator::Equal, json!("Quarterly Report"))));
        assert!(!evaluate(&d, &NodeFilter::new("title", FilterOperator::Equal, json!("Other"))));
        // Absent fields only match the negative operators
        assert!(!evaluate(&d, &NodeFilter::new("missing", FilterOperator::Equal, json!("x"))));
        assert!(evaluate(&d, &NodeFilter::new("missing", FilterOperator::NotEqual, json!("x"))));
        assert!(evaluate(&d, &NodeFilter::new("missing", FilterOperator::NotIn, json!(["x"]))));
        assert!(evaluate(&d, &NodeFilter::new("missing", FilterOperator::ContainsNone, json!(["x"]))));
    }

    #[test]
    fn test_dotted_path_into_properties() {
        let d = doc();
        assert!(evaluate(
            &d,
            &NodeFilter::new("properties.billing:code", FilterOperator::Equal, json!("ABC"))
        ));
    }

    #[test]
    fn test_order_operators() {
        let d = doc();
        assert!(evaluate(&d, &NodeFilter::new("size", FilterOperator::GreaterThan, json!(1000))));
        assert!(evaluate(&d, &NodeFilter::new("size", FilterOperator::LessThanOrEqual, json!(1024))));
        assert!(!evaluate(&d, &NodeFilter::new("size", FilterOperator::LessThan, json!(1024))));
    }

    #[test]
    fn test_set_operators() {
        let d = doc();
        assert!(evaluate(&d, &NodeFilter::new("tags", FilterOperator::Contains, json!("finance"))));
        assert!(evaluate(&d, &NodeFilter::new("tags", FilterOperator::ContainsAll, json!(["finance", "q3"]))));
        assert!(evaluate(&d, &NodeFilter::new("tags", FilterOperator::ContainsAny, json!(["legal", "q3"]))));
        assert!(evaluate(&d, &NodeFilter::new("tags", FilterOperator::ContainsNone, json!(["legal"]))));
        assert!(!evaluate(&d, &NodeFilter::new("tags", FilterOperator::Contains, json!("legal"))));
        assert!(evaluate(&d, &NodeFilter::new("mimetype", FilterOperator::In, json!(["application/pdf", "text/plain"]))));
    }

    #[test]
    fn test_match_operator() {
        let d = doc();
        // Case-insensitive substring
        assert!(evaluate(&d, &NodeFilter::new("title", FilterOperator::Match, json!("quarterly"))));
        // Whitespace is a wildcard run
        assert!(evaluate(&d, &NodeFilter::new("title", FilterOperator::Match, json!("Qua Rep"))));
        assert!(!evaluate(&d, &NodeFilter::new("title", FilterOperator::Match, json!("annual"))));
    }

    #[test]
    fn test_parse_simple_conjunction() {
        let filters = parse(r#"mimetype == "application/pdf", size > 100"#).unwrap();
        let dnf = filters.to_dnf();
        assert_eq!(dnf.len(), 1);
        assert_eq!(dnf[0].len(), 2);
        assert_eq!(dnf[0][0].field(), "mimetype");
        assert_eq!(dnf[0][1].operator(), FilterOperator::GreaterThan);
        assert!(filters.is_satisfied_by(&doc()));
    }

    #[test]
    fn test_parse_disjunction_and_lists() {
        let filters =
            parse(r#"parent == --root-- | tags contains-all (finance,"q3")"#).unwrap();
        let dnf = filters.to_dnf();
        assert_eq!(dnf.len(), 2);
        assert_eq!(dnf[1][0].operator(), FilterOperator::ContainsAll);
        assert_eq!(dnf[1][0].value(), &json!(["finance", "q3"]));
    }

    #[test]
    fn test_longest_first_operator_matching() {
        let f = parse("tags contains-any (a,b)").unwrap();
        assert_eq!(f.to_dnf()[0][0].operator(), FilterOperator::ContainsAny);
        let f = parse("size >= 10").unwrap();
        assert_eq!(f.to_dnf()[0][0].operator(), FilterOperator::GreaterThanOrEqual);
    }

    #[test]
    fn test_quoted_values_suppress_splitting() {
        let f = parse(r#"title == "a, b | c""#).unwrap();
        assert_eq!(f.to_dnf()[0][0].value(), &json!("a, b | c"));
    }

    #[test]
    fn test_bare_string_is_not_a_filter() {
        assert!(matches!(parse("hello"), Err(AntboxError::BadRequest(_))));
        assert!(matches!(parse(""), Err(AntboxError::BadRequest(_))));
    }

    #[test]
    fn test_format_parse_round_trip() {
        let corpus = [
            r#"mimetype == "application/pdf", size > 100"#,
            r#"parent == "--root--" | tags contains-all ("finance","q3")"#,
            r#"title match "quarterly report""#,
            r#"missing not-in (1,2,3)"#,
            r#"locked != true"#,
            r#"description ~= "invoices about travel""#,
        ];
        for case in corpus {
            let first = parse(case).unwrap();
            let rendered = format(&first);
            let second = parse(&rendered).unwrap();
            assert_eq!(first.to_dnf(), second.to_dnf(), "round-trip failed for {case}");
        }
    }

    #[test]
    fn test_serde_tuple_shape() {
        let filter = NodeFilter::new("title", FilterOperator::Equal, json!("x"));
        let wire = serde_json::to_value(&filter).unwrap();
        assert_eq!(wire, json!(["title", "==", "x"]));

        let filters: NodeFilters =
            serde_json::from_value(json!([["parent", "==", "--root--"]])).unwrap();
        assert!(matches!(filters, NodeFilters::And(_)));

        let filters: NodeFilters =
            serde_json::from_value(json!([[["parent", "==", "--root--"]], [["size", ">", 1]]]))
                .unwrap();
        assert!(matches!(filters, NodeFilters::Or(_)));
    }
}
