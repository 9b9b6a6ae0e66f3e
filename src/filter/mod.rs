//! Row filtering: shared rule evaluation and the conjunctive filter engine
//!
//! The evaluation algorithm here is common to all operators: normalize both
//! sides, delegate nulls to the operator's null hook, check the data value
//! kind, then run the operator's comparison body. Operators themselves only
//! supply the comparison (and optional hooks); they never reimplement this
//! sequence.

pub mod operators;
pub mod registry;
pub mod value_path;

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::errors::FilterError;
use crate::models::{FilterRule, Row};
use operators::ValueKind;
use registry::OperatorRegistry;
use value_path::{resolve, PathValue};

/// Normalize a value for comparison
///
/// Strings are trimmed; an empty string, empty array or explicit null all
/// normalize to `None` so the operator's null policy applies uniformly.
pub(crate) fn normalize(value: &Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(Value::String(trimmed.to_string()))
            }
        }
        Value::Array(items) if items.is_empty() => None,
        other => Some(other.clone()),
    }
}

/// Evaluate one rule against one row
///
/// Non-matches return `Ok(false)`; only malformed rules and unusable data
/// values are errors.
pub fn evaluate_rule(
    row: &Row,
    rule: &FilterRule,
    registry: &OperatorRegistry,
) -> Result<bool, FilterError> {
    let operator = registry.get(&rule.operator)?;
    operator.validate_rule(rule)?;

    let defs = operator.option_definitions();
    defs.validate(&rule.options)
        .map_err(|e| FilterError::invalid_rule(&rule.key, e.to_string()))?;
    let options = defs.merge_with_defaults(&rule.options);

    let data = match resolve(row, &rule.key) {
        PathValue::Found(v) => normalize(v),
        // Missing path and explicit null both flow through the null hook
        PathValue::Null | PathValue::Missing => None,
    };
    let filter = normalize(&rule.value);

    let (data, filter) = match (data, filter) {
        (Some(d), Some(f)) => (d, f),
        (d, f) => return Ok(operator.matches_null(d.is_none(), f.is_none())),
    };

    let kind = ValueKind::of(&data);
    if !operator.supported_kinds().contains(&kind) {
        return Err(FilterError::UnsupportedValueType {
            operator: operator.name(),
            kind: kind.as_str(),
        });
    }

    operator.compare(&data, &filter, &options)
}

/// Per-rule outcome counters collected during a filter pass
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RuleStats {
    pub matched: usize,
    pub failed: usize,
}

/// Aggregate statistics of one filter pass
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct FilterStats {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    /// Keyed by `"{key} {operator}"` per rule, for UI feedback
    pub per_rule: BTreeMap<String, RuleStats>,
}

/// Surviving rows plus statistics
#[derive(Debug, Clone, Default)]
pub struct FilterOutcome {
    pub rows: Vec<Row>,
    pub stats: FilterStats,
}

/// Conjunctive (AND) row filter over an operator registry
pub struct FilterEngine {
    registry: Arc<OperatorRegistry>,
}

impl FilterEngine {
    pub fn new(registry: Arc<OperatorRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &OperatorRegistry {
        &self.registry
    }

    /// A row survives when every rule matches. Source order of surviving
    /// rows is preserved; a non-match is counted, never raised.
    pub fn filter(
        &self,
        rows: Vec<Row>,
        rules: &[FilterRule],
    ) -> Result<FilterOutcome, FilterError> {
        let mut stats = FilterStats {
            total: rows.len(),
            ..Default::default()
        };
        for rule in rules {
            stats
                .per_rule
                .entry(rule_stat_key(rule))
                .or_default();
        }

        let mut surviving = Vec::with_capacity(rows.len());
        for row in rows {
            let mut passes = true;
            for rule in rules {
                let matched = evaluate_rule(&row, rule, &self.registry)?;
                let entry = stats.per_rule.entry(rule_stat_key(rule)).or_default();
                if matched {
                    entry.matched += 1;
                } else {
                    entry.failed += 1;
                    passes = false;
                }
            }
            if passes {
                surviving.push(row);
            } else {
                stats.failed += 1;
            }
        }
        stats.passed = surviving.len();

        debug!(
            total = stats.total,
            passed = stats.passed,
            failed = stats.failed,
            rules = rules.len(),
            "filter pass complete"
        );

        Ok(FilterOutcome {
            rows: surviving,
            stats,
        })
    }
}

fn rule_stat_key(rule: &FilterRule) -> String {
    format!("{} {}", rule.key, rule.operator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OptionBag;
    use serde_json::json;

    fn row(fields: serde_json::Value) -> Row {
        serde_json::from_value(fields).unwrap()
    }

    fn rule(key: &str, operator: &str, value: serde_json::Value) -> FilterRule {
        FilterRule {
            key: key.to_string(),
            operator: operator.to_string(),
            value,
            options: OptionBag::new(),
        }
    }

    fn engine() -> FilterEngine {
        FilterEngine::new(Arc::new(OperatorRegistry::with_builtins()))
    }

    #[test]
    fn in_operator_scenario() {
        let rows = vec![
            row(json!({"status": "active"})),
            row(json!({"status": "closed"})),
            row(json!({"status": "pending"})),
        ];
        let rules = vec![rule("status", "in", json!(["active", "pending"]))];
        let outcome = engine().filter(rows, &rules).unwrap();
        assert_eq!(outcome.rows.len(), 2);
        assert_eq!(outcome.stats.total, 3);
        assert_eq!(outcome.stats.passed, 2);
        assert_eq!(outcome.stats.failed, 1);
    }

    #[test]
    fn and_semantics_only_intersection_survives() {
        let rows = vec![
            row(json!({"status": "active", "price": 10})),
            row(json!({"status": "active", "price": 2})),
            row(json!({"status": "closed", "price": 10})),
        ];
        let rules = vec![
            rule("status", "equals", json!("active")),
            rule("price", "greater_than", json!(5)),
        ];
        let outcome = engine().filter(rows, &rules).unwrap();
        assert_eq!(outcome.rows.len(), 1);
        assert_eq!(outcome.rows[0].get("price"), Some(&json!(10)));
    }

    #[test]
    fn removing_a_rule_never_shrinks_the_passing_set() {
        let rows: Vec<Row> = (0..20)
            .map(|i| row(json!({"n": i, "parity": if i % 2 == 0 { "even" } else { "odd" }})))
            .collect();
        let rules = vec![
            rule("n", "greater_than", json!(4)),
            rule("parity", "equals", json!("even")),
        ];
        let both = engine().filter(rows.clone(), &rules).unwrap();
        let one = engine().filter(rows, &rules[..1]).unwrap();
        assert!(one.rows.len() >= both.rows.len());
    }

    #[test]
    fn missing_path_follows_null_policy_uniformly() {
        let rows = vec![row(json!({"name": "x"}))];
        // Default null policy: no match, for equals AND not_equals alike
        let eq = engine()
            .filter(rows.clone(), &[rule("missing", "equals", json!("x"))])
            .unwrap();
        let neq = engine()
            .filter(rows.clone(), &[rule("missing", "not_equals", json!("x"))])
            .unwrap();
        assert_eq!(eq.rows.len(), 0);
        assert_eq!(neq.rows.len(), 0);
        // is_null is the declared exception
        let isnull = engine()
            .filter(rows, &[rule("missing", "is_null", json!(null))])
            .unwrap();
        assert_eq!(isnull.rows.len(), 1);
    }

    #[test]
    fn empty_string_and_empty_list_normalize_to_null() {
        let rows = vec![row(json!({"a": "  ", "b": []}))];
        let out = engine()
            .filter(
                rows,
                &[
                    rule("a", "is_null", json!(null)),
                    rule("b", "is_null", json!(null)),
                ],
            )
            .unwrap();
        assert_eq!(out.rows.len(), 1);
    }

    #[test]
    fn unknown_operator_raises() {
        let rows = vec![row(json!({"a": 1}))];
        let err = engine()
            .filter(rows, &[rule("a", "sounds_like", json!(1))])
            .unwrap_err();
        assert!(matches!(err, FilterError::UnknownOperator { .. }));
    }

    #[test]
    fn per_rule_stats_track_failures() {
        let rows = vec![
            row(json!({"status": "active"})),
            row(json!({"status": "closed"})),
        ];
        let rules = vec![rule("status", "equals", json!("active"))];
        let outcome = engine().filter(rows, &rules).unwrap();
        let stats = outcome.stats.per_rule.get("status equals").unwrap();
        assert_eq!(stats.matched, 1);
        assert_eq!(stats.failed, 1);
    }
}
