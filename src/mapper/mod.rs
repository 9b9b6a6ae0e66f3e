//! Data mapper
//!
//! Applies an ordered list of field-mapping rules to every row, producing
//! new rows keyed by target field names. A bad value degrades to a recorded
//! per-row field error and the run continues; mapping never aborts a batch.

pub mod transformers;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::filter::normalize;
use crate::filter::operators::scalar_string;
use crate::filter::value_path::resolve;
use crate::filter::FilterStats;
use crate::models::{MappingRule, Row};
use transformers::TransformerRegistry;

/// One recorded field-level failure
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Outcome of one mapping run
///
/// `errors` is keyed by 0-based row index; rows with recorded errors are
/// still present in `rows` with the failing fields left out.
#[derive(Debug, Default)]
pub struct MapResult {
    pub rows: Vec<Row>,
    pub errors: BTreeMap<usize, Vec<FieldError>>,
    /// Filter statistics carried through unchanged when mapping runs
    /// after the filter stage
    pub filter_stats: Option<FilterStats>,
}

pub struct MapperEngine {
    registry: Arc<TransformerRegistry>,
}

impl MapperEngine {
    pub fn new(registry: Arc<TransformerRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &TransformerRegistry {
        &self.registry
    }

    /// Configuration-level rule problems, collected rather than raised
    pub fn validate_rules(&self, rules: &[MappingRule]) -> Vec<String> {
        let mut issues = Vec::new();
        for rule in rules {
            match self.registry.get(&rule.transformation) {
                None => issues.push(format!(
                    "unknown transformation '{}' for target field '{}'",
                    rule.transformation, rule.target_field
                )),
                Some(transformer) => {
                    if transformer.requires_format() && rule.format.is_none() {
                        issues.push(format!(
                            "transformation '{}' for target field '{}' requires a format",
                            rule.transformation, rule.target_field
                        ));
                    }
                }
            }
            if rule.source_field.is_empty() || rule.target_field.is_empty() {
                issues.push("mapping rule with empty source or target field".to_string());
            }
        }
        issues
    }

    pub fn map(&self, rows: &[Row], rules: &[MappingRule]) -> MapResult {
        // value-mapping tables and transformer handles are resolved once,
        // not per row
        let prepared: Vec<PreparedRule<'_>> = rules
            .iter()
            .map(|rule| PreparedRule {
                rule,
                transformer: self.registry.get(&rule.transformation),
                value_map: rule
                    .value_mapping
                    .iter()
                    .map(|m| (scalar_string(&m.from), m.to.clone()))
                    .collect(),
            })
            .collect();

        let mut result = MapResult::default();
        for (index, row) in rows.iter().enumerate() {
            let mut mapped = Row::new();
            let mut errors = Vec::new();
            for prepared_rule in &prepared {
                prepared_rule.apply(row, &mut mapped, &mut errors);
            }
            if !errors.is_empty() {
                result.errors.insert(index, errors);
            }
            result.rows.push(mapped);
        }

        debug!(
            rows = result.rows.len(),
            rows_with_errors = result.errors.len(),
            "mapping complete"
        );
        result
    }
}

impl Default for MapperEngine {
    fn default() -> Self {
        Self::new(Arc::new(TransformerRegistry::with_builtins()))
    }
}

struct PreparedRule<'a> {
    rule: &'a MappingRule,
    transformer: Option<Arc<dyn transformers::Transformer>>,
    value_map: Vec<(String, Value)>,
}

impl PreparedRule<'_> {
    fn apply(&self, row: &Row, mapped: &mut Row, errors: &mut Vec<FieldError>) {
        let rule = self.rule;
        let source = resolve(row, &rule.source_field)
            .into_option()
            .and_then(normalize);

        let Some(source) = source else {
            if rule.is_required {
                errors.push(FieldError {
                    field: rule.target_field.clone(),
                    message: format!("required source field '{}' is missing", rule.source_field),
                });
            }
            if let Some(default) = &rule.default_value {
                mapped.insert(rule.target_field.clone(), default.clone());
            }
            return;
        };

        let Some(transformer) = &self.transformer else {
            errors.push(FieldError {
                field: rule.target_field.clone(),
                message: format!("unknown transformation '{}'", rule.transformation),
            });
            return;
        };

        let transformed = match transformer.transform(&source, rule) {
            Ok(value) => value,
            Err(message) => {
                errors.push(FieldError {
                    field: rule.target_field.clone(),
                    message,
                });
                let substitute = rule
                    .default_value
                    .clone()
                    .or_else(|| transformer.fallback_value());
                if let Some(value) = substitute {
                    mapped.insert(rule.target_field.clone(), value);
                }
                return;
            }
        };

        // explicit substitution table wins over the transformed value
        let key = scalar_string(&transformed);
        let value = self
            .value_map
            .iter()
            .find(|(from, _)| *from == key)
            .map(|(_, to)| to.clone())
            .unwrap_or(transformed);

        mapped.insert(rule.target_field.clone(), value);
    }
}
