//! Name-keyed operator registry
//!
//! A closed, explicit registry built at process start from the fixed
//! built-in list; lookup failure is a typed error, never a crash. The
//! metadata export is the only operator information that leaves the
//! registry (UI introspection).

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::operators::*;
use crate::errors::FilterError;

/// UI-facing operator description
///
/// Deliberately limited to the name/label/description/kinds tuple;
/// implementation details never leak through here.
#[derive(Debug, Clone, Serialize)]
pub struct OperatorMetadata {
    pub name: &'static str,
    pub label: &'static str,
    pub description: &'static str,
    pub expected_kinds: Vec<&'static str>,
}

/// Registry of named filter operators
pub struct OperatorRegistry {
    operators: BTreeMap<&'static str, Arc<dyn FilterOperator>>,
}

impl OperatorRegistry {
    pub fn new() -> Self {
        Self {
            operators: BTreeMap::new(),
        }
    }

    /// Registry pre-populated with all built-in operators
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(Equals));
        registry.register(Arc::new(NotEquals));
        registry.register(Arc::new(Contains));
        registry.register(Arc::new(NotContains));
        registry.register(Arc::new(Regex));
        registry.register(Arc::new(NotRegex));
        registry.register(Arc::new(GreaterThan));
        registry.register(Arc::new(LessThan));
        registry.register(Arc::new(In));
        registry.register(Arc::new(NotIn));
        registry.register(Arc::new(Between));
        registry.register(Arc::new(NotBetween));
        registry.register(Arc::new(IsNull));
        registry.register(Arc::new(IsNotNull));
        registry.register(Arc::new(StartsWith));
        registry.register(Arc::new(EndsWith));
        registry
    }

    pub fn register(&mut self, operator: Arc<dyn FilterOperator>) {
        self.operators.insert(operator.name(), operator);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn FilterOperator>, FilterError> {
        self.operators
            .get(name)
            .cloned()
            .ok_or_else(|| FilterError::UnknownOperator {
                name: name.to_string(),
            })
    }

    pub fn has(&self, name: &str) -> bool {
        self.operators.contains_key(name)
    }

    pub fn all(&self) -> impl Iterator<Item = &Arc<dyn FilterOperator>> {
        self.operators.values()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.operators.keys().copied().collect()
    }

    pub fn metadata(&self) -> Vec<OperatorMetadata> {
        self.operators
            .values()
            .map(|op| OperatorMetadata {
                name: op.name(),
                label: op.label(),
                description: op.description(),
                expected_kinds: op.supported_kinds().iter().map(|k| k.as_str()).collect(),
            })
            .collect()
    }
}

impl Default for OperatorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_cover_all_sixteen_operators() {
        let registry = OperatorRegistry::with_builtins();
        let names = registry.names();
        assert_eq!(names.len(), 16);
        for expected in [
            "equals",
            "not_equals",
            "contains",
            "not_contains",
            "regex",
            "not_regex",
            "greater_than",
            "less_than",
            "in",
            "not_in",
            "between",
            "not_between",
            "is_null",
            "is_not_null",
            "starts_with",
            "ends_with",
        ] {
            assert!(registry.has(expected), "missing operator {expected}");
        }
    }

    #[test]
    fn unknown_operator_names_the_offender() {
        let registry = OperatorRegistry::with_builtins();
        match registry.get("sounds_like") {
            Err(FilterError::UnknownOperator { name }) => assert_eq!(name, "sounds_like"),
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn metadata_exports_the_declared_tuple_only() {
        let registry = OperatorRegistry::with_builtins();
        let meta = registry.metadata();
        assert_eq!(meta.len(), 16);
        let equals = meta.iter().find(|m| m.name == "equals").unwrap();
        assert_eq!(equals.label, "Equals");
        assert!(equals.expected_kinds.contains(&"string"));
    }
}
