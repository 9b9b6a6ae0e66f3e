//! Prepare stage
//!
//! An optional business-transformation step run after mapping. At most one
//! resolver is active per deployment; running without one is a valid no-op
//! that passes every row through and reports zero prepared rows.

pub mod images;

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::errors::{EngineError, FactoryError};
use crate::models::{OptionBag, Row};

/// A pluggable post-mapping row transformation
///
/// Failures are plain messages; the engine records them per row and drops
/// the failing row from the prepared set without aborting the batch.
pub trait PrepareResolver: Send + Sync {
    fn name(&self) -> &'static str;
    fn resolve(&self, row: &Row, config: &OptionBag) -> Result<Row, String>;
}

/// Name-keyed resolver lookup, same shape as the operator registry
pub struct ResolverRegistry {
    resolvers: BTreeMap<&'static str, Arc<dyn PrepareResolver>>,
}

impl ResolverRegistry {
    pub fn new() -> Self {
        Self {
            resolvers: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, resolver: Arc<dyn PrepareResolver>) {
        self.resolvers.insert(resolver.name(), resolver);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn PrepareResolver>> {
        self.resolvers.get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.resolvers.contains_key(name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.resolvers.keys().copied().collect()
    }
}

impl Default for ResolverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of the prepare stage: rows that survived, how many the resolver
/// actually touched, and row-index-keyed failure messages
#[derive(Debug, Default)]
pub struct PrepareOutcome {
    pub rows: Vec<Row>,
    pub prepared: usize,
    pub errors: BTreeMap<usize, String>,
}

pub struct PrepareEngine {
    registry: Arc<ResolverRegistry>,
}

impl PrepareEngine {
    pub fn new(registry: Arc<ResolverRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ResolverRegistry {
        &self.registry
    }

    /// Run the configured resolver over every row
    ///
    /// `resolver = None` is the pass-through state. An unknown resolver
    /// name is a configuration error and halts the stage.
    pub fn prepare(
        &self,
        rows: Vec<Row>,
        resolver: Option<&str>,
        config: &OptionBag,
    ) -> Result<PrepareOutcome, EngineError> {
        let Some(name) = resolver else {
            return Ok(PrepareOutcome {
                rows,
                prepared: 0,
                errors: BTreeMap::new(),
            });
        };

        let resolver = self
            .registry
            .get(name)
            .ok_or_else(|| FactoryError::UnsupportedType {
                kind: "resolver",
                requested: name.to_string(),
                available: self.registry.names().join(", "),
            })?;

        let mut outcome = PrepareOutcome::default();
        for (index, row) in rows.into_iter().enumerate() {
            match resolver.resolve(&row, config) {
                Ok(resolved) => {
                    outcome.rows.push(resolved);
                    outcome.prepared += 1;
                }
                Err(message) => {
                    outcome.errors.insert(index, message);
                }
            }
        }

        debug!(
            resolver = name,
            prepared = outcome.prepared,
            failed = outcome.errors.len(),
            "prepare stage complete"
        );
        Ok(outcome)
    }
}

impl Default for PrepareEngine {
    fn default() -> Self {
        Self::new(Arc::new(ResolverRegistry::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct SlugResolver;

    impl PrepareResolver for SlugResolver {
        fn name(&self) -> &'static str {
            "slug"
        }

        fn resolve(&self, row: &Row, _config: &OptionBag) -> Result<Row, String> {
            let name = row
                .get("name")
                .and_then(|v| v.as_str())
                .ok_or_else(|| "row has no name".to_string())?;
            let mut out = row.clone();
            out.insert("slug".into(), json!(name.to_lowercase().replace(' ', "-")));
            Ok(out)
        }
    }

    fn rows() -> Vec<Row> {
        vec![
            Row::from_iter([("name".to_string(), json!("Blue Widget"))]),
            Row::from_iter([("sku".to_string(), json!("B2"))]),
        ]
    }

    #[test]
    fn no_resolver_is_a_valid_passthrough() {
        let engine = PrepareEngine::default();
        let outcome = engine.prepare(rows(), None, &OptionBag::new()).unwrap();
        assert_eq!(outcome.rows.len(), 2);
        assert_eq!(outcome.prepared, 0);
        assert!(outcome.errors.is_empty());
    }

    #[test]
    fn row_failures_are_recorded_and_excluded() {
        let mut registry = ResolverRegistry::new();
        registry.register(Arc::new(SlugResolver));
        let engine = PrepareEngine::new(Arc::new(registry));

        let outcome = engine.prepare(rows(), Some("slug"), &OptionBag::new()).unwrap();
        assert_eq!(outcome.prepared, 1);
        assert_eq!(outcome.rows[0].get("slug"), Some(&json!("blue-widget")));
        assert_eq!(outcome.errors.get(&1).map(String::as_str), Some("row has no name"));
    }

    #[test]
    fn unknown_resolver_halts_the_stage() {
        let engine = PrepareEngine::default();
        let err = engine
            .prepare(rows(), Some("missing"), &OptionBag::new())
            .unwrap_err();
        assert!(err.to_string().contains("missing"));
    }
}
