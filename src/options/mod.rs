//! Typed option definitions shared by every plugin family
//!
//! Downloaders, readers and filter operators all declare their options as
//! [`OptionDefinitions`] and run supplied values through the same
//! validate/merge path. Plugins share one unified options bag per pipeline,
//! so validation silently ignores keys a plugin does not declare; only a
//! *recognized* key with the wrong JSON type is an error.

use serde_json::Value;
use std::collections::BTreeMap;

use crate::errors::OptionValidationError;
use crate::models::OptionBag;

/// Declared type of an option value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    String,
    Integer,
    Float,
    Boolean,
    List,
    Map,
}

impl OptionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptionKind::String => "string",
            OptionKind::Integer => "integer",
            OptionKind::Float => "float",
            OptionKind::Boolean => "boolean",
            OptionKind::List => "list",
            OptionKind::Map => "map",
        }
    }

    /// Does a JSON value satisfy this kind?
    ///
    /// Integers satisfy `Float` (a whole number is a valid float option)
    /// but not the other way around.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            OptionKind::String => value.is_string(),
            OptionKind::Integer => value.is_i64() || value.is_u64(),
            OptionKind::Float => value.is_number(),
            OptionKind::Boolean => value.is_boolean(),
            OptionKind::List => value.is_array(),
            OptionKind::Map => value.is_object(),
        }
    }

    /// Human-readable kind of an arbitrary JSON value, for error messages
    pub fn name_of(value: &Value) -> &'static str {
        match value {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
            Value::Number(_) => "float",
            Value::String(_) => "string",
            Value::Array(_) => "list",
            Value::Object(_) => "map",
        }
    }
}

/// Metadata attached to one plugin option
#[derive(Debug, Clone)]
pub struct OptionDefinition {
    pub name: String,
    pub kind: OptionKind,
    pub default: Value,
    pub description: String,
}

/// The full option declaration of one plugin
///
/// Built once at plugin construction with the builder-style [`define`]
/// method; `owner` is the plugin name carried into validation errors.
///
/// [`define`]: OptionDefinitions::define
#[derive(Debug, Clone)]
pub struct OptionDefinitions {
    owner: &'static str,
    defs: BTreeMap<String, OptionDefinition>,
}

impl OptionDefinitions {
    pub fn new(owner: &'static str) -> Self {
        Self {
            owner,
            defs: BTreeMap::new(),
        }
    }

    pub fn define(
        mut self,
        name: &str,
        kind: OptionKind,
        default: Value,
        description: &str,
    ) -> Self {
        self.defs.insert(
            name.to_string(),
            OptionDefinition {
                name: name.to_string(),
                kind,
                default,
                description: description.to_string(),
            },
        );
        self
    }

    pub fn owner(&self) -> &'static str {
        self.owner
    }

    pub fn definitions(&self) -> impl Iterator<Item = &OptionDefinition> {
        self.defs.values()
    }

    pub fn get(&self, name: &str) -> Option<&OptionDefinition> {
        self.defs.get(name)
    }

    /// Validate supplied options against the declared set
    ///
    /// Keys not declared by this plugin are ignored; a declared key whose
    /// value has the wrong JSON type fails with a typed error naming the
    /// option, both types and the owning plugin. Null values are treated
    /// as "not supplied".
    pub fn validate(&self, supplied: &OptionBag) -> Result<(), OptionValidationError> {
        for (name, value) in supplied {
            let Some(def) = self.defs.get(name) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            if !def.kind.accepts(value) {
                return Err(OptionValidationError {
                    option: name.clone(),
                    expected: def.kind.as_str(),
                    actual: OptionKind::name_of(value),
                    owner: self.owner,
                });
            }
        }
        Ok(())
    }

    /// Produce the full option set: supplied values where declared and
    /// non-null, defaults everywhere else. Unrecognized keys are dropped.
    pub fn merge_with_defaults(&self, supplied: &OptionBag) -> OptionBag {
        let mut merged = OptionBag::new();
        for def in self.defs.values() {
            let value = match supplied.get(&def.name) {
                Some(v) if !v.is_null() => v.clone(),
                _ => def.default.clone(),
            };
            merged.insert(def.name.clone(), value);
        }
        merged
    }
}

/// Read a boolean option from a merged bag
pub fn opt_bool(bag: &OptionBag, name: &str) -> bool {
    bag.get(name).and_then(Value::as_bool).unwrap_or(false)
}

/// Read a string option from a merged bag
pub fn opt_str<'a>(bag: &'a OptionBag, name: &str) -> Option<&'a str> {
    bag.get(name).and_then(Value::as_str)
}

/// Read a non-negative integer option from a merged bag
pub fn opt_usize(bag: &OptionBag, name: &str) -> Option<usize> {
    bag.get(name).and_then(Value::as_u64).map(|v| v as usize)
}
