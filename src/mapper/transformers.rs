//! Built-in field transformers
//!
//! Transformers are the per-field counterpart of filter operators: named,
//! independently pluggable, and described by the same metadata shape so the
//! configuration surface can introspect them.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

use crate::filter::operators::scalar_string;
use crate::models::MappingRule;

/// One named value transformation
///
/// `transform` receives the raw source value and the owning rule; rule
/// fields like `format` and `default_value` parameterize the conversion.
/// Failures are plain messages, recorded per row field by the engine.
pub trait Transformer: Send + Sync {
    fn name(&self) -> &'static str;
    fn label(&self) -> &'static str;
    fn description(&self) -> &'static str;

    /// Whether the rule must carry a `format` argument
    fn requires_format(&self) -> bool {
        false
    }

    /// Substitute for a failed conversion when the rule has no
    /// `default_value`; numeric transformers fall back to zero
    fn fallback_value(&self) -> Option<Value> {
        None
    }

    fn transform(&self, value: &Value, rule: &MappingRule) -> Result<Value, String>;
}

macro_rules! transformer_boilerplate {
    ($ty:ty, $name:literal, $label:literal, $description:literal) => {
        fn name(&self) -> &'static str {
            $name
        }
        fn label(&self) -> &'static str {
            $label
        }
        fn description(&self) -> &'static str {
            $description
        }
    };
}

fn require_scalar(value: &Value, transformer: &str) -> Result<String, String> {
    match value {
        Value::Array(_) | Value::Object(_) => {
            Err(format!("{transformer} expects a scalar value"))
        }
        other => Ok(scalar_string(other)),
    }
}

pub struct NoneTransformer;

impl Transformer for NoneTransformer {
    transformer_boilerplate!(NoneTransformer, "none", "None", "Pass the value through unchanged");

    fn transform(&self, value: &Value, _rule: &MappingRule) -> Result<Value, String> {
        Ok(value.clone())
    }
}

pub struct Upper;

impl Transformer for Upper {
    transformer_boilerplate!(Upper, "upper", "Uppercase", "Uppercase the string form of the value");

    fn transform(&self, value: &Value, _rule: &MappingRule) -> Result<Value, String> {
        Ok(Value::String(require_scalar(value, "upper")?.to_uppercase()))
    }
}

pub struct Lower;

impl Transformer for Lower {
    transformer_boilerplate!(Lower, "lower", "Lowercase", "Lowercase the string form of the value");

    fn transform(&self, value: &Value, _rule: &MappingRule) -> Result<Value, String> {
        Ok(Value::String(require_scalar(value, "lower")?.to_lowercase()))
    }
}

pub struct Trim;

impl Transformer for Trim {
    transformer_boilerplate!(Trim, "trim", "Trim", "Strip surrounding whitespace");

    fn transform(&self, value: &Value, _rule: &MappingRule) -> Result<Value, String> {
        Ok(Value::String(require_scalar(value, "trim")?.trim().to_string()))
    }
}

pub struct ToBool;

impl Transformer for ToBool {
    transformer_boilerplate!(
        ToBool,
        "bool",
        "Boolean",
        "Canonical truthy-string parsing (1/true/yes/on)"
    );

    fn transform(&self, value: &Value, _rule: &MappingRule) -> Result<Value, String> {
        let truthy = match value {
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
            other => {
                let s = require_scalar(other, "bool")?.trim().to_lowercase();
                matches!(s.as_str(), "1" | "true" | "yes" | "on" | "y")
            }
        };
        Ok(Value::Bool(truthy))
    }
}

pub struct ToInt;

impl Transformer for ToInt {
    transformer_boilerplate!(
        ToInt,
        "int",
        "Integer",
        "Integer conversion, stripping non-numeric characters from strings"
    );

    fn fallback_value(&self) -> Option<Value> {
        Some(Value::from(0))
    }

    fn transform(&self, value: &Value, _rule: &MappingRule) -> Result<Value, String> {
        if let Value::Number(n) = value {
            if let Some(i) = n.as_i64() {
                return Ok(Value::from(i));
            }
            if let Some(f) = n.as_f64() {
                return Ok(Value::from(f.trunc() as i64));
            }
        }
        let raw = require_scalar(value, "int")?;
        let digits: String = raw
            .chars()
            .enumerate()
            .filter(|(i, c)| c.is_ascii_digit() || (*i == 0 && *c == '-'))
            .map(|(_, c)| c)
            .collect();
        digits
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| format!("cannot convert '{raw}' to an integer"))
    }
}

pub struct ToFloat;

impl Transformer for ToFloat {
    transformer_boilerplate!(
        ToFloat,
        "float",
        "Float",
        "Float conversion, stripping non-numeric characters from strings"
    );

    fn fallback_value(&self) -> Option<Value> {
        Some(Value::from(0.0))
    }

    fn transform(&self, value: &Value, _rule: &MappingRule) -> Result<Value, String> {
        if let Value::Number(n) = value {
            if let Some(f) = n.as_f64() {
                return Ok(Value::from(f));
            }
        }
        let raw = require_scalar(value, "float")?;
        // keep digits, sign and separators; comma counts as decimal point
        let cleaned: String = raw
            .chars()
            .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-'))
            .map(|c| if c == ',' { '.' } else { c })
            .collect();
        cleaned
            .parse::<f64>()
            .map(Value::from)
            .map_err(|_| format!("cannot convert '{raw}' to a float"))
    }
}

pub struct ArrayJoin;

impl Transformer for ArrayJoin {
    transformer_boilerplate!(
        ArrayJoin,
        "array_join",
        "Join list",
        "Join list elements into one string using `format` as the separator"
    );

    fn transform(&self, value: &Value, rule: &MappingRule) -> Result<Value, String> {
        let separator = rule.format.as_deref().unwrap_or(",");
        let joined = match value {
            Value::Array(items) => items
                .iter()
                .map(scalar_string)
                .collect::<Vec<_>>()
                .join(separator),
            other => scalar_string(other),
        };
        Ok(Value::String(joined))
    }
}

pub struct DateFormat;

impl DateFormat {
    const INPUT_FORMATS: [&'static str; 4] =
        ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%d.%m.%Y %H:%M:%S", "%d/%m/%Y %H:%M:%S"];
    const INPUT_DATE_FORMATS: [&'static str; 3] = ["%Y-%m-%d", "%d.%m.%Y", "%d/%m/%Y"];

    fn parse(raw: &str) -> Option<NaiveDateTime> {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
            return Some(parsed.with_timezone(&Utc).naive_utc());
        }
        for format in Self::INPUT_FORMATS {
            if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, format) {
                return Some(parsed);
            }
        }
        for format in Self::INPUT_DATE_FORMATS {
            if let Ok(parsed) = NaiveDate::parse_from_str(raw, format) {
                return parsed.and_hms_opt(0, 0, 0);
            }
        }
        None
    }
}

impl Transformer for DateFormat {
    transformer_boilerplate!(
        DateFormat,
        "date_format",
        "Format date",
        "Reformat a date value using the chrono syntax in `format`"
    );

    fn requires_format(&self) -> bool {
        true
    }

    fn transform(&self, value: &Value, rule: &MappingRule) -> Result<Value, String> {
        let raw = require_scalar(value, "date_format")?;
        let raw = raw.trim();
        let parsed = if let Value::Number(n) = value {
            n.as_i64()
                .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
                .map(|dt| dt.naive_utc())
        } else {
            Self::parse(raw)
        };
        let parsed = parsed.ok_or_else(|| format!("unrecognized date value '{raw}'"))?;
        let format = rule.format.as_deref().unwrap_or("%Y-%m-%d");
        Ok(Value::String(parsed.format(format).to_string()))
    }
}

/// Transformer metadata for configuration introspection
#[derive(Debug, Clone, serde::Serialize)]
pub struct TransformerMetadata {
    pub name: &'static str,
    pub label: &'static str,
    pub description: &'static str,
    pub requires_format: bool,
}

/// Name-keyed transformer lookup
pub struct TransformerRegistry {
    transformers: BTreeMap<&'static str, Arc<dyn Transformer>>,
}

impl TransformerRegistry {
    pub fn new() -> Self {
        Self {
            transformers: BTreeMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(NoneTransformer));
        registry.register(Arc::new(Upper));
        registry.register(Arc::new(Lower));
        registry.register(Arc::new(Trim));
        registry.register(Arc::new(ToBool));
        registry.register(Arc::new(ToInt));
        registry.register(Arc::new(ToFloat));
        registry.register(Arc::new(ArrayJoin));
        registry.register(Arc::new(DateFormat));
        registry
    }

    pub fn register(&mut self, transformer: Arc<dyn Transformer>) {
        self.transformers.insert(transformer.name(), transformer);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Transformer>> {
        self.transformers.get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.transformers.contains_key(name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.transformers.keys().copied().collect()
    }

    pub fn metadata(&self) -> Vec<TransformerMetadata> {
        self.transformers
            .values()
            .map(|t| TransformerMetadata {
                name: t.name(),
                label: t.label(),
                description: t.description(),
                requires_format: t.requires_format(),
            })
            .collect()
    }
}

impl Default for TransformerRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rule() -> MappingRule {
        MappingRule {
            source_field: "a".into(),
            target_field: "b".into(),
            transformation: "none".into(),
            is_required: false,
            default_value: None,
            format: None,
            value_mapping: Vec::new(),
        }
    }

    #[test]
    fn builtin_names() {
        let registry = TransformerRegistry::with_builtins();
        assert_eq!(
            registry.names(),
            vec!["array_join", "bool", "date_format", "float", "int", "lower", "none", "trim", "upper"]
        );
    }

    #[test]
    fn float_strips_non_numeric_characters() {
        let out = ToFloat.transform(&json!("EUR 12,90"), &rule()).unwrap();
        assert_eq!(out, json!(12.9));
    }

    #[test]
    fn float_rejects_strings_with_no_numeric_content() {
        let err = ToFloat.transform(&json!("n/a"), &rule()).unwrap_err();
        assert!(err.contains("n/a"));
    }

    #[test]
    fn bool_uses_truthy_strings_not_casts() {
        for truthy in ["1", "true", "YES", "on"] {
            assert_eq!(ToBool.transform(&json!(truthy), &rule()).unwrap(), json!(true));
        }
        for falsy in ["0", "false", "no", "off", "maybe"] {
            assert_eq!(ToBool.transform(&json!(falsy), &rule()).unwrap(), json!(false));
        }
        assert_eq!(ToBool.transform(&json!(2), &rule()).unwrap(), json!(true));
    }

    #[test]
    fn int_strips_and_truncates() {
        assert_eq!(ToInt.transform(&json!("order #1042"), &rule()).unwrap(), json!(1042));
        assert_eq!(ToInt.transform(&json!(3.9), &rule()).unwrap(), json!(3));
        assert_eq!(ToInt.transform(&json!("-12kg"), &rule()).unwrap(), json!(-12));
        assert!(ToInt.transform(&json!("none"), &rule()).is_err());
    }

    #[test]
    fn array_join_uses_format_as_separator() {
        let mut r = rule();
        r.format = Some(" | ".into());
        let out = ArrayJoin.transform(&json!(["a", "b", 3]), &r).unwrap();
        assert_eq!(out, json!("a | b | 3"));
    }

    #[test]
    fn date_format_reformats_common_shapes() {
        let mut r = rule();
        r.format = Some("%d.%m.%Y".into());
        for input in ["2026-03-01", "2026-03-01 08:30:00", "2026-03-01T08:30:00Z"] {
            let out = DateFormat.transform(&json!(input), &r).unwrap();
            assert_eq!(out, json!("01.03.2026"));
        }
    }

    #[test]
    fn date_format_rejects_garbage() {
        assert!(DateFormat.transform(&json!("soon"), &rule()).is_err());
    }

    #[test]
    fn case_transformers_reject_lists() {
        assert!(Upper.transform(&json!(["a"]), &rule()).is_err());
    }
}
