//! Named predicate operators for row filtering
//!
//! Each operator is an independent plugin declaring its name, UI label,
//! supported value kinds, rule validation, an optional null-handling hook
//! and the comparison body itself. The shared evaluation algorithm
//! (normalization, null delegation, kind checking) lives in
//! [`crate::filter::evaluate_rule`], never here.

use regex::RegexBuilder;
use serde_json::Value;

use crate::errors::FilterError;
use crate::models::{FilterRule, OptionBag};
use crate::options::{opt_bool, OptionDefinitions, OptionKind};

/// Value kinds a filter operator can work on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    String,
    Number,
    Boolean,
    List,
    Map,
}

impl ValueKind {
    pub fn of(value: &Value) -> ValueKind {
        match value {
            Value::String(_) => ValueKind::String,
            Value::Number(_) => ValueKind::Number,
            Value::Bool(_) => ValueKind::Boolean,
            Value::Array(_) => ValueKind::List,
            Value::Object(_) => ValueKind::Map,
            // Nulls never reach kind checks; normalization handles them first
            Value::Null => ValueKind::String,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::String => "string",
            ValueKind::Number => "number",
            ValueKind::Boolean => "boolean",
            ValueKind::List => "list",
            ValueKind::Map => "map",
        }
    }
}

const SCALAR_KINDS: &[ValueKind] = &[ValueKind::String, ValueKind::Number, ValueKind::Boolean];
const STRING_KINDS: &[ValueKind] = &[ValueKind::String];
const NUMERIC_KINDS: &[ValueKind] = &[ValueKind::String, ValueKind::Number];
const ANY_KIND: &[ValueKind] = &[
    ValueKind::String,
    ValueKind::Number,
    ValueKind::Boolean,
    ValueKind::List,
    ValueKind::Map,
];

/// One named, pluggable row predicate
pub trait FilterOperator: Send + Sync {
    fn name(&self) -> &'static str;
    fn label(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn supported_kinds(&self) -> &'static [ValueKind];

    /// Per-operator option declarations, validated/merged by the shared
    /// option contract before the comparison runs
    fn option_definitions(&self) -> OptionDefinitions {
        OptionDefinitions::new(self.name())
    }

    /// Structural validation of the rule itself (operand shape etc.)
    fn validate_rule(&self, _rule: &FilterRule) -> Result<(), FilterError> {
        Ok(())
    }

    /// Null-handling hook: called instead of [`compare`] when either side
    /// normalized to null. Default policy: no match.
    ///
    /// [`compare`]: FilterOperator::compare
    fn matches_null(&self, _data_is_null: bool, _filter_is_null: bool) -> bool {
        false
    }

    /// The comparison body; both sides are normalized and non-null
    fn compare(
        &self,
        data: &Value,
        filter: &Value,
        options: &OptionBag,
    ) -> Result<bool, FilterError>;
}

/// Scalar value as comparison string
pub(crate) fn scalar_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

/// Loose scalar equality: numeric when both sides are numeric, otherwise
/// string comparison honoring the `case_sensitive` option
fn loose_eq(data: &Value, filter: &Value, case_sensitive: bool) -> bool {
    if let (Some(a), Some(b)) = (to_number(data), to_number(filter)) {
        return a == b;
    }
    let a = scalar_string(data);
    let b = scalar_string(filter);
    if case_sensitive {
        a == b
    } else {
        a.eq_ignore_ascii_case(&b)
    }
}

/// Numeric coercion: numbers directly, strings parsed after trimming
fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn require_number(value: &Value, operator: &'static str) -> Result<f64, FilterError> {
    to_number(value).ok_or(FilterError::UnsupportedValueType {
        operator,
        kind: ValueKind::of(value).as_str(),
    })
}

fn case_option() -> OptionKind {
    OptionKind::Boolean
}

fn string_op_options(name: &'static str) -> OptionDefinitions {
    OptionDefinitions::new(name).define(
        "case_sensitive",
        case_option(),
        Value::Bool(false),
        "compare strings case-sensitively",
    )
}

fn both_strings(data: &Value, filter: &Value, case_sensitive: bool) -> (String, String) {
    let a = scalar_string(data);
    let b = scalar_string(filter);
    if case_sensitive {
        (a, b)
    } else {
        (a.to_lowercase(), b.to_lowercase())
    }
}

macro_rules! operator_boilerplate {
    ($name:literal, $label:literal, $desc:literal, $kinds:expr) => {
        fn name(&self) -> &'static str {
            $name
        }
        fn label(&self) -> &'static str {
            $label
        }
        fn description(&self) -> &'static str {
            $desc
        }
        fn supported_kinds(&self) -> &'static [ValueKind] {
            $kinds
        }
    };
}

pub struct Equals;

impl FilterOperator for Equals {
    operator_boilerplate!(
        "equals",
        "Equals",
        "Value is equal to the rule value",
        SCALAR_KINDS
    );

    fn option_definitions(&self) -> OptionDefinitions {
        string_op_options(self.name())
    }

    fn compare(&self, data: &Value, filter: &Value, options: &OptionBag) -> Result<bool, FilterError> {
        Ok(loose_eq(data, filter, opt_bool(options, "case_sensitive")))
    }
}

pub struct NotEquals;

impl FilterOperator for NotEquals {
    operator_boilerplate!(
        "not_equals",
        "Not equals",
        "Value differs from the rule value",
        SCALAR_KINDS
    );

    fn option_definitions(&self) -> OptionDefinitions {
        string_op_options(self.name())
    }

    fn compare(&self, data: &Value, filter: &Value, options: &OptionBag) -> Result<bool, FilterError> {
        Ok(!loose_eq(data, filter, opt_bool(options, "case_sensitive")))
    }
}

pub struct Contains;

impl FilterOperator for Contains {
    operator_boilerplate!(
        "contains",
        "Contains",
        "String value contains the rule value",
        STRING_KINDS
    );

    fn option_definitions(&self) -> OptionDefinitions {
        string_op_options(self.name())
    }

    fn compare(&self, data: &Value, filter: &Value, options: &OptionBag) -> Result<bool, FilterError> {
        let (a, b) = both_strings(data, filter, opt_bool(options, "case_sensitive"));
        Ok(a.contains(&b))
    }
}

pub struct NotContains;

impl FilterOperator for NotContains {
    operator_boilerplate!(
        "not_contains",
        "Does not contain",
        "String value does not contain the rule value",
        STRING_KINDS
    );

    fn option_definitions(&self) -> OptionDefinitions {
        string_op_options(self.name())
    }

    fn compare(&self, data: &Value, filter: &Value, options: &OptionBag) -> Result<bool, FilterError> {
        let (a, b) = both_strings(data, filter, opt_bool(options, "case_sensitive"));
        Ok(!a.contains(&b))
    }
}

pub struct StartsWith;

impl FilterOperator for StartsWith {
    operator_boilerplate!(
        "starts_with",
        "Starts with",
        "String value starts with the rule value",
        STRING_KINDS
    );

    fn option_definitions(&self) -> OptionDefinitions {
        string_op_options(self.name())
    }

    fn compare(&self, data: &Value, filter: &Value, options: &OptionBag) -> Result<bool, FilterError> {
        let (a, b) = both_strings(data, filter, opt_bool(options, "case_sensitive"));
        Ok(a.starts_with(&b))
    }
}

pub struct EndsWith;

impl FilterOperator for EndsWith {
    operator_boilerplate!(
        "ends_with",
        "Ends with",
        "String value ends with the rule value",
        STRING_KINDS
    );

    fn option_definitions(&self) -> OptionDefinitions {
        string_op_options(self.name())
    }

    fn compare(&self, data: &Value, filter: &Value, options: &OptionBag) -> Result<bool, FilterError> {
        let (a, b) = both_strings(data, filter, opt_bool(options, "case_sensitive"));
        Ok(a.ends_with(&b))
    }
}

fn build_regex(pattern: &str, case_insensitive: bool) -> Result<regex::Regex, FilterError> {
    RegexBuilder::new(pattern)
        .case_insensitive(case_insensitive)
        .build()
        .map_err(|e| FilterError::RegexError {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })
}

fn regex_options(name: &'static str) -> OptionDefinitions {
    OptionDefinitions::new(name).define(
        "case_insensitive",
        OptionKind::Boolean,
        Value::Bool(false),
        "match case-insensitively",
    )
}

fn validate_regex_rule(rule: &FilterRule) -> Result<(), FilterError> {
    let Some(pattern) = rule.value.as_str() else {
        return Err(FilterError::invalid_rule(
            &rule.key,
            "regex operators require a string pattern",
        ));
    };
    build_regex(pattern, false).map(|_| ())
}

pub struct Regex;

impl FilterOperator for Regex {
    operator_boilerplate!(
        "regex",
        "Matches regex",
        "String value matches the rule pattern",
        STRING_KINDS
    );

    fn option_definitions(&self) -> OptionDefinitions {
        regex_options(self.name())
    }

    fn validate_rule(&self, rule: &FilterRule) -> Result<(), FilterError> {
        validate_regex_rule(rule)
    }

    fn compare(&self, data: &Value, filter: &Value, options: &OptionBag) -> Result<bool, FilterError> {
        let pattern = filter.as_str().unwrap_or_default();
        let re = build_regex(pattern, opt_bool(options, "case_insensitive"))?;
        Ok(re.is_match(&scalar_string(data)))
    }
}

pub struct NotRegex;

impl FilterOperator for NotRegex {
    operator_boilerplate!(
        "not_regex",
        "Does not match regex",
        "String value does not match the rule pattern",
        STRING_KINDS
    );

    fn option_definitions(&self) -> OptionDefinitions {
        regex_options(self.name())
    }

    fn validate_rule(&self, rule: &FilterRule) -> Result<(), FilterError> {
        validate_regex_rule(rule)
    }

    fn compare(&self, data: &Value, filter: &Value, options: &OptionBag) -> Result<bool, FilterError> {
        let pattern = filter.as_str().unwrap_or_default();
        let re = build_regex(pattern, opt_bool(options, "case_insensitive"))?;
        Ok(!re.is_match(&scalar_string(data)))
    }
}

pub struct GreaterThan;

impl FilterOperator for GreaterThan {
    operator_boilerplate!(
        "greater_than",
        "Greater than",
        "Numeric value is greater than the rule value",
        NUMERIC_KINDS
    );

    fn compare(&self, data: &Value, filter: &Value, _options: &OptionBag) -> Result<bool, FilterError> {
        Ok(require_number(data, self.name())? > require_number(filter, self.name())?)
    }
}

pub struct LessThan;

impl FilterOperator for LessThan {
    operator_boilerplate!(
        "less_than",
        "Less than",
        "Numeric value is less than the rule value",
        NUMERIC_KINDS
    );

    fn compare(&self, data: &Value, filter: &Value, _options: &OptionBag) -> Result<bool, FilterError> {
        Ok(require_number(data, self.name())? < require_number(filter, self.name())?)
    }
}

fn validate_list_rule(rule: &FilterRule) -> Result<(), FilterError> {
    if !rule.value.is_array() {
        return Err(FilterError::invalid_rule(
            &rule.key,
            "membership operators require a list rule value",
        ));
    }
    Ok(())
}

fn contains_loose(haystack: &[Value], needle: &Value, case_sensitive: bool) -> bool {
    haystack.iter().any(|v| loose_eq(needle, v, case_sensitive))
}

pub struct In;

impl FilterOperator for In {
    operator_boilerplate!(
        "in",
        "In list",
        "Value is one of the rule values",
        SCALAR_KINDS
    );

    fn option_definitions(&self) -> OptionDefinitions {
        string_op_options(self.name())
    }

    fn validate_rule(&self, rule: &FilterRule) -> Result<(), FilterError> {
        validate_list_rule(rule)
    }

    fn compare(&self, data: &Value, filter: &Value, options: &OptionBag) -> Result<bool, FilterError> {
        let list = filter.as_array().map(Vec::as_slice).unwrap_or_default();
        Ok(contains_loose(list, data, opt_bool(options, "case_sensitive")))
    }
}

pub struct NotIn;

impl FilterOperator for NotIn {
    operator_boilerplate!(
        "not_in",
        "Not in list",
        "Value is none of the rule values",
        SCALAR_KINDS
    );

    fn option_definitions(&self) -> OptionDefinitions {
        string_op_options(self.name())
    }

    fn validate_rule(&self, rule: &FilterRule) -> Result<(), FilterError> {
        validate_list_rule(rule)
    }

    fn compare(&self, data: &Value, filter: &Value, options: &OptionBag) -> Result<bool, FilterError> {
        let list = filter.as_array().map(Vec::as_slice).unwrap_or_default();
        Ok(!contains_loose(list, data, opt_bool(options, "case_sensitive")))
    }
}

fn validate_range_rule(rule: &FilterRule) -> Result<(), FilterError> {
    let bounds = rule.value.as_array().ok_or_else(|| {
        FilterError::invalid_rule(&rule.key, "range operators require a [min, max] rule value")
    })?;
    if bounds.len() != 2 || bounds.iter().any(|b| to_number(b).is_none()) {
        return Err(FilterError::invalid_rule(
            &rule.key,
            "range operators require exactly two numeric bounds",
        ));
    }
    Ok(())
}

fn range_bounds(filter: &Value) -> (f64, f64) {
    let bounds = filter.as_array().map(Vec::as_slice).unwrap_or_default();
    let lo = bounds.first().and_then(to_number).unwrap_or(f64::MIN);
    let hi = bounds.get(1).and_then(to_number).unwrap_or(f64::MAX);
    if lo <= hi {
        (lo, hi)
    } else {
        (hi, lo)
    }
}

pub struct Between;

impl FilterOperator for Between {
    operator_boilerplate!(
        "between",
        "Between",
        "Numeric value lies within the inclusive rule range",
        NUMERIC_KINDS
    );

    fn validate_rule(&self, rule: &FilterRule) -> Result<(), FilterError> {
        validate_range_rule(rule)
    }

    fn compare(&self, data: &Value, filter: &Value, _options: &OptionBag) -> Result<bool, FilterError> {
        let n = require_number(data, self.name())?;
        let (lo, hi) = range_bounds(filter);
        Ok(n >= lo && n <= hi)
    }
}

pub struct NotBetween;

impl FilterOperator for NotBetween {
    operator_boilerplate!(
        "not_between",
        "Not between",
        "Numeric value lies outside the inclusive rule range",
        NUMERIC_KINDS
    );

    fn validate_rule(&self, rule: &FilterRule) -> Result<(), FilterError> {
        validate_range_rule(rule)
    }

    fn compare(&self, data: &Value, filter: &Value, _options: &OptionBag) -> Result<bool, FilterError> {
        let n = require_number(data, self.name())?;
        let (lo, hi) = range_bounds(filter);
        Ok(n < lo || n > hi)
    }
}

pub struct IsNull;

impl FilterOperator for IsNull {
    operator_boilerplate!(
        "is_null",
        "Is null",
        "Value is null, empty or missing",
        ANY_KIND
    );

    fn matches_null(&self, data_is_null: bool, _filter_is_null: bool) -> bool {
        data_is_null
    }

    fn compare(&self, _data: &Value, _filter: &Value, _options: &OptionBag) -> Result<bool, FilterError> {
        // Reached only with a non-null data value
        Ok(false)
    }
}

pub struct IsNotNull;

impl FilterOperator for IsNotNull {
    operator_boilerplate!(
        "is_not_null",
        "Is not null",
        "Value is present and non-empty",
        ANY_KIND
    );

    fn matches_null(&self, data_is_null: bool, _filter_is_null: bool) -> bool {
        !data_is_null
    }

    fn compare(&self, _data: &Value, _filter: &Value, _options: &OptionBag) -> Result<bool, FilterError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bag() -> OptionBag {
        OptionBag::new()
    }

    #[test]
    fn loose_equality_mixes_numbers_and_strings() {
        assert!(loose_eq(&json!("9.99"), &json!(9.99), false));
        assert!(loose_eq(&json!("Widget"), &json!("widget"), false));
        assert!(!loose_eq(&json!("Widget"), &json!("widget"), true));
    }

    #[test]
    fn numeric_comparison_coerces_strings() {
        assert!(GreaterThan.compare(&json!("10"), &json!(5), &bag()).unwrap());
        assert!(LessThan.compare(&json!(3), &json!("4.5"), &bag()).unwrap());
    }

    #[test]
    fn numeric_comparison_rejects_non_numeric_strings() {
        let err = GreaterThan
            .compare(&json!("abc"), &json!(5), &bag())
            .unwrap_err();
        assert!(matches!(
            err,
            FilterError::UnsupportedValueType { operator: "greater_than", .. }
        ));
    }

    #[test]
    fn membership_requires_list_operand() {
        let rule = FilterRule {
            key: "status".into(),
            operator: "in".into(),
            value: json!("active"),
            options: OptionBag::new(),
        };
        assert!(In.validate_rule(&rule).is_err());
    }

    #[test]
    fn between_reorders_bounds() {
        assert!(Between.compare(&json!(5), &json!([10, 1]), &bag()).unwrap());
        assert!(NotBetween.compare(&json!(11), &json!([1, 10]), &bag()).unwrap());
    }

    #[test]
    fn regex_rule_validation_catches_bad_patterns() {
        let rule = FilterRule {
            key: "name".into(),
            operator: "regex".into(),
            value: json!("("),
            options: OptionBag::new(),
        };
        assert!(matches!(
            Regex.validate_rule(&rule).unwrap_err(),
            FilterError::RegexError { .. }
        ));
    }

    #[test]
    fn null_hooks() {
        assert!(IsNull.matches_null(true, true));
        assert!(!IsNull.matches_null(false, true));
        assert!(IsNotNull.matches_null(false, true));
        assert!(!IsNotNull.matches_null(true, true));
        // default policy on ordinary operators: no match either way
        assert!(!Equals.matches_null(true, false));
        assert!(!NotEquals.matches_null(true, false));
    }
}
