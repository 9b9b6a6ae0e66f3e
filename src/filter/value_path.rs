//! Dot-notation path resolution into nested row structures
//!
//! A missing intermediate segment yields [`PathValue::Missing`], which is
//! distinct from "found but null" ([`PathValue::Null`]); filter null
//! policies and mapper required-field checks both rely on the difference.

use serde_json::Value;

use crate::models::Row;

/// Result of resolving a dot-path against a row
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PathValue<'a> {
    /// No value at this path (missing key or non-traversable intermediate)
    Missing,
    /// The path exists and holds an explicit null
    Null,
    /// The path exists and holds a value
    Found(&'a Value),
}

impl<'a> PathValue<'a> {
    pub fn into_option(self) -> Option<&'a Value> {
        match self {
            PathValue::Found(v) => Some(v),
            _ => None,
        }
    }

    pub fn exists(&self) -> bool {
        !matches!(self, PathValue::Missing)
    }
}

/// Resolve `path` ("a.b.0.c") against a row
///
/// Numeric segments index into arrays; all other segments index into
/// objects. Anything else along the way makes the whole path missing.
pub fn resolve<'a>(row: &'a Row, path: &str) -> PathValue<'a> {
    let mut segments = path.split('.');
    let Some(first) = segments.next() else {
        return PathValue::Missing;
    };

    let mut current = match row.get(first) {
        Some(v) => v,
        None => return PathValue::Missing,
    };

    for segment in segments {
        current = match current {
            Value::Object(map) => match map.get(segment) {
                Some(v) => v,
                None => return PathValue::Missing,
            },
            Value::Array(items) => match segment.parse::<usize>().ok().and_then(|i| items.get(i)) {
                Some(v) => v,
                None => return PathValue::Missing,
            },
            _ => return PathValue::Missing,
        };
    }

    if current.is_null() {
        PathValue::Null
    } else {
        PathValue::Found(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row() -> Row {
        serde_json::from_value(json!({
            "name": "Widget",
            "price": null,
            "attributes": { "color": "red", "dims": { "w": 10 } },
            "tags": ["a", "b"],
        }))
        .unwrap()
    }

    #[test]
    fn top_level_lookup() {
        let r = row();
        assert_eq!(resolve(&r, "name"), PathValue::Found(&json!("Widget")));
    }

    #[test]
    fn missing_is_not_null() {
        let r = row();
        assert_eq!(resolve(&r, "nope"), PathValue::Missing);
        assert_eq!(resolve(&r, "price"), PathValue::Null);
        assert!(resolve(&r, "price").exists());
        assert!(!resolve(&r, "nope").exists());
    }

    #[test]
    fn nested_and_array_segments() {
        let r = row();
        assert_eq!(
            resolve(&r, "attributes.dims.w"),
            PathValue::Found(&json!(10))
        );
        assert_eq!(resolve(&r, "tags.1"), PathValue::Found(&json!("b")));
        assert_eq!(resolve(&r, "tags.9"), PathValue::Missing);
    }

    #[test]
    fn missing_intermediate_segment() {
        let r = row();
        assert_eq!(resolve(&r, "attributes.size.w"), PathValue::Missing);
        assert_eq!(resolve(&r, "name.anything"), PathValue::Missing);
    }
}
