//! JSON reader
//!
//! Accepts an array of row objects at the document root, or anywhere
//! inside it via the `root_path` option. A parse error is `ParsingFailed`;
//! a well-formed document that is not a row collection is `InvalidContent`.

use serde_json::{json, Value};

use super::{maybe_trim, ReadResult, Reader};
use crate::errors::ReaderError;
use crate::models::{OptionBag, Row};
use crate::options::{opt_bool, opt_str, OptionDefinitions, OptionKind};

pub struct JsonReader;

impl Reader for JsonReader {
    fn reader_type(&self) -> &'static str {
        "json"
    }

    fn option_definitions(&self) -> OptionDefinitions {
        OptionDefinitions::new("JsonReader")
            .define(
                "root_path",
                OptionKind::String,
                json!(null),
                "dot-path to the row array inside the document",
            )
            .define(
                "trim_values",
                OptionKind::Boolean,
                json!(true),
                "trim whitespace around string values",
            )
    }

    fn parse(&self, content: &str, options: &OptionBag) -> Result<ReadResult, ReaderError> {
        let document: Value = serde_json::from_str(content)
            .map_err(|e| ReaderError::parsing_failed("json", e.to_string()))?;

        let trim = opt_bool(options, "trim_values");
        let root = match opt_str(options, "root_path") {
            Some(path) => descend(&document, path).ok_or_else(|| {
                ReaderError::invalid_content("json", format!("root_path '{path}' not found"))
            })?,
            None => &document,
        };

        let items = match root {
            Value::Array(items) => items.as_slice(),
            // A single root object with exactly one array member is a
            // common export shape ({"records": [...]})
            Value::Object(map) => {
                let arrays: Vec<&Value> = map.values().filter(|v| v.is_array()).collect();
                match (arrays.len(), map.len()) {
                    (1, 1) => arrays[0].as_array().map(Vec::as_slice).unwrap_or_default(),
                    _ => {
                        return Err(ReaderError::invalid_content(
                            "json",
                            "expected an array of row objects (set root_path to locate it)",
                        ))
                    }
                }
            }
            _ => {
                return Err(ReaderError::invalid_content(
                    "json",
                    "document root is not an array of row objects",
                ))
            }
        };

        let mut rows = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            let Value::Object(fields) = item else {
                return Err(ReaderError::invalid_content(
                    "json",
                    format!("element {index} is not an object"),
                ));
            };
            let mut row = Row::new();
            for (key, value) in fields {
                row.insert(key.clone(), trim_strings(value.clone(), trim));
            }
            rows.push(row);
        }

        // JSON rows carry their own field names; no positional header set
        Ok(ReadResult { rows, headers: None })
    }
}

fn descend<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = document;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn trim_strings(value: Value, trim: bool) -> Value {
    if !trim {
        return value;
    }
    match value {
        Value::String(s) => Value::String(maybe_trim(s, true)),
        Value::Array(items) => Value::Array(items.into_iter().map(|v| trim_strings(v, true)).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, trim_strings(v, true)))
                .collect(),
        ),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_root() {
        let result = JsonReader
            .read(br#"[{"id": 1, "name": " Widget "}]"#, &OptionBag::new())
            .unwrap();
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0].get("name"), Some(&json!("Widget")));
        assert!(result.headers.is_none());
    }

    #[test]
    fn single_array_member_object_root() {
        let result = JsonReader
            .read(br#"{"records": [{"id": 1}, {"id": 2}]}"#, &OptionBag::new())
            .unwrap();
        assert_eq!(result.rows.len(), 2);
    }

    #[test]
    fn root_path_descends_into_the_document() {
        let mut options = OptionBag::new();
        options.insert("root_path".into(), json!("data.items"));
        let result = JsonReader
            .read(
                br#"{"data": {"items": [{"id": 1}], "total": 1}, "meta": {}}"#,
                &options,
            )
            .unwrap();
        assert_eq!(result.rows.len(), 1);
    }

    #[test]
    fn malformed_json_is_parsing_failed() {
        let err = JsonReader.read(b"{not json", &OptionBag::new()).unwrap_err();
        assert!(err.to_string().contains("Parsing failed"));
    }

    #[test]
    fn scalar_root_is_invalid_content() {
        let err = JsonReader.read(b"42", &OptionBag::new()).unwrap_err();
        assert!(err.to_string().contains("Invalid content"));
    }

    #[test]
    fn non_object_element_is_invalid_content() {
        let err = JsonReader.read(b"[1, 2]", &OptionBag::new()).unwrap_err();
        assert!(err.to_string().contains("element 0"));
    }
}
