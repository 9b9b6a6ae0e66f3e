//! XML reader
//!
//! Each repeated child element of the document root becomes a row.
//! Element attributes are exposed as `@`-prefixed fields and text-only
//! children as string fields, so `<item sku="A1"><name>x</name></item>`
//! yields `{"@sku": "A1", "name": "x"}`.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader as XmlParser;
use serde_json::{json, Map, Value};

use super::{maybe_trim, ReadResult, Reader};
use crate::errors::ReaderError;
use crate::models::{OptionBag, Row};
use crate::options::{opt_bool, opt_str, OptionDefinitions, OptionKind};

pub struct XmlReader;

impl Reader for XmlReader {
    fn reader_type(&self) -> &'static str {
        "xml"
    }

    fn option_definitions(&self) -> OptionDefinitions {
        OptionDefinitions::new("XmlReader")
            .define(
                "record_element",
                OptionKind::String,
                json!(null),
                "name of the repeated element holding one row",
            )
            .define(
                "trim_values",
                OptionKind::Boolean,
                json!(true),
                "trim whitespace around text values",
            )
    }

    fn parse(&self, content: &str, options: &OptionBag) -> Result<ReadResult, ReaderError> {
        let trim = opt_bool(options, "trim_values");

        let mut parser = XmlParser::from_str(content);
        parser.config_mut().trim_text(true);

        let root = loop {
            match parser.read_event().map_err(xml_error)? {
                Event::Start(start) => break parse_element(&mut parser, &start, trim)?,
                Event::Eof => {
                    return Err(ReaderError::invalid_content("xml", "document has no root element"))
                }
                // prolog, comments and whitespace before the root
                _ => continue,
            }
        };

        let Value::Object(root_map) = root else {
            return Err(ReaderError::invalid_content(
                "xml",
                "root element contains no child elements",
            ));
        };

        let records = match opt_str(options, "record_element") {
            Some(name) => root_map.get(name).cloned().ok_or_else(|| {
                ReaderError::invalid_content("xml", format!("no <{name}> elements under the root"))
            })?,
            None => single_collection(&root_map)?,
        };

        let items = match records {
            Value::Array(items) => items,
            single => vec![single],
        };

        let mut rows = Vec::with_capacity(items.len());
        for (index, item) in items.into_iter().enumerate() {
            match item {
                Value::Object(fields) => rows.push(Row::from_iter(fields)),
                _ => {
                    return Err(ReaderError::invalid_content(
                        "xml",
                        format!("record element {index} holds no fields"),
                    ))
                }
            }
        }

        Ok(ReadResult { rows, headers: None })
    }
}

/// Pick the row collection when `record_element` is not given: the root
/// must hold exactly one repeated element name.
fn single_collection(root: &Map<String, Value>) -> Result<Value, ReaderError> {
    let mut arrays = root.iter().filter(|(_, v)| v.is_array());
    match (arrays.next(), arrays.next()) {
        (Some((_, collection)), None) => Ok(collection.clone()),
        (None, _) if root.len() == 1 => {
            // a single record still counts as a collection of one
            Ok(root.values().next().cloned().unwrap_or(Value::Null))
        }
        _ => Err(ReaderError::invalid_content(
            "xml",
            "cannot determine the record element (set record_element)",
        )),
    }
}

/// Recursively convert one element into a value: a string when it only
/// holds text, otherwise an object of `@attr` and child fields. Repeated
/// child names collapse into arrays.
fn parse_element(
    parser: &mut XmlParser<&[u8]>,
    start: &BytesStart<'_>,
    trim: bool,
) -> Result<Value, ReaderError> {
    let mut fields = Map::new();
    let mut text = String::new();

    for attribute in start.attributes() {
        let attribute = attribute.map_err(|e| ReaderError::parsing_failed("xml", e.to_string()))?;
        let key = format!("@{}", String::from_utf8_lossy(attribute.key.as_ref()));
        let value = attribute.unescape_value().map_err(xml_error)?;
        fields.insert(key, Value::String(maybe_trim(value.into_owned(), trim)));
    }

    loop {
        match parser.read_event().map_err(xml_error)? {
            Event::Start(child) => {
                let name = String::from_utf8_lossy(child.name().as_ref()).into_owned();
                let value = parse_element(parser, &child, trim)?;
                insert_repeatable(&mut fields, name, value);
            }
            Event::Empty(child) => {
                let name = String::from_utf8_lossy(child.name().as_ref()).into_owned();
                let mut empty = Map::new();
                for attribute in child.attributes() {
                    let attribute =
                        attribute.map_err(|e| ReaderError::parsing_failed("xml", e.to_string()))?;
                    let key = format!("@{}", String::from_utf8_lossy(attribute.key.as_ref()));
                    let value = attribute.unescape_value().map_err(xml_error)?;
                    empty.insert(key, Value::String(maybe_trim(value.into_owned(), trim)));
                }
                let value = if empty.is_empty() { Value::Null } else { Value::Object(empty) };
                insert_repeatable(&mut fields, name, value);
            }
            Event::Text(t) => text.push_str(&t.unescape().map_err(xml_error)?),
            Event::CData(t) => text.push_str(&String::from_utf8_lossy(&t.into_inner())),
            Event::End(_) => break,
            Event::Eof => {
                return Err(ReaderError::parsing_failed(
                    "xml",
                    format!(
                        "unclosed <{}> element",
                        String::from_utf8_lossy(start.name().as_ref())
                    ),
                ))
            }
            _ => continue,
        }
    }

    let text = maybe_trim(text, trim);
    if fields.is_empty() {
        return Ok(if text.is_empty() { Value::Null } else { Value::String(text) });
    }
    if !text.is_empty() {
        fields.insert("#text".to_string(), Value::String(text));
    }
    Ok(Value::Object(fields))
}

fn insert_repeatable(fields: &mut Map<String, Value>, name: String, value: Value) {
    match fields.get_mut(&name) {
        Some(Value::Array(existing)) => existing.push(value),
        Some(_) => {
            let first = fields.remove(&name).unwrap_or(Value::Null);
            fields.insert(name, Value::Array(vec![first, value]));
        }
        None => {
            fields.insert(name, value);
        }
    }
}

fn xml_error(e: quick_xml::Error) -> ReaderError {
    ReaderError::parsing_failed("xml", e.to_string())
}
