//! CSV reader
//!
//! Hand-rolled record parser with RFC-style quoting: quoted fields may
//! contain the delimiter, newlines and doubled-quote escapes. All parsed
//! values stay JSON strings; typing is the mapper's job.

use serde_json::{json, Value};

use super::{maybe_trim, ReadResult, Reader};
use crate::errors::ReaderError;
use crate::models::{OptionBag, Row};
use crate::options::{opt_bool, opt_str, OptionDefinitions, OptionKind};

pub struct CsvReader;

impl Reader for CsvReader {
    fn reader_type(&self) -> &'static str {
        "csv"
    }

    fn option_definitions(&self) -> OptionDefinitions {
        OptionDefinitions::new("CsvReader")
            .define("delimiter", OptionKind::String, json!(","), "field delimiter")
            .define(
                "has_headers",
                OptionKind::Boolean,
                json!(true),
                "first record holds column names",
            )
            .define(
                "trim_values",
                OptionKind::Boolean,
                json!(true),
                "trim whitespace around string values",
            )
    }

    fn parse(&self, content: &str, options: &OptionBag) -> Result<ReadResult, ReaderError> {
        if content.trim().is_empty() {
            return Err(ReaderError::invalid_content("csv", "content is empty"));
        }

        let delimiter = opt_str(options, "delimiter")
            .and_then(|s| s.chars().next())
            .unwrap_or(',');
        let has_headers = opt_bool(options, "has_headers");
        let trim = opt_bool(options, "trim_values");

        let mut records = parse_records(content, delimiter)?;
        if records.is_empty() {
            return Err(ReaderError::invalid_content("csv", "no records found"));
        }

        let headers: Vec<String> = if has_headers {
            records.remove(0).into_iter().map(|h| h.trim().to_string()).collect()
        } else {
            (0..records[0].len()).map(|i| format!("col_{i}")).collect()
        };

        let mut rows = Vec::with_capacity(records.len());
        for (index, record) in records.into_iter().enumerate() {
            if record.len() > headers.len() {
                return Err(ReaderError::parsing_failed(
                    "csv",
                    format!(
                        "record {} has {} fields, expected at most {}",
                        index + 1,
                        record.len(),
                        headers.len()
                    ),
                ));
            }
            let mut row = Row::new();
            for (i, header) in headers.iter().enumerate() {
                // Short records are padded with nulls
                let value = match record.get(i) {
                    Some(field) => Value::String(maybe_trim(field.clone(), trim)),
                    None => Value::Null,
                };
                row.insert(header.clone(), value);
            }
            rows.push(row);
        }

        Ok(ReadResult {
            rows,
            headers: Some(headers),
        })
    }
}

/// Split content into records of fields, honoring quotes
fn parse_records(content: &str, delimiter: char) -> Result<Vec<Vec<String>>, ReaderError> {
    let mut records = Vec::new();
    let mut record: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = content.chars().peekable();
    let mut field_started = false;

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' => {
                    if chars.peek() == Some(&'"') {
                        chars.next();
                        field.push('"');
                    } else {
                        in_quotes = false;
                    }
                }
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' => {
                in_quotes = true;
                field_started = true;
            }
            c if c == delimiter => {
                record.push(std::mem::take(&mut field));
                field_started = true;
            }
            '\n' => {
                if field_started || !field.is_empty() || !record.is_empty() {
                    record.push(std::mem::take(&mut field));
                }
                if !record.is_empty() {
                    records.push(std::mem::take(&mut record));
                }
                field_started = false;
            }
            _ => {
                field.push(c);
                field_started = true;
            }
        }
    }

    if in_quotes {
        return Err(ReaderError::parsing_failed(
            "csv",
            "unterminated quoted field at end of content",
        ));
    }
    if field_started || !field.is_empty() {
        record.push(field);
    }
    if !record.is_empty() {
        records.push(record);
    }

    Ok(records)
}
