// ABOUTME: Core data model shared by the source reader, translator and writer
// ABOUTME: Rows, column descriptors, destination fields, watermarks and table mappings

use anyhow::{bail, Result};
use serde::Deserialize;
use std::fmt;

pub use mysql_async::Value;

/// One row read from the source, positionally aligned with the table's columns
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    /// Read the integer identifier stored at `index`
    ///
    /// Accepts both binary-protocol integers and text-protocol byte strings.
    /// Returns `None` for NULL, non-integer values, or values outside `i64`.
    pub fn identifier(&self, index: usize) -> Option<i64> {
        match self.values.get(index)? {
            Value::Int(i) => Some(*i),
            Value::UInt(u) => i64::try_from(*u).ok(),
            Value::Bytes(b) => std::str::from_utf8(b).ok()?.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Column name and native source type, as reported by introspection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub name: String,
    pub source_type: String,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, source_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_type: source_type.into(),
        }
    }
}

/// Warehouse field types the translator can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Integer,
    Float,
    Numeric,
    BigNumeric,
    Boolean,
    String,
    Bytes,
    Date,
    Time,
    Datetime,
    Timestamp,
    Json,
}

impl FieldType {
    /// The type token used in the warehouse's schema API
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Integer => "INTEGER",
            FieldType::Float => "FLOAT",
            FieldType::Numeric => "NUMERIC",
            FieldType::BigNumeric => "BIGNUMERIC",
            FieldType::Boolean => "BOOLEAN",
            FieldType::String => "STRING",
            FieldType::Bytes => "BYTES",
            FieldType::Date => "DATE",
            FieldType::Time => "TIME",
            FieldType::Datetime => "DATETIME",
            FieldType::Timestamp => "TIMESTAMP",
            FieldType::Json => "JSON",
        }
    }

    /// Parse a warehouse type token, accepting the standard SQL aliases
    pub fn from_token(token: &str) -> Option<Self> {
        let field_type = match token.to_ascii_uppercase().as_str() {
            "INTEGER" | "INT64" => FieldType::Integer,
            "FLOAT" | "FLOAT64" => FieldType::Float,
            "NUMERIC" => FieldType::Numeric,
            "BIGNUMERIC" => FieldType::BigNumeric,
            "BOOLEAN" | "BOOL" => FieldType::Boolean,
            "STRING" => FieldType::String,
            "BYTES" => FieldType::Bytes,
            "DATE" => FieldType::Date,
            "TIME" => FieldType::Time,
            "DATETIME" => FieldType::Datetime,
            "TIMESTAMP" => FieldType::Timestamp,
            "JSON" => FieldType::Json,
            _ => return None,
        };
        Some(field_type)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named, typed field of the destination table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationField {
    pub name: String,
    pub field_type: FieldType,
}

impl DestinationField {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }
}

/// Highest identifier already present in the destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Watermark {
    /// Destination is empty or has no identifier column: read everything
    #[default]
    Empty,
    At(i64),
}

impl Watermark {
    pub fn lower_bound(&self) -> Option<i64> {
        match self {
            Watermark::Empty => None,
            Watermark::At(id) => Some(*id),
        }
    }
}

impl From<Option<i64>> for Watermark {
    fn from(value: Option<i64>) -> Self {
        value.map_or(Watermark::Empty, Watermark::At)
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Watermark::Empty => f.write_str("none"),
            Watermark::At(id) => write!(f, "{}", id),
        }
    }
}

fn default_id_column() -> String {
    "id".to_string()
}

/// Which source table replicates into which destination table
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TableMapping {
    pub source: String,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default = "default_id_column")]
    pub id_column: String,
}

impl TableMapping {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: None,
            id_column: default_id_column(),
        }
    }

    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    pub fn with_id_column(mut self, id_column: impl Into<String>) -> Self {
        self.id_column = id_column.into();
        self
    }

    pub fn destination_table(&self) -> &str {
        self.destination.as_deref().unwrap_or(&self.source)
    }

    /// Parse `source` or `source=destination`
    pub fn parse(entry: &str, id_column: &str) -> Result<Self> {
        let entry = entry.trim();
        let (source, destination) = match entry.split_once('=') {
            Some((src, dest)) => (src.trim(), Some(dest.trim())),
            None => (entry, None),
        };

        if source.is_empty() {
            bail!("Table mapping '{}' has an empty source table", entry);
        }
        if destination.is_some_and(str::is_empty) {
            bail!("Table mapping '{}' has an empty destination table", entry);
        }

        let mut mapping = TableMapping::new(source).with_id_column(id_column);
        if let Some(dest) = destination {
            mapping = mapping.with_destination(dest);
        }
        Ok(mapping)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_from_binary_and_text_values() {
        let row = Row::new(vec![
            Value::Int(42),
            Value::UInt(7),
            Value::Bytes(b"1001".to_vec()),
            Value::NULL,
            Value::UInt(u64::MAX),
            Value::Bytes(b"abc".to_vec()),
        ]);

        assert_eq!(row.identifier(0), Some(42));
        assert_eq!(row.identifier(1), Some(7));
        assert_eq!(row.identifier(2), Some(1001));
        assert_eq!(row.identifier(3), None);
        assert_eq!(row.identifier(4), None);
        assert_eq!(row.identifier(5), None);
        assert_eq!(row.identifier(99), None);
    }

    #[test]
    fn test_watermark_from_option() {
        assert_eq!(Watermark::from(None), Watermark::Empty);
        assert_eq!(Watermark::from(Some(100)), Watermark::At(100));
        assert_eq!(Watermark::At(100).lower_bound(), Some(100));
        assert_eq!(Watermark::Empty.lower_bound(), None);
        assert_eq!(Watermark::Empty.to_string(), "none");
    }

    #[test]
    fn test_field_type_tokens() {
        assert_eq!(FieldType::from_token("INT64"), Some(FieldType::Integer));
        assert_eq!(FieldType::from_token("bool"), Some(FieldType::Boolean));
        assert_eq!(FieldType::from_token("RECORD"), None);
        assert_eq!(
            FieldType::from_token(FieldType::BigNumeric.as_str()),
            Some(FieldType::BigNumeric)
        );
    }

    #[test]
    fn test_parse_table_mapping() {
        let plain = TableMapping::parse("batches", "id").unwrap();
        assert_eq!(plain.source, "batches");
        assert_eq!(plain.destination_table(), "batches");

        let renamed = TableMapping::parse(" dlrs = delivery_reports ", "dlr_id").unwrap();
        assert_eq!(renamed.source, "dlrs");
        assert_eq!(renamed.destination_table(), "delivery_reports");
        assert_eq!(renamed.id_column, "dlr_id");

        assert!(TableMapping::parse("", "id").is_err());
        assert!(TableMapping::parse("=dest", "id").is_err());
        assert!(TableMapping::parse("src=", "id").is_err());
    }
}
