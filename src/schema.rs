// ABOUTME: Translates MySQL column types into BigQuery field types
// ABOUTME: Uses an explicit mapping table and rejects types it cannot represent

use crate::types::{ColumnDescriptor, DestinationField, FieldType};
use anyhow::{bail, Context, Result};

/// Largest NUMERIC precision/scale; anything wider becomes BIGNUMERIC
const NUMERIC_MAX_PRECISION: u32 = 38;
const NUMERIC_MAX_SCALE: u32 = 9;

/// Map one MySQL column type (as in `COLUMN_TYPE` / `DESCRIBE`) to a field type
///
/// The base type is the lowercase token before any `(` or whitespace, so
/// `int(11) unsigned`, `varchar(255)` and `enum('a','b')` are all handled.
/// Types without a faithful warehouse representation are an error.
///
/// # Examples
///
/// ```
/// # use mysql_bigquery_replicator::schema::map_mysql_type;
/// # use mysql_bigquery_replicator::types::FieldType;
/// assert_eq!(map_mysql_type("int(11)").unwrap(), FieldType::Integer);
/// assert_eq!(map_mysql_type("varchar(255)").unwrap(), FieldType::String);
/// assert_eq!(map_mysql_type("decimal(10,2)").unwrap(), FieldType::Numeric);
/// assert!(map_mysql_type("geometry").is_err());
/// ```
pub fn map_mysql_type(source_type: &str) -> Result<FieldType> {
    let normalized = source_type.trim().to_ascii_lowercase();
    let base = normalized
        .split(|c: char| c == '(' || c.is_whitespace())
        .next()
        .unwrap_or_default();

    let field_type = match base {
        "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "bigint" | "year" => {
            FieldType::Integer
        }
        "bool" | "boolean" => FieldType::Boolean,
        "decimal" | "numeric" | "dec" | "fixed" => map_decimal(&normalized)?,
        "float" | "double" | "real" => FieldType::Float,
        "char" | "varchar" | "tinytext" | "text" | "mediumtext" | "longtext" | "enum" | "set" => {
            FieldType::String
        }
        "binary" | "varbinary" | "tinyblob" | "blob" | "mediumblob" | "longblob" | "bit" => {
            FieldType::Bytes
        }
        "date" => FieldType::Date,
        "time" => FieldType::Time,
        "datetime" => FieldType::Datetime,
        "timestamp" => FieldType::Timestamp,
        "json" => FieldType::Json,
        "" => bail!("Column type cannot be empty"),
        _ => bail!(
            "Unsupported MySQL column type '{}': no BigQuery equivalent is defined",
            source_type
        ),
    };

    Ok(field_type)
}

/// Pick NUMERIC or BIGNUMERIC from a `decimal(p,s)` declaration
fn map_decimal(normalized: &str) -> Result<FieldType> {
    // MySQL defaults: DECIMAL == DECIMAL(10,0), DECIMAL(p) == DECIMAL(p,0)
    let (precision, scale) = match normalized.split_once('(') {
        Some((_, rest)) => {
            let args = rest.split(')').next().unwrap_or_default();
            let mut parts = args.split(',').map(str::trim);
            let precision: u32 = parts
                .next()
                .unwrap_or_default()
                .parse()
                .with_context(|| format!("Invalid decimal precision in '{}'", normalized))?;
            let scale: u32 = match parts.next() {
                Some(s) => s
                    .parse()
                    .with_context(|| format!("Invalid decimal scale in '{}'", normalized))?,
                None => 0,
            };
            (precision, scale)
        }
        None => (10, 0),
    };

    if precision <= NUMERIC_MAX_PRECISION && scale <= NUMERIC_MAX_SCALE {
        Ok(FieldType::Numeric)
    } else {
        Ok(FieldType::BigNumeric)
    }
}

/// Translate an ordered column list into destination fields
///
/// Produces exactly one field per column, same names, same order. Fails on
/// the first column whose type has no mapping.
pub fn translate_schema(columns: &[ColumnDescriptor]) -> Result<Vec<DestinationField>> {
    tracing::debug!("Translating {} column(s) to BigQuery schema", columns.len());

    columns
        .iter()
        .map(|column| -> Result<DestinationField> {
            let field_type = map_mysql_type(&column.source_type)
                .with_context(|| format!("Cannot translate column '{}'", column.name))?;
            Ok(DestinationField::new(&column.name, field_type))
        })
        .collect()
}

/// Compare the translated schema against the live destination schema
///
/// Returns one human-readable line per difference. Differences never block
/// replication; the caller logs them.
pub fn schema_differences(expected: &[DestinationField], live: &[DestinationField]) -> Vec<String> {
    let mut differences = Vec::new();

    for field in expected {
        match live.iter().find(|f| f.name == field.name) {
            None => differences.push(format!(
                "column '{}' is missing from the destination table",
                field.name
            )),
            Some(existing) if existing.field_type != field.field_type => {
                differences.push(format!(
                    "column '{}' is {} in the destination but translates to {}",
                    field.name, existing.field_type, field.field_type
                ))
            }
            Some(_) => {}
        }
    }

    for field in live {
        if !expected.iter().any(|f| f.name == field.name) {
            differences.push(format!(
                "destination column '{}' has no source column",
                field.name
            ));
        }
    }

    differences
}
