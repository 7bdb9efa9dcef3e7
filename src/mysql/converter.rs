// ABOUTME: MySQL value to BigQuery insertAll JSON conversion
// ABOUTME: Encodes each cell according to the translated field type of its column

use crate::types::{DestinationField, FieldType, Row, Value};
use anyhow::{anyhow, bail, Context, Result};
use serde_json::Value as JsonValue;

/// Convert a MySQL Value to the JSON representation BigQuery expects for `field_type`
///
/// Encoding rules:
/// - NULL → JSON null
/// - Integers → JSON numbers (BOOLEAN columns → true/false)
/// - Floats/Doubles → JSON numbers, non-finite as "NaN" / "Infinity" / "-Infinity"
/// - Byte strings → base64 for BYTES columns, UTF-8 text otherwise
/// - Dates → `YYYY-MM-DD`, `YYYY-MM-DD HH:MM:SS[.ffffff]` depending on the column
/// - MySQL zero dates (`0000-00-00`) → JSON null
/// - Times → `HH:MM:SS[.ffffff]`; values outside one day are rejected
///
/// # Examples
///
/// ```
/// # use mysql_async::Value;
/// # use mysql_bigquery_replicator::mysql::converter::mysql_value_to_json;
/// # use mysql_bigquery_replicator::types::FieldType;
/// let json = mysql_value_to_json(&Value::Int(42), FieldType::Integer).unwrap();
/// assert_eq!(json, serde_json::json!(42));
/// ```
pub fn mysql_value_to_json(value: &Value, field_type: FieldType) -> Result<JsonValue> {
    match value {
        Value::NULL => Ok(JsonValue::Null),

        Value::Int(i) => match field_type {
            FieldType::Boolean => Ok(JsonValue::Bool(*i != 0)),
            FieldType::String => Ok(JsonValue::String(i.to_string())),
            _ => Ok(JsonValue::Number((*i).into())),
        },
        Value::UInt(u) => match field_type {
            FieldType::Boolean => Ok(JsonValue::Bool(*u != 0)),
            FieldType::String => Ok(JsonValue::String(u.to_string())),
            _ => Ok(JsonValue::Number((*u).into())),
        },

        Value::Float(f) => float_to_json(*f as f64),
        Value::Double(d) => float_to_json(*d),

        Value::Bytes(b) => bytes_to_json(b, field_type),

        Value::Date(year, month, day, hour, minute, second, micro) => {
            if *year == 0 && *month == 0 && *day == 0 {
                // MySQL zero date has no warehouse equivalent
                return Ok(JsonValue::Null);
            }

            let date = format!("{:04}-{:02}-{:02}", year, month, day);
            let formatted = match field_type {
                FieldType::Date => date,
                FieldType::Datetime | FieldType::Timestamp | FieldType::String => format!(
                    "{} {}",
                    date,
                    format_clock(*hour as u32, *minute, *second, *micro)
                ),
                other => bail!("Cannot store a MySQL date value in a {} column", other),
            };
            Ok(JsonValue::String(formatted))
        }

        Value::Time(is_negative, days, hours, minutes, seconds, microseconds) => {
            if *is_negative || *days > 0 {
                let sign = if *is_negative { "-" } else { "" };
                bail!(
                    "MySQL time value {}{}d {:02}:{:02}:{:02} is outside the TIME range",
                    sign,
                    days,
                    hours,
                    minutes,
                    seconds
                );
            }
            match field_type {
                FieldType::Time | FieldType::String => Ok(JsonValue::String(format_clock(
                    *hours as u32,
                    *minutes,
                    *seconds,
                    *microseconds,
                ))),
                other => bail!("Cannot store a MySQL time value in a {} column", other),
            }
        }
    }
}

fn float_to_json(value: f64) -> Result<JsonValue> {
    if value.is_finite() {
        serde_json::Number::from_f64(value)
            .map(JsonValue::Number)
            .ok_or_else(|| anyhow!("Failed to convert float {} to JSON number", value))
    } else if value.is_nan() {
        Ok(JsonValue::String("NaN".to_string()))
    } else if value.is_sign_positive() {
        Ok(JsonValue::String("Infinity".to_string()))
    } else {
        Ok(JsonValue::String("-Infinity".to_string()))
    }
}

/// Byte strings carry text, decimals, JSON documents and binary data alike
fn bytes_to_json(bytes: &[u8], field_type: FieldType) -> Result<JsonValue> {
    if field_type == FieldType::Bytes {
        let encoded = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, bytes);
        return Ok(JsonValue::String(encoded));
    }

    let text = std::str::from_utf8(bytes)
        .map_err(|_| anyhow!("Value for {} column is not valid UTF-8", field_type))?;

    match field_type {
        FieldType::Integer => {
            let parsed: i64 = text
                .trim()
                .parse()
                .with_context(|| format!("Invalid integer value '{}'", text))?;
            Ok(JsonValue::Number(parsed.into()))
        }
        FieldType::Float => {
            let parsed: f64 = text
                .trim()
                .parse()
                .with_context(|| format!("Invalid float value '{}'", text))?;
            float_to_json(parsed)
        }
        FieldType::Boolean => match text.trim() {
            "1" | "true" | "TRUE" => Ok(JsonValue::Bool(true)),
            "0" | "false" | "FALSE" => Ok(JsonValue::Bool(false)),
            other => bail!("Invalid boolean value '{}'", other),
        },
        // NUMERIC/BIGNUMERIC are sent as strings to keep full precision
        _ => Ok(JsonValue::String(text.to_string())),
    }
}

fn format_clock(hour: u32, minute: u8, second: u8, micro: u32) -> String {
    if micro == 0 {
        format!("{:02}:{:02}:{:02}", hour, minute, second)
    } else {
        format!("{:02}:{:02}:{:02}.{:06}", hour, minute, second, micro)
    }
}

/// Convert a row into a JSON object keyed by destination field name
///
/// `fields` must be positionally aligned with the row's values.
///
/// # Examples
///
/// ```
/// # use mysql_async::Value;
/// # use mysql_bigquery_replicator::mysql::converter::row_to_json;
/// # use mysql_bigquery_replicator::types::{DestinationField, FieldType, Row};
/// let fields = vec![
///     DestinationField::new("id", FieldType::Integer),
///     DestinationField::new("name", FieldType::String),
/// ];
/// let row = Row::new(vec![Value::Int(1), Value::Bytes(b"Alice".to_vec())]);
/// let json = row_to_json(&row, &fields).unwrap();
/// assert_eq!(json["name"], "Alice");
/// ```
pub fn row_to_json(row: &Row, fields: &[DestinationField]) -> Result<JsonValue> {
    if row.len() != fields.len() {
        bail!(
            "Row has {} values but the table has {} columns",
            row.len(),
            fields.len()
        );
    }

    let mut obj = serde_json::Map::with_capacity(fields.len());

    for (value, field) in row.values.iter().zip(fields) {
        let json_val = mysql_value_to_json(value, field.field_type)
            .with_context(|| format!("Failed to convert column '{}'", field.name))?;
        obj.insert(field.name.clone(), json_val);
    }

    Ok(JsonValue::Object(obj))
}

/// Best-effort JSON rendering of a row that failed conversion, for diagnostics
pub fn row_to_debug_json(row: &Row, fields: &[DestinationField]) -> JsonValue {
    let mut obj = serde_json::Map::with_capacity(row.len());

    for (idx, value) in row.values.iter().enumerate() {
        let name = fields
            .get(idx)
            .map_or_else(|| format!("column_{}", idx), |f| f.name.clone());
        let rendered = match value {
            Value::NULL => JsonValue::Null,
            Value::Bytes(b) => JsonValue::String(String::from_utf8_lossy(b).into_owned()),
            other => JsonValue::String(format!("{:?}", other)),
        };
        obj.insert(name, rendered);
    }

    JsonValue::Object(obj)
}
