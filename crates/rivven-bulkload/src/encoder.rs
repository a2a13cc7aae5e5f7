//! Row encoding for `COPY INTO ... FROM STDIN`
//!
//! Turns one pipeline row into one wire line: per-type formatting, quoting
//! and escaping of text, delimiter-joined, newline-terminated.
//!
//! | Declared type | Wire form |
//! |---|---|
//! | text | `"..."`, `\` doubled, quote escaped as `\"` |
//! | integer | decimal digits |
//! | float | shortest round-trip decimal form |
//! | datetime | `yyyy/MM/dd HH:mm:ss` |
//! | boolean | `Y` / `N` |
//! | decimal | decimal string, no exponent |
//!
//! Absent values always render as the null token, never as an empty or
//! quoted empty string.

use bytes::Bytes;
use std::fmt;

use crate::config::{BulkLoadConfig, Charset};
use crate::error::{Error, Result};
use crate::mapping::{ColumnEncoding, ColumnMapping};
use crate::types::{FieldMeta, FieldType, Row, RowShape, Value};

/// chrono pattern for `yyyy/MM/dd HH:mm:ss`
pub const DATE_TIME_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// One fully escaped, delimiter-joined, newline-terminated row
#[derive(Clone, PartialEq, Eq)]
pub struct EncodedLine(Bytes);

impl EncodedLine {
    /// Wrap bytes that are already a complete line
    pub fn from_static(bytes: &'static [u8]) -> Self {
        Self(Bytes::from_static(bytes))
    }

    /// Line bytes, terminator included
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Length in bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the line has no bytes
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consume into the underlying buffer
    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl fmt::Debug for EncodedLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncodedLine({:?})", String::from_utf8_lossy(&self.0))
    }
}

/// Formatting options shared by every row of a load
#[derive(Debug, Clone)]
pub struct EncoderOptions {
    /// Field delimiter
    pub delimiter: u8,
    /// Text enclosure
    pub quote: u8,
    /// Record terminator
    pub newline: Vec<u8>,
    /// Token for absent values
    pub null_token: Vec<u8>,
    /// Charset for text values
    pub charset: Charset,
    /// Truncate text to declared widths
    pub auto_string_widths: bool,
}

impl Default for EncoderOptions {
    fn default() -> Self {
        Self {
            delimiter: b'|',
            quote: b'"',
            newline: b"\n".to_vec(),
            null_token: b"null".to_vec(),
            charset: Charset::Utf8,
            auto_string_widths: false,
        }
    }
}

impl EncoderOptions {
    /// Options from a validated load configuration
    pub fn from_config(config: &BulkLoadConfig) -> Result<Self> {
        Ok(Self {
            delimiter: config.delimiter_byte()?,
            quote: config.quote_byte()?,
            newline: config.newline.as_bytes().to_vec(),
            null_token: config.null_representation.as_bytes().to_vec(),
            charset: config.charset()?,
            auto_string_widths: config.auto_string_widths,
        })
    }
}

/// Encodes rows of one shape into wire lines
#[derive(Debug, Clone)]
pub struct RowEncoder {
    options: EncoderOptions,
    shape: RowShape,
}

impl RowEncoder {
    /// Create an encoder for rows of the given shape
    pub fn new(options: EncoderOptions, shape: RowShape) -> Self {
        Self { options, shape }
    }

    /// Encoder options
    pub fn options(&self) -> &EncoderOptions {
        &self.options
    }

    /// Encode one row according to the column mappings
    pub fn encode(&self, mappings: &[ColumnMapping], row: &Row) -> Result<EncodedLine> {
        let mut out = Vec::with_capacity(16 * mappings.len() + self.options.newline.len());

        for (pos, mapping) in mappings.iter().enumerate() {
            if pos > 0 {
                out.push(self.options.delimiter);
            }

            let idx = mapping.source_field_index;
            let field = self.shape.field(idx).ok_or_else(|| {
                Error::encoding(
                    &mapping.target_column,
                    format!("source field #{} is not part of the row shape", idx),
                )
            })?;
            let value = row.get(idx).ok_or_else(|| {
                Error::encoding(
                    &mapping.target_column,
                    format!("row has {} values, source field #{} missing", row.len(), idx),
                )
            })?;

            self.encode_field(mapping, field, value, &mut out)?;
        }

        out.extend_from_slice(&self.options.newline);
        Ok(EncodedLine(Bytes::from(out)))
    }

    fn encode_field(
        &self,
        mapping: &ColumnMapping,
        field: &FieldMeta,
        value: &Value,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        if value.is_null() {
            out.extend_from_slice(&self.options.null_token);
            return Ok(());
        }

        let column = mapping.target_column.as_str();
        match (field.field_type, mapping.encoding, value) {
            // Text is always enclosed, pre-encoded or not.
            (FieldType::Text, _, Value::Bytes(raw)) => {
                self.write_quoted(raw, out);
                Ok(())
            }
            (FieldType::Text, ColumnEncoding::Typed, v) => self.write_text(column, field, v, out),
            (FieldType::Boolean, ColumnEncoding::RawBytes, v) => Err(Error::encoding(
                column,
                format!("boolean columns cannot be pre-encoded (got {})", v.kind()),
            )),
            (_, ColumnEncoding::RawBytes, Value::Bytes(raw)) => {
                out.extend_from_slice(raw);
                Ok(())
            }
            (_, ColumnEncoding::RawBytes, v) => Err(Error::encoding(
                column,
                format!("expected pre-encoded bytes, got {}", v.kind()),
            )),
            (ty, ColumnEncoding::Typed, Value::Bytes(_)) => Err(Error::encoding(
                column,
                format!("unexpected pre-encoded bytes for {} column", ty),
            )),
            (FieldType::Integer, ColumnEncoding::Typed, v) => {
                let n = integer_of(v).ok_or_else(|| mismatch(column, field, v))?;
                out.extend_from_slice(n.to_string().as_bytes());
                Ok(())
            }
            (FieldType::Float, ColumnEncoding::Typed, v) => {
                // f32 is formatted from its own value, never widened
                let (text, finite) = match v {
                    Value::Float32(n) => (n.to_string(), n.is_finite()),
                    _ => {
                        let n = float_of(v).ok_or_else(|| mismatch(column, field, v))?;
                        (n.to_string(), n.is_finite())
                    }
                };
                if !finite {
                    return Err(Error::encoding(column, format!("non-finite number {}", text)));
                }
                out.extend_from_slice(text.as_bytes());
                Ok(())
            }
            (FieldType::DateTime, ColumnEncoding::Typed, v) => {
                let ts = match v {
                    Value::DateTime(dt) => *dt,
                    Value::Date(d) => d.and_hms_opt(0, 0, 0).ok_or_else(|| mismatch(column, field, v))?,
                    _ => return Err(mismatch(column, field, v)),
                };
                out.extend_from_slice(ts.format(DATE_TIME_FORMAT).to_string().as_bytes());
                Ok(())
            }
            (FieldType::Boolean, ColumnEncoding::Typed, Value::Bool(b)) => {
                out.push(if *b { b'Y' } else { b'N' });
                Ok(())
            }
            (FieldType::Boolean, ColumnEncoding::Typed, v) => Err(mismatch(column, field, v)),
            (FieldType::Decimal, ColumnEncoding::Typed, v) => {
                let text = match v {
                    Value::Decimal(d) => d.to_string(),
                    Value::Int32(n) => n.to_string(),
                    Value::Int64(n) => n.to_string(),
                    Value::String(s) if s.parse::<rust_decimal::Decimal>().is_ok() => s.clone(),
                    _ => return Err(mismatch(column, field, v)),
                };
                out.extend_from_slice(text.as_bytes());
                Ok(())
            }
        }
    }

    fn write_text(
        &self,
        column: &str,
        field: &FieldMeta,
        value: &Value,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        let text = match value {
            Value::String(s) => std::borrow::Cow::Borrowed(s.as_str()),
            Value::Bool(b) => std::borrow::Cow::Borrowed(if *b { "Y" } else { "N" }),
            Value::Int32(n) => n.to_string().into(),
            Value::Int64(n) => n.to_string().into(),
            Value::Float32(n) => n.to_string().into(),
            Value::Float64(n) => n.to_string().into(),
            Value::Decimal(d) => d.to_string().into(),
            Value::Date(d) => d
                .and_hms_opt(0, 0, 0)
                .map(|ts| ts.format(DATE_TIME_FORMAT).to_string())
                .ok_or_else(|| mismatch(column, field, value))?
                .into(),
            Value::DateTime(dt) => dt.format(DATE_TIME_FORMAT).to_string().into(),
            Value::Null | Value::Bytes(_) => return Err(mismatch(column, field, value)),
        };

        let text = match field.width {
            Some(width) if self.options.auto_string_widths => truncate_chars(&*text, width as usize),
            _ => &*text,
        };

        let mut encoded = Vec::with_capacity(text.len());
        self.options
            .charset
            .encode_into(text, &mut encoded)
            .map_err(|c| {
                Error::encoding(
                    column,
                    format!("character {:?} not representable in {:?}", c, self.options.charset),
                )
            })?;
        self.write_quoted(&encoded, out);
        Ok(())
    }

    fn write_quoted(&self, raw: &[u8], out: &mut Vec<u8>) {
        let quote = self.options.quote;
        out.reserve(raw.len() + 2);
        out.push(quote);
        for &b in raw {
            if b == b'\\' || b == quote {
                out.push(b'\\');
            }
            out.push(b);
        }
        out.push(quote);
    }
}

fn truncate_chars(text: &str, width: usize) -> &str {
    match text.char_indices().nth(width) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

fn integer_of(value: &Value) -> Option<i64> {
    match value {
        Value::Int32(n) => Some(i64::from(*n)),
        Value::Int64(n) => Some(*n),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn float_of(value: &Value) -> Option<f64> {
    match value {
        Value::Float64(n) => Some(*n),
        Value::Int32(n) => Some(f64::from(*n)),
        Value::Int64(n) => Some(*n as f64),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn mismatch(column: &str, field: &FieldMeta, value: &Value) -> Error {
    Error::encoding(
        column,
        format!(
            "cannot convert {} value to declared {} type of field '{}'",
            value.kind(),
            field.field_type,
            field.name
        ),
    )
}
