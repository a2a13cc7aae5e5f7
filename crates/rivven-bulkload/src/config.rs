//! Bulk load configuration
//!
//! # Example
//!
//! ```yaml
//! schema: sys
//! table: events
//! buffer_size: 50000
//! delimiter: "|"
//! quote_char: "\""
//! schema_preparation: truncate
//! column_mappings:
//!   - { source_field_index: 0, target_column: id }
//!   - { source_field_index: 3, target_column: payload, encoding: raw_bytes }
//! ```

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::mapping::ColumnMapping;
use crate::security::validate_identifier;
use crate::types::TableRef;

/// Line separator of the platform the loader runs on
#[cfg(windows)]
pub const PLATFORM_NEWLINE: &str = "\r\n";
/// Line separator of the platform the loader runs on
#[cfg(not(windows))]
pub const PLATFORM_NEWLINE: &str = "\n";

/// Table preparation performed before the first row is streamed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaPreparation {
    /// Load into the table as it is
    #[default]
    None,
    /// Remove existing rows first
    Truncate,
    /// Drop the table and create it from the row shape
    DropAndRecreate,
}

/// Character set used to turn text values into bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Charset {
    /// UTF-8
    #[default]
    Utf8,
    /// ISO-8859-1, one byte per code point up to U+00FF
    Latin1,
    /// 7-bit ASCII
    Ascii,
}

impl Charset {
    /// Encode `text` into `out`, returning the first unrepresentable character
    pub fn encode_into(self, text: &str, out: &mut Vec<u8>) -> std::result::Result<(), char> {
        match self {
            Self::Utf8 => {
                out.extend_from_slice(text.as_bytes());
                Ok(())
            }
            Self::Latin1 => {
                for c in text.chars() {
                    let cp = u32::from(c);
                    if cp > 0xFF {
                        return Err(c);
                    }
                    out.push(cp as u8);
                }
                Ok(())
            }
            Self::Ascii => {
                for c in text.chars() {
                    if !c.is_ascii() {
                        return Err(c);
                    }
                    out.push(c as u8);
                }
                Ok(())
            }
        }
    }
}

impl FromStr for Charset {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().replace('_', "-").as_str() {
            "" | "UTF-8" | "UTF8" => Ok(Self::Utf8),
            "ISO-8859-1" | "ISO8859-1" | "LATIN1" | "LATIN-1" => Ok(Self::Latin1),
            "US-ASCII" | "ASCII" => Ok(Self::Ascii),
            other => Err(Error::config(format!("unsupported encoding '{}'", other))),
        }
    }
}

/// Configuration of one bulk load
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkLoadConfig {
    /// Target schema name
    #[serde(default)]
    pub schema: Option<String>,

    /// Target table name
    pub table: String,

    /// Row buffer capacity, also the maximum rows per COPY batch
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Field delimiter (single byte)
    #[serde(default = "default_delimiter")]
    pub delimiter: String,

    /// Text enclosure (single byte)
    #[serde(default = "default_quote_char")]
    pub quote_char: String,

    /// Record terminator
    #[serde(default = "default_newline")]
    pub newline: String,

    /// Character encoding for text values
    #[serde(default = "default_encoding")]
    pub encoding: String,

    /// Truncate text to the declared field width before quoting
    #[serde(default)]
    pub auto_string_widths: bool,

    /// Columns in protocol order
    #[serde(default)]
    pub column_mappings: Vec<ColumnMapping>,

    /// Table preparation before loading
    #[serde(default)]
    pub schema_preparation: SchemaPreparation,

    /// Token written for absent values
    #[serde(default = "default_null_representation")]
    pub null_representation: String,

    /// Double-quote schema, table and column names in generated SQL.
    ///
    /// Quoted names may hold any printable character; reserved words are
    /// quoted either way.
    #[serde(default)]
    pub fully_quote_sql: bool,

    /// Declare the null token in the COPY statement (`NULL AS '...'`),
    /// needed by servers from Jan2014-SP2 on when the token is not `null`
    #[serde(default)]
    pub compatibility_mode: bool,

    /// Stop consuming rows once this many have been accepted
    #[serde(default)]
    pub row_limit: Option<u64>,
}

fn default_buffer_size() -> usize {
    100_000
}

fn default_delimiter() -> String {
    "|".to_string()
}

fn default_quote_char() -> String {
    "\"".to_string()
}

fn default_newline() -> String {
    PLATFORM_NEWLINE.to_string()
}

fn default_encoding() -> String {
    "UTF-8".to_string()
}

fn default_null_representation() -> String {
    "null".to_string()
}

impl Default for BulkLoadConfig {
    fn default() -> Self {
        Self {
            schema: None,
            table: String::new(),
            buffer_size: default_buffer_size(),
            delimiter: default_delimiter(),
            quote_char: default_quote_char(),
            newline: default_newline(),
            encoding: default_encoding(),
            auto_string_widths: false,
            column_mappings: Vec::new(),
            schema_preparation: SchemaPreparation::None,
            null_representation: default_null_representation(),
            fully_quote_sql: false,
            compatibility_mode: false,
            row_limit: None,
        }
    }
}

impl BulkLoadConfig {
    /// Configuration for a table with all defaults
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Default::default()
        }
    }

    /// Builder for a table
    pub fn builder(table: impl Into<String>) -> BulkLoadConfigBuilder {
        BulkLoadConfigBuilder::new(table)
    }

    /// Validate settings that do not depend on the row shape
    pub fn validate(&self) -> Result<()> {
        validate_identifier(&self.table, self.fully_quote_sql)?;
        if let Some(schema) = self.schema.as_deref().filter(|s| !s.is_empty()) {
            validate_identifier(schema, self.fully_quote_sql)?;
        }
        if self.buffer_size == 0 {
            return Err(Error::config("buffer_size must be at least 1"));
        }
        let delimiter = single_byte("delimiter", &self.delimiter)?;
        let quote = single_byte("quote_char", &self.quote_char)?;
        if delimiter == quote {
            return Err(Error::config("delimiter and quote_char must differ"));
        }
        if self.newline.is_empty() {
            return Err(Error::config("newline cannot be empty"));
        }
        if self.newline.as_bytes().contains(&delimiter) {
            return Err(Error::config("newline cannot contain the delimiter"));
        }
        self.charset()?;
        Ok(())
    }

    /// Field delimiter byte
    pub fn delimiter_byte(&self) -> Result<u8> {
        single_byte("delimiter", &self.delimiter)
    }

    /// Quote byte
    pub fn quote_byte(&self) -> Result<u8> {
        single_byte("quote_char", &self.quote_char)
    }

    /// Parsed text encoding
    pub fn charset(&self) -> Result<Charset> {
        self.encoding.parse()
    }

    /// Target table reference
    pub fn table_ref(&self) -> TableRef {
        TableRef {
            schema: self.schema.clone().filter(|s| !s.is_empty()),
            name: self.table.clone(),
        }
    }
}

fn single_byte(name: &str, value: &str) -> Result<u8> {
    match value.as_bytes() {
        [b] => Ok(*b),
        _ => Err(Error::config(format!(
            "{} must be exactly one byte, got {:?}",
            name, value
        ))),
    }
}

/// Builder for bulk load configuration
pub struct BulkLoadConfigBuilder {
    config: BulkLoadConfig,
}

impl BulkLoadConfigBuilder {
    /// Create a new builder for the given table
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            config: BulkLoadConfig::new(table),
        }
    }

    /// Set target schema
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.config.schema = Some(schema.into());
        self
    }

    /// Set buffer size
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.config.buffer_size = size;
        self
    }

    /// Set field delimiter
    pub fn delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.config.delimiter = delimiter.into();
        self
    }

    /// Set quote character
    pub fn quote_char(mut self, quote: impl Into<String>) -> Self {
        self.config.quote_char = quote.into();
        self
    }

    /// Set record terminator
    pub fn newline(mut self, newline: impl Into<String>) -> Self {
        self.config.newline = newline.into();
        self
    }

    /// Set text encoding
    pub fn encoding(mut self, encoding: impl Into<String>) -> Self {
        self.config.encoding = encoding.into();
        self
    }

    /// Enable/disable truncation to declared widths
    pub fn auto_string_widths(mut self, enabled: bool) -> Self {
        self.config.auto_string_widths = enabled;
        self
    }

    /// Set column mappings
    pub fn column_mappings(mut self, mappings: Vec<ColumnMapping>) -> Self {
        self.config.column_mappings = mappings;
        self
    }

    /// Set schema preparation mode
    pub fn schema_preparation(mut self, mode: SchemaPreparation) -> Self {
        self.config.schema_preparation = mode;
        self
    }

    /// Set null token
    pub fn null_representation(mut self, token: impl Into<String>) -> Self {
        self.config.null_representation = token.into();
        self
    }

    /// Enable/disable identifier quoting
    pub fn fully_quote_sql(mut self, enabled: bool) -> Self {
        self.config.fully_quote_sql = enabled;
        self
    }

    /// Enable/disable `NULL AS` in COPY statements
    pub fn compatibility_mode(mut self, enabled: bool) -> Self {
        self.config.compatibility_mode = enabled;
        self
    }

    /// Set row limit
    pub fn row_limit(mut self, limit: u64) -> Self {
        self.config.row_limit = Some(limit);
        self
    }

    /// Build the configuration
    pub fn build(self) -> BulkLoadConfig {
        self.config
    }
}
