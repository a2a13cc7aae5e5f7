//! Stream field to table column mapping

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::security::validate_identifier;
use crate::types::RowShape;

/// How a mapped field reaches the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnEncoding {
    /// Format the typed value according to the declared field type
    #[default]
    Typed,
    /// The pipeline supplies wire-ready bytes; pass them through untouched
    RawBytes,
}

/// One target column, in left-to-right protocol order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    /// Position of the source field in the incoming row
    pub source_field_index: usize,
    /// Column name in the target table
    pub target_column: String,
    /// Wire encoding of the field
    #[serde(default)]
    pub encoding: ColumnEncoding,
}

impl ColumnMapping {
    /// Map a source field to a column, formatting by declared type
    pub fn typed(source_field_index: usize, target_column: impl Into<String>) -> Self {
        Self {
            source_field_index,
            target_column: target_column.into(),
            encoding: ColumnEncoding::Typed,
        }
    }

    /// Map a source field whose bytes are already wire-formatted
    pub fn raw_bytes(source_field_index: usize, target_column: impl Into<String>) -> Self {
        Self {
            source_field_index,
            target_column: target_column.into(),
            encoding: ColumnEncoding::RawBytes,
        }
    }

    /// Whether this column bypasses type-specific formatting
    #[inline]
    pub fn is_pre_encoded(&self) -> bool {
        self.encoding == ColumnEncoding::RawBytes
    }

    /// One typed mapping per field of the shape, columns named after the fields
    pub fn identity(shape: &RowShape) -> Vec<Self> {
        shape
            .fields()
            .iter()
            .enumerate()
            .map(|(idx, field)| Self::typed(idx, field.name.clone()))
            .collect()
    }
}

/// Check a mapping list against the shape of the rows it will be applied to.
///
/// Reports every problem found instead of stopping at the first one. With
/// `quoted` set, column names only need to be printable and duplicates are
/// compared case-sensitively, as the server does for delimited identifiers.
pub fn validate_mappings(
    mappings: &[ColumnMapping],
    shape: &RowShape,
    quoted: bool,
) -> Result<()> {
    if mappings.is_empty() {
        return Err(Error::config("no column mappings configured"));
    }

    let mut problems = Vec::new();
    let mut seen = HashSet::new();

    for mapping in mappings {
        if mapping.source_field_index >= shape.len() {
            problems.push(format!(
                "column '{}' maps missing source field #{} (row has {} fields)",
                mapping.target_column,
                mapping.source_field_index,
                shape.len()
            ));
        }
        if let Err(e) = validate_identifier(&mapping.target_column, quoted) {
            problems.push(match e {
                Error::Configuration { message } => message,
                other => other.to_string(),
            });
        }
        let key = if quoted {
            mapping.target_column.clone()
        } else {
            mapping.target_column.to_ascii_lowercase()
        };
        if !seen.insert(key) {
            problems.push(format!(
                "column '{}' is mapped more than once",
                mapping.target_column
            ));
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(Error::config(problems.join("; ")))
    }
}
