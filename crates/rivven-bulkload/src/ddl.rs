//! DDL generation for schema preparation
//!
//! The controller decides *when* to drop, create or truncate; a
//! `DdlGenerator` decides *what* the statements look like. Plug a custom
//! generator to match an existing DDL toolchain.

use crate::error::{Error, Result};
use crate::security::{quote_identifier, validate_identifier};
use crate::types::{FieldMeta, FieldType, RowShape, TableRef};

/// MonetDB's maximum DECIMAL precision
const MAX_DECIMAL_PRECISION: u32 = 38;

/// Statement generation for table preparation
pub trait DdlGenerator: Send + Sync {
    /// `CREATE TABLE` for a shape whose field names are the target columns
    fn create_table_sql(&self, shape: &RowShape, table: &TableRef) -> Result<String>;

    /// `DROP TABLE` for the target
    fn drop_table_sql(&self, table: &TableRef) -> String;

    /// Statement removing all rows of the target
    fn truncate_table_sql(&self, table: &TableRef) -> String;
}

/// Default MonetDB DDL
#[derive(Debug, Clone, Default)]
pub struct MonetDdlGenerator {
    quote_identifiers: bool,
}

impl MonetDdlGenerator {
    /// Create a generator
    pub fn new(quote_identifiers: bool) -> Self {
        Self { quote_identifiers }
    }

    /// Column type for a field
    pub fn native_type(&self, field: &FieldMeta) -> String {
        match field.field_type {
            FieldType::Text => match field.width {
                Some(w) if w > 0 => format!("VARCHAR({})", w),
                _ => "CLOB".to_string(),
            },
            FieldType::Integer => match field.width {
                Some(w) if w <= 4 => "SMALLINT".to_string(),
                Some(w) if w <= 9 => "INT".to_string(),
                _ => "BIGINT".to_string(),
            },
            FieldType::Float => "DOUBLE".to_string(),
            FieldType::DateTime => "TIMESTAMP".to_string(),
            FieldType::Boolean => "BOOLEAN".to_string(),
            FieldType::Decimal => match (field.width, field.precision) {
                (Some(w), p) if w > 0 && w <= MAX_DECIMAL_PRECISION => {
                    format!("DECIMAL({},{})", w, p.unwrap_or(0).min(w))
                }
                (Some(_), _) => "DOUBLE".to_string(),
                (None, _) => "DECIMAL(18,3)".to_string(),
            },
        }
    }
}

impl DdlGenerator for MonetDdlGenerator {
    fn create_table_sql(&self, shape: &RowShape, table: &TableRef) -> Result<String> {
        if shape.is_empty() {
            return Err(Error::schema(format!(
                "cannot create {} without columns",
                table
            )));
        }
        let mut columns = Vec::with_capacity(shape.len());
        for field in shape.fields() {
            validate_identifier(&field.name, self.quote_identifiers)?;
            columns.push(format!(
                "{} {}",
                quote_identifier(&field.name, self.quote_identifiers),
                self.native_type(field)
            ));
        }
        Ok(format!(
            "CREATE TABLE {} ({})",
            table.qualified_name(self.quote_identifiers),
            columns.join(", ")
        ))
    }

    fn drop_table_sql(&self, table: &TableRef) -> String {
        format!("DROP TABLE {}", table.qualified_name(self.quote_identifiers))
    }

    fn truncate_table_sql(&self, table: &TableRef) -> String {
        format!("TRUNCATE TABLE {}", table.qualified_name(self.quote_identifiers))
    }
}
