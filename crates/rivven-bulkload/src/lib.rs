//! # rivven-bulkload
//!
//! Buffered bulk loading of typed rows into MonetDB column-store tables for
//! the Rivven event streaming platform.
//!
//! Rows are encoded into delimiter-separated lines, collected in a
//! fixed-capacity buffer and shipped as `COPY <n> RECORDS INTO ... FROM STDIN`
//! batches over the MAPI line protocol. A batch only counts as written once
//! the server has acknowledged it three times.
//!
//! ## Features
//!
//! - **Row Encoding**: per-type rendering with exact quoting and escaping rules
//! - **Batched Transfer**: one `COPY` statement per buffer drain
//! - **Schema Preparation**: drop/create or truncate before loading
//! - **Row Limits**: controlled stop after a fixed number of rows
//! - **Guaranteed Release**: the session is closed on every exit path
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rivven_bulkload::prelude::*;
//! use std::sync::Arc;
//!
//! let factory = Arc::new(TcpSessionFactory::new(
//!     SessionConfig::from_url("monetdb://localhost:50000/demo")?,
//! ));
//!
//! let config = BulkLoadConfig::builder("events")
//!     .schema("sys")
//!     .buffer_size(50_000)
//!     .schema_preparation(SchemaPreparation::Truncate)
//!     .build();
//!
//! let mut loader = BulkLoadController::new(config, factory)?;
//! let report = loader.run(&mut source).await;
//! println!("{} rows written", report.rows_written());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod buffer;
pub mod config;
pub mod ddl;
pub mod encoder;
pub mod error;
pub mod loader;
pub mod mapping;
pub mod security;
pub mod session;
pub mod types;

/// Prelude module for convenient imports
pub mod prelude {
    // Error types
    pub use crate::error::{Error, ErrorCategory, Result};

    // Value and type system
    pub use crate::types::{FieldMeta, FieldType, Row, RowShape, TableRef, Value};

    // Column mapping
    pub use crate::mapping::{validate_mappings, ColumnEncoding, ColumnMapping};

    // Configuration
    pub use crate::config::{BulkLoadConfig, BulkLoadConfigBuilder, Charset, SchemaPreparation};

    // Encoding and buffering
    pub use crate::buffer::RowBuffer;
    pub use crate::encoder::{EncodedLine, EncoderOptions, RowEncoder};

    // Wire session
    pub use crate::session::{
        MapiSession, Response, Session, SessionConfig, SessionFactory, SessionState,
        TcpSessionFactory,
    };

    // DDL
    pub use crate::ddl::{DdlGenerator, MonetDdlGenerator};

    // Controller
    pub use crate::loader::{
        BulkLoadController, LoadOutcome, LoadReport, LoadState, LoadStatistics, LoadStep,
        RowSource, VecRowSource,
    };
}

// Re-export commonly used items at crate root
pub use error::{Error, Result};
pub use loader::{BulkLoadController, LoadReport};
pub use types::Value;
