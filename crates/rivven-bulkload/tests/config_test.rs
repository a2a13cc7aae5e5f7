//! Tests for rivven-bulkload configuration

use rivven_bulkload::config::PLATFORM_NEWLINE;
use rivven_bulkload::prelude::*;

// ==================== BulkLoadConfig Tests ====================

#[test]
fn test_config_from_json_defaults() {
    let config: BulkLoadConfig = serde_json::from_str(r#"{ "table": "events" }"#).unwrap();

    assert_eq!(config.table, "events");
    assert!(config.schema.is_none());
    assert_eq!(config.buffer_size, 100_000);
    assert_eq!(config.delimiter, "|");
    assert_eq!(config.quote_char, "\"");
    assert_eq!(config.newline, PLATFORM_NEWLINE);
    assert_eq!(config.encoding, "UTF-8");
    assert!(!config.auto_string_widths);
    assert!(config.column_mappings.is_empty());
    assert_eq!(config.schema_preparation, SchemaPreparation::None);
    assert_eq!(config.null_representation, "null");
    assert!(!config.fully_quote_sql);
    assert!(!config.compatibility_mode);
    assert!(config.row_limit.is_none());
    assert!(config.validate().is_ok());
}

#[test]
fn test_config_from_json_full() {
    let json = r#"{
        "schema": "sys",
        "table": "events",
        "buffer_size": 500,
        "delimiter": ";",
        "newline": "\n",
        "encoding": "ISO-8859-1",
        "schema_preparation": "drop_and_recreate",
        "column_mappings": [
            { "source_field_index": 0, "target_column": "id" },
            { "source_field_index": 2, "target_column": "payload", "encoding": "raw_bytes" }
        ],
        "compatibility_mode": true,
        "row_limit": 1000
    }"#;
    let config: BulkLoadConfig = serde_json::from_str(json).unwrap();

    assert_eq!(config.table_ref().qualified_name(false), "sys.events");
    assert_eq!(config.buffer_size, 500);
    assert_eq!(config.delimiter_byte().unwrap(), b';');
    assert_eq!(config.charset().unwrap(), Charset::Latin1);
    assert_eq!(config.schema_preparation, SchemaPreparation::DropAndRecreate);
    assert_eq!(config.column_mappings[0].encoding, ColumnEncoding::Typed);
    assert!(config.column_mappings[1].is_pre_encoded());
    assert_eq!(config.row_limit, Some(1000));
    assert!(config.validate().is_ok());
}

#[test]
fn test_config_rejects_bad_values() {
    let bad = [
        BulkLoadConfig::builder("events").buffer_size(0).build(),
        BulkLoadConfig::builder("events").delimiter("||").build(),
        BulkLoadConfig::builder("events").quote_char("|").build(),
        BulkLoadConfig::builder("events").newline("").build(),
        BulkLoadConfig::builder("events").encoding("EBCDIC").build(),
        BulkLoadConfig::builder("events; DROP TABLE x").build(),
        BulkLoadConfig::builder("events").schema("a b").build(),
    ];
    for config in bad {
        let err = config.validate().unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Configuration, "{:?}", config);
    }
}

#[test]
fn test_controller_validates_config() {
    use std::sync::Arc;

    let factory = Arc::new(TcpSessionFactory::new(SessionConfig::default()));
    let config = BulkLoadConfig::builder("events").buffer_size(0).build();

    let err = BulkLoadController::new(config, factory).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Configuration);
}

// ==================== SessionConfig Tests ====================

#[test]
fn test_session_config_defaults() {
    let config = SessionConfig::default();

    assert_eq!(config.address, "localhost:50000");
    assert_eq!(config.connect_timeout_ms, 10_000);
    assert!(config.read_timeout_ms.is_none());
    assert!(!config.expect_greeting);
}

#[test]
fn test_session_config_builder_and_json() {
    let config = SessionConfig::new("db:50001")
        .with_connect_timeout(2_000)
        .with_read_timeout(30_000)
        .with_greeting(true);

    let json = serde_json::to_string(&config).unwrap();
    let back: SessionConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(back, config);
    assert_eq!(back.read_timeout_ms, Some(30_000));
}
