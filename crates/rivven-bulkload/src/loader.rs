//! Bulk load controller
//!
//! Orchestrates one load into one table:
//! - `prepare`: open the session, drop/create or truncate the target
//! - `load_row`: encode and buffer, flushing when the buffer is full
//! - `flush`: one `COPY <n> RECORDS` batch with triple acknowledgement
//! - `finish`: flush the remainder and always release the session
//!
//! Everything runs in caller order on one task; there is no pipelining.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::buffer::RowBuffer;
use crate::config::{BulkLoadConfig, SchemaPreparation};
use crate::ddl::{DdlGenerator, MonetDdlGenerator};
use crate::encoder::{EncodedLine, EncoderOptions, RowEncoder};
use crate::error::{Error, Result};
use crate::mapping::{validate_mappings, ColumnMapping};
use crate::security::escape_copy_literal;
use crate::session::{Session, SessionFactory};
use crate::types::{Row, RowShape, TableRef};

/// Controller lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    /// Constructed, not prepared
    Idle,
    /// Opening the session and preparing the table
    Preparing,
    /// Accepting rows
    Loading,
    /// Flushing the remainder and closing
    Finishing,
    /// Finished without error
    Closed,
    /// Stopped by an unrecoverable error
    Aborted,
    /// Row limit reached; no further rows are consumed
    StoppedByLimit,
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Preparing => write!(f, "preparing"),
            Self::Loading => write!(f, "loading"),
            Self::Finishing => write!(f, "finishing"),
            Self::Closed => write!(f, "closed"),
            Self::Aborted => write!(f, "aborted"),
            Self::StoppedByLimit => write!(f, "stopped by row limit"),
        }
    }
}

/// Load counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadStatistics {
    /// Rows acknowledged by the remote; only advanced after a full acknowledgement
    pub rows_written: u64,
    /// Acknowledged batches
    pub batches_written: u64,
    /// Rows buffered and not yet flushed
    pub rows_pending: u64,
    /// Rows in failed or discarded batches
    pub rows_lost: u64,
    /// Time spent in successful flushes (milliseconds)
    pub flush_time_ms: u64,
}

/// Result of offering one row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStep {
    /// Row accepted
    Continue,
    /// Row limit reached; the row was not consumed
    RowLimitReached,
}

/// How a load ended
#[derive(Debug, Clone)]
pub enum LoadOutcome {
    /// All offered rows were written
    Completed,
    /// Controlled stop at the row limit
    StoppedByLimit,
    /// The load failed
    Failed(Error),
}

impl LoadOutcome {
    /// Whether the load failed
    #[inline]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// The failure, if any
    pub fn error(&self) -> Option<&Error> {
        match self {
            Self::Failed(err) => Some(err),
            _ => None,
        }
    }
}

/// Final result of a load
#[derive(Debug, Clone)]
pub struct LoadReport {
    /// How the load ended
    pub outcome: LoadOutcome,
    /// Counters at the end of the load
    pub stats: LoadStatistics,
}

impl LoadReport {
    /// Rows acknowledged by the remote
    #[inline]
    pub fn rows_written(&self) -> u64 {
        self.stats.rows_written
    }

    /// Whether the load ended without error (including a row-limit stop)
    #[inline]
    pub fn is_success(&self) -> bool {
        !self.outcome.is_failed()
    }
}

/// Upstream supplier of rows
#[async_trait]
pub trait RowSource: Send {
    /// Shape of every row this source yields
    fn shape(&self) -> &RowShape;

    /// Next row, or `None` at end of stream
    async fn next_row(&mut self) -> Result<Option<Row>>;
}

/// Row source over an in-memory list
#[derive(Debug)]
pub struct VecRowSource {
    shape: RowShape,
    rows: std::vec::IntoIter<Row>,
}

impl VecRowSource {
    /// Create a source yielding `rows` in order
    pub fn new(shape: RowShape, rows: Vec<Row>) -> Self {
        Self {
            shape,
            rows: rows.into_iter(),
        }
    }
}

#[async_trait]
impl RowSource for VecRowSource {
    fn shape(&self) -> &RowShape {
        &self.shape
    }

    async fn next_row(&mut self) -> Result<Option<Row>> {
        Ok(self.rows.next())
    }
}

/// Drives a bulk load into one table
pub struct BulkLoadController {
    config: BulkLoadConfig,
    table: TableRef,
    factory: Arc<dyn SessionFactory>,
    ddl: Arc<dyn DdlGenerator>,
    session: Option<Box<dyn Session>>,
    encoder: Option<RowEncoder>,
    mappings: Vec<ColumnMapping>,
    buffer: RowBuffer,
    state: LoadState,
    stats: LoadStatistics,
    rows_accepted: u64,
    failure: Option<Error>,
    report: Option<LoadReport>,
}

impl fmt::Debug for BulkLoadController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BulkLoadController")
            .field("table", &self.table)
            .field("state", &self.state)
            .field("stats", &self.stats)
            .field("session_open", &self.session.is_some())
            .finish()
    }
}

impl BulkLoadController {
    /// Create a controller; the configuration is validated here
    pub fn new(config: BulkLoadConfig, factory: Arc<dyn SessionFactory>) -> Result<Self> {
        config.validate()?;
        let buffer = RowBuffer::new(config.buffer_size)?;
        let ddl: Arc<dyn DdlGenerator> = Arc::new(MonetDdlGenerator::new(config.fully_quote_sql));

        Ok(Self {
            table: config.table_ref(),
            config,
            factory,
            ddl,
            session: None,
            encoder: None,
            mappings: Vec::new(),
            buffer,
            state: LoadState::Idle,
            stats: LoadStatistics::default(),
            rows_accepted: 0,
            failure: None,
            report: None,
        })
    }

    /// Replace the DDL generator used by `DropAndRecreate`
    pub fn with_ddl_generator(mut self, ddl: Arc<dyn DdlGenerator>) -> Self {
        self.ddl = ddl;
        self
    }

    /// Current state
    #[inline]
    pub fn state(&self) -> LoadState {
        self.state
    }

    /// Current counters
    #[inline]
    pub fn stats(&self) -> LoadStatistics {
        self.stats
    }

    /// Load configuration
    #[inline]
    pub fn config(&self) -> &BulkLoadConfig {
        &self.config
    }

    /// Target table
    #[inline]
    pub fn table(&self) -> &TableRef {
        &self.table
    }

    /// Open the session and prepare the target table.
    ///
    /// On any failure the session is closed before returning and the
    /// controller is aborted.
    pub async fn prepare(&mut self, shape: RowShape) -> Result<()> {
        if self.state != LoadState::Idle {
            return Err(Error::internal(format!(
                "prepare called while {}",
                self.state
            )));
        }
        self.state = LoadState::Preparing;

        match self.prepare_target(shape).await {
            Ok(()) => {
                self.state = LoadState::Loading;
                info!(
                    table = %self.table,
                    columns = self.mappings.len(),
                    buffer_size = self.buffer.capacity(),
                    preparation = ?self.config.schema_preparation,
                    "bulk load prepared"
                );
                Ok(())
            }
            Err(err) => {
                self.abort(err.clone()).await;
                Err(err)
            }
        }
    }

    async fn prepare_target(&mut self, shape: RowShape) -> Result<()> {
        let mappings = if self.config.column_mappings.is_empty() {
            ColumnMapping::identity(&shape)
        } else {
            self.config.column_mappings.clone()
        };
        validate_mappings(&mappings, &shape, self.config.fully_quote_sql)?;

        let target_shape = target_shape(&shape, &mappings);
        let options = EncoderOptions::from_config(&self.config)?;
        self.encoder = Some(RowEncoder::new(options, shape));
        self.mappings = mappings;

        let mut session = self.factory.open().await?;
        let result = self.prepare_table(session.as_mut(), &target_shape).await;
        self.session = Some(session);
        result
    }

    async fn prepare_table(&self, session: &mut dyn Session, shape: &RowShape) -> Result<()> {
        match self.config.schema_preparation {
            SchemaPreparation::None => Ok(()),
            SchemaPreparation::Truncate => {
                let sql = self.ddl.truncate_table_sql(&self.table);
                debug!(table = %self.table, sql = %sql, "truncating target");
                session
                    .execute(&sql)
                    .await
                    .map_err(|e| Error::schema_rejected(sql, e))?;
                Ok(())
            }
            SchemaPreparation::DropAndRecreate => {
                let drop_sql = self.ddl.drop_table_sql(&self.table);
                match session.execute(&drop_sql).await {
                    Ok(_) => debug!(table = %self.table, "dropped target"),
                    // Usually the table does not exist yet.
                    Err(err @ Error::Protocol { .. }) => {
                        warn!(table = %self.table, error = %err, "drop failed, continuing")
                    }
                    Err(err) => return Err(Error::schema_rejected(drop_sql, err)),
                }

                let create_sql = self.ddl.create_table_sql(shape, &self.table)?;
                debug!(table = %self.table, sql = %create_sql, "creating target");
                session
                    .execute(&create_sql)
                    .await
                    .map_err(|e| Error::schema_rejected(create_sql, e))?;
                Ok(())
            }
        }
    }

    /// Offer one row.
    ///
    /// Returns `RowLimitReached` without consuming the row once the
    /// configured limit has been accepted. Any error aborts the load and
    /// releases the session.
    pub async fn load_row(&mut self, row: &Row) -> Result<LoadStep> {
        match self.state {
            LoadState::Loading => {}
            LoadState::StoppedByLimit => return Ok(LoadStep::RowLimitReached),
            other => {
                return Err(Error::internal(format!("cannot load rows while {}", other)));
            }
        }

        if let Some(limit) = self.config.row_limit {
            if self.rows_accepted >= limit {
                return Ok(LoadStep::RowLimitReached);
            }
        }

        match self.buffer_row(row).await {
            Ok(()) => Ok(LoadStep::Continue),
            Err(err) => {
                self.abort(err.clone()).await;
                Err(err)
            }
        }
    }

    async fn buffer_row(&mut self, row: &Row) -> Result<()> {
        let encoder = self
            .encoder
            .as_ref()
            .ok_or_else(|| Error::internal("encoder not initialized"))?;
        let line = encoder.encode(&self.mappings, row)?;

        match self.buffer.add(line.clone()) {
            Ok(()) => {}
            Err(Error::BufferFull { capacity }) => {
                trace!(capacity, "buffer full, flushing");
                if let Err(err) = self.flush().await {
                    // the row that triggered the flush never reached the buffer
                    self.stats.rows_lost += 1;
                    return Err(err);
                }
                self.buffer.add(line).map_err(|e| {
                    Error::internal(format!("row rejected after flush: {}", e))
                })?;
            }
            Err(err) => return Err(err),
        }

        self.rows_accepted += 1;
        self.stats.rows_pending += 1;
        Ok(())
    }

    /// Send the buffered rows as one batch.
    ///
    /// No-op when the buffer is empty. On failure the batch counts as lost,
    /// the load is aborted and the session released.
    pub async fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        match self.state {
            LoadState::Loading | LoadState::StoppedByLimit | LoadState::Finishing => {}
            other => return Err(Error::internal(format!("cannot flush while {}", other))),
        }

        let bytes = self.buffer.byte_size();
        let lines = self.buffer.drain();
        let rows = lines.len() as u64;
        self.stats.rows_pending = self.stats.rows_pending.saturating_sub(rows);

        let sql = self.copy_statement(rows);
        let start = Instant::now();

        match self.transmit(&sql, &lines).await {
            Ok(()) => {
                let elapsed = start.elapsed().as_millis() as u64;
                self.stats.rows_written += rows;
                self.stats.batches_written += 1;
                self.stats.flush_time_ms += elapsed;
                debug!(
                    table = %self.table,
                    rows,
                    bytes,
                    elapsed_ms = elapsed,
                    total = self.stats.rows_written,
                    "batch acknowledged"
                );
                Ok(())
            }
            Err(err) => {
                self.stats.rows_lost += rows;
                let err = Error::load(rows, err);
                error!(table = %self.table, rows, error = %err, "batch failed");
                self.abort(err.clone()).await;
                Err(err)
            }
        }
    }

    async fn transmit(&mut self, sql: &str, lines: &[EncodedLine]) -> Result<()> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| Error::connection("session is not open"))?;

        trace!(sql = %sql, "sending batch command");
        session.send_command(sql).await?;
        session.stream_payload(lines).await?;
        session.acknowledge_batch().await
    }

    /// `COPY` statement for a batch of `rows` lines
    pub fn copy_statement(&self, rows: u64) -> String {
        let mut sql = format!(
            "COPY {} RECORDS INTO {} FROM STDIN USING DELIMITERS '{}','{}','{}'",
            rows,
            self.table.qualified_name(self.config.fully_quote_sql),
            escape_copy_literal(self.config.delimiter.as_bytes()),
            escape_copy_literal(self.config.newline.as_bytes()),
            escape_copy_literal(self.config.quote_char.as_bytes()),
        );
        if self.config.compatibility_mode {
            sql.push_str(" NULL AS '");
            sql.push_str(&escape_copy_literal(
                self.config.null_representation.as_bytes(),
            ));
            sql.push('\'');
        }
        sql
    }

    /// Stop consuming rows after the row limit; `finish` still flushes
    pub fn abort_on_row_limit(&mut self) -> Result<()> {
        match self.state {
            LoadState::Loading => {
                info!(
                    table = %self.table,
                    accepted = self.rows_accepted,
                    "row limit reached, stopping"
                );
                self.state = LoadState::StoppedByLimit;
                Ok(())
            }
            LoadState::StoppedByLimit => Ok(()),
            other => Err(Error::internal(format!(
                "cannot stop on row limit while {}",
                other
            ))),
        }
    }

    /// Flush the remainder and close the session.
    ///
    /// The session is closed on every path. Calling `finish` again returns
    /// the first report without touching the session.
    pub async fn finish(&mut self) -> LoadReport {
        if let Some(report) = &self.report {
            return report.clone();
        }

        let stopped_by_limit = self.state == LoadState::StoppedByLimit;
        let flushed = if self.failure.is_some() {
            self.discard_pending();
            Ok(())
        } else {
            if matches!(self.state, LoadState::Loading | LoadState::StoppedByLimit) {
                self.state = LoadState::Finishing;
            }
            self.flush().await
        };

        self.release_session().await;

        let outcome = match (flushed, self.failure.clone()) {
            (Err(err), _) | (Ok(()), Some(err)) => LoadOutcome::Failed(err),
            (Ok(()), None) if stopped_by_limit => LoadOutcome::StoppedByLimit,
            (Ok(()), None) => LoadOutcome::Completed,
        };
        self.state = if outcome.is_failed() {
            LoadState::Aborted
        } else {
            LoadState::Closed
        };

        info!(
            table = %self.table,
            outcome = ?outcome,
            rows_written = self.stats.rows_written,
            batches = self.stats.batches_written,
            rows_lost = self.stats.rows_lost,
            "bulk load finished"
        );

        let report = LoadReport {
            outcome,
            stats: self.stats,
        };
        self.report = Some(report.clone());
        report
    }

    /// Prepare, pull every row from `source`, and finish.
    ///
    /// Stops at end of stream, at the row limit or on the first error; the
    /// report always reflects a finished load.
    pub async fn run<R>(&mut self, source: &mut R) -> LoadReport
    where
        R: RowSource + ?Sized,
    {
        if self.prepare(source.shape().clone()).await.is_err() {
            return self.finish().await;
        }

        loop {
            let row = match source.next_row().await {
                Ok(Some(row)) => row,
                Ok(None) => break,
                Err(err) => {
                    error!(table = %self.table, error = %err, "row source failed");
                    self.abort(err).await;
                    break;
                }
            };

            match self.load_row(&row).await {
                Ok(LoadStep::Continue) => {}
                Ok(LoadStep::RowLimitReached) => {
                    if let Err(err) = self.abort_on_row_limit() {
                        self.abort(err).await;
                    }
                    break;
                }
                Err(_) => break,
            }
        }

        self.finish().await
    }

    /// Record the first failure and release the session
    async fn abort(&mut self, err: Error) {
        if self.failure.is_none() {
            self.failure = Some(err);
        }
        self.state = LoadState::Aborted;
        self.release_session().await;
    }

    fn discard_pending(&mut self) {
        let dropped = self.buffer.drain().len() as u64;
        if dropped > 0 {
            warn!(table = %self.table, rows = dropped, "discarding buffered rows of a failed load");
            self.stats.rows_lost += dropped;
        }
        self.stats.rows_pending = 0;
    }

    async fn release_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(err) = session.close().await {
                warn!(table = %self.table, error = %err, "closing session failed");
            }
        }
    }
}

/// Fields in protocol order, named after their target columns
fn target_shape(shape: &RowShape, mappings: &[ColumnMapping]) -> RowShape {
    RowShape::new(
        mappings
            .iter()
            .filter_map(|m| {
                shape.field(m.source_field_index).map(|field| {
                    let mut field = field.clone();
                    field.name = m.target_column.clone();
                    field
                })
            })
            .collect(),
    )
}
