//! End-to-end tests for the bulk load controller against a simulated
//! MonetDB server on an in-memory duplex stream.

use async_trait::async_trait;
use rivven_bulkload::encoder::EncodedLine;
use rivven_bulkload::prelude::*;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::task::JoinHandle;

const PROMPT: &[u8] = b"\x01\x01\n";

/// Simulated server: answers every plain statement and every empty line
/// with the next scripted reply (a bare prompt once the script runs out).
/// Returns everything the client sent.
fn spawn_server(stream: DuplexStream, replies: Vec<&'static [u8]>) -> JoinHandle<Vec<u8>> {
    tokio::spawn(async move {
        let mut replies: VecDeque<&'static [u8]> = replies.into();
        let mut reader = BufReader::new(stream);
        let mut transcript = Vec::new();
        let mut line = Vec::new();

        loop {
            line.clear();
            let n = reader.read_until(b'\n', &mut line).await.unwrap();
            if n == 0 {
                break;
            }
            transcript.extend_from_slice(&line);

            let answer = line == b"\n" || (line.starts_with(b"s") && !line.starts_with(b"sCOPY"));
            if answer {
                let reply = replies.pop_front().unwrap_or(PROMPT);
                reader.get_mut().write_all(reply).await.unwrap();
            }
        }
        transcript
    })
}

/// Hands out one pre-connected session over a duplex stream
struct DuplexFactory {
    stream: Mutex<Option<DuplexStream>>,
    closes: Arc<AtomicUsize>,
}

impl DuplexFactory {
    fn new(stream: DuplexStream) -> (Arc<Self>, Arc<AtomicUsize>) {
        let closes = Arc::new(AtomicUsize::new(0));
        let factory = Arc::new(Self {
            stream: Mutex::new(Some(stream)),
            closes: closes.clone(),
        });
        (factory, closes)
    }
}

#[async_trait]
impl SessionFactory for DuplexFactory {
    async fn open(&self) -> Result<Box<dyn Session>> {
        let stream = self
            .stream
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| Error::connection("stream already used"))?;
        let mut session = MapiSession::new(stream, Some(Duration::from_secs(5)));
        session.handshake(false).await?;
        Ok(Box::new(CountingSession {
            inner: Box::new(session),
            closes: self.closes.clone(),
        }))
    }
}

/// Counts `close` calls on the way through
struct CountingSession {
    inner: Box<dyn Session>,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl Session for CountingSession {
    fn state(&self) -> SessionState {
        self.inner.state()
    }

    async fn send_command(&mut self, command: &str) -> Result<()> {
        self.inner.send_command(command).await
    }

    async fn stream_payload(&mut self, lines: &[EncodedLine]) -> Result<()> {
        self.inner.stream_payload(lines).await
    }

    async fn flush_marker(&mut self) -> Result<()> {
        self.inner.flush_marker().await
    }

    async fn wait_for_prompt(&mut self) -> Result<Response> {
        self.inner.wait_for_prompt().await
    }

    async fn close(&mut self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.inner.close().await
    }
}

struct RefusingFactory;

#[async_trait]
impl SessionFactory for RefusingFactory {
    async fn open(&self) -> Result<Box<dyn Session>> {
        Err(Error::connection("connect to localhost:50000: connection refused"))
    }
}

fn shape() -> RowShape {
    RowShape::new(vec![
        FieldMeta::new("name", FieldType::Text),
        FieldMeta::new("qty", FieldType::Integer),
    ])
}

fn config() -> BulkLoadConfigBuilder {
    BulkLoadConfig::builder("items").schema("sys").newline("\n")
}

#[tokio::test]
async fn test_three_rows_end_to_end() {
    let (client, server) = duplex(64 * 1024);
    let server = spawn_server(server, vec![]);
    let (factory, closes) = DuplexFactory::new(client);

    let mut loader = BulkLoadController::new(config().buffer_size(3).build(), factory).unwrap();
    let mut source = VecRowSource::new(
        shape(),
        vec![
            Row::new(vec!["a".into(), Value::Int64(1)]),
            Row::new(vec!["b".into(), Value::Null]),
            Row::new(vec!["c\"".into(), Value::Int64(3)]),
        ],
    );

    let report = loader.run(&mut source).await;
    assert!(matches!(report.outcome, LoadOutcome::Completed));
    assert_eq!(report.rows_written(), 3);
    assert_eq!(report.stats.batches_written, 1);
    assert_eq!(closes.load(Ordering::SeqCst), 1);

    let transcript = server.await.unwrap();
    assert_eq!(
        String::from_utf8(transcript).unwrap(),
        concat!(
            "sCOPY 3 RECORDS INTO sys.items FROM STDIN USING DELIMITERS '|','\\n','\"';\n",
            "\"a\"|1\n",
            "\"b\"|null\n",
            "\"c\\\"\"|3\n",
            "\n\n\n",
        )
    );
}

#[tokio::test]
async fn test_error_on_third_wait_gives_no_credit() {
    let (client, server) = duplex(64 * 1024);
    let server = spawn_server(
        server,
        vec![PROMPT, PROMPT, b"!COPY INTO: NOT NULL constraint violated\n\x01\x01\n"],
    );
    let (factory, closes) = DuplexFactory::new(client);

    let mut loader = BulkLoadController::new(config().build(), factory).unwrap();
    let rows = (0..4).map(|i| Row::new(vec!["x".into(), Value::Int64(i)])).collect();
    let report = loader.run(&mut VecRowSource::new(shape(), rows)).await;

    assert_eq!(report.rows_written(), 0);
    assert_eq!(report.stats.rows_lost, 4);
    let err = report.outcome.error().unwrap();
    assert_eq!(err.category(), ErrorCategory::Load);
    assert_eq!(
        err.server_message(),
        Some("COPY INTO: NOT NULL constraint violated")
    );
    assert_eq!(closes.load(Ordering::SeqCst), 1);

    let transcript = server.await.unwrap();
    assert!(transcript.ends_with(b"\n\n\n"));
}

#[tokio::test]
async fn test_error_on_first_batch_stops_further_batches() {
    let (client, server) = duplex(64 * 1024);
    let server = spawn_server(server, vec![b"!COPY INTO: table is read only\n\x01\x01\n"]);
    let (factory, closes) = DuplexFactory::new(client);

    let mut loader = BulkLoadController::new(config().buffer_size(2).build(), factory).unwrap();
    let rows = (0..6).map(|i| Row::new(vec!["x".into(), Value::Int64(i)])).collect();
    let report = loader.run(&mut VecRowSource::new(shape(), rows)).await;

    assert!(report.outcome.is_failed());
    assert_eq!(report.rows_written(), 0);
    assert_eq!(closes.load(Ordering::SeqCst), 1);

    let transcript = String::from_utf8(server.await.unwrap()).unwrap();
    assert_eq!(transcript.matches("sCOPY").count(), 1);
}

#[tokio::test]
async fn test_schema_error_closes_once() {
    let (client, server) = duplex(64 * 1024);
    let server = spawn_server(
        server,
        vec![b"!42000!TRUNCATE: insufficient privileges for user 'etl'\n\x01\x01\n"],
    );
    let (factory, closes) = DuplexFactory::new(client);

    let config = config()
        .schema_preparation(SchemaPreparation::Truncate)
        .build();
    let mut loader = BulkLoadController::new(config, factory).unwrap();
    let rows = vec![Row::new(vec!["x".into(), Value::Int64(1)])];
    let report = loader.run(&mut VecRowSource::new(shape(), rows)).await;

    let err = report.outcome.error().unwrap();
    assert_eq!(err.category(), ErrorCategory::Schema);
    assert_eq!(
        err.server_message(),
        Some("42000!TRUNCATE: insufficient privileges for user 'etl'")
    );
    assert_eq!(report.rows_written(), 0);
    assert_eq!(closes.load(Ordering::SeqCst), 1);

    let transcript = String::from_utf8(server.await.unwrap()).unwrap();
    assert_eq!(transcript, "sTRUNCATE TABLE sys.items;\n");
}

#[tokio::test]
async fn test_drop_and_recreate_over_the_wire() {
    let (client, server) = duplex(64 * 1024);
    let server = spawn_server(
        server,
        vec![b"!DROP TABLE: no such table 'items'\n\x01\x01\n", PROMPT],
    );
    let (factory, closes) = DuplexFactory::new(client);

    let config = config()
        .schema_preparation(SchemaPreparation::DropAndRecreate)
        .build();
    let mut loader = BulkLoadController::new(config, factory).unwrap();
    let rows = vec![Row::new(vec!["x".into(), Value::Int64(1)])];
    let report = loader.run(&mut VecRowSource::new(shape(), rows)).await;

    assert!(matches!(report.outcome, LoadOutcome::Completed));
    assert_eq!(report.rows_written(), 1);
    assert_eq!(closes.load(Ordering::SeqCst), 1);

    let transcript = String::from_utf8(server.await.unwrap()).unwrap();
    assert!(transcript.starts_with(
        "sDROP TABLE sys.items;\nsCREATE TABLE sys.items (name CLOB, qty BIGINT);\nsCOPY 1 RECORDS"
    ));
}

#[tokio::test]
async fn test_row_limit_controlled_stop() {
    const LIMIT: u64 = 25;

    let (client, server) = duplex(64 * 1024);
    let server = spawn_server(server, vec![]);
    let (factory, closes) = DuplexFactory::new(client);

    let config = config().buffer_size(10).row_limit(LIMIT).build();
    let mut loader = BulkLoadController::new(config, factory).unwrap();
    let rows = (0..LIMIT as i64 + 50)
        .map(|i| Row::new(vec!["r".into(), Value::Int64(i)]))
        .collect();
    let report = loader.run(&mut VecRowSource::new(shape(), rows)).await;

    assert!(matches!(report.outcome, LoadOutcome::StoppedByLimit));
    assert!(report.is_success());
    assert_eq!(report.rows_written(), LIMIT);
    assert_eq!(report.stats.batches_written, 3);
    assert_eq!(loader.state(), LoadState::Closed);
    assert_eq!(closes.load(Ordering::SeqCst), 1);

    let transcript = String::from_utf8(server.await.unwrap()).unwrap();
    assert!(transcript.contains("sCOPY 5 RECORDS"));
    assert!(!transcript.contains("\"r\"|25\n"));
}

#[tokio::test]
async fn test_connection_refused_is_reported() {
    let mut loader =
        BulkLoadController::new(config().build(), Arc::new(RefusingFactory)).unwrap();
    let report = loader.run(&mut VecRowSource::new(shape(), vec![])).await;

    let err = report.outcome.error().unwrap();
    assert_eq!(err.category(), ErrorCategory::Connection);
    assert!(err.is_transient());
    assert_eq!(loader.state(), LoadState::Aborted);
}

#[tokio::test]
async fn test_manual_lifecycle() {
    let (client, server) = duplex(64 * 1024);
    let server = spawn_server(server, vec![]);
    let (factory, closes) = DuplexFactory::new(client);

    let mut loader = BulkLoadController::new(config().buffer_size(100).build(), factory).unwrap();
    loader.prepare(shape()).await.unwrap();
    assert_eq!(loader.state(), LoadState::Loading);

    for i in 0..3 {
        let step = loader
            .load_row(&Row::new(vec!["m".into(), Value::Int64(i)]))
            .await
            .unwrap();
        assert_eq!(step, LoadStep::Continue);
    }
    loader.flush().await.unwrap();
    assert_eq!(loader.stats().rows_written, 3);

    loader
        .load_row(&Row::new(vec!["m".into(), Value::Int64(3)]))
        .await
        .unwrap();
    let report = loader.finish().await;
    assert_eq!(report.rows_written(), 4);
    assert_eq!(report.stats.batches_written, 2);

    // A second finish does not touch the session again.
    let again = loader.finish().await;
    assert_eq!(again.stats, report.stats);
    assert_eq!(closes.load(Ordering::SeqCst), 1);

    let transcript = String::from_utf8(server.await.unwrap()).unwrap();
    assert_eq!(transcript.matches("sCOPY").count(), 2);
}
