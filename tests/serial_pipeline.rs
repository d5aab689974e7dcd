//! End-to-end runs of the standard topology over a scripted transport

use serialpipe::runtime::StageOutcome;
use serialpipe::topology::{CSV_PARSER, FILE_DUMP, LINE_ECHO, LINE_SPLITTER, SOURCE};
use serialpipe::transport::{MockRead, MockTransport};
use serialpipe::{AppConfig, FileMode, OverflowPolicy, PipelineError, SerialPipeline, TextSink};
use std::fs;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

fn config_with_log(path: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.serial.device = "mock".to_string();
    config.dump.path = Some(path.to_path_buf());
    config
}

fn fields(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

#[test]
fn test_two_chunks_reach_parser_and_log() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("capture.log");
    let (transport, handle) =
        MockTransport::new([MockRead::data("1,2,3\n"), MockRead::data("4,5,6\n")]);

    let mut pipeline = SerialPipeline::start(&config_with_log(&log), transport).unwrap();

    assert_eq!(pipeline.fields.recv_timeout(RECV_TIMEOUT).unwrap(), fields(&["1", "2", "3"]));
    assert_eq!(pipeline.fields.recv_timeout(RECV_TIMEOUT).unwrap(), fields(&["4", "5", "6"]));

    pipeline.stop();
    let report = pipeline.wait().unwrap();

    // The 5 s flush interval never elapsed: the bytes come from the shutdown flush
    assert_eq!(fs::read(&log).unwrap(), b"1,2,3\n4,5,6\n");
    assert!(handle.is_closed());
    assert_eq!(
        report.stages.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
        vec![SOURCE, FILE_DUMP, LINE_SPLITTER, CSV_PARSER]
    );
    assert_eq!(report.stage(SOURCE).unwrap().items, 2);
    assert_eq!(report.stage(CSV_PARSER).unwrap().items, 2);
}

#[test]
fn test_lines_split_across_chunks() {
    let (transport, _handle) = MockTransport::new([
        MockRead::data("1,2"),
        MockRead::Timeout,
        MockRead::data(",3\n4,5,6\n7,8"),
    ]);
    let mut config = AppConfig::default();
    config.serial.device = "mock".to_string();

    let mut pipeline = SerialPipeline::start(&config, transport).unwrap();
    assert_eq!(pipeline.fields.recv_timeout(RECV_TIMEOUT).unwrap(), fields(&["1", "2", "3"]));
    assert_eq!(pipeline.fields.recv_timeout(RECV_TIMEOUT).unwrap(), fields(&["4", "5", "6"]));

    // "7,8" never got its newline
    assert!(pipeline.fields.recv_timeout(Duration::from_millis(200)).is_err());

    pipeline.stop();
    pipeline.wait().unwrap();
}

#[test]
fn test_log_appends_across_runs() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("capture.log");
    fs::write(&log, b"X").unwrap();

    for chunk in ["a\n", "b\n"] {
        let (transport, _handle) = MockTransport::with_data(chunk);
        let mut pipeline = SerialPipeline::start(&config_with_log(&log), transport).unwrap();
        pipeline.fields.recv_timeout(RECV_TIMEOUT).unwrap();
        pipeline.stop();
        pipeline.wait().unwrap();
    }

    assert_eq!(fs::read(&log).unwrap(), b"Xa\nb\n");
}

#[test]
fn test_overwrite_mode_replaces_previous_capture() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("capture.log");
    fs::write(&log, b"stale capture\n").unwrap();

    let mut config = config_with_log(&log);
    config.dump.mode = FileMode::Overwrite;
    let (transport, _handle) = MockTransport::with_data("fresh\n");
    let mut pipeline = SerialPipeline::start(&config, transport).unwrap();
    pipeline.fields.recv_timeout(RECV_TIMEOUT).unwrap();
    pipeline.stop();
    pipeline.wait().unwrap();

    assert_eq!(fs::read(&log).unwrap(), b"fresh\n");
}

#[test]
fn test_shutdown_is_bounded_and_releases_transport() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("capture.log");
    let (transport, handle) = MockTransport::new(Vec::new());

    let pipeline = SerialPipeline::start(&config_with_log(&log), transport).unwrap();
    thread::sleep(Duration::from_millis(100));

    let start = Instant::now();
    pipeline.stop_handle().request_stop();
    let report = pipeline.wait().unwrap();

    assert!(start.elapsed() < Duration::from_secs(2));
    assert!(handle.is_closed());
    assert_eq!(report.stage(SOURCE).unwrap().outcome, StageOutcome::Stopped);
    assert!(report.first_failure().is_none());
    // Nothing was ever buffered, so no file was created
    assert!(!log.exists());
}

#[test]
fn test_transport_fault_aborts_pipeline() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("capture.log");
    let (mut transport, handle) = MockTransport::new([
        MockRead::data("1,2\n"),
        MockRead::Timeout,
        MockRead::Error(io::ErrorKind::BrokenPipe),
    ]);
    // Give the first line time to reach the parser before the fault
    transport.set_idle(Duration::from_millis(200));

    let mut pipeline = SerialPipeline::start(&config_with_log(&log), transport).unwrap();
    assert_eq!(pipeline.fields.recv_timeout(RECV_TIMEOUT).unwrap(), fields(&["1", "2"]));

    // No stop request: the fault alone must bring every stage down
    let start = Instant::now();
    while pipeline.fields.recv_timeout(RECV_TIMEOUT).is_ok() {}
    let err = pipeline.wait().unwrap_err();
    assert!(start.elapsed() < Duration::from_secs(5));

    match err {
        PipelineError::StageFailed { stage, reason } => {
            assert_eq!(stage, SOURCE);
            assert!(reason.contains("Transport fault"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(handle.is_closed());
    assert_eq!(fs::read(&log).unwrap(), b"1,2\n");
}

#[test]
fn test_feed_writes_to_device() {
    let (transport, handle) = MockTransport::new(Vec::new());
    let mut config = AppConfig::default();
    config.serial.device = "mock".to_string();

    let pipeline = SerialPipeline::start(&config, transport).unwrap();
    pipeline.to_device.send(b"AT\r\n".to_vec()).unwrap();
    pipeline.to_device.send(b"ATI\r\n".to_vec()).unwrap();

    let deadline = Instant::now() + RECV_TIMEOUT;
    while handle.written() != b"AT\r\nATI\r\n" && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(handle.written(), b"AT\r\nATI\r\n");
    assert_eq!(handle.write_calls(), 2);

    pipeline.stop();
    pipeline.wait().unwrap();
}

#[derive(Clone, Default)]
struct SharedSink(Arc<Mutex<Vec<String>>>);

impl TextSink for SharedSink {
    fn append(&mut self, text: &str) -> io::Result<()> {
        self.0.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

#[test]
fn test_lines_echoed_alongside_fields() {
    let (transport, _handle) = MockTransport::with_data("t=1, ok\nt=2, ok\n");
    let mut config = AppConfig::default();
    config.serial.device = "mock".to_string();
    let sink = SharedSink::default();

    let mut pipeline =
        SerialPipeline::start_with_sink(&config, transport, Some(sink.clone())).unwrap();
    assert_eq!(pipeline.fields.recv_timeout(RECV_TIMEOUT).unwrap(), fields(&["t=1", "ok"]));
    assert_eq!(pipeline.fields.recv_timeout(RECV_TIMEOUT).unwrap(), fields(&["t=2", "ok"]));

    let deadline = Instant::now() + RECV_TIMEOUT;
    while sink.0.lock().unwrap().len() < 2 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    pipeline.stop();
    let report = pipeline.wait().unwrap();

    // Fan-out: the echo saw the same lines, untrimmed
    assert_eq!(*sink.0.lock().unwrap(), vec!["t=1, ok", "t=2, ok"]);
    assert_eq!(report.stage(LINE_ECHO).unwrap().items, 2);
}

#[test]
fn test_bounded_queues_with_drop_newest_stay_live() {
    let script: Vec<MockRead> = (0..200).map(|i| MockRead::data(format!("{i},x\n"))).collect();
    let (transport, handle) = MockTransport::new(script);
    let mut config = AppConfig::default();
    config.serial.device = "mock".to_string();
    config.queue.capacity = Some(4);
    config.queue.overflow = OverflowPolicy::DropNewest;

    let mut pipeline = SerialPipeline::start(&config, transport).unwrap();
    let first = pipeline.fields.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(first.len(), 2);

    let deadline = Instant::now() + RECV_TIMEOUT;
    while !handle.is_drained() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert!(handle.is_drained());

    pipeline.stop();
    let report = pipeline.wait().unwrap();
    assert!(report.stage(CSV_PARSER).unwrap().items <= 200);
}
