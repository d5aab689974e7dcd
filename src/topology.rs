//! The standard serial capture topology
//!
//! ```text
//! serial_source ──raw──► file_dump            (when a log path is set)
//!       ▲        └─raw──► line_splitter ──lines──► csv_parser ──fields──► Tap
//!       │                                   └─lines──► line_echo  (when enabled)
//!     Feed (bytes to the device)
//! ```

use crate::config::AppConfig;
use crate::nodes::{ConsoleSink, CsvParser, FileDump, LineSplitter, SerialSource, TextDisplay, TextSink};
use crate::runtime::{Feed, Pipeline, PipelineError, PipelineReport, Scheduler, StopHandle, Tap};
use crate::transport::Transport;
use tracing::info;

pub const SOURCE: &str = "serial_source";
pub const FILE_DUMP: &str = "file_dump";
pub const LINE_SPLITTER: &str = "line_splitter";
pub const CSV_PARSER: &str = "csv_parser";
pub const LINE_ECHO: &str = "line_echo";

/// A running standard pipeline and its external endpoints
pub struct SerialPipeline {
    scheduler: Scheduler,
    /// Parsed field lists, in arrival order
    pub fields: Tap<Vec<String>>,
    /// Bytes to write to the device
    pub to_device: Feed<Vec<u8>>,
}

impl SerialPipeline {
    /// Wire and start the pipeline. Lines are echoed to stdout when
    /// `display.echo_lines` is set.
    pub fn start(config: &AppConfig, transport: impl Transport + 'static) -> Result<Self, PipelineError> {
        let echo = config.display.echo_lines.then(ConsoleSink::stdout);
        Self::start_with_sink(config, transport, echo)
    }

    /// Wire and start the pipeline, echoing lines to `echo` if given
    pub fn start_with_sink<S: TextSink + 'static>(
        config: &AppConfig,
        transport: impl Transport + 'static,
        echo: Option<S>,
    ) -> Result<Self, PipelineError> {
        let mut pipeline = Pipeline::new().with_default_capacity(config.queue.capacity());

        pipeline.add_process(
            SOURCE,
            SerialSource::new(transport, config.serial.read_chunk_size)
                .with_name(SOURCE)
                .with_delay(config.source_delay()),
        )?;

        if let Some(path) = &config.dump.path {
            pipeline.add_process(
                FILE_DUMP,
                FileDump::new(path)
                    .with_name(FILE_DUMP)
                    .with_mode(config.dump.mode)
                    .with_flush_interval(config.flush_interval())
                    .with_flush_threshold(config.dump.flush_threshold),
            )?;
            pipeline.connect(SOURCE, "raw", FILE_DUMP, "raw")?;
        }

        pipeline.add_process(
            LINE_SPLITTER,
            LineSplitter::new()
                .with_name(LINE_SPLITTER)
                .with_delay(config.splitter_delay()),
        )?;
        pipeline.add_process(
            CSV_PARSER,
            CsvParser::new()
                .with_name(CSV_PARSER)
                .with_delimiter(config.parser.delimiter)
                .with_trim(config.parser.trim),
        )?;
        pipeline.connect(SOURCE, "raw", LINE_SPLITTER, "raw")?;
        pipeline.connect(LINE_SPLITTER, "lines", CSV_PARSER, "lines")?;

        if let Some(sink) = echo {
            pipeline.add_process(LINE_ECHO, TextDisplay::<String, S>::new(sink).with_name(LINE_ECHO))?;
            pipeline.connect(LINE_SPLITTER, "lines", LINE_ECHO, "in")?;
        }

        let fields = pipeline.tap::<Vec<String>>(CSV_PARSER, "fields")?;
        let to_device = pipeline.feed::<Vec<u8>>(SOURCE, "tx")?;

        let scheduler = pipeline.build()?;
        info!("Serial pipeline running: {}", scheduler.thread_names().join(", "));

        Ok(Self {
            scheduler,
            fields,
            to_device,
        })
    }

    /// Handle that stops the pipeline from another thread (signal handler)
    pub fn stop_handle(&self) -> StopHandle {
        self.scheduler.stop_handle()
    }

    /// Request shutdown of every stage, in startup order
    pub fn stop(&self) {
        self.scheduler.stop();
    }

    /// True once a stage failed and took the pipeline down
    pub fn is_aborted(&self) -> bool {
        self.scheduler.is_aborted()
    }

    /// Join every stage
    pub fn wait(self) -> Result<PipelineReport, PipelineError> {
        self.scheduler.wait()
    }
}
