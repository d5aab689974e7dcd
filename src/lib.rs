//! Staged serial capture pipeline with a thread-per-stage runtime
//!
//! Reads a continuous byte stream from a serial device, fans it out to
//! independent consumers and progressively transforms it: raw bytes into a
//! log file, and raw bytes into lines into comma-separated fields.
//!
//! # Architecture
//!
//! - **Transport**: [`SerialTransport`] (real device) or [`MockTransport`]
//! - **Stages**: [`SerialSource`], [`FileDump`], [`LineSplitter`],
//!   [`CsvParser`], [`TextDisplay`]
//! - **Runtime**: [`Pipeline`] wires stages by port name, [`Scheduler`] runs
//!   each stage on its own thread with cancellable waits
//! - **Topology**: [`SerialPipeline`] builds the standard wiring from an
//!   [`AppConfig`]
//!
//! # Example
//!
//! ```no_run
//! use serialpipe::{AppConfig, SerialPipeline, SerialTransport};
//!
//! let mut config = AppConfig::default();
//! config.serial.device = "/dev/ttyUSB0".to_string();
//! let transport = SerialTransport::open(&config.serial)?;
//!
//! let mut pipeline = SerialPipeline::start(&config, transport)?;
//! while let Some(fields) = pipeline.fields.recv() {
//!     println!("{}", fields.join(", "));
//! }
//! pipeline.wait()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod nodes;
pub mod runtime;
pub mod topology;
pub mod transport;

pub use config::{AppConfig, ConfigError};

pub use nodes::{
    ConsoleSink, CsvParser, FileDump, FileMode, LineSplitter, Render, SerialSource, TextDisplay,
    TextSink, TrimPolicy,
};

pub use runtime::{
    ConnectionError, Feed, InputPort, OutputPort, OverflowPolicy, Pipeline, PipelineError,
    PipelineReport, PortDirection, PortSchema, ProcessNode, QueueCapacity, Scheduler,
    StageContext, StageOutcome, StopHandle, Tap, WorkError, WorkResult, register_type,
};

pub use topology::SerialPipeline;

pub use transport::{MockTransport, SerialConfig, SerialTransport, Transport, TransportError};
