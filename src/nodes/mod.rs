//! Pipeline stages for serial capture
//!
//! - **Source**: [`SerialSource`] reads the device and writes queued bytes back
//! - **Sinks**: [`FileDump`] persists raw bytes, [`TextDisplay`] appends to a
//!   host-supplied [`TextSink`]
//! - **Transforms**: [`LineSplitter`] frames lines, [`CsvParser`] splits fields
//!
//! # Examples
//!
//! ```ignore
//! use serialpipe::nodes::{CsvParser, LineSplitter, SerialSource};
//! use serialpipe::runtime::Pipeline;
//!
//! let mut pipeline = Pipeline::new();
//! pipeline.add_process("serial", SerialSource::new(transport, 256))?;
//! pipeline.add_process("lines", LineSplitter::new())?;
//! pipeline.add_process("csv", CsvParser::new())?;
//! pipeline.connect("serial", "raw", "lines", "raw")?;
//! pipeline.connect("lines", "lines", "csv", "lines")?;
//! let fields = pipeline.tap::<Vec<String>>("csv", "fields")?;
//! let scheduler = pipeline.build()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod csv_parser;
mod display;
mod file_dump;
mod line_splitter;
mod serial_source;

pub use csv_parser::{CsvParser, TrimPolicy, split_fields};
pub use display::{ConsoleSink, Render, TextDisplay, TextSink};
pub use file_dump::{DEFAULT_FLUSH_INTERVAL, FileDump, FileMode};
pub use line_splitter::{LineSplitter, split_complete_lines};
pub use serial_source::SerialSource;
