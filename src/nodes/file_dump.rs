//! File dump sink
//!
//! Accumulates raw chunks in memory and writes them to a log file in one
//! open/write/close cycle per flush interval. Whatever is buffered or still
//! queued when the stage ends is flushed before the stage exits.

use crate::runtime::node::{ProcessNode, StageContext, WorkError, WorkResult};
use crate::runtime::ports::{PortDirection, PortSchema};
use crossbeam_channel::TryRecvError;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Default time between flushes
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// How the log file is opened
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileMode {
    /// Keep existing content and append every flush
    #[default]
    Append,
    /// Truncate on the first flush of this run, append afterwards
    Overwrite,
}

/// Sink stage persisting raw bytes
///
/// Input: `raw` - chunks to persist
pub struct FileDump {
    name: String,
    path: PathBuf,
    mode: FileMode,
    flush_interval: Duration,
    flush_threshold: Option<usize>,

    buffer: Vec<u8>,
    truncate_pending: bool,
    bytes_written: u64,
    flushes: u64,
}

impl FileDump {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            name: "file_dump".to_string(),
            path: path.into(),
            mode: FileMode::Append,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            flush_threshold: None,
            buffer: Vec::new(),
            truncate_pending: false,
            bytes_written: 0,
            flushes: 0,
        }
    }

    /// With custom name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_mode(mut self, mode: FileMode) -> Self {
        self.mode = mode;
        self.truncate_pending = mode == FileMode::Overwrite;
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Flush early once the buffer grows past `bytes`
    pub fn with_flush_threshold(mut self, bytes: Option<usize>) -> Self {
        self.flush_threshold = bytes.filter(|b| *b > 0);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Pull everything queued into the buffer.
    /// Returns the number of chunks taken and whether the input has ended.
    fn drain(&mut self, ctx: &StageContext<'_>) -> WorkResult<(usize, bool)> {
        let Some(mut rx) = ctx.try_input::<Vec<u8>>(0) else {
            return Ok((0, true));
        };

        let mut chunks = 0;
        loop {
            match rx.try_recv() {
                Ok(chunk) => {
                    self.buffer.extend_from_slice(&chunk);
                    chunks += 1;
                    if let Some(threshold) = self.flush_threshold
                        && self.buffer.len() >= threshold
                    {
                        self.flush()?;
                    }
                }
                Err(TryRecvError::Empty) => return Ok((chunks, false)),
                Err(TryRecvError::Disconnected) => return Ok((chunks, true)),
            }
        }
    }

    /// Write the buffer out and clear it. An empty buffer touches nothing.
    fn flush(&mut self) -> WorkResult<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let mut options = OpenOptions::new();
        options.create(true);
        if self.truncate_pending {
            options.write(true).truncate(true);
        } else {
            options.append(true);
        }

        let mut file = options.open(&self.path).map_err(WorkError::Io)?;
        file.write_all(&self.buffer)?;
        file.flush()?;

        self.truncate_pending = false;
        self.bytes_written += self.buffer.len() as u64;
        self.flushes += 1;
        debug!(
            "[{}] Flushed {} bytes to {}",
            self.name,
            self.buffer.len(),
            self.path.display()
        );
        self.buffer.clear();
        Ok(())
    }
}

impl ProcessNode for FileDump {
    fn name(&self) -> &str {
        &self.name
    }

    fn num_inputs(&self) -> usize {
        1
    }

    fn num_outputs(&self) -> usize {
        0
    }

    fn input_schema(&self) -> Vec<PortSchema> {
        vec![PortSchema::new::<Vec<u8>>("raw", 0, PortDirection::Input)]
    }

    fn work(&mut self, ctx: &StageContext<'_>) -> WorkResult<usize> {
        ctx.sleep(self.flush_interval)?;

        let (chunks, ended) = self.drain(ctx)?;
        self.flush()?;

        if ended {
            return Err(WorkError::Shutdown);
        }
        Ok(chunks)
    }

    fn on_shutdown(&mut self, ctx: &StageContext<'_>) -> WorkResult<()> {
        self.drain(ctx)?;
        self.flush()?;
        info!(
            "[{}] {} bytes written to {} in {} flushes",
            self.name,
            self.bytes_written,
            self.path.display(),
            self.flushes
        );
        Ok(())
    }
}
