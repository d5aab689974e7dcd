//! Serial source stage
//!
//! Reads chunks from a [`Transport`] and broadcasts each chunk to every
//! consumer of its `raw` output. Bytes queued on the optional `tx` input are
//! written back to the device, at most one payload per iteration.

use crate::runtime::node::{ProcessNode, StageContext, WorkError, WorkResult};
use crate::runtime::ports::{PortDirection, PortSchema};
use crate::transport::{Transport, is_transient};
use crossbeam_channel::TryRecvError;
use std::io;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Source stage owning the transport endpoint
///
/// Input: `tx` (optional) - bytes to write to the device
/// Output: `raw` - chunks exactly as read
pub struct SerialSource {
    name: String,
    transport: Box<dyn Transport>,
    delay: Option<Duration>,
    read_buf: Vec<u8>,

    bytes_read: u64,
    bytes_written: u64,
    chunks_forwarded: u64,
}

impl SerialSource {
    /// Create a source reading up to `read_chunk_size` bytes per iteration
    pub fn new(transport: impl Transport + 'static, read_chunk_size: usize) -> Self {
        Self {
            name: "serial_source".to_string(),
            transport: Box::new(transport),
            delay: None,
            read_buf: vec![0u8; read_chunk_size.max(1)],
            bytes_read: 0,
            bytes_written: 0,
            chunks_forwarded: 0,
        }
    }

    /// With custom name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Wait this long before every read attempt
    pub fn with_delay(mut self, delay: Option<Duration>) -> Self {
        self.delay = delay.filter(|d| !d.is_zero());
        self
    }

    fn read_chunk(&mut self) -> WorkResult<Option<Vec<u8>>> {
        match self.transport.read(&mut self.read_buf) {
            Ok(0) => Ok(None),
            Ok(n) => {
                self.bytes_read += n as u64;
                Ok(Some(self.read_buf[..n].to_vec()))
            }
            Err(e) if is_transient(&e) => Ok(None),
            Err(e) => Err(WorkError::Transport(e)),
        }
    }
}

impl ProcessNode for SerialSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn num_inputs(&self) -> usize {
        1
    }

    fn num_outputs(&self) -> usize {
        1
    }

    fn input_schema(&self) -> Vec<PortSchema> {
        vec![PortSchema::new::<Vec<u8>>("tx", 0, PortDirection::Input)]
    }

    fn output_schema(&self) -> Vec<PortSchema> {
        vec![PortSchema::new::<Vec<u8>>("raw", 0, PortDirection::Output)]
    }

    fn work(&mut self, ctx: &StageContext<'_>) -> WorkResult<usize> {
        if let Some(delay) = self.delay {
            ctx.sleep(delay)?;
        }

        let mut produced = 0;
        if let Some(chunk) = self.read_chunk()? {
            trace!("[{}] Read {} bytes", self.name, chunk.len());
            let raw = ctx.output::<Vec<u8>>(0)?;
            if raw.send(chunk).is_ok() {
                self.chunks_forwarded += 1;
                produced = 1;
            } else {
                debug!("[{}] No consumer left for raw chunk", self.name);
            }
        }

        if let Some(mut tx) = ctx.try_input::<Vec<u8>>(0) {
            match tx.try_recv() {
                Ok(bytes) => match self.transport.write_all(&bytes) {
                    Ok(()) => {
                        self.bytes_written += bytes.len() as u64;
                        debug!("[{}] Wrote {} bytes", self.name, bytes.len());
                    }
                    Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                        warn!("[{}] Write of {} bytes timed out, dropped", self.name, bytes.len());
                    }
                    Err(e) => return Err(WorkError::Transport(e)),
                },
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {}
            }
        }

        Ok(produced)
    }

    fn on_shutdown(&mut self, _ctx: &StageContext<'_>) -> WorkResult<()> {
        self.transport.close();
        info!(
            "[{}] Closed {}: {} bytes read, {} bytes written, {} chunks forwarded",
            self.name,
            self.transport.describe(),
            self.bytes_read,
            self.bytes_written,
            self.chunks_forwarded
        );
        Ok(())
    }
}
