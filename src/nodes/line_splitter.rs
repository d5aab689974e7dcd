//! Line splitter stage
//!
//! Reassembles newline-terminated lines from arbitrarily chunked bytes.
//! Only complete lines are forwarded; the trailing partial segment stays
//! buffered until its newline arrives.

use crate::runtime::node::{ProcessNode, StageContext, WorkError, WorkResult};
use crate::runtime::ports::{PortDirection, PortSchema};
use crossbeam_channel::{RecvTimeoutError, TryRecvError};
use std::time::Duration;
use tracing::debug;

/// How long an idle splitter waits for input when no delay is configured
const IDLE_WAIT: Duration = Duration::from_millis(20);

/// Split every complete line off the front of `buffer`.
///
/// The segment after the last `\n` (possibly empty) is left in `buffer`.
/// Without any `\n` nothing is returned and `buffer` is untouched. Lines are
/// decoded as lossy UTF-8 one at a time, so a multi-byte character split
/// across chunks decodes correctly once its line is complete.
pub fn split_complete_lines(buffer: &mut Vec<u8>) -> Vec<String> {
    let Some(last_newline) = buffer.iter().rposition(|b| *b == b'\n') else {
        return Vec::new();
    };

    let remainder = buffer.split_off(last_newline + 1);
    let complete = std::mem::replace(buffer, remainder);

    complete[..last_newline]
        .split(|b| *b == b'\n')
        .map(|line| String::from_utf8_lossy(line).into_owned())
        .collect()
}

/// Transform stage: raw chunks in, lines out
///
/// Input: `raw` - byte chunks
/// Output: `lines` - complete lines without the `\n`
pub struct LineSplitter {
    name: String,
    delay: Option<Duration>,
    buffer: Vec<u8>,
    lines_forwarded: u64,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self {
            name: "line_splitter".to_string(),
            delay: None,
            buffer: Vec::new(),
            lines_forwarded: 0,
        }
    }

    /// With custom name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Poll the input every `delay` instead of waiting on it
    pub fn with_delay(mut self, delay: Option<Duration>) -> Self {
        self.delay = delay.filter(|d| !d.is_zero());
        self
    }

    /// Bytes held back waiting for a newline
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }
}

impl Default for LineSplitter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessNode for LineSplitter {
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
        vec![PortSchema::new::<Vec<u8>>("raw", 0, PortDirection::Input)]
    }

    fn output_schema(&self) -> Vec<PortSchema> {
        vec![PortSchema::new::<String>("lines", 0, PortDirection::Output)]
    }

    fn work(&mut self, ctx: &StageContext<'_>) -> WorkResult<usize> {
        if let Some(delay) = self.delay {
            ctx.sleep(delay)?;
        }

        let mut rx = ctx.input::<Vec<u8>>(0)?;
        let mut received = false;
        let mut ended = false;

        loop {
            match rx.try_recv() {
                Ok(chunk) => {
                    self.buffer.extend_from_slice(&chunk);
                    received = true;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    ended = true;
                    break;
                }
            }
        }

        if !received && !ended && self.delay.is_none() {
            match rx.recv_timeout(IDLE_WAIT) {
                Ok(chunk) => self.buffer.extend_from_slice(&chunk),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => ended = true,
            }
        }

        let lines = split_complete_lines(&mut self.buffer);
        let count = lines.len();
        if count > 0 {
            let out = ctx.output::<String>(0)?;
            for line in lines {
                if out.send(line).is_err() {
                    debug!("[{}] No consumer left for lines", self.name);
                    break;
                }
            }
            self.lines_forwarded += count as u64;
        }

        if ended {
            return Err(WorkError::Shutdown);
        }
        Ok(count)
    }

    fn on_shutdown(&mut self, _ctx: &StageContext<'_>) -> WorkResult<()> {
        if !self.buffer.is_empty() {
            debug!(
                "[{}] Discarding {} bytes of incomplete line",
                self.name,
                self.buffer.len()
            );
            self.buffer.clear();
        }
        debug!("[{}] Forwarded {} lines", self.name, self.lines_forwarded);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::node::{InputPort, OutputPort, StageStop};
    use crate::runtime::sender::{ChannelMessage, Sender};
    use crossbeam_channel::unbounded;

    #[test]
    fn test_split_keeps_remainder() {
        let mut buffer = b"A\nB\nC".to_vec();
        assert_eq!(split_complete_lines(&mut buffer), vec!["A", "B"]);
        assert_eq!(buffer, b"C");
    }

    #[test]
    fn test_split_without_newline_is_noop() {
        let mut buffer = b"partial".to_vec();
        assert!(split_complete_lines(&mut buffer).is_empty());
        assert_eq!(buffer, b"partial");
    }

    #[test]
    fn test_single_newline_yields_one_line() {
        let mut buffer = b"C\n".to_vec();
        assert_eq!(split_complete_lines(&mut buffer), vec!["C"]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_empty_lines_and_invalid_utf8() {
        let mut buffer = b"\n\xffok\n".to_vec();
        assert_eq!(split_complete_lines(&mut buffer), vec!["", "\u{fffd}ok"]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_multibyte_character_split_across_chunks() {
        let bytes = "temp=21\u{b0}C\n".as_bytes();
        let mut buffer = bytes[..8].to_vec();
        assert!(split_complete_lines(&mut buffer).is_empty());
        buffer.extend_from_slice(&bytes[8..]);
        assert_eq!(split_complete_lines(&mut buffer), vec!["temp=21\u{b0}C"]);
    }

    #[test]
    fn test_stage_reassembles_chunks_and_drops_partial_at_end() {
        let (in_tx, in_rx) = unbounded();
        let (out_tx, out_rx) = unbounded();
        for chunk in ["1,2", ",3\n4,5,6\n7,"] {
            in_tx.send(ChannelMessage::Sample(chunk.as_bytes().to_vec())).unwrap();
        }
        in_tx.send(ChannelMessage::EndOfStream).unwrap();

        let inputs = [InputPort::new(in_rx)];
        let outputs = [OutputPort::new(Sender::new(vec![out_tx]))];
        let stop = StageStop::standalone();
        let ctx = StageContext::new(&inputs, &outputs, &stop);

        let mut splitter = LineSplitter::new();
        assert!(matches!(splitter.work(&ctx), Err(WorkError::Shutdown)));
        assert_eq!(splitter.pending(), b"7,");
        splitter.on_shutdown(&ctx).unwrap();
        assert!(splitter.pending().is_empty());

        let lines: Vec<String> = out_rx
            .try_iter()
            .filter_map(|m| match m {
                ChannelMessage::Sample(line) => Some(line),
                ChannelMessage::EndOfStream => None,
            })
            .collect();
        assert_eq!(lines, vec!["1,2,3", "4,5,6"]);
    }
}
