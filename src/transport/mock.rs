//! Scripted transport for tests and dry runs

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::{Transport, not_connected};

/// One scripted outcome of `read()`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockRead {
    /// Bytes returned by one read (split if larger than the read buffer)
    Data(Vec<u8>),
    /// A read that timed out with no data
    Timeout,
    /// A read that fails with this kind
    Error(io::ErrorKind),
}

impl MockRead {
    pub fn data(bytes: impl AsRef<[u8]>) -> Self {
        MockRead::Data(bytes.as_ref().to_vec())
    }
}

#[derive(Debug, Default)]
struct MockState {
    script: VecDeque<MockRead>,
    writes: Vec<Vec<u8>>,
    write_errors: VecDeque<io::ErrorKind>,
    reads: usize,
    closed: bool,
}

/// Test-side view of a [`MockTransport`] that outlives the pipeline
#[derive(Debug, Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockHandle {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue another read outcome
    pub fn push(&self, read: MockRead) {
        self.lock().script.push_back(read);
    }

    /// Fail the next write call with `kind`
    pub fn fail_next_write(&self, kind: io::ErrorKind) {
        self.lock().write_errors.push_back(kind);
    }

    /// Every write, concatenated
    pub fn written(&self) -> Vec<u8> {
        self.lock().writes.concat()
    }

    pub fn write_calls(&self) -> usize {
        self.lock().writes.len()
    }

    /// Number of `read()` calls that returned data
    pub fn reads(&self) -> usize {
        self.lock().reads
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// True once every scripted read has been consumed
    pub fn is_drained(&self) -> bool {
        self.lock().script.is_empty()
    }
}

/// Transport that replays scripted reads and records writes
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    idle: Duration,
    max_write: usize,
}

impl MockTransport {
    pub fn new(script: impl IntoIterator<Item = MockRead>) -> (Self, MockHandle) {
        let state = Arc::new(Mutex::new(MockState {
            script: script.into_iter().collect(),
            ..MockState::default()
        }));
        let handle = MockHandle {
            state: Arc::clone(&state),
        };
        (
            Self {
                state,
                idle: Duration::from_millis(1),
                max_write: usize::MAX,
            },
            handle,
        )
    }

    /// Replay `data` as a single chunk
    pub fn with_data(data: impl AsRef<[u8]>) -> (Self, MockHandle) {
        Self::new([MockRead::data(data)])
    }

    /// How long a read blocks once the script is exhausted (the read timeout)
    pub fn set_idle(&mut self, idle: Duration) {
        self.idle = idle;
    }

    /// Accept at most `n` bytes per write call
    pub fn set_max_write(&mut self, n: usize) {
        self.max_write = n.max(1);
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Transport for MockTransport {
    fn describe(&self) -> String {
        "mock".to_string()
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        {
            let mut state = self.lock();
            if state.closed {
                return Err(not_connected("mock transport"));
            }
            match state.script.pop_front() {
                Some(MockRead::Data(mut bytes)) => {
                    if bytes.len() > buf.len() {
                        let rest = bytes.split_off(buf.len());
                        state.script.push_front(MockRead::Data(rest));
                    }
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    state.reads += 1;
                    return Ok(bytes.len());
                }
                Some(MockRead::Error(kind)) => {
                    return Err(io::Error::new(kind, "scripted mock error"));
                }
                Some(MockRead::Timeout) | None => {}
            }
        }

        // Timeout or nothing scripted: behave like a read that ran out its timeout
        std::thread::sleep(self.idle);
        Ok(0)
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut state = self.lock();
        if state.closed {
            return Err(not_connected("mock transport"));
        }
        if let Some(kind) = state.write_errors.pop_front() {
            return Err(io::Error::new(kind, "scripted mock write error"));
        }
        let n = data.len().min(self.max_write);
        state.writes.push(data[..n].to_vec());
        Ok(n)
    }

    fn close(&mut self) {
        self.lock().closed = true;
    }

    fn is_open(&self) -> bool {
        !self.lock().closed
    }
}
