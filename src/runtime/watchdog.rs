//! Queue operation watchdog
//!
//! Low-overhead monitoring using atomic timestamps instead of locks.
//! Each receiver/sender stores its operation start time in an atomic variable,
//! and the watchdog periodically scans these timestamps.
//!
//! A send blocked on a full bounded queue is a real stall and is reported at
//! warn level. A receive blocked for a long time usually means the serial
//! line is quiet, so it is only reported at debug level.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

use super::stop::StopSignal;

/// Default time an operation may block before it is reported
pub const DEFAULT_BLOCKED_THRESHOLD: Duration = Duration::from_secs(5);

/// Timestamp in milliseconds since UNIX_EPOCH
#[inline(always)]
fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

/// Operation tracked by a port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Recv,
    Send,
}

impl Operation {
    fn as_str(&self) -> &'static str {
        match self {
            Operation::Recv => "recv",
            Operation::Send => "send",
        }
    }
}

/// Shared state for a single port's operation tracking
struct PortState {
    /// Timestamp (ms since epoch) when current operation started, or 0 if idle
    last_op_start: AtomicU64,
    /// Already reported for the current operation
    has_warned: AtomicBool,
    stage_name: String,
    port_name: String,
    operation: Operation,
}

/// Handle to a port's watchdog state (held by receiver/sender wrappers)
#[derive(Clone)]
pub struct WatchdogHandle {
    state: Arc<PortState>,
}

impl WatchdogHandle {
    /// Mark the start of a blocking operation
    #[inline(always)]
    pub fn start_operation(&self) {
        self.state.last_op_start.store(now_millis(), Ordering::Relaxed);
        self.state.has_warned.store(false, Ordering::Relaxed);
    }

    /// Mark the end of a blocking operation
    #[inline(always)]
    pub fn finish_operation(&self) {
        if self.state.has_warned.swap(false, Ordering::Relaxed)
            && self.state.operation == Operation::Send
        {
            info!(
                "UNBLOCKED: [{}] {} on port '{}'",
                self.state.stage_name,
                self.state.operation.as_str(),
                self.state.port_name
            );
        }
        self.state.last_op_start.store(0, Ordering::Relaxed);
    }
}

/// Shared watchdog state
#[derive(Clone)]
pub struct Watchdog {
    ports: Arc<Mutex<Vec<Weak<PortState>>>>,
    stop: Arc<StopSignal>,
    threshold: Duration,
}

impl Watchdog {
    pub fn new() -> Self {
        Self::with_threshold(DEFAULT_BLOCKED_THRESHOLD)
    }

    pub fn with_threshold(threshold: Duration) -> Self {
        Self {
            ports: Arc::new(Mutex::new(Vec::new())),
            stop: Arc::new(StopSignal::new()),
            threshold,
        }
    }

    /// Register a new port for monitoring
    pub fn register_port(
        &self,
        stage_name: &str,
        operation: Operation,
        port_name: &str,
    ) -> WatchdogHandle {
        let state = Arc::new(PortState {
            last_op_start: AtomicU64::new(0),
            has_warned: AtomicBool::new(false),
            stage_name: stage_name.to_string(),
            port_name: port_name.to_string(),
            operation,
        });

        if let Ok(mut ports) = self.ports.lock() {
            ports.push(Arc::downgrade(&state));
        }

        WatchdogHandle { state }
    }

    /// Report operations blocked longer than the threshold.
    /// Returns the number of newly reported operations.
    pub fn check_for_blocked(&self) -> usize {
        let now = now_millis();
        let threshold_ms = self.threshold.as_millis() as u64;
        let mut reported = 0;

        let Ok(mut ports) = self.ports.lock() else {
            return 0;
        };

        // Remove dead weak references and check live ones
        ports.retain(|weak| {
            let Some(state) = weak.upgrade() else {
                return false;
            };
            let start = state.last_op_start.load(Ordering::Relaxed);
            if start > 0 {
                let duration_ms = now.saturating_sub(start);
                if duration_ms > threshold_ms && !state.has_warned.swap(true, Ordering::Relaxed) {
                    reported += 1;
                    match state.operation {
                        Operation::Send => warn!(
                            "BLOCKED: [{}] send on port '{}' for {:.1}s",
                            state.stage_name,
                            state.port_name,
                            duration_ms as f64 / 1000.0
                        ),
                        Operation::Recv => debug!(
                            "[{}] idle on port '{}' for {:.1}s",
                            state.stage_name,
                            state.port_name,
                            duration_ms as f64 / 1000.0
                        ),
                    }
                }
            }
            true
        });

        reported
    }

    /// Start the watchdog monitoring thread
    pub fn start_monitoring_thread(&self) -> std::io::Result<JoinHandle<()>> {
        let watchdog = self.clone();
        std::thread::Builder::new()
            .name("watchdog".to_string())
            .spawn(move || {
                let wake = watchdog.stop.wake_channel();
                // recv_timeout returns Disconnected once stop() is called
                while let Err(crossbeam_channel::RecvTimeoutError::Timeout) =
                    wake.recv_timeout(Duration::from_secs(1))
                {
                    watchdog.check_for_blocked();
                }
            })
    }

    /// Stop the watchdog monitoring thread
    pub fn stop(&self) {
        self.stop.trigger();
    }
}

impl Default for Watchdog {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for tracking an operation (just atomic stores)
pub struct OperationGuard<'a> {
    handle: &'a WatchdogHandle,
}

impl<'a> OperationGuard<'a> {
    #[inline(always)]
    pub fn new(handle: &'a WatchdogHandle) -> Self {
        handle.start_operation();
        Self { handle }
    }
}

impl Drop for OperationGuard<'_> {
    #[inline(always)]
    fn drop(&mut self) {
        self.handle.finish_operation();
    }
}
