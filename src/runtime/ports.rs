//! Port-based API for stage connections
//!
//! `InputPort` and `OutputPort` are type-erased wrappers around queue
//! endpoints. The `Pipeline` builder creates them at build time; a stage
//! recovers the typed endpoint with `get::<T>()`.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::atomic::AtomicBool;

use crossbeam_channel::Receiver as CrossbeamReceiver;

// Error types live in the errors module
pub use super::errors::ConnectionError;

pub use super::pipeline::Pipeline;
pub use super::receiver::Receiver;
pub use super::sender::{ChannelMessage, Sender};
use super::sender::ErasedSender;
pub use super::stop::StageStop;
pub use super::type_registry::register_type;
pub use super::watchdog::{Operation, Watchdog, WatchdogHandle};

/// Direction of a port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    Input,
    Output,
}

/// Schema describing a port's metadata
#[derive(Debug, Clone)]
pub struct PortSchema {
    pub name: String,
    pub type_id: TypeId,
    pub type_name: &'static str,
    pub index: usize,
    pub direction: PortDirection,
}

impl PortSchema {
    /// Create a new port schema with type information
    pub fn new<T: 'static>(name: impl Into<String>, index: usize, direction: PortDirection) -> Self {
        Self {
            name: name.into(),
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            index,
            direction,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Type-erased port wrappers
// ────────────────────────────────────────────────────────────────────────────

/// Type-erased input port wrapping a `crossbeam_channel::Receiver<ChannelMessage<T>>`
pub struct InputPort {
    channel: Option<Box<dyn Any + Send>>,
    eos: AtomicBool,
    watchdog_handle: Option<WatchdogHandle>,
    stop: Option<StageStop>,
}

impl InputPort {
    /// Create from a type-erased receiver (for internal use by Pipeline)
    pub(crate) fn from_type_erased(channel: Box<dyn Any + Send>) -> Self {
        Self {
            channel: Some(channel),
            eos: AtomicBool::new(false),
            watchdog_handle: None,
            stop: None,
        }
    }

    /// An input nothing is connected to
    pub(crate) fn unconnected() -> Self {
        Self {
            channel: None,
            eos: AtomicBool::new(false),
            watchdog_handle: None,
            stop: None,
        }
    }

    /// Create a typed input port directly (tests, manual wiring)
    pub fn new<T: Send + 'static>(receiver: CrossbeamReceiver<ChannelMessage<T>>) -> Self {
        Self::from_type_erased(Box::new(receiver))
    }

    /// Set watchdog context for this port
    pub(crate) fn with_watchdog(mut self, watchdog: &Watchdog, stage_name: &str, port_name: &str) -> Self {
        self.watchdog_handle = Some(watchdog.register_port(stage_name, Operation::Recv, port_name));
        self
    }

    /// Make blocking receives on this port cancellable by `stop`
    pub(crate) fn with_stop(mut self, stop: StageStop) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_some()
    }

    /// Get a typed receiver.
    ///
    /// Returns None if the port is unconnected or carries another payload type.
    pub fn get<T: Send + 'static>(&self) -> Option<Receiver<'_, T>> {
        let receiver = self
            .channel
            .as_ref()?
            .downcast_ref::<CrossbeamReceiver<ChannelMessage<T>>>()?;
        let mut rx = Receiver::new(receiver, &self.eos);
        if let Some(handle) = &self.watchdog_handle {
            rx = rx.with_watchdog(handle.clone());
        }
        if let Some(stop) = &self.stop {
            rx = rx.with_stop(stop);
        }
        Some(rx)
    }
}

impl fmt::Debug for InputPort {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "InputPort(connected={})", self.is_connected())
    }
}

/// Type-erased output port wrapping a broadcast `Sender<T>`
pub struct OutputPort {
    channel: Box<dyn ErasedSender>,
    watchdog_handle: Option<WatchdogHandle>,
}

impl OutputPort {
    /// Create from a type-erased sender (for internal use by Pipeline)
    pub(crate) fn from_type_erased(channel: Box<dyn ErasedSender>) -> Self {
        Self {
            channel,
            watchdog_handle: None,
        }
    }

    /// Create a typed output port directly (tests, manual wiring)
    pub fn new<T: Send + Clone + 'static>(sender: Sender<T>) -> Self {
        Self::from_type_erased(Box::new(sender))
    }

    /// Set watchdog context for this port
    pub(crate) fn with_watchdog(mut self, watchdog: &Watchdog, stage_name: &str, port_name: &str) -> Self {
        self.watchdog_handle = Some(watchdog.register_port(stage_name, Operation::Send, port_name));
        self
    }

    /// Get a typed sender (cheaply cloned from internal storage).
    ///
    /// Returns None if the port carries another payload type.
    pub fn get<T: Send + Clone + 'static>(&self) -> Option<Sender<T>> {
        let sender = self.channel.as_any().downcast_ref::<Sender<T>>()?;
        Some(match &self.watchdog_handle {
            Some(handle) => sender.with_watchdog(handle.clone()),
            None => sender.clone(),
        })
    }

    /// Send end-of-stream to every destination
    pub fn close(&self) {
        self.channel.close();
    }
}

impl fmt::Debug for OutputPort {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "OutputPort")
    }
}
