//! Stage trait for streaming processing
//!
//! Defines the `ProcessNode` trait that every pipeline stage implements.
//! The scheduler calls `work()` repeatedly on the stage's own thread until
//! the stage is asked to stop, then calls `on_shutdown()` exactly once.

use std::time::Duration;

// Error types live in the errors module
pub use super::errors::{WorkError, WorkResult};

// Re-export port types (now defined in ports module)
pub use super::ports::{InputPort, OutputPort, PortSchema};

// Re-export channel types (now defined in sender/receiver modules)
pub use super::receiver::Receiver;
pub use super::sender::Sender;
pub use super::stop::StageStop;

/// Everything a stage can touch while running: its bound ports and its stop view
pub struct StageContext<'a> {
    pub inputs: &'a [InputPort],
    pub outputs: &'a [OutputPort],
    pub stop: &'a StageStop,
}

impl<'a> StageContext<'a> {
    pub fn new(inputs: &'a [InputPort], outputs: &'a [OutputPort], stop: &'a StageStop) -> Self {
        Self {
            inputs,
            outputs,
            stop,
        }
    }

    /// Typed receiver for a required input
    pub fn input<T: Send + 'static>(&self, index: usize) -> WorkResult<Receiver<'a, T>> {
        self.try_input(index)
            .ok_or_else(|| WorkError::NodeError(format!("Missing input channel {}", index)))
    }

    /// Typed receiver for an optional input (None if unconnected)
    pub fn try_input<T: Send + 'static>(&self, index: usize) -> Option<Receiver<'a, T>> {
        self.inputs.get(index).and_then(|port| port.get::<T>())
    }

    /// Typed broadcast sender for an output. Unconnected outputs yield a
    /// sender with no destinations.
    pub fn output<T: Send + Clone + 'static>(&self, index: usize) -> WorkResult<Sender<T>> {
        self.outputs
            .get(index)
            .and_then(|port| port.get::<T>())
            .ok_or_else(|| WorkError::NodeError(format!("Missing output channel {}", index)))
    }

    /// Cancellable delay. Returns `Err(Shutdown)` if the stage was stopped.
    pub fn sleep(&self, duration: Duration) -> WorkResult<()> {
        if self.stop.sleep(duration) {
            Err(WorkError::Shutdown)
        } else {
            Ok(())
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }
}

/// A pipeline stage
/// - Sources have 0 inputs and N outputs
/// - Sinks have N inputs and 0 outputs
/// - Transforms have N inputs and M outputs
pub trait ProcessNode: Send {
    /// Get a debug name for this stage
    fn name(&self) -> &str;

    /// Check if this stage has finished on its own
    fn should_stop(&self) -> bool {
        false
    }

    /// Number of input ports this stage declares
    fn num_inputs(&self) -> usize;

    /// Number of output ports this stage declares
    fn num_outputs(&self) -> usize;

    /// Schema for all input ports (name + type + index)
    fn input_schema(&self) -> Vec<PortSchema> {
        Vec::new()
    }

    /// Schema for all output ports (name + type + index)
    fn output_schema(&self) -> Vec<PortSchema> {
        Vec::new()
    }

    /// One iteration: read from inputs, process, write to outputs.
    /// Returns Ok(n) where n is the number of items produced.
    /// `Err(WorkError::Shutdown)` ends the stage normally; any other error
    /// is a stage failure.
    fn work(&mut self, ctx: &StageContext<'_>) -> WorkResult<usize>;

    /// Release owned resources. Always called once when the loop ends,
    /// whatever the reason.
    fn on_shutdown(&mut self, _ctx: &StageContext<'_>) -> WorkResult<()> {
        Ok(())
    }
}
