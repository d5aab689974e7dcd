//! Broadcast sender with watchdog monitoring for blocked sends

use crossbeam_channel::{SendError, Sender as CrossbeamSender, TrySendError};
use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::watchdog::{OperationGuard, WatchdogHandle};

/// Channel message wrapper for end-of-stream signaling
///
/// Wraps data flowing through queues so a stage can explicitly signal that
/// no more data will be sent. Every stage sends `EndOfStream` on all of its
/// outputs when it exits; this is the sentinel that wakes a downstream stage
/// blocked on `recv()`.
///
/// Stages never see this enum directly: `Sender::send()` wraps values in
/// `Sample(T)` and `Receiver::recv()` unwraps them transparently.
#[derive(Clone, Debug)]
pub enum ChannelMessage<T> {
    /// A payload
    Sample(T),
    /// End-of-stream marker: no more data will be sent
    EndOfStream,
}

/// What a sender does when a bounded queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Block the producing stage until the consumer catches up
    #[default]
    Block,
    /// Drop the newest payload for that destination only
    DropNewest,
}

/// Capacity of a single queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueCapacity {
    #[default]
    Unbounded,
    Bounded(usize, OverflowPolicy),
}

impl QueueCapacity {
    pub fn overflow(&self) -> OverflowPolicy {
        match self {
            QueueCapacity::Unbounded => OverflowPolicy::Block,
            QueueCapacity::Bounded(_, policy) => *policy,
        }
    }
}

/// One queue fed by a broadcast sender
pub(crate) struct Destination<T> {
    pub(crate) tx: CrossbeamSender<ChannelMessage<T>>,
    pub(crate) overflow: OverflowPolicy,
}

impl<T> Clone for Destination<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            overflow: self.overflow,
        }
    }
}

/// Broadcast sender that sends to one or more consumers
///
/// Fan-out: every destination receives its own clone of the payload, in
/// send order. A destination whose consumer has gone away is skipped; a send
/// only fails when no destination accepted the payload.
///
/// Includes watchdog monitoring to detect blocked sends on bounded queues.
pub struct Sender<T> {
    destinations: Vec<Destination<T>>,
    dropped: Arc<AtomicU64>,
    watchdog_handle: Option<WatchdogHandle>,
}

impl<T: Clone> Sender<T> {
    /// Create a sender that blocks on every (unbounded) destination
    pub fn new(destinations: Vec<CrossbeamSender<ChannelMessage<T>>>) -> Self {
        Self::with_policies(
            destinations
                .into_iter()
                .map(|tx| (tx, OverflowPolicy::Block))
                .collect(),
        )
    }

    /// Create a sender with a per-destination overflow policy
    pub fn with_policies(destinations: Vec<(CrossbeamSender<ChannelMessage<T>>, OverflowPolicy)>) -> Self {
        Self {
            destinations: destinations
                .into_iter()
                .map(|(tx, overflow)| Destination { tx, overflow })
                .collect(),
            dropped: Arc::new(AtomicU64::new(0)),
            watchdog_handle: None,
        }
    }

    /// Attach a watchdog handle to monitor send operations
    pub fn with_watchdog(&self, watchdog_handle: WatchdogHandle) -> Self {
        Self {
            destinations: self.destinations.clone(),
            dropped: Arc::clone(&self.dropped),
            watchdog_handle: Some(watchdog_handle),
        }
    }

    /// Get the number of broadcast destinations
    pub fn num_destinations(&self) -> usize {
        self.destinations.len()
    }

    /// Payloads dropped because a `DropNewest` destination was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Send a value to all destinations
    pub fn send(&self, value: T) -> Result<(), SendError<T>> {
        if self.destinations.is_empty() {
            return Ok(());
        }

        let _guard = self.watchdog_handle.as_ref().map(OperationGuard::new);

        let mut any_success = false;
        let mut last_error = None;

        for dest in &self.destinations {
            let msg = ChannelMessage::Sample(value.clone());
            let result = match dest.overflow {
                OverflowPolicy::Block => dest.tx.send(msg).map_err(|SendError(m)| m),
                OverflowPolicy::DropNewest => match dest.tx.try_send(msg) {
                    Ok(()) => Ok(()),
                    Err(TrySendError::Full(_)) => {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        tracing::trace!("Destination queue full, payload dropped");
                        // The queue is alive, only this payload is lost
                        any_success = true;
                        continue;
                    }
                    Err(TrySendError::Disconnected(m)) => Err(m),
                },
            };

            match result {
                Ok(()) => any_success = true,
                Err(ChannelMessage::Sample(v)) => last_error = Some(SendError(v)),
                Err(ChannelMessage::EndOfStream) => {}
            }
        }

        // Only fail if no destination succeeded
        if !any_success && let Some(e) = last_error {
            return Err(e);
        }

        Ok(())
    }

    /// Signal end-of-stream to all destinations
    ///
    /// Never blocks: a full bounded queue is left to disconnect when the
    /// sender is dropped.
    pub fn close(&self) {
        for dest in &self.destinations {
            let _ = dest.tx.try_send(ChannelMessage::EndOfStream);
        }
    }

    /// Check if this sender has any connected receivers
    pub fn is_connected(&self) -> bool {
        !self.destinations.is_empty()
    }
}

impl<T: Clone> Clone for Sender<T> {
    fn clone(&self) -> Self {
        Self {
            destinations: self.destinations.clone(),
            dropped: Arc::clone(&self.dropped),
            watchdog_handle: self.watchdog_handle.clone(),
        }
    }
}

/// Type-erased view of a `Sender<T>` so the scheduler can close outputs
/// without knowing their payload type
pub(crate) trait ErasedSender: Send {
    fn close(&self);
    fn as_any(&self) -> &dyn Any;
}

impl<T: Clone + Send + 'static> ErasedSender for Sender<T> {
    fn close(&self) {
        Sender::close(self);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
