//! Cancellable channel receiver with watchdog monitoring
//!
//! [`Receiver`] wraps a single `crossbeam_channel::Receiver<ChannelMessage<T>>`.
//! It transparently unwraps `ChannelMessage` and caches end-of-stream state so
//! subsequent calls return `Shutdown` / `Disconnected`.
//!
//! When the receiver belongs to a running stage, every blocking wait also
//! selects on the stage's stop signals, so a stage blocked on an idle queue
//! still observes its termination request.

use crossbeam_channel::{
    Receiver as CrossbeamReceiver, RecvTimeoutError, Select, SelectedOperation, TryRecvError,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::errors::{WorkError, WorkResult};
use super::sender::ChannelMessage;
use super::stop::StageStop;
use super::watchdog::{OperationGuard, WatchdogHandle};

/// Outcome of one cancellable wait
enum Waited<T> {
    Item(T),
    Ended,
    Stopped,
    TimedOut,
}

/// A single queue consumer.
pub struct Receiver<'a, T> {
    receiver: &'a CrossbeamReceiver<ChannelMessage<T>>,
    eos: &'a AtomicBool,
    watchdog_handle: Option<WatchdogHandle>,
    stop: Option<&'a StageStop>,
}

impl<'a, T> Receiver<'a, T> {
    pub fn new(receiver: &'a CrossbeamReceiver<ChannelMessage<T>>, eos: &'a AtomicBool) -> Self {
        Self {
            receiver,
            eos,
            watchdog_handle: None,
            stop: None,
        }
    }

    /// Attach a watchdog handle to monitor blocking receives
    pub fn with_watchdog(mut self, watchdog_handle: WatchdogHandle) -> Self {
        self.watchdog_handle = Some(watchdog_handle);
        self
    }

    /// Make blocking receives return `Shutdown` once `stop` is triggered
    pub fn with_stop(mut self, stop: &'a StageStop) -> Self {
        self.stop = Some(stop);
        self
    }

    /// True once end-of-stream was seen or every producer is gone
    pub fn is_ended(&self) -> bool {
        self.eos.load(Ordering::Relaxed)
    }

    /// Blocking receive, waiting indefinitely for a payload.
    ///
    /// Returns `Err(WorkError::Shutdown)` on end-of-stream, on disconnect, or
    /// when the owning stage is asked to stop.
    pub fn recv(&mut self) -> WorkResult<T> {
        match self.wait(None) {
            Waited::Item(item) => Ok(item),
            Waited::Ended => {
                tracing::debug!("Receiver::recv() - end of stream");
                Err(WorkError::Shutdown)
            }
            Waited::Stopped => Err(WorkError::Shutdown),
            // No deadline was given
            Waited::TimedOut => Err(WorkError::Shutdown),
        }
    }

    /// Receive with a timeout. A stop request is reported as `Disconnected`.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Result<T, RecvTimeoutError> {
        match self.wait(Some(timeout)) {
            Waited::Item(item) => Ok(item),
            Waited::TimedOut => Err(RecvTimeoutError::Timeout),
            Waited::Ended | Waited::Stopped => Err(RecvTimeoutError::Disconnected),
        }
    }

    /// Try to receive without blocking.
    ///
    /// `Empty` is the transient "nothing right now" signal; `Disconnected`
    /// means the stream has ended.
    pub fn try_recv(&mut self) -> Result<T, TryRecvError> {
        if self.is_ended() {
            return Err(TryRecvError::Disconnected);
        }

        match self.receiver.try_recv() {
            Ok(ChannelMessage::Sample(item)) => Ok(item),
            Ok(ChannelMessage::EndOfStream) => {
                self.eos.store(true, Ordering::Relaxed);
                Err(TryRecvError::Disconnected)
            }
            Err(TryRecvError::Disconnected) => {
                self.eos.store(true, Ordering::Relaxed);
                Err(TryRecvError::Disconnected)
            }
            Err(TryRecvError::Empty) => Err(TryRecvError::Empty),
        }
    }

    fn wait(&mut self, timeout: Option<Duration>) -> Waited<T> {
        if self.is_ended() {
            return Waited::Ended;
        }

        let _guard = self.watchdog_handle.as_ref().map(OperationGuard::new);

        let Some(stop) = self.stop else {
            let result = match timeout {
                Some(t) => self.receiver.recv_timeout(t),
                None => self.receiver.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            return match result {
                Ok(msg) => self.unwrap_message(Ok(msg)),
                Err(RecvTimeoutError::Timeout) => Waited::TimedOut,
                Err(RecvTimeoutError::Disconnected) => self.unwrap_message(Err(())),
            };
        };

        if stop.is_stopped() {
            return Waited::Stopped;
        }

        let mut sel = Select::new();
        let data = sel.recv(self.receiver);
        let own = sel.recv(stop.own_wake());
        sel.recv(stop.pipeline_wake());

        let oper = match timeout {
            Some(t) => match sel.select_timeout(t) {
                Ok(oper) => oper,
                Err(_) => return Waited::TimedOut,
            },
            None => sel.select(),
        };

        let index = oper.index();
        if index == data {
            let msg = oper.recv(self.receiver).map_err(|_| ());
            self.unwrap_message(msg)
        } else {
            Self::complete_wake(oper, if index == own { stop.own_wake() } else { stop.pipeline_wake() });
            Waited::Stopped
        }
    }

    fn complete_wake(oper: SelectedOperation<'_>, wake: &CrossbeamReceiver<()>) {
        let _ = oper.recv(wake);
    }

    fn unwrap_message(&self, msg: Result<ChannelMessage<T>, ()>) -> Waited<T> {
        match msg {
            Ok(ChannelMessage::Sample(item)) => Waited::Item(item),
            Ok(ChannelMessage::EndOfStream) | Err(()) => {
                self.eos.store(true, Ordering::Relaxed);
                Waited::Ended
            }
        }
    }
}
