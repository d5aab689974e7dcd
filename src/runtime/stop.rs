//! Cooperative stop signalling
//!
//! A [`StopSignal`] is a monotonic flag paired with a wake channel. Triggering
//! the signal sets the flag and drops the only sender of the wake channel, so
//! every thread selecting on it (a blocked `recv()` or a delay between
//! iterations) returns immediately.
//!
//! Each stage owns one signal and shares a second, pipeline-wide abort
//! signal with every other stage. [`StageStop`] combines the two.

use crossbeam_channel::{Receiver as CrossbeamReceiver, Select, Sender as CrossbeamSender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Monotonic stop flag with a wake channel for blocked waiters
pub struct StopSignal {
    flag: AtomicBool,
    trigger: Mutex<Option<CrossbeamSender<()>>>,
    wake: CrossbeamReceiver<()>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::bounded(0);
        Self {
            flag: AtomicBool::new(false),
            trigger: Mutex::new(Some(tx)),
            wake: rx,
        }
    }

    /// Set the flag and wake every waiter. Calling it again is a no-op.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        if let Ok(mut guard) = self.trigger.lock() {
            guard.take();
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Channel that disconnects once the signal is triggered.
    /// Never carries a value; only useful inside a `Select`.
    pub fn wake_channel(&self) -> &CrossbeamReceiver<()> {
        &self.wake
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// The stop view handed to a running stage: its own signal plus the
/// pipeline-wide abort signal.
#[derive(Clone)]
pub struct StageStop {
    own: Arc<StopSignal>,
    pipeline: Arc<StopSignal>,
}

impl StageStop {
    pub fn new(own: Arc<StopSignal>, pipeline: Arc<StopSignal>) -> Self {
        Self { own, pipeline }
    }

    /// A stop view not attached to any scheduler (tests, manual driving)
    pub fn standalone() -> Self {
        Self::new(Arc::new(StopSignal::new()), Arc::new(StopSignal::new()))
    }

    pub fn is_stopped(&self) -> bool {
        self.own.is_triggered() || self.pipeline.is_triggered()
    }

    /// Request termination of this stage only
    pub fn request_stop(&self) {
        self.own.trigger();
    }

    /// Request termination of every stage sharing the pipeline signal
    pub fn abort_pipeline(&self) {
        self.pipeline.trigger();
    }

    /// Sleep for `duration` unless stopped first.
    /// Returns true if the stage has been asked to stop.
    pub fn sleep(&self, duration: Duration) -> bool {
        if self.is_stopped() {
            return true;
        }
        let mut sel = Select::new();
        let own = sel.recv(self.own.wake_channel());
        sel.recv(self.pipeline.wake_channel());
        match sel.select_timeout(duration) {
            Ok(oper) => {
                if oper.index() == own {
                    let _ = oper.recv(self.own.wake_channel());
                } else {
                    let _ = oper.recv(self.pipeline.wake_channel());
                }
                true
            }
            Err(_) => self.is_stopped(),
        }
    }

    pub(crate) fn own_wake(&self) -> &CrossbeamReceiver<()> {
        self.own.wake_channel()
    }

    pub(crate) fn pipeline_wake(&self) -> &CrossbeamReceiver<()> {
        self.pipeline.wake_channel()
    }
}

/// Cloneable handle that requests an orchestrated shutdown from any thread
/// (signal handlers, UI callbacks).
#[derive(Clone)]
pub struct StopHandle {
    stages: Vec<(String, Arc<StopSignal>)>,
    pipeline: Arc<StopSignal>,
}

impl StopHandle {
    pub(crate) fn new(stages: Vec<(String, Arc<StopSignal>)>, pipeline: Arc<StopSignal>) -> Self {
        Self { stages, pipeline }
    }

    /// Trigger every stage's stop signal in startup order
    pub fn request_stop(&self) {
        for (name, signal) in &self.stages {
            tracing::debug!("[{}] Stop requested", name);
            signal.trigger();
        }
    }

    /// True once all stages were asked to stop or a stage aborted the pipeline
    pub fn is_stopped(&self) -> bool {
        self.pipeline.is_triggered() || self.stages.iter().all(|(_, s)| s.is_triggered())
    }

    /// True if a stage failed and aborted the pipeline
    pub fn is_aborted(&self) -> bool {
        self.pipeline.is_triggered()
    }
}
