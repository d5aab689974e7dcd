//! Thread-per-stage scheduler
//!
//! Spawns a dedicated, named thread for each stage and manages its lifecycle:
//!
//! 1. The stage thread calls `work()` in a loop until its stop signal is
//!    triggered, the stage reports completion, or `work()` returns an error.
//! 2. `on_shutdown()` runs unconditionally, then every output is closed with
//!    an end-of-stream sentinel so downstream stages blocked on `recv()` wake.
//! 3. A fatal error (or a panic) in any stage triggers the pipeline-wide
//!    abort signal so no stage is left running.
//!
//! `stop()` requests termination of every stage in startup order and
//! `wait()` joins them in the same order.

use super::errors::{PipelineError, WorkError};
use super::node::{ProcessNode, StageContext};
use super::ports::{InputPort, OutputPort};
use super::stop::{StageStop, StopHandle, StopSignal};
use super::watchdog::Watchdog;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// How a stage's loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// The stage finished on its own (upstream ended or `should_stop()`)
    Completed,
    /// The stage observed a stop request
    Stopped,
    /// The stage hit a fatal error or panicked
    Failed(String),
}

/// Per-stage summary returned by `Scheduler::wait`
#[derive(Debug, Clone)]
pub struct StageReport {
    pub name: String,
    pub items: usize,
    pub outcome: StageOutcome,
}

/// Summary of a finished pipeline, in startup order
#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    pub stages: Vec<StageReport>,
}

impl PipelineReport {
    pub fn stage(&self, name: &str) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// First stage that failed, if any
    pub fn first_failure(&self) -> Option<&StageReport> {
        self.stages
            .iter()
            .find(|s| matches!(s.outcome, StageOutcome::Failed(_)))
    }
}

impl fmt::Display for PipelineReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for stage in &self.stages {
            writeln!(f, "{}: {} items, {:?}", stage.name, stage.items, stage.outcome)?;
        }
        Ok(())
    }
}

struct StageThread {
    name: String,
    stop: Arc<StopSignal>,
    handle: JoinHandle<StageReport>,
}

/// Aborts the pipeline if the stage thread unwinds
struct PanicGuard {
    stop: StageStop,
}

impl Drop for PanicGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            self.stop.abort_pipeline();
        }
    }
}

/// Runtime scheduler that executes a pipeline
pub struct Scheduler {
    stages: Vec<StageThread>,
    pipeline_stop: Arc<StopSignal>,
    watchdog: Watchdog,
    watchdog_handle: Option<JoinHandle<()>>,
}

impl Scheduler {
    /// Create a new scheduler with watchdog monitoring
    pub fn new() -> Self {
        Self::with_watchdog(Watchdog::new())
    }

    pub fn with_watchdog(watchdog: Watchdog) -> Self {
        let watchdog_handle = match watchdog.start_monitoring_thread() {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("Watchdog thread could not be started: {}", e);
                None
            }
        };
        Self {
            stages: Vec::new(),
            pipeline_stop: Arc::new(StopSignal::new()),
            watchdog,
            watchdog_handle,
        }
    }

    /// Get a reference to the watchdog
    pub fn watchdog(&self) -> &Watchdog {
        &self.watchdog
    }

    /// Start a stage in its own thread, named `name` in logs and reports
    pub fn start_process(
        &mut self,
        name: impl Into<String>,
        mut node: Box<dyn ProcessNode>,
        inputs: Vec<InputPort>,
        outputs: Vec<OutputPort>,
    ) -> Result<(), PipelineError> {
        let name = name.into();
        let own_stop = Arc::new(StopSignal::new());
        let stop = StageStop::new(Arc::clone(&own_stop), Arc::clone(&self.pipeline_stop));
        let inputs: Vec<InputPort> = inputs.into_iter().map(|p| p.with_stop(stop.clone())).collect();
        let thread_name = name.clone();

        debug!("Starting stage: {}", name);

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let _panic_guard = PanicGuard { stop: stop.clone() };
                let ctx = StageContext::new(&inputs, &outputs, &stop);
                let mut items_produced = 0usize;

                let mut outcome = loop {
                    if stop.is_stopped() {
                        break StageOutcome::Stopped;
                    }
                    if node.should_stop() {
                        break StageOutcome::Completed;
                    }

                    match node.work(&ctx) {
                        Ok(n) => items_produced += n,
                        Err(WorkError::Shutdown) => {
                            break if stop.is_stopped() {
                                StageOutcome::Stopped
                            } else {
                                StageOutcome::Completed
                            };
                        }
                        Err(e) => {
                            error!("[{}] Work error: {}", thread_name, e);
                            stop.abort_pipeline();
                            break StageOutcome::Failed(e.to_string());
                        }
                    }
                };

                if let Err(e) = node.on_shutdown(&ctx) {
                    error!("[{}] Shutdown error: {}", thread_name, e);
                    if !matches!(outcome, StageOutcome::Failed(_)) {
                        outcome = StageOutcome::Failed(e.to_string());
                    }
                }

                // Sentinel for downstream stages blocked on recv()
                for output in &outputs {
                    output.close();
                }

                info!(
                    "[{}] Shutdown ({:?}). Produced {} items.",
                    thread_name, outcome, items_produced
                );

                StageReport {
                    name: thread_name,
                    items: items_produced,
                    outcome,
                }
            })
            .map_err(|source| PipelineError::Spawn {
                stage: name.clone(),
                source,
            })?;

        self.stages.push(StageThread {
            name,
            stop: own_stop,
            handle,
        });
        Ok(())
    }

    /// Handle that can request shutdown from another thread
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle::new(
            self.stages
                .iter()
                .map(|s| (s.name.clone(), Arc::clone(&s.stop)))
                .collect(),
            Arc::clone(&self.pipeline_stop),
        )
    }

    /// Signal every stage to stop, in startup order
    pub fn stop(&self) {
        self.stop_handle().request_stop();
    }

    /// Signal a single stage to stop. Returns false if no such stage exists.
    pub fn stop_stage(&self, name: &str) -> bool {
        match self.stages.iter().find(|s| s.name == name) {
            Some(stage) => {
                stage.stop.trigger();
                true
            }
            None => false,
        }
    }

    /// True if a stage failed and aborted the pipeline
    pub fn is_aborted(&self) -> bool {
        self.pipeline_stop.is_triggered()
    }

    /// True once every stage thread has returned
    pub fn is_finished(&self) -> bool {
        self.stages.iter().all(|s| s.handle.is_finished())
    }

    /// Join every stage in startup order.
    ///
    /// Returns the per-stage report, or `StageFailed` naming the first stage
    /// (in startup order) that failed.
    pub fn wait(mut self) -> Result<PipelineReport, PipelineError> {
        let total = self.stages.len();
        info!("Waiting for {} stages to complete...", total);

        let mut report = PipelineReport::default();
        for (i, stage) in self.stages.drain(..).enumerate() {
            let stage_report = match stage.handle.join() {
                Ok(r) => {
                    info!("[{}] Thread completed ({}/{})", r.name, i + 1, total);
                    r
                }
                Err(e) => {
                    let reason = panic_message(&e);
                    error!("[{}] Thread panicked ({}/{}): {}", stage.name, i + 1, total, reason);
                    StageReport {
                        name: stage.name,
                        items: 0,
                        outcome: StageOutcome::Failed(format!("panicked: {}", reason)),
                    }
                }
            };
            report.stages.push(stage_report);
        }

        info!("All {} stages completed", total);

        self.watchdog.stop();
        if let Some(handle) = self.watchdog_handle.take() {
            let _ = handle.join();
        }

        match report.first_failure() {
            Some(StageReport {
                name,
                outcome: StageOutcome::Failed(reason),
                ..
            }) => Err(PipelineError::StageFailed {
                stage: name.clone(),
                reason: reason.clone(),
            }),
            _ => Ok(report),
        }
    }

    /// Get the number of running stages
    pub fn num_threads(&self) -> usize {
        self.stages.len()
    }

    /// Get the names of all stages in startup order
    pub fn thread_names(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.name.clone()).collect()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(e: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = e.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = e.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
