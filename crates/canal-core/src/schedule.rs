//! Per-core low-latency scheduler.
//!
//! Each core owns one [`LlScheduler`]. A tick copies every running pipeline
//! scheduled on the core, then every component task (components pinned to
//! this core but scheduled by a pipeline elsewhere) whose task is armed.

use crate::component::{CompId, ComponentRef, PipelineId};
use crate::error::CopyStatus;
use crate::idc::CoreId;
use crate::pipeline::{Pipeline, PipelineError, PipelineStatus};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Outcome of one scheduler tick.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    /// Core that ran the tick.
    pub core: CoreId,
    /// Tick sequence number on that core, starting at 1.
    pub tick: u64,
    /// Pipelines copied.
    pub pipelines: usize,
    /// Component tasks copied.
    pub tasks: usize,
    /// Frames moved by the last component of each pipeline, summed.
    pub frames: u64,
    /// Failures; other pipelines and tasks still ran.
    pub errors: Vec<PipelineError>,
}

/// Scheduler for one core.
#[derive(Debug)]
pub struct LlScheduler {
    core: CoreId,
    pipelines: Mutex<Vec<Arc<Pipeline>>>,
    tasks: Mutex<Vec<ComponentRef>>,
    ticks: AtomicU64,
}

impl LlScheduler {
    /// Empty scheduler for `core`.
    pub fn new(core: CoreId) -> Self {
        Self {
            core,
            pipelines: Mutex::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
            ticks: AtomicU64::new(0),
        }
    }

    /// Core this scheduler runs on.
    pub fn core(&self) -> CoreId {
        self.core
    }

    /// Schedule `pipeline` on this core.
    pub fn add_pipeline(&self, pipeline: Arc<Pipeline>) {
        tracing::debug!(core = self.core.0, pipeline = pipeline.id().0, "pipeline scheduled");
        self.pipelines.lock().push(pipeline);
    }

    /// Stop scheduling a pipeline.
    pub fn remove_pipeline(&self, id: PipelineId) -> Option<Arc<Pipeline>> {
        let mut pipelines = self.pipelines.lock();
        let pos = pipelines.iter().position(|p| p.id() == id)?;
        Some(pipelines.remove(pos))
    }

    /// Register a component task on this core.
    pub fn add_task(&self, comp: ComponentRef) {
        tracing::debug!(core = self.core.0, comp = comp.id().0, "component task registered");
        self.tasks.lock().push(comp);
    }

    /// Drop a component task.
    pub fn remove_task(&self, id: CompId) -> Option<ComponentRef> {
        let mut tasks = self.tasks.lock();
        let pos = tasks.iter().position(|c| c.id() == id)?;
        Some(tasks.remove(pos))
    }

    /// Ticks run so far.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Run one scheduling period on the calling thread.
    pub fn run_once(&self) -> TickReport {
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        let mut report = TickReport {
            core: self.core,
            tick,
            ..TickReport::default()
        };

        let pipelines = self.pipelines.lock().clone();
        for pipeline in pipelines.iter().filter(|p| p.status() == PipelineStatus::Running) {
            match pipeline.copy() {
                Ok(frames) => {
                    report.pipelines += 1;
                    report.frames += u64::from(frames);
                }
                Err(err) => {
                    tracing::warn!(core = self.core.0, pipeline = pipeline.id().0, "copy failed: {err}");
                    report.errors.push(err);
                }
            }
        }

        let tasks = self.tasks.lock().clone();
        for comp in tasks.iter().filter(|c| c.task_scheduled()) {
            match comp.copy() {
                Ok(CopyStatus::Moved(_) | CopyStatus::StopWalk) => report.tasks += 1,
                Err(source) => {
                    tracing::warn!(core = self.core.0, comp = comp.id().0, "task copy failed: {source}");
                    report.errors.push(PipelineError::Component { comp: comp.id(), source });
                }
            }
        }

        tracing::trace!(core = self.core.0, tick, pipelines = report.pipelines, tasks = report.tasks, "tick");
        report
    }
}
