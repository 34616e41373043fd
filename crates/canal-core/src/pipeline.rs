//! Pipelines: ordered component graphs and the walks that drive them.
//!
//! Components are joined by buffers with [`connect`]. A [`PipelineBuilder`]
//! collects the components scheduled together, sorts them topologically
//! along the buffers between them and produces an immutable [`Pipeline`].
//!
//! Every walk visits components in data-flow order. A component whose
//! in-pipeline producers all stopped the walk (by returning
//! [`Status::StopWalk`] or being skipped themselves) is not visited.

use crate::buffer::{BufferRef, Peer};
use crate::component::{CompId, ComponentRef, PipelineId};
use crate::error::{ComponentError, CopyStatus, Status};
use crate::idc::{CoreId, Idc};
use crate::state::TriggerCmd;
use crate::stream::StreamParams;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use thiserror::Error;

/// Errors from building or walking a pipeline.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PipelineError {
    /// A pipeline needs at least one component.
    #[error("pipeline {0} has no components")]
    Empty(PipelineId),

    /// The buffers between components form a cycle.
    #[error("pipeline {0} contains a cycle")]
    CycleDetected(PipelineId),

    /// A component was added twice.
    #[error("component {0} added twice")]
    DuplicateComponent(CompId),

    /// A component belongs to a different pipeline.
    #[error("component {comp} belongs to {actual}, not {expected}")]
    WrongPipeline {
        /// Offending component.
        comp: CompId,
        /// Pipeline being built.
        expected: PipelineId,
        /// Pipeline the component was created for.
        actual: PipelineId,
    },

    /// The scheduling component is not part of the pipeline.
    #[error("scheduling component {0} is not in the pipeline")]
    UnknownSchedulingComponent(CompId),

    /// A buffer or component could not be connected.
    #[error("cannot connect: {0}")]
    Connect(String),

    /// A component operation failed during a walk.
    #[error("{comp}: {source}")]
    Component {
        /// Component whose operation failed.
        comp: CompId,
        /// Underlying failure.
        #[source]
        source: ComponentError,
    },
}

impl PipelineError {
    /// The component error behind a walk failure.
    pub fn component_error(&self) -> Option<&ComponentError> {
        match self {
            Self::Component { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Join `producer` to `consumer` through `buffer`.
///
/// A buffer whose ends run on different cores marks both components shared.
pub fn connect(producer: &ComponentRef, buffer: &BufferRef, consumer: &ComponentRef) -> Result<(), PipelineError> {
    if Arc::ptr_eq(producer, consumer) {
        return Err(PipelineError::Connect(format!("{} cannot feed itself", producer.id())));
    }
    {
        let guard = buffer.acquire();
        if guard.producer().is_some() || guard.consumer().is_some() {
            return Err(PipelineError::Connect(format!("{} is already connected", buffer.id())));
        }
    }

    buffer.attach_producer(Peer::new(producer.id(), producer.core(), producer.shared_state().clone()));
    buffer.attach_consumer(Peer::new(consumer.id(), consumer.core(), consumer.shared_state().clone()));
    producer.attach_sink(Arc::clone(buffer));
    consumer.attach_source(Arc::clone(buffer));

    if producer.core() != consumer.core() {
        producer.mark_shared();
        consumer.mark_shared();
        tracing::info!(
            buffer = buffer.id().0,
            from = producer.id().0,
            to = consumer.id().0,
            "buffer crosses cores, components shared"
        );
    }

    let wrap = |comp: CompId| move |source: ComponentError| PipelineError::Component { comp, source };
    producer.bind(consumer.id()).map_err(wrap(producer.id()))?;
    consumer.bind(producer.id()).map_err(wrap(consumer.id()))?;
    Ok(())
}

/// Coarse pipeline status, derived from the last successful walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PipelineStatus {
    /// Built or reset.
    Ready = 0,
    /// Prepared or stopped.
    Prepared = 1,
    /// Started; the scheduler copies it every period.
    Running = 2,
    /// Paused.
    Paused = 3,
    /// Stopped by an xrun.
    Xrun = 4,
}

impl PipelineStatus {
    const fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::Prepared,
            2 => Self::Running,
            3 => Self::Paused,
            4 => Self::Xrun,
            _ => Self::Ready,
        }
    }

    const fn after(cmd: TriggerCmd) -> Option<Self> {
        match cmd {
            TriggerCmd::Start | TriggerCmd::Release => Some(Self::Running),
            TriggerCmd::Pause => Some(Self::Paused),
            TriggerCmd::Stop | TriggerCmd::Prepare => Some(Self::Prepared),
            TriggerCmd::Xrun => Some(Self::Xrun),
            TriggerCmd::Reset => Some(Self::Ready),
            TriggerCmd::PreStart | TriggerCmd::PreRelease => None,
        }
    }
}

/// Collects components for a pipeline.
pub struct PipelineBuilder {
    id: PipelineId,
    core: CoreId,
    period_frames: u32,
    components: Vec<ComponentRef>,
    sched: Option<CompId>,
}

impl PipelineBuilder {
    /// Start a pipeline scheduled on `core`.
    pub fn new(id: PipelineId, core: CoreId, period_frames: u32) -> Self {
        Self {
            id,
            core,
            period_frames,
            components: Vec::new(),
            sched: None,
        }
    }

    /// Add a component created for this pipeline.
    pub fn add(&mut self, comp: ComponentRef) -> Result<&mut Self, PipelineError> {
        if comp.pipeline() != self.id {
            return Err(PipelineError::WrongPipeline {
                comp: comp.id(),
                expected: self.id,
                actual: comp.pipeline(),
            });
        }
        if self.components.iter().any(|c| c.id() == comp.id()) {
            return Err(PipelineError::DuplicateComponent(comp.id()));
        }
        self.components.push(comp);
        Ok(self)
    }

    /// Component whose timing drives the pipeline. Defaults to the first
    /// component in data-flow order.
    pub fn scheduling_component(&mut self, id: CompId) -> &mut Self {
        self.sched = Some(id);
        self
    }

    /// Sort the components and freeze the pipeline.
    ///
    /// Components pinned to another core become shared and get their own
    /// copy task there.
    pub fn build(self) -> Result<Pipeline, PipelineError> {
        let n = self.components.len();
        if n == 0 {
            return Err(PipelineError::Empty(self.id));
        }

        let index: HashMap<CompId, usize> = self
            .components
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id(), i))
            .collect();

        let mut outgoing = vec![Vec::new(); n];
        let mut in_degree = vec![0usize; n];
        let mut incoming = vec![Vec::new(); n];
        for (i, comp) in self.components.iter().enumerate() {
            for sink in comp.sinks() {
                let consumer = sink.acquire().consumer().map(|p| p.comp);
                if let Some(&j) = consumer.and_then(|c| index.get(&c)) {
                    outgoing[i].push(j);
                    incoming[j].push(i);
                    in_degree[j] += 1;
                }
            }
        }

        let mut queue: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut sorted = Vec::with_capacity(n);
        while let Some(i) = queue.pop_front() {
            sorted.push(i);
            for &j in &outgoing[i] {
                in_degree[j] -= 1;
                if in_degree[j] == 0 {
                    queue.push_back(j);
                }
            }
        }
        if sorted.len() != n {
            return Err(PipelineError::CycleDetected(self.id));
        }

        let mut position = vec![0usize; n];
        for (pos, &i) in sorted.iter().enumerate() {
            position[i] = pos;
        }
        let upstream = sorted
            .iter()
            .map(|&i| incoming[i].iter().map(|&u| position[u]).collect())
            .collect();
        let order: Vec<ComponentRef> = sorted.iter().map(|&i| Arc::clone(&self.components[i])).collect();

        let sched = match self.sched {
            Some(id) if index.contains_key(&id) => id,
            Some(id) => return Err(PipelineError::UnknownSchedulingComponent(id)),
            None => order[0].id(),
        };

        for comp in order.iter().filter(|c| c.core() != self.core) {
            comp.mark_shared();
            comp.enable_task();
            tracing::debug!(comp = comp.id().0, core = comp.core().0, pipeline = self.id.0, "component runs its own task");
        }

        let mut buffers = Vec::new();
        for comp in &order {
            for sink in comp.sinks() {
                let internal = sink
                    .acquire()
                    .consumer()
                    .is_some_and(|p| index.contains_key(&p.comp));
                if internal {
                    buffers.push(sink);
                }
            }
        }

        tracing::info!(pipeline = self.id.0, core = self.core.0, components = n, "pipeline built");
        Ok(Pipeline {
            id: self.id,
            core: self.core,
            period_frames: self.period_frames,
            order,
            upstream,
            sched,
            buffers,
            status: AtomicU8::new(PipelineStatus::Ready as u8),
            periods: AtomicU64::new(0),
        })
    }
}

/// An ordered set of components scheduled together on one core.
pub struct Pipeline {
    id: PipelineId,
    core: CoreId,
    period_frames: u32,
    order: Vec<ComponentRef>,
    upstream: Vec<Vec<usize>>,
    sched: CompId,
    buffers: Vec<BufferRef>,
    status: AtomicU8,
    periods: AtomicU64,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("id", &self.id)
            .field("core", &self.core)
            .field("status", &self.status())
            .field("components", &self.order.iter().map(|c| c.id()).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Pipeline identifier.
    pub fn id(&self) -> PipelineId {
        self.id
    }

    /// Core whose scheduler copies the pipeline.
    pub fn core(&self) -> CoreId {
        self.core
    }

    /// Frames per scheduling period.
    pub fn period_frames(&self) -> u32 {
        self.period_frames
    }

    /// Scheduling component.
    pub fn scheduling_component(&self) -> CompId {
        self.sched
    }

    /// Components in data-flow order.
    pub fn components(&self) -> &[ComponentRef] {
        &self.order
    }

    /// Current status.
    pub fn status(&self) -> PipelineStatus {
        PipelineStatus::from_raw(self.status.load(Ordering::Acquire))
    }

    fn set_status(&self, status: PipelineStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    /// Number of copy walks completed.
    pub fn periods(&self) -> u64 {
        self.periods.load(Ordering::Relaxed)
    }

    fn walk(&self, mut visit: impl FnMut(&ComponentRef) -> Result<Status, ComponentError>) -> Result<(), PipelineError> {
        let mut stopped = vec![false; self.order.len()];
        for (i, comp) in self.order.iter().enumerate() {
            let upstream = &self.upstream[i];
            if !upstream.is_empty() && upstream.iter().all(|&u| stopped[u]) {
                stopped[i] = true;
                continue;
            }
            let status = visit(comp).map_err(|source| PipelineError::Component { comp: comp.id(), source })?;
            stopped[i] = status.stops_walk();
        }
        Ok(())
    }

    /// Propagate stream parameters through the pipeline.
    pub fn params(&self, idc: &Idc, params: &StreamParams) -> Result<(), PipelineError> {
        tracing::debug!(pipeline = self.id.0, ?params, "params walk");
        self.walk(|comp| comp.params(idc, params))
    }

    /// Prepare every component.
    pub fn prepare(&self, idc: &Idc) -> Result<(), PipelineError> {
        tracing::debug!(pipeline = self.id.0, "prepare walk");
        self.walk(|comp| comp.prepare(idc))?;
        self.set_status(PipelineStatus::Prepared);
        Ok(())
    }

    /// Apply a lifecycle command to every component.
    ///
    /// `Start` and `Release` are preceded by a full `PreStart` or
    /// `PreRelease` walk.
    pub fn trigger(&self, idc: &Idc, cmd: TriggerCmd) -> Result<(), PipelineError> {
        let arm = match cmd {
            TriggerCmd::Start => Some(TriggerCmd::PreStart),
            TriggerCmd::Release => Some(TriggerCmd::PreRelease),
            _ => None,
        };
        if let Some(arm) = arm {
            tracing::debug!(pipeline = self.id.0, cmd = ?arm, "trigger walk");
            self.walk(|comp| comp.trigger(idc, arm))?;
        }
        tracing::debug!(pipeline = self.id.0, ?cmd, "trigger walk");
        self.walk(|comp| comp.trigger(idc, cmd))?;
        if let Some(status) = PipelineStatus::after(cmd) {
            self.set_status(status);
        }
        Ok(())
    }

    /// Reset every component and empty the internal buffers.
    pub fn reset(&self, idc: &Idc) -> Result<(), PipelineError> {
        tracing::debug!(pipeline = self.id.0, "reset walk");
        self.walk(|comp| comp.reset(idc))?;
        for buffer in &self.buffers {
            buffer.acquire().reset_params();
        }
        self.set_status(PipelineStatus::Ready);
        Ok(())
    }

    /// Stop every component after an xrun; the pipeline must be prepared
    /// again before restarting.
    pub fn xrun(&self, idc: &Idc) -> Result<(), PipelineError> {
        tracing::warn!(pipeline = self.id.0, "xrun, stopping pipeline");
        self.trigger(idc, TriggerCmd::Xrun)
    }

    /// Run one copy walk on the calling thread.
    ///
    /// Components with their own task are skipped; their core copies them.
    /// Returns the frames moved by the last component visited.
    pub fn copy(&self) -> Result<u32, PipelineError> {
        let mut frames = 0;
        self.walk(|comp| {
            if comp.has_task() {
                return Ok(Status::Done);
            }
            match comp.copy()? {
                CopyStatus::Moved(moved) => {
                    frames = moved;
                    Ok(Status::Done)
                }
                CopyStatus::StopWalk => Ok(Status::StopWalk),
            }
        })?;
        self.periods.fetch_add(1, Ordering::Relaxed);
        Ok(frames)
    }

    /// Free every component.
    pub fn free(&self) {
        for comp in &self.order {
            comp.free();
        }
        tracing::debug!(pipeline = self.id.0, "pipeline freed");
    }
}
