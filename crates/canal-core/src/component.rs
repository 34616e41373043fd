//! Components: the capability table, the per-instance device and the shared
//! cell that dispatches operations locally or to the owning core.
//!
//! A driver turns a [`CompConfig`] into a boxed [`ComponentOps`]. The engine
//! wraps it in a [`ComponentCell`], which owns the lock around the
//! instance, the lock-free state cell peers read, and the routing decision
//! for control operations:
//!
//! - `params`, `prepare`, `trigger` and `reset` on a component that is
//!   shared across cores and owned by another core are forwarded over IDC
//!   and the caller blocks for the answer;
//! - everything else (including `copy`) runs on the calling thread.

use crate::buffer::BufferRef;
use crate::error::{ComponentError, CopyStatus, Result, Status};
use crate::idc::{CoreId, Idc, IdcOp, current_core};
use crate::state::{ComponentState, SharedState, Transition, TriggerCmd};
use crate::stream::{FrameFormat, StreamParams};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Component identifier, unique within a topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompId(pub u32);

impl fmt::Display for CompId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "comp{}", self.0)
    }
}

/// Pipeline identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct PipelineId(pub u32);

impl fmt::Display for PipelineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pipe{}", self.0)
    }
}

/// Stream direction relative to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum Direction {
    /// Host to device.
    #[default]
    Playback,
    /// Device to host.
    Capture,
}

/// Component type, the key for driver lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ComponentType {
    /// Host DMA endpoint.
    Host,
    /// DAI (device audio interface) endpoint.
    Dai,
    /// Gain stage.
    Volume,
    /// N:1 mixer.
    Mixer,
    /// 1:N demultiplexer.
    Demux,
    /// Fixed block codec.
    Codec,
    /// Peak level meter.
    Meter,
    /// Externally registered type.
    Custom(u32),
}

impl ComponentType {
    /// Lowercase name used in topology files.
    pub fn name(self) -> String {
        match self {
            Self::Host => "host".into(),
            Self::Dai => "dai".into(),
            Self::Volume => "volume".into(),
            Self::Mixer => "mixer".into(),
            Self::Demux => "demux".into(),
            Self::Codec => "codec".into(),
            Self::Meter => "meter".into(),
            Self::Custom(n) => format!("custom:{n}"),
        }
    }
}

impl FromStr for ComponentType {
    type Err = ComponentError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "host" => Self::Host,
            "dai" => Self::Dai,
            "volume" => Self::Volume,
            "mixer" => Self::Mixer,
            "demux" => Self::Demux,
            "codec" => Self::Codec,
            "meter" => Self::Meter,
            other => {
                let n = other
                    .strip_prefix("custom:")
                    .and_then(|n| n.parse().ok())
                    .ok_or_else(|| ComponentError::invalid(format!("unknown component type '{other}'")))?;
                Self::Custom(n)
            }
        })
    }
}

impl fmt::Display for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Base configuration every component is created with.
#[derive(Debug, Clone, PartialEq)]
pub struct CompConfig {
    /// Component identifier.
    pub id: CompId,
    /// Owning pipeline.
    pub pipeline: PipelineId,
    /// Core the component executes on.
    pub core: CoreId,
    /// Driver key.
    pub comp_type: ComponentType,
    /// Stream direction.
    pub direction: Direction,
    /// Sample format the component produces.
    pub format: FrameFormat,
    /// Frames per scheduling period.
    pub period_frames: u32,
}

impl CompConfig {
    /// Configuration with defaults: pipeline 0, core 0, playback, S16,
    /// 48 frames per period.
    pub fn new(id: CompId, comp_type: ComponentType) -> Self {
        Self {
            id,
            pipeline: PipelineId(0),
            core: CoreId::PRIMARY,
            comp_type,
            direction: Direction::Playback,
            format: FrameFormat::S16Le,
            period_frames: 48,
        }
    }

    /// Place the component in `pipeline`.
    pub fn in_pipeline(mut self, pipeline: PipelineId) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Pin the component to `core`.
    pub fn on_core(mut self, core: CoreId) -> Self {
        self.core = core;
        self
    }
}

/// Type-specific settings handed to a driver's `create`.
///
/// Values are stored as strings and parsed on demand.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypeConfig {
    values: BTreeMap<String, String>,
}

impl TypeConfig {
    /// Empty settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a setting, builder style.
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.values.insert(key.into(), value.to_string());
        self
    }

    /// Add or replace a setting.
    pub fn set(&mut self, key: impl Into<String>, value: impl ToString) {
        self.values.insert(key.into(), value.to_string());
    }

    /// Raw value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Parse `key`, `Ok(None)` when absent.
    pub fn parse<T: FromStr>(&self, key: &str) -> Result<Option<T>> {
        self.get(key)
            .map(|raw| {
                raw.parse()
                    .map_err(|_| ComponentError::invalid(format!("setting '{key}': cannot parse '{raw}'")))
            })
            .transpose()
    }

    /// Parse `key` or fall back to `default`.
    pub fn parse_or<T: FromStr>(&self, key: &str, default: T) -> Result<T> {
        Ok(self.parse(key)?.unwrap_or(default))
    }

    /// Iterate over `(key, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Attribute selectors for `get_attribute`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrKind {
    /// The component's base configuration.
    BaseConfig,
    /// DAI trigger group membership.
    DaiGroup,
}

/// Attribute values for `get_attribute`/`set_attribute`.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    /// The component's base configuration.
    BaseConfig(CompConfig),
    /// DAI trigger group id, `None` when ungrouped.
    DaiGroup(Option<u32>),
}

/// Stream position reported by endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamPosition {
    /// Bytes transferred through the endpoint since prepare.
    pub bytes: u64,
    /// Number of xruns seen since prepare.
    pub xruns: u32,
    /// Bytes lost or inserted by xruns.
    pub xrun_bytes: u64,
}

/// One fragment returned by `get_large_config`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LargeConfigBlock {
    /// Fragment payload.
    pub data: Vec<u8>,
    /// True when this fragment ends the blob.
    pub last: bool,
}

/// Instance data every operation can see.
#[derive(Debug)]
pub struct CompDev {
    config: CompConfig,
    state: SharedState,
    sources: Vec<BufferRef>,
    sinks: Vec<BufferRef>,
}

impl CompDev {
    fn new(config: CompConfig, state: SharedState) -> Self {
        Self {
            config,
            state,
            sources: Vec::new(),
            sinks: Vec::new(),
        }
    }

    /// Component identifier.
    #[inline]
    pub fn id(&self) -> CompId {
        self.config.id
    }

    /// Base configuration.
    #[inline]
    pub fn config(&self) -> &CompConfig {
        &self.config
    }

    /// Current lifecycle state.
    #[inline]
    pub fn state(&self) -> ComponentState {
        self.state.get()
    }

    /// The state cell shared with peers.
    #[inline]
    pub fn shared_state(&self) -> &SharedState {
        &self.state
    }

    /// Validate and apply a lifecycle command.
    pub fn set_state(&self, cmd: TriggerCmd) -> Result<Transition> {
        self.state
            .apply(cmd)
            .inspect_err(|_| tracing::error!(comp = self.id().0, ?cmd, "state change rejected"))
    }

    /// Buffers this component reads from.
    #[inline]
    pub fn sources(&self) -> &[BufferRef] {
        &self.sources
    }

    /// Buffers this component writes to.
    #[inline]
    pub fn sinks(&self) -> &[BufferRef] {
        &self.sinks
    }

    /// Frames per scheduling period.
    #[inline]
    pub fn period_frames(&self) -> usize {
        self.config.period_frames as usize
    }
}

/// Map a state transition to a walk status.
pub fn status_of(transition: Transition) -> Status {
    if transition.already_set() {
        Status::StopWalk
    } else {
        Status::Done
    }
}

/// Default parameter handling: commit `params` to every sink and to any
/// source whose producer has not committed parameters yet.
pub fn verify_params(dev: &CompDev, params: &StreamParams) -> Result<()> {
    params.validate()?;
    let params = params.with_format(dev.config().format);
    let period_bytes = params.bytes_for(dev.period_frames());

    for buffer in dev.sinks() {
        let mut guard = buffer.acquire();
        if guard.stream.size() < period_bytes {
            return Err(ComponentError::invalid(format!(
                "{} holds {} bytes, less than one period ({period_bytes})",
                buffer.id(),
                guard.stream.size()
            )));
        }
        guard.set_params(params);
    }
    for buffer in dev.sources() {
        let mut guard = buffer.acquire();
        if !guard.params_set() {
            guard.set_params(params);
        }
    }
    Ok(())
}

/// The capability table a component driver provides.
///
/// Everything except [`copy`](Self::copy) has a default.
pub trait ComponentOps: Send {
    /// Negotiate stream parameters.
    fn params(&mut self, dev: &mut CompDev, params: &StreamParams) -> Result<Status> {
        verify_params(dev, params)?;
        Ok(Status::Done)
    }

    /// Commit parameters and move to PREPARE.
    fn prepare(&mut self, dev: &mut CompDev) -> Result<Status> {
        Ok(status_of(dev.set_state(TriggerCmd::Prepare)?))
    }

    /// Apply a lifecycle command.
    fn trigger(&mut self, dev: &mut CompDev, cmd: TriggerCmd) -> Result<Status> {
        Ok(status_of(dev.set_state(cmd)?))
    }

    /// Return to READY.
    fn reset(&mut self, dev: &mut CompDev) -> Result<Status> {
        dev.set_state(TriggerCmd::Reset)?;
        Ok(Status::Done)
    }

    /// Move one period of data.
    fn copy(&mut self, dev: &mut CompDev) -> Result<CopyStatus>;

    /// Run the hardware side of a trigger-group round on this member.
    fn group_trigger(&mut self, _dev: &mut CompDev, _cmd: TriggerCmd) -> Result<()> {
        Err(ComponentError::NotSupported("group_trigger"))
    }

    /// Notification that `peer` was bound to this component.
    fn bind(&mut self, _dev: &mut CompDev, _peer: CompId) -> Result<()> {
        Ok(())
    }

    /// Notification that `peer` was unbound.
    fn unbind(&mut self, _dev: &mut CompDev, _peer: CompId) -> Result<()> {
        Ok(())
    }

    /// Receive one fragment of a configuration blob.
    fn set_large_config(
        &mut self,
        _dev: &mut CompDev,
        _param_id: u32,
        _first: bool,
        _last: bool,
        _offset: usize,
        _data: &[u8],
    ) -> Result<()> {
        Err(ComponentError::NotSupported("set_large_config"))
    }

    /// Read one fragment of a configuration blob.
    fn get_large_config(
        &mut self,
        _dev: &mut CompDev,
        _param_id: u32,
        _offset: usize,
        _max_len: usize,
    ) -> Result<LargeConfigBlock> {
        Err(ComponentError::NotSupported("get_large_config"))
    }

    /// Read an attribute.
    fn get_attribute(&self, dev: &CompDev, kind: AttrKind) -> Result<AttrValue> {
        match kind {
            AttrKind::BaseConfig => Ok(AttrValue::BaseConfig(dev.config().clone())),
            AttrKind::DaiGroup => Err(ComponentError::NotSupported("get_attribute")),
        }
    }

    /// Write an attribute.
    fn set_attribute(&mut self, _dev: &mut CompDev, _value: AttrValue) -> Result<()> {
        Err(ComponentError::NotSupported("set_attribute"))
    }

    /// Stream position.
    fn position(&self, _dev: &CompDev) -> Result<StreamPosition> {
        Err(ComponentError::NotSupported("position"))
    }

    /// Bytes consumed (`input`) or produced on stream `stream_no` since
    /// prepare.
    fn total_data_processed(&self, _dev: &CompDev, _stream_no: usize, _input: bool) -> u64 {
        0
    }

    /// Release resources before the instance is dropped.
    fn free(&mut self, _dev: &mut CompDev) {}
}

/// Factory for one component type.
pub trait ComponentDriver: Send + Sync {
    /// Type this driver creates.
    fn comp_type(&self) -> ComponentType;

    /// Short name for listings.
    fn name(&self) -> &str;

    /// One-line description for listings.
    fn description(&self) -> &str {
        ""
    }

    /// Build the capability table for a new instance.
    fn create(&self, config: &CompConfig, settings: &TypeConfig) -> Result<Box<dyn ComponentOps>>;
}

struct Component {
    dev: CompDev,
    ops: Box<dyn ComponentOps>,
}

/// Shared handle to a component.
pub type ComponentRef = Arc<ComponentCell>;

/// A component instance plus the routing data needed to reach it.
pub struct ComponentCell {
    id: CompId,
    pipeline: PipelineId,
    core: CoreId,
    comp_type: ComponentType,
    state: SharedState,
    shared: AtomicBool,
    task_enabled: AtomicBool,
    task_scheduled: AtomicBool,
    body: Mutex<Component>,
}

impl fmt::Debug for ComponentCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentCell")
            .field("id", &self.id)
            .field("type", &self.comp_type)
            .field("core", &self.core)
            .field("state", &self.state.get())
            .field("shared", &self.is_shared())
            .finish_non_exhaustive()
    }
}

impl ComponentCell {
    /// Create an instance through `driver`; the component ends up READY.
    pub fn create(driver: &dyn ComponentDriver, config: CompConfig, settings: &TypeConfig) -> Result<ComponentRef> {
        if driver.comp_type() != config.comp_type {
            return Err(ComponentError::invalid(format!(
                "driver '{}' cannot create {}",
                driver.name(),
                config.comp_type
            )));
        }
        let ops = driver.create(&config, settings)?;
        Ok(Self::from_ops(config, ops))
    }

    /// Wrap an already-built capability table; the component ends up READY.
    pub fn from_ops(config: CompConfig, ops: Box<dyn ComponentOps>) -> ComponentRef {
        let state = SharedState::new(ComponentState::Init);
        let cell = Arc::new(Self {
            id: config.id,
            pipeline: config.pipeline,
            core: config.core,
            comp_type: config.comp_type,
            state: state.clone(),
            shared: AtomicBool::new(false),
            task_enabled: AtomicBool::new(false),
            task_scheduled: AtomicBool::new(false),
            body: Mutex::new(Component {
                dev: CompDev::new(config, state.clone()),
                ops,
            }),
        });
        state.force(ComponentState::Ready);
        tracing::debug!(comp = cell.id.0, ty = %cell.comp_type, core = cell.core.0, "component created");
        cell
    }

    /// Component identifier.
    pub fn id(&self) -> CompId {
        self.id
    }

    /// Owning pipeline.
    pub fn pipeline(&self) -> PipelineId {
        self.pipeline
    }

    /// Core the component executes on.
    pub fn core(&self) -> CoreId {
        self.core
    }

    /// Driver key.
    pub fn comp_type(&self) -> ComponentType {
        self.comp_type
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ComponentState {
        self.state.get()
    }

    /// The state cell shared with peers.
    pub fn shared_state(&self) -> &SharedState {
        &self.state
    }

    /// True when a buffer joins this component to another core.
    pub fn is_shared(&self) -> bool {
        self.shared.load(Ordering::Acquire)
    }

    pub(crate) fn mark_shared(&self) {
        self.shared.store(true, Ordering::Release);
    }

    fn routes_remote(&self) -> bool {
        self.is_shared() && current_core() != self.core
    }

    fn with_body<R>(&self, f: impl FnOnce(&mut dyn ComponentOps, &mut CompDev) -> R) -> R {
        let mut guard = self.body.lock();
        let Component { dev, ops } = &mut *guard;
        f(ops.as_mut(), dev)
    }

    fn dispatch(&self, idc: &Idc, op: IdcOp) -> Result<Status> {
        if self.routes_remote() {
            tracing::trace!(comp = self.id.0, core = self.core.0, ?op, "forwarding over idc");
            idc.send(self.core, self.id, op)
        } else {
            self.run_local(op)
        }
    }

    /// Execute a control operation on the calling thread.
    pub(crate) fn run_local(&self, op: IdcOp) -> Result<Status> {
        match op {
            IdcOp::Params(params) => self.with_body(|ops, dev| ops.params(dev, &params)),
            IdcOp::Prepare => self.with_body(|ops, dev| ops.prepare(dev)),
            IdcOp::Trigger(cmd) => self.trigger_local(cmd),
            IdcOp::Reset => self.with_body(|ops, dev| ops.reset(dev)),
            IdcOp::GroupTrigger(cmd) => self.with_body(|ops, dev| ops.group_trigger(dev, cmd)).map(|()| Status::Done),
        }
    }

    fn trigger_local(&self, cmd: TriggerCmd) -> Result<Status> {
        let status = self.with_body(|ops, dev| ops.trigger(dev, cmd))?;
        if self.task_enabled.load(Ordering::Acquire) {
            match cmd {
                TriggerCmd::Start | TriggerCmd::Release => {
                    self.task_scheduled.store(true, Ordering::Release);
                }
                TriggerCmd::Xrun | TriggerCmd::Pause | TriggerCmd::Stop => {
                    self.task_scheduled.store(false, Ordering::Release);
                }
                _ => {}
            }
        }
        Ok(status)
    }

    /// Negotiate stream parameters.
    pub fn params(&self, idc: &Idc, params: &StreamParams) -> Result<Status> {
        self.dispatch(idc, IdcOp::Params(*params))
    }

    /// Commit parameters.
    pub fn prepare(&self, idc: &Idc) -> Result<Status> {
        self.dispatch(idc, IdcOp::Prepare)
    }

    /// Apply a lifecycle command.
    pub fn trigger(&self, idc: &Idc, cmd: TriggerCmd) -> Result<Status> {
        self.dispatch(idc, IdcOp::Trigger(cmd))
    }

    /// Return to READY.
    pub fn reset(&self, idc: &Idc) -> Result<Status> {
        self.dispatch(idc, IdcOp::Reset)
    }

    /// Move one period of data on the calling thread.
    pub fn copy(&self) -> Result<CopyStatus> {
        self.with_body(|ops, dev| ops.copy(dev))
    }

    /// Notify the component that `peer` was bound to it.
    pub fn bind(&self, peer: CompId) -> Result<()> {
        self.with_body(|ops, dev| ops.bind(dev, peer))
    }

    /// Notify the component that `peer` was unbound.
    pub fn unbind(&self, peer: CompId) -> Result<()> {
        self.with_body(|ops, dev| ops.unbind(dev, peer))
    }

    /// Deliver one configuration fragment.
    pub fn set_large_config(&self, param_id: u32, first: bool, last: bool, offset: usize, data: &[u8]) -> Result<()> {
        self.with_body(|ops, dev| ops.set_large_config(dev, param_id, first, last, offset, data))
    }

    /// Read one configuration fragment.
    pub fn get_large_config(&self, param_id: u32, offset: usize, max_len: usize) -> Result<LargeConfigBlock> {
        self.with_body(|ops, dev| ops.get_large_config(dev, param_id, offset, max_len))
    }

    /// Read an attribute.
    pub fn get_attribute(&self, kind: AttrKind) -> Result<AttrValue> {
        self.with_body(|ops, dev| ops.get_attribute(dev, kind))
    }

    /// Write an attribute.
    pub fn set_attribute(&self, value: AttrValue) -> Result<()> {
        self.with_body(|ops, dev| ops.set_attribute(dev, value))
    }

    /// Stream position.
    pub fn position(&self) -> Result<StreamPosition> {
        self.with_body(|ops, dev| ops.position(dev))
    }

    /// Bytes consumed or produced on one stream since prepare.
    pub fn total_data_processed(&self, stream_no: usize, input: bool) -> u64 {
        self.with_body(|ops, dev| ops.total_data_processed(dev, stream_no, input))
    }

    /// Buffers this component reads from.
    pub fn sources(&self) -> Vec<BufferRef> {
        self.body.lock().dev.sources.clone()
    }

    /// Buffers this component writes to.
    pub fn sinks(&self) -> Vec<BufferRef> {
        self.body.lock().dev.sinks.clone()
    }

    pub(crate) fn attach_source(&self, buffer: BufferRef) {
        self.body.lock().dev.sources.push(buffer);
    }

    pub(crate) fn attach_sink(&self, buffer: BufferRef) {
        self.body.lock().dev.sinks.push(buffer);
    }

    /// Give the component its own copy task on its core.
    pub fn enable_task(&self) {
        self.task_enabled.store(true, Ordering::Release);
    }

    /// True when the component has its own copy task.
    pub fn has_task(&self) -> bool {
        self.task_enabled.load(Ordering::Acquire)
    }

    /// True while the copy task is scheduled.
    pub fn task_scheduled(&self) -> bool {
        self.task_scheduled.load(Ordering::Acquire)
    }

    /// Release driver resources and detach from all buffers.
    pub fn free(&self) {
        let mut guard = self.body.lock();
        let Component { dev, ops } = &mut *guard;
        ops.free(dev);
        for buffer in dev.sources.drain(..).chain(dev.sinks.drain(..)) {
            buffer.detach(self.id);
        }
        self.task_scheduled.store(false, Ordering::Release);
        tracing::debug!(comp = self.id.0, "component freed");
    }
}
