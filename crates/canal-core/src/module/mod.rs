//! Module adapter: drives a processing module (or an endpoint) through the
//! common component contract.
//!
//! A [`ProcessingModule`] exposes one or more processing entry points. The
//! adapter picks one when it is created, in this order:
//!
//! 1. source/sink objects ([`SourceSinkProcess`])
//! 2. stream copy ([`StreamProcess`])
//! 3. raw block ([`RawBlockProcess`])
//!
//! HOST and DAI endpoints skip all three and go through their own
//! [`EndpointProcess`](crate::endpoint::EndpointProcess) entry.
//!
//! # Lifecycle
//!
//! - `prepare` validates buffer counts, runs the module's prepare, and for
//!   raw-block modules allocates every staging buffer (or none of them)
//!   before moving the component to PREPARE.
//! - `trigger` honours `no_pause` modules and keeps multi-input components
//!   ACTIVE while any input is still streaming.
//! - `reset` drops staging, totals and partial configuration, then returns
//!   the component to READY.

mod large_config;
mod raw_block;
mod sink_source;
mod stream_copy;

pub use large_config::{FragmentPosition, MAX_CONFIG_BYTES};
pub use raw_block::{BlockSizes, RawBlockProcess, RawInput, RawOutput, StagingPlan, buff_periods};
pub use sink_source::{Sink, Source, SourceSinkProcess};
pub use stream_copy::{StreamInput, StreamOutput, StreamProcess};

use crate::component::{
    AttrKind, AttrValue, CompDev, ComponentOps, LargeConfigBlock, StreamPosition, status_of, verify_params,
};
use crate::endpoint::{EndpointKind, EndpointProcess};
use crate::error::{ComponentError, CopyStatus, Result, Status};
use crate::state::{ComponentState, TriggerCmd};
use crate::stream::StreamParams;
use large_config::ConfigAssembly;
use raw_block::RawStaging;

/// Default staging budget for one raw-block adapter.
pub const DEFAULT_MAX_STAGING_BYTES: usize = 1024 * 1024;

/// Running byte totals per input and output stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct DataTotals {
    consumed: Vec<u64>,
    produced: Vec<u64>,
}

impl DataTotals {
    fn bump(slots: &mut Vec<u64>, index: usize, bytes: usize) {
        if slots.len() <= index {
            slots.resize(index + 1, 0);
        }
        slots[index] += bytes as u64;
    }

    pub(crate) fn add_consumed(&mut self, index: usize, bytes: usize) {
        Self::bump(&mut self.consumed, index, bytes);
    }

    pub(crate) fn add_produced(&mut self, index: usize, bytes: usize) {
        Self::bump(&mut self.produced, index, bytes);
    }

    pub(crate) fn get(&self, index: usize, input: bool) -> u64 {
        let slots = if input { &self.consumed } else { &self.produced };
        slots.get(index).copied().unwrap_or(0)
    }

    pub(crate) fn clear(&mut self) {
        self.consumed.clear();
        self.produced.clear();
    }
}

/// What a module sees at prepare.
#[derive(Debug, Clone, PartialEq)]
pub struct PrepareContext {
    /// Frames per scheduling period.
    pub period_frames: usize,
    /// Bytes per period on the first sink (or source when there are none).
    pub period_bytes: usize,
    /// Parameters of every source buffer, in connection order.
    pub sources: Vec<StreamParams>,
    /// Parameters of every sink buffer, in connection order.
    pub sinks: Vec<StreamParams>,
}

/// A processing module wrapped by [`ModuleAdapter`].
///
/// A module implements at least one of the processing traits and returns
/// itself from the matching accessor.
pub trait ProcessingModule: Send {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Negotiate stream parameters. The default commits `params` to the
    /// connected buffers.
    fn params(&mut self, dev: &CompDev, params: &StreamParams) -> Result<()> {
        verify_params(dev, params)
    }

    /// Prepare for streaming.
    fn prepare(&mut self, _ctx: &PrepareContext) -> Result<()> {
        Ok(())
    }

    /// Observe a lifecycle command after the state change.
    fn trigger(&mut self, _cmd: TriggerCmd) -> Result<()> {
        Ok(())
    }

    /// Drop per-stream state.
    fn reset(&mut self) {}

    /// Release resources.
    fn free(&mut self) {}

    /// Apply a complete configuration blob.
    fn set_configuration(&mut self, _param_id: u32, _data: &[u8]) -> Result<()> {
        Err(ComponentError::NotSupported("set_configuration"))
    }

    /// Read a configuration blob.
    fn get_configuration(&self, _param_id: u32) -> Result<Vec<u8>> {
        Err(ComponentError::NotSupported("get_configuration"))
    }

    /// True when the module cannot pause.
    fn no_pause(&self) -> bool {
        false
    }

    /// Maximum number of source buffers.
    fn max_sources(&self) -> usize {
        1
    }

    /// Maximum number of sink buffers.
    fn max_sinks(&self) -> usize {
        1
    }

    /// Source/sink-object entry point.
    fn as_source_sink(&mut self) -> Option<&mut dyn SourceSinkProcess> {
        None
    }

    /// Stream-copy entry point.
    fn as_stream(&mut self) -> Option<&mut dyn StreamProcess> {
        None
    }

    /// Raw-block entry point.
    fn as_raw_block(&mut self) -> Option<&mut dyn RawBlockProcess> {
        None
    }
}

/// How the adapter moves data for its module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingTopology {
    /// Host or DAI gateway.
    Endpoint(EndpointKind),
    /// Module reads and writes through source/sink handles.
    SourceSinkObject,
    /// Module processes the ring buffers in place.
    StreamCopy,
    /// Module processes owned linear blocks.
    RawBlock,
}

/// Adapter tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterSettings {
    /// Upper bound on raw-block staging allocated at prepare.
    pub max_staging_bytes: usize,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            max_staging_bytes: DEFAULT_MAX_STAGING_BYTES,
        }
    }
}

enum Inner {
    Module(Box<dyn ProcessingModule>),
    Endpoint(Box<dyn EndpointProcess>),
}

/// Component implementation wrapping a processing module or an endpoint.
pub struct ModuleAdapter {
    inner: Inner,
    topology: ProcessingTopology,
    settings: AdapterSettings,
    period_bytes: usize,
    staging: Option<RawStaging>,
    totals: DataTotals,
    assembly: ConfigAssembly,
}

impl std::fmt::Debug for ModuleAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleAdapter")
            .field("topology", &self.topology)
            .field("period_bytes", &self.period_bytes)
            .field("staged", &self.staging.is_some())
            .finish_non_exhaustive()
    }
}

impl ModuleAdapter {
    /// Wrap `module`, choosing its topology from the entry points it exposes.
    pub fn new(mut module: Box<dyn ProcessingModule>, settings: AdapterSettings) -> Result<Self> {
        let topology = if module.as_source_sink().is_some() {
            ProcessingTopology::SourceSinkObject
        } else if module.as_stream().is_some() {
            ProcessingTopology::StreamCopy
        } else if module.as_raw_block().is_some() {
            ProcessingTopology::RawBlock
        } else {
            return Err(ComponentError::invalid(format!(
                "module '{}' exposes no processing entry point",
                module.name()
            )));
        };
        tracing::debug!(module = module.name(), ?topology, "module adapter created");
        Ok(Self::with_inner(Inner::Module(module), topology, settings))
    }

    /// Wrap a HOST or DAI endpoint.
    pub fn endpoint(endpoint: Box<dyn EndpointProcess>) -> Self {
        let topology = ProcessingTopology::Endpoint(endpoint.kind());
        Self::with_inner(Inner::Endpoint(endpoint), topology, AdapterSettings::default())
    }

    fn with_inner(inner: Inner, topology: ProcessingTopology, settings: AdapterSettings) -> Self {
        Self {
            inner,
            topology,
            settings,
            period_bytes: 0,
            staging: None,
            totals: DataTotals::default(),
            assembly: ConfigAssembly::default(),
        }
    }

    /// Processing topology chosen at creation.
    pub fn topology(&self) -> ProcessingTopology {
        self.topology
    }

    /// Bytes per period, known after prepare.
    pub fn period_bytes(&self) -> usize {
        self.period_bytes
    }

    /// Priming threshold still outstanding; zero once deep buffering ended.
    pub fn deep_buff_bytes(&self) -> usize {
        self.staging.as_ref().map_or(0, |s| s.deep_buff_bytes)
    }

    /// Bytes parked in the local ring of raw-block output `index`.
    pub fn staged_output(&self, index: usize) -> usize {
        self.staging.as_ref().map_or(0, |s| s.local_avail(index))
    }

    fn prepare_module(&mut self, dev: &mut CompDev) -> Result<Status> {
        let Inner::Module(module) = &mut self.inner else {
            return Err(ComponentError::invalid("not a module"));
        };
        let (inputs, outputs) = (dev.sources().len(), dev.sinks().len());
        if inputs == 0 && outputs == 0 {
            return Err(ComponentError::invalid(format!("{}: no buffers connected", dev.id())));
        }
        if inputs > module.max_sources() || outputs > module.max_sinks() {
            return Err(ComponentError::invalid(format!(
                "{}: {inputs} sources / {outputs} sinks exceed module limits {} / {}",
                dev.id(),
                module.max_sources(),
                module.max_sinks()
            )));
        }
        if self.topology == ProcessingTopology::StreamCopy {
            stream_copy::check_fan(dev)?;
        }
        // validate before touching the module so a rejected prepare has no side effects
        dev.state().transition(TriggerCmd::Prepare)?;

        let sources: Vec<StreamParams> = dev.sources().iter().map(|b| *b.acquire().stream.params()).collect();
        let sinks: Vec<StreamParams> = dev.sinks().iter().map(|b| *b.acquire().stream.params()).collect();
        let period_frames = dev.period_frames();
        let period_bytes = sinks
            .first()
            .or(sources.first())
            .map_or(0, |p| p.bytes_for(period_frames));
        let ctx = PrepareContext {
            period_frames,
            period_bytes,
            sources,
            sinks,
        };
        module.prepare(&ctx)?;

        if self.topology == ProcessingTopology::RawBlock {
            let blocks = module
                .as_raw_block()
                .map(|raw| raw.block_sizes())
                .ok_or_else(|| ComponentError::invalid("raw-block entry point disappeared"))?;
            let capacity = dev.sources().iter().map(|b| b.acquire().stream.size()).min();
            let staged = StagingPlan::new(period_bytes, blocks, inputs, outputs)
                .and_then(|plan| plan.fit_sources(period_bytes, blocks, capacity))
                .and_then(|plan| {
                    RawStaging::allocate(&plan, period_bytes, period_frames, &ctx.sinks, self.settings.max_staging_bytes)
                });
            match staged {
                Ok(staging) => self.staging = Some(staging),
                Err(err) => {
                    tracing::error!(comp = dev.id().0, module = module.name(), "prepare failed: {err}");
                    module.reset();
                    return Err(err);
                }
            }
        }

        self.period_bytes = period_bytes;
        dev.set_state(TriggerCmd::Prepare)?;
        tracing::debug!(comp = dev.id().0, period_bytes, topology = ?self.topology, "prepared");
        Ok(Status::Done)
    }

    fn sources_streaming(dev: &CompDev) -> bool {
        dev.sources().iter().any(|buffer| {
            matches!(
                buffer.acquire().producer_state(),
                Some(ComponentState::Active | ComponentState::Paused)
            )
        })
    }
}

impl ComponentOps for ModuleAdapter {
    fn params(&mut self, dev: &mut CompDev, params: &StreamParams) -> Result<Status> {
        if matches!(
            dev.state(),
            ComponentState::Active | ComponentState::Paused | ComponentState::PreActive
        ) {
            return Err(ComponentError::Busy(format!("{} is streaming", dev.id())));
        }
        match &mut self.inner {
            Inner::Module(module) => module.params(dev, params)?,
            Inner::Endpoint(endpoint) => endpoint.params(dev, params)?,
        }
        Ok(Status::Done)
    }

    fn prepare(&mut self, dev: &mut CompDev) -> Result<Status> {
        match dev.state() {
            ComponentState::Active => {
                tracing::debug!(comp = dev.id().0, "prepare while active");
                return Ok(Status::StopWalk);
            }
            ComponentState::Prepare => {
                tracing::warn!(comp = dev.id().0, "already prepared");
                return Ok(Status::StopWalk);
            }
            _ => {}
        }
        if let Inner::Endpoint(endpoint) = &mut self.inner {
            let transition = dev.set_state(TriggerCmd::Prepare)?;
            if transition.already_set() {
                return Ok(Status::StopWalk);
            }
            if let Err(err) = endpoint.prepare(dev) {
                tracing::error!(comp = dev.id().0, "endpoint prepare failed: {err}");
                dev.set_state(TriggerCmd::Reset)?;
                return Err(err);
            }
            self.totals.clear();
            return Ok(Status::Done);
        }
        self.prepare_module(dev)
    }

    fn trigger(&mut self, dev: &mut CompDev, cmd: TriggerCmd) -> Result<Status> {
        let module = match &mut self.inner {
            Inner::Endpoint(endpoint) => return endpoint.trigger(dev, cmd),
            Inner::Module(module) => module,
        };

        if cmd == TriggerCmd::Pause && module.no_pause() {
            dev.state().transition(cmd)?;
            tracing::debug!(comp = dev.id().0, module = module.name(), "module cannot pause, staying active");
            return Ok(Status::StopWalk);
        }

        // a mixer stays active while any of its inputs is still streaming
        if matches!(cmd, TriggerCmd::Stop | TriggerCmd::PreStart)
            && dev.sources().len() > 1
            && Self::sources_streaming(dev)
        {
            tracing::debug!(comp = dev.id().0, ?cmd, "inputs still streaming, staying active");
            dev.shared_state().force(ComponentState::Active);
            return Ok(Status::StopWalk);
        }

        let transition = dev.set_state(cmd)?;
        if transition.already_set() {
            return Ok(Status::StopWalk);
        }
        module.trigger(cmd)?;
        Ok(status_of(transition))
    }

    fn reset(&mut self, dev: &mut CompDev) -> Result<Status> {
        match &mut self.inner {
            Inner::Module(module) => module.reset(),
            Inner::Endpoint(endpoint) => endpoint.reset(dev)?,
        }
        self.staging = None;
        self.totals.clear();
        self.assembly.clear();
        dev.set_state(TriggerCmd::Reset)?;
        tracing::debug!(comp = dev.id().0, "reset");
        Ok(Status::Done)
    }

    fn copy(&mut self, dev: &mut CompDev) -> Result<CopyStatus> {
        if let Inner::Endpoint(endpoint) = &mut self.inner {
            return endpoint.copy(dev);
        }
        if dev.state() != ComponentState::Active {
            return Ok(CopyStatus::StopWalk);
        }
        let Inner::Module(module) = &mut self.inner else {
            return Ok(CopyStatus::StopWalk);
        };
        let status = match self.topology {
            ProcessingTopology::SourceSinkObject => match module.as_source_sink() {
                Some(process) => sink_source::copy_sink_source(process, dev, &mut self.totals),
                None => Err(ComponentError::NotSupported("source/sink processing")),
            },
            ProcessingTopology::StreamCopy => match module.as_stream() {
                Some(process) => stream_copy::copy_stream(process, dev, &mut self.totals),
                None => Err(ComponentError::NotSupported("stream processing")),
            },
            ProcessingTopology::RawBlock => match (module.as_raw_block(), self.staging.as_mut()) {
                (Some(process), Some(staging)) => raw_block::copy_raw(process, staging, dev, &mut self.totals),
                (_, None) => Err(ComponentError::invalid(format!("{}: copy before prepare", dev.id()))),
                (None, _) => Err(ComponentError::NotSupported("raw-block processing")),
            },
            ProcessingTopology::Endpoint(_) => Ok(CopyStatus::StopWalk),
        }?;
        tracing::trace!(comp = dev.id().0, frames = status.frames(), "copy");
        Ok(status)
    }

    fn set_large_config(
        &mut self,
        dev: &mut CompDev,
        param_id: u32,
        first: bool,
        last: bool,
        offset: usize,
        data: &[u8],
    ) -> Result<()> {
        let Inner::Module(module) = &mut self.inner else {
            return Err(ComponentError::NotSupported("set_large_config"));
        };
        if let Some(blob) = self.assembly.push(param_id, first, last, offset, data)? {
            tracing::debug!(comp = dev.id().0, param_id, bytes = blob.len(), "configuration assembled");
            module.set_configuration(param_id, &blob)?;
        }
        Ok(())
    }

    fn get_large_config(
        &mut self,
        _dev: &mut CompDev,
        param_id: u32,
        offset: usize,
        max_len: usize,
    ) -> Result<LargeConfigBlock> {
        let Inner::Module(module) = &self.inner else {
            return Err(ComponentError::NotSupported("get_large_config"));
        };
        if max_len == 0 {
            return Err(ComponentError::invalid("zero-length read"));
        }
        let blob = module.get_configuration(param_id)?;
        if offset > blob.len() {
            return Err(ComponentError::invalid(format!(
                "offset {offset} past the {}-byte blob",
                blob.len()
            )));
        }
        let end = blob.len().min(offset + max_len);
        Ok(LargeConfigBlock {
            data: blob[offset..end].to_vec(),
            last: end == blob.len(),
        })
    }

    fn group_trigger(&mut self, dev: &mut CompDev, cmd: TriggerCmd) -> Result<()> {
        match &mut self.inner {
            Inner::Endpoint(endpoint) => endpoint.group_trigger(dev, cmd),
            Inner::Module(_) => Err(ComponentError::NotSupported("group_trigger")),
        }
    }

    fn get_attribute(&self, dev: &CompDev, kind: AttrKind) -> Result<AttrValue> {
        match (kind, &self.inner) {
            (AttrKind::BaseConfig, _) => Ok(AttrValue::BaseConfig(dev.config().clone())),
            (AttrKind::DaiGroup, Inner::Endpoint(endpoint)) if endpoint.kind() == EndpointKind::Dai => {
                Ok(AttrValue::DaiGroup(endpoint.group()))
            }
            (AttrKind::DaiGroup, _) => Err(ComponentError::NotSupported("get_attribute")),
        }
    }

    fn set_attribute(&mut self, dev: &mut CompDev, value: AttrValue) -> Result<()> {
        match (value, &mut self.inner) {
            (AttrValue::DaiGroup(group), Inner::Endpoint(endpoint)) => endpoint.set_group(dev, group),
            _ => Err(ComponentError::NotSupported("set_attribute")),
        }
    }

    fn position(&self, dev: &CompDev) -> Result<StreamPosition> {
        match &self.inner {
            Inner::Endpoint(endpoint) => Ok(endpoint.position(dev)),
            Inner::Module(_) => Err(ComponentError::NotSupported("position")),
        }
    }

    fn total_data_processed(&self, dev: &CompDev, stream_no: usize, input: bool) -> u64 {
        match &self.inner {
            Inner::Endpoint(endpoint) if stream_no == 0 => endpoint.position(dev).bytes,
            Inner::Endpoint(_) => 0,
            Inner::Module(_) => self.totals.get(stream_no, input),
        }
    }

    fn free(&mut self, dev: &mut CompDev) {
        match &mut self.inner {
            Inner::Module(module) => module.free(),
            Inner::Endpoint(endpoint) => endpoint.free(dev),
        }
        self.staging = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BufferId, CompBuffer};
    use crate::component::{CompConfig, CompId, ComponentCell, ComponentType};
    use crate::idc::Idc;

    struct Passthrough {
        pause: bool,
        triggers: Vec<TriggerCmd>,
        config: Vec<u8>,
        inputs: usize,
    }

    impl Passthrough {
        fn new() -> Self {
            Self {
                pause: true,
                triggers: Vec::new(),
                config: Vec::new(),
                inputs: 1,
            }
        }
    }

    impl StreamProcess for Passthrough {
        fn process(&mut self, inputs: &mut [StreamInput<'_>], outputs: &mut [StreamOutput<'_>], _frames: usize) -> Result<()> {
            let mut chunk = vec![0u8; inputs[0].bytes()];
            inputs[0].read(0, &mut chunk);
            inputs[0].consume(chunk.len());
            for out in outputs.iter_mut() {
                out.write(&chunk);
            }
            Ok(())
        }
    }

    impl ProcessingModule for Passthrough {
        fn name(&self) -> &str {
            "passthrough"
        }
        fn trigger(&mut self, cmd: TriggerCmd) -> Result<()> {
            self.triggers.push(cmd);
            Ok(())
        }
        fn set_configuration(&mut self, _param_id: u32, data: &[u8]) -> Result<()> {
            self.config = data.to_vec();
            Ok(())
        }
        fn get_configuration(&self, _param_id: u32) -> Result<Vec<u8>> {
            Ok(self.config.clone())
        }
        fn no_pause(&self) -> bool {
            !self.pause
        }
        fn max_sources(&self) -> usize {
            self.inputs
        }
        fn as_stream(&mut self) -> Option<&mut dyn StreamProcess> {
            Some(self)
        }
    }

    struct Opaque;

    impl ProcessingModule for Opaque {
        fn name(&self) -> &str {
            "opaque"
        }
    }

    fn adapter_cell(id: u32, module: Passthrough) -> crate::component::ComponentRef {
        let mut config = CompConfig::new(CompId(id), ComponentType::Custom(1));
        config.period_frames = 4;
        let adapter = ModuleAdapter::new(Box::new(module), AdapterSettings::default()).unwrap();
        ComponentCell::from_ops(config, Box::new(adapter))
    }

    #[test]
    fn module_without_entry_point_rejected() {
        assert!(ModuleAdapter::new(Box::new(Opaque), AdapterSettings::default()).is_err());
    }

    #[test]
    fn stream_module_detected() {
        let adapter = ModuleAdapter::new(Box::new(Passthrough::new()), AdapterSettings::default()).unwrap();
        assert_eq!(adapter.topology(), ProcessingTopology::StreamCopy);
    }

    #[test]
    fn prepare_without_buffers_fails() {
        let comp = adapter_cell(1, Passthrough::new());
        assert!(matches!(comp.prepare(&Idc::detached()), Err(ComponentError::InvalidArgument(_))));
        assert_eq!(comp.state(), ComponentState::Ready);
    }

    #[test]
    fn prepare_twice_stops_walk() {
        let idc = Idc::detached();
        let comp = adapter_cell(2, Passthrough::new());
        comp.attach_sink(CompBuffer::new(BufferId(1), 64));
        assert_eq!(comp.prepare(&idc), Ok(Status::Done));
        assert_eq!(comp.prepare(&idc), Ok(Status::StopWalk));
    }

    #[test]
    fn too_many_sources_rejected() {
        let comp = adapter_cell(3, Passthrough::new());
        comp.attach_source(CompBuffer::new(BufferId(1), 64));
        comp.attach_source(CompBuffer::new(BufferId(2), 64));
        comp.attach_sink(CompBuffer::new(BufferId(3), 64));
        assert!(comp.prepare(&Idc::detached()).is_err());
    }

    #[test]
    fn no_pause_module_stays_active() {
        let idc = Idc::detached();
        let mut module = Passthrough::new();
        module.pause = false;
        let comp = adapter_cell(4, module);
        comp.attach_sink(CompBuffer::new(BufferId(1), 64));
        comp.prepare(&idc).unwrap();
        comp.trigger(&idc, TriggerCmd::PreStart).unwrap();
        comp.trigger(&idc, TriggerCmd::Start).unwrap();
        assert_eq!(comp.trigger(&idc, TriggerCmd::Pause), Ok(Status::StopWalk));
        assert_eq!(comp.state(), ComponentState::Active);
    }

    #[test]
    fn params_rejected_while_streaming() {
        let idc = Idc::detached();
        let comp = adapter_cell(5, Passthrough::new());
        comp.attach_sink(CompBuffer::new(BufferId(1), 64));
        comp.prepare(&idc).unwrap();
        comp.trigger(&idc, TriggerCmd::PreStart).unwrap();
        assert!(matches!(
            comp.params(&idc, &StreamParams::default()),
            Err(ComponentError::Busy(_))
        ));
    }

    #[test]
    fn copy_outside_active_stops_walk() {
        let comp = adapter_cell(6, Passthrough::new());
        assert_eq!(comp.copy(), Ok(CopyStatus::StopWalk));
    }

    #[test]
    fn large_config_round_trip_through_fragments() {
        let comp = adapter_cell(7, Passthrough::new());
        comp.set_large_config(3, true, false, 5, &[1, 2, 3]).unwrap();
        comp.set_large_config(3, false, true, 3, &[4, 5]).unwrap();
        let head = comp.get_large_config(3, 0, 4).unwrap();
        assert_eq!(head.data, vec![1, 2, 3, 4]);
        assert!(!head.last);
        let tail = comp.get_large_config(3, 4, 4).unwrap();
        assert_eq!(tail.data, vec![5]);
        assert!(tail.last);
    }

    #[test]
    fn totals_follow_copies_and_reset() {
        let idc = Idc::detached();
        let comp = adapter_cell(8, Passthrough::new());
        let src = CompBuffer::new(BufferId(1), 64);
        let sink = CompBuffer::new(BufferId(2), 64);
        comp.attach_source(src.clone());
        comp.attach_sink(sink.clone());
        {
            let mut g = src.acquire();
            g.stream.fill(0, &[9; 16]);
            g.stream.produce(16);
        }
        comp.prepare(&idc).unwrap();
        comp.trigger(&idc, TriggerCmd::PreStart).unwrap();
        comp.trigger(&idc, TriggerCmd::Start).unwrap();
        assert_eq!(comp.copy(), Ok(CopyStatus::Moved(4)));
        assert_eq!(comp.total_data_processed(0, true), 16);
        assert_eq!(comp.total_data_processed(0, false), 16);
        assert_eq!(sink.acquire().stream.avail(), 16);
        comp.reset(&idc).unwrap();
        assert_eq!(comp.total_data_processed(0, true), 0);
    }

    #[test]
    fn data_totals_grow_on_demand() {
        let mut totals = DataTotals::default();
        totals.add_produced(2, 10);
        assert_eq!(totals.get(2, false), 10);
        assert_eq!(totals.get(0, false), 0);
        assert_eq!(totals.get(5, true), 0);
    }
}
