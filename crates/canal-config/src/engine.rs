//! A running engine built from a topology.
//!
//! [`Engine::build`] validates the topology, starts one executor per core,
//! creates every component through the driver registry, joins them with
//! buffers, assigns DAI groups and schedules each pipeline on its core.
//! Endpoints run on simulated DMA; [`Engine::dma_port`] hands out the
//! device side of each channel.

use crate::error::ConfigError;
use crate::topology::TopologyConfig;
use canal_core::{
    AttrValue, BufferId, CompBuffer, CompConfig, CompId, ComponentDirectory, ComponentDriver, ComponentRef, CoreId,
    Cores, DaiGroups, Idc, Pipeline, PipelineBuilder, PipelineError, PipelineId, SimDmaBank, SimDmaPort,
    StreamParams, TickReport, TriggerCmd, XrunEvent, XrunNotifier, connect,
};
use canal_registry::{BuiltinContext, DriverRegistry};
use crossbeam_channel::Receiver;
use std::collections::HashMap;
use std::sync::Arc;

/// Xrun events buffered between two drains.
pub const XRUN_QUEUE: usize = 64;

/// Components, pipelines and cores of one topology.
pub struct Engine {
    registry: DriverRegistry,
    directory: ComponentDirectory,
    pipelines: Vec<Arc<Pipeline>>,
    dma: Arc<SimDmaBank>,
    groups: Arc<DaiGroups>,
    xruns: Receiver<XrunEvent>,
    params: StreamParams,
    cores: Cores,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("cores", &self.cores.count())
            .field("components", &self.directory.len())
            .field("pipelines", &self.pipelines)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Build `topology` with the built-in drivers.
    pub fn build(topology: &TopologyConfig) -> Result<Self, ConfigError> {
        Self::build_with(topology, Vec::new())
    }

    /// Build `topology` with the built-in drivers plus `drivers`.
    pub fn build_with(
        topology: &TopologyConfig,
        drivers: Vec<Arc<dyn ComponentDriver>>,
    ) -> Result<Self, ConfigError> {
        topology.validate()?;
        let engine = &topology.engine;

        let dma = Arc::new(SimDmaBank::new());
        let groups = Arc::new(DaiGroups::new());
        let (notifier, xruns) = XrunNotifier::channel(XRUN_QUEUE);
        let mut registry = DriverRegistry::with_builtin(&BuiltinContext {
            dma: dma.clone(),
            groups: Arc::clone(&groups),
            notifier,
            adapter: engine.adapter_settings(),
        });
        for driver in drivers {
            registry.register(driver)?;
        }

        let directory = ComponentDirectory::new();
        let cores = Cores::start(engine.cores, &directory, engine.idc_timeout())?;
        groups.connect_cores(cores.idc());

        let mut components: HashMap<u32, ComponentRef> = HashMap::with_capacity(topology.components.len());
        for entry in &topology.components {
            let pipeline = topology
                .pipeline(entry.pipeline)
                .ok_or_else(|| ConfigError::unknown(format!("component {}", entry.id), "pipeline", entry.pipeline))?;
            let mut config = CompConfig::new(CompId(entry.id), entry.parsed_type()?)
                .in_pipeline(PipelineId(entry.pipeline))
                .on_core(CoreId(topology.component_core(entry)));
            config.direction = entry.direction;
            config.format = entry.format;
            config.period_frames = topology.pipeline_period(pipeline);

            let comp = registry.create(config, &entry.type_config())?;
            directory.insert(Arc::clone(&comp))?;
            components.insert(entry.id, comp);
        }

        for entry in &topology.buffers {
            let end = |id: u32| {
                components
                    .get(&id)
                    .ok_or_else(|| ConfigError::unknown(format!("buffer {}", entry.id), "component", id))
            };
            let size = topology.buffer_size(entry);
            let buffer = CompBuffer::new(BufferId(entry.id), size);
            connect(end(entry.source)?, &buffer, end(entry.sink)?)?;
            tracing::debug!(buffer = entry.id, source = entry.source, sink = entry.sink, size, "buffer connected");
        }

        for group in &topology.dai_groups {
            for member in &group.members {
                if let Some(comp) = components.get(member) {
                    comp.set_attribute(AttrValue::DaiGroup(Some(group.id)))?;
                }
            }
        }

        let mut pipelines = Vec::with_capacity(topology.pipelines.len());
        for entry in &topology.pipelines {
            let core = CoreId(entry.core);
            let mut builder = PipelineBuilder::new(PipelineId(entry.id), core, topology.pipeline_period(entry));
            for comp in topology.components.iter().filter(|c| c.pipeline == entry.id) {
                if let Some(comp) = components.get(&comp.id) {
                    builder.add(Arc::clone(comp))?;
                }
            }
            builder.scheduling_component(CompId(entry.scheduling));
            let pipeline = Arc::new(builder.build()?);

            if let Some(scheduler) = cores.scheduler(core) {
                scheduler.add_pipeline(Arc::clone(&pipeline));
            }
            for comp in pipeline.components().iter().filter(|c| c.has_task()) {
                if let Some(scheduler) = cores.scheduler(comp.core()) {
                    scheduler.add_task(Arc::clone(comp));
                }
            }
            pipelines.push(pipeline);
        }

        tracing::info!(
            cores = engine.cores,
            components = components.len(),
            buffers = topology.buffers.len(),
            pipelines = pipelines.len(),
            "engine built"
        );
        Ok(Self {
            registry,
            directory,
            pipelines,
            dma,
            groups,
            xruns,
            params: engine.stream_params(),
            cores,
        })
    }

    /// Control handle for cross-core calls.
    pub fn idc(&self) -> &Idc {
        self.cores.idc()
    }

    /// Number of running cores.
    pub fn core_count(&self) -> u32 {
        self.cores.count()
    }

    /// Drivers the engine was built with.
    pub fn registry(&self) -> &DriverRegistry {
        &self.registry
    }

    /// Stream parameters used by [`params`](Self::params).
    pub fn stream_params(&self) -> StreamParams {
        self.params
    }

    /// Pipelines in topology order.
    pub fn pipelines(&self) -> &[Arc<Pipeline>] {
        &self.pipelines
    }

    /// Pipeline by id.
    pub fn pipeline(&self, id: u32) -> Option<&Arc<Pipeline>> {
        self.pipelines.iter().find(|p| p.id() == PipelineId(id))
    }

    /// Component by id.
    pub fn component(&self, id: u32) -> Option<ComponentRef> {
        self.directory.get(CompId(id))
    }

    /// Component ids in ascending order.
    pub fn component_ids(&self) -> Vec<CompId> {
        self.directory.ids()
    }

    /// Device side of the DMA channel owned by endpoint `comp`.
    pub fn dma_port(&self, comp: u32) -> Option<SimDmaPort> {
        self.dma.port(CompId(comp))
    }

    /// Endpoints holding a DMA channel.
    pub fn endpoints(&self) -> Vec<CompId> {
        self.dma.components()
    }

    /// DAI trigger groups.
    pub fn dai_groups(&self) -> &DaiGroups {
        &self.groups
    }

    /// Run the params walk on every pipeline.
    pub fn params(&self) -> Result<(), PipelineError> {
        let idc = self.idc();
        self.pipelines.iter().try_for_each(|p| p.params(idc, &self.params))
    }

    /// Prepare every pipeline.
    pub fn prepare(&self) -> Result<(), PipelineError> {
        let idc = self.idc();
        self.pipelines.iter().try_for_each(|p| p.prepare(idc))
    }

    /// Apply `cmd` to every pipeline in topology order.
    pub fn trigger(&self, cmd: TriggerCmd) -> Result<(), PipelineError> {
        let idc = self.idc();
        self.pipelines.iter().try_for_each(|p| p.trigger(idc, cmd))
    }

    /// Params, prepare and start every pipeline.
    pub fn start(&self) -> Result<(), PipelineError> {
        self.params()?;
        self.prepare()?;
        self.trigger(TriggerCmd::Start)
    }

    /// Stop every pipeline.
    pub fn stop(&self) -> Result<(), PipelineError> {
        self.trigger(TriggerCmd::Stop)
    }

    /// Reset every pipeline back to READY.
    pub fn reset(&self) -> Result<(), PipelineError> {
        let idc = self.idc();
        self.pipelines.iter().try_for_each(|p| p.reset(idc))
    }

    /// Run one scheduling period on every core.
    pub fn tick(&self) -> canal_core::Result<Vec<TickReport>> {
        self.cores.tick_all()
    }

    /// Xrun events reported since the last call.
    pub fn drain_xruns(&self) -> Vec<XrunEvent> {
        self.xruns.try_iter().collect()
    }

    /// Stop the cores and free every component.
    pub fn shutdown(mut self) {
        self.cores.shutdown();
        for pipeline in &self.pipelines {
            pipeline.free();
        }
        for id in self.directory.ids() {
            self.directory.remove(id);
        }
        tracing::info!("engine shut down");
    }
}
