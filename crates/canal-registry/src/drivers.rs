//! Built-in component drivers.
//!
//! Processing modules share one generic [`ModuleDriver`] that builds the
//! module from its type-specific settings and wraps it in a
//! [`ModuleAdapter`]. Endpoints get dedicated drivers because they need a
//! DMA channel (and, for DAIs, the trigger-group table and the xrun
//! notifier) at creation.

use canal_core::{
    AdapterSettings, CompConfig, ComponentDriver, ComponentOps, ComponentType, DaiEndpoint, DaiGroups, DmaFactory,
    EndpointKind, HostEndpoint, ModuleAdapter, ProcessingModule, Result, TypeConfig, XrunNotifier,
};
use canal_modules::{BlockCodec, Demux, Meter, Mixer, Volume, codec, demux, mixer, volume};
use std::sync::Arc;

/// DMA FIFO depth used when a topology does not set `fifo_bytes`.
pub const DEFAULT_FIFO_BYTES: usize = 4096;

/// Builds a processing module from its settings.
pub type ModuleFactory = fn(&CompConfig, &TypeConfig) -> Result<Box<dyn ProcessingModule>>;

/// Driver creating adapter-wrapped processing modules.
pub struct ModuleDriver {
    comp_type: ComponentType,
    name: &'static str,
    description: &'static str,
    factory: ModuleFactory,
    settings: AdapterSettings,
}

impl ModuleDriver {
    /// Driver for `comp_type` building modules with `factory`.
    pub fn new(
        comp_type: ComponentType,
        name: &'static str,
        description: &'static str,
        factory: ModuleFactory,
        settings: AdapterSettings,
    ) -> Self {
        Self {
            comp_type,
            name,
            description,
            factory,
            settings,
        }
    }
}

impl ComponentDriver for ModuleDriver {
    fn comp_type(&self) -> ComponentType {
        self.comp_type
    }

    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        self.description
    }

    fn create(&self, config: &CompConfig, settings: &TypeConfig) -> Result<Box<dyn ComponentOps>> {
        let module = (self.factory)(config, settings)?;
        tracing::debug!(comp = config.id.0, module = module.name(), "module created");
        Ok(Box::new(ModuleAdapter::new(module, self.settings)?))
    }
}

/// HOST gateway driver.
pub struct HostDriver {
    dma: Arc<dyn DmaFactory>,
}

impl HostDriver {
    /// Driver requesting channels from `dma`.
    pub fn new(dma: Arc<dyn DmaFactory>) -> Self {
        Self { dma }
    }
}

impl ComponentDriver for HostDriver {
    fn comp_type(&self) -> ComponentType {
        ComponentType::Host
    }

    fn name(&self) -> &str {
        "host"
    }

    fn description(&self) -> &str {
        "Host memory gateway moving PCM over a host DMA channel"
    }

    fn create(&self, config: &CompConfig, settings: &TypeConfig) -> Result<Box<dyn ComponentOps>> {
        let fifo = settings.parse_or("fifo_bytes", DEFAULT_FIFO_BYTES)?;
        let dma = self.dma.request(config.id, EndpointKind::Host, config.direction, fifo)?;
        Ok(Box::new(ModuleAdapter::endpoint(Box::new(HostEndpoint::new(
            dma,
            config.direction,
            fifo,
        )))))
    }
}

/// DAI driver.
///
/// Group membership is not a creation setting; it is assigned afterwards
/// through the `DaiGroup` attribute.
pub struct DaiDriver {
    dma: Arc<dyn DmaFactory>,
    groups: Arc<DaiGroups>,
    notifier: XrunNotifier,
}

impl DaiDriver {
    /// Driver requesting channels from `dma`, sharing `groups` and reporting
    /// xruns to `notifier`.
    pub fn new(dma: Arc<dyn DmaFactory>, groups: Arc<DaiGroups>, notifier: XrunNotifier) -> Self {
        Self { dma, groups, notifier }
    }
}

impl ComponentDriver for DaiDriver {
    fn comp_type(&self) -> ComponentType {
        ComponentType::Dai
    }

    fn name(&self) -> &str {
        "dai"
    }

    fn description(&self) -> &str {
        "Device audio interface with trigger-group support"
    }

    fn create(&self, config: &CompConfig, settings: &TypeConfig) -> Result<Box<dyn ComponentOps>> {
        let fifo = settings.parse_or("fifo_bytes", DEFAULT_FIFO_BYTES)?;
        let dma = self.dma.request(config.id, EndpointKind::Dai, config.direction, fifo)?;
        Ok(Box::new(ModuleAdapter::endpoint(Box::new(DaiEndpoint::new(
            dma,
            config.direction,
            fifo,
            Arc::clone(&self.groups),
            self.notifier.clone(),
        )))))
    }
}

fn create_volume(_config: &CompConfig, settings: &TypeConfig) -> Result<Box<dyn ProcessingModule>> {
    let mut module = Volume::new(settings.parse_or("gain_db", 0.0f32)?);
    module.set_ramp_ms(settings.parse_or("ramp_ms", volume::DEFAULT_RAMP_MS)?);
    Ok(Box::new(module))
}

fn create_mixer(_config: &CompConfig, settings: &TypeConfig) -> Result<Box<dyn ProcessingModule>> {
    Ok(Box::new(Mixer::new(settings.parse_or("max_inputs", mixer::DEFAULT_MAX_INPUTS)?)))
}

fn create_demux(_config: &CompConfig, settings: &TypeConfig) -> Result<Box<dyn ProcessingModule>> {
    Ok(Box::new(Demux::new(settings.parse_or("max_outputs", demux::DEFAULT_MAX_OUTPUTS)?)))
}

fn create_codec(_config: &CompConfig, settings: &TypeConfig) -> Result<Box<dyn ProcessingModule>> {
    Ok(Box::new(BlockCodec::new(settings.parse_or("block_bytes", codec::DEFAULT_BLOCK_BYTES)?)?))
}

fn create_meter(_config: &CompConfig, _settings: &TypeConfig) -> Result<Box<dyn ProcessingModule>> {
    Ok(Box::new(Meter::new()))
}

/// Shared resources the built-in drivers are created with.
#[derive(Clone)]
pub struct BuiltinContext {
    /// Source of DMA channels for HOST and DAI endpoints.
    pub dma: Arc<dyn DmaFactory>,
    /// DAI trigger groups.
    pub groups: Arc<DaiGroups>,
    /// Xrun reporting for DAIs.
    pub notifier: XrunNotifier,
    /// Staging limits for adapter-wrapped modules.
    pub adapter: AdapterSettings,
}

fn module_driver(
    ctx: &BuiltinContext,
    comp_type: ComponentType,
    name: &'static str,
    description: &'static str,
    factory: ModuleFactory,
) -> Arc<dyn ComponentDriver> {
    Arc::new(ModuleDriver::new(comp_type, name, description, factory, ctx.adapter))
}

pub(crate) fn builtin(ctx: &BuiltinContext) -> Vec<Arc<dyn ComponentDriver>> {
    let host: Arc<dyn ComponentDriver> = Arc::new(HostDriver::new(Arc::clone(&ctx.dma)));
    let dai: Arc<dyn ComponentDriver> = Arc::new(DaiDriver::new(
        Arc::clone(&ctx.dma),
        Arc::clone(&ctx.groups),
        ctx.notifier.clone(),
    ));
    vec![
        host,
        dai,
        module_driver(
            ctx,
            ComponentType::Volume,
            "volume",
            "Gain stage with ramping and format conversion",
            create_volume,
        ),
        module_driver(ctx, ComponentType::Mixer, "mixer", "Saturating N:1 mixer", create_mixer),
        module_driver(ctx, ComponentType::Demux, "demux", "1:N stream splitter", create_demux),
        module_driver(
            ctx,
            ComponentType::Codec,
            "codec",
            "Fixed-block codec with deep buffering",
            create_codec,
        ),
        module_driver(ctx, ComponentType::Meter, "meter", "Pass-through peak meter", create_meter),
    ]
}
