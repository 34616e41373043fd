//! Topology file format.
//!
//! A topology describes the engine (cores, period, stream format), the
//! components to instantiate, the buffers joining them, the pipelines they
//! form and the DAI trigger groups.
//!
//! # TOML Format
//!
//! ```toml
//! [engine]
//! cores = 2
//! period_frames = 48
//!
//! [[components]]
//! id = 1
//! type = "host"
//! pipeline = 1
//!
//! [[components]]
//! id = 2
//! type = "volume"
//! pipeline = 1
//! [components.settings]
//! gain_db = -6.0
//!
//! [[components]]
//! id = 3
//! type = "dai"
//! pipeline = 1
//! core = 1
//!
//! [[buffers]]
//! id = 1
//! source = 1
//! sink = 2
//!
//! [[buffers]]
//! id = 2
//! source = 2
//! sink = 3
//!
//! [[pipelines]]
//! id = 1
//! scheduling = 3
//! ```

use crate::error::ConfigError;
use canal_core::{
    AdapterSettings, BlockSizes, ComponentType, DEFAULT_IDC_TIMEOUT, Direction, FrameFormat, StagingPlan, StreamParams,
    TypeConfig,
};
use canal_modules::codec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

/// Engine-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of DSP cores to run.
    pub cores: u32,
    /// Default frames per scheduling period.
    pub period_frames: u32,
    /// Sample rate handed to the params walk.
    pub rate: u32,
    /// Channel count handed to the params walk.
    pub channels: u16,
    /// How long a control call waits for a remote core.
    pub idc_timeout_ms: u64,
    /// Upper bound on raw-block staging per component.
    pub max_staging_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cores: 1,
            period_frames: 48,
            rate: 48_000,
            channels: 2,
            idc_timeout_ms: DEFAULT_IDC_TIMEOUT.as_millis() as u64,
            max_staging_bytes: AdapterSettings::default().max_staging_bytes,
        }
    }
}

impl EngineConfig {
    /// IDC reply timeout.
    pub fn idc_timeout(&self) -> Duration {
        Duration::from_millis(self.idc_timeout_ms)
    }

    /// Parameters used by the params walk. Each component applies its own
    /// sample format on top.
    pub fn stream_params(&self) -> StreamParams {
        StreamParams {
            rate: self.rate,
            channels: self.channels,
            ..StreamParams::default()
        }
    }

    /// Adapter tuning for module-backed components.
    pub fn adapter_settings(&self) -> AdapterSettings {
        AdapterSettings {
            max_staging_bytes: self.max_staging_bytes,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let reject = |field: &'static str, reason: &str| -> Result<(), ConfigError> {
            Err(ConfigError::InvalidEngine {
                field,
                reason: reason.to_string(),
            })
        };
        if self.cores == 0 {
            return reject("cores", "at least one core is required");
        }
        if self.period_frames == 0 {
            return reject("period_frames", "must be non-zero");
        }
        if self.rate == 0 {
            return reject("rate", "must be non-zero");
        }
        if self.channels == 0 {
            return reject("channels", "must be non-zero");
        }
        if self.idc_timeout_ms == 0 {
            return reject("idc_timeout_ms", "must be non-zero");
        }
        Ok(())
    }
}

/// One component instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComponentEntry {
    /// Unique component id.
    pub id: u32,
    /// Driver type: `host`, `dai`, `volume`, `mixer`, `demux`, `codec`,
    /// `meter` or `custom:N`.
    #[serde(rename = "type")]
    pub comp_type: String,
    /// Owning pipeline.
    pub pipeline: u32,
    /// Core to run on; defaults to the pipeline's core.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub core: Option<u32>,
    /// Stream direction.
    #[serde(default)]
    pub direction: Direction,
    /// Sample format the component produces.
    #[serde(default)]
    pub format: FrameFormat,
    /// Type-specific settings passed to the driver.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub settings: BTreeMap<String, toml::Value>,
}

impl ComponentEntry {
    /// Component of `comp_type` in `pipeline`.
    pub fn new(id: u32, comp_type: impl Into<String>, pipeline: u32) -> Self {
        Self {
            id,
            comp_type: comp_type.into(),
            pipeline,
            core: None,
            direction: Direction::Playback,
            format: FrameFormat::S16Le,
            settings: BTreeMap::new(),
        }
    }

    /// Pin to `core`.
    pub fn on_core(mut self, core: u32) -> Self {
        self.core = Some(core);
        self
    }

    /// Set the produced sample format.
    pub fn with_format(mut self, format: FrameFormat) -> Self {
        self.format = format;
        self
    }

    /// Set the stream direction.
    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    /// Add a driver setting.
    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<toml::Value>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    /// Parsed driver type.
    pub fn parsed_type(&self) -> Result<ComponentType, ConfigError> {
        self.comp_type.parse().map_err(|_| ConfigError::UnknownType {
            comp: self.id,
            name: self.comp_type.clone(),
        })
    }

    /// Settings in the form drivers read them.
    pub fn type_config(&self) -> TypeConfig {
        let mut config = TypeConfig::new();
        for (key, value) in &self.settings {
            match value {
                toml::Value::String(s) => config.set(key.as_str(), s),
                other => config.set(key.as_str(), other),
            }
        }
        config
    }
}

/// A buffer joining two components.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BufferEntry {
    /// Unique buffer id.
    pub id: u32,
    /// Producing component.
    pub source: u32,
    /// Consuming component.
    pub sink: u32,
    /// Ring size in bytes; defaults to two periods of the producer's format.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
}

/// A pipeline and its scheduling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineEntry {
    /// Unique pipeline id.
    pub id: u32,
    /// Core the pipeline's copy walk runs on.
    #[serde(default)]
    pub core: u32,
    /// Component whose timing drives the pipeline.
    pub scheduling: u32,
    /// Frames per period; defaults to `engine.period_frames`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_frames: Option<u32>,
}

/// DAIs started and stopped together.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DaiGroupEntry {
    /// Group id.
    pub id: u32,
    /// Member DAI component ids.
    pub members: Vec<u32>,
}

/// A complete topology file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TopologyConfig {
    /// Engine settings.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Component instances.
    #[serde(default)]
    pub components: Vec<ComponentEntry>,
    /// Buffers between components.
    #[serde(default)]
    pub buffers: Vec<BufferEntry>,
    /// Pipelines.
    #[serde(default)]
    pub pipelines: Vec<PipelineEntry>,
    /// DAI trigger groups.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dai_groups: Vec<DaiGroupEntry>,
}

impl TopologyConfig {
    /// Load a topology from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
        let topology = Self::from_toml(&content)?;
        tracing::debug!(path = %path.display(), components = topology.components.len(), "topology loaded");
        Ok(topology)
    }

    /// Parse a topology from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Save the topology to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = self.to_toml()?;
        std::fs::write(path, content).map_err(|e| ConfigError::write_file(path, e))
    }

    /// Convert the topology to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Component entry by id.
    pub fn component(&self, id: u32) -> Option<&ComponentEntry> {
        self.components.iter().find(|c| c.id == id)
    }

    /// Pipeline entry by id.
    pub fn pipeline(&self, id: u32) -> Option<&PipelineEntry> {
        self.pipelines.iter().find(|p| p.id == id)
    }

    /// Core a component runs on after defaults are applied.
    pub fn component_core(&self, comp: &ComponentEntry) -> u32 {
        comp.core
            .or_else(|| self.pipeline(comp.pipeline).map(|p| p.core))
            .unwrap_or(0)
    }

    /// Period length of a pipeline after defaults are applied.
    pub fn pipeline_period(&self, pipeline: &PipelineEntry) -> u32 {
        pipeline.period_frames.unwrap_or(self.engine.period_frames)
    }

    /// Period length of a component after defaults are applied.
    pub fn component_period(&self, comp: &ComponentEntry) -> u32 {
        self.pipeline(comp.pipeline)
            .map_or(self.engine.period_frames, |p| self.pipeline_period(p))
    }

    /// Ring size of a buffer after defaults are applied.
    ///
    /// Two producer periods, or the consumer's priming depth when that is
    /// larger.
    pub fn buffer_size(&self, buffer: &BufferEntry) -> usize {
        if let Some(size) = buffer.size {
            return size;
        }
        let producer = self.component(buffer.source);
        let format = producer.map(|c| c.format).unwrap_or_default();
        let period = producer.map_or(self.engine.period_frames, |c| self.component_period(c));
        let params = self.engine.stream_params().with_format(format);
        let periods = 2 * params.bytes_for(period as usize);
        self.component(buffer.sink)
            .map_or(periods, |sink| periods.max(self.priming_bytes(sink)))
    }

    /// Source bytes a block codec holds back before its first block; zero
    /// for every other type.
    fn priming_bytes(&self, comp: &ComponentEntry) -> usize {
        if !matches!(comp.parsed_type(), Ok(ComponentType::Codec)) {
            return 0;
        }
        let block = comp
            .type_config()
            .parse_or("block_bytes", codec::DEFAULT_BLOCK_BYTES)
            .unwrap_or(codec::DEFAULT_BLOCK_BYTES);
        let period = self
            .engine
            .stream_params()
            .with_format(comp.format)
            .bytes_for(self.component_period(comp) as usize);
        let blocks = BlockSizes {
            input: block,
            output: block,
        };
        StagingPlan::new(period, blocks, 1, 1).map_or(block, |plan| plan.deep_buff_bytes.max(block))
    }

    /// Check the topology for consistency.
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine.validate()?;

        unique("component", self.components.iter().map(|c| c.id))?;
        unique("buffer", self.buffers.iter().map(|b| b.id))?;
        unique("pipeline", self.pipelines.iter().map(|p| p.id))?;
        unique("dai group", self.dai_groups.iter().map(|g| g.id))?;

        let cores = self.engine.cores;
        let check_core = |owner: String, core: u32| {
            if core < cores {
                Ok(())
            } else {
                Err(ConfigError::CoreOutOfRange { owner, core, cores })
            }
        };

        for pipeline in &self.pipelines {
            check_core(format!("pipeline {}", pipeline.id), pipeline.core)?;
            if pipeline.period_frames == Some(0) {
                return Err(ConfigError::Invalid(format!(
                    "pipeline {} has a zero-frame period",
                    pipeline.id
                )));
            }
            let sched = self
                .component(pipeline.scheduling)
                .ok_or_else(|| ConfigError::unknown(format!("pipeline {}", pipeline.id), "component", pipeline.scheduling))?;
            if sched.pipeline != pipeline.id {
                return Err(ConfigError::Invalid(format!(
                    "pipeline {} is scheduled by component {}, which belongs to pipeline {}",
                    pipeline.id, sched.id, sched.pipeline
                )));
            }
        }

        let types: HashMap<u32, ComponentType> = self
            .components
            .iter()
            .map(|c| Ok((c.id, c.parsed_type()?)))
            .collect::<Result<_, ConfigError>>()?;

        for comp in &self.components {
            if self.pipeline(comp.pipeline).is_none() {
                return Err(ConfigError::unknown(format!("component {}", comp.id), "pipeline", comp.pipeline));
            }
            check_core(format!("component {}", comp.id), self.component_core(comp))?;
        }

        for buffer in &self.buffers {
            let owner = format!("buffer {}", buffer.id);
            for end in [buffer.source, buffer.sink] {
                if !types.contains_key(&end) {
                    return Err(ConfigError::unknown(owner, "component", end));
                }
            }
            if buffer.source == buffer.sink {
                return Err(ConfigError::Invalid(format!("{owner} loops component {} to itself", buffer.source)));
            }
            if buffer.size == Some(0) {
                return Err(ConfigError::Invalid(format!("{owner} has zero size")));
            }
        }

        let mut grouped = HashSet::new();
        for group in &self.dai_groups {
            let owner = format!("dai group {}", group.id);
            if group.members.is_empty() {
                return Err(ConfigError::Invalid(format!("{owner} has no members")));
            }
            for &member in &group.members {
                match types.get(&member) {
                    None => return Err(ConfigError::unknown(owner, "component", member)),
                    Some(ComponentType::Dai) => {}
                    Some(other) => {
                        return Err(ConfigError::Invalid(format!(
                            "{owner}: component {member} is a {other}, not a dai"
                        )));
                    }
                }
                if !grouped.insert(member) {
                    return Err(ConfigError::Invalid(format!("dai {member} is in more than one group")));
                }
            }
        }

        for pipeline in &self.pipelines {
            if !self.components.iter().any(|c| c.pipeline == pipeline.id) {
                return Err(ConfigError::Invalid(format!("pipeline {} has no components", pipeline.id)));
            }
        }

        Ok(())
    }
}

fn unique(kind: &'static str, ids: impl Iterator<Item = u32>) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(ConfigError::DuplicateId { kind, id });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAYBACK: &str = r#"
        [engine]
        cores = 2
        period_frames = 16

        [[components]]
        id = 1
        type = "host"
        pipeline = 1
        [components.settings]
        fifo_bytes = 1024

        [[components]]
        id = 2
        type = "volume"
        pipeline = 1
        format = "s32_le"
        [components.settings]
        gain_db = -6.0
        ramp_ms = 0

        [[components]]
        id = 3
        type = "dai"
        pipeline = 1
        core = 1
        format = "s32_le"

        [[buffers]]
        id = 1
        source = 1
        sink = 2

        [[buffers]]
        id = 2
        source = 2
        sink = 3
        size = 512

        [[pipelines]]
        id = 1
        scheduling = 3
    "#;

    fn playback() -> TopologyConfig {
        TopologyConfig::from_toml(PLAYBACK).unwrap()
    }

    #[test]
    fn test_parse_playback() {
        let topology = playback();
        assert_eq!(topology.engine.cores, 2);
        assert_eq!(topology.engine.rate, 48_000, "unset engine fields take defaults");
        assert_eq!(topology.components.len(), 3);
        assert_eq!(topology.components[1].format, FrameFormat::S32Le);
        assert_eq!(topology.components[0].direction, Direction::Playback);
        assert_eq!(topology.pipelines[0].core, 0);
        topology.validate().unwrap();
    }

    #[test]
    fn test_defaults_applied() {
        let topology = playback();
        let host = topology.component(1).unwrap();
        let dai = topology.component(3).unwrap();
        assert_eq!(topology.component_core(host), 0);
        assert_eq!(topology.component_core(dai), 1);
        // 16 frames, 2 channels, 2 bytes, doubled
        assert_eq!(topology.buffer_size(&topology.buffers[0]), 128);
        assert_eq!(topology.buffer_size(&topology.buffers[1]), 512);
        assert_eq!(topology.pipeline_period(&topology.pipelines[0]), 16);
    }

    #[test]
    fn test_codec_input_holds_priming_depth() {
        let mut topology = playback();
        topology.components[1] = ComponentEntry::new(2, "codec", 1);
        // 64-byte periods against 2048-byte blocks: 33 periods of priming
        assert_eq!(topology.buffer_size(&topology.buffers[0]), 64 * 33);

        topology.components[1] = ComponentEntry::new(2, "codec", 1).with_setting("block_bytes", 64);
        assert_eq!(topology.buffer_size(&topology.buffers[0]), 128);
    }

    #[test]
    fn test_settings_become_strings() {
        let topology = playback();
        let settings = topology.component(2).unwrap().type_config();
        assert_eq!(settings.get("gain_db"), Some("-6.0"));
        assert_eq!(settings.parse::<f32>("gain_db").unwrap(), Some(-6.0));
        assert_eq!(settings.parse::<u32>("ramp_ms").unwrap(), Some(0));

        let entry = ComponentEntry::new(9, "codec", 1).with_setting("mode", "fast");
        assert_eq!(entry.type_config().get("mode"), Some("fast"));
    }

    #[test]
    fn test_toml_round_trip() {
        let topology = playback();
        let text = topology.to_toml().unwrap();
        assert_eq!(TopologyConfig::from_toml(&text).unwrap(), topology);
    }

    #[test]
    fn test_duplicate_ids() {
        let mut topology = playback();
        topology.components.push(ComponentEntry::new(2, "meter", 1));
        assert!(matches!(
            topology.validate(),
            Err(ConfigError::DuplicateId { kind: "component", id: 2 })
        ));
    }

    #[test]
    fn test_buffer_to_missing_component() {
        let mut topology = playback();
        topology.buffers[1].sink = 42;
        let err = topology.validate().unwrap_err();
        assert_eq!(err.to_string(), "buffer 2 refers to unknown component 42");
    }

    #[test]
    fn test_core_out_of_range() {
        let mut topology = playback();
        topology.components[2].core = Some(2);
        assert!(matches!(
            topology.validate(),
            Err(ConfigError::CoreOutOfRange { core: 2, cores: 2, .. })
        ));

        let mut topology = playback();
        topology.pipelines[0].core = 5;
        assert!(matches!(topology.validate(), Err(ConfigError::CoreOutOfRange { core: 5, .. })));
    }

    #[test]
    fn test_scheduling_component_must_exist_in_pipeline() {
        let mut topology = playback();
        topology.pipelines[0].scheduling = 7;
        assert!(matches!(
            topology.validate(),
            Err(ConfigError::UnknownReference { kind: "component", id: 7, .. })
        ));

        let mut topology = playback();
        topology.pipelines.push(PipelineEntry {
            id: 2,
            core: 0,
            scheduling: 3,
            period_frames: None,
        });
        topology.components.push(ComponentEntry::new(4, "meter", 2));
        assert!(matches!(topology.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_unknown_type() {
        let mut topology = playback();
        topology.components[1].comp_type = "flanger".to_string();
        assert!(matches!(
            topology.validate(),
            Err(ConfigError::UnknownType { comp: 2, .. })
        ));

        topology.components[1].comp_type = "custom:12".to_string();
        assert_eq!(topology.components[1].parsed_type().unwrap(), ComponentType::Custom(12));
    }

    #[test]
    fn test_dai_groups_validated() {
        let mut topology = playback();
        topology.dai_groups.push(DaiGroupEntry { id: 0, members: vec![3] });
        topology.validate().unwrap();

        topology.dai_groups.push(DaiGroupEntry { id: 1, members: vec![3] });
        assert!(topology.validate().is_err(), "a dai joins one group");

        topology.dai_groups.truncate(1);
        topology.dai_groups[0].members.push(2);
        let err = topology.validate().unwrap_err();
        assert!(err.to_string().contains("not a dai"), "got: {err}");
    }

    #[test]
    fn test_engine_limits() {
        let mut topology = playback();
        topology.engine.cores = 0;
        assert!(matches!(
            topology.validate(),
            Err(ConfigError::InvalidEngine { field: "cores", .. })
        ));
        let mut topology = playback();
        topology.engine.period_frames = 0;
        assert!(matches!(
            topology.validate(),
            Err(ConfigError::InvalidEngine { field: "period_frames", .. })
        ));
    }

    #[test]
    fn test_bad_format_name() {
        let text = PLAYBACK.replace("s32_le", "s20_le");
        assert!(matches!(TopologyConfig::from_toml(&text), Err(ConfigError::TomlParse(_))));
    }
}
