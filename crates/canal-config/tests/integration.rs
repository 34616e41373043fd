//! Integration tests for canal-config.
//!
//! Topologies are built into running engines and driven period by period
//! over simulated DMA.

use canal_config::{ComponentEntry, ConfigError, DaiGroupEntry, PipelineEntry, TopologyConfig};
use canal_core::{AdapterSettings, ComponentState, ComponentType, Direction, PipelineStatus};
use canal_registry::{ModuleDriver, RegistryError};
use std::sync::Arc;
use tempfile::TempDir;

const PERIOD_FRAMES: u32 = 16;
const PERIOD_BYTES: usize = PERIOD_FRAMES as usize * 2 * 2;

fn s16(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

fn to_s16(bytes: &[u8]) -> Vec<i16> {
    bytes.chunks_exact(2).map(|b| i16::from_le_bytes([b[0], b[1]])).collect()
}

fn pipeline(id: u32, core: u32, scheduling: u32) -> PipelineEntry {
    PipelineEntry {
        id,
        core,
        scheduling,
        period_frames: None,
    }
}

fn topology(cores: u32) -> TopologyConfig {
    let mut topology = TopologyConfig::default();
    topology.engine.cores = cores;
    topology.engine.period_frames = PERIOD_FRAMES;
    topology
}

fn link(topology: &mut TopologyConfig, id: u32, source: u32, sink: u32) {
    topology.buffers.push(canal_config::BufferEntry {
        id,
        source,
        sink,
        size: None,
    });
}

/// host -> volume(-6 dB) -> dai, all on one core.
fn attenuated_playback() -> TopologyConfig {
    let mut topology = topology(1);
    topology.components = vec![
        ComponentEntry::new(1, "host", 1),
        ComponentEntry::new(2, "volume", 1)
            .with_setting("gain_db", -6.0206)
            .with_setting("ramp_ms", 0),
        ComponentEntry::new(3, "dai", 1),
    ];
    link(&mut topology, 1, 1, 2);
    link(&mut topology, 2, 2, 3);
    topology.pipelines.push(pipeline(1, 0, 3));
    topology
}

#[test]
fn test_playback_through_volume() {
    let engine = canal_config::build(&attenuated_playback()).unwrap();
    let host = engine.dma_port(1).unwrap();
    let dai = engine.dma_port(3).unwrap();
    assert_eq!(engine.endpoints().len(), 2);

    engine.start().unwrap();
    assert_eq!(engine.pipeline(1).unwrap().status(), PipelineStatus::Running);
    assert!(host.running() && dai.running());

    let mut out = Vec::new();
    for _ in 0..4 {
        host.feed(&s16(&[8192; PERIOD_FRAMES as usize * 2]));
        let reports = engine.tick().unwrap();
        assert!(reports.iter().all(|r| r.errors.is_empty()), "{reports:?}");
        out.extend(dai.drain(usize::MAX));
    }
    assert_eq!(out.len(), 4 * PERIOD_BYTES);
    for sample in to_s16(&out) {
        assert!((i32::from(sample) - 4096).abs() <= 1, "got {sample}");
    }
    assert!(engine.drain_xruns().is_empty());

    engine.stop().unwrap();
    engine.reset().unwrap();
    assert_eq!(engine.component(3).unwrap().state(), ComponentState::Ready);
    engine.shutdown();
}

#[test]
fn test_codec_with_default_buffers_reaches_dai() {
    let mut topology = topology(1);
    topology.components = vec![
        ComponentEntry::new(1, "host", 1),
        ComponentEntry::new(2, "codec", 1),
        ComponentEntry::new(3, "dai", 1),
    ];
    link(&mut topology, 1, 1, 2);
    link(&mut topology, 2, 2, 3);
    topology.pipelines.push(pipeline(1, 0, 3));
    assert!(topology.buffer_size(&topology.buffers[0]) >= canal_modules::codec::DEFAULT_BLOCK_BYTES);

    let engine = canal_config::build(&topology).unwrap();
    let host = engine.dma_port(1).unwrap();
    let dai = engine.dma_port(3).unwrap();
    engine.start().unwrap();

    let mut out = Vec::new();
    for _ in 0..70 {
        host.feed(&s16(&[1000; PERIOD_FRAMES as usize * 2]));
        let reports = engine.tick().unwrap();
        assert!(reports.iter().all(|r| r.errors.is_empty()), "{reports:?}");
        out.extend(dai.drain(usize::MAX));
    }
    assert!(engine.drain_xruns().is_empty());

    let samples = to_s16(&out);
    let first = samples.iter().position(|&s| s != 0).expect("codec output never reached the dai");
    assert!(samples[first..].iter().all(|&s| s == 1000), "coded stream is continuous");
    assert!(engine.component(2).unwrap().total_data_processed(0, true) > 0);
    engine.shutdown();
}

#[test]
fn test_starved_dai_reports_xrun() {
    let engine = canal_config::build(&attenuated_playback()).unwrap();
    engine.start().unwrap();
    engine.tick().unwrap();
    let xruns = engine.drain_xruns();
    assert!(!xruns.is_empty());
    assert_eq!(xruns[0].comp.0, 3);
    assert_eq!(engine.component(3).unwrap().position().unwrap().xruns as usize, xruns.len());
}

#[test]
fn test_capture_across_cores() {
    let mut topology = topology(2);
    topology.components = vec![
        ComponentEntry::new(1, "dai", 1)
            .on_core(1)
            .with_direction(Direction::Capture),
        ComponentEntry::new(2, "meter", 1).with_direction(Direction::Capture),
        ComponentEntry::new(3, "host", 1).with_direction(Direction::Capture),
    ];
    link(&mut topology, 1, 1, 2);
    link(&mut topology, 2, 2, 3);
    topology.pipelines.push(pipeline(1, 0, 1));

    let engine = canal_config::build(&topology).unwrap();
    assert_eq!(engine.core_count(), 2);
    let dai = engine.component(1).unwrap();
    assert!(dai.is_shared(), "a dai on another core is shared");

    engine.start().unwrap();
    assert_eq!(dai.state(), ComponentState::Active);

    let pcm = s16(&(0..PERIOD_FRAMES as i16 * 2 * 4).collect::<Vec<_>>());
    engine.dma_port(1).unwrap().feed(&pcm);
    let host = engine.dma_port(3).unwrap();
    let mut out = Vec::new();
    for _ in 0..12 {
        engine.tick().unwrap();
        out.extend(host.drain(usize::MAX));
    }
    assert_eq!(out, pcm, "capture delivers every frame in order");

    let peaks = engine
        .component(2)
        .unwrap()
        .get_large_config(canal_modules::meter::PARAM_PEAKS, 0, 64)
        .unwrap();
    assert_eq!(peaks.data.len(), 8);

    engine.stop().unwrap();
    assert_eq!(dai.state(), ComponentState::Prepare);
}

#[test]
fn test_dai_group_starts_pipelines_together() {
    let mut topology = topology(1);
    for n in 0..2 {
        let (host, dai, pipe) = (10 * n + 1, 10 * n + 2, n + 1);
        topology.components.push(ComponentEntry::new(host, "host", pipe));
        topology.components.push(ComponentEntry::new(dai, "dai", pipe));
        link(&mut topology, pipe, host, dai);
        topology.pipelines.push(pipeline(pipe, 0, dai));
    }
    topology.dai_groups.push(DaiGroupEntry {
        id: 4,
        members: vec![2, 12],
    });

    let engine = canal_config::build(&topology).unwrap();
    let group = engine.dai_groups().get(4).unwrap();
    assert_eq!(group.members(), 2);

    engine.params().unwrap();
    engine.prepare().unwrap();
    let first = engine.pipeline(1).unwrap();
    first.trigger(engine.idc(), canal_core::TriggerCmd::Start).unwrap();
    assert!(!engine.dma_port(2).unwrap().running(), "first member waits for the group");

    let second = engine.pipeline(2).unwrap();
    second.trigger(engine.idc(), canal_core::TriggerCmd::Start).unwrap();
    assert!(engine.dma_port(2).unwrap().running());
    assert!(engine.dma_port(12).unwrap().running());
    assert_eq!(group.rounds_fired(), 1);
}

#[test]
fn test_custom_driver() {
    let mut topology = attenuated_playback();
    topology.components.push(ComponentEntry::new(4, "custom:5", 1));
    topology.buffers[1].sink = 4;
    link(&mut topology, 3, 4, 3);

    let err = canal_config::build(&topology).unwrap_err();
    assert!(matches!(
        err,
        ConfigError::Registry(RegistryError::UnknownType(ComponentType::Custom(5)))
    ));

    let tap = ModuleDriver::new(
        ComponentType::Custom(5),
        "tap",
        "Pass-through tap",
        |_, _| Ok(Box::new(canal_modules::Meter::new())),
        AdapterSettings::default(),
    );
    let engine = canal_config::Engine::build_with(&topology, vec![Arc::new(tap)]).unwrap();
    assert_eq!(engine.registry().len(), 8);
    assert_eq!(engine.pipeline(1).unwrap().components().len(), 4);

    engine.start().unwrap();
    engine.dma_port(1).unwrap().feed(&s16(&[100; PERIOD_FRAMES as usize * 2]));
    engine.tick().unwrap();
    assert_eq!(engine.dma_port(3).unwrap().drain(usize::MAX).len(), PERIOD_BYTES);
}

#[test]
fn test_build_rejects_invalid_topology() {
    let mut topology = attenuated_playback();
    topology.pipelines[0].scheduling = 99;
    assert!(matches!(
        canal_config::build(&topology),
        Err(ConfigError::UnknownReference { id: 99, .. })
    ));

    let mut topology = attenuated_playback();
    topology.components[1].settings.insert("gain_db".into(), "loud".into());
    assert!(matches!(canal_config::build(&topology), Err(ConfigError::Registry(_))));
}

#[test]
fn test_topology_file_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("playback.toml");
    let topology = attenuated_playback();
    topology.save(&path).unwrap();

    let loaded = TopologyConfig::load(&path).unwrap();
    assert_eq!(loaded, topology);
    let engine = canal_config::build(&loaded).unwrap();
    assert_eq!(engine.component_ids().len(), 3);

    let missing = dir.path().join("missing.toml");
    assert!(matches!(TopologyConfig::load(&missing), Err(ConfigError::ReadFile { .. })));
}
