//! Run a topology on simulated DMA and report throughput.

#![allow(clippy::print_literal)] // Table headers use literal strings intentionally

use super::common::{Generator, PortRole, Signal, load_topology, peak, port_role};
use anyhow::Context;
use canal_core::{FrameFormat, SimDmaPort, XrunKind};
use clap::Args;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;

#[derive(Args)]
pub struct RunArgs {
    /// Topology file (TOML)
    topology: PathBuf,

    /// Number of scheduling periods to run
    #[arg(short, long, default_value = "100")]
    periods: u64,

    /// Signal fed into source endpoints
    #[arg(long, value_enum, default_value = "sine")]
    signal: Signal,

    /// Test tone frequency in Hz
    #[arg(long, default_value = "1000")]
    frequency: f32,

    /// Signal amplitude (0.0 - 1.0)
    #[arg(long, default_value = "0.5")]
    amplitude: f32,

    /// Stop feeding after this many periods to provoke underruns
    #[arg(long)]
    starve_after: Option<u64>,

    /// Write a JSON report to this path
    #[arg(long)]
    json: Option<PathBuf>,
}

struct Port {
    comp: u32,
    role: PortRole,
    format: FrameFormat,
    period_frames: usize,
    dma: SimDmaPort,
    generator: Generator,
    bytes: u64,
    peak: f32,
}

#[derive(Default)]
struct XrunCount {
    underruns: u64,
    overruns: u64,
    bytes: u64,
}

pub fn run(args: RunArgs) -> anyhow::Result<()> {
    let topology = load_topology(&args.topology)?;
    let engine = canal_config::build(&topology).context("building engine")?;
    let params = engine.stream_params();

    let mut ports = Vec::new();
    for entry in &topology.components {
        let Some(role) = port_role(entry) else {
            continue;
        };
        let dma = engine
            .dma_port(entry.id)
            .with_context(|| format!("component {} has no DMA channel", entry.id))?;
        let period_frames = topology
            .pipeline(entry.pipeline)
            .map_or(topology.engine.period_frames, |p| topology.pipeline_period(p)) as usize;
        ports.push(Port {
            comp: entry.id,
            role,
            format: entry.format,
            period_frames,
            dma,
            generator: Generator::new(args.signal, args.frequency, args.amplitude, params.rate),
            bytes: 0,
            peak: 0.0,
        });
    }

    println!("Running {} for {} periods", args.topology.display(), args.periods);
    println!(
        "  {} core(s), {} Hz, {} channel(s), {} component(s), {} pipeline(s)",
        engine.core_count(),
        params.rate,
        params.channels,
        topology.components.len(),
        topology.pipelines.len()
    );

    engine.start().context("starting pipelines")?;

    let mut tick_errors = 0usize;
    let mut xruns: BTreeMap<u32, XrunCount> = BTreeMap::new();
    let started = Instant::now();
    for period in 0..args.periods {
        let feeding = args.starve_after.is_none_or(|n| period < n);
        for port in ports.iter_mut().filter(|p| p.role == PortRole::Feed && feeding) {
            let pcm = port.generator.period(port.format, params.channels, port.period_frames);
            let taken = port.dma.feed(&pcm);
            port.bytes += taken as u64;
            port.peak = port.peak.max(peak(port.format, &pcm[..taken]));
        }

        for report in engine.tick().context("ticking cores")? {
            for err in &report.errors {
                tracing::warn!(core = report.core.0, tick = report.tick, "{err}");
            }
            tick_errors += report.errors.len();
        }

        for port in ports.iter_mut().filter(|p| p.role == PortRole::Drain) {
            let out = port.dma.drain(usize::MAX);
            port.bytes += out.len() as u64;
            port.peak = port.peak.max(peak(port.format, &out));
        }

        for event in engine.drain_xruns() {
            let count = xruns.entry(event.comp.0).or_default();
            match event.kind {
                XrunKind::Underrun => count.underruns += 1,
                XrunKind::Overrun => count.overruns += 1,
            }
            count.bytes += event.bytes as u64;
        }
    }
    let elapsed = started.elapsed();

    engine.stop().context("stopping pipelines")?;
    engine.reset().context("resetting pipelines")?;

    let audio_secs = args.periods as f64 * f64::from(topology.engine.period_frames) / f64::from(params.rate);
    let wall_secs = elapsed.as_secs_f64();
    println!();
    println!("  {:10}  {:6}  {:>12}  {:>10}  {:>9}", "Endpoint", "Role", "Bytes", "Frames", "Peak dB");
    println!("  {:10}  {:6}  {:>12}  {:>10}  {:>9}", "--------", "----", "-----", "------", "-------");
    for port in &ports {
        let frame_bytes = port.format.sample_bytes() * params.channels as usize;
        println!(
            "  {:10}  {:6}  {:>12}  {:>10}  {:>9.1}",
            format!("comp{}", port.comp),
            match port.role {
                PortRole::Feed => "feed",
                PortRole::Drain => "drain",
            },
            port.bytes,
            port.bytes / frame_bytes as u64,
            canal_modules::sample::linear_to_db(port.peak)
        );
    }
    println!();
    println!("  Audio time:   {audio_secs:.3} s");
    println!("  Wall time:    {wall_secs:.3} s");
    if wall_secs > 0.0 {
        println!("  Speed:        {:.1}x realtime", audio_secs / wall_secs);
    }
    println!("  Tick errors:  {tick_errors}");
    if xruns.is_empty() {
        println!("  Xruns:        none");
    } else {
        for (comp, count) in &xruns {
            println!(
                "  Xruns:        comp{comp}: {} underrun(s), {} overrun(s), {} byte(s)",
                count.underruns, count.overruns, count.bytes
            );
        }
    }

    if let Some(path) = &args.json {
        let endpoints: Vec<_> = ports
            .iter()
            .map(|p| {
                serde_json::json!({
                    "component": p.comp,
                    "role": match p.role {
                        PortRole::Feed => "feed",
                        PortRole::Drain => "drain",
                    },
                    "format": p.format.name(),
                    "bytes": p.bytes,
                    "peak": p.peak,
                })
            })
            .collect();
        let xrun_list: Vec<_> = xruns
            .iter()
            .map(|(comp, c)| {
                serde_json::json!({
                    "component": comp,
                    "underruns": c.underruns,
                    "overruns": c.overruns,
                    "bytes": c.bytes,
                })
            })
            .collect();
        let report = serde_json::json!({
            "topology": args.topology.to_string_lossy(),
            "periods": args.periods,
            "cores": engine.core_count(),
            "rate": params.rate,
            "channels": params.channels,
            "audio_seconds": audio_secs,
            "wall_seconds": wall_secs,
            "tick_errors": tick_errors,
            "endpoints": endpoints,
            "xruns": xrun_list,
        });
        std::fs::write(path, serde_json::to_string_pretty(&report)?)
            .with_context(|| format!("writing {}", path.display()))?;
        println!("\nWrote report to {}", path.display());
    }

    engine.shutdown();
    Ok(())
}
