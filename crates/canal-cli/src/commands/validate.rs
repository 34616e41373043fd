//! Topology checking command.

use super::common::load_topology;
use anyhow::Context;
use clap::Args;
use std::path::PathBuf;

#[derive(Args)]
pub struct ValidateArgs {
    /// Topology files (TOML)
    #[arg(required = true)]
    topologies: Vec<PathBuf>,

    /// Also instantiate every component and build the pipelines
    #[arg(long)]
    build: bool,
}

pub fn run(args: ValidateArgs) -> anyhow::Result<()> {
    for path in &args.topologies {
        let topology = load_topology(path)?;

        println!("{}: ok", path.display());
        println!(
            "  engine: {} core(s), {} frames/period, {} Hz, {} channel(s)",
            topology.engine.cores, topology.engine.period_frames, topology.engine.rate, topology.engine.channels
        );
        for pipeline in &topology.pipelines {
            let members: Vec<String> = topology
                .components
                .iter()
                .filter(|c| c.pipeline == pipeline.id)
                .map(|c| {
                    let core = topology.component_core(c);
                    if core == pipeline.core {
                        format!("{}:{}", c.id, c.comp_type)
                    } else {
                        format!("{}:{}@core{}", c.id, c.comp_type, core)
                    }
                })
                .collect();
            println!(
                "  pipeline {} on core{}, {} frames, scheduled by {}: {}",
                pipeline.id,
                pipeline.core,
                topology.pipeline_period(pipeline),
                pipeline.scheduling,
                members.join(" ")
            );
        }
        for buffer in &topology.buffers {
            println!(
                "  buffer {}: {} -> {} ({} bytes)",
                buffer.id,
                buffer.source,
                buffer.sink,
                topology.buffer_size(buffer)
            );
        }
        for group in &topology.dai_groups {
            let members: Vec<String> = group.members.iter().map(u32::to_string).collect();
            println!("  dai group {}: {}", group.id, members.join(", "));
        }

        if args.build {
            let engine = canal_config::build(&topology).with_context(|| format!("building {}", path.display()))?;
            println!(
                "  built: {} component(s), {} endpoint(s)",
                engine.component_ids().len(),
                engine.endpoints().len()
            );
            engine.shutdown();
        }
    }
    Ok(())
}
