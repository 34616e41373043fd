//! Driver listing command.

#![allow(clippy::print_literal)] // Table headers use literal strings intentionally

use canal_core::{AdapterSettings, DaiGroups, SimDmaBank, XrunNotifier};
use canal_registry::{BuiltinContext, DEFAULT_FIFO_BYTES, DriverRegistry};
use clap::Args;
use std::sync::Arc;

#[derive(Args)]
pub struct DriversArgs {
    /// Show details for a specific driver
    #[arg(value_name = "DRIVER")]
    driver: Option<String>,
}

struct Setting {
    key: &'static str,
    default: String,
    description: &'static str,
}

fn settings(name: &str) -> Vec<Setting> {
    use canal_modules::{codec, demux, mixer, volume};
    let setting = |key: &'static str, default: String, description: &'static str| Setting {
        key,
        default,
        description,
    };
    match name {
        "host" | "dai" => vec![setting(
            "fifo_bytes",
            DEFAULT_FIFO_BYTES.to_string(),
            "DMA FIFO depth in bytes",
        )],
        "volume" => vec![
            setting("gain_db", "0".to_string(), "Initial gain in dB (-90 mutes)"),
            setting(
                "ramp_ms",
                volume::DEFAULT_RAMP_MS.to_string(),
                "Gain ramp duration in milliseconds",
            ),
        ],
        "mixer" => vec![setting(
            "max_inputs",
            mixer::DEFAULT_MAX_INPUTS.to_string(),
            "Maximum number of input streams",
        )],
        "demux" => vec![setting(
            "max_outputs",
            demux::DEFAULT_MAX_OUTPUTS.to_string(),
            "Maximum number of output streams",
        )],
        "codec" => vec![setting(
            "block_bytes",
            codec::DEFAULT_BLOCK_BYTES.to_string(),
            "Native block size in bytes",
        )],
        _ => Vec::new(),
    }
}

pub fn run(args: DriversArgs) -> anyhow::Result<()> {
    let registry = DriverRegistry::with_builtin(&BuiltinContext {
        dma: Arc::new(SimDmaBank::new()),
        groups: Arc::new(DaiGroups::new()),
        notifier: XrunNotifier::disabled(),
        adapter: AdapterSettings::default(),
    });
    let drivers = registry.drivers();

    if let Some(name) = &args.driver {
        let driver = drivers
            .iter()
            .find(|d| d.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| anyhow::anyhow!("Unknown driver: {}", name))?;

        println!("{}", driver.name);
        println!("{}", "=".repeat(driver.name.len()));
        println!();
        println!("{}", driver.description);
        println!();

        let entries = settings(&driver.name);
        if entries.is_empty() {
            println!("No settings.");
            return Ok(());
        }
        println!("Settings:");
        println!();
        println!("  {:12}  {:10}  {}", "Name", "Default", "Description");
        println!("  {:12}  {:10}  {}", "----", "-------", "-----------");
        for s in &entries {
            println!("  {:12}  {:10}  {}", s.key, s.default, s.description);
        }
        println!();
        println!("Example topology entry:");
        println!();
        println!("  [[components]]");
        println!("  id = 1");
        println!("  type = \"{}\"", driver.name);
        println!("  pipeline = 1");
        println!("  [components.settings]");
        for s in &entries {
            println!("  {} = {}", s.key, s.default);
        }
    } else {
        println!("Available Drivers");
        println!("=================");
        println!();
        for driver in &drivers {
            println!("  {:8} - {}", driver.name, driver.description);
        }
        println!();
        println!("Use 'canal drivers <name>' for the settings a driver accepts.");
    }

    Ok(())
}
