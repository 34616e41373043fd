//! Topology files and engine construction for the canal pipeline engine.
//!
//! A topology is a TOML file naming the components to create, the buffers
//! joining them, the pipelines they form and the engine they run on. This
//! crate parses and validates topologies and turns them into a running
//! [`Engine`] through the driver registry.
//!
//! # Features
//!
//! - **Topology Files**: Load and save [`TopologyConfig`] as TOML
//! - **Validation**: Unique ids, resolvable references, cores in range
//! - **Engine Builder**: Cores, components, buffers, DAI groups and
//!   scheduled pipelines from one call to [`build`]
//!
//! # Example
//!
//! ```rust,no_run
//! use canal_config::TopologyConfig;
//!
//! let topology = TopologyConfig::load("playback.toml").unwrap();
//! let engine = canal_config::build(&topology).unwrap();
//! engine.start().unwrap();
//! for _ in 0..100 {
//!     engine.tick().unwrap();
//! }
//! engine.stop().unwrap();
//! engine.shutdown();
//! ```

mod engine;
mod error;
mod topology;

pub use engine::{Engine, XRUN_QUEUE};
pub use error::ConfigError;
pub use topology::{BufferEntry, ComponentEntry, DaiGroupEntry, EngineConfig, PipelineEntry, TopologyConfig};

/// Build a running engine from `topology` with the built-in drivers.
pub fn build(topology: &TopologyConfig) -> Result<Engine, ConfigError> {
    Engine::build(topology)
}
