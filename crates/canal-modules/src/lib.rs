//! Canal Modules - processing modules for the canal pipeline engine
//!
//! Each module implements [`ProcessingModule`](canal_core::ProcessingModule)
//! and exactly one processing entry point, and is driven by a
//! [`ModuleAdapter`](canal_core::ModuleAdapter):
//!
//! - [`Volume`] - Gain stage with ramping and format conversion (stream copy, 1:1)
//! - [`Mixer`] - Saturating sum of N inputs (stream copy, N:1)
//! - [`Demux`] - One input copied to N outputs (stream copy, 1:N)
//! - [`BlockCodec`] - Whole-block processing at a native block size (raw block)
//! - [`Meter`] - Pass-through peak meter (source/sink objects)
//!
//! Module settings travel as configuration blobs through
//! `set_large_config` / `get_large_config`; each module documents its
//! parameter ids.
//!
//! ## Example
//!
//! ```rust,ignore
//! use canal_core::{AdapterSettings, ComponentCell, ModuleAdapter};
//! use canal_modules::Volume;
//!
//! let ops = ModuleAdapter::new(Box::new(Volume::new(-3.0)), AdapterSettings::default())?;
//! let volume = ComponentCell::from_ops(config, Box::new(ops));
//! volume.set_large_config(canal_modules::volume::PARAM_GAIN_DB, true, true, 4, &(-6.0f32).to_le_bytes())?;
//! ```

pub mod codec;
pub mod demux;
pub mod meter;
pub mod mixer;
pub mod sample;
pub mod volume;

#[cfg(test)]
mod rig;

pub use codec::BlockCodec;
pub use demux::Demux;
pub use meter::Meter;
pub use mixer::Mixer;
pub use volume::{GainRamp, Volume};
