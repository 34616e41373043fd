//! Gain stage with a linear per-frame ramp and optional format conversion.
//!
//! The volume module runs in the stream-copy topology with one source and
//! one sink. Input is read in the source buffer's format and written in the
//! sink buffer's format, so a volume placed between an S16 host and an S32
//! DAI doubles as the converter.
//!
//! ## Configuration
//!
//! | Param | Payload | Meaning |
//! |-------|---------|---------|
//! | [`PARAM_GAIN_DB`] | `f32` LE | Target gain in dB, clamped to [`MIN_GAIN_DB`]..=[`MAX_GAIN_DB`] |
//! | [`PARAM_RAMP_MS`] | `u32` LE | Ramp length for subsequent gain changes |
//!
//! At [`MIN_GAIN_DB`] the stage mutes.

use crate::sample::{self, db_to_linear};
use canal_core::{
    ComponentError, PrepareContext, ProcessingModule, Result, StreamInput, StreamOutput, StreamProcess, TriggerCmd,
};

/// Gain target in dB.
pub const PARAM_GAIN_DB: u32 = 0;
/// Ramp length in milliseconds.
pub const PARAM_RAMP_MS: u32 = 1;

/// Lowest gain; treated as mute.
pub const MIN_GAIN_DB: f32 = -90.0;
/// Highest gain.
pub const MAX_GAIN_DB: f32 = 20.0;
/// Ramp length used until configured otherwise.
pub const DEFAULT_RAMP_MS: u32 = 10;

/// Linear ramp between gain values, advanced once per frame.
#[derive(Debug, Clone)]
pub struct GainRamp {
    current: f32,
    target: f32,
    increment: f32,
    frames_remaining: u32,
    rate: u32,
    ramp_ms: u32,
}

impl GainRamp {
    /// Ramp resting at `initial`.
    pub fn new(initial: f32, rate: u32, ramp_ms: u32) -> Self {
        Self {
            current: initial,
            target: initial,
            increment: 0.0,
            frames_remaining: 0,
            rate,
            ramp_ms,
        }
    }

    /// Start moving toward `target`.
    pub fn set_target(&mut self, target: f32) {
        if (target - self.target).abs() < 1e-9 {
            return;
        }
        self.target = target;
        let frames = (u64::from(self.ramp_ms) * u64::from(self.rate) / 1000) as u32;
        if frames == 0 {
            self.snap_to_target();
        } else {
            self.increment = (target - self.current) / frames as f32;
            self.frames_remaining = frames;
        }
    }

    /// Update the frame rate; an unfinished ramp keeps its slope.
    pub fn set_rate(&mut self, rate: u32) {
        self.rate = rate;
    }

    /// Set the ramp length for future changes.
    pub fn set_ramp_ms(&mut self, ramp_ms: u32) {
        self.ramp_ms = ramp_ms;
    }

    /// Next gain value.
    #[inline]
    pub fn advance(&mut self) -> f32 {
        if self.frames_remaining > 0 {
            self.current += self.increment;
            self.frames_remaining -= 1;
            if self.frames_remaining == 0 {
                self.current = self.target;
            }
        }
        self.current
    }

    /// Current gain.
    #[inline]
    pub fn get(&self) -> f32 {
        self.current
    }

    /// Gain being ramped to.
    #[inline]
    pub fn target(&self) -> f32 {
        self.target
    }

    /// True when no ramp is in progress.
    #[inline]
    pub fn is_settled(&self) -> bool {
        self.frames_remaining == 0
    }

    /// Jump to the target.
    pub fn snap_to_target(&mut self) {
        self.current = self.target;
        self.increment = 0.0;
        self.frames_remaining = 0;
    }
}

/// Gain stage module.
///
/// ## Example
///
/// ```rust
/// use canal_core::{AdapterSettings, ModuleAdapter};
/// use canal_modules::Volume;
///
/// let adapter = ModuleAdapter::new(Box::new(Volume::new(-6.0)), AdapterSettings::default()).unwrap();
/// assert_eq!(adapter.topology(), canal_core::ProcessingTopology::StreamCopy);
/// ```
#[derive(Debug)]
pub struct Volume {
    gain_db: f32,
    ramp: GainRamp,
    raw: Vec<u8>,
    samples: Vec<f32>,
    encoded: Vec<u8>,
}

fn gain_for(db: f32) -> f32 {
    if db <= MIN_GAIN_DB { 0.0 } else { db_to_linear(db) }
}

impl Volume {
    /// Volume starting at `gain_db`, with no ramp toward the initial value.
    pub fn new(gain_db: f32) -> Self {
        let gain_db = gain_db.clamp(MIN_GAIN_DB, MAX_GAIN_DB);
        Self {
            gain_db,
            ramp: GainRamp::new(gain_for(gain_db), 48_000, DEFAULT_RAMP_MS),
            raw: Vec::new(),
            samples: Vec::new(),
            encoded: Vec::new(),
        }
    }

    /// Target gain in dB.
    pub fn gain_db(&self) -> f32 {
        self.gain_db
    }

    /// Ramp toward `gain_db`.
    pub fn set_gain_db(&mut self, gain_db: f32) {
        self.gain_db = gain_db.clamp(MIN_GAIN_DB, MAX_GAIN_DB);
        self.ramp.set_target(gain_for(self.gain_db));
    }

    /// Set the ramp length used by later gain changes.
    pub fn set_ramp_ms(&mut self, ramp_ms: u32) {
        self.ramp.set_ramp_ms(ramp_ms);
    }

    /// The ramp driving the gain.
    pub fn ramp(&self) -> &GainRamp {
        &self.ramp
    }

    fn is_transparent(&self) -> bool {
        self.ramp.is_settled() && (self.ramp.get() - 1.0).abs() < f32::EPSILON
    }
}

impl Default for Volume {
    fn default() -> Self {
        Self::new(0.0)
    }
}

fn payload<const N: usize>(param_id: u32, data: &[u8]) -> Result<[u8; N]> {
    data.try_into()
        .map_err(|_| ComponentError::invalid(format!("param {param_id}: expected {N} bytes, got {}", data.len())))
}

impl StreamProcess for Volume {
    fn process(&mut self, inputs: &mut [StreamInput<'_>], outputs: &mut [StreamOutput<'_>], frames: usize) -> Result<()> {
        let (Some(input), Some(output)) = (inputs.first_mut(), outputs.first_mut()) else {
            return Err(ComponentError::NoData);
        };
        let in_params = *input.params();
        let out_format = output.params().format;
        let bytes = frames * in_params.frame_bytes();

        self.raw.resize(bytes, 0);
        input.read(0, &mut self.raw);
        if self.is_transparent() && in_params.format == out_format {
            output.write(&self.raw);
        } else {
            sample::decode_into(in_params.format, &self.raw, &mut self.samples);
            for frame in self.samples.chunks_exact_mut(in_params.channels as usize) {
                let gain = self.ramp.advance();
                frame.iter_mut().for_each(|s| *s *= gain);
            }
            sample::encode_into(out_format, &self.samples, &mut self.encoded);
            output.write(&self.encoded);
        }
        input.consume(bytes);
        Ok(())
    }
}

impl ProcessingModule for Volume {
    fn name(&self) -> &str {
        "volume"
    }

    fn prepare(&mut self, ctx: &PrepareContext) -> Result<()> {
        let (Some(source), Some(sink)) = (ctx.sources.first(), ctx.sinks.first()) else {
            return Err(ComponentError::invalid("volume needs one source and one sink"));
        };
        if source.channels != sink.channels || source.rate != sink.rate {
            return Err(ComponentError::invalid(format!(
                "volume cannot convert {}ch@{} to {}ch@{}",
                source.channels, source.rate, sink.channels, sink.rate
            )));
        }
        self.ramp.set_rate(source.rate);
        tracing::debug!(gain_db = self.gain_db, from = ?source.format, to = ?sink.format, "volume prepared");
        Ok(())
    }

    fn trigger(&mut self, cmd: TriggerCmd) -> Result<()> {
        if cmd == TriggerCmd::Start {
            self.ramp.snap_to_target();
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.ramp.snap_to_target();
    }

    fn set_configuration(&mut self, param_id: u32, data: &[u8]) -> Result<()> {
        match param_id {
            PARAM_GAIN_DB => {
                let db = f32::from_le_bytes(payload(param_id, data)?);
                if !db.is_finite() {
                    return Err(ComponentError::invalid("gain must be finite"));
                }
                self.set_gain_db(db);
            }
            PARAM_RAMP_MS => self.set_ramp_ms(u32::from_le_bytes(payload(param_id, data)?)),
            _ => return Err(ComponentError::NotSupported("volume parameter")),
        }
        Ok(())
    }

    fn get_configuration(&self, param_id: u32) -> Result<Vec<u8>> {
        match param_id {
            PARAM_GAIN_DB => Ok(self.gain_db.to_le_bytes().to_vec()),
            PARAM_RAMP_MS => Ok(self.ramp.ramp_ms.to_le_bytes().to_vec()),
            _ => Err(ComponentError::NotSupported("volume parameter")),
        }
    }

    fn as_stream(&mut self) -> Option<&mut dyn StreamProcess> {
        Some(self)
    }
}
