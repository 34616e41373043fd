//! Helpers shared by the CLI commands.

use anyhow::Context;
use canal_config::{ComponentEntry, TopologyConfig};
use canal_core::{ComponentType, Direction, FrameFormat};
use canal_modules::sample;
use clap::ValueEnum;
use std::f32::consts::TAU;
use std::path::Path;

/// Load and validate a topology file.
pub fn load_topology(path: &Path) -> anyhow::Result<TopologyConfig> {
    let topology =
        TopologyConfig::load(path).with_context(|| format!("loading topology {}", path.display()))?;
    topology
        .validate()
        .with_context(|| format!("validating topology {}", path.display()))?;
    Ok(topology)
}

/// How the testbench drives an endpoint's DMA channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortRole {
    /// The testbench feeds data in (host playback, dai capture).
    Feed,
    /// The testbench drains data out (dai playback, host capture).
    Drain,
}

/// Role of `entry`, or `None` when it is not an endpoint.
pub fn port_role(entry: &ComponentEntry) -> Option<PortRole> {
    let comp_type = entry.parsed_type().ok()?;
    match (comp_type, entry.direction) {
        (ComponentType::Host, Direction::Playback) | (ComponentType::Dai, Direction::Capture) => {
            Some(PortRole::Feed)
        }
        (ComponentType::Host, Direction::Capture) | (ComponentType::Dai, Direction::Playback) => {
            Some(PortRole::Drain)
        }
        _ => None,
    }
}

/// Test signal fed into source endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Signal {
    /// Sine tone.
    Sine,
    /// Rising sawtooth.
    Ramp,
    /// Digital silence.
    Silence,
}

/// Interleaved PCM generator with the same value on every channel.
#[derive(Debug, Clone)]
pub struct Generator {
    signal: Signal,
    amplitude: f32,
    phase: f32,
    step: f32,
}

impl Generator {
    /// Generator for `signal` at `frequency` Hz.
    pub fn new(signal: Signal, frequency: f32, amplitude: f32, rate: u32) -> Self {
        Self {
            signal,
            amplitude: amplitude.clamp(0.0, 1.0),
            phase: 0.0,
            step: frequency / rate as f32,
        }
    }

    fn next_value(&mut self) -> f32 {
        let value = match self.signal {
            Signal::Sine => (self.phase * TAU).sin(),
            Signal::Ramp => self.phase * 2.0 - 1.0,
            Signal::Silence => 0.0,
        };
        self.phase = (self.phase + self.step).fract();
        value * self.amplitude
    }

    /// Next `frames` frames encoded in `format`.
    pub fn period(&mut self, format: FrameFormat, channels: u16, frames: usize) -> Vec<u8> {
        let sample_bytes = format.sample_bytes();
        let mut out = vec![0u8; frames * channels as usize * sample_bytes];
        for frame in out.chunks_exact_mut(channels as usize * sample_bytes) {
            let value = self.next_value();
            for slot in frame.chunks_exact_mut(sample_bytes) {
                sample::encode(format, value, slot);
            }
        }
        out
    }
}

/// Largest absolute sample in `bytes`.
pub fn peak(format: FrameFormat, bytes: &[u8]) -> f32 {
    bytes
        .chunks_exact(format.sample_bytes())
        .map(|s| sample::decode(format, s).abs())
        .fold(0.0, f32::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_is_zero() {
        let mut generator = Generator::new(Signal::Silence, 1000.0, 1.0, 48_000);
        assert!(generator.period(FrameFormat::S16Le, 2, 8).iter().all(|&b| b == 0));
    }

    #[test]
    fn sine_stays_within_amplitude() {
        let mut generator = Generator::new(Signal::Sine, 1000.0, 0.5, 48_000);
        let pcm = generator.period(FrameFormat::S32Le, 2, 96);
        assert_eq!(pcm.len(), 96 * 2 * 4);
        let p = peak(FrameFormat::S32Le, &pcm);
        assert!(p > 0.45 && p <= 0.5 + 1e-6, "peak {p}");
    }

    #[test]
    fn channels_carry_the_same_value() {
        let mut generator = Generator::new(Signal::Ramp, 480.0, 1.0, 48_000);
        let pcm = generator.period(FrameFormat::S16Le, 2, 4);
        for frame in pcm.chunks_exact(4) {
            assert_eq!(frame[..2], frame[2..]);
        }
    }

    #[test]
    fn roles() {
        let host = ComponentEntry::new(1, "host", 1);
        let dai = ComponentEntry::new(2, "dai", 1);
        assert_eq!(port_role(&host), Some(PortRole::Feed));
        assert_eq!(port_role(&dai), Some(PortRole::Drain));
        let dai = dai.with_direction(Direction::Capture);
        assert_eq!(port_role(&dai), Some(PortRole::Feed));
        assert_eq!(port_role(&ComponentEntry::new(3, "volume", 1)), None);
    }
}
