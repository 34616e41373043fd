//! Peak level meter.
//!
//! Passes audio through unchanged while tracking the absolute peak of each
//! channel. Runs in the source/sink-object topology: the meter asks its
//! source for data and its sink for space itself, and moves whatever both
//! sides allow.

use crate::sample::{self, linear_to_db};
use canal_core::{ComponentError, PrepareContext, ProcessingModule, Result, Sink, Source, SourceSinkProcess};

/// Per-channel peaks as `f32` LE linear values. Writing any payload clears them.
pub const PARAM_PEAKS: u32 = 0;

/// Meter module.
#[derive(Debug, Default)]
pub struct Meter {
    peaks: Vec<f32>,
    scratch: Vec<u8>,
    decoded: Vec<f32>,
}

impl Meter {
    /// Meter with no history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Linear peak per channel since the last clear.
    pub fn peaks(&self) -> &[f32] {
        &self.peaks
    }

    /// Peak per channel in dB.
    pub fn peaks_db(&self) -> Vec<f32> {
        self.peaks.iter().map(|&p| linear_to_db(p)).collect()
    }

    /// Forget the recorded peaks.
    pub fn clear(&mut self) {
        self.peaks.iter_mut().for_each(|p| *p = 0.0);
    }
}

impl SourceSinkProcess for Meter {
    fn process(&mut self, sources: &mut [Source<'_>], sinks: &mut [Sink<'_>]) -> Result<()> {
        let (Some(source), Some(sink)) = (sources.first_mut(), sinks.first_mut()) else {
            return Err(ComponentError::NoData);
        };
        let params = *source.params();
        let frame_bytes = params.frame_bytes().max(1);
        let frames = (source.data_available() / frame_bytes).min(sink.free_size() / frame_bytes);
        if frames == 0 {
            return Err(if source.data_available() < frame_bytes {
                ComponentError::NoData
            } else {
                ComponentError::NoSpace
            });
        }
        let bytes = frames * frame_bytes;

        let (head, tail) = source.get_data(bytes)?;
        self.scratch.clear();
        self.scratch.extend_from_slice(head);
        self.scratch.extend_from_slice(tail);
        source.release_data(bytes)?;

        let channels = params.channels as usize;
        if self.peaks.len() != channels {
            self.peaks = vec![0.0; channels];
        }
        sample::decode_into(params.format, &self.scratch, &mut self.decoded);
        for frame in self.decoded.chunks_exact(channels) {
            for (peak, s) in self.peaks.iter_mut().zip(frame) {
                *peak = peak.max(s.abs());
            }
        }

        let (head, tail) = sink.get_buffer(bytes)?;
        let split = head.len();
        head.copy_from_slice(&self.scratch[..split]);
        tail.copy_from_slice(&self.scratch[split..]);
        sink.commit_buffer(bytes)
    }
}

impl ProcessingModule for Meter {
    fn name(&self) -> &str {
        "meter"
    }

    fn prepare(&mut self, ctx: &PrepareContext) -> Result<()> {
        let (Some(source), Some(sink)) = (ctx.sources.first(), ctx.sinks.first()) else {
            return Err(ComponentError::invalid("meter needs one source and one sink"));
        };
        if source != sink {
            return Err(ComponentError::invalid(format!(
                "meter passes audio through unchanged; {source:?} in, {sink:?} out"
            )));
        }
        self.peaks = vec![0.0; source.channels as usize];
        Ok(())
    }

    fn reset(&mut self) {
        self.clear();
    }

    fn set_configuration(&mut self, param_id: u32, _data: &[u8]) -> Result<()> {
        if param_id != PARAM_PEAKS {
            return Err(ComponentError::NotSupported("meter parameter"));
        }
        self.clear();
        Ok(())
    }

    fn get_configuration(&self, param_id: u32) -> Result<Vec<u8>> {
        if param_id != PARAM_PEAKS {
            return Err(ComponentError::NotSupported("meter parameter"));
        }
        Ok(self.peaks.iter().flat_map(|p| p.to_le_bytes()).collect())
    }

    fn as_source_sink(&mut self) -> Option<&mut dyn SourceSinkProcess> {
        Some(self)
    }
}
