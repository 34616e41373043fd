//! N:1 mixer.
//!
//! Sums every active input into one output with saturation. Inputs whose
//! producer is not running are skipped by the stream-copy engine, so a
//! stopped stream contributes silence rather than stale data.

use crate::sample;
use canal_core::{
    ComponentError, PrepareContext, ProcessingModule, Result, StreamInput, StreamOutput, StreamProcess,
};

/// Inputs accepted unless configured otherwise.
pub const DEFAULT_MAX_INPUTS: usize = 4;

/// Mixer module.
#[derive(Debug)]
pub struct Mixer {
    max_inputs: usize,
    raw: Vec<u8>,
    decoded: Vec<f32>,
    mix: Vec<f32>,
    encoded: Vec<u8>,
}

impl Mixer {
    /// Mixer accepting up to `max_inputs` sources.
    pub fn new(max_inputs: usize) -> Self {
        Self {
            max_inputs: max_inputs.max(1),
            raw: Vec::new(),
            decoded: Vec::new(),
            mix: Vec::new(),
            encoded: Vec::new(),
        }
    }
}

impl Default for Mixer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_INPUTS)
    }
}

impl StreamProcess for Mixer {
    fn process(&mut self, inputs: &mut [StreamInput<'_>], outputs: &mut [StreamOutput<'_>], frames: usize) -> Result<()> {
        let Some(output) = outputs.first_mut() else {
            return Err(ComponentError::NoSpace);
        };
        let out_params = *output.params();
        self.mix.clear();
        self.mix.resize(frames * out_params.channels as usize, 0.0);

        for input in inputs.iter_mut() {
            let params = *input.params();
            let bytes = frames * params.frame_bytes();
            self.raw.resize(bytes, 0);
            input.read(0, &mut self.raw);
            sample::decode_into(params.format, &self.raw, &mut self.decoded);
            for (acc, s) in self.mix.iter_mut().zip(&self.decoded) {
                *acc += *s;
            }
            input.consume(bytes);
        }

        sample::encode_into(out_params.format, &self.mix, &mut self.encoded);
        output.write(&self.encoded);
        Ok(())
    }
}

impl ProcessingModule for Mixer {
    fn name(&self) -> &str {
        "mixer"
    }

    fn prepare(&mut self, ctx: &PrepareContext) -> Result<()> {
        let Some(sink) = ctx.sinks.first() else {
            return Err(ComponentError::invalid("mixer has no output"));
        };
        if let Some(bad) = ctx
            .sources
            .iter()
            .find(|s| s.channels != sink.channels || s.rate != sink.rate)
        {
            return Err(ComponentError::invalid(format!(
                "mixer input {}ch@{} does not match output {}ch@{}",
                bad.channels, bad.rate, sink.channels, sink.rate
            )));
        }
        tracing::debug!(inputs = ctx.sources.len(), format = ?sink.format, "mixer prepared");
        Ok(())
    }

    fn max_sources(&self) -> usize {
        self.max_inputs
    }

    fn as_stream(&mut self) -> Option<&mut dyn StreamProcess> {
        Some(self)
    }
}
