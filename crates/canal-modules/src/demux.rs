//! 1:N demultiplexer.
//!
//! Copies its single input to every active output, converting the sample
//! format per output when it differs from the input.

use crate::sample;
use canal_core::{
    ComponentError, PrepareContext, ProcessingModule, Result, StreamInput, StreamOutput, StreamProcess,
};

/// Outputs accepted unless configured otherwise.
pub const DEFAULT_MAX_OUTPUTS: usize = 4;

/// Demux module.
#[derive(Debug)]
pub struct Demux {
    max_outputs: usize,
    raw: Vec<u8>,
    decoded: Vec<f32>,
    encoded: Vec<u8>,
}

impl Demux {
    /// Demux feeding up to `max_outputs` sinks.
    pub fn new(max_outputs: usize) -> Self {
        Self {
            max_outputs: max_outputs.max(1),
            raw: Vec::new(),
            decoded: Vec::new(),
            encoded: Vec::new(),
        }
    }
}

impl Default for Demux {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_OUTPUTS)
    }
}

impl StreamProcess for Demux {
    fn process(&mut self, inputs: &mut [StreamInput<'_>], outputs: &mut [StreamOutput<'_>], frames: usize) -> Result<()> {
        let Some(input) = inputs.first_mut() else {
            return Err(ComponentError::NoData);
        };
        let params = *input.params();
        let bytes = frames * params.frame_bytes();
        self.raw.resize(bytes, 0);
        input.read(0, &mut self.raw);

        let mut decoded = false;
        for output in outputs.iter_mut() {
            let format = output.params().format;
            if format == params.format {
                output.write(&self.raw);
                continue;
            }
            if !decoded {
                sample::decode_into(params.format, &self.raw, &mut self.decoded);
                decoded = true;
            }
            sample::encode_into(format, &self.decoded, &mut self.encoded);
            output.write(&self.encoded);
        }
        input.consume(bytes);
        Ok(())
    }
}

impl ProcessingModule for Demux {
    fn name(&self) -> &str {
        "demux"
    }

    fn prepare(&mut self, ctx: &PrepareContext) -> Result<()> {
        let Some(source) = ctx.sources.first() else {
            return Err(ComponentError::invalid("demux has no input"));
        };
        if ctx
            .sinks
            .iter()
            .any(|s| s.channels != source.channels || s.rate != source.rate)
        {
            return Err(ComponentError::invalid("demux outputs must match the input channels and rate"));
        }
        Ok(())
    }

    fn max_sinks(&self) -> usize {
        self.max_outputs
    }

    fn as_stream(&mut self) -> Option<&mut dyn StreamProcess> {
        Some(self)
    }
}
