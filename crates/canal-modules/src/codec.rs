//! Fixed-block codec.
//!
//! Stands in for decoders and encoders that only work on whole blocks of a
//! native size unrelated to the pipeline period. It runs in the raw-block
//! topology: the adapter stages input until a block is available and primes
//! the output with silence while the first block accumulates. Each block is
//! passed through unchanged.

use canal_core::{
    BlockSizes, ComponentError, PrepareContext, ProcessingModule, RawBlockProcess, RawInput, RawOutput, Result,
};

/// Native block size in bytes (`u32` LE). Applies from the next prepare.
pub const PARAM_BLOCK_BYTES: u32 = 0;
/// Blocks processed since the last reset (`u64` LE, read only).
pub const PARAM_BLOCKS: u32 = 1;

/// Block size used when none is configured.
pub const DEFAULT_BLOCK_BYTES: usize = 2048;

/// Block codec module.
#[derive(Debug, Clone)]
pub struct BlockCodec {
    block_bytes: usize,
    blocks: u64,
}

impl BlockCodec {
    /// Codec working on `block_bytes`-byte blocks.
    pub fn new(block_bytes: usize) -> Result<Self> {
        if block_bytes == 0 {
            return Err(ComponentError::invalid("block size must be non-zero"));
        }
        Ok(Self { block_bytes, blocks: 0 })
    }

    /// Native block size.
    pub fn block_bytes(&self) -> usize {
        self.block_bytes
    }

    /// Blocks processed since the last reset.
    pub fn blocks(&self) -> u64 {
        self.blocks
    }
}

impl Default for BlockCodec {
    fn default() -> Self {
        Self {
            block_bytes: DEFAULT_BLOCK_BYTES,
            blocks: 0,
        }
    }
}

impl RawBlockProcess for BlockCodec {
    fn block_sizes(&self) -> BlockSizes {
        BlockSizes {
            input: self.block_bytes,
            output: self.block_bytes,
        }
    }

    fn process(&mut self, inputs: &mut [RawInput<'_>], outputs: &mut [RawOutput<'_>]) -> Result<()> {
        let Some(input) = inputs.first_mut() else {
            return Err(ComponentError::NoData);
        };
        if input.size() < self.block_bytes {
            return Err(ComponentError::NoData);
        }
        let Some(output) = outputs.first_mut() else {
            return Err(ComponentError::NoSpace);
        };
        if output.capacity() < self.block_bytes {
            return Err(ComponentError::NoSpace);
        }
        output.write(&input.data()[..self.block_bytes]);
        input.consume(self.block_bytes);
        self.blocks += 1;
        Ok(())
    }
}

impl ProcessingModule for BlockCodec {
    fn name(&self) -> &str {
        "codec"
    }

    fn prepare(&mut self, ctx: &PrepareContext) -> Result<()> {
        let frame_bytes = ctx.sources.first().map_or(1, |p| p.frame_bytes().max(1));
        if self.block_bytes % frame_bytes != 0 {
            return Err(ComponentError::invalid(format!(
                "block of {} bytes is not a whole number of {frame_bytes}-byte frames",
                self.block_bytes
            )));
        }
        tracing::debug!(block_bytes = self.block_bytes, period_bytes = ctx.period_bytes, "codec prepared");
        Ok(())
    }

    fn reset(&mut self) {
        self.blocks = 0;
    }

    fn set_configuration(&mut self, param_id: u32, data: &[u8]) -> Result<()> {
        if param_id != PARAM_BLOCK_BYTES {
            return Err(ComponentError::NotSupported("codec parameter"));
        }
        let raw: [u8; 4] = data
            .try_into()
            .map_err(|_| ComponentError::invalid(format!("block size wants 4 bytes, got {}", data.len())))?;
        let block_bytes = u32::from_le_bytes(raw) as usize;
        if block_bytes == 0 {
            return Err(ComponentError::invalid("block size must be non-zero"));
        }
        self.block_bytes = block_bytes;
        Ok(())
    }

    fn get_configuration(&self, param_id: u32) -> Result<Vec<u8>> {
        match param_id {
            PARAM_BLOCK_BYTES => Ok((self.block_bytes as u32).to_le_bytes().to_vec()),
            PARAM_BLOCKS => Ok(self.blocks.to_le_bytes().to_vec()),
            _ => Err(ComponentError::NotSupported("codec parameter")),
        }
    }

    fn as_raw_block(&mut self) -> Option<&mut dyn RawBlockProcess> {
        Some(self)
    }
}
