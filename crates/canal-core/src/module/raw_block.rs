//! Raw-block topology: blocks are staged out of the source rings into owned
//! linear buffers, the module runs against plain slices, and its output is
//! parked in a local ring per sink before moving downstream.
//!
//! When the module's input block differs from the period size, the adapter
//! first primes the downstream path with silence until enough input has
//! accumulated for the module to produce regularly.

use super::DataTotals;
use super::stream_copy::is_active;
use crate::buffer::BufferGuard;
use crate::component::CompDev;
use crate::copy_limits::CopyLimits;
use crate::error::{ComponentError, CopyStatus, Result};
use crate::stream::{AudioStream, StreamParams};

/// Native block sizes of a raw-block module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSizes {
    /// Bytes the module wants per input per call.
    pub input: usize,
    /// Bytes the module may write per output per call.
    pub output: usize,
}

/// Entry point for modules processing linear blocks.
pub trait RawBlockProcess: Send {
    /// Block sizes; queried at prepare.
    fn block_sizes(&self) -> BlockSizes;

    /// Process staged input into the output blocks.
    fn process(&mut self, inputs: &mut [RawInput<'_>], outputs: &mut [RawOutput<'_>]) -> Result<()>;
}

/// One staged input block.
pub struct RawInput<'a> {
    data: &'a [u8],
    consumed: usize,
}

impl<'a> RawInput<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, consumed: 0 }
    }

    /// Staged bytes.
    pub fn data(&self) -> &[u8] {
        self.data
    }

    /// Number of staged bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Mark `bytes` consumed.
    pub fn consume(&mut self, bytes: usize) {
        self.consumed = (self.consumed + bytes).min(self.data.len());
    }

    /// Bytes marked consumed.
    pub fn consumed(&self) -> usize {
        self.consumed
    }
}

/// One output block.
pub struct RawOutput<'a> {
    data: &'a mut [u8],
    produced: usize,
}

impl<'a> RawOutput<'a> {
    pub(crate) fn new(data: &'a mut [u8]) -> Self {
        Self { data, produced: 0 }
    }

    /// Total space.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Append `src`; returns the bytes accepted.
    pub fn write(&mut self, src: &[u8]) -> usize {
        let n = src.len().min(self.data.len() - self.produced);
        self.data[self.produced..self.produced + n].copy_from_slice(&src[..n]);
        self.produced += n;
        n
    }

    /// Bytes written.
    pub fn produced(&self) -> usize {
        self.produced
    }
}

/// Periods needed so that blocks of `block` bytes can be absorbed against a
/// `period`-byte cadence.
pub fn buff_periods(block: usize, period: usize) -> usize {
    let (big, small) = if block > period { (block, period) } else { (period, block) };
    if big % small == 0 { big / small + 1 } else { big / small + 2 }
}

/// Sizes of every staging allocation for one prepare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagingPlan {
    /// Priming threshold; zero when blocks match periods.
    pub deep_buff_bytes: usize,
    /// Bytes per input staging buffer.
    pub input_bytes: usize,
    /// Bytes per output block buffer.
    pub output_bytes: usize,
    /// Bytes per local output ring.
    pub local_bytes: usize,
    /// Number of inputs.
    pub inputs: usize,
    /// Number of outputs.
    pub outputs: usize,
}

impl StagingPlan {
    /// Plan staging for `inputs` sources and `outputs` sinks.
    pub fn new(period_bytes: usize, blocks: BlockSizes, inputs: usize, outputs: usize) -> Result<Self> {
        if period_bytes == 0 || blocks.input == 0 || blocks.output == 0 {
            return Err(ComponentError::invalid(format!(
                "period {period_bytes} and blocks {}/{} must be non-zero",
                blocks.input, blocks.output
            )));
        }
        let deep_buff_bytes = if blocks.input == period_bytes {
            0
        } else {
            period_bytes.min(blocks.input) * buff_periods(blocks.input, period_bytes)
        };
        Ok(Self {
            deep_buff_bytes,
            input_bytes: deep_buff_bytes.max(period_bytes),
            output_bytes: blocks.output,
            local_bytes: period_bytes.max(blocks.output) * buff_periods(blocks.output, period_bytes),
            inputs,
            outputs,
        })
    }

    /// Bound the priming threshold by the smallest source ring.
    ///
    /// A threshold above `capacity` drops to the whole periods the ring
    /// holds, never below one input block. Without sources there is nothing
    /// to prime. A ring smaller than one input block is rejected.
    pub fn fit_sources(mut self, period_bytes: usize, blocks: BlockSizes, capacity: Option<usize>) -> Result<Self> {
        let Some(capacity) = capacity else {
            self.deep_buff_bytes = 0;
            return Ok(self);
        };
        if capacity < blocks.input {
            return Err(ComponentError::invalid(format!(
                "source ring of {capacity} bytes cannot hold a {}-byte input block",
                blocks.input
            )));
        }
        if self.deep_buff_bytes > capacity {
            let requested = self.deep_buff_bytes;
            self.deep_buff_bytes = (capacity / period_bytes * period_bytes).max(blocks.input);
            tracing::debug!(
                requested,
                capacity,
                threshold = self.deep_buff_bytes,
                "priming threshold bounded by source ring"
            );
        }
        Ok(self)
    }

    /// Sum of every allocation.
    pub fn total_bytes(&self) -> usize {
        self.inputs * self.input_bytes + self.outputs * (self.output_bytes + self.local_bytes)
    }
}

struct Budget {
    left: usize,
    used: usize,
}

impl Budget {
    fn take(&mut self, bytes: usize, what: &str) -> Result<Vec<u8>> {
        if bytes > self.left {
            return Err(ComponentError::NoMemory(format!(
                "{what}: {bytes} bytes, {} left of the staging budget",
                self.left
            )));
        }
        let mut buf = Vec::new();
        buf.try_reserve_exact(bytes)
            .map_err(|_| ComponentError::NoMemory(format!("{what}: {bytes} bytes")))?;
        buf.resize(bytes, 0);
        self.left -= bytes;
        self.used += bytes;
        Ok(buf)
    }
}

/// Owned staging for one prepared raw-block module.
pub(crate) struct RawStaging {
    inputs: Vec<Vec<u8>>,
    staged: Vec<usize>,
    outputs: Vec<Vec<u8>>,
    local: Vec<AudioStream>,
    pub(crate) deep_buff_bytes: usize,
    period_bytes: usize,
    period_frames: usize,
}

impl RawStaging {
    /// Allocate everything in `plan` or nothing.
    pub(crate) fn allocate(
        plan: &StagingPlan,
        period_bytes: usize,
        period_frames: usize,
        sink_params: &[StreamParams],
        budget: usize,
    ) -> Result<Self> {
        let mut budget = Budget { left: budget, used: 0 };
        let mut inputs = Vec::with_capacity(plan.inputs);
        let mut outputs = Vec::with_capacity(plan.outputs);
        let mut local = Vec::with_capacity(plan.outputs);

        let result = (|| -> Result<()> {
            for _ in 0..plan.inputs {
                inputs.push(budget.take(plan.input_bytes, "input staging")?);
            }
            for params in sink_params.iter().take(plan.outputs) {
                outputs.push(budget.take(plan.output_bytes, "output block")?);
                let ring = budget.take(plan.local_bytes, "local output ring")?;
                local.push(AudioStream::from_storage(ring, *params));
            }
            Ok(())
        })();

        if let Err(err) = result {
            tracing::warn!(released = budget.used, "staging allocation failed, rolled back: {err}");
            return Err(err);
        }

        tracing::debug!(
            bytes = budget.used,
            deep_buff_bytes = plan.deep_buff_bytes,
            "raw-block staging allocated"
        );
        Ok(Self {
            staged: vec![0; inputs.len()],
            inputs,
            outputs,
            local,
            deep_buff_bytes: plan.deep_buff_bytes,
            period_bytes,
            period_frames,
        })
    }

    /// Bytes currently buffered in the local ring of output `index`.
    pub(crate) fn local_avail(&self, index: usize) -> usize {
        self.local.get(index).map_or(0, AudioStream::avail)
    }
}

fn emit_silence(
    sinks: &mut [BufferGuard<'_>],
    active_out: &[bool],
    period_bytes: usize,
    totals: &mut DataTotals,
) {
    for (i, guard) in sinks.iter_mut().enumerate().filter(|(i, _)| active_out[*i]) {
        let bytes = period_bytes.min(guard.stream.free());
        guard.stream.fill_zeros(0, bytes);
        guard.stream.produce(bytes);
        guard.stream.writeback(bytes);
        totals.add_produced(i, bytes);
    }
}

pub(crate) fn copy_raw(
    process: &mut dyn RawBlockProcess,
    staging: &mut RawStaging,
    dev: &CompDev,
    totals: &mut DataTotals,
) -> Result<CopyStatus> {
    let own = dev.state();
    let mut sources: Vec<BufferGuard<'_>> = dev.sources().iter().map(|b| b.acquire()).collect();
    let mut sinks: Vec<BufferGuard<'_>> = dev.sinks().iter().map(|b| b.acquire()).collect();
    let active_in: Vec<bool> = sources.iter().map(|g| is_active(g.producer_state(), own)).collect();
    let active_out: Vec<bool> = sinks.iter().map(|g| is_active(g.consumer_state(), own)).collect();

    if staging.deep_buff_bytes > 0 {
        let accumulated = sources
            .iter()
            .zip(&active_in)
            .filter(|(_, a)| **a)
            .map(|(g, _)| g.stream.avail())
            .min()
            .unwrap_or(0);
        if accumulated < staging.deep_buff_bytes {
            tracing::trace!(comp = dev.id().0, accumulated, threshold = staging.deep_buff_bytes, "deep buffering");
            emit_silence(&mut sinks, &active_out, staging.period_bytes, totals);
            return Ok(CopyStatus::Moved(staging.period_frames as u32));
        }
        tracing::debug!(comp = dev.id().0, accumulated, "deep buffering complete");
        staging.deep_buff_bytes = 0;
    }

    let min_free_frames = staging.local.iter().map(AudioStream::free_frames).min().unwrap_or(usize::MAX);
    for (i, guard) in sources.iter_mut().enumerate() {
        staging.staged[i] = 0;
        if !active_in[i] {
            continue;
        }
        let frame_bytes = guard.stream.frame_bytes().max(1);
        let frames = min_free_frames.min(guard.stream.avail_frames());
        let bytes = (frames * frame_bytes).min(staging.inputs[i].len()) / frame_bytes * frame_bytes;
        guard.stream.invalidate(bytes);
        staging.staged[i] = guard.stream.peek(0, &mut staging.inputs[i][..bytes]);
    }

    let (consumed, produced) = {
        let mut inputs: Vec<RawInput<'_>> = staging
            .inputs
            .iter()
            .zip(&staging.staged)
            .map(|(buf, &n)| RawInput::new(&buf[..n]))
            .collect();
        let mut outputs: Vec<RawOutput<'_>> = staging.outputs.iter_mut().map(|b| RawOutput::new(b)).collect();
        match process.process(&mut inputs, &mut outputs) {
            Ok(()) => {}
            Err(err) if err.is_flow_control() => tracing::trace!(comp = dev.id().0, "process: {err}"),
            Err(err) => {
                tracing::error!(comp = dev.id().0, "process failed: {err}");
                return Err(err);
            }
        }
        (
            inputs.iter().map(RawInput::consumed).collect::<Vec<_>>(),
            outputs.iter().map(RawOutput::produced).collect::<Vec<_>>(),
        )
    };

    for (i, guard) in sources.iter_mut().enumerate() {
        let bytes = consumed[i].min(staging.staged[i]);
        guard.stream.consume(bytes);
        totals.add_consumed(i, bytes);
        staging.inputs[i][..staging.staged[i]].fill(0);
        staging.staged[i] = 0;
    }

    let mut moved = 0;
    for (i, guard) in sinks.iter_mut().enumerate() {
        let Some(local) = staging.local.get_mut(i) else { continue };
        let out = produced[i];
        if out > 0 {
            local.fill(0, &staging.outputs[i][..out]);
            local.produce(out);
        }
        if !active_out[i] || (out == 0 && local.avail() < staging.period_bytes) {
            continue;
        }
        let limits = CopyLimits::between(local, &guard.stream);
        if limits.is_empty() {
            continue;
        }
        local.copy_into(&mut guard.stream, limits.source_bytes);
        local.consume(limits.source_bytes);
        guard.stream.produce(limits.sink_bytes);
        guard.stream.writeback(limits.sink_bytes);
        totals.add_produced(i, limits.sink_bytes);
        moved = moved.max(limits.frames);
    }

    Ok(CopyStatus::Moved(moved as u32))
}
