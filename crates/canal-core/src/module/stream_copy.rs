//! Stream-copy topology: the module reads and writes the ring buffers
//! directly through bounded views.

use super::DataTotals;
use crate::buffer::BufferGuard;
use crate::component::CompDev;
use crate::copy_limits::CopyLimits;
use crate::error::{ComponentError, CopyStatus, Result};
use crate::state::ComponentState;
use crate::stream::{AudioStream, StreamParams};

/// Entry point for modules processing ring buffers in place.
pub trait StreamProcess: Send {
    /// Process `frames` frames from every active input into every active
    /// output, recording consumption and production on the views.
    fn process(&mut self, inputs: &mut [StreamInput<'_>], outputs: &mut [StreamOutput<'_>], frames: usize) -> Result<()>;
}

/// Read view over one source buffer, bounded to the frames offered this call.
pub struct StreamInput<'a> {
    stream: &'a AudioStream,
    bytes: usize,
    consumed: usize,
}

impl<'a> StreamInput<'a> {
    pub(crate) fn new(stream: &'a AudioStream, frames: usize) -> Self {
        Self {
            stream,
            bytes: frames * stream.frame_bytes(),
            consumed: 0,
        }
    }

    /// Stream parameters.
    pub fn params(&self) -> &StreamParams {
        self.stream.params()
    }

    /// Bytes offered.
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// Offered bytes as head and tail slices.
    pub fn segments(&self) -> (&[u8], &[u8]) {
        self.stream.read_segments(0, self.bytes)
    }

    /// Copy offered bytes starting at `offset` into `dst`.
    pub fn read(&self, offset: usize, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.bytes.saturating_sub(offset));
        self.stream.peek(offset, &mut dst[..n])
    }

    /// Mark `bytes` as consumed.
    pub fn consume(&mut self, bytes: usize) {
        self.consumed = (self.consumed + bytes).min(self.bytes);
    }

    /// Bytes marked consumed.
    pub fn consumed(&self) -> usize {
        self.consumed
    }
}

/// Write view over one sink buffer, bounded to the frames offered this call.
pub struct StreamOutput<'a> {
    stream: &'a mut AudioStream,
    bytes: usize,
    produced: usize,
}

impl<'a> StreamOutput<'a> {
    pub(crate) fn new(stream: &'a mut AudioStream, frames: usize) -> Self {
        let bytes = frames * stream.frame_bytes();
        Self {
            stream,
            bytes,
            produced: 0,
        }
    }

    /// Stream parameters.
    pub fn params(&self) -> &StreamParams {
        self.stream.params()
    }

    /// Bytes that may be written this call.
    pub fn capacity(&self) -> usize {
        self.bytes
    }

    /// Append `data`; returns the bytes accepted.
    pub fn write(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.bytes - self.produced);
        let written = self.stream.fill(self.produced, &data[..n]);
        self.produced += written;
        written
    }

    /// Bytes written so far.
    pub fn produced(&self) -> usize {
        self.produced
    }
}

pub(crate) fn is_active(peer: Option<ComponentState>, own: ComponentState) -> bool {
    peer.is_none_or(|state| state == own)
}

fn fan_frames(sources: &[BufferGuard<'_>], active_in: &[bool], sinks: &[BufferGuard<'_>], active_out: &[bool]) -> usize {
    let inputs = sources
        .iter()
        .zip(active_in)
        .filter(|(_, active)| **active)
        .map(|(g, _)| g.stream.avail_frames_aligned());
    let outputs = sinks
        .iter()
        .zip(active_out)
        .filter(|(_, active)| **active)
        .map(|(g, _)| g.stream.free_frames_aligned());
    inputs.chain(outputs).min().unwrap_or(0)
}

pub(crate) fn copy_stream(process: &mut dyn StreamProcess, dev: &CompDev, totals: &mut DataTotals) -> Result<CopyStatus> {
    let own = dev.state();
    let mut sources: Vec<BufferGuard<'_>> = dev.sources().iter().map(|b| b.acquire()).collect();
    let mut sinks: Vec<BufferGuard<'_>> = dev.sinks().iter().map(|b| b.acquire()).collect();

    let active_in: Vec<bool> = sources.iter().map(|g| is_active(g.producer_state(), own)).collect();
    let active_out: Vec<bool> = sinks.iter().map(|g| is_active(g.consumer_state(), own)).collect();

    if (!sources.is_empty() && !active_in.contains(&true)) || (!sinks.is_empty() && !active_out.contains(&true)) {
        tracing::trace!(comp = dev.id().0, "no active peers");
        return Ok(CopyStatus::Moved(0));
    }

    let frames = match (sources.as_slice(), sinks.as_slice()) {
        ([src], [sink]) => CopyLimits::frame_aligned(&src.stream, &sink.stream).frames,
        _ => fan_frames(&sources, &active_in, &sinks, &active_out),
    };
    if frames == 0 {
        return Ok(CopyStatus::Moved(0));
    }

    for (guard, _) in sources.iter_mut().zip(&active_in).filter(|(_, a)| **a) {
        let bytes = frames * guard.stream.frame_bytes();
        guard.stream.invalidate(bytes);
    }

    let (result, consumed, produced) = {
        let mut inputs: Vec<StreamInput<'_>> = sources
            .iter()
            .zip(&active_in)
            .filter(|(_, a)| **a)
            .map(|(g, _)| StreamInput::new(&g.stream, frames))
            .collect();
        let mut outputs: Vec<StreamOutput<'_>> = sinks
            .iter_mut()
            .zip(&active_out)
            .filter(|(_, a)| **a)
            .map(|(g, _)| StreamOutput::new(&mut g.stream, frames))
            .collect();
        let result = process.process(&mut inputs, &mut outputs, frames);
        let consumed: Vec<usize> = inputs.iter().map(StreamInput::consumed).collect();
        let produced: Vec<usize> = outputs.iter().map(StreamOutput::produced).collect();
        (result, consumed, produced)
    };

    match result {
        Ok(()) => {}
        Err(err) if err.is_flow_control() => {
            tracing::trace!(comp = dev.id().0, "process: {err}");
        }
        Err(err) => {
            tracing::error!(comp = dev.id().0, "process failed: {err}");
            return Err(err);
        }
    }

    let mut consumed = consumed.into_iter();
    for (i, guard) in sources.iter_mut().enumerate().filter(|(i, _)| active_in[*i]) {
        let bytes = consumed.next().unwrap_or(0);
        guard.stream.consume(bytes);
        totals.add_consumed(i, bytes);
    }
    let mut produced = produced.into_iter();
    for (i, guard) in sinks.iter_mut().enumerate().filter(|(i, _)| active_out[*i]) {
        let bytes = produced.next().unwrap_or(0);
        guard.stream.produce(bytes);
        guard.stream.writeback(bytes);
        totals.add_produced(i, bytes);
    }

    Ok(CopyStatus::Moved(frames as u32))
}

pub(crate) fn check_fan(dev: &CompDev) -> Result<()> {
    if dev.sources().len() > 1 && dev.sinks().len() > 1 {
        return Err(ComponentError::invalid(format!(
            "{}: stream copy supports 1:N or N:1, not {}:{}",
            dev.id(),
            dev.sources().len(),
            dev.sinks().len()
        )));
    }
    Ok(())
}
