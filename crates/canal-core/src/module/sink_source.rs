//! Source/sink-object topology: the module pulls and pushes data itself
//! through count-tracked handles.

use super::DataTotals;
use super::stream_copy::is_active;
use crate::buffer::BufferGuard;
use crate::component::CompDev;
use crate::error::{ComponentError, CopyStatus, Result};
use crate::stream::{AudioStream, StreamParams};

/// Entry point for modules using source and sink handles.
pub trait SourceSinkProcess: Send {
    /// Move data from `sources` to `sinks`.
    fn process(&mut self, sources: &mut [Source<'_>], sinks: &mut [Sink<'_>]) -> Result<()>;
}

/// Read handle over one source buffer.
pub struct Source<'a> {
    stream: &'a mut AudioStream,
    released: usize,
}

impl<'a> Source<'a> {
    pub(crate) fn new(stream: &'a mut AudioStream) -> Self {
        Self { stream, released: 0 }
    }

    /// Stream parameters.
    pub fn params(&self) -> &StreamParams {
        self.stream.params()
    }

    /// Bytes ready to read.
    pub fn data_available(&self) -> usize {
        self.stream.avail()
    }

    /// Borrow `bytes` of readable data as head and tail slices.
    pub fn get_data(&mut self, bytes: usize) -> Result<(&[u8], &[u8])> {
        if bytes > self.stream.avail() {
            return Err(ComponentError::NoData);
        }
        self.stream.invalidate(bytes);
        Ok(self.stream.read_segments(0, bytes))
    }

    /// Release `bytes` previously read.
    pub fn release_data(&mut self, bytes: usize) -> Result<()> {
        if bytes > self.stream.avail() {
            return Err(ComponentError::invalid(format!(
                "release of {bytes} bytes, {} available",
                self.stream.avail()
            )));
        }
        self.stream.consume(bytes);
        self.released += bytes;
        Ok(())
    }

    /// Bytes released during this call.
    pub fn processed(&self) -> usize {
        self.released
    }
}

/// Write handle over one sink buffer.
pub struct Sink<'a> {
    stream: &'a mut AudioStream,
    committed: usize,
}

impl<'a> Sink<'a> {
    pub(crate) fn new(stream: &'a mut AudioStream) -> Self {
        Self { stream, committed: 0 }
    }

    /// Stream parameters.
    pub fn params(&self) -> &StreamParams {
        self.stream.params()
    }

    /// Bytes that can be written.
    pub fn free_size(&self) -> usize {
        self.stream.free()
    }

    /// Borrow `bytes` of writable space as head and tail slices.
    pub fn get_buffer(&mut self, bytes: usize) -> Result<(&mut [u8], &mut [u8])> {
        if bytes > self.stream.free() {
            return Err(ComponentError::NoSpace);
        }
        Ok(self.stream.write_segments(0, bytes))
    }

    /// Publish `bytes` written into the borrowed space.
    pub fn commit_buffer(&mut self, bytes: usize) -> Result<()> {
        if bytes > self.stream.free() {
            return Err(ComponentError::invalid(format!(
                "commit of {bytes} bytes, {} free",
                self.stream.free()
            )));
        }
        self.stream.produce(bytes);
        self.stream.writeback(bytes);
        self.committed += bytes;
        Ok(())
    }

    /// Bytes committed during this call.
    pub fn processed(&self) -> usize {
        self.committed
    }
}

pub(crate) fn copy_sink_source(process: &mut dyn SourceSinkProcess, dev: &CompDev, totals: &mut DataTotals) -> Result<CopyStatus> {
    let own = dev.state();
    let mut sources: Vec<BufferGuard<'_>> = dev.sources().iter().map(|b| b.acquire()).collect();
    let mut sinks: Vec<BufferGuard<'_>> = dev.sinks().iter().map(|b| b.acquire()).collect();

    let active_in: Vec<usize> = (0..sources.len())
        .filter(|&i| is_active(sources[i].producer_state(), own))
        .collect();
    let active_out: Vec<usize> = (0..sinks.len())
        .filter(|&i| is_active(sinks[i].consumer_state(), own))
        .collect();
    if (!sources.is_empty() && active_in.is_empty()) || (!sinks.is_empty() && active_out.is_empty()) {
        tracing::trace!(comp = dev.id().0, "no active peers");
        return Ok(CopyStatus::Moved(0));
    }

    let mut src: Vec<Source<'_>> = sources
        .iter_mut()
        .enumerate()
        .filter(|(i, _)| active_in.contains(i))
        .map(|(_, g)| Source::new(&mut g.stream))
        .collect();
    let mut snk: Vec<Sink<'_>> = sinks
        .iter_mut()
        .enumerate()
        .filter(|(i, _)| active_out.contains(i))
        .map(|(_, g)| Sink::new(&mut g.stream))
        .collect();

    match process.process(&mut src, &mut snk) {
        Ok(()) => {}
        Err(err) if err.is_flow_control() => tracing::trace!(comp = dev.id().0, "process: {err}"),
        Err(err) => {
            tracing::error!(comp = dev.id().0, "process failed: {err}");
            return Err(err);
        }
    }

    for (s, &i) in src.iter().zip(&active_in) {
        totals.add_consumed(i, s.processed());
    }
    for (s, &i) in snk.iter().zip(&active_out) {
        totals.add_produced(i, s.processed());
    }

    let frames = snk
        .first()
        .map(|s| s.processed() / s.params().frame_bytes().max(1))
        .or_else(|| src.first().map(|s| s.processed() / s.params().frame_bytes().max(1)))
        .unwrap_or(0);
    Ok(CopyStatus::Moved(frames as u32))
}
