//! How many frames can move from one buffer to the next.

use crate::buffer::CompBuffer;
use crate::error::{ComponentError, Result};
use crate::stream::{AudioStream, lcm};

/// Frames and bytes that can be moved between a source and a sink stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CopyLimits {
    /// Whole frames movable.
    pub frames: usize,
    /// Bytes to read from the source.
    pub source_bytes: usize,
    /// Bytes to write to the sink.
    pub sink_bytes: usize,
    /// Source frame size.
    pub source_frame_bytes: usize,
    /// Sink frame size.
    pub sink_frame_bytes: usize,
}

impl CopyLimits {
    fn with_frames(frames: usize, source: &AudioStream, sink: &AudioStream) -> Self {
        let source_frame_bytes = source.frame_bytes();
        let sink_frame_bytes = sink.frame_bytes();
        let frames = if source_frame_bytes == 0 || sink_frame_bytes == 0 {
            0
        } else {
            frames
        };
        Self {
            frames,
            source_bytes: frames * source_frame_bytes,
            sink_bytes: frames * sink_frame_bytes,
            source_frame_bytes,
            sink_frame_bytes,
        }
    }

    /// `min(source available frames, sink free frames)`.
    pub fn between(source: &AudioStream, sink: &AudioStream) -> Self {
        let frames = source.avail_frames().min(sink.free_frames());
        Self::with_frames(frames, source, sink)
    }

    /// Like [`between`](Self::between), rounded down so both streams'
    /// alignment granules divide the frame count.
    pub fn frame_aligned(source: &AudioStream, sink: &AudioStream) -> Self {
        let granule = lcm(source.align_frames(), sink.align_frames());
        let frames = source.avail_frames().min(sink.free_frames());
        Self::with_frames(frames / granule * granule, source, sink)
    }

    /// Like [`between`](Self::between), rounded down to a multiple of
    /// `align` frames.
    pub fn aligned(source: &AudioStream, sink: &AudioStream, align: usize) -> Self {
        let align = align.max(1);
        let frames = source.avail_frames().min(sink.free_frames());
        Self::with_frames(frames / align * align, source, sink)
    }

    /// Lock the source buffer, then the sink buffer, compute the limits and
    /// release both before returning.
    pub fn locked(source: &CompBuffer, sink: &CompBuffer) -> Result<Self> {
        if source.id() == sink.id() {
            return Err(ComponentError::invalid(format!(
                "copy limits between {} and itself",
                source.id()
            )));
        }
        let src = source.acquire();
        let snk = sink.acquire();
        Ok(Self::between(&src.stream, &snk.stream))
    }

    /// True when nothing can move.
    pub fn is_empty(&self) -> bool {
        self.frames == 0
    }
}
