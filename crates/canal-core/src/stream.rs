//! Stream parameters and the circular audio stream.
//!
//! [`AudioStream`] is a byte ring that tracks `avail` (bytes written and not
//! yet read) and `free` (`size - avail`). Writers fill from the write
//! pointer and then [`produce`](AudioStream::produce); readers copy from the
//! read pointer and then [`consume`](AudioStream::consume). Every region that
//! may straddle the end of the backing store is exposed as a head and a tail
//! slice.

use crate::error::{ComponentError, Result};
use std::ops::Range;

/// PCM sample container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum FrameFormat {
    /// 16-bit little endian.
    #[default]
    S16Le,
    /// 24-bit samples in a 32-bit little endian container.
    S24In32Le,
    /// 32-bit little endian.
    S32Le,
    /// 32-bit IEEE float.
    Float,
}

impl FrameFormat {
    /// Bytes per sample.
    pub const fn sample_bytes(self) -> usize {
        match self {
            Self::S16Le => 2,
            Self::S24In32Le | Self::S32Le | Self::Float => 4,
        }
    }

    /// Stable lowercase name used in topology files and logs.
    pub const fn name(self) -> &'static str {
        match self {
            Self::S16Le => "s16_le",
            Self::S24In32Le => "s24_in32_le",
            Self::S32Le => "s32_le",
            Self::Float => "float",
        }
    }

    /// Parse a name produced by [`name`](Self::name).
    pub fn from_name(name: &str) -> Option<Self> {
        [Self::S16Le, Self::S24In32Le, Self::S32Le, Self::Float]
            .into_iter()
            .find(|f| f.name() == name)
    }
}

/// Parameters describing the PCM stream carried by a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StreamParams {
    /// Sample container format.
    pub format: FrameFormat,
    /// Frames per second.
    pub rate: u32,
    /// Interleaved channel count.
    pub channels: u16,
}

impl Default for StreamParams {
    fn default() -> Self {
        Self {
            format: FrameFormat::S16Le,
            rate: 48_000,
            channels: 2,
        }
    }
}

impl StreamParams {
    /// Bytes per interleaved frame.
    #[inline]
    pub const fn frame_bytes(&self) -> usize {
        self.format.sample_bytes() * self.channels as usize
    }

    /// Bytes occupied by `frames` frames.
    #[inline]
    pub const fn bytes_for(&self, frames: usize) -> usize {
        frames * self.frame_bytes()
    }

    /// Reject zero rates and channel counts.
    pub fn validate(&self) -> Result<()> {
        if self.rate == 0 {
            return Err(ComponentError::invalid("sample rate must be non-zero"));
        }
        if self.channels == 0 {
            return Err(ComponentError::invalid("channel count must be non-zero"));
        }
        Ok(())
    }

    /// Same stream in a different sample format.
    pub const fn with_format(mut self, format: FrameFormat) -> Self {
        self.format = format;
        self
    }
}

const fn gcd(mut a: usize, mut b: usize) -> usize {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// Least common multiple; zero inputs are treated as one.
pub const fn lcm(a: usize, b: usize) -> usize {
    let a = if a == 0 { 1 } else { a };
    let b = if b == 0 { 1 } else { b };
    a / gcd(a, b) * b
}

/// Circular byte buffer carrying one PCM stream.
#[derive(Debug, Clone)]
pub struct AudioStream {
    data: Vec<u8>,
    read: usize,
    write: usize,
    avail: usize,
    params: StreamParams,
    byte_align: usize,
    frame_align: usize,
    align_frames: usize,
    invalidated: u64,
    written_back: u64,
}

impl AudioStream {
    /// Create an empty stream of `size` bytes with default parameters.
    pub fn new(size: usize) -> Self {
        Self::with_params(size, StreamParams::default())
    }

    /// Create an empty stream of `size` bytes.
    pub fn with_params(size: usize, params: StreamParams) -> Self {
        let mut stream = Self {
            data: vec![0; size],
            read: 0,
            write: 0,
            avail: 0,
            params,
            byte_align: 1,
            frame_align: 1,
            align_frames: 1,
            invalidated: 0,
            written_back: 0,
        };
        stream.recalc_align();
        stream
    }

    /// Wrap already-allocated storage; contents are treated as empty.
    pub fn from_storage(data: Vec<u8>, params: StreamParams) -> Self {
        let mut stream = Self::with_params(0, params);
        stream.data = data;
        stream
    }

    /// Capacity in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Bytes written and not yet consumed.
    #[inline]
    pub fn avail(&self) -> usize {
        self.avail
    }

    /// Bytes that can be written without overwriting unread data.
    #[inline]
    pub fn free(&self) -> usize {
        self.size() - self.avail
    }

    /// Stream parameters.
    #[inline]
    pub fn params(&self) -> &StreamParams {
        &self.params
    }

    /// Replace the stream parameters and recompute alignment.
    pub fn set_params(&mut self, params: StreamParams) {
        self.params = params;
        self.recalc_align();
    }

    /// Bytes per frame.
    #[inline]
    pub fn frame_bytes(&self) -> usize {
        self.params.frame_bytes()
    }

    /// Whole frames available to read.
    #[inline]
    pub fn avail_frames(&self) -> usize {
        frames_in(self.avail, self.frame_bytes())
    }

    /// Whole frames that fit in free space.
    #[inline]
    pub fn free_frames(&self) -> usize {
        frames_in(self.free(), self.frame_bytes())
    }

    /// Available frames rounded down to the alignment granule.
    pub fn avail_frames_aligned(&self) -> usize {
        self.avail_frames() / self.align_frames * self.align_frames
    }

    /// Free frames rounded down to the alignment granule.
    pub fn free_frames_aligned(&self) -> usize {
        self.free_frames() / self.align_frames * self.align_frames
    }

    /// Smallest frame count satisfying both byte and frame alignment.
    #[inline]
    pub fn align_frames(&self) -> usize {
        self.align_frames
    }

    /// Set the byte and frame-count alignment requirements.
    pub fn set_align(&mut self, byte_align: usize, frame_align: usize) -> Result<()> {
        if byte_align == 0 || frame_align == 0 {
            return Err(ComponentError::invalid("alignment must be non-zero"));
        }
        self.byte_align = byte_align;
        self.frame_align = frame_align;
        self.recalc_align();
        Ok(())
    }

    fn recalc_align(&mut self) {
        let frame_bytes = self.frame_bytes().max(1);
        let byte_frames = self.byte_align / gcd(self.byte_align, frame_bytes);
        self.align_frames = lcm(byte_frames, self.frame_align);
    }

    /// Replace the backing store with `size` zeroed bytes and reset pointers.
    pub fn resize(&mut self, size: usize) -> Result<()> {
        let mut data = Vec::new();
        data.try_reserve_exact(size)
            .map_err(|_| ComponentError::NoMemory(format!("stream of {size} bytes")))?;
        data.resize(size, 0);
        self.data = data;
        self.reset();
        Ok(())
    }

    /// Advance the write pointer after writing `bytes`.
    ///
    /// Producing more than [`free`](Self::free) overwrites the oldest data;
    /// the stream is then full with the read pointer at the write pointer.
    pub fn produce(&mut self, bytes: usize) {
        let size = self.size();
        if size == 0 || bytes == 0 {
            return;
        }
        let overrun = bytes > self.free();
        let bytes = bytes.min(size);
        self.write = (self.write + bytes) % size;
        if overrun {
            self.read = self.write;
            self.avail = size;
        } else {
            self.avail += bytes;
        }
    }

    /// Advance the read pointer after reading `bytes`.
    pub fn consume(&mut self, bytes: usize) {
        let size = self.size();
        if size == 0 {
            return;
        }
        debug_assert!(bytes <= self.avail, "consume {bytes} > avail {}", self.avail);
        let bytes = bytes.min(self.avail);
        self.read = (self.read + bytes) % size;
        self.avail -= bytes;
    }

    /// Reset both pointers; the stream becomes empty.
    pub fn reset(&mut self) {
        self.read = 0;
        self.write = 0;
        self.avail = 0;
    }

    /// Zero the backing store without moving pointers.
    pub fn zero(&mut self) {
        self.data.fill(0);
    }

    /// Head and tail ranges of a `len`-byte region starting at `start`.
    fn segments(&self, start: usize, len: usize) -> (Range<usize>, Range<usize>) {
        let size = self.size();
        if size == 0 {
            return (0..0, 0..0);
        }
        let start = start % size;
        let len = len.min(size);
        let head = len.min(size - start);
        (start..start + head, 0..len - head)
    }

    /// Readable region of `len` bytes starting `offset` bytes past the read
    /// pointer, as head and tail slices.
    pub fn read_segments(&self, offset: usize, len: usize) -> (&[u8], &[u8]) {
        let len = len.min(self.avail.saturating_sub(offset));
        let (head, tail) = self.segments(self.read + offset, len);
        (&self.data[head], &self.data[tail])
    }

    /// Writable region of `len` bytes starting `offset` bytes past the write
    /// pointer, as head and tail slices.
    pub fn write_segments(&mut self, offset: usize, len: usize) -> (&mut [u8], &mut [u8]) {
        let (head, tail) = self.segments(self.write + offset, len);
        let (low, high) = self.data.split_at_mut(head.start);
        let head_len = head.len();
        (&mut high[..head_len], &mut low[..tail.len()])
    }

    /// Copy unread bytes starting `offset` past the read pointer into `dst`.
    ///
    /// Returns the number of bytes copied.
    pub fn peek(&self, offset: usize, dst: &mut [u8]) -> usize {
        let (head, tail) = self.read_segments(offset, dst.len());
        dst[..head.len()].copy_from_slice(head);
        dst[head.len()..head.len() + tail.len()].copy_from_slice(tail);
        head.len() + tail.len()
    }

    /// Copy `src` into the stream starting `offset` past the write pointer.
    ///
    /// Pointers are not moved; call [`produce`](Self::produce) afterwards.
    pub fn fill(&mut self, offset: usize, src: &[u8]) -> usize {
        let (head, tail) = self.write_segments(offset, src.len());
        let (h, t) = (head.len(), tail.len());
        head.copy_from_slice(&src[..h]);
        tail.copy_from_slice(&src[h..h + t]);
        h + t
    }

    /// Write `len` zero bytes starting `offset` past the write pointer.
    pub fn fill_zeros(&mut self, offset: usize, len: usize) -> usize {
        let (head, tail) = self.write_segments(offset, len);
        head.fill(0);
        tail.fill(0);
        head.len() + tail.len()
    }

    /// Copy `bytes` from this stream's read pointer to `sink`'s write pointer.
    ///
    /// Neither stream's pointers move.
    pub fn copy_into(&self, sink: &mut AudioStream, bytes: usize) -> usize {
        let (head, tail) = self.read_segments(0, bytes);
        let written = sink.fill(0, head);
        written + sink.fill(written, tail)
    }

    /// Record a cache invalidate of `bytes` before reading shared data.
    #[inline]
    pub fn invalidate(&mut self, bytes: usize) {
        self.invalidated += bytes as u64;
    }

    /// Record a cache writeback of `bytes` after producing shared data.
    #[inline]
    pub fn writeback(&mut self, bytes: usize) {
        self.written_back += bytes as u64;
    }

    /// Total `(invalidated, written_back)` bytes since creation.
    pub fn coherence(&self) -> (u64, u64) {
        (self.invalidated, self.written_back)
    }
}

#[inline]
fn frames_in(bytes: usize, frame_bytes: usize) -> usize {
    if frame_bytes == 0 { 0 } else { bytes / frame_bytes }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(size: usize, bytes: &[u8]) -> AudioStream {
        let mut s = AudioStream::new(size);
        s.fill(0, bytes);
        s.produce(bytes.len());
        s
    }

    #[test]
    fn produce_consume_accounting() {
        let mut s = AudioStream::new(16);
        assert_eq!((s.avail(), s.free()), (0, 16));
        s.produce(10);
        assert_eq!((s.avail(), s.free()), (10, 6));
        s.consume(4);
        assert_eq!((s.avail(), s.free()), (6, 10));
    }

    #[test]
    fn overrun_marks_stream_full() {
        let mut s = AudioStream::new(8);
        s.produce(6);
        s.produce(4);
        assert_eq!(s.avail(), 8);
        assert_eq!(s.free(), 0);
    }

    #[test]
    fn wrapped_read_segments() {
        let mut s = AudioStream::new(8);
        s.produce(6);
        s.consume(6);
        s.fill(0, &[1, 2, 3, 4]);
        s.produce(4);
        let (head, tail) = s.read_segments(0, 4);
        assert_eq!(head, &[1, 2]);
        assert_eq!(tail, &[3, 4]);

        let mut out = [0u8; 4];
        assert_eq!(s.peek(0, &mut out), 4);
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn peek_is_clamped_to_avail() {
        let s = filled(8, &[9, 9, 9]);
        let mut out = [0u8; 6];
        assert_eq!(s.peek(1, &mut out), 2);
    }

    #[test]
    fn copy_into_sink() {
        let src = filled(8, &[1, 2, 3, 4]);
        let mut sink = AudioStream::new(8);
        sink.produce(7);
        sink.consume(7);
        assert_eq!(src.copy_into(&mut sink, 4), 4);
        sink.produce(4);
        let mut out = [0u8; 4];
        sink.peek(0, &mut out);
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn frame_counts() {
        let params = StreamParams {
            format: FrameFormat::S32Le,
            rate: 48_000,
            channels: 2,
        };
        let mut s = AudioStream::with_params(64, params);
        s.produce(20);
        assert_eq!(s.avail_frames(), 2);
        assert_eq!(s.free_frames(), 5);
    }

    #[test]
    fn alignment_granule() {
        let mut s = AudioStream::new(256);
        // 4-byte frames, 32-byte DMA granule: 8 frames
        s.set_align(32, 1).unwrap();
        assert_eq!(s.align_frames(), 8);
        s.set_align(32, 3).unwrap();
        assert_eq!(s.align_frames(), 24);
        s.produce(27 * 4);
        assert_eq!(s.avail_frames_aligned(), 24);
        assert!(s.set_align(0, 1).is_err());
    }

    #[test]
    fn reset_and_resize() {
        let mut s = filled(8, &[1, 2, 3]);
        s.reset();
        assert_eq!(s.avail(), 0);
        s.resize(32).unwrap();
        assert_eq!(s.size(), 32);
        assert_eq!(s.free(), 32);
    }

    #[test]
    fn format_names_round_trip() {
        for f in [FrameFormat::S16Le, FrameFormat::S24In32Le, FrameFormat::S32Le, FrameFormat::Float] {
            assert_eq!(FrameFormat::from_name(f.name()), Some(f));
        }
        assert_eq!(FrameFormat::from_name("u8"), None);
    }

    #[test]
    fn params_validation() {
        assert!(StreamParams::default().validate().is_ok());
        let bad = StreamParams {
            channels: 0,
            ..StreamParams::default()
        };
        assert!(bad.validate().is_err());
    }
}
