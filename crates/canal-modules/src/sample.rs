//! Sample decoding and encoding between PCM containers and `f32`.
//!
//! Integer formats map full scale to `[-1.0, 1.0)`. Encoding saturates, so a
//! mixed or amplified signal clips instead of wrapping.

use canal_core::FrameFormat;

const S16_SCALE: f32 = 32_768.0;
const S24_SCALE: f32 = 8_388_608.0;
const S32_SCALE: f64 = 2_147_483_648.0;

/// Decode one sample from the start of `bytes`.
///
/// `bytes` must hold at least [`FrameFormat::sample_bytes`] bytes.
#[inline]
pub fn decode(format: FrameFormat, bytes: &[u8]) -> f32 {
    match format {
        FrameFormat::S16Le => f32::from(i16::from_le_bytes([bytes[0], bytes[1]])) / S16_SCALE,
        FrameFormat::S24In32Le => {
            let raw = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            // sign-extend the low 24 bits
            ((raw << 8) >> 8) as f32 / S24_SCALE
        }
        FrameFormat::S32Le => {
            (f64::from(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])) / S32_SCALE) as f32
        }
        FrameFormat::Float => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
    }
}

/// Encode `value` into the start of `out`, saturating integer formats.
#[inline]
pub fn encode(format: FrameFormat, value: f32, out: &mut [u8]) {
    match format {
        FrameFormat::S16Le => {
            let v = (value * S16_SCALE).round().clamp(-S16_SCALE, S16_SCALE - 1.0) as i16;
            out[..2].copy_from_slice(&v.to_le_bytes());
        }
        FrameFormat::S24In32Le => {
            let v = (value * S24_SCALE).round().clamp(-S24_SCALE, S24_SCALE - 1.0) as i32;
            out[..4].copy_from_slice(&v.to_le_bytes());
        }
        FrameFormat::S32Le => {
            let v = (f64::from(value) * S32_SCALE).round().clamp(-S32_SCALE, S32_SCALE - 1.0) as i32;
            out[..4].copy_from_slice(&v.to_le_bytes());
        }
        FrameFormat::Float => out[..4].copy_from_slice(&value.clamp(-1.0, 1.0).to_le_bytes()),
    }
}

/// Decode every sample of `src` into `dst`, replacing its contents.
pub fn decode_into(format: FrameFormat, src: &[u8], dst: &mut Vec<f32>) {
    dst.clear();
    dst.extend(src.chunks_exact(format.sample_bytes()).map(|s| decode(format, s)));
}

/// Encode every sample of `src` into `dst`, replacing its contents.
pub fn encode_into(format: FrameFormat, src: &[f32], dst: &mut Vec<u8>) {
    let width = format.sample_bytes();
    dst.clear();
    dst.resize(src.len() * width, 0);
    for (value, out) in src.iter().zip(dst.chunks_exact_mut(width)) {
        encode(format, *value, out);
    }
}

/// Convert `dB` to a linear gain factor.
#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    10.0f32.powf(db / 20.0)
}

/// Convert a linear gain factor to `dB`, flooring silence at -120 dB.
#[inline]
pub fn linear_to_db(linear: f32) -> f32 {
    if linear <= 1e-6 { -120.0 } else { 20.0 * linear.log10() }
}
