//! # Sample Codec Module
//!
//! Stateless numeric conversions from host float samples to the LTX wire format.
//! Nothing here allocates or performs I/O.
//!
//! ## Conversions
//! - `float_to_i8_saturating`: calibrated voltage → one-byte sample
//! - `encode_u16_be`: position coordinate → two big-endian bytes
//! - `fixed_point_timestamp` / `encode_timestamp_be`: seconds → timebase ticks
//! - `downsample_strided`: phase-preserving decimation across chunk boundaries
//!
//! ## Overflow
//! Every conversion saturates. A voltage beyond the int8 range is recorded as
//! -128 or 127, and NaN becomes zero, so a wrapped value can never appear on disk.

use std::iter::StepBy;
use std::slice::Iter;

/// Scale a voltage and clamp it into the int8 range, truncating toward zero
#[inline]
pub fn float_to_i8_saturating(value: f32, scale: f32) -> i8 {
    // `as` saturates and maps NaN to zero
    (value * scale).clamp(i8::MIN as f32, i8::MAX as f32) as i8
}

/// Convert a batch of voltages into int8 samples
///
/// Writes `min(src.len(), dst.len())` samples and returns that count.
pub fn floats_to_i8s(src: &[f32], dst: &mut [i8], scale: f32) -> usize {
    let n = src.len().min(dst.len());
    for (out, &value) in dst.iter_mut().zip(src) {
        *out = float_to_i8_saturating(value, scale);
    }
    n
}

/// Cast a float to u16 (saturating, NaN → 0) in big-endian wire order
#[inline]
pub fn encode_u16_be(value: f32) -> [u8; 2] {
    let raw = if value.is_nan() { 0 } else { value as u16 };
    raw.to_be_bytes()
}

/// Seconds expressed as whole ticks of `timebase` Hz, saturating at the i32 range
#[inline]
pub fn fixed_point_timestamp(seconds: f64, timebase: u32) -> i32 {
    if seconds.is_nan() {
        return 0;
    }
    (seconds * f64::from(timebase)) as i32
}

/// Fixed-point timestamp in big-endian wire order
#[inline]
pub fn encode_timestamp_be(seconds: f64, timebase: u32) -> [u8; 4] {
    fixed_point_timestamp(seconds, timebase).to_be_bytes()
}

/// Every `stride`-th sample of `src`, continuing a stream that has already
/// consumed samples up to `carried_phase` (samples seen so far, mod `stride`).
///
/// Returns the selected samples and the phase to carry into the next chunk.
/// Feeding a stream in chunks of any length selects the same samples as feeding
/// it in one piece: exactly those whose index in the whole stream is a multiple
/// of `stride`.
pub fn downsample_strided(
    src: &[f32],
    stride: usize,
    carried_phase: usize,
) -> (StepBy<Iter<'_, f32>>, usize) {
    let stride = stride.max(1);
    let phase = carried_phase % stride;
    let offset = (stride - phase) % stride;
    let selected = src.get(offset..).unwrap_or(&[]).iter().step_by(stride);
    let next_phase = (phase + src.len() % stride) % stride;
    (selected, next_phase)
}
