//! # Channel Gain Module
//!
//! Per-channel amplification applied to continuous blocks before they are recorded.
//!
//! Gains live in [`ChannelGains`], which a UI can adjust while acquisition runs.
//! Every stored gain is snapped to the 0.25 grid and clamped to `0.25..=20.0`.
//! Channels without a stored gain use unity gain.

use std::sync::atomic::{AtomicU32, Ordering};

pub const GAIN_MIN: f32 = 0.25;
pub const GAIN_MAX: f32 = 20.0;
pub const GAIN_STEP: f32 = 0.25;
pub const GAIN_DEFAULT: f32 = 1.0;

/// Snap `value` to the gain grid; NaN becomes unity gain
pub fn quantise_gain(value: f32) -> f32 {
    if value.is_nan() {
        return GAIN_DEFAULT;
    }
    let snapped = (value / GAIN_STEP).round() * GAIN_STEP;
    snapped.clamp(GAIN_MIN, GAIN_MAX)
}

/// Multiply a block in place
pub fn apply_gain(samples: &mut [f32], factor: f32) {
    for sample in samples {
        *sample *= factor;
    }
}

/// Gain factors for the continuous channels of one trial
#[derive(Debug)]
pub struct ChannelGains {
    factors: Vec<AtomicU32>,
}

impl ChannelGains {
    pub fn new(num_channels: usize) -> Self {
        Self {
            factors: (0..num_channels)
                .map(|_| AtomicU32::new(GAIN_DEFAULT.to_bits()))
                .collect(),
        }
    }

    /// Store the gain for `channel` and return the value actually kept
    ///
    /// Returns `None` for a channel this set does not cover.
    pub fn set(&self, channel: usize, value: f32) -> Option<f32> {
        let slot = self.factors.get(channel)?;
        let gain = quantise_gain(value);
        slot.store(gain.to_bits(), Ordering::Relaxed);
        Some(gain)
    }

    pub fn get(&self, channel: usize) -> f32 {
        self.factors
            .get(channel)
            .map_or(GAIN_DEFAULT, |slot| f32::from_bits(slot.load(Ordering::Relaxed)))
    }

    pub fn len(&self) -> usize {
        self.factors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factors.is_empty()
    }
}
