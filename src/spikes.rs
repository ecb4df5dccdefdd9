//! # Tetrode Spike Files
//!
//! One `.N` file per electrode. Each spike becomes a fixed 216-byte record:
//!
//! ```text
//! ┌──────────┬────────────────────┐
//! │ t (4 BE) │ ch1: 50 × i8       │  ×4 channels
//! └──────────┴────────────────────┘
//! ```
//! The host delivers 40 samples per channel; the remaining 10 bytes of each
//! channel slot are zero. The timestamp is repeated in front of every channel.

use crate::channels::{Spike, SpikeChannelInfo, SPIKE_NATIVE_SAMPLES, SPIKE_NUM_CHANNELS};
use crate::codec::{encode_timestamp_be, float_to_i8_saturating};
use crate::config::Config;
use crate::error::RecordError;
use crate::session::{hz, TIMESTAMP_TIMEBASE};
use crate::staged_file::StagedFile;
use chrono::{DateTime, Local};
use std::path::Path;

/// Waveform slot per channel in the file
pub const SPIKE_SLOT_SAMPLES: usize = 50;
pub const SPIKE_BYTES_PER_CHANNEL: usize = 4 + SPIKE_SLOT_SAMPLES;
pub const SPIKE_RECORD_BYTES: usize = SPIKE_BYTES_PER_CHANNEL * SPIKE_NUM_CHANNELS;

/// Reject electrodes that cannot produce the fixed record layout
pub(crate) fn validate_electrode(info: &SpikeChannelInfo) -> Result<(), RecordError> {
    if info.num_channels != SPIKE_NUM_CHANNELS {
        return Err(RecordError::SpikeChannelCount {
            expected: SPIKE_NUM_CHANNELS,
            found: info.num_channels,
        });
    }
    if info.samples_per_spike != SPIKE_NATIVE_SAMPLES {
        return Err(RecordError::SpikeSampleCount {
            expected: SPIKE_NATIVE_SAMPLES,
            found: info.samples_per_spike,
        });
    }
    Ok(())
}

fn validate_spike(spike: &Spike<'_>) -> Result<(), RecordError> {
    if spike.num_channels != SPIKE_NUM_CHANNELS {
        return Err(RecordError::SpikeChannelCount {
            expected: SPIKE_NUM_CHANNELS,
            found: spike.num_channels,
        });
    }
    if spike.samples_per_channel != SPIKE_NATIVE_SAMPLES
        || spike.data.len() < SPIKE_NUM_CHANNELS * SPIKE_NATIVE_SAMPLES
    {
        return Err(RecordError::SpikeSampleCount {
            expected: SPIKE_NATIVE_SAMPLES,
            found: spike.data.len() / SPIKE_NUM_CHANNELS,
        });
    }
    Ok(())
}

/// Fill `out` with the wire record for a validated spike
pub fn encode_spike(
    spike: &Spike<'_>,
    scales: &[f32; SPIKE_NUM_CHANNELS],
    out: &mut [u8; SPIKE_RECORD_BYTES],
) {
    out.fill(0);
    let timestamp = encode_timestamp_be(spike.timestamp_seconds, TIMESTAMP_TIMEBASE);

    for (ch, slot) in out.chunks_exact_mut(SPIKE_BYTES_PER_CHANNEL).enumerate() {
        slot[..4].copy_from_slice(&timestamp);
        for (dst, &v) in slot[4..].iter_mut().zip(spike.channel(ch)) {
            *dst = float_to_i8_saturating(v, scales[ch]) as u8;
        }
    }
}

/// Output file for one electrode
pub(crate) struct TetrodeWriter {
    file: StagedFile,
    scales: [f32; SPIKE_NUM_CHANNELS],
    spike_count: u64,
    record: [u8; SPIKE_RECORD_BYTES],
}

impl TetrodeWriter {
    pub fn open(
        base_path: &Path,
        index: usize,
        info: &SpikeChannelInfo,
        start_time: DateTime<Local>,
        config: &Config,
    ) -> Result<Self, RecordError> {
        let file = StagedFile::create(
            base_path,
            &format!(".{}", index + 1),
            start_time,
            &config.created_by,
        )?;
        file.add_header_value("num_chans", SPIKE_NUM_CHANNELS)?;
        file.add_header_value("bytes_per_timestamp", 4)?;
        file.add_header_value("samples_per_spike", SPIKE_SLOT_SAMPLES)?;
        file.add_header_value("bytes_per_sample", 1)?;
        file.add_header_value("spike_format", "t,ch1,t,ch2,t,ch3,t,ch4")?;
        file.add_header_value("sample_rate", hz(info.sample_rate))?;
        file.add_header_value("timebase", hz(TIMESTAMP_TIMEBASE as f32))?;
        file.add_header_placeholder("num_spikes")?;

        let mut scales = [1.0; SPIKE_NUM_CHANNELS];
        for (ch, scale) in scales.iter_mut().enumerate() {
            *scale = config.spike_scale(info.bit_volts(ch));
        }

        Ok(Self {
            file,
            scales,
            spike_count: 0,
            record: [0; SPIKE_RECORD_BYTES],
        })
    }

    pub fn write_spike(&mut self, spike: &Spike<'_>) -> Result<(), RecordError> {
        validate_spike(spike)?;
        encode_spike(spike, &self.scales, &mut self.record);
        self.file.write_binary_data(&self.record)?;
        self.spike_count += 1;
        Ok(())
    }

    pub fn finalise(&self, end_time: DateTime<Local>) -> Result<(), RecordError> {
        self.file.finalise_header_placeholder(self.spike_count)?;
        self.file.finalise_file(end_time)?;
        Ok(())
    }

    pub fn spike_count(&self) -> u64 {
        self.spike_count
    }
}
