//! # Downsampled Continuous ("EEG") Files
//!
//! One `.egf`, `.egf2`, ... file per continuous channel. The 30 kHz input is
//! decimated to 1 kHz and stored as raw int8 samples with no per-sample timestamp.
//!
//! Input arrives in blocks of arbitrary length, so each channel carries the
//! number of samples it has seen; the decimation phase is derived from that
//! count and stays aligned across block boundaries.

use crate::channels::ContinuousChannelInfo;
use crate::codec::{downsample_strided, float_to_i8_saturating};
use crate::config::Config;
use crate::error::RecordError;
use crate::session::hz;
use crate::staged_file::StagedFile;
use chrono::{DateTime, Local};
use std::path::Path;

pub const EEG_INPUT_RATE: f32 = 30_000.0;
pub const EEG_OUTPUT_RATE: u32 = 1_000;
pub const EEG_DOWNSAMPLE_BY: usize = 30;
/// Largest number of output samples produced from one input block
pub const EEG_STAGING_SIZE: usize = 1024;

pub(crate) fn validate_channel(index: usize, info: &ContinuousChannelInfo) -> Result<(), RecordError> {
    if info.sample_rate != EEG_INPUT_RATE {
        return Err(RecordError::SampleRate {
            channel: index,
            expected: EEG_INPUT_RATE,
            found: info.sample_rate,
        });
    }
    Ok(())
}

fn extension(index: usize) -> String {
    if index == 0 {
        ".egf".to_string()
    } else {
        format!(".egf{}", index + 1)
    }
}

/// Output file for one continuous channel
pub(crate) struct EegWriter {
    file: StagedFile,
    scale: f32,
    samples_seen: u64,
    staging: [u8; EEG_STAGING_SIZE],
}

impl EegWriter {
    pub fn open(
        base_path: &Path,
        index: usize,
        info: &ContinuousChannelInfo,
        start_time: DateTime<Local>,
        config: &Config,
    ) -> Result<Self, RecordError> {
        let file = StagedFile::create(base_path, &extension(index), start_time, &config.created_by)?;
        file.add_header_value("num_chans", 1)?;
        file.add_header_value("sample_rate", hz(EEG_OUTPUT_RATE as f32))?;
        file.add_header_placeholder("num_EEG_samples")?;

        Ok(Self {
            file,
            scale: config.eeg_scale(info.bit_volts),
            samples_seen: 0,
            staging: [0; EEG_STAGING_SIZE],
        })
    }

    /// Decimate, convert and append one block; returns the number of samples written
    ///
    /// A block too large for the staging buffer is logged and skipped.
    pub fn write(&mut self, samples: &[f32]) -> Result<usize, RecordError> {
        if samples.len() / EEG_DOWNSAMPLE_BY + 1 > EEG_STAGING_SIZE {
            log::warn!(
                "{}: skipping block of {} samples, more than {} after downsampling by {}",
                self.file.path().display(),
                samples.len(),
                EEG_STAGING_SIZE,
                EEG_DOWNSAMPLE_BY
            );
            return Ok(0);
        }

        let phase = (self.samples_seen % EEG_DOWNSAMPLE_BY as u64) as usize;
        let (selected, _) = downsample_strided(samples, EEG_DOWNSAMPLE_BY, phase);
        let mut written = 0;
        for (dst, &v) in self.staging.iter_mut().zip(selected) {
            *dst = float_to_i8_saturating(v, self.scale) as u8;
            written += 1;
        }

        if written > 0 {
            self.file.write_binary_data(&self.staging[..written])?;
        }
        self.samples_seen += samples.len() as u64;
        Ok(written)
    }

    pub fn finalise(&self, end_time: DateTime<Local>) -> Result<(), RecordError> {
        self.file
            .finalise_header_placeholder(self.samples_seen / EEG_DOWNSAMPLE_BY as u64)?;
        self.file.finalise_file(end_time)?;
        Ok(())
    }

    pub fn samples_seen(&self) -> u64 {
        self.samples_seen
    }

    pub fn file(&self) -> &StagedFile {
        &self.file
    }
}
