//! # Position Tracking File
//!
//! A single `.pos` file fed by an external tracker stream of seven float channels:
//!
//! | channel | meaning   | wire          |
//! |---------|-----------|---------------|
//! | 0       | timestamp | i32 BE ticks  |
//! | 1..=4   | x1,y1,x2,y2 | u16 BE      |
//! | 5..=6   | numpix1,numpix2 | u16 BE  |
//!
//! Channels of one batch arrive as separate calls, in order. Channel 0 starts a new
//! batch, channels 1..=6 fill it in, and the batch is written as 16-byte records
//! once channel 6 has been seen. `num_pos_samples` counts written records only, so a
//! batch that is dropped or replaced before channel 6 lands is not counted.
//!
//! Timestamps are recorded relative to the first non-NaN timestamp of the trial.
//! That origin must be small: the tracker sends 32-bit floats, and a source clock that
//! was not reset leaves too little precision once the origin is subtracted.

use crate::codec::{encode_timestamp_be, encode_u16_be};
use crate::config::{Config, HeaderSettings};
use crate::error::RecordError;
use crate::session::{hz, TIMESTAMP_TIMEBASE};
use crate::staged_file::StagedFile;
use chrono::{DateTime, Local};
use std::path::Path;

pub const POS_REQUIRED_CHANNELS: usize = 7;
pub const POS_TIMESTAMP_CHANNEL: usize = 0;
pub const POS_RECORD_BYTES: usize = 16;
/// Four hours
pub const POS_MAX_ORIGIN_SECONDS: f32 = 4.0 * 60.0 * 60.0;

const POS_VALUES: usize = POS_REQUIRED_CHANNELS - 1;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct PosRecord {
    timestamp: [u8; 4],
    values: [[u8; 2]; POS_VALUES],
}

impl PosRecord {
    fn append_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.timestamp);
        for value in &self.values {
            out.extend_from_slice(value);
        }
    }
}

pub(crate) fn validate_channel_count(found: usize) -> Result<(), RecordError> {
    if found != POS_REQUIRED_CHANNELS {
        return Err(RecordError::PositionChannelCount {
            expected: POS_REQUIRED_CHANNELS,
            found,
        });
    }
    Ok(())
}

/// Output file for the tracker stream
pub(crate) struct PosWriter {
    file: StagedFile,
    origin: Option<f32>,
    sample_count: u64,
    batch: Vec<PosRecord>,
    scratch: Vec<u8>,
}

impl PosWriter {
    pub fn open(
        base_path: &Path,
        sample_rate: f32,
        start_time: DateTime<Local>,
        config: &Config,
        header: HeaderSettings,
    ) -> Result<Self, RecordError> {
        let file = StagedFile::create(base_path, ".pos", start_time, &config.created_by)?;
        file.add_header_value("timestamp_timebase", hz(TIMESTAMP_TIMEBASE as f32))?;
        file.add_header_value("timebase", hz(sample_rate))?;
        file.add_header_value("sample_rate", hz(sample_rate))?;
        file.add_header_value("bytes_per_timestamp", 4)?;
        file.add_header_value("bytes_per_coord", 2)?;
        file.add_header_value("pos_format", "t,x1,y1,x2,y2,numpix1,numpix2")?;

        file.add_header_value("num_colours", config.bearing_colours.len())?;
        for (i, bearing) in config.bearing_colours.iter().enumerate() {
            file.add_header_value(&format!("bearing_colour_{}", i + 1), bearing)?;
        }

        file.add_header_value("pixels_per_metre", header.pixels_per_metre)?;
        file.add_header_value("window_min_x", 0)?;
        file.add_header_value("window_max_x", header.window_max_x)?;
        file.add_header_value("window_min_y", 0)?;
        file.add_header_value("window_max_y", header.window_max_y)?;
        file.add_header_value("min_x", 0)?;
        file.add_header_value("max_x", header.window_max_x)?;
        file.add_header_value("min_y", 0)?;
        file.add_header_value("max_y", header.window_max_y)?;
        file.add_header_placeholder("num_pos_samples")?;

        Ok(Self {
            file,
            origin: None,
            sample_count: 0,
            batch: Vec::new(),
            scratch: Vec::new(),
        })
    }

    /// Accept one channel of the current batch
    pub fn write_channel(&mut self, channel: usize, samples: &[f32]) -> Result<(), RecordError> {
        if channel == POS_TIMESTAMP_CHANNEL {
            return self.start_batch(samples);
        }
        if channel >= POS_REQUIRED_CHANNELS {
            log::trace!("Ignoring position channel {} outside the tracker layout", channel);
            return Ok(());
        }
        if samples.len() != self.batch.len() {
            log::warn!(
                "Position channel {} delivered {} samples but the batch has {}; skipping",
                channel,
                samples.len(),
                self.batch.len()
            );
            return Ok(());
        }

        for (record, &v) in self.batch.iter_mut().zip(samples) {
            record.values[channel - 1] = encode_u16_be(v);
        }

        if channel == POS_REQUIRED_CHANNELS - 1 {
            self.flush_batch()?;
        }
        Ok(())
    }

    fn start_batch(&mut self, timestamps: &[f32]) -> Result<(), RecordError> {
        if self.origin.is_none() {
            if let Some(&first) = timestamps.iter().find(|t| !t.is_nan()) {
                if first > POS_MAX_ORIGIN_SECONDS {
                    return Err(RecordError::PositionOriginTooLarge { seconds: first });
                }
                log::debug!("Position time origin set to {}s", first);
                self.origin = Some(first);
            }
        }

        let origin = f64::from(self.origin.unwrap_or(0.0));
        self.batch.clear();
        self.batch.extend(timestamps.iter().map(|&t| PosRecord {
            timestamp: if t.is_nan() {
                [0; 4]
            } else {
                encode_timestamp_be(f64::from(t) - origin, TIMESTAMP_TIMEBASE)
            },
            ..PosRecord::default()
        }));
        Ok(())
    }

    fn flush_batch(&mut self) -> Result<(), RecordError> {
        if self.batch.is_empty() {
            return Ok(());
        }
        self.scratch.clear();
        for record in &self.batch {
            record.append_to(&mut self.scratch);
        }
        let records = self.batch.len() as u64;
        self.batch.clear();
        self.file.write_binary_data(&self.scratch)?;
        self.sample_count += records;
        Ok(())
    }

    pub fn finalise(&self, end_time: DateTime<Local>) -> Result<(), RecordError> {
        self.file.finalise_header_placeholder(self.sample_count)?;
        self.file.finalise_file(end_time)?;
        Ok(())
    }

    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    pub fn file(&self) -> &StagedFile {
        &self.file
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn header() -> HeaderSettings {
        HeaderSettings {
            window_max_x: 700,
            window_max_y: 500,
            pixels_per_metre: 795.0,
        }
    }

    fn open_writer(dir: &Path) -> PosWriter {
        PosWriter::open(&dir.join("trial"), 50.0, Local::now(), &Config::default(), header())
            .unwrap()
    }

    #[test]
    fn test_record_is_sixteen_bytes() {
        let mut out = Vec::new();
        PosRecord::default().append_to(&mut out);
        assert_eq!(out.len(), POS_RECORD_BYTES);
    }

    #[test]
    fn test_batch_written_after_last_channel() {
        let dir = tempdir().unwrap();
        let mut writer = open_writer(dir.path());

        writer.write_channel(0, &[2.0]).unwrap();
        for ch in 1..6 {
            writer.write_channel(ch, &[ch as f32 * 100.0]).unwrap();
            assert_eq!(writer.file().payload_len(), 0);
        }
        writer.write_channel(6, &[7.0]).unwrap();
        assert_eq!(writer.file().payload_len(), 16);

        writer.write_channel(0, &[2.5]).unwrap();
        writer.write_channel(1, &[f32::NAN]).unwrap();
        assert_eq!(writer.file().payload_len(), 16);
        for ch in 2..7 {
            writer.write_channel(ch, &[1.0]).unwrap();
        }
        assert_eq!(writer.file().payload_len(), 32);
        assert_eq!(writer.sample_count(), 2);
        writer.finalise(Local::now()).unwrap();

        let contents = std::fs::read(dir.path().join("trial.pos")).unwrap();
        let end = contents.len() - b"\r\ndata_end".len();
        let records = &contents[end - 32..end];

        assert_eq!(&records[0..4], &0i32.to_be_bytes());
        assert_eq!(&records[4..6], &100u16.to_be_bytes());
        assert_eq!(&records[12..14], &500u16.to_be_bytes());
        assert_eq!(&records[14..16], &7u16.to_be_bytes());

        assert_eq!(&records[16..20], &48_000i32.to_be_bytes());
        assert_eq!(&records[20..22], &[0, 0]);

        let text = String::from_utf8_lossy(&contents);
        assert!(text.contains("\r\nwindow_max_y 500\r\n"));
        assert!(text.contains("\r\nnum_pos_samples 2             "));
    }

    #[test]
    fn test_origin_skips_nan() {
        let dir = tempdir().unwrap();
        let mut writer = open_writer(dir.path());

        writer.write_channel(0, &[f32::NAN, 10.0, 10.25]).unwrap();
        assert_eq!(writer.origin, Some(10.0));
        assert_eq!(writer.batch[0].timestamp, [0; 4]);
        assert_eq!(writer.batch[1].timestamp, 0i32.to_be_bytes());
        assert_eq!(writer.batch[2].timestamp, 24_000i32.to_be_bytes());
        writer.finalise(Local::now()).unwrap();
    }

    #[test]
    fn test_origin_too_large_rejected() {
        let dir = tempdir().unwrap();
        let mut writer = open_writer(dir.path());

        assert!(matches!(
            writer.write_channel(0, &[20_000.0]),
            Err(RecordError::PositionOriginTooLarge { .. })
        ));
        assert_eq!(writer.origin, None);
        writer.finalise(Local::now()).unwrap();
    }

    #[test]
    fn test_mismatched_channel_length_skipped() {
        let dir = tempdir().unwrap();
        let mut writer = open_writer(dir.path());

        writer.write_channel(0, &[0.0, 0.1]).unwrap();
        writer.write_channel(1, &[1.0]).unwrap();
        for ch in 2..7 {
            writer.write_channel(ch, &[1.0, 2.0]).unwrap();
        }
        assert_eq!(writer.file().payload_len(), 32);
        writer.finalise(Local::now()).unwrap();
    }

    #[test]
    fn test_count_matches_written_records() {
        let dir = tempdir().unwrap();
        let mut writer = open_writer(dir.path());

        // Last channel is short, so the batch is never written
        writer.write_channel(0, &[0.0, 0.1]).unwrap();
        for ch in 1..6 {
            writer.write_channel(ch, &[1.0, 2.0]).unwrap();
        }
        writer.write_channel(6, &[1.0]).unwrap();
        assert_eq!(writer.sample_count(), 0);
        assert_eq!(writer.file().payload_len(), 0);

        // A new timestamp block replaces the pending one
        writer.write_channel(0, &[0.2, 0.3, 0.4]).unwrap();
        writer.write_channel(0, &[0.5]).unwrap();
        for ch in 1..7 {
            writer.write_channel(ch, &[3.0]).unwrap();
        }
        assert_eq!(writer.sample_count(), 1);
        assert_eq!(
            writer.file().payload_len(),
            writer.sample_count() * POS_RECORD_BYTES as u64
        );
        writer.finalise(Local::now()).unwrap();

        let contents = std::fs::read(dir.path().join("trial.pos")).unwrap();
        let text = String::from_utf8_lossy(&contents);
        assert!(text.contains("\r\nnum_pos_samples 1             "));
    }

    #[test]
    fn test_channel_count_validation() {
        assert!(validate_channel_count(7).is_ok());
        assert!(matches!(
            validate_channel_count(6),
            Err(RecordError::PositionChannelCount { expected: 7, found: 6 })
        ));
    }
}
