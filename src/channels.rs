//! # Channel Layout Module
//!
//! Describes what the host is about to stream, as seen at the moment a trial opens.
//! The recording session inspects this layout once to pick its recording mode
//! and to calibrate each output file.
//!
//! ## Key Types
//! - `SpikeChannelInfo`: One electrode (tetrode) producing spike waveforms
//! - `ContinuousChannelInfo`: One continuous voltage or tracking channel
//! - `RecordingLayout`: Everything the host will record in this trial
//! - `Spike`: One detected spike, borrowed from the host's buffer

/// Channels per electrode group
pub const SPIKE_NUM_CHANNELS: usize = 4;
/// Native waveform length per channel delivered by the host
pub const SPIKE_NATIVE_SAMPLES: usize = 40;

/// One electrode producing spike waveforms
#[derive(Debug, Clone, PartialEq)]
pub struct SpikeChannelInfo {
    pub name: String,
    pub num_channels: usize,
    pub samples_per_spike: usize,
    pub sample_rate: f32,
    /// Calibration per channel; missing entries count as 1.0
    pub bit_volts: Vec<f32>,
}

impl SpikeChannelInfo {
    /// A standard four-channel, 40-sample tetrode
    pub fn tetrode(name: impl Into<String>, sample_rate: f32, bit_volts: f32) -> Self {
        Self {
            name: name.into(),
            num_channels: SPIKE_NUM_CHANNELS,
            samples_per_spike: SPIKE_NATIVE_SAMPLES,
            sample_rate,
            bit_volts: vec![bit_volts; SPIKE_NUM_CHANNELS],
        }
    }

    pub fn bit_volts(&self, channel: usize) -> f32 {
        self.bit_volts.get(channel).copied().unwrap_or(1.0)
    }
}

/// One continuous channel and the stream it belongs to
#[derive(Debug, Clone, PartialEq)]
pub struct ContinuousChannelInfo {
    pub name: String,
    pub stream_name: String,
    pub sample_rate: f32,
    pub bit_volts: f32,
}

impl ContinuousChannelInfo {
    pub fn new(
        name: impl Into<String>,
        stream_name: impl Into<String>,
        sample_rate: f32,
        bit_volts: f32,
    ) -> Self {
        Self {
            name: name.into(),
            stream_name: stream_name.into(),
            sample_rate,
            bit_volts,
        }
    }
}

/// Channels the host will deliver during one trial
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordingLayout {
    pub spike_channels: Vec<SpikeChannelInfo>,
    pub continuous_channels: Vec<ContinuousChannelInfo>,
}

impl RecordingLayout {
    /// Continuous channels belonging to the same stream as the first one
    pub fn first_stream_channel_count(&self) -> usize {
        match self.continuous_channels.first() {
            Some(first) => self
                .continuous_channels
                .iter()
                .filter(|c| c.stream_name == first.stream_name)
                .count(),
            None => 0,
        }
    }
}

/// One spike as delivered by the host
///
/// `data` holds `num_channels` consecutive waveforms of `samples_per_channel`
/// samples each.
#[derive(Debug, Clone, Copy)]
pub struct Spike<'a> {
    pub timestamp_seconds: f64,
    pub num_channels: usize,
    pub samples_per_channel: usize,
    pub data: &'a [f32],
}

impl<'a> Spike<'a> {
    /// Waveform of one channel, or an empty slice if `data` is short
    pub fn channel(&self, index: usize) -> &'a [f32] {
        let start = index * self.samples_per_channel;
        self.data
            .get(start..start + self.samples_per_channel)
            .unwrap_or(&[])
    }
}
