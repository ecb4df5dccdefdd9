//! # ltx-recorder
//!
//! Records neurophysiology trials into Axona-style LTX files: a readable header
//! block followed by a big-endian binary payload, with counts and durations patched
//! into fixed-width fields once the trial ends.
//!
//! ## Modules
//! - [`session`]: Trial lifecycle and mode dispatch ([`RecordingSession`])
//! - [`staged_file`]: One header/binary/epilogue file ([`StagedFile`])
//! - [`codec`]: Float to int8/u16 conversion, fixed-point timestamps, strided downsampling
//! - [`spikes`], [`eeg`], [`position`]: Per-mode file layouts
//! - [`display_buffer`]: Lock-free producer/consumer ring for position display
//! - [`gain`]: Per-channel gain applied to continuous blocks before recording
//! - [`acquisition`]: Abort flag and update channel shared with the host
//! - [`config`]: TOML settings and shared header geometry
//!
//! The library only emits `log` records; installing a logger is up to the host.

pub mod acquisition;
pub mod channels;
pub mod codec;
pub mod config;
pub mod display_buffer;
pub mod eeg;
pub mod error;
pub mod gain;
pub mod position;
pub mod session;
pub mod spikes;
pub mod staged_file;

pub use acquisition::{AcquisitionControl, RecorderUpdate};
pub use channels::{ContinuousChannelInfo, RecordingLayout, Spike, SpikeChannelInfo};
pub use config::{Config, HeaderSettings, SharedHeaderSettings};
pub use display_buffer::{DisplayReader, DisplayRingBuffer, DisplayWriter, PosPoint};
pub use error::{ConfigError, FileError, RecordError};
pub use gain::ChannelGains;
pub use session::{trial_base_path, RecordMode, RecordingSession};
pub use staged_file::{StagedFile, WritePhase};
