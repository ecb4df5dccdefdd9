//! # Recording Session Module
//!
//! Drives one trial from `open_files` to `close_files`, turning host sample buffers
//! into LTX files.
//!
//! ## Architecture
//! - **RecordingSession**: Lifecycle (`Unopened → Open → Closed`), mode dispatch, abort handling
//! - **RecordMode**: Chosen once per trial from the channel layout
//! - **TetrodeWriter / EegWriter / PosWriter**: Per-mode file writers owning their `StagedFile`s
//!
//! ## Mode Selection
//! Evaluated once at `open_files`, first match wins:
//! 1. Any spike channels → `SpikesAndHeader` (`.set` + one `.N` per electrode)
//! 2. No continuous channels → `None` (nothing recorded)
//! 3. First continuous channel comes from the position stream → `PositionTracking` (`.pos`)
//! 4. Otherwise → `ContinuousDownsampled` (`.egf`, `.egf2`, ...)
//!
//! ## Failure Policy
//! - Configuration mismatches abort the whole trial through [`AcquisitionControl::abort`]
//!   and are returned to the caller; later writes are refused with `RecordError::Aborted`.
//! - File phase violations are returned as-is without aborting.
//! - Oversized or inconsistent buffers are logged and skipped.

use crate::acquisition::{AcquisitionControl, RecorderUpdate};
use crate::channels::{RecordingLayout, Spike};
use crate::config::{Config, SharedHeaderSettings};
use crate::eeg::{self, EegWriter};
use crate::error::RecordError;
use crate::gain::{apply_gain, ChannelGains, GAIN_DEFAULT};
use crate::position::{self, PosWriter};
use crate::spikes::{self, TetrodeWriter};
use crate::staged_file::StagedFile;
use chrono::{DateTime, Local};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Tick rate of every integer timestamp in the LTX format
pub const TIMESTAMP_TIMEBASE: u32 = 96_000;

/// Header value for a rate, e.g. `30000 hz`
pub(crate) fn hz(rate: f32) -> String {
    format!("{} hz", rate)
}

/// Recording strategy for one trial
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordMode {
    None,
    SpikesAndHeader,
    ContinuousDownsampled,
    PositionTracking,
}

impl RecordMode {
    pub fn select(layout: &RecordingLayout, position_stream_name: &str) -> Self {
        if !layout.spike_channels.is_empty() {
            RecordMode::SpikesAndHeader
        } else if let Some(first) = layout.continuous_channels.first() {
            if first.stream_name == position_stream_name {
                RecordMode::PositionTracking
            } else {
                RecordMode::ContinuousDownsampled
            }
        } else {
            RecordMode::None
        }
    }
}

/// Base path for a trial's files: `<root>[ e<experiment>][ r<recording + 1>]`
pub fn trial_base_path(root: &Path, experiment_number: u32, recording_number: u32) -> PathBuf {
    let mut base = OsString::from(root.as_os_str());
    if experiment_number != 1 {
        base.push(format!(" e{}", experiment_number));
    }
    if recording_number != 0 {
        base.push(format!(" r{}", recording_number + 1));
    }
    PathBuf::from(base)
}

enum ModeFiles {
    None,
    SpikesAndHeader {
        set_file: StagedFile,
        tetrodes: Vec<TetrodeWriter>,
    },
    ContinuousDownsampled {
        channels: Vec<EegWriter>,
    },
    PositionTracking {
        pos: PosWriter,
    },
}

impl ModeFiles {
    fn finalise(&self, end_time: DateTime<Local>) -> Result<(), RecordError> {
        // Finalise everything, reporting the first failure
        let mut first_error = None;
        let mut keep = |result: Result<(), RecordError>| {
            if let Err(e) = result {
                log::error!("Failed to finalise trial file: {}", e);
                first_error.get_or_insert(e);
            }
        };

        match self {
            ModeFiles::None => {}
            ModeFiles::SpikesAndHeader { set_file, tetrodes } => {
                keep(set_file.finalise_file(end_time).map_err(RecordError::from));
                for (i, tetrode) in tetrodes.iter().enumerate() {
                    log::info!("Electrode {}: {} spikes", i + 1, tetrode.spike_count());
                    keep(tetrode.finalise(end_time));
                }
            }
            ModeFiles::ContinuousDownsampled { channels } => {
                for channel in channels {
                    log::info!(
                        "{}: {} input samples",
                        channel.file().path().display(),
                        channel.samples_seen()
                    );
                    keep(channel.finalise(end_time));
                }
            }
            ModeFiles::PositionTracking { pos } => {
                log::info!(
                    "{}: {} position samples",
                    pos.file().path().display(),
                    pos.sample_count()
                );
                keep(pos.finalise(end_time))
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}

enum SessionState {
    Unopened,
    Open(ModeFiles),
    Closed,
}

/// One trial's recording, fed by the host's acquisition thread
pub struct RecordingSession {
    config: Config,
    header_settings: Arc<SharedHeaderSettings>,
    control: AcquisitionControl,
    layout: RecordingLayout,
    mode: RecordMode,
    state: SessionState,
    aborted: bool,
    /// Host time (seconds) at which recording started, from the sync text
    sync_start_seconds: Option<f64>,
    gains: Option<Arc<ChannelGains>>,
    scaled: Vec<f32>,
}

impl RecordingSession {
    pub fn new(
        config: Config,
        header_settings: Arc<SharedHeaderSettings>,
        control: AcquisitionControl,
    ) -> Self {
        Self {
            config,
            header_settings,
            control,
            layout: RecordingLayout::default(),
            mode: RecordMode::None,
            state: SessionState::Unopened,
            aborted: false,
            sync_start_seconds: None,
            gains: None,
            scaled: Vec::new(),
        }
    }

    /// Amplify continuous channels by the factors in `gains`, indexed by channel
    pub fn with_channel_gains(mut self, gains: Arc<ChannelGains>) -> Self {
        self.gains = Some(gains);
        self
    }

    pub fn mode(&self) -> RecordMode {
        self.mode
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, SessionState::Open(_))
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    pub fn acquisition(&self) -> &AcquisitionControl {
        &self.control
    }

    /// Abort the trial if `err` is a configuration mismatch, then hand it back
    fn fail(&mut self, err: RecordError) -> RecordError {
        if err.is_fatal() && !self.aborted {
            self.aborted = true;
            self.control.abort(err.to_string());
        }
        err
    }

    fn open_files_mut(&mut self) -> Result<&mut ModeFiles, RecordError> {
        if self.aborted {
            return Err(RecordError::Aborted);
        }
        match &mut self.state {
            SessionState::Unopened => Err(RecordError::NotOpen),
            SessionState::Open(files) => Ok(files),
            SessionState::Closed => Err(RecordError::AlreadyClosed),
        }
    }

    /// Start a trial: choose the mode, create its files and write their headers
    pub fn open_files(
        &mut self,
        root_folder: &Path,
        experiment_number: u32,
        recording_number: u32,
        layout: RecordingLayout,
    ) -> Result<RecordMode, RecordError> {
        match self.state {
            SessionState::Unopened => {}
            SessionState::Open(_) => return Err(RecordError::AlreadyOpened),
            SessionState::Closed => return Err(RecordError::AlreadyClosed),
        }

        self.mode = RecordMode::select(&layout, &self.config.position_stream_name);
        self.layout = layout;
        self.sync_start_seconds = None;
        self.state = SessionState::Open(ModeFiles::None);
        self.control.publish(RecorderUpdate::ModeSelected(self.mode));

        if self.mode == RecordMode::None {
            log::error!("No spikes and no continuous channels, nothing to record.");
            return Ok(self.mode);
        }
        log::info!("LTX recording using mode {:?}", self.mode);

        if let Err(e) = self.validate_layout() {
            return Err(self.fail(e));
        }

        let base_path = trial_base_path(root_folder, experiment_number, recording_number);
        if let Some(parent) = base_path.parent() {
            std::fs::create_dir_all(parent).map_err(RecordError::Io)?;
        }
        let start_time = Local::now();
        log::info!("Opening trial files at {}.*", base_path.display());

        let files = self.create_files(&base_path, start_time)?;
        self.state = SessionState::Open(files);
        Ok(self.mode)
    }

    fn validate_layout(&self) -> Result<(), RecordError> {
        match self.mode {
            RecordMode::None => Ok(()),
            RecordMode::SpikesAndHeader => self
                .layout
                .spike_channels
                .iter()
                .try_for_each(spikes::validate_electrode),
            RecordMode::ContinuousDownsampled => self
                .layout
                .continuous_channels
                .iter()
                .enumerate()
                .try_for_each(|(i, info)| eeg::validate_channel(i, info)),
            RecordMode::PositionTracking => {
                position::validate_channel_count(self.layout.first_stream_channel_count())
            }
        }
    }

    fn create_files(
        &self,
        base_path: &Path,
        start_time: DateTime<Local>,
    ) -> Result<ModeFiles, RecordError> {
        let config = &self.config;
        let files = match self.mode {
            RecordMode::None => ModeFiles::None,
            RecordMode::SpikesAndHeader => {
                let set_file = StagedFile::create(base_path, ".set", start_time, &config.created_by)?;
                set_file.add_header_value("lasttrialdatetime", start_time.timestamp())?;
                for (i, bearing) in config.light_bearings.iter().enumerate() {
                    set_file.add_header_value(&format!("lightBearing_{}", i + 1), bearing)?;
                }

                let tetrodes = self
                    .layout
                    .spike_channels
                    .iter()
                    .enumerate()
                    .map(|(i, info)| TetrodeWriter::open(base_path, i, info, start_time, config))
                    .collect::<Result<Vec<_>, _>>()?;
                ModeFiles::SpikesAndHeader { set_file, tetrodes }
            }
            RecordMode::ContinuousDownsampled => {
                let channels = self
                    .layout
                    .continuous_channels
                    .iter()
                    .enumerate()
                    .map(|(i, info)| EegWriter::open(base_path, i, info, start_time, config))
                    .collect::<Result<Vec<_>, _>>()?;
                ModeFiles::ContinuousDownsampled { channels }
            }
            RecordMode::PositionTracking => {
                let sample_rate = self
                    .layout
                    .continuous_channels
                    .first()
                    .map_or(0.0, |c| c.sample_rate);
                let pos = PosWriter::open(
                    base_path,
                    sample_rate,
                    start_time,
                    config,
                    self.header_settings.snapshot(),
                )?;
                ModeFiles::PositionTracking { pos }
            }
        };
        Ok(files)
    }

    /// End the trial: patch counts and durations, then close every file
    pub fn close_files(&mut self) -> Result<(), RecordError> {
        let files = match std::mem::replace(&mut self.state, SessionState::Closed) {
            SessionState::Open(files) => files,
            SessionState::Unopened => {
                self.state = SessionState::Unopened;
                return Err(RecordError::NotOpen);
            }
            SessionState::Closed => return Err(RecordError::AlreadyClosed),
        };

        let result = files.finalise(Local::now());
        self.control
            .publish(RecorderUpdate::FilesClosed { mode: self.mode });
        log::info!("Completed writing files.");
        result
    }

    /// Record one block of a continuous channel
    ///
    /// `timestamps` holds the synchronized time in seconds of each sample; leading
    /// samples from before the sync start are dropped. The channel's gain, if any,
    /// is applied to the remaining samples before they reach the file writer.
    pub fn write_continuous_data(
        &mut self,
        channel_index: usize,
        real_channel_index: usize,
        samples: &[f32],
        timestamps: &[f64],
    ) -> Result<(), RecordError> {
        let sync_start = self.sync_start_seconds;
        let gain = self
            .gains
            .as_ref()
            .map_or(GAIN_DEFAULT, |gains| gains.get(channel_index));
        let mut scaled = std::mem::take(&mut self.scaled);

        let result = self.open_files_mut().and_then(|files| {
            let count = samples.len().min(timestamps.len());
            let skip = match sync_start {
                Some(start) => timestamps[..count].iter().take_while(|&&t| t < start).count(),
                None => 0,
            };
            if skip == count {
                return Ok(());
            }
            log::trace!(
                "continuous block: channel {} (real {}) {} samples, {} skipped, gain {}",
                channel_index,
                real_channel_index,
                count - skip,
                skip,
                gain
            );

            let block = if gain == GAIN_DEFAULT {
                &samples[skip..count]
            } else {
                scaled.clear();
                scaled.extend_from_slice(&samples[skip..count]);
                apply_gain(&mut scaled, gain);
                &scaled[..]
            };

            match files {
                ModeFiles::None | ModeFiles::SpikesAndHeader { .. } => Ok(()),
                ModeFiles::ContinuousDownsampled { channels } => {
                    match channels.get_mut(channel_index) {
                        Some(channel) => channel.write(block).map(|_| ()),
                        None => Err(RecordError::UnknownChannel(channel_index)),
                    }
                }
                ModeFiles::PositionTracking { pos } => pos.write_channel(channel_index, block),
            }
        });
        self.scaled = scaled;

        result.map_err(|e| self.fail(e))
    }

    /// Record one spike detected on `electrode_index`
    pub fn write_spike(&mut self, electrode_index: usize, spike: &Spike<'_>) -> Result<(), RecordError> {
        let sync_known = self.sync_start_seconds.is_some();
        let files = self.open_files_mut()?;
        let ModeFiles::SpikesAndHeader { tetrodes, .. } = files else {
            return Ok(());
        };
        if !sync_known {
            log::trace!("Ignoring spike before the recording start is known");
            return Ok(());
        }
        if spike.timestamp_seconds < 0.0 {
            return Ok(());
        }

        let result = match tetrodes.get_mut(electrode_index) {
            Some(tetrode) => tetrode.write_spike(spike),
            None => Err(RecordError::UnknownChannel(electrode_index)),
        };
        result.map_err(|e| self.fail(e))
    }

    /// Events are not part of the LTX recording
    pub fn write_event(&mut self, event_channel: usize, _payload: &[u8]) {
        log::trace!("Ignoring event on channel {}", event_channel);
    }

    /// Establish the trial's start time from the host's sync message
    ///
    /// Stream 0 carries no sync information. When `source_sample_rate` is zero the
    /// rate of the first continuous channel is used instead.
    pub fn write_timestamp_sync_text(
        &mut self,
        stream_id: u64,
        sample_number: i64,
        source_sample_rate: f32,
        text: &str,
    ) -> Result<(), RecordError> {
        if stream_id == 0 {
            return Ok(());
        }
        self.open_files_mut()?;
        if self.sync_start_seconds.is_some() {
            return Err(self.fail(RecordError::SyncTextRepeated { stream_id }));
        }

        let rate = if source_sample_rate > 0.0 {
            source_sample_rate
        } else {
            self.layout
                .continuous_channels
                .first()
                .map(|c| c.sample_rate)
                .or_else(|| self.layout.spike_channels.first().map(|c| c.sample_rate))
                .unwrap_or(0.0)
        };
        if rate <= 0.0 {
            log::warn!("Cannot derive a start time from sync text '{}': no sample rate", text);
            return Ok(());
        }

        let start = sample_number as f64 / f64::from(rate);
        log::debug!("Recording start at {}s (stream {}: {})", start, stream_id, text);
        self.sync_start_seconds = Some(start);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{ContinuousChannelInfo, SpikeChannelInfo};
    use crate::config::HeaderSettings;
    use crate::staged_file::PLACEHOLDER_WIDTH;
    use tempfile::tempdir;

    fn session() -> RecordingSession {
        let config = Config::default();
        let shared = Arc::new(SharedHeaderSettings::from(&config));
        RecordingSession::new(config, shared, AcquisitionControl::new())
    }

    fn tetrode_layout(electrodes: usize) -> RecordingLayout {
        RecordingLayout {
            spike_channels: (0..electrodes)
                .map(|i| SpikeChannelInfo::tetrode(format!("TT{}", i + 1), 30000.0, 1.0))
                .collect(),
            continuous_channels: vec![ContinuousChannelInfo::new("CH1", "acq", 30000.0, 1.0)],
        }
    }

    fn eeg_layout(channels: usize, rate: f32) -> RecordingLayout {
        RecordingLayout {
            spike_channels: Vec::new(),
            continuous_channels: (0..channels)
                .map(|i| ContinuousChannelInfo::new(format!("CH{}", i + 1), "acq", rate, 0.25))
                .collect(),
        }
    }

    fn pos_layout(channels: usize) -> RecordingLayout {
        RecordingLayout {
            spike_channels: Vec::new(),
            continuous_channels: (0..channels)
                .map(|i| ContinuousChannelInfo::new(format!("pos{}", i), "bonsai", 50.0, 1.0))
                .collect(),
        }
    }

    fn field(contents: &[u8], key: &str) -> String {
        let needle = format!("\r\n{} ", key);
        let pos = contents
            .windows(needle.len())
            .position(|w| w == needle.as_bytes())
            .unwrap_or_else(|| panic!("{} not found", key));
        let begin = pos + needle.len();
        let value: Vec<u8> = contents[begin..]
            .iter()
            .take_while(|&&b| b != b'\r')
            .take(PLACEHOLDER_WIDTH)
            .copied()
            .collect();
        String::from_utf8_lossy(&value).trim_end().to_string()
    }

    fn payload(contents: &[u8]) -> &[u8] {
        let marker = b"data_start";
        let begin = contents
            .windows(marker.len())
            .position(|w| w == marker)
            .unwrap()
            + marker.len();
        let end = contents.len() - b"\r\ndata_end".len();
        &contents[begin..end]
    }

    #[test]
    fn test_mode_selection() {
        assert_eq!(RecordMode::select(&tetrode_layout(1), "bonsai"), RecordMode::SpikesAndHeader);
        assert_eq!(RecordMode::select(&RecordingLayout::default(), "bonsai"), RecordMode::None);
        assert_eq!(RecordMode::select(&pos_layout(7), "bonsai"), RecordMode::PositionTracking);
        assert_eq!(
            RecordMode::select(&eeg_layout(2, 30000.0), "bonsai"),
            RecordMode::ContinuousDownsampled
        );
        assert_eq!(
            RecordMode::select(&pos_layout(7), "tracker"),
            RecordMode::ContinuousDownsampled
        );
    }

    #[test]
    fn test_trial_base_path() {
        let root = Path::new("/data/2024-03-05_14-07-00");
        assert_eq!(trial_base_path(root, 1, 0), PathBuf::from("/data/2024-03-05_14-07-00"));
        assert_eq!(
            trial_base_path(root, 2, 0),
            PathBuf::from("/data/2024-03-05_14-07-00 e2")
        );
        assert_eq!(
            trial_base_path(root, 1, 2),
            PathBuf::from("/data/2024-03-05_14-07-00 r3")
        );
    }

    #[test]
    fn test_lifecycle_misuse() {
        let dir = tempdir().unwrap();
        let mut session = session();
        assert!(matches!(
            session.write_continuous_data(0, 0, &[0.0], &[0.0]),
            Err(RecordError::NotOpen)
        ));
        assert!(matches!(session.close_files(), Err(RecordError::NotOpen)));

        let root = dir.path().join("trial");
        session.open_files(&root, 1, 0, eeg_layout(1, 30000.0)).unwrap();
        assert!(matches!(
            session.open_files(&root, 1, 0, eeg_layout(1, 30000.0)),
            Err(RecordError::AlreadyOpened)
        ));
        session.close_files().unwrap();

        assert!(matches!(session.close_files(), Err(RecordError::AlreadyClosed)));
        assert!(matches!(
            session.write_continuous_data(0, 0, &[0.0], &[0.0]),
            Err(RecordError::AlreadyClosed)
        ));
        assert!(session.acquisition().is_active());
    }

    #[test]
    fn test_nothing_to_record() {
        let dir = tempdir().unwrap();
        let mut session = session();
        let rx = session.acquisition().subscribe();

        let mode = session
            .open_files(&dir.path().join("trial"), 1, 0, RecordingLayout::default())
            .unwrap();
        assert_eq!(mode, RecordMode::None);
        session.write_continuous_data(0, 0, &[1.0], &[0.0]).unwrap();
        session.close_files().unwrap();

        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert_eq!(rx.try_recv().unwrap(), RecorderUpdate::ModeSelected(RecordMode::None));
        assert_eq!(
            rx.try_recv().unwrap(),
            RecorderUpdate::FilesClosed { mode: RecordMode::None }
        );
    }

    #[test]
    fn test_spike_trial() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("trial");
        let mut session = session();
        session.open_files(&root, 1, 0, tetrode_layout(2)).unwrap();
        session.write_timestamp_sync_text(1, 0, 30000.0, "start").unwrap();

        let data = vec![1.0f32; 160];
        let spike = Spike {
            timestamp_seconds: 0.5,
            num_channels: 4,
            samples_per_channel: 40,
            data: &data,
        };
        session.write_spike(1, &spike).unwrap();
        session.write_spike(1, &spike).unwrap();
        session.write_spike(0, &spike).unwrap();
        // Continuous data is ignored in this mode
        session.write_continuous_data(0, 0, &[1.0; 10], &[1.0; 10]).unwrap();
        session.close_files().unwrap();

        let set = std::fs::read(dir.path().join("trial.set")).unwrap();
        assert_eq!(field(&set, "lightBearing_2"), "180");
        assert!(!set.windows(10).any(|w| w == b"data_start"));

        let second = std::fs::read(dir.path().join("trial.2")).unwrap();
        assert_eq!(field(&second, "num_spikes"), "2");
        assert_eq!(field(&second, "timebase"), "96000 hz");
        let records = payload(&second);
        assert_eq!(records.len(), 2 * 216);
        assert_eq!(u32::from_be_bytes(records[..4].try_into().unwrap()), 48_000);

        let first = std::fs::read(dir.path().join("trial.1")).unwrap();
        assert_eq!(field(&first, "num_spikes"), "1");
    }

    #[test]
    fn test_spikes_ignored_before_sync() {
        let dir = tempdir().unwrap();
        let mut session = session();
        session.open_files(&dir.path().join("trial"), 1, 0, tetrode_layout(1)).unwrap();

        let data = vec![0.0f32; 160];
        let spike = Spike {
            timestamp_seconds: 0.1,
            num_channels: 4,
            samples_per_channel: 40,
            data: &data,
        };
        session.write_spike(0, &spike).unwrap();
        match &session.state {
            SessionState::Open(ModeFiles::SpikesAndHeader { tetrodes, .. }) => {
                assert_eq!(tetrodes[0].spike_count(), 0)
            }
            _ => panic!("expected an open spike session"),
        }
        session.close_files().unwrap();
    }

    #[test]
    fn test_malformed_spike_aborts() {
        let dir = tempdir().unwrap();
        let mut session = session();
        let rx = session.acquisition().subscribe();
        session.open_files(&dir.path().join("trial"), 1, 0, tetrode_layout(1)).unwrap();
        session.write_timestamp_sync_text(1, 0, 30000.0, "start").unwrap();

        let data = vec![0.0f32; 120];
        let spike = Spike {
            timestamp_seconds: 0.1,
            num_channels: 3,
            samples_per_channel: 40,
            data: &data,
        };
        assert!(matches!(
            session.write_spike(0, &spike),
            Err(RecordError::SpikeChannelCount { expected: 4, found: 3 })
        ));
        assert!(session.is_aborted());
        assert!(!session.acquisition().is_active());
        assert!(matches!(session.write_spike(0, &spike), Err(RecordError::Aborted)));
        session.close_files().unwrap();

        rx.try_recv().unwrap();
        assert!(matches!(rx.try_recv().unwrap(), RecorderUpdate::Aborted { .. }));
    }

    #[test]
    fn test_bad_electrode_layout_aborts_at_open() {
        let dir = tempdir().unwrap();
        let mut layout = tetrode_layout(1);
        layout.spike_channels[0].samples_per_spike = 32;

        let mut session = session();
        assert!(matches!(
            session.open_files(&dir.path().join("trial"), 1, 0, layout),
            Err(RecordError::SpikeSampleCount { .. })
        ));
        assert!(!session.acquisition().is_active());
        assert_eq!(session.mode(), RecordMode::SpikesAndHeader);
        session.close_files().unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_eeg_downsample_count() {
        let dir = tempdir().unwrap();
        let mut session = session();
        session
            .open_files(&dir.path().join("trial"), 1, 0, eeg_layout(2, 30000.0))
            .unwrap();

        let signal: Vec<f32> = (0..30_000).map(|i| ((i % 300) as f32) - 150.0).collect();
        let times: Vec<f64> = (0..30_000).map(|i| i as f64 / 30_000.0).collect();

        // Channel 0 in uneven blocks, channel 1 in one piece
        let mut offset = 0;
        let mut size = 1;
        while offset < signal.len() {
            let end = (offset + size).min(signal.len());
            session
                .write_continuous_data(0, 0, &signal[offset..end], &times[offset..end])
                .unwrap();
            offset = end;
            size = size % 97 + 13;
        }
        session.write_continuous_data(1, 1, &signal, &times).unwrap();
        session.close_files().unwrap();

        let egf = std::fs::read(dir.path().join("trial.egf")).unwrap();
        assert_eq!(field(&egf, "num_EEG_samples"), "1000");
        assert_eq!(field(&egf, "sample_rate"), "1000 hz");
        let samples = payload(&egf);
        assert_eq!(samples.len(), 1000);
        for (k, &b) in samples.iter().enumerate() {
            let expected = crate::codec::float_to_i8_saturating(signal[k * 30], 1.0);
            assert_eq!(b as i8, expected, "sample {}", k);
        }

        let egf2 = std::fs::read(dir.path().join("trial.egf2")).unwrap();
        assert_eq!(field(&egf2, "num_EEG_samples"), "1000");
        assert_eq!(payload(&egf), payload(&egf2));
    }

    #[test]
    fn test_eeg_single_block_limit() {
        let dir = tempdir().unwrap();
        let mut session = session();
        session
            .open_files(&dir.path().join("trial"), 1, 0, eeg_layout(1, 30000.0))
            .unwrap();

        let block = vec![10.0f32; 30_000];
        let times: Vec<f64> = (0..30_000).map(|i| i as f64 / 30_000.0).collect();
        session.write_continuous_data(0, 0, &block, &times).unwrap();
        session.close_files().unwrap();

        let egf = std::fs::read(dir.path().join("trial.egf")).unwrap();
        assert_eq!(field(&egf, "num_EEG_samples"), "1000");
        assert_eq!(payload(&egf).len(), 1000);
        assert!(payload(&egf).iter().all(|&b| b == 10));
    }

    #[test]
    fn test_channel_gain_applied_before_downsampling() {
        let dir = tempdir().unwrap();
        let gains = Arc::new(ChannelGains::new(2));
        let mut session = session().with_channel_gains(gains.clone());
        session
            .open_files(&dir.path().join("trial"), 1, 0, eeg_layout(2, 30000.0))
            .unwrap();

        let block = vec![10.0f32; 300];
        let times: Vec<f64> = (0..300).map(|i| i as f64 / 30_000.0).collect();
        gains.set(1, 2.5);
        session.write_continuous_data(0, 0, &block, &times).unwrap();
        session.write_continuous_data(1, 1, &block, &times).unwrap();
        // Changed mid-trial, applies to the next block
        gains.set(1, 100.0);
        session.write_continuous_data(1, 1, &block, &times).unwrap();
        session.close_files().unwrap();

        let egf = std::fs::read(dir.path().join("trial.egf")).unwrap();
        assert_eq!(payload(&egf), &[10u8; 10]);

        let egf2 = std::fs::read(dir.path().join("trial.egf2")).unwrap();
        let samples = payload(&egf2);
        assert_eq!(&samples[..10], &[25u8; 10]);
        assert_eq!(&samples[10..], &[127u8; 10]);
    }

    #[test]
    fn test_channel_gain_scales_position_values() {
        let dir = tempdir().unwrap();
        let gains = Arc::new(ChannelGains::new(7));
        gains.set(1, 4.0);
        let mut session = session().with_channel_gains(gains);
        session.open_files(&dir.path().join("trial"), 1, 0, pos_layout(7)).unwrap();

        session.write_continuous_data(0, 0, &[1.0], &[0.0]).unwrap();
        for ch in 1..7 {
            session.write_continuous_data(ch, ch, &[25.0], &[0.0]).unwrap();
        }
        session.close_files().unwrap();

        let pos = std::fs::read(dir.path().join("trial.pos")).unwrap();
        let record = payload(&pos);
        assert_eq!(&record[4..6], &100u16.to_be_bytes());
        assert_eq!(&record[6..8], &25u16.to_be_bytes());
    }

    #[test]
    fn test_eeg_wrong_rate_aborts() {
        let dir = tempdir().unwrap();
        let mut session = session();
        assert!(matches!(
            session.open_files(&dir.path().join("trial"), 1, 0, eeg_layout(1, 20000.0)),
            Err(RecordError::SampleRate { .. })
        ));
        assert!(!session.acquisition().is_active());
        assert!(matches!(
            session.write_continuous_data(0, 0, &[0.0], &[0.0]),
            Err(RecordError::Aborted)
        ));
        session.close_files().unwrap();
    }

    #[test]
    fn test_samples_before_sync_start_dropped() {
        let dir = tempdir().unwrap();
        let mut session = session();
        session
            .open_files(&dir.path().join("trial"), 1, 0, eeg_layout(1, 30000.0))
            .unwrap();
        // Start at sample 300 (10 ms)
        session.write_timestamp_sync_text(1, 300, 0.0, "start").unwrap();

        let signal: Vec<f32> = (0..600).map(|i| if i < 300 { -100.0 } else { 20.0 }).collect();
        let times: Vec<f64> = (0..600).map(|i| i as f64 / 30_000.0).collect();
        session.write_continuous_data(0, 0, &signal[..200], &times[..200]).unwrap();
        session.write_continuous_data(0, 0, &signal[200..], &times[200..]).unwrap();
        session.close_files().unwrap();

        let egf = std::fs::read(dir.path().join("trial.egf")).unwrap();
        assert_eq!(field(&egf, "num_EEG_samples"), "10");
        assert_eq!(payload(&egf), &[20u8; 10]);
    }

    #[test]
    fn test_repeated_sync_text_aborts() {
        let dir = tempdir().unwrap();
        let mut session = session();
        session
            .open_files(&dir.path().join("trial"), 1, 0, eeg_layout(1, 30000.0))
            .unwrap();

        session.write_timestamp_sync_text(0, 10, 30000.0, "ignored").unwrap();
        session.write_timestamp_sync_text(1, 0, 30000.0, "start").unwrap();
        assert!(matches!(
            session.write_timestamp_sync_text(2, 0, 30000.0, "again"),
            Err(RecordError::SyncTextRepeated { stream_id: 2 })
        ));
        assert!(!session.acquisition().is_active());
        session.close_files().unwrap();
    }

    #[test]
    fn test_position_record_ordering() {
        let dir = tempdir().unwrap();
        let mut session = session();
        session.open_files(&dir.path().join("trial"), 1, 0, pos_layout(7)).unwrap();

        let pos_payload = |session: &RecordingSession| match &session.state {
            SessionState::Open(ModeFiles::PositionTracking { pos }) => pos.file().payload_len(),
            _ => panic!("expected an open position session"),
        };

        for ch in 0..6 {
            session.write_continuous_data(ch, ch, &[1.5], &[0.0]).unwrap();
            assert_eq!(pos_payload(&session), 0);
        }
        session.write_continuous_data(6, 6, &[3.0], &[0.0]).unwrap();
        assert_eq!(pos_payload(&session), 16);
        session.close_files().unwrap();

        let pos = std::fs::read(dir.path().join("trial.pos")).unwrap();
        assert_eq!(field(&pos, "num_pos_samples"), "1");
        assert_eq!(field(&pos, "sample_rate"), "50 hz");
        assert_eq!(payload(&pos).len(), 16);
    }

    #[test]
    fn test_position_header_uses_shared_settings() {
        let dir = tempdir().unwrap();
        let config = Config::default();
        let shared = Arc::new(SharedHeaderSettings::new(HeaderSettings {
            window_max_x: 700,
            window_max_y: 700,
            pixels_per_metre: 795.0,
        }));
        let mut session = RecordingSession::new(config, shared.clone(), AcquisitionControl::new());

        shared.set_window(640, 480);
        shared.set_pixels_per_metre(350.0);
        session.open_files(&dir.path().join("trial"), 1, 0, pos_layout(7)).unwrap();
        shared.set_window(1, 1);
        session.close_files().unwrap();

        let pos = std::fs::read(dir.path().join("trial.pos")).unwrap();
        assert_eq!(field(&pos, "window_max_x"), "640");
        assert_eq!(field(&pos, "max_y"), "480");
        assert_eq!(field(&pos, "pixels_per_metre"), "350");
    }

    #[test]
    fn test_position_wrong_channel_count_aborts() {
        let dir = tempdir().unwrap();
        let mut session = session();
        assert!(matches!(
            session.open_files(&dir.path().join("trial"), 1, 0, pos_layout(6)),
            Err(RecordError::PositionChannelCount { expected: 7, found: 6 })
        ));
        assert!(!session.acquisition().is_active());
        session.close_files().unwrap();
    }

    #[test]
    fn test_position_large_origin_aborts() {
        let dir = tempdir().unwrap();
        let mut session = session();
        session.open_files(&dir.path().join("trial"), 1, 0, pos_layout(7)).unwrap();

        assert!(matches!(
            session.write_continuous_data(0, 0, &[15_000.0], &[0.0]),
            Err(RecordError::PositionOriginTooLarge { .. })
        ));
        assert!(!session.acquisition().is_active());
        session.close_files().unwrap();
    }

    #[test]
    fn test_experiment_and_recording_suffixes() {
        let dir = tempdir().unwrap();
        let mut session = session();
        session
            .open_files(&dir.path().join("trial"), 3, 1, eeg_layout(2, 30000.0))
            .unwrap();
        session.close_files().unwrap();

        assert!(dir.path().join("trial e3 r2.egf").exists());
        assert!(dir.path().join("trial e3 r2.egf2").exists());
    }
}
