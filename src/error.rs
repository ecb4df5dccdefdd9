//! # Error Types Module
//!
//! Centralized error handling for the LTX recorder.
//! Provides custom error types for each layer with proper context and error chaining.
//!
//! ## Error Types
//! - `FileError`: Staged file I/O and write-phase protocol violations
//! - `RecordError`: Recording session failures (configuration mismatches, lifecycle misuse)
//! - `ConfigError`: Configuration file I/O and parsing errors
//!
//! ## Severity
//! - Configuration mismatches (`RecordError::SpikeChannelCount`, `SampleRate`, ...) are fatal
//!   to the trial: the session aborts acquisition before returning them.
//! - Phase violations (`FileError::InvalidPhase`, ...) are local: the file is left untouched
//!   and the caller decides what to do.

use std::fmt;

use crate::staged_file::WritePhase;

/// Errors that can occur while writing a staged trial file
#[derive(Debug)]
pub enum FileError {
    /// Underlying file operation failed
    Io(std::io::Error),
    /// Operation is not allowed in the file's current write phase
    InvalidPhase {
        operation: &'static str,
        phase: WritePhase,
    },
    /// A custom placeholder has already been reserved in this file
    PlaceholderAlreadyOpen,
    /// No custom placeholder is waiting to be finalised
    NoOpenPlaceholder,
}

impl fmt::Display for FileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileError::Io(e) => write!(f, "File I/O failed: {}", e),
            FileError::InvalidPhase { operation, phase } => {
                write!(f, "{} is not allowed in the {:?} phase", operation, phase)
            }
            FileError::PlaceholderAlreadyOpen => {
                write!(f, "A header placeholder has already been reserved for this file")
            }
            FileError::NoOpenPlaceholder => {
                write!(f, "No header placeholder is open to be finalised")
            }
        }
    }
}

impl std::error::Error for FileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FileError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for FileError {
    fn from(e: std::io::Error) -> Self {
        FileError::Io(e)
    }
}

/// Errors that can occur during a recording session
#[derive(Debug)]
pub enum RecordError {
    /// Electrode does not carry exactly the expected number of channels
    SpikeChannelCount { expected: usize, found: usize },
    /// Spike waveform does not carry exactly the expected number of samples per channel
    SpikeSampleCount { expected: usize, found: usize },
    /// Continuous channel is not sampled at the expected rate
    SampleRate { channel: usize, expected: f32, found: f32 },
    /// Position stream does not carry exactly the expected number of channels
    PositionChannelCount { expected: usize, found: usize },
    /// First position timestamp is too large to keep useful precision
    PositionOriginTooLarge { seconds: f32 },
    /// Timestamp sync text arrived a second time for a non-zero stream
    SyncTextRepeated { stream_id: u64 },
    /// Channel or electrode index has no open file
    UnknownChannel(usize),
    /// Session has not been opened yet
    NotOpen,
    /// Session was already opened for this trial
    AlreadyOpened,
    /// Session has been closed
    AlreadyClosed,
    /// Trial was aborted after a fatal configuration mismatch
    Aborted,
    /// Failed to prepare the output location
    Io(std::io::Error),
    /// Staged file operation failed
    File(FileError),
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordError::SpikeChannelCount { expected, found } => {
                write!(f, "Expected exactly {} channels for a spike, but found {}", expected, found)
            }
            RecordError::SpikeSampleCount { expected, found } => {
                write!(
                    f,
                    "Expected exactly {} samples per spike channel, but found {}",
                    expected, found
                )
            }
            RecordError::SampleRate { channel, expected, found } => {
                write!(
                    f,
                    "Expected a sample rate of exactly {} on channel {}, but found {}",
                    expected, channel, found
                )
            }
            RecordError::PositionChannelCount { expected, found } => {
                write!(
                    f,
                    "Position recording requires exactly {} channels \
                     (t,x1,y1,x2,y2,numpix1,numpix2), but received {}",
                    expected, found
                )
            }
            RecordError::PositionOriginTooLarge { seconds } => {
                write!(
                    f,
                    "Position recording started with timestamp {} seconds; \
                     restart acquisition so the source timestamp begins near zero",
                    seconds
                )
            }
            RecordError::SyncTextRepeated { stream_id } => {
                write!(f, "Timestamp sync text received more than once (stream {})", stream_id)
            }
            RecordError::UnknownChannel(index) => write!(f, "No file is open for index {}", index),
            RecordError::NotOpen => write!(f, "Recording session is not open"),
            RecordError::AlreadyOpened => write!(f, "Recording session was already opened"),
            RecordError::AlreadyClosed => write!(f, "Recording session is already closed"),
            RecordError::Aborted => write!(f, "Recording was aborted"),
            RecordError::Io(e) => write!(f, "Failed to prepare recording output: {}", e),
            RecordError::File(e) => write!(f, "Trial file error: {}", e),
        }
    }
}

impl std::error::Error for RecordError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RecordError::Io(e) => Some(e),
            RecordError::File(e) => Some(e),
            _ => None,
        }
    }
}

impl From<FileError> for RecordError {
    fn from(e: FileError) -> Self {
        RecordError::File(e)
    }
}

impl RecordError {
    /// Whether this error means the upstream pipeline is misconfigured for the trial
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RecordError::SpikeChannelCount { .. }
                | RecordError::SpikeSampleCount { .. }
                | RecordError::SampleRate { .. }
                | RecordError::PositionChannelCount { .. }
                | RecordError::PositionOriginTooLarge { .. }
                | RecordError::SyncTextRepeated { .. }
        )
    }
}

/// Errors that can occur during configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read config file
    ReadFailed(std::io::Error),
    /// Failed to write config file
    WriteFailed(std::io::Error),
    /// Failed to parse config file
    ParseFailed(toml::de::Error),
    /// Failed to serialize config
    SerializeFailed(toml::ser::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ReadFailed(e) => {
                write!(f, "Failed to read config file: {}", e)
            }
            ConfigError::WriteFailed(e) => {
                write!(f, "Failed to write config file: {}", e)
            }
            ConfigError::ParseFailed(e) => {
                write!(f, "Failed to parse config file: {}", e)
            }
            ConfigError::SerializeFailed(e) => {
                write!(f, "Failed to serialize config: {}", e)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::ReadFailed(e) => Some(e),
            ConfigError::WriteFailed(e) => Some(e),
            ConfigError::ParseFailed(e) => Some(e),
            ConfigError::SerializeFailed(e) => Some(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_file_error_display() {
        let err = FileError::InvalidPhase {
            operation: "add_header_value",
            phase: WritePhase::Binary,
        };
        assert!(err.to_string().contains("add_header_value"));
        assert!(err.to_string().contains("Binary"));
    }

    #[test]
    fn test_record_error_chain() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = RecordError::from(FileError::from(io_err));
        assert!(err.source().is_some());
        assert!(err.source().and_then(|e| e.source()).is_some());
    }

    #[test]
    fn test_fatal_classification() {
        assert!(RecordError::SpikeChannelCount { expected: 4, found: 3 }.is_fatal());
        assert!(RecordError::PositionOriginTooLarge { seconds: 20000.0 }.is_fatal());
        assert!(!RecordError::NotOpen.is_fatal());
        assert!(!RecordError::File(FileError::NoOpenPlaceholder).is_fatal());
    }

    #[test]
    fn test_config_error_chain() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = ConfigError::ReadFailed(io_err);
        assert!(err.source().is_some());
    }
}
