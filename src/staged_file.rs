//! # Staged Trial File Module
//!
//! One LTX trial file written in strictly ordered stages, with header fields
//! that are reserved up front and patched in once the trial has ended.
//!
//! ## Write Phases
//! ```text
//! Headers ──write_binary_data──▶ Binary ──finalise_header_placeholder──▶ Epilogue
//!    │                             │                                       │
//!    └──────────────── finalise_file (from any phase) ─────────────────────┴──▶ Closed
//! ```
//! - `add_header_value` / `add_header_placeholder`: `Headers` only
//! - `write_binary_data`: `Headers` or `Binary`; the first call writes `data_start`
//! - `finalise_header_placeholder`: leaves `Headers`/`Binary` (writing `data_end`
//!   when leaving `Binary`) and patches the custom placeholder
//! - `finalise_file`: patches the duration placeholder and closes the file
//!
//! Any call in the wrong phase is logged and returns a [`FileError`] without
//! touching the file.
//!
//! ## File Layout
//! ```text
//! trial_date Tuesday, 05 Mar 2024\r\n
//! trial_time 14:07\r\n
//! created_by open-ephys-plugin-ltx\r\n
//! duration <14 chars>\r\n
//! <key> <value>\r\n ...
//! num_spikes <14 chars>\r\n
//! data_start<binary payload>\r\n
//! data_end
//! ```
//!
//! ## Thread Safety
//! Every method takes the per-file mutex, so a finalise issued from another thread
//! can never interleave with a write that is already in flight.

use crate::error::FileError;
use chrono::{DateTime, Local};
use std::ffi::OsString;
use std::fmt::Display;
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Width of every patched header field
pub const PLACEHOLDER_WIDTH: usize = 14;

const DATA_START: &[u8] = b"\r\ndata_start";
const DATA_END: &[u8] = b"\r\ndata_end";

/// Stage of the write protocol a file is in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePhase {
    Headers,
    Binary,
    Epilogue,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CustomPlaceholder {
    Unused,
    Open { offset: u64 },
    Finalised,
}

struct Inner {
    writer: Option<BufWriter<File>>,
    phase: WritePhase,
    /// Bytes written so far, i.e. the offset of the next byte
    position: u64,
    duration_offset: u64,
    placeholder: CustomPlaceholder,
    payload_len: u64,
}

impl Inner {
    fn writer(&mut self) -> Result<&mut BufWriter<File>, FileError> {
        let phase = self.phase;
        self.writer.as_mut().ok_or(FileError::InvalidPhase {
            operation: "write",
            phase,
        })
    }

    fn append(&mut self, bytes: &[u8]) -> Result<(), FileError> {
        self.writer()?.write_all(bytes)?;
        self.position += bytes.len() as u64;
        Ok(())
    }

    /// Overwrite a reserved field and return to the end of the file
    fn patch(&mut self, offset: u64, value: &str) -> Result<(), FileError> {
        let field = format_field(value);
        let end = self.position;
        let writer = self.writer()?;
        writer.seek(SeekFrom::Start(offset))?;
        writer.write_all(field.as_bytes())?;
        writer.seek(SeekFrom::Start(end))?;
        Ok(())
    }

    fn close_binary_section(&mut self) -> Result<(), FileError> {
        if self.phase == WritePhase::Binary {
            self.append(DATA_END)?;
        }
        Ok(())
    }

    fn finish(&mut self, duration_seconds: i64) -> Result<(), FileError> {
        self.close_binary_section()?;
        self.patch(self.duration_offset, &duration_seconds.to_string())?;
        self.writer()?.flush()?;
        Ok(())
    }
}

/// Left-justify `value` in a fixed-width field, truncating anything longer
fn format_field(value: &str) -> String {
    format!("{:<width$.width$}", value, width = PLACEHOLDER_WIDTH)
}

/// A single trial file (`.set`, `.1`, `.egf`, `.pos`, ...)
pub struct StagedFile {
    path: PathBuf,
    start_time: DateTime<Local>,
    inner: Mutex<Inner>,
}

impl StagedFile {
    /// Create `<base_path><extension>` and write the fixed preamble
    ///
    /// The preamble reserves the duration field, which [`StagedFile::finalise_file`]
    /// fills with the whole seconds elapsed since `start_time`.
    pub fn create(
        base_path: &Path,
        extension: &str,
        start_time: DateTime<Local>,
        created_by: &str,
    ) -> Result<Self, FileError> {
        let mut full_path = OsString::from(base_path.as_os_str());
        full_path.push(extension);
        let path = PathBuf::from(full_path);

        log::debug!("Opening trial file: {}", path.display());
        let file = File::create(&path)?;

        let mut inner = Inner {
            writer: Some(BufWriter::new(file)),
            phase: WritePhase::Headers,
            position: 0,
            duration_offset: 0,
            placeholder: CustomPlaceholder::Unused,
            payload_len: 0,
        };

        let preamble = format!(
            "trial_date {}\r\ntrial_time {}\r\ncreated_by {}\r\nduration ",
            start_time.format("%A, %d %b %Y"),
            start_time.format("%H:%M"),
            created_by,
        );
        inner.append(preamble.as_bytes())?;
        inner.duration_offset = inner.position;
        inner.append(format_field("").as_bytes())?;

        Ok(Self {
            path,
            start_time,
            inner: Mutex::new(inner),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reject<T>(&self, err: FileError) -> Result<T, FileError> {
        log::error!("{}: {}", self.path.display(), err);
        Err(err)
    }

    /// Append a `key value` header line
    pub fn add_header_value(&self, key: &str, value: impl Display) -> Result<(), FileError> {
        let mut inner = self.lock();
        if inner.phase != WritePhase::Headers {
            let phase = inner.phase;
            return self.reject(FileError::InvalidPhase {
                operation: "add_header_value",
                phase,
            });
        }

        inner.append(format!("\r\n{} {}", key, value).as_bytes())
    }

    /// Append `key` followed by a blank field to be filled by
    /// [`StagedFile::finalise_header_placeholder`]
    pub fn add_header_placeholder(&self, key: &str) -> Result<(), FileError> {
        let mut inner = self.lock();
        if inner.phase != WritePhase::Headers {
            let phase = inner.phase;
            return self.reject(FileError::InvalidPhase {
                operation: "add_header_placeholder",
                phase,
            });
        }
        if inner.placeholder != CustomPlaceholder::Unused {
            return self.reject(FileError::PlaceholderAlreadyOpen);
        }

        inner.append(format!("\r\n{} ", key).as_bytes())?;
        let offset = inner.position;
        inner.append(format_field("").as_bytes())?;
        inner.placeholder = CustomPlaceholder::Open { offset };
        Ok(())
    }

    /// Append raw payload bytes, opening the binary section on first use
    pub fn write_binary_data(&self, bytes: &[u8]) -> Result<(), FileError> {
        let mut inner = self.lock();
        match inner.phase {
            WritePhase::Headers => {
                inner.append(DATA_START)?;
                inner.phase = WritePhase::Binary;
            }
            WritePhase::Binary => {}
            phase => {
                return self.reject(FileError::InvalidPhase {
                    operation: "write_binary_data",
                    phase,
                });
            }
        }

        inner.append(bytes)?;
        inner.payload_len += bytes.len() as u64;
        Ok(())
    }

    /// Close the data section and patch the custom placeholder with `value`
    pub fn finalise_header_placeholder(&self, value: impl Display) -> Result<(), FileError> {
        let mut inner = self.lock();
        if inner.phase == WritePhase::Closed {
            return self.reject(FileError::InvalidPhase {
                operation: "finalise_header_placeholder",
                phase: WritePhase::Closed,
            });
        }
        let offset = match inner.placeholder {
            CustomPlaceholder::Open { offset } => offset,
            _ => return self.reject(FileError::NoOpenPlaceholder),
        };

        inner.close_binary_section()?;
        inner.phase = WritePhase::Epilogue;
        inner.placeholder = CustomPlaceholder::Finalised;
        inner.patch(offset, &value.to_string())
    }

    /// Patch the trial duration and close the file
    ///
    /// The file is closed even if patching fails.
    pub fn finalise_file(&self, end_time: DateTime<Local>) -> Result<(), FileError> {
        let mut inner = self.lock();
        if inner.phase == WritePhase::Closed {
            return self.reject(FileError::InvalidPhase {
                operation: "finalise_file",
                phase: WritePhase::Closed,
            });
        }

        let seconds = (end_time - self.start_time).num_seconds().max(0);
        let result = inner.finish(seconds);

        inner.phase = WritePhase::Closed;
        inner.writer = None;
        log::debug!("Closed trial file: {} ({}s)", self.path.display(), seconds);
        result
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn start_time(&self) -> DateTime<Local> {
        self.start_time
    }

    pub fn phase(&self) -> WritePhase {
        self.lock().phase
    }

    /// Bytes written through [`StagedFile::write_binary_data`]
    pub fn payload_len(&self) -> u64 {
        self.lock().payload_len
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        if inner.phase != WritePhase::Closed {
            log::error!(
                "{} dropped in the {:?} phase without finalise_file; closing it unfinished",
                self.path.display(),
                inner.phase
            );
            if let Some(mut writer) = inner.writer.take() {
                let _ = writer.flush();
            }
        }
    }
}
