//! Crate-wide error taxonomy.

use std::io;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, OrbitError>;

/// Errors produced anywhere in the pipeline.
///
/// Most I/O-adjacent variants carry the underlying [`io::Error`] so callers
/// can still inspect `raw_os_error()` for diagnostics even after the error
/// has been classified.
#[derive(thiserror::Error, Debug)]
pub enum OrbitError {
    #[error("no source paths configured")]
    NoSources,

    #[error("invalid target path: {0}")]
    InvalidTarget(PathBuf),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("target device out of space, want={want} have={have}")]
    TargetNoSpace { want: u64, have: u64 },

    #[error("target device dropped to read-only")]
    TargetDropToReadonly,
}

impl OrbitError {
    /// Classifies an I/O error observed while preparing or writing a target,
    /// mapping it onto the device-terminal error kinds the copy stage cares
    /// about. Errors that don't match a known device-terminal errno pass
    /// through as a plain `Io` wrapping.
    pub fn classify_target_io(err: io::Error) -> Self {
        match err.raw_os_error() {
            #[cfg(unix)]
            Some(code) if code == libc::ENOSPC => OrbitError::TargetNoSpace {
                want: 0,
                have: 0,
            },
            #[cfg(unix)]
            Some(code) if code == libc::EROFS || code == libc::EIO => {
                OrbitError::TargetDropToReadonly
            }
            _ => OrbitError::Io(err),
        }
    }

    /// Whether this error, if observed while opening or writing a target,
    /// should mark the owning device as bad for the remainder of the run.
    ///
    /// A bare `O_EXCL` failure (`EEXIST`, surfaced here as a generic `Io`)
    /// never marks the device bad: the destination itself exists, which
    /// says nothing about the device's remaining capacity or writability.
    pub fn marks_device_bad(&self) -> bool {
        matches!(
            self,
            OrbitError::TargetNoSpace { .. } | OrbitError::TargetDropToReadonly
        )
    }
}
