use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Every failure the scheduler core can report.
///
/// Input errors carry a message suitable for showing to the user as-is.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Please enter a time")]
    EmptyTime,

    #[error("Time must be in HH:MM format, got '{0}'")]
    InvalidTime(String),

    #[error("Hour must be 0-23 and minute 0-59, got '{0}'")]
    TimeOutOfRange(String),

    #[error("Please choose an audio file")]
    EmptyPath,

    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("No schedule entry at {0}")]
    NoEntry(String),

    #[error("Volume must be a number between 0 and 1")]
    InvalidVolume,

    #[error("Cannot decode '{}': {message}", path.display())]
    Decode { path: PathBuf, message: String },

    #[error("Audio device error: {0}")]
    Device(String),

    #[error("Audio output error: {0}")]
    Output(String),

    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("Serialize error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// True for errors caused by bad user input rather than the environment.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Error::EmptyTime
                | Error::InvalidTime(_)
                | Error::TimeOutOfRange(_)
                | Error::EmptyPath
                | Error::FileNotFound(_)
                | Error::NoEntry(_)
                | Error::InvalidVolume
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
