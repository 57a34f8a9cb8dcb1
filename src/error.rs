//! Crate-wide error type.
//!
//! Lookups that can legitimately miss (unknown producer, unknown object)
//! return `Option` instead of going through this enum.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode episode JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("scene '{scene_id}' not found in {path}")]
    SceneNotFound { scene_id: String, path: PathBuf },

    #[error("frame id '{0}' is not an integer")]
    InvalidFrameId(String),

    #[error("frame key '{key}' repeats frame id {frame_id}")]
    DuplicateFrameId { frame_id: i64, key: String },

    #[error("frame {frame_id}: object '{object_id}' has no pose record")]
    MissingPose { frame_id: i64, object_id: String },

    #[error("'{0}' is not a number")]
    InvalidNumber(String),

    #[error("no transform registered for frame '{0}'")]
    UnknownFrame(String),

    #[error("object '{0}' already exists")]
    ObjectExists(String),

    #[error("object '{0}' not found")]
    ObjectNotFound(String),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("a current event logger is already installed")]
    CurrentLoggerAlreadySet,

    #[error("end timestamp {end} precedes start timestamp {start}")]
    EndBeforeStart { start: f64, end: f64 },

    #[error("{0} is not an interaction event")]
    NotAnInteraction(String),

    #[error("failed to spawn {name} thread: {source}")]
    ThreadSpawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} thread panicked")]
    ThreadPanicked(&'static str),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
