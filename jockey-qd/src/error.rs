//! Error types for jockey-qd
//!
//! Defines the daemon error taxonomy using thiserror. Every queue and
//! driver error is recoverable at the command surface: it is rendered
//! as a user-visible status + message, never a crash.

use thiserror::Error;

/// Main error type for the jockey queue daemon
#[derive(Error, Debug)]
pub enum Error {
    /// A direct media URL could not be resolved
    #[error("Invalid media source: {0}")]
    InvalidSource(String),

    /// A free-text search returned no match
    #[error("No results found for: {0}")]
    NoResults(String),

    /// The resolver did not answer within the configured timeout
    #[error("Media resolution timed out after {0} seconds")]
    ResolutionTimeout(u64),

    /// 1-based queue position past the end of the pending list
    #[error("Position {position} is out of range (queue has {len} tracks)")]
    OutOfRange { position: usize, len: usize },

    /// Shuffle requires at least two pending tracks
    #[error("Not enough tracks in queue to shuffle")]
    InsufficientItems,

    /// Setting value outside 0-100
    #[error("Value {0} is out of range (expected 0-100)")]
    InvalidRange(u8),

    /// Operation requires the Playing state
    #[error("No music is currently playing")]
    NotPlaying,

    /// Resume requires the Paused state
    #[error("Music is not paused")]
    NotPaused,

    /// Operation requires an active playback session
    #[error("No active playback")]
    NoActivePlayback,

    /// Operation requires a live voice stream
    #[error("No music player found")]
    NoPlayer,

    /// Queue listing requested with nothing queued or playing
    #[error("The queue is empty")]
    EmptyQueue,

    /// Voice gateway failure (connect or stream start)
    #[error("Voice transport failure: {0}")]
    TransportFailure(String),

    /// Accepted-but-unsupported operation (seek/previous/lyrics)
    #[error("{0} is not available in this version")]
    NotImplemented(&'static str),

    /// Caller or guild is on the deny list
    #[error("Blacklisted {kind}: {id}")]
    Blacklisted { kind: &'static str, id: String },

    /// Configuration file loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience Result type using the jockey-qd Error
pub type Result<T> = std::result::Result<T, Error>;
