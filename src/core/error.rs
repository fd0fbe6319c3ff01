//! Cutline Error Definitions
//!
//! Defines error types used throughout the engine.

use thiserror::Error;

use super::{ClipId, MediaId, ProjectId, SequenceId, TrackId};

/// Core engine error types
#[derive(Error, Debug)]
pub enum CoreError {
    // =========================================================================
    // Precondition Errors
    // =========================================================================
    #[error("Project not found: {0}")]
    ProjectNotFound(ProjectId),

    #[error("Sequence not found: {0}")]
    SequenceNotFound(SequenceId),

    #[error("Track not found: {0}")]
    TrackNotFound(TrackId),

    #[error("Clip not found: {0}")]
    ClipNotFound(ClipId),

    #[error("Media not found: {0}")]
    MediaNotFound(MediaId),

    #[error("Command not found: sequence number {0}")]
    CommandNotFound(i64),

    #[error("No active sequence")]
    NoActiveSequence,

    // =========================================================================
    // Time Errors
    // =========================================================================
    #[error("Rate mismatch: {left} vs {right}")]
    RateMismatch { left: String, right: String },

    #[error("Invalid frame rate: {0}/{1}")]
    InvalidRate(u32, u32),

    #[error("Invalid timecode: {0}")]
    InvalidTimecode(String),

    // =========================================================================
    // Command Errors
    // =========================================================================
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Validation error in {command}: {message}")]
    ValidationError { command: String, message: String },

    #[error("Nothing to undo")]
    NothingToUndo,

    #[error("Nothing to redo")]
    NothingToRedo,

    // =========================================================================
    // Mutation Errors
    // =========================================================================
    #[error(
        "Clip overlap on track {track_id}: [{new_start}, {new_end}) conflicts with clip {existing_clip_id}"
    )]
    ClipOverlap {
        track_id: TrackId,
        existing_clip_id: ClipId,
        new_start: i64,
        new_end: i64,
    },

    #[error("Mutation conflict on {target}: {reason}")]
    MutationConflict { target: String, reason: String },

    // =========================================================================
    // Store / Projection Errors
    // =========================================================================
    #[error("Store error: {0}")]
    SqlError(#[from] rusqlite::Error),

    #[error("Projection error: {0}")]
    ProjectionError(String),

    // =========================================================================
    // General Errors
    // =========================================================================
    #[error("Keymap error: {0}")]
    KeymapError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Core engine result type
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Builds a validation error for the given command.
    pub fn validation(command: &str, message: impl Into<String>) -> Self {
        Self::ValidationError {
            command: command.to_string(),
            message: message.into(),
        }
    }

    /// Convert to the `{success, error_message}` surface observed by callers.
    pub fn to_caller_message(&self) -> String {
        self.to_string()
    }
}
