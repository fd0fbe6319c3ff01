//! Cutline Core Type Definitions
//!
//! Defines fundamental identifier types used throughout the engine.

/// Project unique identifier (ULID)
pub type ProjectId = String;

/// Sequence unique identifier (ULID)
pub type SequenceId = String;

/// Track unique identifier (ULID)
pub type TrackId = String;

/// Clip unique identifier (ULID)
pub type ClipId = String;

/// Media unique identifier (ULID)
pub type MediaId = String;

/// Command unique identifier (UUID v4)
pub type CommandId = String;

/// Undo stack identifier (`global` or `timeline:<sequence_id>`)
pub type StackId = String;

/// Undo group identifier (ULID)
pub type UndoGroupId = String;

/// Mints a new entity id.
pub fn new_entity_id() -> String {
    ulid::Ulid::new().to_string()
}

/// Mints a new command id.
pub fn new_command_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Current time as an RFC 3339 string, the store's timestamp format.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Current time as unix milliseconds, the event envelope's timestamp format.
pub fn now_unix_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
