//! Event Log & Projections
//!
//! For each committed command an envelope is appended to the project's
//! JSONL event stream and projected into read-model tables in a sidecar
//! database. The stream is append-only; line N corresponds one-to-one
//! to the command with sequence number N, and the read model is a pure
//! projection rebuildable from the stream.

mod envelope;
mod log;
mod readmodel;

pub use envelope::{event_id, EventEnvelope, EventScope};
pub use log::{EventLog, ReadResult};
pub use readmodel::ReadModel;
