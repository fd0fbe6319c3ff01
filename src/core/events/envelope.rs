//! Event Envelopes
//!
//! One JSON object per committed command. Consumers must tolerate
//! unknown payload keys, so deserialization ignores extras and every
//! payload slot is optional.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{ProjectId, SequenceId, StackId};

/// Projection scope of an envelope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventScope {
    Timeline(SequenceId),
    Media,
    Ui,
    Command,
}

impl EventScope {
    pub fn as_string(&self) -> String {
        match self {
            Self::Timeline(seq) => format!("timeline:{seq}"),
            Self::Media => "media".to_string(),
            Self::Ui => "ui".to_string(),
            Self::Command => "command".to_string(),
        }
    }
}

/// Deterministic envelope id: the 26-digit zero-padded sequence number.
pub fn event_id(sequence_number: i64) -> String {
    format!("{sequence_number:026}")
}

/// One line of the event stream.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub scope: String,
    pub ts: i64,
    pub author: String,
    /// At most one entry, the parent sequence number, keeping the undo
    /// DAG recoverable from the stream alone.
    pub parents: Vec<String>,
    pub schema: u32,
    pub payload_v: u32,
    pub command_id: String,
    pub project_id: ProjectId,
    pub stack_id: StackId,
    #[serde(default)]
    pub timeline_payload: Option<Value>,
    #[serde(default)]
    pub media_payload: Option<Value>,
    #[serde(default)]
    pub ui_payload: Option<Value>,
    pub generic_payload: Value,
}

impl EventEnvelope {
    /// The sequence number encoded in the envelope id.
    pub fn sequence_number(&self) -> Option<i64> {
        self.id.parse::<i64>().ok()
    }
}
