//! Mutation Plans
//!
//! A plan is the full payload of a clip geometry change. Plans are
//! emitted by the pure planners and serialized into persisted undo
//! payloads, so every variant carries absolute values.

use serde::{Deserialize, Serialize};

use crate::core::store::ClipRow;
use crate::core::{ClipId, TrackId};

/// One planned clip mutation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Mutation {
    /// Create a new clip row.
    Insert { clip: ClipRow },
    /// Rewrite a clip's geometry; `track_id` is set for cross-track moves.
    Update {
        clip_id: ClipId,
        timeline_start_frame: i64,
        duration_frames: i64,
        source_in_frame: i64,
        source_out_frame: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        track_id: Option<TrackId>,
    },
    /// Remove a clip row.
    Delete { clip_id: ClipId },
}

impl Mutation {
    /// The id of the clip this mutation touches.
    pub fn clip_id(&self) -> &str {
        match self {
            Mutation::Insert { clip } => &clip.id,
            Mutation::Update { clip_id, .. } => clip_id,
            Mutation::Delete { clip_id } => clip_id,
        }
    }

    /// Whether this mutation targets a clip that already exists.
    pub fn touches_existing(&self) -> bool {
        !matches!(self, Mutation::Insert { .. })
    }
}
