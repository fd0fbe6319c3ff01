//! Store Row Models
//!
//! Typed rows for every table in the primary store. Frame counts on the
//! timeline axis use the owning sequence's rate; source in/out use the
//! clip's own media rate.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::time::FrameRate;
use crate::core::{
    ClipId, CommandId, MediaId, ProjectId, SequenceId, StackId, TrackId, UndoGroupId,
};

// =============================================================================
// Enumerations
// =============================================================================

/// A sequence is either a timeline or a single-media master clip container.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SequenceKind {
    Timeline,
    MasterClip,
}

impl SequenceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeline => "timeline",
            Self::MasterClip => "masterclip",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "timeline" => Some(Self::Timeline),
            "masterclip" => Some(Self::MasterClip),
            _ => None,
        }
    }
}

/// Track lane type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TrackType {
    Video,
    Audio,
}

impl TrackType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Video => "VIDEO",
            Self::Audio => "AUDIO",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "VIDEO" => Some(Self::Video),
            "AUDIO" => Some(Self::Audio),
            _ => None,
        }
    }
}

/// Clip placement kind: on a timeline track or a free-standing master clip.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClipKind {
    Timeline,
    Master,
}

impl ClipKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeline => "timeline",
            Self::Master => "master",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "timeline" => Some(Self::Timeline),
            "master" => Some(Self::Master),
            _ => None,
        }
    }
}

// =============================================================================
// Rows
// =============================================================================

/// Project row. Exactly one project is active per open store.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProjectRow {
    pub id: ProjectId,
    pub name: String,
    /// JSON settings: default rate, canvas size, active sequence.
    pub settings: Value,
    /// Persisted undo cursor of the global stack.
    pub current_sequence_number: i64,
    pub created_at: String,
    pub modified_at: String,
}

/// Sequence row: a timeline or a master clip container.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SequenceRow {
    pub id: SequenceId,
    pub project_id: ProjectId,
    pub name: String,
    pub kind: SequenceKind,
    pub fps_num: u32,
    pub fps_den: u32,
    pub width: u32,
    pub height: u32,
    pub audio_sample_rate: u32,
    pub playhead_frame: i64,
    pub view_start_frame: i64,
    pub view_duration_frames: i64,
    /// Persisted undo cursor of this sequence's timeline stack.
    pub current_sequence_number: i64,
    pub created_at: String,
    pub modified_at: String,
}

impl SequenceRow {
    pub fn rate(&self) -> FrameRate {
        FrameRate::new(self.fps_num, self.fps_den)
    }
}

/// Track row: an ordered lane within a sequence. `track_index` is
/// 1-based within its type; the lowest video index has display priority.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrackRow {
    pub id: TrackId,
    pub sequence_id: SequenceId,
    pub track_type: TrackType,
    pub track_index: i64,
    pub name: String,
    pub enabled: bool,
}

/// Clip row: a placed interval referencing media or a master clip.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClipRow {
    pub id: ClipId,
    pub project_id: ProjectId,
    pub track_id: Option<TrackId>,
    pub clip_kind: ClipKind,
    pub name: String,
    pub media_id: Option<MediaId>,
    pub master_clip_id: Option<ClipId>,
    pub owner_sequence_id: Option<SequenceId>,
    pub source_sequence_id: Option<SequenceId>,
    pub timeline_start_frame: i64,
    pub duration_frames: i64,
    pub source_in_frame: i64,
    pub source_out_frame: i64,
    pub fps_num: u32,
    pub fps_den: u32,
    pub enabled: bool,
    pub offline: bool,
    pub created_at: String,
    pub modified_at: String,
}

impl ClipRow {
    /// The clip's own media rate, governing source in/out.
    pub fn rate(&self) -> FrameRate {
        FrameRate::new(self.fps_num, self.fps_den)
    }

    /// Exclusive end frame on the timeline axis.
    pub fn end_frame(&self) -> i64 {
        self.timeline_start_frame + self.duration_frames
    }

    /// Whether the half-open interval contains `frame`.
    pub fn contains_frame(&self, frame: i64) -> bool {
        frame >= self.timeline_start_frame && frame < self.end_frame()
    }

    /// Whether the half-open interval intersects `[start, end)`.
    pub fn overlaps(&self, start: i64, end: i64) -> bool {
        self.timeline_start_frame < end && self.end_frame() > start
    }
}

/// Media row: an external asset.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MediaRow {
    pub id: MediaId,
    pub project_id: ProjectId,
    pub name: String,
    pub file_path: String,
    pub duration_frames: i64,
    pub fps_num: u32,
    pub fps_den: u32,
    pub width: u32,
    pub height: u32,
    pub audio_channels: u32,
    pub codec: String,
    pub metadata: Value,
}

impl MediaRow {
    pub fn rate(&self) -> FrameRate {
        FrameRate::new(self.fps_num, self.fps_den)
    }
}

/// Typed key-value annotation on a clip.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PropertyRow {
    pub clip_id: ClipId,
    pub key: String,
    pub kind: String,
    pub value: Value,
}

/// Membership row of a sync group joining co-placed A/V clips.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClipLinkRow {
    pub link_id: String,
    pub clip_id: ClipId,
}

/// Persisted command record. Immutable after execution except for the
/// persisted undo payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommandRow {
    pub sequence_number: i64,
    /// The stack cursor at entry; forms the undo DAG.
    pub parent_sequence_number: i64,
    pub command_id: CommandId,
    pub command_type: String,
    pub command_args: Value,
    /// Executor-written undo/redo payload.
    pub persisted: Value,
    pub project_id: ProjectId,
    pub stack_id: StackId,
    pub executed_at: String,
    pub playhead_value: Option<i64>,
    pub undo_group_id: Option<UndoGroupId>,
}
