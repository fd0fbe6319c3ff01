//! Command Executors
//!
//! One executor per command type. Executors run inside the manager's
//! transaction, read normalized parameters, plan through the clip
//! mutator, apply through the store, and write enough persisted payload
//! to reverse and replay the operation deterministically.

mod batch;
mod clip;
mod duplicate;
mod media;
mod ripple;
mod sequence;
mod ui;

use std::collections::BTreeMap;

use serde_json::Value;

use crate::core::events::EventScope;
use crate::core::mutator::apply::{
    apply_mutations, capture_originals, revert_mutations, OriginalStates,
};
use crate::core::mutator::Mutation;
use crate::core::store::{Database, SequenceRow};
use crate::core::{CoreError, CoreResult, ProjectId, SequenceId, StackId};

use super::Command;

pub use batch::BatchCommandExecutor;
pub use clip::{
    DeleteClipExecutor, InsertExecutor, MoveClipToTrackExecutor, NudgeExecutor,
    OverwriteExecutor, SplitClipExecutor,
};
pub use duplicate::{DuplicateBlockExecutor, DuplicateMasterClipExecutor};
pub use media::ImportMediaExecutor;
pub use ripple::{
    BatchRippleEditExecutor, RippleDeleteExecutor, RippleDeleteSelectionExecutor,
    RippleEditExecutor,
};
pub use sequence::{AddTrackExecutor, CreateSequenceExecutor};
pub use ui::{SetActiveSequenceExecutor, SetPlayheadExecutor};

// =============================================================================
// Context & Payloads
// =============================================================================

/// Ambient execution context handed to every executor.
#[derive(Clone, Debug)]
pub struct ExecContext {
    pub project_id: ProjectId,
    /// Target sequence resolved by the manager, when derivable.
    pub sequence_id: Option<SequenceId>,
    pub parent_sequence_number: i64,
    pub stack_id: StackId,
    pub is_ui_context: bool,
}

/// Event payload slots an executor fills for projection.
#[derive(Debug)]
pub struct EventPayloads {
    pub scope: EventScope,
    pub timeline: Option<Value>,
    pub media: Option<Value>,
    pub ui: Option<Value>,
}

impl EventPayloads {
    pub fn timeline(sequence_id: &str, mutations: &[Mutation]) -> CoreResult<Self> {
        Ok(Self {
            scope: EventScope::Timeline(sequence_id.to_string()),
            timeline: Some(serde_json::json!({
                "sequence_id": sequence_id,
                "mutations": serde_json::to_value(mutations)?,
            })),
            media: None,
            ui: None,
        })
    }

    pub fn media(payload: Value) -> Self {
        Self {
            scope: EventScope::Media,
            timeline: None,
            media: Some(payload),
            ui: None,
        }
    }

    pub fn ui(payload: Value) -> Self {
        Self {
            scope: EventScope::Ui,
            timeline: None,
            media: None,
            ui: Some(payload),
        }
    }

    pub fn command_only() -> Self {
        Self {
            scope: EventScope::Command,
            timeline: None,
            media: None,
            ui: None,
        }
    }
}

// =============================================================================
// Executor Trait
// =============================================================================

/// A concrete edit operation.
pub trait Executor {
    /// Runs the operation, writing its undo payload into the command.
    fn execute(
        &self,
        db: &Database,
        cmd: &mut Command,
        ctx: &ExecContext,
    ) -> CoreResult<EventPayloads>;

    /// Reverses the operation from its persisted payload.
    fn undo(&self, db: &Database, cmd: &Command) -> CoreResult<()>;

    /// Replays the operation forward from its persisted payload, so that
    /// redo reproduces the exact post-state including generated ids.
    fn redo(&self, db: &Database, cmd: &Command) -> CoreResult<()>;
}

/// Builds the full registry of spec-defined executors.
pub fn default_registry() -> BTreeMap<String, Box<dyn Executor>> {
    let mut registry: BTreeMap<String, Box<dyn Executor>> = BTreeMap::new();
    registry.insert("Insert".into(), Box::new(InsertExecutor));
    registry.insert("Overwrite".into(), Box::new(OverwriteExecutor));
    registry.insert("SplitClip".into(), Box::new(SplitClipExecutor));
    registry.insert("DeleteClip".into(), Box::new(DeleteClipExecutor));
    registry.insert("BatchCommand".into(), Box::new(BatchCommandExecutor));
    registry.insert("RippleDelete".into(), Box::new(RippleDeleteExecutor));
    registry.insert(
        "RippleDeleteSelection".into(),
        Box::new(RippleDeleteSelectionExecutor),
    );
    registry.insert("RippleEdit".into(), Box::new(RippleEditExecutor));
    registry.insert("BatchRippleEdit".into(), Box::new(BatchRippleEditExecutor));
    registry.insert("Nudge".into(), Box::new(NudgeExecutor));
    registry.insert("MoveClipToTrack".into(), Box::new(MoveClipToTrackExecutor));
    registry.insert("DuplicateBlock".into(), Box::new(DuplicateBlockExecutor));
    registry.insert(
        "DuplicateMasterClip".into(),
        Box::new(DuplicateMasterClipExecutor),
    );
    registry.insert("ImportMedia".into(), Box::new(ImportMediaExecutor));
    registry.insert("CreateSequence".into(), Box::new(CreateSequenceExecutor));
    registry.insert("AddTrack".into(), Box::new(AddTrackExecutor));
    registry.insert("SetPlayhead".into(), Box::new(SetPlayheadExecutor));
    registry.insert(
        "SetActiveSequence".into(),
        Box::new(SetActiveSequenceExecutor),
    );
    registry
}

// =============================================================================
// Shared Plan Helpers
// =============================================================================

/// Applies a plan and persists it with the captured originals, the
/// uniform undo payload of every mutating executor.
pub(crate) fn run_plan(
    db: &Database,
    cmd: &mut Command,
    mutations: Vec<Mutation>,
) -> CoreResult<Vec<Mutation>> {
    let originals = capture_originals(db, &mutations)?;
    apply_mutations(db, &mutations)?;
    cmd.persist_serialized("executed_mutations", &mutations)?;
    cmd.persist_serialized("original_states", &originals)?;
    Ok(mutations)
}

/// Reverses a persisted plan.
pub(crate) fn undo_plan(db: &Database, cmd: &Command) -> CoreResult<()> {
    let mutations: Vec<Mutation> = cmd.persisted_deserialized("executed_mutations")?;
    let originals: OriginalStates = cmd.persisted_deserialized("original_states")?;
    revert_mutations(db, &mutations, &originals)
}

/// Replays a persisted plan forward.
pub(crate) fn redo_plan(db: &Database, cmd: &Command) -> CoreResult<()> {
    let mutations: Vec<Mutation> = cmd.persisted_deserialized("executed_mutations")?;
    apply_mutations(db, &mutations)
}

/// The sequence owning a track, used for rate lookups and event scopes.
pub(crate) fn sequence_for_track(db: &Database, track_id: &str) -> CoreResult<SequenceRow> {
    let track = db.get_track(track_id)?;
    db.get_sequence(&track.sequence_id)
}

/// The sequence owning a clip placed on a track.
pub(crate) fn sequence_for_clip(db: &Database, clip_id: &str) -> CoreResult<SequenceRow> {
    let clip = db.get_clip(clip_id)?;
    let track_id = clip.track_id.as_deref().ok_or_else(|| {
        CoreError::MutationConflict {
            target: clip_id.to_string(),
            reason: "clip is not placed on a track".into(),
        }
    })?;
    sequence_for_track(db, track_id)
}
