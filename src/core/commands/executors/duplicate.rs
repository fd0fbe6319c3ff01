//! Duplicate Executors
//!
//! Block duplication of timeline clips and duplication of master clips
//! from stored snapshots.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::core::commands::Command;
use crate::core::mutator::{plan_duplicate_block, DuplicateBlockRequest};
use crate::core::store::{ClipKind, ClipRow, Database, PropertyRow};
use crate::core::{new_entity_id, now_rfc3339, ClipId, CoreError, CoreResult, TrackId};

use super::{
    redo_plan, run_plan, sequence_for_clip, undo_plan, EventPayloads, ExecContext, Executor,
};

// =============================================================================
// DuplicateBlock
// =============================================================================

/// Copies a block of clips onto mapped tracks at a clamped delta, per
/// the duplicate-block plan.
pub struct DuplicateBlockExecutor;

impl Executor for DuplicateBlockExecutor {
    fn execute(
        &self,
        db: &Database,
        cmd: &mut Command,
        _ctx: &ExecContext,
    ) -> CoreResult<EventPayloads> {
        let clip_ids: Vec<String> = cmd
            .array_param("clip_ids")?
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();
        if clip_ids.is_empty() {
            return Err(CoreError::validation(&cmd.command_type, "no clips selected"));
        }
        let target_track_id = cmd.str_param("target_track_id")?.to_string();
        let anchor_clip_id = cmd.str_param("anchor_clip_id")?.to_string();

        let seq = sequence_for_clip(db, &anchor_clip_id)?;
        let seq_rate = seq.rate();
        let delta = cmd
            .time_param("delta_frames", seq_rate)?
            .rescale_floor(seq_rate);

        let mut sources = Vec::new();
        for clip_id in &clip_ids {
            sources.push(db.get_clip(clip_id)?);
        }
        let tracks = db.tracks_for_sequence(&seq.id)?;
        let mut clips_by_track: BTreeMap<TrackId, Vec<ClipRow>> = BTreeMap::new();
        for track in &tracks {
            clips_by_track.insert(track.id.clone(), db.clips_on_track(&track.id)?);
        }

        let plan = plan_duplicate_block(
            &DuplicateBlockRequest {
                sources: &sources,
                tracks: &tracks,
                clips_by_track: &clips_by_track,
                target_track_id: &target_track_id,
                anchor_clip_id: &anchor_clip_id,
                delta,
            },
            seq_rate,
        )?;

        let copies = plan.copies.clone();
        let applied_delta = plan.applied_delta;
        let mutations = run_plan(db, cmd, plan.mutations)?;
        for (source_id, copy_id) in &copies {
            db.copy_properties(source_id, copy_id)?;
        }

        cmd.persist("applied_delta", applied_delta.into());
        cmd.persist_serialized("copies", &copies)?;
        db.touch_sequence(&seq.id)?;
        EventPayloads::timeline(&seq.id, &mutations)
    }

    fn undo(&self, db: &Database, cmd: &Command) -> CoreResult<()> {
        undo_plan(db, cmd)
    }

    fn redo(&self, db: &Database, cmd: &Command) -> CoreResult<()> {
        redo_plan(db, cmd)?;
        let copies: Vec<(ClipId, ClipId)> = cmd.persisted_deserialized("copies")?;
        for (source_id, copy_id) in &copies {
            db.copy_properties(source_id, copy_id)?;
        }
        Ok(())
    }
}

// =============================================================================
// DuplicateMasterClip
// =============================================================================

/// Creates a new master clip from a stored snapshot, with a fresh id
/// and copied properties.
pub struct DuplicateMasterClipExecutor;

impl Executor for DuplicateMasterClipExecutor {
    fn execute(
        &self,
        db: &Database,
        cmd: &mut Command,
        ctx: &ExecContext,
    ) -> CoreResult<EventPayloads> {
        let snapshot = cmd
            .parameters
            .get("snapshot")
            .and_then(Value::as_object)
            .cloned()
            .ok_or_else(|| CoreError::validation(&cmd.command_type, "missing snapshot"))?;

        let get_i64 = |key: &str, default: i64| -> i64 {
            snapshot.get(key).and_then(Value::as_i64).unwrap_or(default)
        };
        let duration = get_i64("duration_frames", 0);
        let source_in = get_i64("source_in_frame", 0);

        let now = now_rfc3339();
        let clip = ClipRow {
            id: new_entity_id(),
            project_id: ctx.project_id.clone(),
            track_id: None,
            clip_kind: ClipKind::Master,
            name: snapshot
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or("untitled")
                .to_string(),
            media_id: snapshot
                .get("media_id")
                .and_then(Value::as_str)
                .map(str::to_string),
            master_clip_id: None,
            owner_sequence_id: None,
            source_sequence_id: snapshot
                .get("source_sequence_id")
                .and_then(Value::as_str)
                .map(str::to_string),
            timeline_start_frame: 0,
            duration_frames: duration.max(1),
            source_in_frame: source_in,
            source_out_frame: get_i64("source_out_frame", source_in + duration.max(1)),
            fps_num: get_i64("fps_num", 30) as u32,
            fps_den: get_i64("fps_den", 1) as u32,
            enabled: true,
            offline: false,
            created_at: now.clone(),
            modified_at: now,
        };

        db.insert_clip(&clip)?;

        let mut properties = Vec::new();
        if let Some(props) = snapshot.get("properties").and_then(Value::as_object) {
            for (key, value) in props {
                properties.push(PropertyRow {
                    clip_id: clip.id.clone(),
                    key: key.clone(),
                    kind: kind_of(value),
                    value: value.clone(),
                });
            }
        }
        if let Some(bin) = cmd.opt_str_param("target_bin") {
            properties.push(PropertyRow {
                clip_id: clip.id.clone(),
                key: "bin".into(),
                kind: "string".into(),
                value: Value::from(bin),
            });
        }
        for prop in &properties {
            db.upsert_property(prop)?;
        }

        cmd.persist("created_clip_id", clip.id.clone().into());
        cmd.persist_serialized("created_clip", &clip)?;
        cmd.persist_serialized("created_properties", &properties)?;
        Ok(EventPayloads::command_only())
    }

    fn undo(&self, db: &Database, cmd: &Command) -> CoreResult<()> {
        let clip_id: String = cmd.persisted_deserialized("created_clip_id")?;
        db.delete_clip(&clip_id)
    }

    fn redo(&self, db: &Database, cmd: &Command) -> CoreResult<()> {
        let clip: ClipRow = cmd.persisted_deserialized("created_clip")?;
        db.insert_clip(&clip)?;
        let properties: Vec<PropertyRow> = cmd.persisted_deserialized("created_properties")?;
        for prop in &properties {
            db.upsert_property(prop)?;
        }
        Ok(())
    }
}

fn kind_of(value: &Value) -> String {
    match value {
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        _ => "json",
    }
    .to_string()
}
