//! Clip Executors
//!
//! Insert, Overwrite, SplitClip, DeleteClip, Nudge, and
//! MoveClipToTrack.

use crate::core::commands::Command;
use crate::core::constraints;
use crate::core::mutator::{plan_occlusion, plan_ripple, Mutation};
use crate::core::store::{ClipKind, ClipRow, Database, SequenceRow};
use crate::core::time::{rescale_frames, FrameRate, RationalTime};
use crate::core::{new_entity_id, now_rfc3339, CoreError, CoreResult};

use super::{
    run_plan, sequence_for_clip, sequence_for_track, undo_plan, redo_plan, EventPayloads,
    ExecContext, Executor,
};

/// Resolved source for a new clip placement: where the frames come from
/// and at what rate.
struct ClipSource {
    media_id: Option<String>,
    master_clip_id: Option<String>,
    rate: FrameRate,
    native_duration_frames: i64,
    name: String,
}

fn resolve_source(db: &Database, cmd: &Command) -> CoreResult<ClipSource> {
    if let Some(media_id) = cmd.opt_str_param("media_id") {
        let media = db.get_media(media_id)?;
        return Ok(ClipSource {
            media_id: Some(media.id.clone()),
            master_clip_id: None,
            rate: media.rate(),
            native_duration_frames: media.duration_frames,
            name: media.name,
        });
    }
    let master_id = cmd.str_param("master_clip_id")?;
    let master = db.get_clip(master_id)?;
    if master.clip_kind != ClipKind::Master {
        return Err(CoreError::validation(
            &cmd.command_type,
            format!("{master_id} is not a master clip"),
        ));
    }
    Ok(ClipSource {
        media_id: master.media_id.clone(),
        master_clip_id: Some(master.id.clone()),
        rate: master.rate(),
        native_duration_frames: master.source_out_frame - master.source_in_frame,
        name: master.name,
    })
}

/// Builds the new clip row shared by Insert and Overwrite.
fn build_placement(
    db: &Database,
    cmd: &Command,
    ctx: &ExecContext,
    seq: &SequenceRow,
    track_id: &str,
    start: RationalTime,
) -> CoreResult<(ClipRow, i64)> {
    let seq_rate = seq.rate();
    if start.frames < 0 {
        return Err(CoreError::validation(
            &cmd.command_type,
            "placement time must not be negative",
        ));
    }

    let source = resolve_source(db, cmd)?;
    let source_in = cmd.opt_i64_param("source_in_frame").unwrap_or(0);

    // Duration defaults to whatever source material remains past the in
    // point, expressed on the sequence axis.
    let duration = match cmd.opt_i64_param("duration_frames") {
        Some(frames) => frames,
        None => {
            let remaining = source.native_duration_frames - source_in;
            rescale_frames(remaining, source.rate, seq_rate)
        }
    };
    if duration < 1 {
        return Err(CoreError::validation(
            &cmd.command_type,
            "clip duration must be at least one frame",
        ));
    }
    if source_in < 0 {
        return Err(CoreError::validation(
            &cmd.command_type,
            "source in point must not be negative",
        ));
    }

    let source_out = source_in + rescale_frames(duration, seq_rate, source.rate);
    let now = now_rfc3339();
    let clip = ClipRow {
        id: new_entity_id(),
        project_id: ctx.project_id.clone(),
        track_id: Some(track_id.to_string()),
        clip_kind: ClipKind::Timeline,
        name: cmd
            .opt_str_param("name")
            .map(str::to_string)
            .unwrap_or(source.name),
        media_id: source.media_id,
        master_clip_id: source.master_clip_id,
        owner_sequence_id: Some(seq.id.clone()),
        source_sequence_id: None,
        timeline_start_frame: start.frames,
        duration_frames: duration,
        source_in_frame: source_in,
        source_out_frame: source_out,
        fps_num: source.rate.num,
        fps_den: source.rate.den,
        enabled: true,
        offline: false,
        created_at: now.clone(),
        modified_at: now,
    };
    Ok((clip, duration))
}

// =============================================================================
// Insert
// =============================================================================

/// Places a new clip and ripples everything after the insert point to
/// the right by the clip's duration.
pub struct InsertExecutor;

impl Executor for InsertExecutor {
    fn execute(
        &self,
        db: &Database,
        cmd: &mut Command,
        ctx: &ExecContext,
    ) -> CoreResult<EventPayloads> {
        let track_id = cmd.str_param("track_id")?.to_string();
        let seq = sequence_for_track(db, &track_id)?;
        let seq_rate = seq.rate();
        let insert_time = cmd.time_param("insert_time", seq_rate)?.rescale_floor(seq_rate);

        let (clip, duration) = build_placement(db, cmd, ctx, &seq, &track_id, insert_time)?;
        let created_clip_id = clip.id.clone();

        let existing = db.clips_on_track(&track_id)?;
        let mut mutations = plan_ripple(
            &existing,
            seq_rate,
            insert_time,
            RationalTime::from_frames(duration, seq_rate),
        );
        mutations.push(Mutation::Insert { clip });

        let mutations = run_plan(db, cmd, mutations)?;
        cmd.persist("created_clip_id", created_clip_id.into());

        if cmd.bool_param("advance_playhead", false) {
            cmd.persist("original_playhead", seq.playhead_frame.into());
            cmd.persist("advanced_by", duration.into());
            db.set_sequence_playhead(&seq.id, seq.playhead_frame + duration)?;
        }

        db.touch_sequence(&seq.id)?;
        EventPayloads::timeline(&seq.id, &mutations)
    }

    fn undo(&self, db: &Database, cmd: &Command) -> CoreResult<()> {
        undo_plan(db, cmd)?;
        if let Ok(original) = cmd.persisted_value("original_playhead") {
            let seq = sequence_for_track(db, cmd.str_param("track_id")?)?;
            db.set_sequence_playhead(&seq.id, original.as_i64().unwrap_or(0))?;
        }
        Ok(())
    }

    fn redo(&self, db: &Database, cmd: &Command) -> CoreResult<()> {
        redo_plan(db, cmd)?;
        if let Ok(original) = cmd.persisted_value("original_playhead") {
            let advanced = cmd
                .persisted_value("advanced_by")
                .ok()
                .and_then(|v| v.as_i64())
                .unwrap_or(0);
            let seq = sequence_for_track(db, cmd.str_param("track_id")?)?;
            db.set_sequence_playhead(&seq.id, original.as_i64().unwrap_or(0) + advanced)?;
        }
        Ok(())
    }
}

// =============================================================================
// Overwrite
// =============================================================================

/// Places a new clip, trimming, splitting, or deleting whatever its
/// footprint covers.
pub struct OverwriteExecutor;

impl Executor for OverwriteExecutor {
    fn execute(
        &self,
        db: &Database,
        cmd: &mut Command,
        ctx: &ExecContext,
    ) -> CoreResult<EventPayloads> {
        let track_id = cmd.str_param("track_id")?.to_string();
        let seq = sequence_for_track(db, &track_id)?;
        let seq_rate = seq.rate();
        let overwrite_time = cmd
            .time_param("overwrite_time", seq_rate)?
            .rescale_floor(seq_rate);

        let (clip, duration) = build_placement(db, cmd, ctx, &seq, &track_id, overwrite_time)?;
        let created_clip_id = clip.id.clone();

        let existing = db.clips_on_track(&track_id)?;
        let mut mutations = plan_occlusion(
            &existing,
            seq_rate,
            overwrite_time,
            RationalTime::from_frames(duration, seq_rate),
            None,
        );
        mutations.push(Mutation::Insert { clip });

        let mutations = run_plan(db, cmd, mutations)?;
        cmd.persist("created_clip_id", created_clip_id.into());
        db.touch_sequence(&seq.id)?;
        EventPayloads::timeline(&seq.id, &mutations)
    }

    fn undo(&self, db: &Database, cmd: &Command) -> CoreResult<()> {
        undo_plan(db, cmd)
    }

    fn redo(&self, db: &Database, cmd: &Command) -> CoreResult<()> {
        redo_plan(db, cmd)
    }
}

// =============================================================================
// SplitClip
// =============================================================================

/// Closes a clip's right edge at the split point and creates the right
/// half as a new clip with an advanced source in point.
pub struct SplitClipExecutor;

impl Executor for SplitClipExecutor {
    fn execute(
        &self,
        db: &Database,
        cmd: &mut Command,
        _ctx: &ExecContext,
    ) -> CoreResult<EventPayloads> {
        let clip_id = cmd.str_param("clip_id")?.to_string();
        let clip = db.get_clip(&clip_id)?;
        let seq = sequence_for_clip(db, &clip_id)?;
        let seq_rate = seq.rate();
        let split_time = cmd.time_param("split_time", seq_rate)?.rescale_floor(seq_rate);

        let at = split_time.frames;
        if at <= clip.timeline_start_frame || at >= clip.end_frame() {
            return Err(CoreError::validation(
                &cmd.command_type,
                format!("split point {at} is outside clip {clip_id}"),
            ));
        }

        let media_rate = clip.rate();
        let left_duration = at - clip.timeline_start_frame;
        let split_offset = rescale_frames(left_duration, seq_rate, media_rate);

        let now = now_rfc3339();
        let right = ClipRow {
            id: new_entity_id(),
            timeline_start_frame: at,
            duration_frames: clip.end_frame() - at,
            source_in_frame: clip.source_in_frame + split_offset,
            source_out_frame: clip.source_out_frame,
            created_at: now.clone(),
            modified_at: now,
            ..clip.clone()
        };
        let created_clip_id = right.id.clone();

        let mutations = vec![
            Mutation::Update {
                clip_id: clip.id.clone(),
                timeline_start_frame: clip.timeline_start_frame,
                duration_frames: left_duration,
                source_in_frame: clip.source_in_frame,
                source_out_frame: clip.source_in_frame + split_offset,
                track_id: None,
            },
            Mutation::Insert { clip: right },
        ];

        let mutations = run_plan(db, cmd, mutations)?;
        cmd.persist("created_clip_id", created_clip_id.into());
        db.touch_sequence(&seq.id)?;
        EventPayloads::timeline(&seq.id, &mutations)
    }

    fn undo(&self, db: &Database, cmd: &Command) -> CoreResult<()> {
        undo_plan(db, cmd)
    }

    fn redo(&self, db: &Database, cmd: &Command) -> CoreResult<()> {
        redo_plan(db, cmd)
    }
}

// =============================================================================
// DeleteClip
// =============================================================================

/// Removes one clip, leaving a gap.
pub struct DeleteClipExecutor;

impl Executor for DeleteClipExecutor {
    fn execute(
        &self,
        db: &Database,
        cmd: &mut Command,
        _ctx: &ExecContext,
    ) -> CoreResult<EventPayloads> {
        let clip_id = cmd.str_param("clip_id")?.to_string();
        let seq = sequence_for_clip(db, &clip_id)?;

        let mutations = run_plan(db, cmd, vec![Mutation::Delete { clip_id }])?;
        db.touch_sequence(&seq.id)?;
        EventPayloads::timeline(&seq.id, &mutations)
    }

    fn undo(&self, db: &Database, cmd: &Command) -> CoreResult<()> {
        undo_plan(db, cmd)
    }

    fn redo(&self, db: &Database, cmd: &Command) -> CoreResult<()> {
        redo_plan(db, cmd)
    }
}

// =============================================================================
// Nudge
// =============================================================================

/// Shifts the selected clips by a frame amount, clamped so the block
/// never collides with unselected clips or frame zero.
pub struct NudgeExecutor;

impl Executor for NudgeExecutor {
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
        let requested = cmd.i64_param("nudge_amount_frames")?;

        let seq = sequence_for_clip(db, &clip_ids[0])?;

        // The block moves rigidly: intersect every clip's feasible delta
        // range against its unselected neighbours.
        let mut min_delta = i64::MIN;
        let mut max_delta = i64::MAX;
        let mut selected = Vec::new();
        for clip_id in &clip_ids {
            let clip = db.get_clip(clip_id)?;
            let track_id = clip.track_id.clone().ok_or_else(|| {
                CoreError::MutationConflict {
                    target: clip_id.clone(),
                    reason: "clip is not placed on a track".into(),
                }
            })?;
            let neighbours: Vec<ClipRow> = db
                .clips_on_track(&track_id)?
                .into_iter()
                .filter(|c| !clip_ids.contains(&c.id))
                .collect();
            let range = constraints::calculate_move_range(&clip, &neighbours);
            min_delta = min_delta.max(range.min_time - clip.timeline_start_frame);
            max_delta = max_delta.min(range.max_time - clip.timeline_start_frame);
            selected.push(clip);
        }

        let delta = requested.clamp(min_delta.min(0), max_delta.max(0));
        let mut mutations = Vec::new();
        if delta != 0 {
            selected.sort_by_key(|c| c.timeline_start_frame);
            if delta > 0 {
                selected.reverse();
            }
            for clip in &selected {
                mutations.push(Mutation::Update {
                    clip_id: clip.id.clone(),
                    timeline_start_frame: clip.timeline_start_frame + delta,
                    duration_frames: clip.duration_frames,
                    source_in_frame: clip.source_in_frame,
                    source_out_frame: clip.source_out_frame,
                    track_id: None,
                });
            }
        }

        let mutations = run_plan(db, cmd, mutations)?;
        cmd.persist("applied_delta", delta.into());
        db.touch_sequence(&seq.id)?;
        EventPayloads::timeline(&seq.id, &mutations)
    }

    fn undo(&self, db: &Database, cmd: &Command) -> CoreResult<()> {
        undo_plan(db, cmd)
    }

    fn redo(&self, db: &Database, cmd: &Command) -> CoreResult<()> {
        redo_plan(db, cmd)
    }
}

// =============================================================================
// MoveClipToTrack
// =============================================================================

/// Moves a clip to another track of the same type, occluding whatever
/// the landing interval covers there.
pub struct MoveClipToTrackExecutor;

impl Executor for MoveClipToTrackExecutor {
    fn execute(
        &self,
        db: &Database,
        cmd: &mut Command,
        _ctx: &ExecContext,
    ) -> CoreResult<EventPayloads> {
        let clip_id = cmd.str_param("clip_id")?.to_string();
        let target_track_id = cmd.str_param("target_track_id")?.to_string();

        let clip = db.get_clip(&clip_id)?;
        let source_track_id = clip.track_id.clone().ok_or_else(|| {
            CoreError::MutationConflict {
                target: clip_id.clone(),
                reason: "clip is not placed on a track".into(),
            }
        })?;
        let source_track = db.get_track(&source_track_id)?;
        let target_track = db.get_track(&target_track_id)?;
        if source_track.track_type != target_track.track_type {
            return Err(CoreError::MutationConflict {
                target: target_track_id.clone(),
                reason: format!(
                    "cannot move a {} clip onto a {} track",
                    source_track.track_type.as_str(),
                    target_track.track_type.as_str()
                ),
            });
        }

        let seq = db.get_sequence(&target_track.sequence_id)?;
        let seq_rate = seq.rate();
        let new_start = match cmd.parameters.get("new_start_frame") {
            Some(value) => {
                crate::core::time::hydrate(value, seq_rate)?
                    .rescale_floor(seq_rate)
                    .frames
            }
            None => clip.timeline_start_frame,
        };
        if new_start < 0 {
            return Err(CoreError::validation(
                &cmd.command_type,
                "move target must not be negative",
            ));
        }

        let exclude = if target_track_id == source_track_id {
            Some(clip.id.as_str())
        } else {
            None
        };
        let existing = db.clips_on_track(&target_track_id)?;
        let mut mutations = plan_occlusion(
            &existing,
            seq_rate,
            RationalTime::from_frames(new_start, seq_rate),
            RationalTime::from_frames(clip.duration_frames, seq_rate),
            exclude,
        );
        mutations.push(Mutation::Update {
            clip_id: clip.id.clone(),
            timeline_start_frame: new_start,
            duration_frames: clip.duration_frames,
            source_in_frame: clip.source_in_frame,
            source_out_frame: clip.source_out_frame,
            track_id: Some(target_track_id),
        });

        let mutations = run_plan(db, cmd, mutations)?;
        db.touch_sequence(&seq.id)?;
        EventPayloads::timeline(&seq.id, &mutations)
    }

    fn undo(&self, db: &Database, cmd: &Command) -> CoreResult<()> {
        undo_plan(db, cmd)
    }

    fn redo(&self, db: &Database, cmd: &Command) -> CoreResult<()> {
        redo_plan(db, cmd)
    }
}
