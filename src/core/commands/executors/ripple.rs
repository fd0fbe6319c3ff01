//! Ripple Executors
//!
//! Deletions that close the gap they leave, and edge trims that cascade
//! into downstream clips.

use serde_json::Value;

use crate::core::commands::Command;
use crate::core::mutator::apply::{apply_mutations, capture_originals, OriginalStates};
use crate::core::mutator::{plan_ripple, Mutation};
use crate::core::store::{ClipRow, Database};
use crate::core::time::{rescale_frames, FrameRate, RationalTime};
use crate::core::{CoreError, CoreResult};

use super::{
    redo_plan, sequence_for_clip, undo_plan, EventPayloads, ExecContext, Executor,
};

fn rt(frames: i64, rate: FrameRate) -> RationalTime {
    RationalTime::from_frames(frames, rate)
}

/// Applies a plan while folding its pre-state into an accumulated
/// capture, for executors that apply several plans in one command.
fn apply_step(
    db: &Database,
    plan: Vec<Mutation>,
    all_mutations: &mut Vec<Mutation>,
    originals: &mut OriginalStates,
) -> CoreResult<()> {
    let step = capture_originals(db, &plan)?;
    for clip in step.clips {
        if !originals.clips.iter().any(|c| c.id == clip.id) {
            originals.clips.push(clip);
        }
    }
    for prop in step.properties {
        if !originals
            .properties
            .iter()
            .any(|p| p.clip_id == prop.clip_id && p.key == prop.key)
        {
            originals.properties.push(prop);
        }
    }
    apply_mutations(db, &plan)?;
    all_mutations.extend(plan);
    Ok(())
}

fn persist_steps(
    cmd: &mut Command,
    mutations: Vec<Mutation>,
    originals: OriginalStates,
) -> CoreResult<Vec<Mutation>> {
    cmd.persist_serialized("executed_mutations", &mutations)?;
    cmd.persist_serialized("original_states", &originals)?;
    Ok(mutations)
}

// =============================================================================
// RippleDelete
// =============================================================================

/// Deletes a clip and shifts every later clip on the track left by the
/// deleted duration.
pub struct RippleDeleteExecutor;

fn plan_ripple_delete(
    db: &Database,
    clip_id: &str,
    seq_rate: FrameRate,
) -> CoreResult<Vec<Mutation>> {
    let clip = db.get_clip(clip_id)?;
    let track_id = clip.track_id.clone().ok_or_else(|| {
        CoreError::MutationConflict {
            target: clip_id.to_string(),
            reason: "clip is not placed on a track".into(),
        }
    })?;

    let followers: Vec<ClipRow> = db
        .clips_on_track(&track_id)?
        .into_iter()
        .filter(|c| c.id != clip.id)
        .collect();

    let mut mutations = vec![Mutation::Delete {
        clip_id: clip.id.clone(),
    }];
    mutations.extend(plan_ripple(
        &followers,
        seq_rate,
        rt(clip.timeline_start_frame, seq_rate),
        rt(-clip.duration_frames, seq_rate),
    ));
    Ok(mutations)
}

impl Executor for RippleDeleteExecutor {
    fn execute(
        &self,
        db: &Database,
        cmd: &mut Command,
        _ctx: &ExecContext,
    ) -> CoreResult<EventPayloads> {
        let clip_id = cmd.str_param("clip_id")?.to_string();
        let seq = sequence_for_clip(db, &clip_id)?;

        let mut mutations = Vec::new();
        let mut originals = OriginalStates::default();
        let plan = plan_ripple_delete(db, &clip_id, seq.rate())?;
        apply_step(db, plan, &mut mutations, &mut originals)?;

        let mutations = persist_steps(cmd, mutations, originals)?;
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
// RippleDeleteSelection
// =============================================================================

/// Ripple-deletes a whole selection, one clip at a time from the
/// rightmost end so earlier shifts never disturb later targets.
pub struct RippleDeleteSelectionExecutor;

impl Executor for RippleDeleteSelectionExecutor {
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

        let seq = sequence_for_clip(db, &clip_ids[0])?;
        let seq_rate = seq.rate();

        // Rightmost first: each deletion's leftward ripple only touches
        // clips after it, which no remaining target occupies.
        let mut ordered = Vec::new();
        for clip_id in &clip_ids {
            ordered.push(db.get_clip(clip_id)?);
        }
        ordered.sort_by_key(|c| std::cmp::Reverse(c.timeline_start_frame));

        let mut mutations = Vec::new();
        let mut originals = OriginalStates::default();
        for clip in &ordered {
            let plan = plan_ripple_delete(db, &clip.id, seq_rate)?;
            apply_step(db, plan, &mut mutations, &mut originals)?;
        }

        let mutations = persist_steps(cmd, mutations, originals)?;
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
// RippleEdit / BatchRippleEdit
// =============================================================================

/// One trim edge of a ripple or roll edit.
#[derive(Clone, Debug)]
struct EdgeSpec {
    clip_id: String,
    edge_type: String,
    trim_type: String,
    delta_frames: i64,
}

impl EdgeSpec {
    fn from_value(command: &str, value: &Value) -> CoreResult<Self> {
        let get_str = |key: &str| -> CoreResult<String> {
            value
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| CoreError::validation(command, format!("edge missing {key}")))
        };
        Ok(Self {
            clip_id: get_str("clip_id")?,
            edge_type: get_str("edge_type")?,
            trim_type: value
                .get("trim_type")
                .and_then(Value::as_str)
                .unwrap_or("ripple")
                .to_string(),
            delta_frames: value
                .get("delta_frames")
                .and_then(Value::as_i64)
                .ok_or_else(|| {
                    CoreError::validation(command, "edge missing delta_frames")
                })?,
        })
    }
}

/// Remaining source material past a clip's out point, on the sequence
/// axis. Unbounded when the clip has no backing media row.
fn tail_headroom(db: &Database, clip: &ClipRow, seq_rate: FrameRate) -> CoreResult<i64> {
    let Some(media_id) = &clip.media_id else {
        return Ok(i64::MAX / 4);
    };
    let media = db.get_media(media_id)?;
    let remaining = (media.duration_frames - clip.source_out_frame).max(0);
    Ok(rescale_frames(remaining, media.rate(), seq_rate))
}

fn head_headroom(clip: &ClipRow, seq_rate: FrameRate) -> i64 {
    rescale_frames(clip.source_in_frame, clip.rate(), seq_rate)
}

fn shifted(clip: &ClipRow, start: i64) -> Mutation {
    Mutation::Update {
        clip_id: clip.id.clone(),
        timeline_start_frame: start,
        duration_frames: clip.duration_frames,
        source_in_frame: clip.source_in_frame,
        source_out_frame: clip.source_out_frame,
        track_id: None,
    }
}

/// Plans one edge edit against the store's current state.
fn plan_edge(db: &Database, edge: &EdgeSpec, seq_rate: FrameRate) -> CoreResult<Vec<Mutation>> {
    let clip = db.get_clip(&edge.clip_id)?;
    let track_id = clip.track_id.clone().ok_or_else(|| {
        CoreError::MutationConflict {
            target: edge.clip_id.clone(),
            reason: "clip is not placed on a track".into(),
        }
    })?;
    let track_clips = db.clips_on_track(&track_id)?;
    let media_rate = clip.rate();

    let right_adjacent = || {
        track_clips
            .iter()
            .find(|c| c.timeline_start_frame == clip.end_frame())
    };
    let left_adjacent = || {
        track_clips
            .iter()
            .find(|c| c.end_frame() == clip.timeline_start_frame)
    };

    match (edge.edge_type.as_str(), edge.trim_type.as_str()) {
        ("out", "ripple") => {
            // The out edge moves by delta and everything after follows.
            let delta = edge
                .delta_frames
                .clamp(-(clip.duration_frames - 1), tail_headroom(db, &clip, seq_rate)?);
            if delta == 0 {
                return Ok(vec![]);
            }
            let followers: Vec<ClipRow> = track_clips
                .iter()
                .filter(|c| c.timeline_start_frame >= clip.end_frame())
                .cloned()
                .collect();
            let trim = Mutation::Update {
                clip_id: clip.id.clone(),
                timeline_start_frame: clip.timeline_start_frame,
                duration_frames: clip.duration_frames + delta,
                source_in_frame: clip.source_in_frame,
                source_out_frame: clip.source_out_frame
                    + rescale_frames(delta, seq_rate, media_rate),
                track_id: None,
            };
            let shifts = plan_ripple(
                &followers,
                seq_rate,
                rt(clip.end_frame(), seq_rate),
                rt(delta, seq_rate),
            );
            let mut mutations = Vec::new();
            if delta > 0 {
                mutations.extend(shifts);
                mutations.push(trim);
            } else {
                mutations.push(trim);
                mutations.extend(shifts);
            }
            Ok(mutations)
        }
        ("in", "ripple") => {
            // The in point slides in source; the clip stays anchored and
            // everything after moves by the opposite amount.
            let delta = edge
                .delta_frames
                .clamp(-head_headroom(&clip, seq_rate), clip.duration_frames - 1);
            if delta == 0 {
                return Ok(vec![]);
            }
            let followers: Vec<ClipRow> = track_clips
                .iter()
                .filter(|c| c.timeline_start_frame >= clip.end_frame())
                .cloned()
                .collect();
            let trim = Mutation::Update {
                clip_id: clip.id.clone(),
                timeline_start_frame: clip.timeline_start_frame,
                duration_frames: clip.duration_frames - delta,
                source_in_frame: clip.source_in_frame
                    + rescale_frames(delta, seq_rate, media_rate),
                source_out_frame: clip.source_out_frame,
                track_id: None,
            };
            let shifts = plan_ripple(
                &followers,
                seq_rate,
                rt(clip.end_frame(), seq_rate),
                rt(-delta, seq_rate),
            );
            let mut mutations = Vec::new();
            if delta > 0 {
                mutations.push(trim);
                mutations.extend(shifts);
            } else {
                mutations.extend(shifts);
                mutations.push(trim);
            }
            Ok(mutations)
        }
        ("out", "roll") | ("in", "roll") => {
            // A roll moves the shared cut between two adjacent clips;
            // total length is preserved.
            let (left, right) = if edge.edge_type == "out" {
                let right = right_adjacent().ok_or_else(|| CoreError::MutationConflict {
                    target: edge.clip_id.clone(),
                    reason: "no adjacent clip to roll against".into(),
                })?;
                (clip.clone(), right.clone())
            } else {
                let left = left_adjacent().ok_or_else(|| CoreError::MutationConflict {
                    target: edge.clip_id.clone(),
                    reason: "no adjacent clip to roll against".into(),
                })?;
                (left.clone(), clip.clone())
            };

            let right_rate = right.rate();
            let left_rate = left.rate();
            let delta = edge
                .delta_frames
                .clamp(
                    (-(left.duration_frames - 1)).max(-head_headroom(&right, seq_rate)),
                    (right.duration_frames - 1).min(tail_headroom(db, &left, seq_rate)?),
                );
            if delta == 0 {
                return Ok(vec![]);
            }

            Ok(vec![
                Mutation::Update {
                    clip_id: left.id.clone(),
                    timeline_start_frame: left.timeline_start_frame,
                    duration_frames: left.duration_frames + delta,
                    source_in_frame: left.source_in_frame,
                    source_out_frame: left.source_out_frame
                        + rescale_frames(delta, seq_rate, left_rate),
                    track_id: None,
                },
                Mutation::Update {
                    clip_id: right.id.clone(),
                    timeline_start_frame: right.timeline_start_frame + delta,
                    duration_frames: right.duration_frames - delta,
                    source_in_frame: right.source_in_frame
                        + rescale_frames(delta, seq_rate, right_rate),
                    source_out_frame: right.source_out_frame,
                    track_id: None,
                },
            ])
        }
        ("gap_after", _) => {
            let next_start = track_clips
                .iter()
                .filter(|c| c.timeline_start_frame >= clip.end_frame())
                .map(|c| c.timeline_start_frame)
                .min()
                .ok_or_else(|| CoreError::MutationConflict {
                    target: edge.clip_id.clone(),
                    reason: "no clip after the gap".into(),
                })?;
            let gap = next_start - clip.end_frame();
            let delta = edge.delta_frames.max(-gap);
            if delta == 0 {
                return Ok(vec![]);
            }
            Ok(plan_ripple(
                &track_clips
                    .iter()
                    .filter(|c| c.timeline_start_frame >= next_start)
                    .cloned()
                    .collect::<Vec<_>>(),
                seq_rate,
                rt(next_start, seq_rate),
                rt(delta, seq_rate),
            ))
        }
        ("gap_before", _) => {
            let prev_end = track_clips
                .iter()
                .filter(|c| c.end_frame() <= clip.timeline_start_frame)
                .map(|c| c.end_frame())
                .max()
                .unwrap_or(0);
            let gap = clip.timeline_start_frame - prev_end;
            let delta = edge.delta_frames.max(-gap);
            if delta == 0 {
                return Ok(vec![]);
            }
            let movers: Vec<ClipRow> = track_clips
                .iter()
                .filter(|c| c.timeline_start_frame >= clip.timeline_start_frame)
                .cloned()
                .collect();
            let mut mutations = Vec::new();
            if delta > 0 {
                for c in movers.iter().rev() {
                    mutations.push(shifted(c, c.timeline_start_frame + delta));
                }
            } else {
                for c in &movers {
                    mutations.push(shifted(c, c.timeline_start_frame + delta));
                }
            }
            Ok(mutations)
        }
        (edge_type, trim_type) => Err(CoreError::validation(
            "RippleEdit",
            format!("unsupported edge {edge_type}/{trim_type}"),
        )),
    }
}

/// Executes one trim edge.
pub struct RippleEditExecutor;

impl Executor for RippleEditExecutor {
    fn execute(
        &self,
        db: &Database,
        cmd: &mut Command,
        _ctx: &ExecContext,
    ) -> CoreResult<EventPayloads> {
        let edge = EdgeSpec {
            clip_id: cmd.str_param("clip_id")?.to_string(),
            edge_type: cmd.str_param("edge_type")?.to_string(),
            trim_type: cmd
                .opt_str_param("trim_type")
                .unwrap_or("ripple")
                .to_string(),
            delta_frames: cmd.i64_param("delta_frames")?,
        };
        let seq = sequence_for_clip(db, &edge.clip_id)?;

        let mut mutations = Vec::new();
        let mut originals = OriginalStates::default();
        let plan = plan_edge(db, &edge, seq.rate())?;
        apply_step(db, plan, &mut mutations, &mut originals)?;

        let mutations = persist_steps(cmd, mutations, originals)?;
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

/// Executes a set of trim edges atomically, each planned against the
/// state the previous edge left behind.
pub struct BatchRippleEditExecutor;

impl Executor for BatchRippleEditExecutor {
    fn execute(
        &self,
        db: &Database,
        cmd: &mut Command,
        _ctx: &ExecContext,
    ) -> CoreResult<EventPayloads> {
        let edge_values = cmd.array_param("edges")?.clone();
        if edge_values.is_empty() {
            return Err(CoreError::validation(&cmd.command_type, "no edges given"));
        }
        let edges: Vec<EdgeSpec> = edge_values
            .iter()
            .map(|v| EdgeSpec::from_value(&cmd.command_type, v))
            .collect::<CoreResult<_>>()?;

        let seq = sequence_for_clip(db, &edges[0].clip_id)?;
        let seq_rate = seq.rate();

        let mut mutations = Vec::new();
        let mut originals = OriginalStates::default();
        for edge in &edges {
            let plan = plan_edge(db, edge, seq_rate)?;
            apply_step(db, plan, &mut mutations, &mut originals)?;
        }

        let mutations = persist_steps(cmd, mutations, originals)?;
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
