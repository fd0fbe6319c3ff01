//! Clip Mutator
//!
//! The single choke point for clip geometry changes. The planners here
//! are pure: they read clip rows and emit [`Mutation`] plans without
//! touching the store. The applier in [`apply`] performs the writes
//! inside the command transaction, which keeps planning testable and
//! lets duplicate-block feasibility run as a dry run.

mod plan;

pub mod apply;

pub use plan::Mutation;

use std::collections::BTreeMap;

use crate::core::store::{ClipRow, TrackRow};
use crate::core::time::{FrameRate, RationalTime};
use crate::core::{new_entity_id, now_rfc3339, ClipId, CoreError, CoreResult, TrackId};

/// Converts a frame count on the sequence axis into a clip's media rate.
fn to_media_frames(frames: i64, seq_rate: FrameRate, media_rate: FrameRate) -> i64 {
    RationalTime::from_frames(frames, seq_rate)
        .rescale_floor(media_rate)
        .frames
}

fn updated_geometry(
    clip: &ClipRow,
    timeline_start_frame: i64,
    duration_frames: i64,
    source_in_frame: i64,
    source_out_frame: i64,
) -> Mutation {
    Mutation::Update {
        clip_id: clip.id.clone(),
        timeline_start_frame,
        duration_frames,
        source_in_frame,
        source_out_frame,
        track_id: None,
    }
}

fn cloned_clip(original: &ClipRow, start: i64, duration: i64, source_in: i64, source_out: i64) -> ClipRow {
    let now = now_rfc3339();
    ClipRow {
        id: new_entity_id(),
        timeline_start_frame: start,
        duration_frames: duration,
        source_in_frame: source_in,
        source_out_frame: source_out,
        created_at: now.clone(),
        modified_at: now,
        ..original.clone()
    }
}

// =============================================================================
// Occlusion
// =============================================================================

/// Plans how a new footprint `[start, start + duration)` trims, splits,
/// or deletes the existing clips on a track.
///
/// `clips` must be the track's clips ordered by timeline start;
/// `exclude` skips the clip currently being updated. Trimmed results
/// shorter than one frame are deleted. Source ranges stay in each clip's
/// own media rate across rescales.
pub fn plan_occlusion(
    clips: &[ClipRow],
    seq_rate: FrameRate,
    start: RationalTime,
    duration: RationalTime,
    exclude: Option<&str>,
) -> Vec<Mutation> {
    let new_start = start.frames;
    let new_end = new_start + duration.frames;
    let mut mutations = Vec::new();

    for clip in clips {
        if exclude.is_some_and(|id| id == clip.id) {
            continue;
        }
        let clip_start = clip.timeline_start_frame;
        let clip_end = clip.end_frame();
        if !clip.overlaps(new_start, new_end) {
            continue;
        }
        let media_rate = clip.rate();

        if new_start <= clip_start && new_end >= clip_end {
            // Fully covered.
            mutations.push(Mutation::Delete {
                clip_id: clip.id.clone(),
            });
        } else if clip_start < new_start && clip_end <= new_end {
            // Overlap on tail: keep the head.
            let kept = new_start - clip_start;
            if kept < 1 {
                mutations.push(Mutation::Delete {
                    clip_id: clip.id.clone(),
                });
            } else {
                let source_out =
                    clip.source_in_frame + to_media_frames(kept, seq_rate, media_rate);
                mutations.push(updated_geometry(
                    clip,
                    clip_start,
                    kept,
                    clip.source_in_frame,
                    source_out,
                ));
            }
        } else if clip_start >= new_start && clip_end > new_end {
            // Overlap on head: keep the tail.
            let kept = clip_end - new_end;
            if kept < 1 {
                mutations.push(Mutation::Delete {
                    clip_id: clip.id.clone(),
                });
            } else {
                let consumed = new_end - clip_start;
                let source_in =
                    clip.source_in_frame + to_media_frames(consumed, seq_rate, media_rate);
                mutations.push(updated_geometry(
                    clip,
                    new_end,
                    kept,
                    source_in,
                    clip.source_out_frame,
                ));
            }
        } else {
            // Straddles the footprint: split. The left half keeps the id.
            let left_duration = new_start - clip_start;
            let right_duration = clip_end - new_end;

            if left_duration < 1 {
                mutations.push(Mutation::Delete {
                    clip_id: clip.id.clone(),
                });
            } else {
                let left_source_out =
                    clip.source_in_frame + to_media_frames(left_duration, seq_rate, media_rate);
                mutations.push(updated_geometry(
                    clip,
                    clip_start,
                    left_duration,
                    clip.source_in_frame,
                    left_source_out,
                ));
            }

            if right_duration >= 1 {
                let right_source_in = clip.source_in_frame
                    + to_media_frames(new_end - clip_start, seq_rate, media_rate);
                mutations.push(Mutation::Insert {
                    clip: cloned_clip(
                        clip,
                        new_end,
                        right_duration,
                        right_source_in,
                        clip.source_out_frame,
                    ),
                });
            }
        }
    }

    mutations
}

// =============================================================================
// Ripple
// =============================================================================

/// Plans a cascade shift of `shift` frames for every clip at or after
/// `insert_time`; a clip straddling the insert point splits there.
///
/// With a positive shift the updates are emitted rightmost-first so that
/// no intermediate state overlaps.
pub fn plan_ripple(
    clips: &[ClipRow],
    seq_rate: FrameRate,
    insert_time: RationalTime,
    shift: RationalTime,
) -> Vec<Mutation> {
    let at = insert_time.frames;
    let shift = shift.frames;
    let mut mutations = Vec::new();

    let emit = |clip: &ClipRow, mutations: &mut Vec<Mutation>| {
        let clip_start = clip.timeline_start_frame;
        let clip_end = clip.end_frame();

        if clip_start >= at {
            mutations.push(updated_geometry(
                clip,
                clip_start + shift,
                clip.duration_frames,
                clip.source_in_frame,
                clip.source_out_frame,
            ));
        } else if clip_end > at {
            // Straddles the insert point: split, right half lands shifted.
            let media_rate = clip.rate();
            let left_duration = at - clip_start;
            let right_duration = clip_end - at;
            let split_offset = to_media_frames(left_duration, seq_rate, media_rate);

            let right = cloned_clip(
                clip,
                at + shift,
                right_duration,
                clip.source_in_frame + split_offset,
                clip.source_out_frame,
            );
            mutations.push(Mutation::Insert { clip: right });

            let left_source_out = clip.source_in_frame + split_offset;
            mutations.push(updated_geometry(
                clip,
                clip_start,
                left_duration,
                clip.source_in_frame,
                left_source_out,
            ));
        }
    };

    if shift > 0 {
        for clip in clips.iter().rev() {
            emit(clip, &mut mutations);
        }
    } else {
        for clip in clips {
            emit(clip, &mut mutations);
        }
    }

    mutations
}

// =============================================================================
// Duplicate Block
// =============================================================================

/// Inputs for [`plan_duplicate_block`]: the selected source clips, the
/// sequence's tracks, the existing clips per track, and the requested
/// placement delta.
pub struct DuplicateBlockRequest<'a> {
    pub sources: &'a [ClipRow],
    pub tracks: &'a [TrackRow],
    pub clips_by_track: &'a BTreeMap<TrackId, Vec<ClipRow>>,
    pub target_track_id: &'a str,
    pub anchor_clip_id: &'a str,
    /// Signed, sequence rate.
    pub delta: RationalTime,
}

/// Result of duplicate-block planning. An infeasible request yields an
/// empty plan rather than an error.
#[derive(Debug, Default)]
pub struct DuplicateBlockPlan {
    pub mutations: Vec<Mutation>,
    /// The delta actually applied after clamping and snapping.
    pub applied_delta: i64,
    /// Source-to-copy id pairs, in source order.
    pub copies: Vec<(ClipId, ClipId)>,
}

pub fn plan_duplicate_block(
    req: &DuplicateBlockRequest<'_>,
    seq_rate: FrameRate,
) -> CoreResult<DuplicateBlockPlan> {
    let anchor = req
        .sources
        .iter()
        .find(|c| c.id == req.anchor_clip_id)
        .ok_or_else(|| CoreError::MutationConflict {
            target: req.anchor_clip_id.to_string(),
            reason: "anchor clip is not part of the duplicated block".into(),
        })?;

    let anchor_track = track_of(req.tracks, anchor)?;
    let target_track = req
        .tracks
        .iter()
        .find(|t| t.id == req.target_track_id)
        .ok_or_else(|| CoreError::TrackNotFound(req.target_track_id.to_string()))?;

    if anchor_track.track_type != target_track.track_type {
        return Err(CoreError::MutationConflict {
            target: req.target_track_id.to_string(),
            reason: format!(
                "cannot duplicate {} clips onto a {} track",
                anchor_track.track_type.as_str(),
                target_track.track_type.as_str()
            ),
        });
    }

    let delta_track_index = target_track.track_index - anchor_track.track_index;

    // No copy may land before frame zero.
    let min_start = req
        .sources
        .iter()
        .map(|c| c.timeline_start_frame)
        .min()
        .unwrap_or(0);
    let mut delta = req.delta.frames.max(-min_start);

    // Map each source to its destination track; sources with no mapped
    // track drop out of the block.
    let mut mapped: Vec<(&ClipRow, &TrackRow)> = Vec::new();
    for source in req.sources {
        let source_track = track_of(req.tracks, source)?;
        let dest_index = source_track.track_index + delta_track_index;
        let dest = req.tracks.iter().find(|t| {
            t.sequence_id == source_track.sequence_id
                && t.track_type == source_track.track_type
                && t.track_index == dest_index
        });
        if let Some(dest) = dest {
            mapped.push((source, dest));
        }
    }
    if mapped.is_empty() {
        return Ok(DuplicateBlockPlan::default());
    }

    // Forbidden-delta clamp: every existing interval a copy would overlap
    // contributes a closed delta range; snap directionally around the
    // merged union.
    let mut forbidden: Vec<(i64, i64)> = Vec::new();
    for (source, dest) in &mapped {
        let s = source.timeline_start_frame;
        let e = source.end_frame();
        if let Some(existing) = req.clips_by_track.get(&dest.id) {
            for other in existing {
                let lo = other.timeline_start_frame - e + 1;
                let hi = other.end_frame() - s - 1;
                if lo <= hi {
                    forbidden.push((lo, hi));
                }
            }
        }
    }
    forbidden.sort_unstable();
    let merged = merge_ranges(&forbidden);

    let forward = req.delta.frames >= 0;
    if let Some(range) = merged.iter().find(|(lo, hi)| delta >= *lo && delta <= *hi) {
        delta = if forward { range.1 + 1 } else { range.0 - 1 };
        if delta < -min_start {
            return Ok(DuplicateBlockPlan::default());
        }
    }

    // Emit the copies, each followed by occlusion of whatever it still
    // overlaps on its destination track.
    let mut plan = DuplicateBlockPlan {
        applied_delta: delta,
        ..Default::default()
    };
    for (source, dest) in &mapped {
        let mut copy = cloned_clip(
            source,
            source.timeline_start_frame + delta,
            source.duration_frames,
            source.source_in_frame,
            source.source_out_frame,
        );
        copy.track_id = Some(dest.id.clone());
        plan.copies.push((source.id.clone(), copy.id.clone()));

        if let Some(existing) = req.clips_by_track.get(&dest.id) {
            let occlusion = plan_occlusion(
                existing,
                seq_rate,
                RationalTime::from_frames(copy.timeline_start_frame, seq_rate),
                RationalTime::from_frames(copy.duration_frames, seq_rate),
                None,
            );
            plan.mutations.push(Mutation::Insert { clip: copy });
            plan.mutations.extend(occlusion);
        } else {
            plan.mutations.push(Mutation::Insert { clip: copy });
        }
    }

    // No two planned copies may overlap on the same track.
    for (i, (src_a, dest_a)) in mapped.iter().enumerate() {
        for (src_b, dest_b) in mapped.iter().skip(i + 1) {
            if dest_a.id != dest_b.id {
                continue;
            }
            let a = (src_a.timeline_start_frame + delta, src_a.end_frame() + delta);
            let b = (src_b.timeline_start_frame + delta, src_b.end_frame() + delta);
            if a.0 < b.1 && b.0 < a.1 {
                return Err(CoreError::MutationConflict {
                    target: dest_a.id.clone(),
                    reason: format!(
                        "duplicated copies of {} and {} would overlap",
                        src_a.id, src_b.id
                    ),
                });
            }
        }
    }

    Ok(plan)
}

fn track_of<'t>(tracks: &'t [TrackRow], clip: &ClipRow) -> CoreResult<&'t TrackRow> {
    let track_id = clip.track_id.as_deref().ok_or_else(|| {
        CoreError::MutationConflict {
            target: clip.id.clone(),
            reason: "master clips cannot be block-duplicated".into(),
        }
    })?;
    tracks
        .iter()
        .find(|t| t.id == track_id)
        .ok_or_else(|| CoreError::TrackNotFound(track_id.to_string()))
}

fn merge_ranges(sorted: &[(i64, i64)]) -> Vec<(i64, i64)> {
    let mut merged: Vec<(i64, i64)> = Vec::with_capacity(sorted.len());
    for &(lo, hi) in sorted {
        match merged.last_mut() {
            // Adjacent ranges merge too: a delta between them is still
            // feasible only if it clears both.
            Some(last) if lo <= last.1 + 1 => last.1 = last.1.max(hi),
            _ => merged.push((lo, hi)),
        }
    }
    merged
}
