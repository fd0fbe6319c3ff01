//! Timeline Constraints
//!
//! Collision and range computation for trims and moves: minimum 1-frame
//! duration, source bounds, adjacent clips, and frame zero. Deltas are
//! frames on the sequence axis.

use crate::core::store::ClipRow;
use crate::core::time::{rescale_frames, FrameRate};
use crate::core::ClipId;

/// Far bound used when no neighbour limits an edge. Kept well under
/// `i64::MAX` so downstream arithmetic cannot overflow.
const UNBOUNDED: i64 = i64::MAX / 4;

/// Which clip edge a trim applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClipEdge {
    In,
    Out,
}

/// Allowed delta interval for a trim, with the clips that bound it.
#[derive(Clone, Debug)]
pub struct TrimRange {
    pub min_delta: i64,
    pub max_delta: i64,
    pub limit_left: Option<ClipId>,
    pub limit_right: Option<ClipId>,
}

/// Allowed start positions for a move, with the clips that bound them.
#[derive(Clone, Debug)]
pub struct MoveRange {
    pub min_time: i64,
    pub max_time: i64,
    pub blocking_left: Option<ClipId>,
    pub blocking_right: Option<ClipId>,
}

/// A detected collision.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Collision {
    pub clip_id: ClipId,
    pub kind: CollisionKind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CollisionKind {
    Overlap,
}

fn relevant<'a>(
    clip: &ClipRow,
    all_clips: &'a [ClipRow],
    check_all_tracks: bool,
) -> impl Iterator<Item = &'a ClipRow> + 'a {
    let track_id = clip.track_id.clone();
    let clip_id = clip.id.clone();
    all_clips.iter().filter(move |c| {
        c.id != clip_id && (check_all_tracks || c.track_id == track_id)
    })
}

fn left_neighbour<'a>(
    clip: &ClipRow,
    all_clips: &'a [ClipRow],
    check_all_tracks: bool,
) -> Option<&'a ClipRow> {
    relevant(clip, all_clips, check_all_tracks)
        .filter(|c| c.end_frame() <= clip.timeline_start_frame)
        .max_by_key(|c| c.end_frame())
}

fn right_neighbour<'a>(
    clip: &ClipRow,
    all_clips: &'a [ClipRow],
    check_all_tracks: bool,
) -> Option<&'a ClipRow> {
    relevant(clip, all_clips, check_all_tracks)
        .filter(|c| c.timeline_start_frame >= clip.end_frame())
        .min_by_key(|c| c.timeline_start_frame)
}

/// Computes the allowed trim delta range for one edge of a clip.
///
/// With `check_all_tracks` set the adjacency constraints consider every
/// supplied clip (the ripple case); otherwise only the clip's own track.
pub fn calculate_trim_range(
    clip: &ClipRow,
    edge: ClipEdge,
    all_clips: &[ClipRow],
    check_all_tracks: bool,
    seq_rate: FrameRate,
) -> TrimRange {
    let media_rate = clip.rate();
    match edge {
        ClipEdge::In => {
            // The in edge can move right until one frame remains, and
            // left until the source head, frame zero, or the previous
            // clip stops it.
            let max_delta = clip.duration_frames - 1;

            let source_headroom = rescale_frames(clip.source_in_frame, media_rate, seq_rate);
            let left = left_neighbour(clip, all_clips, check_all_tracks);
            let neighbour_bound = left
                .map(|c| c.end_frame() - clip.timeline_start_frame)
                .unwrap_or(-UNBOUNDED);
            let min_delta = neighbour_bound
                .max(-source_headroom)
                .max(-clip.timeline_start_frame);

            TrimRange {
                min_delta,
                max_delta,
                limit_left: left.map(|c| c.id.clone()),
                limit_right: None,
            }
        }
        ClipEdge::Out => {
            let min_delta = -(clip.duration_frames - 1);
            let right = right_neighbour(clip, all_clips, check_all_tracks);
            let max_delta = right
                .map(|c| c.timeline_start_frame - clip.end_frame())
                .unwrap_or(UNBOUNDED);

            TrimRange {
                min_delta,
                max_delta,
                limit_left: None,
                limit_right: right.map(|c| c.id.clone()),
            }
        }
    }
}

/// Computes the allowed start positions when sliding a clip along its
/// track without colliding. `all_clips` should already exclude clips
/// moving together with this one.
pub fn calculate_move_range(clip: &ClipRow, all_clips: &[ClipRow]) -> MoveRange {
    let left = left_neighbour(clip, all_clips, false);
    let right = right_neighbour(clip, all_clips, false);

    let min_time = left.map(|c| c.end_frame()).unwrap_or(0).max(0);
    let max_time = right
        .map(|c| c.timeline_start_frame - clip.duration_frames)
        .unwrap_or(UNBOUNDED);

    MoveRange {
        min_time,
        max_time,
        blocking_left: left.map(|c| c.id.clone()),
        blocking_right: right.map(|c| c.id.clone()),
    }
}

/// First clip colliding with the moved interval, if any.
pub fn check_move_collision(
    clip: &ClipRow,
    new_start: i64,
    all_clips: &[ClipRow],
) -> Option<Collision> {
    let new_end = new_start + clip.duration_frames;
    relevant(clip, all_clips, false)
        .find(|c| c.overlaps(new_start, new_end))
        .map(|c| Collision {
            clip_id: c.id.clone(),
            kind: CollisionKind::Overlap,
        })
}

/// First clip colliding with the trimmed edge, if any.
pub fn check_trim_collision(
    clip: &ClipRow,
    edge: ClipEdge,
    delta: i64,
    all_clips: &[ClipRow],
) -> Option<Collision> {
    let (new_start, new_end) = match edge {
        ClipEdge::In => (clip.timeline_start_frame + delta, clip.end_frame()),
        ClipEdge::Out => (clip.timeline_start_frame, clip.end_frame() + delta),
    };
    if new_end <= new_start {
        return None;
    }
    relevant(clip, all_clips, false)
        .find(|c| c.overlaps(new_start, new_end))
        .map(|c| Collision {
            clip_id: c.id.clone(),
            kind: CollisionKind::Overlap,
        })
}

/// Clamps a requested trim delta to the nearest feasible frame within
/// the constraint range.
pub fn clamp_trim_delta(
    clip: &ClipRow,
    edge: ClipEdge,
    delta: i64,
    all_clips: &[ClipRow],
    check_all_tracks: bool,
    seq_rate: FrameRate,
) -> i64 {
    let range = calculate_trim_range(clip, edge, all_clips, check_all_tracks, seq_rate);
    delta.clamp(range.min_delta.min(0), range.max_delta.max(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::ClipKind;

    fn clip(id: &str, track: &str, start: i64, duration: i64, source_in: i64) -> ClipRow {
        ClipRow {
            id: id.into(),
            project_id: "p".into(),
            track_id: Some(track.into()),
            clip_kind: ClipKind::Timeline,
            name: id.into(),
            media_id: Some("m".into()),
            master_clip_id: None,
            owner_sequence_id: Some("s".into()),
            source_sequence_id: None,
            timeline_start_frame: start,
            duration_frames: duration,
            source_in_frame: source_in,
            source_out_frame: source_in + duration,
            fps_num: 30,
            fps_den: 1,
            enabled: true,
            offline: false,
            created_at: String::new(),
            modified_at: String::new(),
        }
    }

    const RATE: FrameRate = FrameRate::FPS_30;

    #[test]
    fn test_trim_in_bounded_by_neighbour_and_source() {
        let a = clip("a", "t", 0, 50, 0);
        let b = clip("b", "t", 100, 50, 20);
        let all = vec![a.clone(), b.clone()];

        let range = calculate_trim_range(&b, ClipEdge::In, &all, false, RATE);
        // Left neighbour ends at 50; source headroom is 20 frames.
        // The tighter bound wins.
        assert_eq!(range.min_delta, -20);
        assert_eq!(range.max_delta, 49);
        assert_eq!(range.limit_left.as_deref(), Some("a"));
    }

    #[test]
    fn test_trim_in_bounded_by_frame_zero() {
        let a = clip("a", "t", 10, 50, 500);
        let range = calculate_trim_range(&a, ClipEdge::In, &[a.clone()], false, RATE);
        assert_eq!(range.min_delta, -10);
    }

    #[test]
    fn test_trim_out_bounded_by_next_clip() {
        let a = clip("a", "t", 0, 50, 0);
        let b = clip("b", "t", 80, 50, 0);
        let all = vec![a.clone(), b.clone()];

        let range = calculate_trim_range(&a, ClipEdge::Out, &all, false, RATE);
        assert_eq!(range.min_delta, -49);
        assert_eq!(range.max_delta, 30);
        assert_eq!(range.limit_right.as_deref(), Some("b"));
    }

    #[test]
    fn test_trim_ignores_other_tracks_unless_asked() {
        let a = clip("a", "t1", 0, 50, 0);
        let other = clip("x", "t2", 60, 50, 0);
        let all = vec![a.clone(), other.clone()];

        let own_track = calculate_trim_range(&a, ClipEdge::Out, &all, false, RATE);
        assert_eq!(own_track.max_delta, UNBOUNDED);

        let across = calculate_trim_range(&a, ClipEdge::Out, &all, true, RATE);
        assert_eq!(across.max_delta, 10);
        assert_eq!(across.limit_right.as_deref(), Some("x"));
    }

    #[test]
    fn test_move_range_between_neighbours() {
        let a = clip("a", "t", 0, 50, 0);
        let b = clip("b", "t", 100, 20, 0);
        let c = clip("c", "t", 200, 50, 0);
        let all = vec![a.clone(), c.clone()];

        let range = calculate_move_range(&b, &all);
        assert_eq!(range.min_time, 50);
        assert_eq!(range.max_time, 180);
        assert_eq!(range.blocking_left.as_deref(), Some("a"));
        assert_eq!(range.blocking_right.as_deref(), Some("c"));
    }

    #[test]
    fn test_move_range_open_ended() {
        let b = clip("b", "t", 100, 20, 0);
        let range = calculate_move_range(&b, &[]);
        assert_eq!(range.min_time, 0);
        assert_eq!(range.max_time, UNBOUNDED);
        assert!(range.blocking_left.is_none());
    }

    #[test]
    fn test_check_move_collision() {
        let a = clip("a", "t", 0, 50, 0);
        let b = clip("b", "t", 100, 20, 0);
        let all = vec![a.clone(), b.clone()];

        let hit = check_move_collision(&b, 30, &all).unwrap();
        assert_eq!(hit.clip_id, "a");
        assert_eq!(hit.kind, CollisionKind::Overlap);
        assert!(check_move_collision(&b, 50, &all).is_none());
    }

    #[test]
    fn test_check_trim_collision() {
        let a = clip("a", "t", 0, 50, 0);
        let b = clip("b", "t", 60, 20, 0);
        let all = vec![a.clone(), b.clone()];

        assert!(check_trim_collision(&a, ClipEdge::Out, 20, &all).is_some());
        assert!(check_trim_collision(&a, ClipEdge::Out, 10, &all).is_none());
    }

    #[test]
    fn test_clamp_trim_delta() {
        let a = clip("a", "t", 0, 50, 0);
        let b = clip("b", "t", 80, 50, 0);
        let all = vec![a.clone(), b.clone()];

        assert_eq!(clamp_trim_delta(&a, ClipEdge::Out, 100, &all, false, RATE), 30);
        assert_eq!(clamp_trim_delta(&a, ClipEdge::Out, -100, &all, false, RATE), -49);
        assert_eq!(clamp_trim_delta(&a, ClipEdge::Out, 10, &all, false, RATE), 10);
    }
}
