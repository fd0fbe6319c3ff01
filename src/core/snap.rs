//! Snap Engine
//!
//! Magnetic snap candidates from visible clip edges and the playhead,
//! picked within a pixel tolerance through a caller-supplied
//! time-to-pixel mapping. Dragged edges and excluded clips are skipped.

use crate::core::store::ClipRow;
use crate::core::time::RationalTime;
use crate::core::ClipId;

/// Default magnetic tolerance in pixels.
pub const DEFAULT_SNAP_TOLERANCE_PX: f64 = 12.0;

/// What a candidate snaps to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SnapKind {
    ClipStart,
    ClipEnd,
    Playhead,
}

/// One magnetic point on the timeline.
#[derive(Clone, Debug)]
pub struct SnapCandidate {
    pub time: RationalTime,
    pub kind: SnapKind,
    pub clip_id: Option<ClipId>,
}

/// Edges excluded from snapping because they are being dragged.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EdgeSelector {
    Start,
    End,
    Both,
}

/// Query inputs for candidate collection.
#[derive(Default)]
pub struct SnapQuery<'a> {
    pub excluded_clips: &'a [ClipId],
    pub excluded_edges: &'a [(ClipId, EdgeSelector)],
}

impl SnapQuery<'_> {
    fn skips_edge(&self, clip_id: &str, edge: EdgeSelector) -> bool {
        if self.excluded_clips.iter().any(|id| id == clip_id) {
            return true;
        }
        self.excluded_edges.iter().any(|(id, selector)| {
            id == clip_id && (*selector == EdgeSelector::Both || *selector == edge)
        })
    }
}

/// Collects snap candidates from the visible clips and the playhead.
/// All candidates carry rational time at the sequence rate.
pub fn snap_candidates(
    clips: &[ClipRow],
    playhead: RationalTime,
    query: &SnapQuery<'_>,
) -> Vec<SnapCandidate> {
    let rate = playhead.rate;
    let mut candidates = Vec::new();

    for clip in clips {
        if !query.skips_edge(&clip.id, EdgeSelector::Start) {
            candidates.push(SnapCandidate {
                time: RationalTime::from_frames(clip.timeline_start_frame, rate),
                kind: SnapKind::ClipStart,
                clip_id: Some(clip.id.clone()),
            });
        }
        if !query.skips_edge(&clip.id, EdgeSelector::End) {
            candidates.push(SnapCandidate {
                time: RationalTime::from_frames(clip.end_frame(), rate),
                kind: SnapKind::ClipEnd,
                clip_id: Some(clip.id.clone()),
            });
        }
    }

    candidates.push(SnapCandidate {
        time: playhead,
        kind: SnapKind::Playhead,
        clip_id: None,
    });

    candidates
}

/// The closest candidate within `tolerance_px` of `target`, measured
/// through the caller's time-to-pixel mapping. Ties resolve to the
/// earliest candidate in collection order.
pub fn closest_snap(
    candidates: &[SnapCandidate],
    target: RationalTime,
    tolerance_px: f64,
    frame_to_px: impl Fn(i64) -> f64,
) -> Option<SnapCandidate> {
    let target_px = frame_to_px(target.frames);
    let mut best: Option<(f64, &SnapCandidate)> = None;

    for candidate in candidates {
        let distance = (frame_to_px(candidate.time.frames) - target_px).abs();
        if distance > tolerance_px {
            continue;
        }
        match &best {
            Some((best_distance, _)) if *best_distance <= distance => {}
            _ => best = Some((distance, candidate)),
        }
    }

    best.map(|(_, candidate)| candidate.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::ClipKind;
    use crate::core::time::FrameRate;

    fn clip(id: &str, start: i64, duration: i64) -> ClipRow {
        ClipRow {
            id: id.into(),
            project_id: "p".into(),
            track_id: Some("t".into()),
            clip_kind: ClipKind::Timeline,
            name: id.into(),
            media_id: None,
            master_clip_id: None,
            owner_sequence_id: Some("s".into()),
            source_sequence_id: None,
            timeline_start_frame: start,
            duration_frames: duration,
            source_in_frame: 0,
            source_out_frame: duration,
            fps_num: 30,
            fps_den: 1,
            enabled: true,
            offline: false,
            created_at: String::new(),
            modified_at: String::new(),
        }
    }

    const RATE: FrameRate = FrameRate::FPS_30;

    fn rt(frames: i64) -> RationalTime {
        RationalTime::from_frames(frames, RATE)
    }

    /// Two pixels per frame.
    fn px(frames: i64) -> f64 {
        frames as f64 * 2.0
    }

    #[test]
    fn test_candidates_cover_edges_and_playhead() {
        let clips = vec![clip("a", 0, 100), clip("b", 150, 50)];
        let candidates = snap_candidates(&clips, rt(75), &SnapQuery::default());
        // Two edges per clip plus the playhead.
        assert_eq!(candidates.len(), 5);
        assert!(candidates
            .iter()
            .any(|c| c.kind == SnapKind::Playhead && c.time.frames == 75));
        assert!(candidates
            .iter()
            .any(|c| c.kind == SnapKind::ClipEnd && c.time.frames == 200));
    }

    #[test]
    fn test_closest_within_tolerance() {
        let clips = vec![clip("a", 0, 100)];
        let candidates = snap_candidates(&clips, rt(500), &SnapQuery::default());

        // 4 frames away is 8 px, inside the 12 px default.
        let hit = closest_snap(&candidates, rt(104), DEFAULT_SNAP_TOLERANCE_PX, px).unwrap();
        assert_eq!(hit.kind, SnapKind::ClipEnd);
        assert_eq!(hit.time.frames, 100);

        // 7 frames away is 14 px, outside tolerance.
        assert!(closest_snap(&candidates, rt(107), DEFAULT_SNAP_TOLERANCE_PX, px).is_none());
    }

    #[test]
    fn test_excluded_clips_and_edges_are_skipped() {
        let clips = vec![clip("a", 0, 100), clip("b", 100, 50)];

        let excluded_clips = vec!["a".to_string()];
        let query = SnapQuery {
            excluded_clips: &excluded_clips,
            excluded_edges: &[],
        };
        let candidates = snap_candidates(&clips, rt(0), &query);
        assert!(candidates.iter().all(|c| c.clip_id.as_deref() != Some("a")));

        let excluded_edges = vec![("b".to_string(), EdgeSelector::Start)];
        let query = SnapQuery {
            excluded_clips: &[],
            excluded_edges: &excluded_edges,
        };
        let candidates = snap_candidates(&clips, rt(0), &query);
        assert!(!candidates
            .iter()
            .any(|c| c.clip_id.as_deref() == Some("b") && c.kind == SnapKind::ClipStart));
        assert!(candidates
            .iter()
            .any(|c| c.clip_id.as_deref() == Some("b") && c.kind == SnapKind::ClipEnd));
    }

    #[test]
    fn test_closest_prefers_nearest() {
        let clips = vec![clip("a", 0, 100), clip("b", 103, 50)];
        let candidates = snap_candidates(&clips, rt(1000), &SnapQuery::default());
        let hit = closest_snap(&candidates, rt(102), DEFAULT_SNAP_TOLERANCE_PX, px).unwrap();
        assert_eq!(hit.time.frames, 103);
        assert_eq!(hit.kind, SnapKind::ClipStart);
    }
}
