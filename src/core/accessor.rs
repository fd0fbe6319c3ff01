//! Sequence Accessor
//!
//! Resolves what is visible and audible at a playhead frame: the video
//! entries ordered by track priority (lowest index wins), all active
//! audio entries, and the next/previous clip boundaries used by
//! playback lookahead.

use crate::core::store::{ClipRow, Database, SequenceRow, TrackRow, TrackType};
use crate::core::time::{rescale_frames, FrameRate};
use crate::core::{ClipId, CoreResult};

/// One resolvable clip at a frame.
#[derive(Clone, Debug)]
pub struct ResolvedClip {
    pub clip: ClipRow,
    pub media_path: Option<String>,
    /// File-relative frame in the clip's own media rate.
    pub source_frame: i64,
    pub clip_start_frame: i64,
    pub clip_end_frame: i64,
    pub track_index: i64,
}

/// Read-side view over one sequence.
pub struct SequenceAccessor<'a> {
    db: &'a Database,
    sequence: SequenceRow,
    tracks: Vec<TrackRow>,
}

impl<'a> SequenceAccessor<'a> {
    pub fn new(db: &'a Database, sequence_id: &str) -> CoreResult<Self> {
        let sequence = db.get_sequence(sequence_id)?;
        let tracks = db.tracks_for_sequence(sequence_id)?;
        Ok(Self {
            db,
            sequence,
            tracks,
        })
    }

    pub fn sequence(&self) -> &SequenceRow {
        &self.sequence
    }

    pub fn rate(&self) -> FrameRate {
        self.sequence.rate()
    }

    /// Enabled clips of one track type, paired with their track index.
    fn placed_clips(&self, track_type: TrackType) -> CoreResult<Vec<(ClipRow, i64)>> {
        let mut out = Vec::new();
        for track in self
            .tracks
            .iter()
            .filter(|t| t.enabled && t.track_type == track_type)
        {
            for clip in self.db.clips_on_track(&track.id)? {
                if clip.enabled {
                    out.push((clip, track.track_index));
                }
            }
        }
        Ok(out)
    }

    fn resolve(&self, clip: ClipRow, track_index: i64, frame: i64) -> CoreResult<ResolvedClip> {
        let offset = frame - clip.timeline_start_frame;
        let source_frame =
            clip.source_in_frame + rescale_frames(offset, self.rate(), clip.rate());
        let media_path = match &clip.media_id {
            Some(media_id) => Some(self.db.get_media(media_id)?.file_path),
            None => None,
        };
        Ok(ResolvedClip {
            clip_start_frame: clip.timeline_start_frame,
            clip_end_frame: clip.end_frame(),
            media_path,
            source_frame,
            track_index,
            clip,
        })
    }

    /// Every video clip whose interval contains `frame`, highest
    /// priority (lowest track index) first. The caller displays the
    /// first entry.
    pub fn video_entries_at(&self, frame: i64) -> CoreResult<Vec<ResolvedClip>> {
        self.entries_at(frame, TrackType::Video)
    }

    /// Every audio clip active at `frame`.
    pub fn audio_entries_at(&self, frame: i64) -> CoreResult<Vec<ResolvedClip>> {
        self.entries_at(frame, TrackType::Audio)
    }

    fn entries_at(&self, frame: i64, track_type: TrackType) -> CoreResult<Vec<ResolvedClip>> {
        let mut hits: Vec<(ClipRow, i64)> = self
            .placed_clips(track_type)?
            .into_iter()
            .filter(|(clip, _)| clip.contains_frame(frame))
            .collect();
        hits.sort_by_key(|(clip, index)| (*index, clip.timeline_start_frame, clip.id.clone()));
        hits.into_iter()
            .map(|(clip, index)| self.resolve(clip, index, frame))
            .collect()
    }

    /// Ids of the clips active at `frame`, for change detection.
    pub fn clip_ids_at(&self, frame: i64, track_type: TrackType) -> CoreResult<Vec<ClipId>> {
        let mut ids: Vec<ClipId> = self
            .placed_clips(track_type)?
            .into_iter()
            .filter(|(clip, _)| clip.contains_frame(frame))
            .map(|(clip, _)| clip.id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// The entry at the next clip boundary strictly after `frame`.
    pub fn next_video(&self, frame: i64) -> CoreResult<Option<ResolvedClip>> {
        self.next_entry(frame, TrackType::Video)
    }

    pub fn next_audio(&self, frame: i64) -> CoreResult<Option<ResolvedClip>> {
        self.next_entry(frame, TrackType::Audio)
    }

    /// The entry at the previous clip boundary at or before `frame`.
    pub fn prev_video(&self, frame: i64) -> CoreResult<Option<ResolvedClip>> {
        self.prev_entry(frame, TrackType::Video)
    }

    pub fn prev_audio(&self, frame: i64) -> CoreResult<Option<ResolvedClip>> {
        self.prev_entry(frame, TrackType::Audio)
    }

    fn next_entry(
        &self,
        frame: i64,
        track_type: TrackType,
    ) -> CoreResult<Option<ResolvedClip>> {
        let candidate = self
            .placed_clips(track_type)?
            .into_iter()
            .filter(|(clip, _)| clip.timeline_start_frame > frame)
            .min_by_key(|(clip, index)| (clip.timeline_start_frame, *index));
        match candidate {
            Some((clip, index)) => {
                let at = clip.timeline_start_frame;
                Ok(Some(self.resolve(clip, index, at)?))
            }
            None => Ok(None),
        }
    }

    fn prev_entry(
        &self,
        frame: i64,
        track_type: TrackType,
    ) -> CoreResult<Option<ResolvedClip>> {
        let candidate = self
            .placed_clips(track_type)?
            .into_iter()
            .filter(|(clip, _)| clip.end_frame() <= frame)
            .max_by_key(|(clip, index)| (clip.end_frame(), std::cmp::Reverse(*index)));
        match candidate {
            Some((clip, index)) => {
                let at = clip.end_frame() - 1;
                Ok(Some(self.resolve(clip, index, at)?))
            }
            None => Ok(None),
        }
    }

    /// Total playable length: the largest clip end on any track.
    pub fn total_frames(&self) -> CoreResult<i64> {
        let mut total = 0;
        for track in &self.tracks {
            for clip in self.db.clips_on_track(&track.id)? {
                total = total.max(clip.end_frame());
            }
        }
        Ok(total)
    }
}
