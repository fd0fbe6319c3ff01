//! Playback Engine
//!
//! Per-view transport controller: a cooperative FSM driven by a
//! host-scheduled tick. Each tick advances the rational playhead
//! (following the audio clock when this engine owns the device),
//! resolves the topmost video and active audio through the sequence
//! accessor, dispatches decode work to the media cache, and fires the
//! display callbacks. A generation counter makes stale timer callbacks
//! no-ops.

use std::collections::HashSet;

use crate::core::accessor::{ResolvedClip, SequenceAccessor};
use crate::core::store::{Database, TrackType};
use crate::core::time::{FrameRate, RationalTime};
use crate::core::{ClipId, CoreResult, SequenceId};

use super::audio::{AudioDevice, AudioSource, EngineId, SharedAudioOwnership};
use super::media::{FrameMetadata, MediaCache};

/// Tick interval never drops below this, keeping the timer at most
/// around 60 Hz for high-rate sequences.
const MIN_TICK_INTERVAL_MS: u64 = 16;

/// Maximum shuttle speed.
const MAX_SHUTTLE_SPEED: f64 = 8.0;

/// Minimum shuttle speed; an opposite input at this speed stops.
const MIN_SHUTTLE_SPEED: f64 = 0.5;

/// Audio lookahead window in microseconds.
const AUDIO_LOOKAHEAD_US: i64 = 2_000_000;

/// Transport state of the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportMode {
    None,
    Play,
    Shuttle,
}

/// Which end of the sequence a latch froze on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Boundary {
    Start,
    End,
}

/// Host-provided display and position callbacks, set at construction.
pub struct PlaybackCallbacks {
    pub on_show_frame: Box<dyn FnMut(super::media::FrameHandle, &FrameMetadata)>,
    pub on_show_gap: Box<dyn FnMut()>,
    pub on_set_rotation: Box<dyn FnMut(i32)>,
    pub on_position_changed: Box<dyn FnMut(i64)>,
}

/// Per-view playback controller.
pub struct PlaybackEngine {
    engine_id: EngineId,
    callbacks: PlaybackCallbacks,
    ownership: SharedAudioOwnership,

    sequence_id: Option<SequenceId>,
    rate: FrameRate,
    audio_sample_rate: u32,
    total_frames: i64,

    position: i64,
    position_f: f64,
    transport: TransportMode,
    direction: i32,
    speed: f64,
    latched: bool,
    latched_boundary: Option<Boundary>,

    tick_generation: u64,
    last_rotation: i32,
    last_audio_frame: i64,
    last_audio_clip_ids: Vec<ClipId>,
    video_prebuffered: HashSet<ClipId>,
    audio_prebuffered: HashSet<ClipId>,
}

impl PlaybackEngine {
    pub fn new(
        engine_id: EngineId,
        callbacks: PlaybackCallbacks,
        ownership: SharedAudioOwnership,
    ) -> Self {
        Self {
            engine_id,
            callbacks,
            ownership,
            sequence_id: None,
            rate: FrameRate::default(),
            audio_sample_rate: 48000,
            total_frames: 0,
            position: 0,
            position_f: 0.0,
            transport: TransportMode::None,
            direction: 1,
            speed: 0.0,
            latched: false,
            latched_boundary: None,
            tick_generation: 0,
            last_rotation: 0,
            last_audio_frame: -1,
            last_audio_clip_ids: Vec::new(),
            video_prebuffered: HashSet::new(),
            audio_prebuffered: HashSet::new(),
        }
    }

    // =========================================================================
    // State Accessors
    // =========================================================================

    pub fn engine_id(&self) -> EngineId {
        self.engine_id
    }

    /// The generation a host timer must echo back into [`Self::tick`];
    /// every transport change invalidates outstanding timers.
    pub fn generation(&self) -> u64 {
        self.tick_generation
    }

    pub fn position(&self) -> i64 {
        self.position
    }

    pub fn is_playing(&self) -> bool {
        self.transport != TransportMode::None
    }

    pub fn transport(&self) -> TransportMode {
        self.transport
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn direction(&self) -> i32 {
        self.direction
    }

    pub fn is_latched(&self) -> bool {
        self.latched
    }

    pub fn latched_boundary(&self) -> Option<Boundary> {
        self.latched_boundary
    }

    fn owns_audio(&self) -> bool {
        self.ownership.borrow().is_owner(self.engine_id)
    }

    /// Tick interval: `1000/fps` ms, never faster than the 16 ms floor.
    pub fn tick_interval_ms(&self) -> u64 {
        let nominal = 1000u64 * self.rate.den as u64 / self.rate.num as u64;
        nominal.max(MIN_TICK_INTERVAL_MS)
    }

    // =========================================================================
    // Inputs
    // =========================================================================

    /// Binds the engine to a sequence and parks the transport at the
    /// sequence's persisted playhead.
    pub fn load_sequence(&mut self, db: &Database, sequence_id: &str) -> CoreResult<()> {
        let accessor = SequenceAccessor::new(db, sequence_id)?;
        let seq = accessor.sequence();
        self.rate = seq.rate();
        self.audio_sample_rate = seq.audio_sample_rate;
        self.total_frames = accessor.total_frames()?;
        self.position = seq.playhead_frame.clamp(0, (self.total_frames - 1).max(0));
        self.position_f = self.position as f64;
        self.sequence_id = Some(sequence_id.to_string());
        self.transport = TransportMode::None;
        self.speed = 0.0;
        self.latched = false;
        self.latched_boundary = None;
        self.tick_generation += 1;
        self.video_prebuffered.clear();
        self.audio_prebuffered.clear();
        self.last_audio_clip_ids.clear();
        Ok(())
    }

    /// Starts 1x forward playback.
    pub fn play(
        &mut self,
        db: &Database,
        cache: &mut dyn MediaCache,
        audio: &mut dyn AudioDevice,
    ) -> CoreResult<()> {
        if self.latched {
            return Ok(());
        }
        self.transport = TransportMode::Play;
        self.direction = 1;
        self.speed = 1.0;
        self.position_f = self.position as f64;
        self.tick_generation += 1;
        self.start_audio(db, cache, audio);
        Ok(())
    }

    /// Shuttle input: speed ladder while rolling, latch release at a
    /// boundary.
    pub fn shuttle(
        &mut self,
        db: &Database,
        cache: &mut dyn MediaCache,
        audio: &mut dyn AudioDevice,
        dir: i32,
    ) -> CoreResult<()> {
        let dir = if dir >= 0 { 1 } else { -1 };

        if self.latched {
            let releases = match self.latched_boundary {
                Some(Boundary::End) => dir < 0,
                Some(Boundary::Start) => dir > 0,
                None => true,
            };
            if !releases {
                return Ok(());
            }
            self.latched = false;
            self.latched_boundary = None;
            self.transport = TransportMode::Shuttle;
            self.direction = dir;
            self.speed = 1.0;
            self.position_f = self.position as f64;
            self.tick_generation += 1;
            self.start_audio(db, cache, audio);
            return Ok(());
        }

        match self.transport {
            TransportMode::None => {
                self.transport = TransportMode::Shuttle;
                self.direction = dir;
                self.speed = 1.0;
                self.position_f = self.position as f64;
                self.tick_generation += 1;
                self.start_audio(db, cache, audio);
            }
            _ => {
                self.transport = TransportMode::Shuttle;
                if dir == self.direction {
                    self.speed = (self.speed * 2.0).min(MAX_SHUTTLE_SPEED);
                } else if self.speed <= MIN_SHUTTLE_SPEED {
                    self.stop(cache, audio);
                    return Ok(());
                } else {
                    self.speed /= 2.0;
                }
                if self.owns_audio() {
                    audio.set_speed(self.speed * self.direction as f64);
                }
            }
        }
        Ok(())
    }

    /// Half-speed shuttle in the given direction.
    pub fn slow_play(
        &mut self,
        db: &Database,
        cache: &mut dyn MediaCache,
        audio: &mut dyn AudioDevice,
        dir: i32,
    ) -> CoreResult<()> {
        if self.latched {
            return Ok(());
        }
        let was_stopped = self.transport == TransportMode::None;
        self.transport = TransportMode::Shuttle;
        self.direction = if dir >= 0 { 1 } else { -1 };
        self.speed = MIN_SHUTTLE_SPEED;
        self.position_f = self.position as f64;
        self.tick_generation += 1;
        if was_stopped {
            self.start_audio(db, cache, audio);
        } else if self.owns_audio() {
            audio.set_speed(self.speed * self.direction as f64);
        }
        Ok(())
    }

    /// Halts the transport, parks the decoder, and clears lookahead
    /// state.
    pub fn stop(&mut self, cache: &mut dyn MediaCache, audio: &mut dyn AudioDevice) {
        self.transport = TransportMode::None;
        self.speed = 0.0;
        self.latched = false;
        self.latched_boundary = None;
        self.tick_generation += 1;
        cache.stop_all_prefetch();
        self.video_prebuffered.clear();
        self.audio_prebuffered.clear();
        if self.owns_audio() {
            audio.stop();
        }
    }

    /// Jumps to a frame and displays it immediately.
    pub fn seek(
        &mut self,
        db: &Database,
        cache: &mut dyn MediaCache,
        audio: &mut dyn AudioDevice,
        frame: i64,
    ) -> CoreResult<()> {
        self.refresh_total(db)?;
        self.position = frame.clamp(0, (self.total_frames - 1).max(0));
        self.position_f = self.position as f64;
        self.latched = false;
        self.latched_boundary = None;
        self.tick_generation += 1;
        self.display_frame(db, cache, self.position)?;
        if self.owns_audio() {
            audio.seek(self.timeline_us(self.position));
        }
        (self.callbacks.on_position_changed)(self.position);
        Ok(())
    }

    /// Claims the audio device for this engine. The previously active
    /// view must deactivate first; a held slot fails the claim.
    pub fn activate_audio(
        &mut self,
        db: &Database,
        audio: &mut dyn AudioDevice,
    ) -> CoreResult<bool> {
        let claimed = self.ownership.borrow_mut().claim(self.engine_id);
        if !claimed {
            tracing::warn!(
                engine_id = self.engine_id,
                holder = ?self.ownership.borrow().owner(),
                "Audio device already owned by another engine"
            );
            return Ok(false);
        }
        audio.init_session(self.audio_sample_rate, 2)?;
        self.refresh_total(db)?;
        audio.set_max_time(self.timeline_us(self.total_frames));
        // Force a fresh source resolve on the next tick.
        self.last_audio_clip_ids.clear();
        self.last_audio_frame = -1;
        Ok(true)
    }

    /// Stops audio and releases the device slot.
    pub fn deactivate_audio(&mut self, audio: &mut dyn AudioDevice) {
        if self.owns_audio() {
            audio.stop();
            self.ownership.borrow_mut().release(self.engine_id);
        }
    }

    /// Audible burst for a frame step: at least 40 ms, at most 60 ms,
    /// around one and a half frame durations.
    pub fn play_frame_audio(&mut self, audio: &mut dyn AudioDevice, frame: i64) {
        if !self.owns_audio() {
            return;
        }
        let frame_us = self.rate.frame_duration_us();
        let duration_us = (frame_us * 3 / 2).clamp(40_000, 60_000);
        audio.play_burst(self.timeline_us(frame), duration_us);
    }

    // =========================================================================
    // Tick
    // =========================================================================

    /// One transport tick. Returns the delay before the next tick, or
    /// `None` when the tick was stale or the transport halted.
    pub fn tick(
        &mut self,
        db: &Database,
        cache: &mut dyn MediaCache,
        audio: &mut dyn AudioDevice,
        generation: u64,
    ) -> CoreResult<Option<u64>> {
        if generation != self.tick_generation {
            return Ok(None);
        }
        if self.transport == TransportMode::None {
            return Ok(None);
        }
        let Some(sequence_id) = self.sequence_id.clone() else {
            return Ok(None);
        };

        if self.latched {
            self.display_frame(db, cache, self.position)?;
            return Ok(Some(self.tick_interval_ms()));
        }

        let accessor = SequenceAccessor::new(db, &sequence_id)?;
        self.total_frames = accessor.total_frames()?;
        if self.total_frames == 0 {
            (self.callbacks.on_show_gap)();
            return Ok(Some(self.tick_interval_ms()));
        }

        // Advance: video follows the audio clock whenever audio is
        // actively driving; the frame-based path covers gaps, J-cuts,
        // and audio exhaustion without ping-ponging.
        let audio_frame = RationalTime::from_us(audio.get_time_us(), self.rate).frames;
        let audio_driving = self.owns_audio()
            && !self.last_audio_clip_ids.is_empty()
            && audio_frame != self.last_audio_frame;

        let mut new_pos = if audio_driving {
            self.position_f = audio_frame as f64;
            audio_frame
        } else {
            self.position_f += self.direction as f64 * self.speed;
            self.position_f.floor() as i64
        };
        self.last_audio_frame = audio_frame;

        let last_frame = self.total_frames - 1;
        new_pos = new_pos.clamp(0, last_frame);

        // Boundary handling.
        let at_boundary = (self.direction > 0 && new_pos >= last_frame)
            || (self.direction < 0 && new_pos <= 0);
        if at_boundary {
            let boundary = if self.direction > 0 {
                Boundary::End
            } else {
                Boundary::Start
            };
            self.position = new_pos;
            self.position_f = new_pos as f64;
            self.display_frame(db, cache, new_pos)?;
            (self.callbacks.on_position_changed)(new_pos);

            match self.transport {
                TransportMode::Play => {
                    self.stop(cache, audio);
                    return Ok(None);
                }
                _ => {
                    // Shuttle: clamp the audio clock, freeze the video,
                    // wait for an opposite-direction input.
                    self.latched = true;
                    self.latched_boundary = Some(boundary);
                    if self.owns_audio() {
                        audio.latch(self.timeline_us(self.total_frames));
                    }
                    return Ok(Some(self.tick_interval_ms()));
                }
            }
        }

        self.display_frame(db, cache, new_pos)?;

        // Audio follows the clip set under the playhead.
        if self.owns_audio() {
            let clip_ids = accessor.clip_ids_at(new_pos, TrackType::Audio)?;
            if clip_ids != self.last_audio_clip_ids {
                let sources = self.collect_audio_sources(&accessor, new_pos)?;
                for source in &sources {
                    if let Err(e) = cache.ensure_audio_pooled(&source.path) {
                        tracing::warn!(path = %source.path, error = %e, "Audio pooling failed");
                    }
                }
                let restart = self.timeline_us(new_pos);
                if let Err(e) = audio.set_audio_sources(&sources, cache, restart) {
                    tracing::warn!(error = %e, "Audio source handoff failed, video continues");
                }
                self.last_audio_clip_ids = clip_ids;
            }
        }

        self.lookahead(&accessor, cache, audio, new_pos)?;

        self.position = new_pos;
        (self.callbacks.on_position_changed)(new_pos);
        Ok(Some(self.tick_interval_ms()))
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn refresh_total(&mut self, db: &Database) -> CoreResult<()> {
        if let Some(sequence_id) = &self.sequence_id {
            let accessor = SequenceAccessor::new(db, sequence_id)?;
            self.total_frames = accessor.total_frames()?;
        }
        Ok(())
    }

    fn timeline_us(&self, frame: i64) -> i64 {
        RationalTime::from_frames(frame, self.rate).to_us()
    }

    /// Resolves and displays the frame at `frame`. Decoder trouble is
    /// never fatal to the tick loop: it logs and shows a gap.
    fn display_frame(
        &mut self,
        db: &Database,
        cache: &mut dyn MediaCache,
        frame: i64,
    ) -> CoreResult<()> {
        let Some(sequence_id) = self.sequence_id.clone() else {
            (self.callbacks.on_show_gap)();
            return Ok(());
        };
        let accessor = SequenceAccessor::new(db, &sequence_id)?;
        let entries = accessor.video_entries_at(frame)?;

        let Some(entry) = entries.into_iter().next() else {
            (self.callbacks.on_show_gap)();
            return Ok(());
        };
        let Some(path) = entry.media_path.clone() else {
            (self.callbacks.on_show_gap)();
            return Ok(());
        };

        let context_id = entry.clip.id.clone();
        let info = match cache.activate(&path, &context_id) {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "Media activate failed, showing gap");
                (self.callbacks.on_show_gap)();
                return Ok(());
            }
        };
        if info.rotation != self.last_rotation {
            self.last_rotation = info.rotation;
            (self.callbacks.on_set_rotation)(info.rotation);
        }

        if self.transport != TransportMode::None {
            // Steer the prefetch workers toward the transport.
            cache.set_playhead(
                entry.source_frame,
                self.direction,
                self.speed,
                &context_id,
                entry.clip.fps_num,
                entry.clip.fps_den,
            );
        }

        match cache.get_video_frame(
            entry.source_frame,
            &context_id,
            entry.clip.fps_num,
            entry.clip.fps_den,
        ) {
            Some(handle) => {
                let metadata = FrameMetadata {
                    clip_id: entry.clip.id.clone(),
                    media_path: path,
                    source_frame: entry.source_frame,
                    rotation: info.rotation,
                    clip_fps_num: entry.clip.fps_num,
                    clip_fps_den: entry.clip.fps_den,
                    clip_start_frame: entry.clip_start_frame,
                    clip_end_frame: entry.clip_end_frame,
                };
                (self.callbacks.on_show_frame)(handle, &metadata);
            }
            None => (self.callbacks.on_show_gap)(),
        }
        Ok(())
    }

    fn start_audio(
        &mut self,
        db: &Database,
        cache: &mut dyn MediaCache,
        audio: &mut dyn AudioDevice,
    ) {
        if !self.owns_audio() {
            return;
        }
        let result = (|| -> CoreResult<()> {
            let Some(sequence_id) = &self.sequence_id else {
                return Ok(());
            };
            let accessor = SequenceAccessor::new(db, sequence_id)?;
            let sources = self.collect_audio_sources(&accessor, self.position)?;
            for source in &sources {
                if let Err(e) = cache.ensure_audio_pooled(&source.path) {
                    tracing::warn!(path = %source.path, error = %e, "Audio pooling failed");
                }
            }
            let restart = self.timeline_us(self.position);
            audio.set_audio_sources(&sources, cache, restart)?;
            self.last_audio_clip_ids =
                accessor.clip_ids_at(self.position, TrackType::Audio)?;
            audio.seek(restart);
            audio.set_speed(self.speed * self.direction as f64);
            audio.start();
            // The clock has not moved yet; the first tick advances on
            // the frame path until it does.
            self.last_audio_frame = RationalTime::from_us(restart, self.rate).frames;
            Ok(())
        })();
        if let Err(e) = result {
            tracing::warn!(error = %e, "Audio start failed, video continues");
        }
    }

    fn collect_audio_sources(
        &self,
        accessor: &SequenceAccessor<'_>,
        frame: i64,
    ) -> CoreResult<Vec<AudioSource>> {
        let entries = accessor.audio_entries_at(frame)?;
        Ok(entries.iter().filter_map(|e| self.to_source(e)).collect())
    }

    fn to_source(&self, entry: &ResolvedClip) -> Option<AudioSource> {
        let path = entry.media_path.clone()?;
        Some(AudioSource {
            clip_id: entry.clip.id.clone(),
            path,
            start_us: self.timeline_us(entry.clip_start_frame),
            end_us: self.timeline_us(entry.clip_end_frame),
            source_offset_us: RationalTime::from_frames(
                entry.clip.source_in_frame,
                entry.clip.rate(),
            )
            .to_us(),
        })
    }

    /// Pre-buffers the next (or previous) video clip within one second
    /// of frames, and the next audio source within two seconds of
    /// clock, each clip at most once per transport.
    fn lookahead(
        &mut self,
        accessor: &SequenceAccessor<'_>,
        cache: &mut dyn MediaCache,
        audio: &mut dyn AudioDevice,
        pos: i64,
    ) -> CoreResult<()> {
        let window = self.rate.nominal_fps() as i64;

        let video_target = if self.direction >= 0 {
            accessor
                .next_video(pos)?
                .filter(|n| n.clip_start_frame - pos <= window)
        } else {
            accessor
                .prev_video(pos)?
                .filter(|p| pos - (p.clip_end_frame - 1) <= window)
        };
        if let Some(target) = video_target {
            if !self.video_prebuffered.contains(&target.clip.id) {
                if let Some(path) = &target.media_path {
                    cache.pre_buffer(
                        path,
                        target.source_frame,
                        target.clip.fps_num,
                        target.clip.fps_den,
                    );
                }
                self.video_prebuffered.insert(target.clip.id.clone());
            }
        }

        if self.owns_audio() {
            let pos_us = self.timeline_us(pos);
            let audio_target = if self.direction >= 0 {
                accessor.next_audio(pos)?.filter(|n| {
                    self.timeline_us(n.clip_start_frame) - pos_us <= AUDIO_LOOKAHEAD_US
                })
            } else {
                accessor.prev_audio(pos)?.filter(|p| {
                    pos_us - self.timeline_us(p.clip_end_frame) <= AUDIO_LOOKAHEAD_US
                })
            };
            if let Some(target) = audio_target {
                if !self.audio_prebuffered.contains(&target.clip.id) {
                    if let Some(source) = self.to_source(&target) {
                        audio.pre_buffer(&source, cache);
                    }
                    self.audio_prebuffered.insert(target.clip.id.clone());
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::playback::audio::shared_ownership;
    use crate::core::playback::media::{FrameHandle, MediaInfo};
    use crate::core::store::fixtures::{seed_clip, seed_timeline};
    use crate::core::store::MediaRow;
    use crate::core::{new_entity_id, CoreResult};
    use std::cell::RefCell;
    use std::rc::Rc;

    // =========================================================================
    // Mocks
    // =========================================================================

    #[derive(Default)]
    struct MockCache {
        activated: Vec<String>,
        prebuffered: Vec<(String, i64)>,
        frames_served: Vec<i64>,
        prefetch_stops: usize,
        fail_activate: bool,
    }

    impl MediaCache for MockCache {
        fn activate(&mut self, path: &str, _context_id: &str) -> CoreResult<MediaInfo> {
            if self.fail_activate {
                return Err(crate::core::CoreError::Internal("decoder gone".into()));
            }
            self.activated.push(path.to_string());
            Ok(MediaInfo {
                has_audio: true,
                audio_sample_rate: 48000,
                rotation: 0,
                start_timecode: None,
            })
        }

        fn get_video_frame(
            &mut self,
            file_frame: i64,
            _context_id: &str,
            _fps_num: u32,
            _fps_den: u32,
        ) -> Option<FrameHandle> {
            self.frames_served.push(file_frame);
            Some(FrameHandle(file_frame as u64))
        }

        fn ensure_audio_pooled(&mut self, _path: &str) -> CoreResult<MediaInfo> {
            Ok(MediaInfo::default())
        }

        fn pre_buffer(&mut self, path: &str, source_frame: i64, _fps_num: u32, _fps_den: u32) {
            self.prebuffered.push((path.to_string(), source_frame));
        }

        fn set_playhead(
            &mut self,
            _source_frame: i64,
            _direction: i32,
            _speed: f64,
            _context_id: &str,
            _fps_num: u32,
            _fps_den: u32,
        ) {
        }

        fn stop_all_prefetch(&mut self) {
            self.prefetch_stops += 1;
        }
    }

    #[derive(Default)]
    struct MockAudio {
        time_us: i64,
        started: usize,
        stopped: usize,
        latched_at: Option<i64>,
        speeds: Vec<f64>,
        source_sets: Vec<usize>,
        bursts: Vec<(i64, i64)>,
        prebuffered: Vec<String>,
        max_time_us: i64,
    }

    impl AudioDevice for MockAudio {
        fn init_session(&mut self, _sample_rate: u32, _channels: u16) -> CoreResult<()> {
            Ok(())
        }

        fn set_max_time(&mut self, us: i64) {
            self.max_time_us = us;
        }

        fn set_audio_sources(
            &mut self,
            sources: &[AudioSource],
            _cache: &mut dyn MediaCache,
            _restart_time_us: i64,
        ) -> CoreResult<()> {
            self.source_sets.push(sources.len());
            Ok(())
        }

        fn seek(&mut self, us: i64) {
            self.time_us = us;
        }

        fn start(&mut self) {
            self.started += 1;
        }

        fn stop(&mut self) {
            self.stopped += 1;
        }

        fn set_speed(&mut self, v: f64) {
            self.speeds.push(v);
        }

        fn latch(&mut self, us: i64) {
            self.latched_at = Some(us);
        }

        fn play_burst(&mut self, us: i64, duration_us: i64) {
            self.bursts.push((us, duration_us));
        }

        fn pre_buffer(&mut self, source: &AudioSource, _cache: &mut dyn MediaCache) {
            self.prebuffered.push(source.clip_id.clone());
        }

        fn get_time_us(&self) -> i64 {
            self.time_us
        }

        fn shutdown_session(&mut self) {}
    }

    #[derive(Clone, Default)]
    struct Seen {
        frames: Rc<RefCell<Vec<i64>>>,
        gaps: Rc<RefCell<usize>>,
        positions: Rc<RefCell<Vec<i64>>>,
    }

    fn engine_with(seen: &Seen, engine_id: EngineId) -> PlaybackEngine {
        let frames = seen.frames.clone();
        let gaps = seen.gaps.clone();
        let positions = seen.positions.clone();
        PlaybackEngine::new(
            engine_id,
            PlaybackCallbacks {
                on_show_frame: Box::new(move |_, meta| {
                    frames.borrow_mut().push(meta.source_frame);
                }),
                on_show_gap: Box::new(move || {
                    *gaps.borrow_mut() += 1;
                }),
                on_set_rotation: Box::new(|_| {}),
                on_position_changed: Box::new(move |p| {
                    positions.borrow_mut().push(p);
                }),
            },
            shared_ownership(),
        )
    }

    /// 100 frames of media on V1 at 24/1, full coverage.
    fn seed_playable(db: &Database, total: i64) -> String {
        let (project_id, sequence_id, video_track, audio_track) = seed_timeline(db);
        // The fixture sequence runs at 30/1; the tests below only care
        // about frame counts, so clip rate matches it.
        let media_id = new_entity_id();
        db.insert_media(&MediaRow {
            id: media_id.clone(),
            project_id: project_id.clone(),
            name: "shot.mov".into(),
            file_path: "/footage/shot.mov".into(),
            duration_frames: total,
            fps_num: 30,
            fps_den: 1,
            width: 1920,
            height: 1080,
            audio_channels: 2,
            codec: "prores".into(),
            metadata: serde_json::json!({}),
        })
        .unwrap();

        let video = seed_clip(db, &project_id, &sequence_id, &video_track, 0, total);
        let audio = seed_clip(db, &project_id, &sequence_id, &audio_track, 0, total);
        for clip in [&video, &audio] {
            db.set_clip_media(&clip.id, &media_id).unwrap();
        }
        sequence_id
    }

    #[test]
    fn test_play_advances_and_stops_at_end() {
        let db = Database::open_in_memory().unwrap();
        let sequence_id = seed_playable(&db, 5);
        let seen = Seen::default();
        let mut engine = engine_with(&seen, 1);
        let mut cache = MockCache::default();
        let mut audio = MockAudio::default();

        engine.load_sequence(&db, &sequence_id).unwrap();
        engine.play(&db, &mut cache, &mut audio).unwrap();
        assert!(engine.is_playing());

        let generation = engine.generation();
        for _ in 0..10 {
            if engine
                .tick(&db, &mut cache, &mut audio, generation)
                .unwrap()
                .is_none()
            {
                break;
            }
        }

        // Play mode displays the last frame and halts.
        assert!(!engine.is_playing());
        assert_eq!(engine.position(), 4);
        assert_eq!(seen.positions.borrow().last(), Some(&4));
        assert!(cache.prefetch_stops >= 1);
        assert!(!cache.frames_served.is_empty());
    }

    #[test]
    fn test_stale_generation_is_a_noop() {
        let db = Database::open_in_memory().unwrap();
        let sequence_id = seed_playable(&db, 100);
        let seen = Seen::default();
        let mut engine = engine_with(&seen, 1);
        let mut cache = MockCache::default();
        let mut audio = MockAudio::default();

        engine.load_sequence(&db, &sequence_id).unwrap();
        engine.play(&db, &mut cache, &mut audio).unwrap();
        let stale = engine.generation();
        engine.stop(&mut cache, &mut audio);
        engine.play(&db, &mut cache, &mut audio).unwrap();

        assert!(engine
            .tick(&db, &mut cache, &mut audio, stale)
            .unwrap()
            .is_none());
        assert_eq!(engine.position(), 0);
    }

    #[test]
    fn test_shuttle_speed_ladder() {
        let db = Database::open_in_memory().unwrap();
        let sequence_id = seed_playable(&db, 1000);
        let seen = Seen::default();
        let mut engine = engine_with(&seen, 1);
        let mut cache = MockCache::default();
        let mut audio = MockAudio::default();
        engine.load_sequence(&db, &sequence_id).unwrap();

        engine.shuttle(&db, &mut cache, &mut audio, 1).unwrap();
        assert_eq!(engine.speed(), 1.0);
        engine.shuttle(&db, &mut cache, &mut audio, 1).unwrap();
        assert_eq!(engine.speed(), 2.0);
        engine.shuttle(&db, &mut cache, &mut audio, 1).unwrap();
        engine.shuttle(&db, &mut cache, &mut audio, 1).unwrap();
        assert_eq!(engine.speed(), 8.0);
        // Caps at 8.
        engine.shuttle(&db, &mut cache, &mut audio, 1).unwrap();
        assert_eq!(engine.speed(), 8.0);

        // Opposite inputs halve without flipping direction.
        engine.shuttle(&db, &mut cache, &mut audio, -1).unwrap();
        assert_eq!(engine.speed(), 4.0);
        assert_eq!(engine.direction(), 1);
        for _ in 0..3 {
            engine.shuttle(&db, &mut cache, &mut audio, -1).unwrap();
        }
        assert_eq!(engine.speed(), 0.5);
        // At half speed an opposite input stops.
        engine.shuttle(&db, &mut cache, &mut audio, -1).unwrap();
        assert!(!engine.is_playing());
    }

    #[test]
    fn test_slow_play_is_half_speed_shuttle() {
        let db = Database::open_in_memory().unwrap();
        let sequence_id = seed_playable(&db, 1000);
        let seen = Seen::default();
        let mut engine = engine_with(&seen, 1);
        let mut cache = MockCache::default();
        let mut audio = MockAudio::default();
        engine.load_sequence(&db, &sequence_id).unwrap();

        engine.slow_play(&db, &mut cache, &mut audio, -1).unwrap();
        assert_eq!(engine.transport(), TransportMode::Shuttle);
        assert_eq!(engine.speed(), 0.5);
        assert_eq!(engine.direction(), -1);
    }

    #[test]
    fn test_shuttle_boundary_latch_and_release() {
        let db = Database::open_in_memory().unwrap();
        let sequence_id = seed_playable(&db, 100);
        let seen = Seen::default();
        let mut engine = engine_with(&seen, 1);
        let mut cache = MockCache::default();
        let mut audio = MockAudio::default();
        engine.load_sequence(&db, &sequence_id).unwrap();

        engine.seek(&db, &mut cache, &mut audio, 97).unwrap();
        engine.shuttle(&db, &mut cache, &mut audio, 1).unwrap();
        engine.shuttle(&db, &mut cache, &mut audio, 1).unwrap();
        assert_eq!(engine.speed(), 2.0);

        let generation = engine.generation();
        // 97 -> 99 in one tick at speed 2, latching at the end.
        engine.tick(&db, &mut cache, &mut audio, generation).unwrap();
        assert!(engine.is_latched());
        assert_eq!(engine.latched_boundary(), Some(Boundary::End));
        assert_eq!(engine.position(), 99);

        // Latched ticks keep redisplaying the boundary frame.
        let shown_before = seen.frames.borrow().len();
        engine.tick(&db, &mut cache, &mut audio, generation).unwrap();
        engine.tick(&db, &mut cache, &mut audio, generation).unwrap();
        assert_eq!(engine.position(), 99);
        assert!(seen.frames.borrow().len() > shown_before);

        // A same-direction input stays latched.
        engine.shuttle(&db, &mut cache, &mut audio, 1).unwrap();
        assert!(engine.is_latched());

        // An opposite input releases at 1x reverse.
        engine.shuttle(&db, &mut cache, &mut audio, -1).unwrap();
        assert!(!engine.is_latched());
        assert_eq!(engine.direction(), -1);
        assert_eq!(engine.speed(), 1.0);

        let generation = engine.generation();
        engine.tick(&db, &mut cache, &mut audio, generation).unwrap();
        assert_eq!(engine.position(), 98);
    }

    #[test]
    fn test_gap_shows_gap_and_keeps_ticking() {
        let db = Database::open_in_memory().unwrap();
        let (project_id, sequence_id, video_track, _) = seed_timeline(&db);
        // One clip at [50, 100); everything before is a gap.
        seed_clip(&db, &project_id, &sequence_id, &video_track, 50, 50);

        let seen = Seen::default();
        let mut engine = engine_with(&seen, 1);
        let mut cache = MockCache::default();
        let mut audio = MockAudio::default();
        engine.load_sequence(&db, &sequence_id).unwrap();
        engine.play(&db, &mut cache, &mut audio).unwrap();

        let generation = engine.generation();
        let next = engine
            .tick(&db, &mut cache, &mut audio, generation)
            .unwrap();
        assert!(next.is_some());
        assert!(*seen.gaps.borrow() >= 1);
        assert_eq!(engine.position(), 1);
    }

    #[test]
    fn test_decoder_error_is_not_fatal() {
        let db = Database::open_in_memory().unwrap();
        let sequence_id = seed_playable(&db, 100);
        let seen = Seen::default();
        let mut engine = engine_with(&seen, 1);
        let mut cache = MockCache {
            fail_activate: true,
            ..MockCache::default()
        };
        let mut audio = MockAudio::default();
        engine.load_sequence(&db, &sequence_id).unwrap();
        engine.play(&db, &mut cache, &mut audio).unwrap();

        let generation = engine.generation();
        let next = engine
            .tick(&db, &mut cache, &mut audio, generation)
            .unwrap();
        assert!(next.is_some());
        assert!(*seen.gaps.borrow() >= 1);
        assert!(engine.is_playing());
    }

    #[test]
    fn test_audio_owner_follows_audio_clock() {
        let db = Database::open_in_memory().unwrap();
        let sequence_id = seed_playable(&db, 1000);
        let seen = Seen::default();
        let mut engine = engine_with(&seen, 1);
        let mut cache = MockCache::default();
        let mut audio = MockAudio::default();
        engine.load_sequence(&db, &sequence_id).unwrap();
        assert!(engine.activate_audio(&db, &mut audio).unwrap());
        engine.play(&db, &mut cache, &mut audio).unwrap();

        assert!(audio.started >= 1);
        assert_eq!(audio.source_sets.last(), Some(&1));
        // 1000 frames at 30fps.
        assert_eq!(audio.max_time_us, 33_333_333);

        let generation = engine.generation();
        // The clock has not moved yet, so the frame path advances to 1.
        engine.tick(&db, &mut cache, &mut audio, generation).unwrap();
        assert_eq!(engine.position(), 1);

        // Jump the audio clock to one second; the next tick follows it.
        audio.time_us = 1_000_000;
        engine.tick(&db, &mut cache, &mut audio, generation).unwrap();
        assert_eq!(engine.position(), 30);
    }

    #[test]
    fn test_audio_ownership_is_exclusive() {
        let db = Database::open_in_memory().unwrap();
        let sequence_id = seed_playable(&db, 100);
        let seen = Seen::default();
        let ownership = shared_ownership();

        let make = |id: EngineId| {
            let s = seen.clone();
            let frames = s.frames.clone();
            let gaps = s.gaps.clone();
            let positions = s.positions.clone();
            PlaybackEngine::new(
                id,
                PlaybackCallbacks {
                    on_show_frame: Box::new(move |_, m| frames.borrow_mut().push(m.source_frame)),
                    on_show_gap: Box::new(move || *gaps.borrow_mut() += 1),
                    on_set_rotation: Box::new(|_| {}),
                    on_position_changed: Box::new(move |p| positions.borrow_mut().push(p)),
                },
                ownership.clone(),
            )
        };

        let mut first = make(1);
        let mut second = make(2);
        let mut audio = MockAudio::default();

        first.load_sequence(&db, &sequence_id).unwrap();
        second.load_sequence(&db, &sequence_id).unwrap();

        assert!(first.activate_audio(&db, &mut audio).unwrap());
        assert!(!second.activate_audio(&db, &mut audio).unwrap());

        // Focus switch: deactivate the old view, then the claim works.
        first.deactivate_audio(&mut audio);
        assert!(second.activate_audio(&db, &mut audio).unwrap());
    }

    #[test]
    fn test_lookahead_prebuffers_next_clip_once() {
        let db = Database::open_in_memory().unwrap();
        let (project_id, sequence_id, video_track, _) = seed_timeline(&db);
        let media_id = new_entity_id();
        db.insert_media(&MediaRow {
            id: media_id.clone(),
            project_id: project_id.clone(),
            name: "b.mov".into(),
            file_path: "/footage/b.mov".into(),
            duration_frames: 500,
            fps_num: 30,
            fps_den: 1,
            width: 0,
            height: 0,
            audio_channels: 2,
            codec: String::new(),
            metadata: serde_json::json!({}),
        })
        .unwrap();
        let a = seed_clip(&db, &project_id, &sequence_id, &video_track, 0, 100);
        let b = seed_clip(&db, &project_id, &sequence_id, &video_track, 100, 100);
        db.set_clip_media(&a.id, &media_id).unwrap();
        db.set_clip_media(&b.id, &media_id).unwrap();

        let seen = Seen::default();
        let mut engine = engine_with(&seen, 1);
        let mut cache = MockCache::default();
        let mut audio = MockAudio::default();
        engine.load_sequence(&db, &sequence_id).unwrap();
        // Within one second (30 frames) of B's start.
        engine.seek(&db, &mut cache, &mut audio, 80).unwrap();
        engine.play(&db, &mut cache, &mut audio).unwrap();

        let generation = engine.generation();
        engine.tick(&db, &mut cache, &mut audio, generation).unwrap();
        engine.tick(&db, &mut cache, &mut audio, generation).unwrap();
        engine.tick(&db, &mut cache, &mut audio, generation).unwrap();

        let hits: Vec<_> = cache
            .prebuffered
            .iter()
            .filter(|(path, _)| path == "/footage/b.mov")
            .collect();
        // Pre-buffered exactly once per transport.
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].1, 0);
    }

    #[test]
    fn test_owner_latch_clamps_audio_and_prebuffers() {
        let db = Database::open_in_memory().unwrap();
        let (project_id, sequence_id, video_track, audio_track) = seed_timeline(&db);
        let media_id = new_entity_id();
        db.insert_media(&MediaRow {
            id: media_id.clone(),
            project_id: project_id.clone(),
            name: "long.mov".into(),
            file_path: "/footage/long.mov".into(),
            duration_frames: 300,
            fps_num: 30,
            fps_den: 1,
            width: 0,
            height: 0,
            audio_channels: 2,
            codec: String::new(),
            metadata: serde_json::json!({}),
        })
        .unwrap();
        let video = seed_clip(&db, &project_id, &sequence_id, &video_track, 0, 150);
        let audio_a = seed_clip(&db, &project_id, &sequence_id, &audio_track, 0, 100);
        let audio_b = seed_clip(&db, &project_id, &sequence_id, &audio_track, 120, 30);
        for clip in [&video, &audio_a, &audio_b] {
            db.set_clip_media(&clip.id, &media_id).unwrap();
        }

        let seen = Seen::default();
        let mut engine = engine_with(&seen, 1);
        let mut cache = MockCache::default();
        let mut audio = MockAudio::default();
        engine.load_sequence(&db, &sequence_id).unwrap();
        assert!(engine.activate_audio(&db, &mut audio).unwrap());

        engine.seek(&db, &mut cache, &mut audio, 100).unwrap();
        engine.shuttle(&db, &mut cache, &mut audio, 1).unwrap();

        let generation = engine.generation();
        for _ in 0..60 {
            engine.tick(&db, &mut cache, &mut audio, generation).unwrap();
            if engine.is_latched() {
                break;
            }
            // Keep the mock clock behind so the frame path drives.
            audio.time_us = 0;
        }

        assert!(engine.is_latched());
        assert_eq!(engine.position(), 149);
        // Audio clamped at the sequence end: 150 frames at 30fps.
        assert_eq!(audio.latched_at, Some(5_000_000));
        assert!(!audio.speeds.is_empty());
        assert!(!cache.activated.is_empty());
        // The upcoming audio clip was pre-buffered exactly once.
        assert_eq!(
            audio.prebuffered.iter().filter(|id| **id == audio_b.id).count(),
            1
        );
        assert_eq!(audio.stopped, 0);
    }

    #[test]
    fn test_frame_step_burst_duration() {
        let db = Database::open_in_memory().unwrap();
        let sequence_id = seed_playable(&db, 100);
        let seen = Seen::default();
        let mut engine = engine_with(&seen, 1);
        let mut audio = MockAudio::default();
        engine.load_sequence(&db, &sequence_id).unwrap();
        assert!(engine.activate_audio(&db, &mut audio).unwrap());

        engine.play_frame_audio(&mut audio, 30);
        let (at_us, duration_us) = audio.bursts[0];
        assert_eq!(at_us, 1_000_000);
        // 1.5 frames at 30fps is 50 ms, inside the 40..60 ms clamp.
        assert_eq!(duration_us, 49_999);
        assert!((40_000..=60_000).contains(&duration_us));
    }
}
