//! Media Cache Interface
//!
//! The decoder pool lives outside the core; the engine reaches it only
//! through this trait. Frame handles are opaque tokens minted by the
//! cache implementation.

use crate::core::{ClipId, CoreResult};

/// Opaque token for a decoded frame owned by the cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHandle(pub u64);

/// What the cache knows about an activated media file.
#[derive(Clone, Debug, Default)]
pub struct MediaInfo {
    pub has_audio: bool,
    pub audio_sample_rate: u32,
    /// Display rotation in degrees.
    pub rotation: i32,
    pub start_timecode: Option<String>,
}

/// Metadata delivered alongside every displayed frame.
#[derive(Clone, Debug)]
pub struct FrameMetadata {
    pub clip_id: ClipId,
    pub media_path: String,
    pub source_frame: i64,
    pub rotation: i32,
    pub clip_fps_num: u32,
    pub clip_fps_den: u32,
    pub clip_start_frame: i64,
    pub clip_end_frame: i64,
}

/// The decoded-media facade consumed by the playback engine.
pub trait MediaCache {
    /// Prepares a file for decoding under a caller-chosen context id.
    fn activate(&mut self, path: &str, context_id: &str) -> CoreResult<MediaInfo>;

    /// A decoded frame by file-relative frame index, if available.
    fn get_video_frame(
        &mut self,
        file_frame: i64,
        context_id: &str,
        clip_fps_num: u32,
        clip_fps_den: u32,
    ) -> Option<FrameHandle>;

    /// Ensures the file's audio is pooled for mixing.
    fn ensure_audio_pooled(&mut self, path: &str) -> CoreResult<MediaInfo>;

    /// Warms the decoder toward an upcoming seek.
    fn pre_buffer(&mut self, path: &str, source_frame: i64, fps_num: u32, fps_den: u32);

    /// Steers prefetch toward the transport's position and direction.
    fn set_playhead(
        &mut self,
        source_frame: i64,
        direction: i32,
        speed: f64,
        context_id: &str,
        fps_num: u32,
        fps_den: u32,
    );

    /// Parks every prefetch worker.
    fn stop_all_prefetch(&mut self);
}
