//! Playback
//!
//! Per-view transport over decoded media: the engine FSM, the media
//! cache interface, and the audio device interface with its one-slot
//! ownership.

mod audio;
mod engine;
mod media;

pub use audio::{
    shared_ownership, AudioDevice, AudioOwnership, AudioSource, EngineId, SharedAudioOwnership,
};
pub use engine::{Boundary, PlaybackCallbacks, PlaybackEngine, TransportMode};
pub use media::{FrameHandle, FrameMetadata, MediaCache, MediaInfo};
