//! Audio Device Interface & Ownership
//!
//! The audio driver lives outside the core. Exactly one engine owns the
//! device at a time, enforced by the shared one-slot ownership facade.

use std::cell::RefCell;
use std::rc::Rc;

use crate::core::{ClipId, CoreResult};

use super::media::MediaCache;

/// Identifier of one playback engine instance.
pub type EngineId = u64;

/// One audible span handed to the device: a file, its timeline window
/// in microseconds, and where in the file that window starts.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioSource {
    pub clip_id: ClipId,
    pub path: String,
    pub start_us: i64,
    pub end_us: i64,
    pub source_offset_us: i64,
}

/// The audio driver facade consumed by the playback engine.
pub trait AudioDevice {
    fn init_session(&mut self, sample_rate: u32, channels: u16) -> CoreResult<()>;
    fn set_max_time(&mut self, us: i64);
    fn set_audio_sources(
        &mut self,
        sources: &[AudioSource],
        cache: &mut dyn MediaCache,
        restart_time_us: i64,
    ) -> CoreResult<()>;
    fn seek(&mut self, us: i64);
    fn start(&mut self);
    fn stop(&mut self);
    /// Signed playback speed; negative reverses.
    fn set_speed(&mut self, v: f64);
    /// Clamps the clock at a boundary during shuttle latch.
    fn latch(&mut self, us: i64);
    /// Short audible burst for frame stepping.
    fn play_burst(&mut self, us: i64, duration_us: i64);
    fn pre_buffer(&mut self, source: &AudioSource, cache: &mut dyn MediaCache);
    fn get_time_us(&self) -> i64;
    fn shutdown_session(&mut self);
}

/// One-slot owner of the audio device, shared by every engine of a
/// session.
#[derive(Debug, Default)]
pub struct AudioOwnership {
    owner: Option<EngineId>,
}

impl AudioOwnership {
    /// Claims the device. Succeeds when free or already held by the
    /// claimant.
    pub fn claim(&mut self, engine_id: EngineId) -> bool {
        match self.owner {
            None => {
                self.owner = Some(engine_id);
                true
            }
            Some(current) => current == engine_id,
        }
    }

    pub fn release(&mut self, engine_id: EngineId) {
        if self.owner == Some(engine_id) {
            self.owner = None;
        }
    }

    pub fn is_owner(&self, engine_id: EngineId) -> bool {
        self.owner == Some(engine_id)
    }

    pub fn owner(&self) -> Option<EngineId> {
        self.owner
    }
}

/// Shared handle to the ownership slot.
pub type SharedAudioOwnership = Rc<RefCell<AudioOwnership>>;

pub fn shared_ownership() -> SharedAudioOwnership {
    Rc::new(RefCell::new(AudioOwnership::default()))
}
