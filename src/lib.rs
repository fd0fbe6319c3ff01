//! Cutline Edit Core
//!
//! The authoritative edit engine of a non-linear video editor: a
//! SQLite-backed timeline model, an event-sourced command pipeline with
//! undo/redo stacks, a rational-frame time model, and a frame-accurate
//! playback transport.
//!
//! The GUI, the media decoder pool, and the audio device driver are
//! external collaborators; they reach the core through the narrow
//! surfaces in [`core::playback`] and [`core::session`].

pub mod core;

pub use crate::core::{CoreError, CoreResult};
