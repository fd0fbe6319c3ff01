//! Rational Frame Time
//!
//! All time in the engine is an integer frame count paired with an
//! explicit rate. Crossing a rate boundary is only possible through
//! [`RationalTime::rescale_floor`]; addition, subtraction, and ordering
//! require operands to share an exact rate.

use std::fmt;
use std::ops::{Add, Sub};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{CoreError, CoreResult};

// =============================================================================
// Frame Rate
// =============================================================================

/// Frame rate as an integer ratio (e.g. 30000/1001 for 29.97 fps).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameRate {
    /// Numerator, frames
    pub num: u32,
    /// Denominator, seconds
    pub den: u32,
}

impl FrameRate {
    /// Creates a new frame rate. Both terms must be positive.
    pub const fn new(num: u32, den: u32) -> Self {
        assert!(num > 0 && den > 0, "frame rate terms must be positive");
        Self { num, den }
    }

    /// Validating constructor for rates arriving from stored rows or
    /// caller parameters.
    pub fn try_new(num: u32, den: u32) -> CoreResult<Self> {
        if num == 0 || den == 0 {
            return Err(CoreError::InvalidRate(num, den));
        }
        Ok(Self { num, den })
    }

    /// Frames per second as a float, for display only.
    pub fn fps_f64(self) -> f64 {
        self.num as f64 / self.den as f64
    }

    /// Integer fps used at the timecode seconds-to-frames boundary:
    /// `round(num / den)`, non-drop.
    pub fn nominal_fps(self) -> u32 {
        (self.num + self.den / 2) / self.den
    }

    /// Duration of a single frame in microseconds (floor).
    pub fn frame_duration_us(self) -> i64 {
        1_000_000i64 * self.den as i64 / self.num as i64
    }

    pub const FPS_24: Self = Self::new(24, 1);
    pub const FPS_25: Self = Self::new(25, 1);
    pub const FPS_29_97: Self = Self::new(30000, 1001);
    pub const FPS_30: Self = Self::new(30, 1);
    pub const FPS_50: Self = Self::new(50, 1);
    pub const FPS_59_94: Self = Self::new(60000, 1001);
    pub const FPS_60: Self = Self::new(60, 1);
}

impl Default for FrameRate {
    fn default() -> Self {
        Self::FPS_30
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

// =============================================================================
// Rational Time
// =============================================================================

/// A point or span on a time axis: integer frames at an explicit rate.
///
/// Spans produced by subtraction may be negative; persisted fields are
/// always non-negative.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RationalTime {
    pub frames: i64,
    pub rate: FrameRate,
}

impl RationalTime {
    /// Zero frames at the given rate.
    pub fn zero(rate: FrameRate) -> Self {
        Self { frames: 0, rate }
    }

    /// A frame count at the given rate.
    pub fn from_frames(frames: i64, rate: FrameRate) -> Self {
        Self { frames, rate }
    }

    /// Converts to another rate, flooring. This is the only way to cross
    /// a rate boundary; flooring guarantees sample-exact indexing never
    /// overshoots the media.
    pub fn rescale_floor(self, new_rate: FrameRate) -> Self {
        if self.rate == new_rate {
            return self;
        }
        let numer = self.frames as i128 * new_rate.num as i128 * self.rate.den as i128;
        let denom = self.rate.num as i128 * new_rate.den as i128;
        Self {
            frames: numer.div_euclid(denom) as i64,
            rate: new_rate,
        }
    }

    /// Addition that surfaces a rate mismatch as an error instead of a
    /// panic, for boundary code handling caller input.
    pub fn checked_add(self, rhs: Self) -> CoreResult<Self> {
        self.require_same_rate(rhs)?;
        Ok(Self {
            frames: self.frames + rhs.frames,
            rate: self.rate,
        })
    }

    /// Subtraction counterpart of [`RationalTime::checked_add`].
    pub fn checked_sub(self, rhs: Self) -> CoreResult<Self> {
        self.require_same_rate(rhs)?;
        Ok(Self {
            frames: self.frames - rhs.frames,
            rate: self.rate,
        })
    }

    fn require_same_rate(self, rhs: Self) -> CoreResult<()> {
        if self.rate != rhs.rate {
            return Err(CoreError::RateMismatch {
                left: self.rate.to_string(),
                right: rhs.rate.to_string(),
            });
        }
        Ok(())
    }

    pub fn is_zero(self) -> bool {
        self.frames == 0
    }

    /// Seconds as a float. Display only; compute stays rational.
    pub fn to_seconds_f64(self) -> f64 {
        self.frames as f64 * self.rate.den as f64 / self.rate.num as f64
    }

    /// Microseconds, exact rational intermediate, floored.
    pub fn to_us(self) -> i64 {
        let numer = self.frames as i128 * 1_000_000 * self.rate.den as i128;
        numer.div_euclid(self.rate.num as i128) as i64
    }

    /// Frame index at `rate` for a microsecond position, floored.
    pub fn from_us(us: i64, rate: FrameRate) -> Self {
        let numer = us as i128 * rate.num as i128;
        let denom = 1_000_000i128 * rate.den as i128;
        Self {
            frames: numer.div_euclid(denom) as i64,
            rate,
        }
    }

    /// JSON shape used in command parameters and persisted payloads.
    pub fn to_json(self) -> Value {
        serde_json::json!({
            "frames": self.frames,
            "fps_num": self.rate.num,
            "fps_den": self.rate.den,
        })
    }

    // =========================================================================
    // Timecode
    // =========================================================================

    /// Formats as non-drop `HH:MM:SS:FF` using the nominal integer fps.
    /// Drop-frame is a reserved future extension.
    pub fn format_timecode(self) -> String {
        let fps = self.rate.nominal_fps().max(1) as i64;
        let negative = self.frames < 0;
        let total = self.frames.unsigned_abs() as i64;

        let ff = total % fps;
        let total_secs = total / fps;
        let ss = total_secs % 60;
        let mm = (total_secs / 60) % 60;
        let hh = total_secs / 3600;

        if negative {
            format!("-{:02}:{:02}:{:02}:{:02}", hh, mm, ss, ff)
        } else {
            format!("{:02}:{:02}:{:02}:{:02}", hh, mm, ss, ff)
        }
    }

    /// Parses a non-drop `HH:MM:SS:FF` timecode at the given rate.
    /// Drop-frame separators (`;`) are rejected until the drop-frame
    /// extension lands.
    pub fn parse_timecode(tc: &str, rate: FrameRate) -> CoreResult<Self> {
        let trimmed = tc.trim();
        if trimmed.contains(';') {
            return Err(CoreError::InvalidTimecode(format!(
                "drop-frame timecode not supported: {trimmed}"
            )));
        }

        let parts: Vec<&str> = trimmed.split(':').collect();
        if parts.len() != 4 {
            return Err(CoreError::InvalidTimecode(trimmed.to_string()));
        }

        let field = |s: &str| -> CoreResult<i64> {
            s.parse::<i64>()
                .map_err(|_| CoreError::InvalidTimecode(trimmed.to_string()))
        };

        let hh = field(parts[0])?;
        let mm = field(parts[1])?;
        let ss = field(parts[2])?;
        let ff = field(parts[3])?;

        let fps = rate.nominal_fps().max(1) as i64;
        if hh < 0 || !(0..60).contains(&mm) || !(0..60).contains(&ss) || ff < 0 || ff >= fps {
            return Err(CoreError::InvalidTimecode(trimmed.to_string()));
        }

        let frames = ((hh * 60 + mm) * 60 + ss) * fps + ff;
        Ok(Self { frames, rate })
    }
}

impl Add for RationalTime {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        assert_eq!(
            self.rate, rhs.rate,
            "mixed-rate addition requires an explicit rescale"
        );
        Self {
            frames: self.frames + rhs.frames,
            rate: self.rate,
        }
    }
}

impl Sub for RationalTime {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        assert_eq!(
            self.rate, rhs.rate,
            "mixed-rate subtraction requires an explicit rescale"
        );
        Self {
            frames: self.frames - rhs.frames,
            rate: self.rate,
        }
    }
}

impl PartialOrd for RationalTime {
    /// Ordering is only defined between values sharing an exact rate.
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        if self.rate != other.rate {
            return None;
        }
        Some(self.frames.cmp(&other.frames))
    }
}

impl fmt::Display for RationalTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}f@{}", self.frames, self.rate)
    }
}

/// Floor-rescales a bare frame count between rates. Shorthand for the
/// spans that cross the sequence/media rate boundary constantly in the
/// mutation planners and executors.
pub fn rescale_frames(frames: i64, from: FrameRate, to: FrameRate) -> i64 {
    RationalTime::from_frames(frames, from)
        .rescale_floor(to)
        .frames
}

// =============================================================================
// Hydration
// =============================================================================

/// Attaches a rate to a caller-supplied time value.
///
/// Raw integers receive `default_rate`; a `{frames, fps_num, fps_den}`
/// object passes through unchanged. Used at the boundary between command
/// parameters and rational compute.
pub fn hydrate(value: &Value, default_rate: FrameRate) -> CoreResult<RationalTime> {
    match value {
        Value::Number(n) => {
            let frames = n.as_i64().ok_or_else(|| {
                CoreError::InvalidTimecode(format!("non-integer frame value: {n}"))
            })?;
            Ok(RationalTime::from_frames(frames, default_rate))
        }
        Value::Object(map) => {
            let get = |key: &str| -> CoreResult<i64> {
                map.get(key)
                    .and_then(Value::as_i64)
                    .ok_or_else(|| CoreError::Internal(format!("rational value missing {key}")))
            };
            let frames = get("frames")?;
            let num = get("fps_num")? as u32;
            let den = get("fps_den")? as u32;
            Ok(RationalTime::from_frames(frames, FrameRate::try_new(num, den)?))
        }
        other => Err(CoreError::Internal(format!(
            "cannot hydrate time value from {other}"
        ))),
    }
}
