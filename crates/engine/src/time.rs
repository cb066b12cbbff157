use serde::{Deserialize, Serialize};

/// Musical time on the arrangement, in beats.
pub type Beats = f64;
/// Real time, used by the loop markers of unwarped audio.
pub type Seconds = f64;

/// Default tolerance when comparing times reported by the service.
pub const DEFAULT_TIME_EPSILON: Beats = 1e-6;

/// Half-open span `[start, end)` on the arrangement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeSpan {
    pub start: Beats,
    pub end: Beats,
}

impl TimeSpan {
    pub fn new(start: Beats, end: Beats) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> Beats {
        self.end - self.start
    }

    /// True when `t` lies strictly inside the span.
    pub fn contains_interior(&self, t: Beats, epsilon: Beats) -> bool {
        t > self.start + epsilon && t < self.end - epsilon
    }

    /// Shifts the span so it starts at `start`, keeping its duration.
    pub fn moved_to(&self, start: Beats) -> Self {
        Self {
            start,
            end: start + self.duration(),
        }
    }
}

/// Compares two service-reported times with tolerance.
///
/// # Example
/// ```
/// use clip_engine::time::approx_eq;
///
/// assert!(approx_eq(4.0, 4.000_000_1, 1e-6));
/// assert!(!approx_eq(4.0, 4.1, 1e-6));
/// ```
pub fn approx_eq(a: Beats, b: Beats, epsilon: Beats) -> bool {
    (a - b).abs() <= epsilon
}

/// Maps a playback position onto a loop `[loop_start, loop_end)`.
///
/// Positions before `loop_end` are returned unchanged, mirroring how a looping
/// clip plays its pre-roll from the start marker before wrapping.
///
/// # Example
/// ```
/// use clip_engine::time::wrap_into_loop;
///
/// assert_eq!(wrap_into_loop(2.0, 0.0, 4.0), 2.0);
/// assert_eq!(wrap_into_loop(9.0, 0.0, 4.0), 1.0);
/// assert_eq!(wrap_into_loop(6.0, 2.0, 4.0), 2.0);
/// ```
pub fn wrap_into_loop(position: Beats, loop_start: Beats, loop_end: Beats) -> Beats {
    let loop_length = loop_end - loop_start;
    if position < loop_end || loop_length <= 0.0 {
        return position;
    }
    loop_start + (position - loop_end).rem_euclid(loop_length)
}
