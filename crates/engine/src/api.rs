use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clip::{ClipPosition, ClipRef, ClipSnapshot, TrackIndex};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::holding::HoldingArea;
use crate::service::{TimelineService, TimelineServiceExt};
use crate::splitting;
use crate::tiling;
use crate::time::{Beats, approx_eq};

/// Commands accepted by the engine.
///
/// # Example
/// ```
/// use clip_engine::Command;
///
/// let command: Command = serde_json::from_str(
///     r#"{"op": "shorten",
///         "clip": {"arrangement": {"track": 0, "id": "0:0:0", "start": 0.0}},
///         "target_duration": 16.0}"#,
/// )
/// .expect("valid command");
/// assert!(matches!(command, Command::Shorten { target_duration, .. } if target_duration == 16.0));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    Lengthen {
        clip: ClipRef,
        target_duration: Beats,
    },
    Shorten {
        clip: ClipRef,
        target_duration: Beats,
    },
    /// Splits a clip at absolute arrangement times.
    Split {
        clip: ClipRef,
        cut_points: Vec<Beats>,
    },
    Move {
        clip: ClipRef,
        new_start: Beats,
    },
    /// Moves several clips in the given order. Callers should list them by
    /// descending start so no move lands on a clip that has not moved yet.
    MoveMany {
        moves: Vec<ClipMove>,
    },
    /// Moves first, then resizes from the new position.
    UpdatePlacement {
        clip: ClipRef,
        #[serde(default)]
        new_start: Option<Beats>,
        #[serde(default)]
        target_duration: Option<Beats>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipMove {
    pub clip: ClipRef,
    pub new_start: Beats,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    #[serde(default)]
    pub new_start: Option<Beats>,
    #[serde(default)]
    pub target_duration: Option<Beats>,
}

/// How close an operation came to the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Full,
    /// Audio content ran out before the requested length.
    Capped,
    Unchanged,
}

/// Outcome of one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationReport {
    /// Clips the operation produced, in timeline order. These are the only
    /// references that are valid afterwards.
    pub result_clips: Vec<ClipRef>,
    pub achieved_duration: Beats,
    pub status: OperationStatus,
    pub warnings: Vec<String>,
}

impl OperationReport {
    fn unchanged(snapshot: &ClipSnapshot) -> Self {
        Self {
            result_clips: vec![snapshot.clip.clone()],
            achieved_duration: snapshot.duration(),
            status: OperationStatus::Unchanged,
            warnings: Vec::new(),
        }
    }

    /// Report of `self` followed by `next` on the clip `self` produced.
    fn followed_by(self, next: Self) -> Self {
        let status = match (self.status, next.status) {
            (_, OperationStatus::Capped) | (OperationStatus::Capped, _) => OperationStatus::Capped,
            (OperationStatus::Unchanged, OperationStatus::Unchanged) => OperationStatus::Unchanged,
            _ => OperationStatus::Full,
        };
        let mut warnings = self.warnings;
        warnings.extend(next.warnings);
        Self {
            result_clips: next.result_clips,
            achieved_duration: next.achieved_duration,
            status,
            warnings,
        }
    }
}

/// Error classes callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineErrorKind {
    ServiceUnavailable,
    InvalidReference,
    UnsupportedForClipState,
    InvalidRequest,
    Other,
}

impl From<&EngineError> for EngineErrorKind {
    fn from(value: &EngineError) -> Self {
        match value {
            EngineError::ServiceUnavailable(_) => Self::ServiceUnavailable,
            EngineError::InvalidReference { .. } => Self::InvalidReference,
            EngineError::UnsupportedForClipState { .. } => Self::UnsupportedForClipState,
            EngineError::InvalidTargetDuration { .. }
            | EngineError::InvalidPosition { .. }
            | EngineError::EmptyCutPoints
            | EngineError::SplitPointAtBoundary { .. }
            | EngineError::CutPointOutsideClip { .. } => Self::InvalidRequest,
            _ => Self::Other,
        }
    }
}

/// User-facing error payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineErrorEvent {
    pub kind: EngineErrorKind,
    pub message: String,
}

impl EngineErrorEvent {
    pub fn from_error(error: &EngineError) -> Self {
        Self {
            kind: EngineErrorKind::from(error),
            message: error.to_string(),
        }
    }
}

/// One mutex per track; operations on one track never interleave.
#[derive(Debug, Default)]
struct TrackLocks {
    tracks: Mutex<HashMap<TrackIndex, Arc<Mutex<()>>>>,
}

impl TrackLocks {
    fn for_track(&self, track: TrackIndex) -> Arc<Mutex<()>> {
        let mut tracks = self.tracks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(tracks.entry(track).or_default())
    }
}

/// Editing engine over a Timeline Service.
///
/// Methods take `&self`, so one engine can serve several threads; work on
/// the same track is serialized.
#[derive(Debug)]
pub struct Engine<S> {
    service: S,
    config: EngineConfig,
    holding: HoldingArea,
    locks: TrackLocks,
}

impl<S> Engine<S>
where
    S: TimelineService,
{
    /// Creates an engine with default settings.
    ///
    /// # Example
    /// ```
    /// use clip_engine::Engine;
    /// use clip_engine::memory::{InMemoryTimeline, TimelineFixture};
    ///
    /// let _engine = Engine::new(InMemoryTimeline::new(TimelineFixture {
    ///     tempo: 120.0,
    ///     samples: Default::default(),
    ///     tracks: Vec::new(),
    /// }));
    /// ```
    pub fn new(service: S) -> Self {
        let config = EngineConfig::default();
        Self {
            service,
            holding: HoldingArea::new(config.clone()),
            config,
            locks: TrackLocks::default(),
        }
    }

    pub fn with_config(service: S, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            service,
            holding: HoldingArea::new(config.clone()),
            config,
            locks: TrackLocks::default(),
        })
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Applies one command and returns its report.
    pub fn handle_command(&self, command: Command) -> Result<OperationReport> {
        match command {
            Command::Lengthen {
                clip,
                target_duration,
            } => self.lengthen_clip(&clip, target_duration),
            Command::Shorten {
                clip,
                target_duration,
            } => self.shorten_clip(&clip, target_duration),
            Command::Split { clip, cut_points } => self.split_clip(&clip, &cut_points),
            Command::Move { clip, new_start } => self.move_clip(&clip, new_start),
            Command::MoveMany { moves } => self.move_clips(&moves),
            Command::UpdatePlacement {
                clip,
                new_start,
                target_duration,
            } => self.update_clip_placement(
                &clip,
                Placement {
                    new_start,
                    target_duration,
                },
            ),
        }
    }

    pub fn lengthen_clip(&self, clip: &ClipRef, target: Beats) -> Result<OperationReport> {
        self.on_track(clip.track(), || {
            let snapshot = self.arrangement_snapshot(clip, "lengthen")?;
            self.lengthen_locked(&snapshot, target)
        })
    }

    pub fn shorten_clip(&self, clip: &ClipRef, target: Beats) -> Result<OperationReport> {
        self.on_track(clip.track(), || {
            let snapshot = self.arrangement_snapshot(clip, "shorten")?;
            self.shorten_locked(&snapshot, target)
        })
    }

    /// Splits `clip` at `cut_points`. Identifiers of other clips on the
    /// track are stale afterwards.
    pub fn split_clip(&self, clip: &ClipRef, cut_points: &[Beats]) -> Result<OperationReport> {
        self.on_track(clip.track(), || {
            let snapshot = self.arrangement_snapshot(clip, "split")?;
            self.holding
                .with_lease(&self.service, snapshot.track(), |lease| {
                    splitting::split(lease, &snapshot, cut_points)
                })
        })
    }

    pub fn move_clip(&self, clip: &ClipRef, new_start: Beats) -> Result<OperationReport> {
        self.on_track(clip.track(), || {
            let snapshot = self.arrangement_snapshot(clip, "move")?;
            self.move_locked(&snapshot, new_start)
        })
    }

    /// Moves clips one after another, exactly in the given order.
    pub fn move_clips(&self, moves: &[ClipMove]) -> Result<OperationReport> {
        let mut warnings = Vec::new();
        let descending = moves
            .windows(2)
            .all(|pair| pair[0].clip.anchor_start() >= pair[1].clip.anchor_start());
        if !descending {
            warn!(count = moves.len(), "moves are not in descending start order");
            warnings.push(
                "moves were not submitted in descending start order; a move may land on a clip that has not moved yet"
                    .to_string(),
            );
        }

        let tracks: Vec<TrackIndex> = moves
            .iter()
            .map(|clip_move| clip_move.clip.track())
            .collect();
        self.on_tracks(&tracks, || {
            let mut result_clips = Vec::with_capacity(moves.len());
            let mut achieved_duration = 0.0;
            let mut status = OperationStatus::Unchanged;
            for clip_move in moves {
                let snapshot = self.arrangement_snapshot(&clip_move.clip, "move")?;
                let report = self.move_locked(&snapshot, clip_move.new_start)?;
                if report.status != OperationStatus::Unchanged {
                    status = OperationStatus::Full;
                }
                achieved_duration += report.achieved_duration;
                result_clips.extend(report.result_clips);
                warnings.extend(report.warnings);
            }

            Ok(OperationReport {
                result_clips,
                achieved_duration,
                status,
                warnings,
            })
        })
    }

    /// Moves, then lengthens or shortens from the new position.
    pub fn update_clip_placement(
        &self,
        clip: &ClipRef,
        placement: Placement,
    ) -> Result<OperationReport> {
        self.on_track(clip.track(), || {
            let snapshot = self.arrangement_snapshot(clip, "update placement")?;
            if let Some(target) = placement.target_duration {
                validate_target(target)?;
            }
            if let Some(new_start) = placement.new_start {
                validate_position(new_start)?;
            }
            let mut report = OperationReport::unchanged(&snapshot);
            let mut snapshot = snapshot;

            if let Some(new_start) = placement.new_start {
                report = self.move_locked(&snapshot, new_start)?;
                let moved =
                    self.service
                        .locate(snapshot.track(), new_start, self.config.time_epsilon)?;
                snapshot = self.service.snapshot(&moved, self.config.time_epsilon)?;
            }
            if let Some(target) = placement.target_duration {
                let resized = if target < snapshot.duration() - self.config.time_epsilon {
                    self.shorten_locked(&snapshot, target)?
                } else {
                    self.lengthen_locked(&snapshot, target)?
                };
                report = report.followed_by(resized);
            }
            Ok(report)
        })
    }

    fn on_track<T>(&self, track: TrackIndex, operation: impl FnOnce() -> Result<T>) -> Result<T> {
        self.on_tracks(&[track], operation)
    }

    /// Holds every listed track's lock for the whole of `operation`. Locks
    /// are taken in ascending track order.
    fn on_tracks<T>(
        &self,
        tracks: &[TrackIndex],
        operation: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        let mut tracks = tracks.to_vec();
        tracks.sort_unstable();
        tracks.dedup();
        let locks: Vec<_> = tracks
            .iter()
            .map(|track| self.locks.for_track(*track))
            .collect();
        let _guards: Vec<_> = locks
            .iter()
            .map(|lock| lock.lock().unwrap_or_else(PoisonError::into_inner))
            .collect();
        operation()
    }

    fn arrangement_snapshot(
        &self,
        clip: &ClipRef,
        operation: &'static str,
    ) -> Result<ClipSnapshot> {
        if let ClipRef::Session { .. } = clip {
            return Err(EngineError::UnsupportedForClipState {
                operation,
                reason: "only arrangement clips can be edited",
            });
        }
        self.service.snapshot(clip, self.config.time_epsilon)
    }

    fn lengthen_locked(&self, snapshot: &ClipSnapshot, target: Beats) -> Result<OperationReport> {
        validate_target(target)?;
        if target <= snapshot.duration() + self.config.time_epsilon {
            debug!(clip = %snapshot.clip, target, "clip already long enough");
            return Ok(OperationReport::unchanged(snapshot));
        }

        let report = self
            .holding
            .with_lease(&self.service, snapshot.track(), |lease| {
                tiling::lengthen(lease, snapshot, target, self.config.probe_loop_end)
            })?;
        info!(
            clip = %snapshot.clip,
            target,
            achieved = report.achieved_duration,
            status = ?report.status,
            clip_count = report.result_clips.len(),
            "lengthen applied"
        );
        Ok(report)
    }

    fn shorten_locked(&self, snapshot: &ClipSnapshot, target: Beats) -> Result<OperationReport> {
        validate_target(target)?;
        let report = self
            .holding
            .with_lease(&self.service, snapshot.track(), |lease| {
                tiling::shorten(lease, snapshot, target)
            })?;
        info!(clip = %snapshot.clip, target, status = ?report.status, "shorten applied");
        Ok(report)
    }

    /// Duplicates the clip to `new_start` and deletes what the overlap rules
    /// left of the original.
    fn move_locked(&self, snapshot: &ClipSnapshot, new_start: Beats) -> Result<OperationReport> {
        validate_position(new_start)?;
        let epsilon = self.config.time_epsilon;
        let start = snapshot.span.start;
        let length = snapshot.duration();
        if approx_eq(new_start, start, epsilon) {
            return Ok(OperationReport::unchanged(snapshot));
        }

        let track = snapshot.track();
        let original = self.service.resolve(&snapshot.clip, epsilon)?;
        let copy = self
            .service
            .duplicate_clip(&original, ClipPosition::Arrangement { start: new_start })?;

        // A copy landing over the original's leading edge pushes the rest of
        // the original to the copy's end.
        let remnant = if new_start < start && new_start + length > start + epsilon {
            new_start + length
        } else {
            start
        };
        if let Err(error) = self.service.delete_at(track, remnant, epsilon) {
            warn!(track, remnant, %error, "could not remove moved clip's origin, removing the copy");
            if let Err(cleanup) = self.service.delete_clip(&copy) {
                warn!(track, new_start, error = %cleanup, "could not remove copy");
            }
            return Err(error);
        }

        let moved = self.service.locate(track, new_start, epsilon)?;
        info!(clip = %moved, from = start, to = new_start, "move applied");
        Ok(OperationReport {
            result_clips: vec![moved],
            achieved_duration: length,
            status: OperationStatus::Full,
            warnings: Vec::new(),
        })
    }
}

fn validate_position(start: Beats) -> Result<()> {
    if start.is_finite() && start >= 0.0 {
        Ok(())
    } else {
        Err(EngineError::InvalidPosition { start })
    }
}

fn validate_target(target: Beats) -> Result<()> {
    if target.is_finite() && target > 0.0 {
        Ok(())
    } else {
        Err(EngineError::InvalidTargetDuration { target })
    }
}
