//! Scratch workspace far beyond real content.
//!
//! Interior overlaps destroy content, so every destructive trim of a copy
//! happens here, inside a lease's window, before the result is duplicated
//! to its real position. Edge trims are done by placing a transient clip
//! against one edge and deleting it again.

use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{debug, warn};

use crate::clip::{ClipPosition, ClipProperty, ClipRef, ClipSource, TrackIndex};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::service::{TimelineService, TimelineServiceExt};
use crate::time::{Beats, TimeSpan, approx_eq};

/// Hands out per-operation windows of the holding region.
#[derive(Debug)]
pub struct HoldingArea {
    config: EngineConfig,
    next_lease: AtomicUsize,
}

/// The two lanes of a lease: a long-lived template and a short-lived work
/// copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    Template,
    Work,
}

impl HoldingArea {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            next_lease: AtomicUsize::new(0),
        }
    }

    pub fn lease<'a, S>(&self, service: &'a S, track: TrackIndex) -> HoldingLease<'a, S>
    where
        S: TimelineService + ?Sized,
    {
        let n = self.next_lease.fetch_add(1, Ordering::Relaxed) % self.config.holding_lease_count;
        let start = self.config.holding_region_start + n as f64 * self.config.holding_lease_span;
        HoldingLease {
            service,
            track,
            window: TimeSpan::new(start, start + self.config.holding_lease_span),
            scratch_slot: self.config.scratch_slot_base + n,
            epsilon: self.config.time_epsilon,
            transients: Vec::new(),
        }
    }

    /// Runs `operation` with a fresh lease and sweeps it if the operation
    /// fails. The original error is returned unchanged.
    pub fn with_lease<S, T, F>(&self, service: &S, track: TrackIndex, operation: F) -> Result<T>
    where
        S: TimelineService + ?Sized,
        F: FnOnce(&mut HoldingLease<'_, S>) -> Result<T>,
    {
        let mut lease = self.lease(service, track);
        match operation(&mut lease) {
            Ok(value) => Ok(value),
            Err(error) => {
                warn!(track, %error, "operation failed, cleaning up holding lease");
                lease.cleanup();
                Err(error)
            }
        }
    }
}

/// One operation's share of the holding region and its scratch slot.
#[derive(Debug)]
pub struct HoldingLease<'a, S: ?Sized> {
    service: &'a S,
    track: TrackIndex,
    window: TimeSpan,
    scratch_slot: usize,
    epsilon: Beats,
    /// Starts of transient clips placed on real content and not yet removed.
    transients: Vec<Beats>,
}

impl<'a, S> HoldingLease<'a, S>
where
    S: TimelineService + ?Sized,
{
    pub fn service(&self) -> &'a S {
        self.service
    }

    pub fn track(&self) -> TrackIndex {
        self.track
    }

    pub fn epsilon(&self) -> Beats {
        self.epsilon
    }

    pub fn window(&self) -> TimeSpan {
        self.window
    }

    pub fn scratch_slot(&self) -> usize {
        self.scratch_slot
    }

    pub fn lane_start(&self, lane: Lane) -> Beats {
        match lane {
            Lane::Template => self.window.start,
            Lane::Work => self.window.start + self.lane_capacity(),
        }
    }

    pub fn lane_capacity(&self) -> Beats {
        self.window.duration() / 2.0
    }

    /// Duplicates `clip` to the start of `lane`.
    pub fn stage_copy(&mut self, clip: &ClipRef, lane: Lane) -> Result<ClipRef> {
        let clip = self.service.resolve(clip, self.epsilon)?;
        let length = self.length_of(&clip)?;
        if length > self.lane_capacity() + self.epsilon {
            return Err(EngineError::UnsupportedForClipState {
                operation: "stage_copy",
                reason: "clip is longer than a holding lane",
            });
        }

        let start = self.lane_start(lane);
        let staged = self
            .service
            .duplicate_clip(&clip, ClipPosition::Arrangement { start })?;
        debug!(track = self.track, ?lane, start, length, "staged holding copy");
        Ok(staged)
    }

    /// Duplicates a holding clip to its real position.
    pub fn commit(&mut self, holding: &ClipRef, target_start: Beats) -> Result<ClipRef> {
        let holding = self.service.resolve(holding, self.epsilon)?;
        let committed = self.service.duplicate_clip(
            &holding,
            ClipPosition::Arrangement {
                start: target_start,
            },
        )?;
        debug!(track = self.track, target_start, "committed holding copy");
        Ok(committed)
    }

    pub fn discard(&mut self, holding: &ClipRef) -> Result<()> {
        let holding = self.service.resolve(holding, self.epsilon)?;
        self.service.delete_clip(&holding)
    }

    /// Cuts `clip` so it ends at `at`, keeping its start.
    pub fn right_trim(&mut self, clip: &ClipRef, at: Beats, source: &ClipSource) -> Result<ClipRef> {
        let clip = self.service.resolve(clip, self.epsilon)?;
        let span = self.span_of(&clip)?;
        if at >= span.end - self.epsilon {
            return Ok(clip);
        }
        if at <= span.start + self.epsilon {
            return Err(EngineError::UnsupportedForClipState {
                operation: "right_trim",
                reason: "trim point would remove the whole clip",
            });
        }

        self.place_transient(TimeSpan::new(at, span.end), source)?;
        self.remove_transient(at)?;
        self.service.locate(self.track, span.start, self.epsilon)
    }

    /// Cuts `clip` so it starts at `at`, advancing its start marker.
    pub fn left_trim(&mut self, clip: &ClipRef, at: Beats, source: &ClipSource) -> Result<ClipRef> {
        let clip = self.service.resolve(clip, self.epsilon)?;
        let span = self.span_of(&clip)?;
        if at <= span.start + self.epsilon {
            return Ok(clip);
        }
        if at >= span.end - self.epsilon {
            return Err(EngineError::UnsupportedForClipState {
                operation: "left_trim",
                reason: "trim point would remove the whole clip",
            });
        }

        self.place_transient(TimeSpan::new(span.start, at), source)?;
        self.remove_transient(span.start)?;
        self.service.locate(self.track, at, self.epsilon)
    }

    /// Places a clip exactly covering `span`, made of the same content kind
    /// as `source`. Audio cannot be created with a length on the arrangement,
    /// so it is built in the scratch slot and duplicated over.
    fn place_transient(&mut self, span: TimeSpan, source: &ClipSource) -> Result<()> {
        let length = span.duration();
        let start = span.start;
        match source {
            ClipSource::Midi => {
                self.service.create_clip(
                    self.track,
                    ClipPosition::Arrangement { start },
                    Some(length),
                    source,
                )?;
            }
            ClipSource::Audio { .. } => {
                let factory = self.service.create_clip(
                    self.track,
                    ClipPosition::Session {
                        slot: self.scratch_slot,
                    },
                    Some(length),
                    source,
                )?;
                let placed = self
                    .service
                    .duplicate_clip(&factory, ClipPosition::Arrangement { start });
                let deleted = self.service.delete_clip(&factory);
                placed?;
                self.record_transient(start);
                deleted?;
            }
        }

        self.record_transient(start);
        debug!(track = self.track, start, length, "transient placed");
        Ok(())
    }

    /// Remembers a transient placed on real content so `cleanup` can find it.
    fn record_transient(&mut self, start: Beats) {
        let epsilon = self.epsilon;
        let known = self
            .transients
            .iter()
            .any(|transient| approx_eq(*transient, start, epsilon));
        if !known && !self.in_window(start) {
            self.transients.push(start);
        }
    }

    fn remove_transient(&mut self, start: Beats) -> Result<()> {
        self.service.delete_at(self.track, start, self.epsilon)?;
        let epsilon = self.epsilon;
        self.transients
            .retain(|transient| !approx_eq(*transient, start, epsilon));
        Ok(())
    }

    /// Best-effort sweep after a failed operation: everything in the lease
    /// window, the scratch slot, and transients left on real content.
    /// Failures are logged and otherwise ignored.
    pub fn cleanup(&mut self) {
        match self
            .service
            .clips_starting_in(self.track, self.window, self.epsilon)
        {
            Ok(clips) => {
                for start in clips.iter().filter_map(ClipRef::anchor_start) {
                    if let Err(error) = self.service.delete_at(self.track, start, self.epsilon) {
                        warn!(track = self.track, start, %error, "could not delete holding clip");
                    }
                }
            }
            Err(error) => {
                warn!(track = self.track, %error, "could not list holding clips");
            }
        }

        let slot = ClipRef::Session {
            track: self.track,
            slot: self.scratch_slot,
        };
        if let Err(error) = self.service.delete_clip(&slot) {
            debug!(track = self.track, slot = self.scratch_slot, %error, "scratch slot not cleared");
        }

        for start in std::mem::take(&mut self.transients) {
            if let Err(error) = self.service.delete_at(self.track, start, self.epsilon) {
                warn!(track = self.track, start, %error, "could not delete transient clip");
            }
        }
    }

    fn in_window(&self, t: Beats) -> bool {
        t >= self.window.start - self.epsilon && t < self.window.end
    }

    fn span_of(&self, clip: &ClipRef) -> Result<TimeSpan> {
        let start = self.service.get_number(clip, ClipProperty::StartTime)?;
        let end = self.service.get_number(clip, ClipProperty::EndTime)?;
        Ok(TimeSpan::new(start, end))
    }

    fn length_of(&self, clip: &ClipRef) -> Result<Beats> {
        Ok(self.span_of(clip)?.duration())
    }
}

#[cfg(test)]
mod tests {
    use super::{HoldingArea, Lane};
    use crate::clip::ClipSource;
    use crate::config::EngineConfig;
    use crate::error::EngineError;
    use crate::memory::{InMemoryTimeline, SimClip, TimelineFixture, TrackFixture};
    use crate::service::TimelineServiceExt;

    fn timeline(clips: Vec<SimClip>) -> InMemoryTimeline {
        InMemoryTimeline::new(TimelineFixture {
            tempo: 120.0,
            samples: [("pad.wav".to_string(), 8.0)].into_iter().collect(),
            tracks: vec![TrackFixture { clips }],
        })
    }

    #[test]
    fn leases_rotate_through_distinct_windows() {
        let config = EngineConfig {
            holding_lease_count: 2,
            ..EngineConfig::default()
        };
        let area = HoldingArea::new(config.clone());
        let timeline = timeline(Vec::new());

        let first = area.lease(&timeline, 0).window();
        let second = area.lease(&timeline, 0).window();
        let third = area.lease(&timeline, 0).window();

        assert_eq!(first.start, config.holding_region_start);
        assert_eq!(second.start, first.end);
        assert_eq!(third, first);
    }

    #[test]
    fn right_trim_on_real_content_leaves_no_transient() {
        let timeline = timeline(vec![SimClip::midi(0.0, 16.0), SimClip::midi(16.0, 20.0)]);
        let area = HoldingArea::new(EngineConfig::default());
        let mut lease = area.lease(&timeline, 0);
        let clip = timeline.locate(0, 0.0, 1e-6).expect("clip exists");

        lease
            .right_trim(&clip, 6.0, &ClipSource::Midi)
            .expect("trim should succeed");

        let clips = timeline.clips(0);
        assert_eq!(clips.len(), 2);
        assert_eq!((clips[0].start_time, clips[0].end_time), (0.0, 6.0));
        assert_eq!(clips[1].start_time, 16.0);
    }

    #[test]
    fn left_trim_of_audio_goes_through_the_scratch_slot() {
        let timeline = timeline(vec![SimClip::warped_audio(0.0, 16.0, "pad.wav")]);
        let area = HoldingArea::new(EngineConfig::default());
        let mut lease = area.lease(&timeline, 0);
        let clip = timeline.locate(0, 0.0, 1e-6).expect("clip exists");
        let source = ClipSource::Audio {
            file_path: "pad.wav".to_string(),
        };

        let trimmed = lease
            .left_trim(&clip, 4.0, &source)
            .expect("trim should succeed");

        assert_eq!(trimmed.anchor_start(), Some(4.0));
        let clips = timeline.clips(0);
        assert_eq!(clips.len(), 1);
        assert_eq!(clips[0].markers.start_marker, 4.0);
        assert!(timeline.occupied_slots(0).is_empty());
    }

    #[test]
    fn staging_refuses_clips_longer_than_a_lane() {
        let timeline = timeline(vec![SimClip::midi(0.0, 64.0)]);
        let config = EngineConfig {
            holding_lease_span: 64.0,
            ..EngineConfig::default()
        };
        let area = HoldingArea::new(config);
        let mut lease = area.lease(&timeline, 0);
        let clip = timeline.locate(0, 0.0, 1e-6).expect("clip exists");

        let result = lease.stage_copy(&clip, Lane::Work);

        assert!(matches!(
            result,
            Err(EngineError::UnsupportedForClipState { .. })
        ));
    }

    #[test]
    fn transient_is_removed_when_scratch_slot_delete_fails() {
        let timeline = timeline(vec![SimClip::warped_audio(0.0, 16.0, "pad.wav")]);
        let area = HoldingArea::new(EngineConfig::default());
        let source = ClipSource::Audio {
            file_path: "pad.wav".to_string(),
        };
        timeline.fail_delete_after(1);

        let result = area.with_lease(&timeline, 0, |lease| {
            let clip = timeline.locate(0, 0.0, 1e-6)?;
            lease.right_trim(&clip, 6.0, &source)
        });

        assert!(matches!(result, Err(EngineError::ServiceUnavailable(_))));
        let spans: Vec<(f64, f64)> = timeline
            .clips(0)
            .iter()
            .map(|clip| (clip.start_time, clip.end_time))
            .collect();
        assert_eq!(spans, vec![(0.0, 6.0)]);
        assert!(timeline.occupied_slots(0).is_empty());
    }

    #[test]
    fn failed_operation_sweeps_window_and_scratch_slot() {
        let timeline = timeline(vec![SimClip::midi(0.0, 8.0)]);
        let config = EngineConfig::default();
        let area = HoldingArea::new(config.clone());

        let result: crate::Result<()> = area.with_lease(&timeline, 0, |lease| {
            let clip = timeline.locate(0, 0.0, 1e-6)?;
            lease.stage_copy(&clip, Lane::Template)?;
            lease.stage_copy(&clip, Lane::Work)?;
            Err(EngineError::Rejected {
                message: "boom".to_string(),
            })
        });

        assert!(matches!(result, Err(EngineError::Rejected { .. })));
        let clips = timeline.clips(0);
        assert_eq!(clips.len(), 1);
        assert!(clips[0].start_time < config.holding_region_start);
    }
}
