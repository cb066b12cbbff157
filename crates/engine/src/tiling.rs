//! Lengthening and shortening clips on the arrangement.

use tracing::{debug, info, warn};

use crate::api::{OperationReport, OperationStatus};
use crate::clip::{ClipPosition, ClipProperty, ClipSnapshot, ContentKind, Markers};
use crate::error::{EngineError, Result};
use crate::holding::{HoldingLease, Lane};
use crate::markers::set_markers;
use crate::prober::{ProbeSite, probe_content_extent};
use crate::service::{TimelineService, TimelineServiceExt};
use crate::time::{Beats, TimeSpan, approx_eq};

/// How a clip is brought to a longer length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthenStrategy {
    /// The target still fits inside one loop: tiles shift the start marker
    /// so each one reveals the part of the loop the previous tile hid.
    ExposeLoopPhases,
    /// Whole loop iterations are duplicated; only the last tile is trimmed.
    RepeatLoop,
    /// The end marker grows to expose more notes, then tiles walk forward
    /// through the content.
    ExtendMidi,
    /// A single replacement clip with the probed content length.
    ReplaceWarpedAudio,
    /// The loop end, in seconds, is pushed out until the host clamps it.
    StretchUnwarpedAudio,
}

impl LengthenStrategy {
    pub fn select(snapshot: &ClipSnapshot, target: Beats) -> Self {
        let loop_length = snapshot.markers.loop_length();
        match (snapshot.kind, snapshot.warped, snapshot.looping) {
            (ContentKind::Audio, false, true) => Self::RepeatLoop,
            (_, _, true) if target < loop_length => Self::ExposeLoopPhases,
            (_, _, true) => Self::RepeatLoop,
            (ContentKind::Midi, _, false) => Self::ExtendMidi,
            (ContentKind::Audio, true, false) => Self::ReplaceWarpedAudio,
            (ContentKind::Audio, false, false) => Self::StretchUnwarpedAudio,
        }
    }
}

/// Splits `[start, start + target)` into consecutive tiles of `length`,
/// the last one possibly shorter.
///
/// # Example
/// ```
/// use clip_engine::tiling::plan_tiles;
///
/// let tiles = plan_tiles(0.0, 16.0, 40.0, 1e-6);
/// assert_eq!(tiles.len(), 3);
/// assert_eq!(tiles[2].start, 32.0);
/// assert_eq!(tiles[2].end, 40.0);
/// ```
pub fn plan_tiles(start: Beats, length: Beats, target: Beats, epsilon: Beats) -> Vec<TimeSpan> {
    let mut tiles = Vec::new();
    if length <= epsilon {
        return tiles;
    }
    let mut offset = 0.0;
    while offset < target - epsilon {
        let end = (offset + length).min(target);
        tiles.push(TimeSpan::new(start + offset, start + end));
        offset += length;
    }
    tiles
}

/// Lengthens `snapshot`'s clip to `target` beats.
pub(crate) fn lengthen<S>(
    lease: &mut HoldingLease<'_, S>,
    snapshot: &ClipSnapshot,
    target: Beats,
    probe_loop_end: Beats,
) -> Result<OperationReport>
where
    S: TimelineService + ?Sized,
{
    let strategy = LengthenStrategy::select(snapshot, target);
    debug!(
        clip = %snapshot.clip,
        current = snapshot.duration(),
        target,
        ?strategy,
        "lengthening clip"
    );

    match strategy {
        LengthenStrategy::ExposeLoopPhases | LengthenStrategy::RepeatLoop => {
            let mut warnings = Vec::new();
            if !snapshot.markers_in_beats() {
                warnings.push(
                    "unwarped loop restarts at every tile; loop phase is not continued"
                        .to_string(),
                );
            }
            let epsilon = lease.epsilon();
            let tile_markers = |offset: Beats| loop_tile_markers(snapshot, offset, epsilon);
            tile(lease, snapshot, target, tile_markers, warnings)
        }
        LengthenStrategy::ExtendMidi => extend_midi(lease, snapshot, target),
        LengthenStrategy::ReplaceWarpedAudio => {
            replace_warped_audio(lease, snapshot, target, probe_loop_end)
        }
        LengthenStrategy::StretchUnwarpedAudio => stretch_unwarped_audio(lease, snapshot, target),
    }
}

/// Markers for the tile `offset` beats into a looping clip, or `None` when
/// a plain duplicate already plays the right phase.
fn loop_tile_markers(snapshot: &ClipSnapshot, offset: Beats, epsilon: Beats) -> Option<Markers> {
    if !snapshot.markers_in_beats() {
        return None;
    }
    let start_marker = snapshot.start_marker_at(offset);
    if approx_eq(start_marker, snapshot.markers.start_marker, epsilon) {
        return None;
    }
    Some(Markers {
        start_marker,
        ..snapshot.markers
    })
}

fn extend_midi<S>(
    lease: &mut HoldingLease<'_, S>,
    snapshot: &ClipSnapshot,
    target: Beats,
) -> Result<OperationReport>
where
    S: TimelineService + ?Sized,
{
    let service = lease.service();
    let markers = snapshot.markers;
    let wanted_end = markers.start_marker + target;
    if wanted_end > markers.end_marker {
        let source = service.resolve(&snapshot.clip, lease.epsilon())?;
        set_markers(
            service,
            &source,
            &Markers {
                end_marker: wanted_end,
                ..markers
            },
        )?;
    }

    let length = snapshot.duration();
    let tile_markers =
        |offset: Beats| Some(Markers::window(markers.start_marker + offset, length));
    tile(lease, snapshot, target, tile_markers, Vec::new())
}

/// Lays tiles after the clip until `target` is covered. Tile 0 is the clip
/// itself.
fn tile<S, F>(
    lease: &mut HoldingLease<'_, S>,
    snapshot: &ClipSnapshot,
    target: Beats,
    tile_markers: F,
    warnings: Vec<String>,
) -> Result<OperationReport>
where
    S: TimelineService + ?Sized,
    F: Fn(Beats) -> Option<Markers>,
{
    let service = lease.service();
    let epsilon = lease.epsilon();
    let start = snapshot.span.start;

    let mut laid = Vec::new();
    if let Err(error) = lay_tiles(lease, snapshot, target, &tile_markers, &mut laid) {
        for tile_start in laid.into_iter().rev() {
            if let Err(cleanup) = service.delete_at(snapshot.track(), tile_start, epsilon) {
                warn!(tile_start, error = %cleanup, "could not remove laid tile");
            }
        }
        return Err(error);
    }

    let clips = service.clips_starting_in(
        snapshot.track(),
        TimeSpan::new(start, start + target),
        epsilon,
    )?;
    Ok(OperationReport {
        result_clips: clips,
        achieved_duration: target,
        status: OperationStatus::Full,
        warnings,
    })
}

/// Lays every tile after the first, recording the start of each one that
/// reached the timeline in `laid`.
fn lay_tiles<S, F>(
    lease: &mut HoldingLease<'_, S>,
    snapshot: &ClipSnapshot,
    target: Beats,
    tile_markers: &F,
    laid: &mut Vec<Beats>,
) -> Result<()>
where
    S: TimelineService + ?Sized,
    F: Fn(Beats) -> Option<Markers>,
{
    let service = lease.service();
    let epsilon = lease.epsilon();
    let start = snapshot.span.start;
    let length = snapshot.duration();
    let source = snapshot.source()?;

    for tile in plan_tiles(start, length, target, epsilon).into_iter().skip(1) {
        let offset = tile.start - start;
        let markers = tile_markers(offset);
        let full = approx_eq(tile.duration(), length, epsilon);

        let original = service.resolve(&snapshot.clip, epsilon)?;
        if full && markers.is_none() {
            service.duplicate_clip(&original, ClipPosition::Arrangement { start: tile.start })?;
            laid.push(tile.start);
            debug!(tile_start = tile.start, "full tile duplicated");
            continue;
        }

        let mut staged = lease.stage_copy(&original, Lane::Work)?;
        if let Some(markers) = markers {
            set_markers(service, &staged, &markers)?;
        }
        if !full {
            let work_start = lease.lane_start(Lane::Work);
            staged = lease.right_trim(&staged, work_start + tile.duration(), &source)?;
        }
        lease.commit(&staged, tile.start)?;
        laid.push(tile.start);
        lease.discard(&staged)?;
        debug!(
            tile_start = tile.start,
            tile_length = tile.duration(),
            "staged tile committed"
        );
    }
    Ok(())
}

fn replace_warped_audio<S>(
    lease: &mut HoldingLease<'_, S>,
    snapshot: &ClipSnapshot,
    target: Beats,
    probe_loop_end: Beats,
) -> Result<OperationReport>
where
    S: TimelineService + ?Sized,
{
    let service = lease.service();
    let epsilon = lease.epsilon();
    let current = snapshot.duration();
    let source = snapshot.source()?;
    let site = ProbeSite {
        track: snapshot.track(),
        slot: lease.scratch_slot(),
        loop_end: probe_loop_end,
    };
    let extent = probe_content_extent(service, site, &source, snapshot.markers.start_marker)?;

    if extent <= current + epsilon {
        warn!(clip = %snapshot.clip, extent, target, "no audio beyond current end");
        return Ok(OperationReport {
            result_clips: vec![snapshot.clip.clone()],
            achieved_duration: current,
            status: OperationStatus::Unchanged,
            warnings: vec![format!(
                "audio content ends at the current clip end ({current} beats); requested {target}"
            )],
        });
    }

    let (achieved, status, warnings) = if extent < target - epsilon {
        warn!(clip = %snapshot.clip, extent, target, "audio content capped lengthening");
        (
            extent,
            OperationStatus::Capped,
            vec![format!(
                "audio content allows {extent} beats of the requested {target}"
            )],
        )
    } else {
        (target, OperationStatus::Full, Vec::new())
    };

    let markers = snapshot.markers;
    let exact = Markers::window(markers.start_marker, achieved);
    let original = service.resolve(&snapshot.clip, epsilon)?;
    if exact.end_marker > markers.end_marker {
        set_markers(
            service,
            &original,
            &Markers {
                end_marker: exact.end_marker,
                ..markers
            },
        )?;
    }

    let factory = service.duplicate_clip(
        &original,
        ClipPosition::Session {
            slot: lease.scratch_slot(),
        },
    )?;
    set_markers(service, &factory, &exact)?;
    service.duplicate_clip(
        &factory,
        ClipPosition::Arrangement {
            start: snapshot.span.start,
        },
    )?;
    service.delete_clip(&factory)?;

    let result = service.locate(snapshot.track(), snapshot.span.start, epsilon)?;
    info!(clip = %result, achieved, ?status, "warped audio replaced");
    Ok(OperationReport {
        result_clips: vec![result],
        achieved_duration: achieved,
        status,
        warnings,
    })
}

fn stretch_unwarped_audio<S>(
    lease: &mut HoldingLease<'_, S>,
    snapshot: &ClipSnapshot,
    target: Beats,
) -> Result<OperationReport>
where
    S: TimelineService + ?Sized,
{
    let service = lease.service();
    let epsilon = lease.epsilon();
    let clip = service.resolve(&snapshot.clip, epsilon)?;
    let current = snapshot.duration();
    let loop_start = service.get_number(&clip, ClipProperty::LoopStart)?;
    let loop_end = service.get_number(&clip, ClipProperty::LoopEnd)?;
    let seconds = loop_end - loop_start;
    if seconds <= epsilon {
        return Err(EngineError::UnexpectedValue {
            property: ClipProperty::LoopEnd.name(),
            value: format!("empty loop {loop_start}..{loop_end}"),
        });
    }

    // Beats per second as this clip plays right now.
    let ratio = current / seconds;
    let wanted_loop_end = loop_start + target / ratio;
    if wanted_loop_end > loop_end + epsilon {
        service.set_number(&clip, ClipProperty::LoopEnd, wanted_loop_end)?;
    }

    let clip = service.locate(snapshot.track(), snapshot.span.start, epsilon)?;
    let end = service.get_number(&clip, ClipProperty::EndTime)?;
    let achieved = end - snapshot.span.start;
    let (status, warnings) = if achieved <= current + epsilon {
        (
            OperationStatus::Unchanged,
            vec![format!(
                "audio content ends at the current clip end ({current} beats); requested {target}"
            )],
        )
    } else if achieved < target - epsilon {
        (
            OperationStatus::Capped,
            vec![format!(
                "audio content allows {achieved} beats of the requested {target}"
            )],
        )
    } else {
        (OperationStatus::Full, Vec::new())
    };
    if status != OperationStatus::Full {
        warn!(clip = %clip, achieved, target, ?status, "unwarped audio clamped");
    }

    Ok(OperationReport {
        result_clips: vec![clip],
        achieved_duration: achieved,
        status,
        warnings,
    })
}

/// Shortens `snapshot`'s clip to `target` beats by edge-trimming it.
pub(crate) fn shorten<S>(
    lease: &mut HoldingLease<'_, S>,
    snapshot: &ClipSnapshot,
    target: Beats,
) -> Result<OperationReport>
where
    S: TimelineService + ?Sized,
{
    let current = snapshot.duration();
    if target >= current - lease.epsilon() {
        debug!(clip = %snapshot.clip, current, target, "shorten is a no-op");
        return Ok(OperationReport {
            result_clips: vec![snapshot.clip.clone()],
            achieved_duration: current,
            status: OperationStatus::Unchanged,
            warnings: Vec::new(),
        });
    }

    let source = snapshot.source()?;
    let clip = lease.right_trim(&snapshot.clip, snapshot.span.start + target, &source)?;
    Ok(OperationReport {
        result_clips: vec![clip],
        achieved_duration: target,
        status: OperationStatus::Full,
        warnings: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{LengthenStrategy, plan_tiles};
    use crate::api::OperationStatus;
    use crate::config::EngineConfig;
    use crate::error::EngineError;
    use crate::holding::HoldingArea;
    use crate::memory::{InMemoryTimeline, SimClip, TimelineFixture, TrackFixture};
    use crate::service::TimelineServiceExt;

    fn timeline(clips: Vec<SimClip>) -> InMemoryTimeline {
        InMemoryTimeline::new(TimelineFixture {
            tempo: 120.0,
            samples: BTreeMap::from([
                ("drums.wav".to_string(), 12.0),
                ("vocal.wav".to_string(), 6.0),
            ]),
            tracks: vec![TrackFixture { clips }],
        })
    }

    fn lengthen(
        timeline: &InMemoryTimeline,
        start: f64,
        target: f64,
    ) -> crate::Result<crate::api::OperationReport> {
        let config = EngineConfig::default();
        let area = HoldingArea::new(config.clone());
        let clip = timeline.locate(0, start, 1e-6)?;
        let snapshot = timeline.snapshot(&clip, 1e-6)?;
        area.with_lease(timeline, 0, |lease| {
            super::lengthen(lease, &snapshot, target, config.probe_loop_end)
        })
    }

    fn assert_gap_free(timeline: &InMemoryTimeline, start: f64, achieved: f64) {
        let clips = timeline.clips(0);
        let mut cursor = start;
        for clip in clips.iter().filter(|clip| clip.start_time < start + achieved) {
            assert!((clip.start_time - cursor).abs() < 1e-9, "gap before {}", clip.start_time);
            cursor = clip.end_time;
        }
        assert!((cursor - (start + achieved)).abs() < 1e-9);
    }

    #[test]
    fn tiles_cover_target_without_gaps() {
        let tiles = plan_tiles(8.0, 3.0, 10.0, 1e-6);

        assert_eq!(tiles.len(), 4);
        for pair in tiles.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        assert_eq!(tiles[0].start, 8.0);
        assert_eq!(tiles[3].end, 18.0);
    }

    #[test]
    fn four_bar_loop_lengthened_to_ten_bars_yields_three_clips() {
        let timeline = timeline(vec![SimClip::midi(0.0, 16.0).with_loop(0.0, 16.0)]);

        let report = lengthen(&timeline, 0.0, 40.0).expect("lengthen should succeed");

        assert_eq!(report.status, OperationStatus::Full);
        assert_eq!(report.result_clips.len(), 3);
        assert_eq!(report.achieved_duration, 40.0);
        assert_gap_free(&timeline, 0.0, 40.0);
        assert_eq!(timeline.clips(0).len(), 3);
    }

    #[test]
    fn short_window_into_loop_exposes_following_phases() {
        let timeline = timeline(vec![SimClip::midi(0.0, 4.0).with_loop(0.0, 16.0)]);

        let report = lengthen(&timeline, 0.0, 12.0).expect("lengthen should succeed");

        assert_eq!(report.result_clips.len(), 3);
        let markers: Vec<f64> = timeline
            .clips(0)
            .iter()
            .map(|clip| clip.markers.start_marker)
            .collect();
        assert_eq!(markers, vec![0.0, 4.0, 8.0]);
    }

    #[test]
    fn unlooped_midi_tiles_walk_forward_through_content() {
        let timeline = timeline(vec![SimClip::midi(0.0, 8.0)]);

        let report = lengthen(&timeline, 0.0, 20.0).expect("lengthen should succeed");

        assert_eq!(report.status, OperationStatus::Full);
        assert_gap_free(&timeline, 0.0, 20.0);
        let windows: Vec<(f64, f64)> = timeline
            .clips(0)
            .iter()
            .map(|clip| clip.content_window(120.0))
            .collect();
        assert_eq!(windows, vec![(0.0, 8.0), (8.0, 16.0), (16.0, 20.0)]);
    }

    #[test]
    fn warped_audio_is_capped_at_probed_content() {
        // 12 seconds at 120 bpm is 24 beats, six bars.
        let timeline = timeline(vec![SimClip::warped_audio(0.0, 16.0, "drums.wav")]);

        let report = lengthen(&timeline, 0.0, 32.0).expect("lengthen should succeed");

        assert_eq!(report.status, OperationStatus::Capped);
        assert_eq!(report.achieved_duration, 24.0);
        assert!(!report.warnings.is_empty());
        let clips = timeline.clips(0);
        assert_eq!(clips.len(), 1);
        assert_eq!((clips[0].start_time, clips[0].end_time), (0.0, 24.0));
        assert!(timeline.occupied_slots(0).is_empty());
    }

    #[test]
    fn failed_tile_removes_tiles_already_laid() {
        let timeline = timeline(vec![SimClip::midi(0.0, 8.0)]);
        // Second tile's staging copy is the third duplication.
        timeline.fail_duplicate_after(3);

        let result = lengthen(&timeline, 0.0, 20.0);

        assert!(matches!(result, Err(EngineError::ServiceUnavailable(_))));
        let spans: Vec<(f64, f64)> = timeline
            .clips(0)
            .iter()
            .map(|clip| (clip.start_time, clip.end_time))
            .collect();
        assert_eq!(spans, vec![(0.0, 8.0)]);
    }

    #[test]
    fn failed_warped_replacement_clears_scratch_slot() {
        let timeline = timeline(vec![SimClip::warped_audio(0.0, 16.0, "drums.wav")]);
        // The session copy succeeds, its duplication back to the arrangement fails.
        timeline.fail_duplicate_after(2);

        let result = lengthen(&timeline, 0.0, 32.0);

        assert!(matches!(result, Err(EngineError::ServiceUnavailable(_))));
        let clips = timeline.clips(0);
        assert_eq!(clips.len(), 1);
        assert_eq!((clips[0].start_time, clips[0].end_time), (0.0, 16.0));
        assert!(timeline.occupied_slots(0).is_empty());
    }

    #[test]
    fn warped_audio_without_spare_content_is_unchanged() {
        let timeline = timeline(vec![SimClip::warped_audio(0.0, 12.0, "vocal.wav")]);

        let report = lengthen(&timeline, 0.0, 16.0).expect("lengthen should succeed");

        assert_eq!(report.status, OperationStatus::Unchanged);
        assert_eq!(report.achieved_duration, 12.0);
        assert_eq!(timeline.clips(0)[0].end_time, 12.0);
    }

    #[test]
    fn unwarped_audio_never_gets_shorter() {
        let timeline = timeline(vec![SimClip::unwarped_audio(0.0, 4.0, "vocal.wav", 120.0)]);

        let report = lengthen(&timeline, 0.0, 20.0).expect("lengthen should succeed");

        assert_eq!(report.status, OperationStatus::Capped);
        assert_eq!(report.achieved_duration, 12.0);
        assert_eq!(timeline.clips(0)[0].end_time, 12.0);

        let again = lengthen(&timeline, 0.0, 10.0).expect("lengthen should succeed");
        assert_eq!(again.status, OperationStatus::Unchanged);
        assert_eq!(timeline.clips(0)[0].end_time, 12.0);
    }

    #[test]
    fn looping_unwarped_audio_repeats_the_loop() {
        let clip = SimClip::unwarped_audio(0.0, 2.0, "vocal.wav", 120.0).with_loop(0.0, 2.0);
        let timeline = timeline(vec![clip]);
        let located = timeline.locate(0, 0.0, 1e-6).expect("clip exists");
        let snapshot = timeline
            .snapshot(&located, 1e-6)
            .expect("snapshot should succeed");

        assert_eq!(
            LengthenStrategy::select(&snapshot, 10.0),
            LengthenStrategy::RepeatLoop
        );
    }

    #[test]
    fn shortening_twice_is_idempotent() {
        let timeline = timeline(vec![SimClip::midi(0.0, 32.0)]);
        let config = EngineConfig::default();
        let area = HoldingArea::new(config);

        for _ in 0..2 {
            let clip = timeline.locate(0, 0.0, 1e-6).expect("clip exists");
            let snapshot = timeline.snapshot(&clip, 1e-6).expect("snapshot");
            area.with_lease(&timeline, 0, |lease| super::shorten(lease, &snapshot, 16.0))
                .expect("shorten should succeed");
            let clips = timeline.clips(0);
            assert_eq!(clips.len(), 1);
            assert_eq!(clips[0].end_time, 16.0);
        }
    }
}
