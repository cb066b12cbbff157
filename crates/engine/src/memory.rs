//! In-process Timeline Service for dry runs and tests.
//!
//! Follows the host's editing rules rather than an idealized model:
//! identifiers go stale on every structural change, interior overlaps
//! truncate instead of splitting, warped audio cannot be resized, marker
//! writes on unlooped clips are dropped, and un-looping warped audio resets
//! its loop end.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use timeline_service::ServiceError;

use crate::clip::{
    ClipPosition, ClipProperty, ClipRef, ClipSource, ContentKind, Markers, PropertyValue,
    TrackIndex,
};
use crate::error::{EngineError, Result};
use crate::service::TimelineService;
use crate::time::{Beats, Seconds, wrap_into_loop};

const OVERLAP_EPSILON: Beats = 1e-9;

/// Initial contents of a simulated set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineFixture {
    #[serde(default = "default_tempo")]
    pub tempo: f64,
    /// True length of each sample file, in seconds.
    #[serde(default)]
    pub samples: BTreeMap<String, Seconds>,
    #[serde(default)]
    pub tracks: Vec<TrackFixture>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackFixture {
    #[serde(default)]
    pub clips: Vec<SimClip>,
}

fn default_tempo() -> f64 {
    120.0
}

/// One simulated clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimClip {
    pub start_time: Beats,
    pub end_time: Beats,
    pub kind: ContentKind,
    #[serde(default)]
    pub warped: bool,
    #[serde(default)]
    pub looping: bool,
    pub markers: Markers,
    #[serde(default)]
    pub file_path: Option<String>,
}

impl SimClip {
    /// Non-looping MIDI clip playing content from beat 0.
    pub fn midi(start: Beats, end: Beats) -> Self {
        Self {
            start_time: start,
            end_time: end,
            kind: ContentKind::Midi,
            warped: false,
            looping: false,
            markers: Markers::window(0.0, end - start),
            file_path: None,
        }
    }

    /// Non-looping warped audio clip playing `file` from beat 0.
    pub fn warped_audio(start: Beats, end: Beats, file: &str) -> Self {
        Self {
            kind: ContentKind::Audio,
            warped: true,
            file_path: Some(file.to_string()),
            ..Self::midi(start, end)
        }
    }

    /// Non-looping unwarped audio clip; markers are in seconds.
    pub fn unwarped_audio(start: Beats, seconds: Seconds, file: &str, tempo: f64) -> Self {
        Self {
            start_time: start,
            end_time: start + seconds * tempo / 60.0,
            kind: ContentKind::Audio,
            warped: false,
            looping: false,
            markers: Markers::window(0.0, seconds),
            file_path: Some(file.to_string()),
        }
    }

    /// Turns looping on with the given loop.
    pub fn with_loop(mut self, loop_start: f64, loop_end: f64) -> Self {
        self.looping = true;
        self.markers.loop_start = loop_start;
        self.markers.loop_end = loop_end;
        self
    }

    fn markers_in_beats(&self) -> bool {
        self.kind == ContentKind::Midi || self.warped
    }

    fn duration(&self) -> Beats {
        self.end_time - self.start_time
    }

    /// Marker-unit range a non-looping clip plays.
    pub fn content_window(&self, tempo: f64) -> (f64, f64) {
        let length = if self.markers_in_beats() {
            self.duration()
        } else {
            self.duration() * 60.0 / tempo
        };
        (
            self.markers.start_marker,
            self.markers.start_marker + length,
        )
    }
}

/// Primitive calls observed by the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceCall {
    CreateClip,
    DuplicateClip,
    DeleteClip,
    GetProperty(ClipProperty),
    SetProperty(ClipProperty),
    QueryChildren,
}

#[derive(Debug, Default)]
struct SimTrack {
    generation: u64,
    clips: Vec<SimClip>,
    slots: BTreeMap<usize, SimClip>,
}

#[derive(Debug)]
struct SimState {
    tempo: f64,
    samples: BTreeMap<String, Seconds>,
    tracks: Vec<SimTrack>,
    calls: Vec<ServiceCall>,
    fail_duplicate_at: Option<usize>,
    duplicates: usize,
    fail_delete_at: Option<usize>,
    deletes: usize,
}

/// Simulated Timeline Service.
///
/// # Example
/// ```
/// use clip_engine::memory::{InMemoryTimeline, SimClip, TimelineFixture, TrackFixture};
/// use clip_engine::service::TimelineService;
///
/// let timeline = InMemoryTimeline::new(TimelineFixture {
///     tempo: 120.0,
///     samples: Default::default(),
///     tracks: vec![TrackFixture {
///         clips: vec![SimClip::midi(0.0, 4.0)],
///     }],
/// });
/// let clips = timeline.query_children(0).expect("track 0 exists");
/// assert_eq!(clips.len(), 1);
/// ```
#[derive(Debug)]
pub struct InMemoryTimeline {
    state: Mutex<SimState>,
}

impl InMemoryTimeline {
    pub fn new(fixture: TimelineFixture) -> Self {
        let tracks = fixture
            .tracks
            .into_iter()
            .map(|track| {
                let mut clips = track.clips;
                clips.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
                SimTrack {
                    generation: 0,
                    clips,
                    slots: BTreeMap::new(),
                }
            })
            .collect();
        Self {
            state: Mutex::new(SimState {
                tempo: fixture.tempo,
                samples: fixture.samples,
                tracks,
                calls: Vec::new(),
                fail_duplicate_at: None,
                duplicates: 0,
                fail_delete_at: None,
                deletes: 0,
            }),
        }
    }

    /// Arrangement clips of `track` in timeline order.
    pub fn clips(&self, track: TrackIndex) -> Vec<SimClip> {
        self.lock()
            .tracks
            .get(track)
            .map(|track| track.clips.clone())
            .unwrap_or_default()
    }

    pub fn occupied_slots(&self, track: TrackIndex) -> Vec<usize> {
        self.lock()
            .tracks
            .get(track)
            .map(|track| track.slots.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn tempo(&self) -> f64 {
        self.lock().tempo
    }

    pub fn calls(&self) -> Vec<ServiceCall> {
        self.lock().calls.clone()
    }

    pub fn count_calls(&self, call: ServiceCall) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|seen| **seen == call)
            .count()
    }

    pub fn reset_calls(&self) {
        self.lock().calls.clear();
    }

    /// Makes the `n`-th duplication from now (1-based) fail as if the host
    /// had gone away.
    pub fn fail_duplicate_after(&self, n: usize) {
        let mut state = self.lock();
        state.fail_duplicate_at = Some(state.duplicates + n);
    }

    /// Makes the `n`-th deletion from now (1-based) fail the same way.
    pub fn fail_delete_after(&self, n: usize) {
        let mut state = self.lock();
        state.fail_delete_at = Some(state.deletes + n);
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SimState {
    fn beats_per_second(&self) -> f64 {
        self.tempo / 60.0
    }

    fn track(&self, track: TrackIndex) -> Result<&SimTrack> {
        self.tracks.get(track).ok_or_else(|| rejected(format!("no track {track}")))
    }

    fn track_mut(&mut self, track: TrackIndex) -> Result<&mut SimTrack> {
        self.tracks
            .get_mut(track)
            .ok_or_else(|| rejected(format!("no track {track}")))
    }

    fn sample_seconds(&self, file: &str) -> Result<Seconds> {
        self.samples
            .get(file)
            .copied()
            .ok_or_else(|| rejected(format!("unknown sample {file}")))
    }

    fn arrangement_index(&self, track: TrackIndex, id: &str) -> Result<usize> {
        let sim_track = self.track(track)?;
        let stale = || EngineError::InvalidReference {
            clip: format!("{id} on track {track}"),
        };
        let mut parts = id.split(':');
        let (Some(id_track), Some(generation), Some(index), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(stale());
        };
        let matches_track = id_track.parse::<usize>().ok() == Some(track);
        let matches_generation = generation.parse::<u64>().ok() == Some(sim_track.generation);
        let index = index.parse::<usize>().map_err(|_| stale())?;
        if !matches_track || !matches_generation || index >= sim_track.clips.len() {
            return Err(stale());
        }
        Ok(index)
    }

    fn clip(&self, clip: &ClipRef) -> Result<&SimClip> {
        match clip {
            ClipRef::Arrangement { track, id, .. } => {
                let index = self.arrangement_index(*track, id)?;
                Ok(&self.tracks[*track].clips[index])
            }
            ClipRef::Session { track, slot } => self
                .track(*track)?
                .slots
                .get(slot)
                .ok_or_else(|| rejected(format!("slot {slot} on track {track} is empty"))),
        }
    }

    fn clip_mut(&mut self, clip: &ClipRef) -> Result<&mut SimClip> {
        match clip {
            ClipRef::Arrangement { track, id, .. } => {
                let index = self.arrangement_index(*track, id)?;
                Ok(&mut self.tracks[*track].clips[index])
            }
            ClipRef::Session { track, slot } => self
                .track_mut(*track)?
                .slots
                .get_mut(slot)
                .ok_or_else(|| rejected(format!("slot {slot} on track {track} is empty"))),
        }
    }

    /// Length a session clip takes when copied into the arrangement.
    fn natural_length(&self, clip: &SimClip) -> Beats {
        let span = if clip.looping {
            clip.markers.loop_length()
        } else {
            clip.markers.end_marker - clip.markers.start_marker
        };
        if clip.markers_in_beats() {
            span
        } else {
            span * self.beats_per_second()
        }
    }

    /// Places `new` on the arrangement and applies the overlap rules.
    fn place(&mut self, track: TrackIndex, mut new: SimClip) -> Result<ClipRef> {
        let bps = self.beats_per_second();
        let sim_track = self.track_mut(track)?;
        let (new_start, new_end) = (new.start_time, new.end_time);

        let mut kept = Vec::with_capacity(sim_track.clips.len() + 1);
        for mut existing in sim_track.clips.drain(..) {
            let (start, end) = (existing.start_time, existing.end_time);
            let covers_leading_edge = new_start <= start + OVERLAP_EPSILON;
            if covers_leading_edge && new_end >= end - OVERLAP_EPSILON {
                continue;
            }
            if covers_leading_edge && new_end > start + OVERLAP_EPSILON {
                advance_start(&mut existing, new_end - start, bps);
            } else if new_start > start + OVERLAP_EPSILON && new_start < end - OVERLAP_EPSILON {
                truncate(&mut existing, new_start, bps);
            }
            kept.push(existing);
        }

        new.end_time = new_end;
        kept.push(new);
        kept.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
        let index = kept
            .iter()
            .position(|clip| (clip.start_time - new_start).abs() <= OVERLAP_EPSILON)
            .unwrap_or(kept.len() - 1);

        sim_track.clips = kept;
        sim_track.generation += 1;
        Ok(ClipRef::Arrangement {
            track,
            id: clip_id(track, sim_track.generation, index),
            start: new_start,
        })
    }

    fn default_loop_end(&self, clip: &SimClip) -> f64 {
        clip.file_path
            .as_deref()
            .and_then(|file| self.samples.get(file))
            .map(|seconds| seconds * self.beats_per_second())
            .unwrap_or(clip.markers.end_marker)
    }
}

fn advance_start(clip: &mut SimClip, delta: Beats, beats_per_second: f64) {
    let in_beats = clip.markers_in_beats();
    let units = if in_beats {
        delta
    } else {
        delta / beats_per_second
    };
    let markers = &mut clip.markers;
    if clip.looping {
        markers.start_marker = wrap_into_loop(
            markers.start_marker + units,
            markers.loop_start,
            markers.loop_end,
        );
    } else {
        markers.start_marker += units;
        if !in_beats {
            markers.loop_start += units;
        }
    }
    clip.start_time += delta;
}

fn truncate(clip: &mut SimClip, new_end: Beats, beats_per_second: f64) {
    clip.end_time = new_end;
    if clip.looping {
        return;
    }
    let length = clip.duration();
    if clip.markers_in_beats() {
        clip.markers.end_marker = clip.markers.start_marker + length;
    } else {
        let seconds = length / beats_per_second;
        clip.markers.end_marker = clip.markers.start_marker + seconds;
        clip.markers.loop_end = clip.markers.loop_start + seconds;
    }
}

fn clip_id(track: TrackIndex, generation: u64, index: usize) -> String {
    format!("{track}:{generation}:{index}")
}

fn rejected(message: String) -> EngineError {
    EngineError::Rejected { message }
}

impl TimelineService for InMemoryTimeline {
    fn create_clip(
        &self,
        track: TrackIndex,
        position: ClipPosition,
        duration: Option<Beats>,
        source: &ClipSource,
    ) -> Result<ClipRef> {
        let mut state = self.lock();
        state.calls.push(ServiceCall::CreateClip);
        let bps = state.beats_per_second();

        let clip = match source {
            ClipSource::Midi => {
                let length = duration
                    .filter(|length| *length > 0.0)
                    .ok_or_else(|| rejected("midi clips need a positive length".to_string()))?;
                SimClip::midi(0.0, length).with_loop(0.0, length)
            }
            ClipSource::Audio { file_path } => {
                if duration.is_some() && matches!(position, ClipPosition::Arrangement { .. }) {
                    return Err(EngineError::UnsupportedForClipState {
                        operation: "create_clip",
                        reason: "arrangement audio clips cannot be created with a duration",
                    });
                }
                let content = state.sample_seconds(file_path)? * bps;
                SimClip::warped_audio(0.0, duration.unwrap_or(content), file_path)
            }
        };

        match position {
            ClipPosition::Arrangement { start } => {
                let length = clip.duration();
                let placed = SimClip {
                    start_time: start,
                    end_time: start + length,
                    ..clip
                };
                state.place(track, placed)
            }
            ClipPosition::Session { slot } => {
                let sim_track = state.track_mut(track)?;
                if sim_track.slots.contains_key(&slot) {
                    return Err(rejected(format!("slot {slot} on track {track} is occupied")));
                }
                sim_track.slots.insert(slot, clip);
                Ok(ClipRef::Session { track, slot })
            }
        }
    }

    fn duplicate_clip(&self, clip: &ClipRef, destination: ClipPosition) -> Result<ClipRef> {
        let mut state = self.lock();
        state.calls.push(ServiceCall::DuplicateClip);
        state.duplicates += 1;
        if state.fail_duplicate_at == Some(state.duplicates) {
            return Err(EngineError::ServiceUnavailable(ServiceError::ConnectionClosed));
        }

        let source = state.clip(clip)?.clone();
        let track = clip.track();
        match destination {
            ClipPosition::Arrangement { start } => {
                let length = match clip {
                    ClipRef::Arrangement { .. } => source.duration(),
                    ClipRef::Session { .. } => state.natural_length(&source),
                };
                let copy = SimClip {
                    start_time: start,
                    end_time: start + length,
                    ..source
                };
                state.place(track, copy)
            }
            ClipPosition::Session { slot } => {
                let sim_track = state.track_mut(track)?;
                if sim_track.slots.contains_key(&slot) {
                    return Err(rejected(format!("slot {slot} on track {track} is occupied")));
                }
                sim_track.slots.insert(slot, source);
                Ok(ClipRef::Session { track, slot })
            }
        }
    }

    fn delete_clip(&self, clip: &ClipRef) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(ServiceCall::DeleteClip);
        state.deletes += 1;
        if state.fail_delete_at == Some(state.deletes) {
            return Err(EngineError::ServiceUnavailable(ServiceError::ConnectionClosed));
        }
        match clip {
            ClipRef::Arrangement { track, id, .. } => {
                let index = state.arrangement_index(*track, id)?;
                let sim_track = &mut state.tracks[*track];
                sim_track.clips.remove(index);
                sim_track.generation += 1;
            }
            ClipRef::Session { track, slot } => {
                if state.track_mut(*track)?.slots.remove(slot).is_none() {
                    return Err(rejected(format!("slot {slot} on track {track} is empty")));
                }
            }
        }
        Ok(())
    }

    fn get_property(&self, clip: &ClipRef, property: ClipProperty) -> Result<PropertyValue> {
        let mut state = self.lock();
        state.calls.push(ServiceCall::GetProperty(property));
        let sim = state.clip(clip)?;
        let in_session = matches!(clip, ClipRef::Session { .. });

        let value = match property {
            ClipProperty::StartTime if in_session => PropertyValue::Number(0.0),
            ClipProperty::EndTime if in_session => PropertyValue::Number(state.natural_length(sim)),
            ClipProperty::StartTime => PropertyValue::Number(sim.start_time),
            ClipProperty::EndTime => PropertyValue::Number(sim.end_time),
            ClipProperty::IsAudioClip => PropertyValue::Bool(sim.kind == ContentKind::Audio),
            ClipProperty::Warping => PropertyValue::Bool(sim.warped),
            ClipProperty::Looping => PropertyValue::Bool(sim.looping),
            ClipProperty::StartMarker => PropertyValue::Number(sim.markers.start_marker),
            ClipProperty::EndMarker => PropertyValue::Number(sim.markers.end_marker),
            ClipProperty::LoopStart => PropertyValue::Number(sim.markers.loop_start),
            ClipProperty::LoopEnd => PropertyValue::Number(sim.markers.loop_end),
            ClipProperty::FilePath => match &sim.file_path {
                Some(path) => PropertyValue::Text(path.clone()),
                None => return Err(rejected("midi clips have no file path".to_string())),
            },
        };
        Ok(value)
    }

    fn set_property(
        &self,
        clip: &ClipRef,
        property: ClipProperty,
        value: PropertyValue,
    ) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(ServiceCall::SetProperty(property));
        let bps = state.beats_per_second();
        let in_arrangement = matches!(clip, ClipRef::Arrangement { .. });
        let sim = state.clip(clip)?.clone();
        let content_seconds = match &sim.file_path {
            Some(file) => Some(state.sample_seconds(file)?),
            None => None,
        };
        let default_loop_end = state.default_loop_end(&sim);
        let target = state.clip_mut(clip)?;

        match property {
            ClipProperty::Looping => {
                let looping = value.as_bool(property)?;
                if target.looping && !looping && target.kind == ContentKind::Audio && target.warped
                {
                    target.markers.loop_end = default_loop_end;
                }
                target.looping = looping;
            }
            ClipProperty::StartMarker | ClipProperty::EndMarker => {
                // Dropped silently, as the host does for unlooped clips.
                if !target.looping {
                    return Ok(());
                }
                let number = value.as_number(property)?;
                if property == ClipProperty::StartMarker {
                    target.markers.start_marker = number;
                } else {
                    target.markers.end_marker = number;
                }
            }
            ClipProperty::LoopStart | ClipProperty::LoopEnd => {
                let mut number = value.as_number(property)?;
                let unwarped_audio = target.kind == ContentKind::Audio && !target.warped;
                if unwarped_audio && property == ClipProperty::LoopEnd {
                    if let Some(limit) = content_seconds {
                        number = number.min(limit);
                    }
                }
                if property == ClipProperty::LoopStart {
                    target.markers.loop_start = number;
                } else {
                    target.markers.loop_end = number;
                }
                if unwarped_audio && !target.looping && in_arrangement {
                    target.end_time =
                        target.start_time + target.markers.loop_length().max(0.0) * bps;
                }
            }
            ClipProperty::EndTime if target.kind == ContentKind::Audio && target.warped => {
                return Err(EngineError::UnsupportedForClipState {
                    operation: "set end_time",
                    reason: "warped audio clips keep their creation length",
                });
            }
            other => {
                return Err(rejected(format!("{} is read-only", other.name())));
            }
        }
        Ok(())
    }

    fn query_children(&self, track: TrackIndex) -> Result<Vec<ClipRef>> {
        let mut state = self.lock();
        state.calls.push(ServiceCall::QueryChildren);
        let sim_track = state.track(track)?;
        Ok(sim_track
            .clips
            .iter()
            .enumerate()
            .map(|(index, clip)| ClipRef::Arrangement {
                track,
                id: clip_id(track, sim_track.generation, index),
                start: clip.start_time,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{InMemoryTimeline, SimClip, TimelineFixture, TrackFixture};
    use crate::clip::{ClipPosition, ClipProperty, ClipRef, ClipSource, PropertyValue};
    use crate::error::EngineError;
    use crate::service::{TimelineService, TimelineServiceExt};

    fn timeline(clips: Vec<SimClip>) -> InMemoryTimeline {
        InMemoryTimeline::new(TimelineFixture {
            tempo: 120.0,
            samples: BTreeMap::from([("loop.wav".to_string(), 6.0)]),
            tracks: vec![TrackFixture { clips }],
        })
    }

    #[test]
    fn interior_overlap_truncates_and_discards_the_tail() {
        let timeline = timeline(vec![SimClip::midi(0.0, 16.0)]);

        timeline
            .create_clip(
                0,
                ClipPosition::Arrangement { start: 4.0 },
                Some(2.0),
                &ClipSource::Midi,
            )
            .expect("create should succeed");

        let clips = timeline.clips(0);
        assert_eq!(clips.len(), 2);
        assert_eq!((clips[0].start_time, clips[0].end_time), (0.0, 4.0));
        assert_eq!((clips[1].start_time, clips[1].end_time), (4.0, 6.0));
    }

    #[test]
    fn leading_edge_overlap_trims_and_advances_start_marker() {
        let timeline = timeline(vec![SimClip::midi(4.0, 12.0)]);

        timeline
            .create_clip(
                0,
                ClipPosition::Arrangement { start: 4.0 },
                Some(3.0),
                &ClipSource::Midi,
            )
            .expect("create should succeed");

        let clips = timeline.clips(0);
        assert_eq!(clips[1].start_time, 7.0);
        assert_eq!(clips[1].end_time, 12.0);
        assert_eq!(clips[1].markers.start_marker, 3.0);
    }

    #[test]
    fn leading_edge_overlap_on_unwarped_audio_advances_markers_in_seconds() {
        let timeline = timeline(vec![SimClip::unwarped_audio(0.0, 6.0, "loop.wav", 120.0)]);

        timeline
            .create_clip(
                0,
                ClipPosition::Arrangement { start: 0.0 },
                Some(4.0),
                &ClipSource::Midi,
            )
            .expect("create should succeed");

        let clips = timeline.clips(0);
        assert_eq!((clips[1].start_time, clips[1].end_time), (4.0, 12.0));
        assert_eq!(clips[1].markers.start_marker, 2.0);
        assert_eq!(clips[1].markers.loop_start, 2.0);
    }

    #[test]
    fn structural_change_invalidates_other_identifiers() {
        let timeline = timeline(vec![SimClip::midi(0.0, 4.0), SimClip::midi(8.0, 12.0)]);
        let stale = timeline.locate(0, 8.0, 1e-6).expect("clip at 8 exists");

        let first = timeline.locate(0, 0.0, 1e-6).expect("clip at 0 exists");
        timeline
            .duplicate_clip(&first, ClipPosition::Arrangement { start: 20.0 })
            .expect("duplicate should succeed");

        let result = timeline.get_property(&stale, ClipProperty::StartTime);
        assert!(matches!(result, Err(EngineError::InvalidReference { .. })));
    }

    #[test]
    fn marker_write_on_unlooped_clip_is_dropped() {
        let timeline = timeline(vec![SimClip::midi(0.0, 4.0)]);
        let clip = timeline.locate(0, 0.0, 1e-6).expect("clip exists");

        timeline
            .set_property(&clip, ClipProperty::EndMarker, PropertyValue::Number(9.0))
            .expect("write is accepted");

        assert_eq!(timeline.clips(0)[0].markers.end_marker, 4.0);
    }

    #[test]
    fn unlooping_warped_audio_resets_loop_end() {
        let timeline = timeline(vec![
            SimClip::warped_audio(0.0, 4.0, "loop.wav").with_loop(0.0, 4.0),
        ]);
        let clip = timeline.locate(0, 0.0, 1e-6).expect("clip exists");

        timeline
            .set_property(&clip, ClipProperty::LoopEnd, PropertyValue::Number(2.0))
            .expect("loop end write");
        timeline
            .set_property(&clip, ClipProperty::Looping, PropertyValue::Bool(false))
            .expect("unloop");

        assert_eq!(timeline.clips(0)[0].markers.loop_end, 12.0);
    }

    #[test]
    fn warped_audio_end_time_is_immutable() {
        let timeline = timeline(vec![SimClip::warped_audio(0.0, 4.0, "loop.wav")]);
        let clip = timeline.locate(0, 0.0, 1e-6).expect("clip exists");

        let result = timeline.set_property(&clip, ClipProperty::EndTime, PropertyValue::Number(8.0));

        assert!(matches!(
            result,
            Err(EngineError::UnsupportedForClipState { .. })
        ));
    }

    #[test]
    fn unwarped_loop_end_is_clamped_at_sample_length() {
        let timeline = timeline(vec![SimClip::unwarped_audio(0.0, 2.0, "loop.wav", 120.0)]);
        let clip = timeline.locate(0, 0.0, 1e-6).expect("clip exists");

        timeline
            .set_property(&clip, ClipProperty::LoopEnd, PropertyValue::Number(10.0))
            .expect("loop end write");

        let clips = timeline.clips(0);
        assert_eq!(clips[0].markers.loop_end, 6.0);
        assert_eq!(clips[0].end_time, 12.0);
    }

    #[test]
    fn session_audio_clip_reports_true_content_as_end_marker() {
        let timeline = timeline(Vec::new());

        let probe = timeline
            .create_clip(
                0,
                ClipPosition::Session { slot: 3 },
                None,
                &ClipSource::Audio {
                    file_path: "loop.wav".to_string(),
                },
            )
            .expect("create should succeed");

        assert_eq!(probe, ClipRef::Session { track: 0, slot: 3 });
        assert_eq!(
            timeline
                .get_number(&probe, ClipProperty::EndMarker)
                .expect("read end marker"),
            12.0
        );
    }
}
