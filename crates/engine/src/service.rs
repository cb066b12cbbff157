use serde_json::Value;
use timeline_service::{ClipAddress, ClipKind, Location, ServiceClient, Transport};
use tracing::debug;

use crate::clip::{
    ClipPosition, ClipProperty, ClipRef, ClipSnapshot, ClipSource, ContentKind, Markers,
    PropertyValue, TrackIndex,
};
use crate::error::{EngineError, Result};
use crate::time::{Beats, TimeSpan, approx_eq};

/// Primitive operations of the Timeline Service, as the engine sees them.
///
/// Implementations translate calls one to one and own no editing logic.
/// Every arrangement [`ClipRef`] returned here is valid only until the next
/// structural change on its track.
pub trait TimelineService {
    /// Creates a clip. `duration` is refused for audio in the arrangement.
    fn create_clip(
        &self,
        track: TrackIndex,
        position: ClipPosition,
        duration: Option<Beats>,
        source: &ClipSource,
    ) -> Result<ClipRef>;

    /// Duplicates `clip` to `destination` on the same track.
    fn duplicate_clip(&self, clip: &ClipRef, destination: ClipPosition) -> Result<ClipRef>;

    fn delete_clip(&self, clip: &ClipRef) -> Result<()>;

    fn get_property(&self, clip: &ClipRef, property: ClipProperty) -> Result<PropertyValue>;

    fn set_property(
        &self,
        clip: &ClipRef,
        property: ClipProperty,
        value: PropertyValue,
    ) -> Result<()>;

    /// Arrangement clips of `track` in timeline order, with fresh identifiers.
    fn query_children(&self, track: TrackIndex) -> Result<Vec<ClipRef>>;
}

/// Resolution and typed reads layered over the primitives.
pub trait TimelineServiceExt: TimelineService {
    fn get_number(&self, clip: &ClipRef, property: ClipProperty) -> Result<f64> {
        self.get_property(clip, property)?.as_number(property)
    }

    fn get_bool(&self, clip: &ClipRef, property: ClipProperty) -> Result<bool> {
        self.get_property(clip, property)?.as_bool(property)
    }

    fn set_number(&self, clip: &ClipRef, property: ClipProperty, value: f64) -> Result<()> {
        self.set_property(clip, property, PropertyValue::Number(value))
    }

    fn set_bool(&self, clip: &ClipRef, property: ClipProperty, value: bool) -> Result<()> {
        self.set_property(clip, property, PropertyValue::Bool(value))
    }

    /// Finds the arrangement clip starting at `start` from a fresh query.
    fn locate(&self, track: TrackIndex, start: Beats, epsilon: Beats) -> Result<ClipRef> {
        self.query_children(track)?
            .into_iter()
            .find(|clip| {
                clip.anchor_start()
                    .is_some_and(|anchor| approx_eq(anchor, start, epsilon))
            })
            .ok_or_else(|| EngineError::InvalidReference {
                clip: format!("no clip on track {track} starts at {start}"),
            })
    }

    /// Re-issues a reference from its anchor. Session references are stable.
    fn resolve(&self, clip: &ClipRef, epsilon: Beats) -> Result<ClipRef> {
        match clip {
            ClipRef::Arrangement { track, start, .. } => self.locate(*track, *start, epsilon),
            ClipRef::Session { .. } => Ok(clip.clone()),
        }
    }

    /// Arrangement clips whose start lies in `span`, in timeline order.
    fn clips_starting_in(
        &self,
        track: TrackIndex,
        span: TimeSpan,
        epsilon: Beats,
    ) -> Result<Vec<ClipRef>> {
        Ok(self
            .query_children(track)?
            .into_iter()
            .filter(|clip| {
                clip.anchor_start()
                    .is_some_and(|start| start > span.start - epsilon && start < span.end - epsilon)
            })
            .collect())
    }

    fn delete_at(&self, track: TrackIndex, start: Beats, epsilon: Beats) -> Result<()> {
        let clip = self.locate(track, start, epsilon)?;
        self.delete_clip(&clip)
    }

    /// Resolves `clip` and reads the state the decision table keys on.
    fn snapshot(&self, clip: &ClipRef, epsilon: Beats) -> Result<ClipSnapshot> {
        let clip = self.resolve(clip, epsilon)?;
        let start = self.get_number(&clip, ClipProperty::StartTime)?;
        let end = self.get_number(&clip, ClipProperty::EndTime)?;
        let kind = if self.get_bool(&clip, ClipProperty::IsAudioClip)? {
            ContentKind::Audio
        } else {
            ContentKind::Midi
        };
        let warped = match kind {
            ContentKind::Audio => self.get_bool(&clip, ClipProperty::Warping)?,
            ContentKind::Midi => false,
        };
        let looping = self.get_bool(&clip, ClipProperty::Looping)?;
        let markers = Markers {
            start_marker: self.get_number(&clip, ClipProperty::StartMarker)?,
            end_marker: self.get_number(&clip, ClipProperty::EndMarker)?,
            loop_start: self.get_number(&clip, ClipProperty::LoopStart)?,
            loop_end: self.get_number(&clip, ClipProperty::LoopEnd)?,
        };
        let file_path = match kind {
            ContentKind::Audio => Some(
                self.get_property(&clip, ClipProperty::FilePath)?
                    .into_text(ClipProperty::FilePath)?,
            ),
            ContentKind::Midi => None,
        };

        debug!(
            clip = %clip,
            start,
            end,
            ?kind,
            warped,
            looping,
            ?markers,
            "clip snapshot"
        );

        Ok(ClipSnapshot {
            clip,
            span: TimeSpan::new(start, end),
            kind,
            warped,
            looping,
            markers,
            file_path,
        })
    }
}

impl<S> TimelineServiceExt for S where S: TimelineService + ?Sized {}

impl<T> TimelineService for ServiceClient<T>
where
    T: Transport,
{
    fn create_clip(
        &self,
        track: TrackIndex,
        position: ClipPosition,
        duration: Option<Beats>,
        source: &ClipSource,
    ) -> Result<ClipRef> {
        let (kind, file_path) = match source {
            ClipSource::Midi => (ClipKind::Midi, None),
            ClipSource::Audio { file_path } => (ClipKind::Audio, Some(file_path.as_str())),
        };
        if kind == ClipKind::Audio
            && duration.is_some()
            && matches!(position, ClipPosition::Arrangement { .. })
        {
            return Err(EngineError::UnsupportedForClipState {
                operation: "create_clip",
                reason: "arrangement audio clips cannot be created with a duration",
            });
        }

        let handle =
            ServiceClient::create_clip(self, track, location(position), duration, kind, file_path)?;
        Ok(clip_ref_for(track, position, handle))
    }

    fn duplicate_clip(&self, clip: &ClipRef, destination: ClipPosition) -> Result<ClipRef> {
        let handle = ServiceClient::duplicate_clip(self, &address(clip), location(destination))?;
        Ok(clip_ref_for(clip.track(), destination, handle))
    }

    fn delete_clip(&self, clip: &ClipRef) -> Result<()> {
        ServiceClient::delete_clip(self, &address(clip))?;
        Ok(())
    }

    fn get_property(&self, clip: &ClipRef, property: ClipProperty) -> Result<PropertyValue> {
        let value = self.get_clip_property(&address(clip), property.name())?;
        property_value_from_json(property, value)
    }

    fn set_property(
        &self,
        clip: &ClipRef,
        property: ClipProperty,
        value: PropertyValue,
    ) -> Result<()> {
        self.set_clip_property(&address(clip), property.name(), property_value_to_json(value))?;
        Ok(())
    }

    fn query_children(&self, track: TrackIndex) -> Result<Vec<ClipRef>> {
        let mut clips = Vec::new();
        for handle in self.track_clips(track)? {
            let start = match handle.start_time {
                Some(start) => start,
                None => {
                    let address = ClipAddress::arrangement(track, handle.clip_id.clone());
                    let value = self.get_clip_property(&address, ClipProperty::StartTime.name())?;
                    property_value_from_json(ClipProperty::StartTime, value)?
                        .as_number(ClipProperty::StartTime)?
                }
            };
            clips.push(ClipRef::Arrangement {
                track,
                id: handle.clip_id,
                start,
            });
        }
        clips.sort_by(|a, b| {
            let a = a.anchor_start().unwrap_or_default();
            let b = b.anchor_start().unwrap_or_default();
            a.total_cmp(&b)
        });
        Ok(clips)
    }
}

fn address(clip: &ClipRef) -> ClipAddress {
    match clip {
        ClipRef::Arrangement { track, id, .. } => ClipAddress::arrangement(*track, id.clone()),
        ClipRef::Session { track, slot } => ClipAddress::session(*track, *slot),
    }
}

fn location(position: ClipPosition) -> Location {
    match position {
        ClipPosition::Arrangement { start } => Location::Arrangement { start_time: start },
        ClipPosition::Session { slot } => Location::Session { slot_index: slot },
    }
}

fn clip_ref_for(
    track: TrackIndex,
    position: ClipPosition,
    handle: timeline_service::ClipHandle,
) -> ClipRef {
    match position {
        ClipPosition::Arrangement { start } => ClipRef::Arrangement {
            track,
            start: handle.start_time.unwrap_or(start),
            id: handle.clip_id,
        },
        ClipPosition::Session { slot } => ClipRef::Session { track, slot },
    }
}

fn property_value_from_json(property: ClipProperty, value: Value) -> Result<PropertyValue> {
    match value {
        Value::Bool(flag) => Ok(PropertyValue::Bool(flag)),
        Value::Number(number) => {
            number
                .as_f64()
                .map(PropertyValue::Number)
                .ok_or_else(|| EngineError::UnexpectedValue {
                    property: property.name(),
                    value: number.to_string(),
                })
        }
        Value::String(text) => Ok(PropertyValue::Text(text)),
        other => Err(EngineError::UnexpectedValue {
            property: property.name(),
            value: other.to_string(),
        }),
    }
}

fn property_value_to_json(value: PropertyValue) -> Value {
    match value {
        PropertyValue::Bool(flag) => Value::Bool(flag),
        PropertyValue::Number(number) => serde_json::json!(number),
        PropertyValue::Text(text) => Value::String(text),
    }
}
