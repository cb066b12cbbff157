use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::time::{Beats, TimeSpan, wrap_into_loop};

/// Index of a track in the host's track list.
pub type TrackIndex = usize;

/// Reference to a clip, plus the anchor needed to find it again.
///
/// Arrangement identifiers are handed out by the service and go stale after
/// any structural change on the track, so the start time travels with them.
/// Session clips are addressed by their slot, which is stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipRef {
    Arrangement {
        track: TrackIndex,
        id: String,
        start: Beats,
    },
    Session {
        track: TrackIndex,
        slot: usize,
    },
}

impl ClipRef {
    pub fn track(&self) -> TrackIndex {
        match self {
            Self::Arrangement { track, .. } | Self::Session { track, .. } => *track,
        }
    }

    /// Arrangement start the reference was issued for.
    pub fn anchor_start(&self) -> Option<Beats> {
        match self {
            Self::Arrangement { start, .. } => Some(*start),
            Self::Session { .. } => None,
        }
    }
}

impl Display for ClipRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Arrangement { track, id, start } => {
                write!(f, "track {track} clip {id} @ {start}")
            }
            Self::Session { track, slot } => write!(f, "track {track} slot {slot}"),
        }
    }
}

/// Placement target for clip creation and duplication.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipPosition {
    Arrangement { start: Beats },
    Session { slot: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Midi,
    Audio,
}

/// What a newly created clip is made of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClipSource {
    Midi,
    Audio { file_path: String },
}

impl ClipSource {
    pub fn kind(&self) -> ContentKind {
        match self {
            Self::Midi => ContentKind::Midi,
            Self::Audio { .. } => ContentKind::Audio,
        }
    }
}

/// Clip properties the engine reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClipProperty {
    StartTime,
    EndTime,
    IsAudioClip,
    Warping,
    Looping,
    StartMarker,
    EndMarker,
    LoopStart,
    LoopEnd,
    FilePath,
}

impl ClipProperty {
    pub fn name(&self) -> &'static str {
        match self {
            Self::StartTime => "start_time",
            Self::EndTime => "end_time",
            Self::IsAudioClip => "is_audio_clip",
            Self::Warping => "warping",
            Self::Looping => "looping",
            Self::StartMarker => "start_marker",
            Self::EndMarker => "end_marker",
            Self::LoopStart => "loop_start",
            Self::LoopEnd => "loop_end",
            Self::FilePath => "file_path",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl PropertyValue {
    pub fn as_number(&self, property: ClipProperty) -> Result<f64> {
        match self {
            Self::Number(value) => Ok(*value),
            other => Err(unexpected(property, other)),
        }
    }

    pub fn as_bool(&self, property: ClipProperty) -> Result<bool> {
        match self {
            Self::Bool(value) => Ok(*value),
            // Some hosts report flags as 0/1.
            Self::Number(value) => Ok(*value != 0.0),
            other => Err(unexpected(property, other)),
        }
    }

    pub fn into_text(self, property: ClipProperty) -> Result<String> {
        match self {
            Self::Text(value) => Ok(value),
            other => Err(unexpected(property, &other)),
        }
    }
}

fn unexpected(property: ClipProperty, value: &PropertyValue) -> EngineError {
    EngineError::UnexpectedValue {
        property: property.name(),
        value: format!("{value:?}"),
    }
}

/// The four boundary markers of a clip.
///
/// Units follow the clip: beats for MIDI and warped audio, seconds for the
/// loop markers of unwarped audio.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Markers {
    pub start_marker: f64,
    pub end_marker: f64,
    pub loop_start: f64,
    pub loop_end: f64,
}

impl Markers {
    pub fn loop_length(&self) -> f64 {
        self.loop_end - self.loop_start
    }

    /// Markers of a non-looping window that plays `[from, from + length)`.
    pub fn window(from: f64, length: f64) -> Self {
        Self {
            start_marker: from,
            end_marker: from + length,
            loop_start: from,
            loop_end: from + length,
        }
    }
}

/// Everything the engine needs to know about a clip before editing it.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipSnapshot {
    pub clip: ClipRef,
    pub span: TimeSpan,
    pub kind: ContentKind,
    pub warped: bool,
    pub looping: bool,
    pub markers: Markers,
    pub file_path: Option<String>,
}

impl ClipSnapshot {
    pub fn track(&self) -> TrackIndex {
        self.clip.track()
    }

    pub fn duration(&self) -> Beats {
        self.span.duration()
    }

    /// Whether marker units are beats, so marker and arrangement math mix.
    pub fn markers_in_beats(&self) -> bool {
        self.kind == ContentKind::Midi || self.warped
    }

    /// Start marker a copy of this clip needs to continue playback `offset`
    /// beats into the clip.
    pub fn start_marker_at(&self, offset: Beats) -> f64 {
        let position = self.markers.start_marker + offset;
        if self.looping {
            wrap_into_loop(position, self.markers.loop_start, self.markers.loop_end)
        } else {
            position
        }
    }

    pub fn source(&self) -> Result<ClipSource> {
        match (self.kind, &self.file_path) {
            (ContentKind::Midi, _) => Ok(ClipSource::Midi),
            (ContentKind::Audio, Some(file_path)) => Ok(ClipSource::Audio {
                file_path: file_path.clone(),
            }),
            (ContentKind::Audio, None) => Err(EngineError::UnexpectedValue {
                property: ClipProperty::FilePath.name(),
                value: "missing for audio clip".to_string(),
            }),
        }
    }
}
