use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, ServiceError};

/// Where a clip lives or should be placed on a track.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Location {
    Arrangement { start_time: f64 },
    Session { slot_index: usize },
}

/// Content kind requested for a freshly created clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipKind {
    Midi,
    Audio,
}

/// Address of an existing clip as understood by the remote host.
///
/// Arrangement clips are addressed by the identifier the host handed out,
/// session clips by their slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipAddress {
    pub track_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clip_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot_index: Option<usize>,
}

impl ClipAddress {
    pub fn arrangement(track_index: usize, clip_id: impl Into<String>) -> Self {
        Self {
            track_index,
            clip_id: Some(clip_id.into()),
            slot_index: None,
        }
    }

    pub fn session(track_index: usize, slot_index: usize) -> Self {
        Self {
            track_index,
            clip_id: None,
            slot_index: Some(slot_index),
        }
    }
}

/// One primitive call. Serialized as `{"type": ..., "params": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "params", rename_all = "snake_case")]
pub enum Request {
    CreateClip {
        track_index: usize,
        location: Location,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        length: Option<f64>,
        kind: ClipKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_path: Option<String>,
    },
    DuplicateClip {
        clip: ClipAddress,
        destination: Location,
    },
    DeleteClip {
        clip: ClipAddress,
    },
    GetClipProperty {
        clip: ClipAddress,
        name: String,
    },
    SetClipProperty {
        clip: ClipAddress,
        name: String,
        value: Value,
    },
    GetTrackClips {
        track_index: usize,
    },
}

impl Request {
    /// Wire name of the command, used in logs and errors.
    pub fn command(&self) -> &'static str {
        match self {
            Self::CreateClip { .. } => "create_clip",
            Self::DuplicateClip { .. } => "duplicate_clip",
            Self::DeleteClip { .. } => "delete_clip",
            Self::GetClipProperty { .. } => "get_clip_property",
            Self::SetClipProperty { .. } => "set_clip_property",
            Self::GetTrackClips { .. } => "get_track_clips",
        }
    }
}

/// Reply envelope. The host answers every request with exactly one reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Reply {
    Success {
        #[serde(default)]
        result: Value,
    },
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

pub(crate) const STALE_REFERENCE_CODE: &str = "stale_reference";

impl Reply {
    /// Unwraps a success payload or converts the error reply for `command`.
    pub fn into_result(self, command: &'static str) -> Result<Value> {
        match self {
            Self::Success { result } => Ok(result),
            Self::Error { message, code } if code.as_deref() == Some(STALE_REFERENCE_CODE) => {
                Err(ServiceError::StaleReference { command, message })
            }
            Self::Error { message, .. } => Err(ServiceError::Remote { command, message }),
        }
    }
}

/// Clip identifier returned by the host, normalized from either reply shape.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipHandle {
    pub clip_id: String,
    pub start_time: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HandleShape {
    Id(String),
    Pair(String, f64),
}

impl ClipHandle {
    /// Accepts `"id"` as well as `["id", start_time]`.
    ///
    /// # Example
    /// ```
    /// use timeline_service::ClipHandle;
    ///
    /// let pair = ClipHandle::from_value(serde_json::json!(["4", 16.0]), "example").unwrap();
    /// assert_eq!(pair.clip_id, "4");
    /// assert_eq!(pair.start_time, Some(16.0));
    ///
    /// let plain = ClipHandle::from_value(serde_json::json!("4"), "example").unwrap();
    /// assert_eq!(plain.start_time, None);
    /// ```
    pub fn from_value(value: Value, context: &'static str) -> Result<Self> {
        let shape = HandleShape::deserialize(&value).map_err(|_| ServiceError::UnexpectedReply {
            context,
            value: value.to_string(),
        })?;
        Ok(match shape {
            HandleShape::Id(clip_id) => Self {
                clip_id,
                start_time: None,
            },
            HandleShape::Pair(clip_id, start_time) => Self {
                clip_id,
                start_time: Some(start_time),
            },
        })
    }
}
