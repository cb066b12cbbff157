use std::fmt::{Display, Formatter};

use timeline_service::ServiceError;

use crate::time::Beats;

/// Result type used by the engine crate.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors produced by engine operations.
///
/// Running out of audio content while lengthening is not an error; it is
/// reported through the operation status.
#[derive(Debug)]
pub enum EngineError {
    ServiceUnavailable(ServiceError),
    InvalidReference {
        clip: String,
    },
    UnsupportedForClipState {
        operation: &'static str,
        reason: &'static str,
    },
    Rejected {
        message: String,
    },
    UnexpectedValue {
        property: &'static str,
        value: String,
    },
    InvalidTargetDuration {
        target: Beats,
    },
    InvalidPosition {
        start: Beats,
    },
    EmptyCutPoints,
    SplitPointAtBoundary {
        at: Beats,
    },
    CutPointOutsideClip {
        at: Beats,
        start: Beats,
        end: Beats,
    },
    Config {
        reason: String,
    },
}

impl Display for EngineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ServiceUnavailable(err) => write!(f, "timeline service unavailable: {err}"),
            Self::InvalidReference { clip } => write!(f, "clip reference is stale: {clip}"),
            Self::UnsupportedForClipState { operation, reason } => {
                write!(f, "{operation} is not supported for this clip: {reason}")
            }
            Self::Rejected { message } => write!(f, "timeline service rejected call: {message}"),
            Self::UnexpectedValue { property, value } => {
                write!(f, "unexpected value for {property}: {value}")
            }
            Self::InvalidTargetDuration { target } => {
                write!(f, "target duration must be positive: {target}")
            }
            Self::InvalidPosition { start } => {
                write!(f, "clip start must be a finite, non-negative beat: {start}")
            }
            Self::EmptyCutPoints => write!(f, "split requires at least one cut point"),
            Self::SplitPointAtBoundary { at } => {
                write!(f, "cannot split at clip boundary: {at}")
            }
            Self::CutPointOutsideClip { at, start, end } => {
                write!(f, "cut point {at} lies outside clip {start}..{end}")
            }
            Self::Config { reason } => write!(f, "invalid engine config: {reason}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ServiceUnavailable(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ServiceError> for EngineError {
    fn from(value: ServiceError) -> Self {
        match value {
            ServiceError::StaleReference { message, .. } => Self::InvalidReference { clip: message },
            ServiceError::Remote { command, message } => Self::Rejected {
                message: format!("{command}: {message}"),
            },
            ServiceError::UnexpectedReply { context, value } => Self::UnexpectedValue {
                property: context,
                value,
            },
            other => Self::ServiceUnavailable(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use timeline_service::ServiceError;

    use super::EngineError;

    #[test]
    fn stale_service_reference_becomes_invalid_reference() {
        let error = EngineError::from(ServiceError::StaleReference {
            command: "get_clip_property",
            message: "clip 2".to_string(),
        });
        assert!(matches!(error, EngineError::InvalidReference { .. }));
    }

    #[test]
    fn closed_connection_becomes_service_unavailable() {
        let error = EngineError::from(ServiceError::ConnectionClosed);
        assert!(matches!(error, EngineError::ServiceUnavailable(_)));
    }
}
