use std::fmt::{Display, Formatter};

/// Result type used by this crate.
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Error type for round trips to the remote Timeline Service.
#[derive(Debug)]
pub enum ServiceError {
    Io {
        context: &'static str,
        source: std::io::Error,
    },
    ConnectionClosed,
    TransportPoisoned,
    Encode(serde_json::Error),
    Decode {
        payload: String,
        source: serde_json::Error,
    },
    Remote {
        command: &'static str,
        message: String,
    },
    StaleReference {
        command: &'static str,
        message: String,
    },
    UnexpectedReply {
        context: &'static str,
        value: String,
    },
}

impl ServiceError {
    /// Returns true when the remote host could not be talked to at all.
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            Self::Io { .. }
                | Self::ConnectionClosed
                | Self::TransportPoisoned
                | Self::Encode(_)
                | Self::Decode { .. }
        )
    }
}

impl Display for ServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { context, source } => write!(f, "{context}: {source}"),
            Self::ConnectionClosed => write!(f, "timeline service closed the connection"),
            Self::TransportPoisoned => {
                write!(f, "transport lock poisoned by a panicked caller")
            }
            Self::Encode(err) => write!(f, "request encoding failed: {err}"),
            Self::Decode { payload, source } => {
                write!(f, "reply decoding failed ({source}): {}", payload.trim())
            }
            Self::Remote { command, message } => {
                write!(f, "timeline service rejected {command}: {message}")
            }
            Self::StaleReference { command, message } => {
                write!(f, "stale clip reference in {command}: {message}")
            }
            Self::UnexpectedReply { context, value } => {
                write!(f, "unexpected reply shape ({context}): {value}")
            }
        }
    }
}

impl std::error::Error for ServiceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Encode(err) => Some(err),
            Self::Decode { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(value: serde_json::Error) -> Self {
        Self::Encode(value)
    }
}
