//! Clip editing engine over a remote Timeline Service.
//!
//! Lengthen, shorten, split and move are built from create, duplicate,
//! delete and property primitives whose overlap rules destroy content and
//! whose identifiers go stale after every structural change.

pub mod api;
pub mod clip;
pub mod config;
pub mod error;
pub mod holding;
pub mod markers;
pub mod memory;
pub mod prober;
pub mod service;
pub mod splitting;
pub mod tiling;
pub mod time;

pub use api::{
    ClipMove, Command, Engine, EngineErrorEvent, EngineErrorKind, OperationReport,
    OperationStatus, Placement,
};
pub use clip::{
    ClipPosition, ClipProperty, ClipRef, ClipSnapshot, ClipSource, ContentKind, Markers,
    PropertyValue, TrackIndex,
};
pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use service::{TimelineService, TimelineServiceExt};
pub use time::{Beats, Seconds, TimeSpan};
