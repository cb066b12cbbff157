//! True content extent of audio clips.
//!
//! `end_marker` is unclamped, so the extent of a clip that has already been
//! stretched cannot be read off the clip itself. A fresh clip of the same
//! file, created in a session slot, reports the host's own idea of the
//! content length instead.

use tracing::{debug, warn};

use crate::clip::{ClipPosition, ClipProperty, ClipRef, ClipSource, TrackIndex};
use crate::error::Result;
use crate::service::{TimelineService, TimelineServiceExt};
use crate::time::Beats;

/// Parameters of one probe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeSite {
    pub track: TrackIndex,
    pub slot: usize,
    pub loop_end: Beats,
}

/// Content available from `start_marker` to the end of the source file.
///
/// The probe clip is deleted before returning, also when reading it failed.
pub fn probe_content_extent<S>(
    service: &S,
    site: ProbeSite,
    source: &ClipSource,
    start_marker: Beats,
) -> Result<Beats>
where
    S: TimelineService + ?Sized,
{
    let probe = service.create_clip(
        site.track,
        ClipPosition::Session { slot: site.slot },
        None,
        source,
    )?;
    let measured = read_end_marker(service, &probe, site.loop_end);
    if let Err(error) = service.delete_clip(&probe) {
        warn!(probe = %probe, %error, "could not delete content probe");
    }

    let extent = (measured? - start_marker).max(0.0);
    debug!(track = site.track, start_marker, extent, "content probed");
    Ok(extent)
}

fn read_end_marker<S>(service: &S, probe: &ClipRef, loop_end: Beats) -> Result<Beats>
where
    S: TimelineService + ?Sized,
{
    service.set_number(probe, ClipProperty::LoopEnd, loop_end)?;
    service.get_number(probe, ClipProperty::EndMarker)
}
