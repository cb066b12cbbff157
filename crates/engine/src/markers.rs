//! Marker writes that the host accepts regardless of loop state.

use tracing::{debug, warn};

use crate::clip::{ClipProperty, ClipRef, Markers};
use crate::error::Result;
use crate::service::{TimelineService, TimelineServiceExt};

/// Writes all four markers of `clip`.
///
/// The host drops start/end marker writes on clips that are not looping, so
/// looping is forced on before the first write and restored after the last.
/// The write order is loop start, loop end, start marker, end marker.
pub fn set_markers<S>(service: &S, clip: &ClipRef, markers: &Markers) -> Result<()>
where
    S: TimelineService + ?Sized,
{
    let was_looping = service.get_bool(clip, ClipProperty::Looping)?;
    if was_looping {
        return write_in_order(service, clip, markers);
    }

    service.set_bool(clip, ClipProperty::Looping, true)?;
    let written = write_in_order(service, clip, markers);
    let restored = service.set_bool(clip, ClipProperty::Looping, false);
    match (written, restored) {
        (Ok(()), restored) => restored,
        (Err(error), Ok(())) => Err(error),
        (Err(error), Err(restore_error)) => {
            warn!(clip = %clip, %restore_error, "could not restore looping after failed marker write");
            Err(error)
        }
    }
}

fn write_in_order<S>(service: &S, clip: &ClipRef, markers: &Markers) -> Result<()>
where
    S: TimelineService + ?Sized,
{
    debug!(clip = %clip, ?markers, "writing markers");
    service.set_number(clip, ClipProperty::LoopStart, markers.loop_start)?;
    service.set_number(clip, ClipProperty::LoopEnd, markers.loop_end)?;
    service.set_number(clip, ClipProperty::StartMarker, markers.start_marker)?;
    service.set_number(clip, ClipProperty::EndMarker, markers.end_marker)
}
