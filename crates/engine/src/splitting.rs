//! Splitting one clip into independent clips at interior cut points.
//!
//! One holding copy serves as a template for every segment after the first,
//! so N cut points cost 2N duplications for MIDI. Audio edge trims need a
//! transient duplicated in from a session slot, which adds one duplication
//! per trim.

use tracing::{debug, info};

use crate::api::{OperationReport, OperationStatus};
use crate::clip::ClipSnapshot;
use crate::error::{EngineError, Result};
use crate::holding::{HoldingLease, Lane};
use crate::service::{TimelineService, TimelineServiceExt};
use crate::time::{Beats, TimeSpan, approx_eq};

/// Sorts and deduplicates `cut_points` and checks they are interior.
///
/// # Example
/// ```
/// use clip_engine::splitting::normalize_cut_points;
/// use clip_engine::time::TimeSpan;
///
/// let points = normalize_cut_points(&[12.0, 4.0, 4.0], TimeSpan::new(0.0, 16.0), 1e-6)
///     .expect("points are interior");
/// assert_eq!(points, vec![4.0, 12.0]);
/// ```
pub fn normalize_cut_points(
    cut_points: &[Beats],
    span: TimeSpan,
    epsilon: Beats,
) -> Result<Vec<Beats>> {
    if cut_points.is_empty() {
        return Err(EngineError::EmptyCutPoints);
    }

    let mut points = Vec::with_capacity(cut_points.len());
    for &at in cut_points {
        if !at.is_finite() || at < span.start - epsilon || at > span.end + epsilon {
            return Err(EngineError::CutPointOutsideClip {
                at,
                start: span.start,
                end: span.end,
            });
        }
        if !span.contains_interior(at, epsilon) {
            return Err(EngineError::SplitPointAtBoundary { at });
        }
        points.push(at);
    }
    points.sort_by(f64::total_cmp);
    points.dedup_by(|a, b| approx_eq(*a, *b, epsilon));
    Ok(points)
}

/// Splits `snapshot`'s clip at `cut_points` (absolute arrangement times).
pub(crate) fn split<S>(
    lease: &mut HoldingLease<'_, S>,
    snapshot: &ClipSnapshot,
    cut_points: &[Beats],
) -> Result<OperationReport>
where
    S: TimelineService + ?Sized,
{
    let service = lease.service();
    let epsilon = lease.epsilon();
    let points = normalize_cut_points(cut_points, snapshot.span, epsilon)?;
    let source = snapshot.source()?;
    let start = snapshot.span.start;
    let template_start = lease.lane_start(Lane::Template);
    let work_start = lease.lane_start(Lane::Work);

    let template = lease.stage_copy(&snapshot.clip, Lane::Template)?;
    lease.right_trim(&snapshot.clip, points[0], &source)?;
    debug!(clip = %snapshot.clip, first_cut = points[0], "first segment kept in place");

    for pair in points.windows(2) {
        let (from, to) = (pair[0], pair[1]);
        let piece = lease.stage_copy(&template, Lane::Work)?;
        let piece = lease.right_trim(&piece, work_start + (to - start), &source)?;
        let piece = lease.left_trim(&piece, work_start + (from - start), &source)?;
        lease.commit(&piece, from)?;
        lease.discard(&piece)?;
        debug!(from, to, "interior segment committed");
    }

    let last = points[points.len() - 1];
    let tail = lease.left_trim(&template, template_start + (last - start), &source)?;
    lease.commit(&tail, last)?;
    lease.discard(&tail)?;

    let segments = service.clips_starting_in(snapshot.track(), snapshot.span, epsilon)?;
    info!(
        clip = %snapshot.clip,
        cut_count = points.len(),
        segment_count = segments.len(),
        "split applied"
    );
    Ok(OperationReport {
        result_clips: segments,
        achieved_duration: snapshot.duration(),
        status: OperationStatus::Full,
        warnings: Vec::new(),
    })
}
