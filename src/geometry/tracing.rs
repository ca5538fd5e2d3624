//! Rough-tracing edits. Each edit returns the new tracing, or `None` when
//! the edit is rejected and nothing should change.

use super::primitives::{Point3, Polyline};
use log::warn;

const END_TOLERANCE: f64 = 1e-9;

/// Extends the tracing at whichever end `point` projects onto, or injects
/// the projection as a new vertex when it lands inside the line. Points
/// further than `max_distance` from the tracing are rejected.
pub fn append_point(tracing: &Polyline, point: Point3, max_distance: Option<f64>) -> Option<Polyline> {
    if tracing.is_empty() {
        return Some(Polyline::new(vec![point]));
    }

    let along = tracing.project(point.xy());
    let snapped = tracing.interpolate(along)?;
    if let Some(max) = max_distance
        && point.distance_xy(&snapped) > max
    {
        warn!(
            "tracing point {} is {:.1} away from the tracing, limit is {}",
            point,
            point.distance_xy(&snapped),
            max
        );
        return None;
    }

    let length = tracing.length();
    let mut points = tracing.points().to_vec();
    if along >= length - END_TOLERANCE {
        points.push(point);
    } else if along <= END_TOLERANCE {
        points.insert(0, point);
    } else {
        return inject_point(tracing, point);
    }
    Some(Polyline::new(points))
}

/// Splits the tracing at the projection of `point`, inserting the projected
/// vertex. Projections onto an existing vertex or an end change nothing.
pub fn inject_point(tracing: &Polyline, point: Point3) -> Option<Polyline> {
    let along = tracing.project(point.xy());
    let snapped = tracing.interpolate(along)?;

    let mut walked = 0.0;
    let mut points = Vec::with_capacity(tracing.len() + 1);
    let mut inserted = false;
    for (i, p) in tracing.points().iter().enumerate() {
        if i > 0 {
            let prev = tracing.points()[i - 1];
            let next_walked = walked + prev.distance_xy(p);
            if !inserted && along > walked + END_TOLERANCE && along < next_walked - END_TOLERANCE {
                points.push(snapped);
                inserted = true;
            }
            walked = next_walked;
        }
        points.push(*p);
    }

    inserted.then(|| Polyline::new(points))
}

pub fn move_point(tracing: &Polyline, index: usize, point: Point3) -> Option<Polyline> {
    let mut points = tracing.points().to_vec();
    *points.get_mut(index)? = point;
    Some(Polyline::new(points))
}

pub fn delete_point(tracing: &Polyline, index: usize) -> Option<Polyline> {
    if index >= tracing.len() {
        return None;
    }
    let mut points = tracing.points().to_vec();
    points.remove(index);
    Some(Polyline::new(points))
}

/// Turns a rough tracing into a committed centerline.
///
/// With `live` set the optimizer may answer `None` ("not yet computable"),
/// in which case the centerline is left alone. Without it an answer is
/// required.
pub trait SegmentOptimizer {
    fn optimize(&self, rough: &Polyline, live: bool) -> Option<Polyline>;
}

/// Commits the rough tracing unchanged and never answers live requests.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughOptimizer;

impl SegmentOptimizer for PassthroughOptimizer {
    fn optimize(&self, rough: &Polyline, live: bool) -> Option<Polyline> {
        if live { None } else { Some(rough.clone()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracing() -> Polyline {
        Polyline::from_xy(&[(0.0, 0.0), (10.0, 0.0)])
    }

    #[test]
    fn test_append_to_nearest_end() {
        let after = append_point(&tracing(), Point3::new(15.0, 1.0, 2.0), None).unwrap();
        assert_eq!(after.last(), Some(&Point3::new(15.0, 1.0, 2.0)));

        let before = append_point(&tracing(), Point3::new(-3.0, 0.0, 0.0), None).unwrap();
        assert_eq!(before.first(), Some(&Point3::new(-3.0, 0.0, 0.0)));
        assert_eq!(before.len(), 3);
    }

    #[test]
    fn test_append_beyond_max_distance_is_rejected() {
        assert_eq!(append_point(&tracing(), Point3::new(200.0, 0.0, 0.0), Some(90.0)), None);
    }

    #[test]
    fn test_interior_point_splits_line() {
        let split = append_point(&tracing(), Point3::new(4.0, 3.0, 0.0), Some(90.0)).unwrap();
        assert_eq!(split, Polyline::from_xy(&[(0.0, 0.0), (4.0, 0.0), (10.0, 0.0)]));
    }

    #[test]
    fn test_first_point_of_empty_tracing() {
        let started = append_point(&Polyline::empty(), Point3::new(1.0, 2.0, 3.0), Some(1.0)).unwrap();
        assert_eq!(started.len(), 1);
    }

    #[test]
    fn test_move_and_delete_by_index() {
        let moved = move_point(&tracing(), 1, Point3::new(10.0, 5.0, 0.0)).unwrap();
        assert_eq!(moved.last(), Some(&Point3::new(10.0, 5.0, 0.0)));
        assert_eq!(move_point(&tracing(), 7, Point3::default()), None);

        let deleted = delete_point(&tracing(), 0).unwrap();
        assert_eq!(deleted.len(), 1);
        assert_eq!(delete_point(&tracing(), 2), None);
    }

    #[test]
    fn test_passthrough_optimizer() {
        let optimizer = PassthroughOptimizer;
        assert_eq!(optimizer.optimize(&tracing(), true), None);
        assert_eq!(optimizer.optimize(&tracing(), false), Some(tracing()));
    }
}
