use super::primitives::{Point2, Point3, Polyline};
use crate::core::Result;
use log::debug;

/// Orthogonal projection of `point` onto the centerline, rounded to one decimal.
pub fn project_anchor(segment: &Polyline, point: Point2) -> Option<Point3> {
    segment
        .interpolate(segment.project(point))
        .map(|anchor| anchor.round(1))
}

/// Brightest-path anchor search.
///
/// Candidates run from `point` to the centerline at every integer offset in
/// `[projection - radius, projection + radius]`, clamped to the line. Each
/// candidate is scored by the median of its sampled intensities divided by
/// its length; the first best candidate wins. Returns `None` when the window
/// is empty or no candidate could be scored.
pub fn brightest_anchor<F>(
    segment: &Polyline,
    point: Point3,
    radius: i64,
    mut sample: F,
) -> Result<Option<Point3>>
where
    F: FnMut(&Polyline) -> Result<Vec<f64>>,
{
    let length = segment.length().floor() as i64;
    let projection = segment.project(point.xy()).floor() as i64;
    let lo = (projection - radius).max(0);
    let hi = (projection + radius).min(length);

    let mut best: Option<(f64, Point3)> = None;
    for offset in lo..=hi {
        let Some(target) = segment.interpolate(offset as f64) else {
            continue;
        };
        let target = target.round(1);
        let candidate = Polyline::new(vec![point, target]);
        let candidate_length = candidate.length();
        if candidate_length == 0.0 {
            continue;
        }

        let Some(median) = median(sample(&candidate)?) else {
            continue;
        };
        let score = median / candidate_length;
        if best.is_none_or(|(best_score, _)| score > best_score) {
            best = Some((score, target));
        }
    }

    if best.is_none() {
        debug!("no anchor candidate in window [{}, {}]", lo, hi);
    }
    Ok(best.map(|(_, target)| target))
}

/// Anchor for `point` on `segment`; `search` carries the brightest-path
/// radius and the intensity sampler when the search is requested.
pub fn nearest_anchor<F>(
    segment: &Polyline,
    point: Point3,
    search: Option<(i64, F)>,
) -> Result<Option<Point3>>
where
    F: FnMut(&Polyline) -> Result<Vec<f64>>,
{
    match search {
        Some((radius, sample)) => brightest_anchor(segment, point, radius, sample),
        None => Ok(project_anchor(segment, point.xy())),
    }
}

pub(crate) fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Sampler = fn(&Polyline) -> Result<Vec<f64>>;

    #[test]
    fn test_projection_is_rounded() {
        let segment = Polyline::from_xy(&[(0.0, 0.0), (10.0, 0.0)]);
        let anchor = nearest_anchor::<Sampler>(&segment, Point3::new(5.04, 1.0, 0.0), None).unwrap();
        assert_eq!(anchor, Some(Point3::new(5.0, 0.0, 0.0)));
    }

    #[test]
    fn test_brightest_prefers_bright_column() {
        let segment = Polyline::from_xy(&[(0.0, 0.0), (20.0, 0.0)]);
        // Intensity peaks where the candidate lands at x = 12.
        let sample = |line: &Polyline| -> Result<Vec<f64>> {
            let end = line.last().map(|p| p.x).unwrap_or(0.0);
            Ok(vec![if end == 12.0 { 100.0 } else { 1.0 }; 3])
        };
        let anchor = brightest_anchor(&segment, Point3::new(10.0, 3.0, 0.0), 5, sample).unwrap();
        assert_eq!(anchor, Some(Point3::new(12.0, 0.0, 0.0)));
    }

    #[test]
    fn test_uniform_intensity_picks_shortest() {
        let segment = Polyline::from_xy(&[(0.0, 0.0), (10.0, 0.0)]);
        let sample = |_: &Polyline| -> Result<Vec<f64>> { Ok(vec![100.0; 4]) };
        let anchor = brightest_anchor(&segment, Point3::new(5.0, 1.0, 0.0), 10, sample).unwrap();
        assert_eq!(anchor, Some(Point3::new(5.0, 0.0, 0.0)));
    }

    #[test]
    fn test_empty_window() {
        let segment = Polyline::empty();
        let sample = |_: &Polyline| -> Result<Vec<f64>> { Ok(vec![1.0]) };
        let anchor = brightest_anchor(&segment, Point3::new(0.0, 0.0, 0.0), 3, sample).unwrap();
        assert_eq!(anchor, None);
    }

    #[test]
    fn test_median() {
        assert_eq!(median(vec![3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(vec![4.0, 1.0, 2.0, 3.0]), Some(2.5));
        assert_eq!(median(Vec::new()), None);
    }
}
