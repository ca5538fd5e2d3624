use super::roi::translate;
use crate::core::Result;
use geo::{BoundingRect, MultiPolygon};

/// Candidate `(dx, dy)` translations: an `n`×`n` grid centered on the ROI,
/// spaced so neighbouring translated ROIs overlap by `overlap` of the
/// ROI's bounding box. Row-major, starting at the most negative offsets.
pub fn candidate_offsets(roi: &MultiPolygon<f64>, grid_points: usize, overlap: f64) -> Vec<(f64, f64)> {
    let Some(bounds) = roi.bounding_rect() else {
        return Vec::new();
    };
    let step_x = bounds.width() * (1.0 - overlap);
    let step_y = bounds.height() * (1.0 - overlap);
    let center = (grid_points as f64 - 1.0) / 2.0;

    let mut offsets = Vec::with_capacity(grid_points * grid_points);
    for row in 0..grid_points {
        for col in 0..grid_points {
            offsets.push((
                (col as f64 - center) * step_x,
                (row as f64 - center) * step_y,
            ));
        }
    }
    offsets
}

/// The candidate offset under which `total` is smallest; ties keep the
/// earlier candidate. `None` for an empty ROI.
pub fn darkest_offset<F>(
    roi: &MultiPolygon<f64>,
    grid_points: usize,
    overlap: f64,
    mut total: F,
) -> Result<Option<(f64, f64)>>
where
    F: FnMut(&MultiPolygon<f64>) -> Result<f64>,
{
    let mut best: Option<(f64, (f64, f64))> = None;
    for (dx, dy) in candidate_offsets(roi, grid_points, overlap) {
        let sum = total(&translate(roi, dx, dy))?;
        if best.is_none_or(|(best_sum, _)| sum < best_sum) {
            best = Some((sum, (dx, dy)));
        }
    }
    Ok(best.map(|(_, offset)| offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::primitives::Polyline;
    use crate::geometry::roi::{CapStyle, buffer};
    use geo::{Area, BoundingRect};

    fn square() -> MultiPolygon<f64> {
        // 4 x 4 box centered on (10, 10)
        buffer(&Polyline::from_xy(&[(8.0, 10.0), (12.0, 10.0)]), 2.0, CapStyle::Flat)
    }

    #[test]
    fn test_grid_is_centered() {
        let offsets = candidate_offsets(&square(), 3, 0.5);
        assert_eq!(offsets.len(), 9);
        assert_eq!(offsets[0], (-2.0, -2.0));
        assert_eq!(offsets[4], (0.0, 0.0));
        assert_eq!(offsets[8], (2.0, 2.0));
    }

    #[test]
    fn test_darkest_offset_minimizes_total() {
        let roi = square();
        // Brightness grows with x, so the leftmost column is darkest.
        let offset = darkest_offset(&roi, 3, 0.5, |moved| {
            let rect = moved.bounding_rect().unwrap();
            Ok(rect.min().x * moved.unsigned_area())
        })
        .unwrap();
        assert_eq!(offset, Some((-2.0, -2.0)));
    }

    #[test]
    fn test_empty_roi_has_no_offset() {
        let empty = MultiPolygon::new(Vec::new());
        let offset = darkest_offset(&empty, 5, 0.1, |_| Ok(0.0)).unwrap();
        assert_eq!(offset, None);
    }
}
