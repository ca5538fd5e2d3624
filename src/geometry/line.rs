//! Planar line operations over [`Polyline`]: measuring, projecting,
//! cutting and offsetting centerlines. Z is carried by interpolation and
//! never participates in distances.

use super::primitives::{Point2, Point3, Polyline};
use geo::{Coord, LineString};
use std::fmt;

const EPSILON: f64 = 1e-9;

/// Which side of a segment's chord a point lies on. Image coordinates have
/// y pointing down, so a positive cross product reads as "Right".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
    OnLine,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Left => write!(f, "Left"),
            Self::Right => write!(f, "Right"),
            Self::OnLine => write!(f, "On the Line"),
        }
    }
}

impl Polyline {
    pub fn length(&self) -> f64 {
        self.segments().map(|(a, b)| a.distance_xy(b)).sum()
    }

    /// Distance along the line of the point closest to `p`.
    /// The first segment wins when two are equally close.
    pub fn project(&self, p: Point2) -> f64 {
        let mut best_dist = f64::INFINITY;
        let mut best_along = 0.0;
        let mut walked = 0.0;

        for (a, b) in self.segments() {
            let seg_len = a.distance_xy(b);
            let t = segment_parameter(a.xy(), b.xy(), p);
            let on = a.lerp(b, t).xy();
            let d = on.distance(&p);
            if d < best_dist - EPSILON {
                best_dist = d;
                best_along = walked + t * seg_len;
            }
            walked += seg_len;
        }
        best_along
    }

    /// Point at `distance` along the line, clamped to the line's extent.
    pub fn interpolate(&self, distance: f64) -> Option<Point3> {
        let first = *self.first()?;
        if distance <= 0.0 {
            return Some(first);
        }

        let mut walked = 0.0;
        for (a, b) in self.segments() {
            let seg_len = a.distance_xy(b);
            if walked + seg_len >= distance && seg_len > 0.0 {
                return Some(a.lerp(b, (distance - walked) / seg_len));
            }
            walked += seg_len;
        }
        self.last().copied()
    }

    /// The part of the line between two distances, both clamped to `[0, length]`.
    pub fn substring(&self, start: f64, end: f64) -> Polyline {
        let length = self.length();
        let start = start.clamp(0.0, length);
        let end = end.clamp(0.0, length);

        let (Some(head), Some(tail)) = (self.interpolate(start), self.interpolate(end)) else {
            return Polyline::empty();
        };
        if end <= start {
            return Polyline::new(vec![head]);
        }

        let mut points = vec![head];
        let mut walked = 0.0;
        for (a, b) in self.segments() {
            walked += a.distance_xy(b);
            if walked > start + EPSILON && walked < end - EPSILON {
                points.push(*b);
            }
        }
        points.push(tail);
        Polyline::new(points)
    }

    /// Uniform planar scale about `origin`; z is left as is.
    pub fn scale_about(&self, origin: Point2, factor: f64) -> Polyline {
        Polyline::new(
            self.points()
                .iter()
                .map(|p| {
                    Point3::new(
                        origin.x + (p.x - origin.x) * factor,
                        origin.y + (p.y - origin.y) * factor,
                        p.z,
                    )
                })
                .collect(),
        )
    }

    /// Grows the line by `distance` by scaling it about the vertex at `origin_idx`.
    /// A zero-length line is returned unchanged.
    pub fn extend(&self, origin_idx: usize, distance: f64) -> Polyline {
        let length = self.length();
        match self.points().get(origin_idx) {
            Some(origin) if length > 0.0 => self.scale_about(origin.xy(), 1.0 + distance / length),
            _ => self.clone(),
        }
    }

    /// Parallel curve at signed `distance`; positive offsets go to the left
    /// of the direction of travel. Joins are mitred.
    pub fn offset(&self, distance: f64) -> Polyline {
        let pts = self.points();
        if pts.len() < 2 {
            return self.clone();
        }

        let normals: Vec<Option<Point2>> = self.segments().map(|(a, b)| left_normal(a, b)).collect();

        let offset_points = pts
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let before = if i > 0 { normals[i - 1] } else { None };
                let after = normals.get(i).copied().flatten();
                let n = match (before, after) {
                    (Some(a), Some(b)) => {
                        let sum = Point2::new(a.x + b.x, a.y + b.y);
                        let len = sum.x.hypot(sum.y);
                        // cos of the half angle between the two normals
                        let cos_half = len / 2.0;
                        if len < EPSILON || cos_half < 0.1 {
                            b
                        } else {
                            Point2::new(sum.x / len / cos_half, sum.y / len / cos_half)
                        }
                    }
                    (Some(n), None) | (None, Some(n)) => n,
                    (None, None) => Point2::new(0.0, 0.0),
                };
                Point3::new(p.x + n.x * distance, p.y + n.y * distance, p.z)
            })
            .collect();
        Polyline::new(offset_points)
    }

    /// Side of `p` relative to the chord from the first to the last vertex.
    pub fn side(&self, p: Point2) -> Side {
        let (Some(a), Some(b)) = (self.first(), self.last()) else {
            return Side::OnLine;
        };
        let cross = (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x);
        if cross > 0.0 {
            Side::Right
        } else if cross < 0.0 {
            Side::Left
        } else {
            Side::OnLine
        }
    }

    /// Unit direction of travel at `distance` along the line.
    pub fn direction_at(&self, distance: f64) -> Option<Point2> {
        let mut walked = 0.0;
        let mut last = None;
        for (a, b) in self.segments() {
            let seg_len = a.distance_xy(b);
            if seg_len > 0.0 {
                last = Some(Point2::new((b.x - a.x) / seg_len, (b.y - a.y) / seg_len));
                if walked + seg_len >= distance {
                    return last;
                }
            }
            walked += seg_len;
        }
        last
    }

    /// True when no two non-adjacent segments touch.
    pub fn is_simple(&self) -> bool {
        let segs: Vec<(Point2, Point2)> = self.segments().map(|(a, b)| (a.xy(), b.xy())).collect();
        for i in 0..segs.len() {
            for j in (i + 2)..segs.len() {
                // A closed ring legitimately shares its first and last vertex.
                let closes_ring = i == 0 && j == segs.len() - 1 && segs[0].0 == segs[j].1;
                if !closes_ring && segments_intersect(segs[i], segs[j]) {
                    return false;
                }
            }
        }
        true
    }

    pub fn to_line_string(&self) -> LineString<f64> {
        LineString::new(self.points().iter().map(|p| Coord { x: p.x, y: p.y }).collect())
    }
}

/// Angle in degrees (0..=180) between the centerline direction at the
/// anchor and the anchor→point line.
pub fn spine_angle(segment: &Polyline, anchor_line: &Polyline) -> Option<f64> {
    let anchor = anchor_line.first()?.xy();
    let point = anchor_line.last()?.xy();
    let spine = Point2::new(point.x - anchor.x, point.y - anchor.y);
    let spine_len = spine.x.hypot(spine.y);
    if spine_len < EPSILON {
        return None;
    }

    let dir = segment.direction_at(segment.project(anchor))?;
    let cos = ((dir.x * spine.x + dir.y * spine.y) / spine_len).clamp(-1.0, 1.0);
    Some(cos.acos().to_degrees())
}

fn left_normal(a: &Point3, b: &Point3) -> Option<Point2> {
    let len = a.distance_xy(b);
    if len < EPSILON {
        return None;
    }
    Some(Point2::new(-(b.y - a.y) / len, (b.x - a.x) / len))
}

/// Parameter in `[0, 1]` of the point on `a..b` closest to `p`.
fn segment_parameter(a: Point2, b: Point2, p: Point2) -> f64 {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let len2 = dx * dx + dy * dy;
    if len2 == 0.0 {
        return 0.0;
    }
    (((p.x - a.x) * dx + (p.y - a.y) * dy) / len2).clamp(0.0, 1.0)
}

fn orientation(a: Point2, b: Point2, c: Point2) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

fn on_segment(a: Point2, b: Point2, p: Point2) -> bool {
    p.x >= a.x.min(b.x) - EPSILON
        && p.x <= a.x.max(b.x) + EPSILON
        && p.y >= a.y.min(b.y) - EPSILON
        && p.y <= a.y.max(b.y) + EPSILON
}

fn segments_intersect((p1, p2): (Point2, Point2), (q1, q2): (Point2, Point2)) -> bool {
    let d1 = orientation(q1, q2, p1);
    let d2 = orientation(q1, q2, p2);
    let d3 = orientation(p1, p2, q1);
    let d4 = orientation(p1, p2, q2);

    if ((d1 > EPSILON && d2 < -EPSILON) || (d1 < -EPSILON && d2 > EPSILON))
        && ((d3 > EPSILON && d4 < -EPSILON) || (d3 < -EPSILON && d4 > EPSILON))
    {
        return true;
    }

    (d1.abs() <= EPSILON && on_segment(q1, q2, p1))
        || (d2.abs() <= EPSILON && on_segment(q1, q2, p2))
        || (d3.abs() <= EPSILON && on_segment(p1, p2, q1))
        || (d4.abs() <= EPSILON && on_segment(p1, p2, q2))
}
