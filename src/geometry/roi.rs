//! Spine ROI construction.
//!
//! The base ROI hugs the dendrite around the anchor; the head ROI follows
//! the anchor→point line past the spine head and never overlaps the base.
//! Buffers and unions are snapped to [`SNAP_GRID`] so tiny floating
//! differences never turn into slivers later on.

use super::primitives::{Point2, Polyline};
use geo::{Area, BooleanOps, Contains, Coord, MapCoords, MultiPolygon, Point, Polygon, Translate};
use std::f64::consts::PI;

/// Grid used to snap buffer and union outputs.
pub const SNAP_GRID: f64 = 0.25;

/// Half-length of the centerline piece around the anchor that forms the base ROI.
pub const BASE_HALF_LENGTH: f64 = 8.0;

const CIRCLE_SEGMENTS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapStyle {
    Flat,
    Round,
}

pub fn empty_polygon() -> MultiPolygon<f64> {
    MultiPolygon::new(Vec::new())
}

/// Area enclosed by a line buffered by `radius`. Joins are always round.
/// A zero-length line yields a disc with round caps and nothing with flat caps.
pub fn buffer(line: &Polyline, radius: f64, cap: CapStyle) -> MultiPolygon<f64> {
    if radius <= 0.0 || line.is_empty() {
        return empty_polygon();
    }

    let points: Vec<Point2> = line.points().iter().map(|p| p.xy()).collect();
    let mut pieces: Vec<Polygon<f64>> = Vec::new();

    for pair in points.windows(2) {
        if let Some(quad) = segment_quad(pair[0], pair[1], radius) {
            pieces.push(quad);
        }
    }

    let last = points.len() - 1;
    for (i, p) in points.iter().enumerate() {
        let is_end = i == 0 || i == last;
        if !is_end || cap == CapStyle::Round {
            pieces.push(circle(*p, radius));
        }
    }

    if pieces.is_empty() {
        return empty_polygon();
    }
    snap(&union_all(pieces))
}

/// Rounds every vertex to `SNAP_GRID`, then re-normalizes through a union and
/// drops slivers smaller than one grid cell.
pub fn snap(poly: &MultiPolygon<f64>) -> MultiPolygon<f64> {
    let snapped = poly.map_coords(|Coord { x, y }| Coord {
        x: (x / SNAP_GRID).round() * SNAP_GRID,
        y: (y / SNAP_GRID).round() * SNAP_GRID,
    });
    drop_slivers(snapped.union(&empty_polygon()))
}

pub fn union(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> MultiPolygon<f64> {
    snap(&a.union(b))
}

pub fn translate(poly: &MultiPolygon<f64>, dx: f64, dy: f64) -> MultiPolygon<f64> {
    poly.translate(dx, dy)
}

pub fn area(poly: &MultiPolygon<f64>) -> f64 {
    poly.unsigned_area()
}

/// Centerline within `BASE_HALF_LENGTH` of the anchor's projection, buffered
/// by `radius` with flat caps.
pub fn roi_base(segment: &Polyline, anchor: Point2, radius: f64) -> MultiPolygon<f64> {
    let root = segment.project(anchor);
    let sub = segment.substring((root - BASE_HALF_LENGTH).max(0.0), root + BASE_HALF_LENGTH);
    buffer(&sub, radius, CapStyle::Flat)
}

/// The anchor→point line extended `roi_extend` past `point`, buffered by
/// `roi_radius`, minus `base`. When the difference splits into several parts
/// only the one containing `point` survives; none containing it yields an
/// empty polygon.
pub fn roi_head(
    anchor: Point2,
    point: Point2,
    roi_extend: f64,
    roi_radius: f64,
    base: &MultiPolygon<f64>,
) -> MultiPolygon<f64> {
    let line = Polyline::new(vec![anchor.with_z(0.0), point.with_z(0.0)]).extend(0, roi_extend);
    // Round caps, so the head reaches `roi_radius` past the extended tip.
    let head = buffer(&line, roi_radius, CapStyle::Round);
    let diff = drop_slivers(head.difference(base));

    if diff.0.len() <= 1 {
        return diff;
    }

    let target = Point::new(point.x, point.y);
    diff.0
        .into_iter()
        .find(|poly| poly.contains(&target))
        .map(|poly| MultiPolygon::new(vec![poly]))
        .unwrap_or_else(empty_polygon)
}

fn union_all(pieces: Vec<Polygon<f64>>) -> MultiPolygon<f64> {
    pieces
        .into_iter()
        .fold(empty_polygon(), |acc, piece| acc.union(&MultiPolygon::new(vec![piece])))
}

fn drop_slivers(poly: MultiPolygon<f64>) -> MultiPolygon<f64> {
    let min_area = SNAP_GRID * SNAP_GRID;
    MultiPolygon::new(
        poly.0
            .into_iter()
            .filter(|p| p.unsigned_area() >= min_area)
            .collect(),
    )
}

fn segment_quad(a: Point2, b: Point2, radius: f64) -> Option<Polygon<f64>> {
    let len = a.distance(&b);
    if len == 0.0 {
        return None;
    }
    let nx = -(b.y - a.y) / len * radius;
    let ny = (b.x - a.x) / len * radius;

    let ring = vec![
        Coord { x: a.x + nx, y: a.y + ny },
        Coord { x: a.x - nx, y: a.y - ny },
        Coord { x: b.x - nx, y: b.y - ny },
        Coord { x: b.x + nx, y: b.y + ny },
        Coord { x: a.x + nx, y: a.y + ny },
    ];
    Some(Polygon::new(ring.into(), Vec::new()))
}

fn circle(center: Point2, radius: f64) -> Polygon<f64> {
    let mut ring: Vec<Coord<f64>> = (0..CIRCLE_SEGMENTS)
        .map(|i| {
            let theta = 2.0 * PI * i as f64 / CIRCLE_SEGMENTS as f64;
            Coord {
                x: center.x + radius * theta.cos(),
                y: center.y + radius * theta.sin(),
            }
        })
        .collect();
    ring.push(ring[0]);
    Polygon::new(ring.into(), Vec::new())
}
