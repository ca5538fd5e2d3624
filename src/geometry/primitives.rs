use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f64,
    pub y: f64,
}

impl Point2 {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point2) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    pub fn with_z(&self, z: f64) -> Point3 {
        Point3::new(self.x, self.y, z)
    }
}

impl fmt::Display for Point2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "POINT ({} {})", self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn xy(&self) -> Point2 {
        Point2::new(self.x, self.y)
    }

    /// Planar distance; z is carried but never measured.
    pub fn distance_xy(&self, other: &Point3) -> f64 {
        self.xy().distance(&other.xy())
    }

    pub fn round(&self, digits: i32) -> Point3 {
        Point3::new(
            round_to(self.x, digits),
            round_to(self.y, digits),
            round_to(self.z, digits),
        )
    }

    pub fn lerp(&self, other: &Point3, t: f64) -> Point3 {
        Point3::new(
            self.x + (other.x - self.x) * t,
            self.y + (other.y - self.y) * t,
            self.z + (other.z - self.z) * t,
        )
    }
}

impl From<Point2> for Point3 {
    fn from(p: Point2) -> Self {
        p.with_z(0.0)
    }
}

impl fmt::Display for Point3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "POINT Z ({} {} {})", self.x, self.y, self.z)
    }
}

pub fn round_to(value: f64, digits: i32) -> f64 {
    let factor = 10f64.powi(digits);
    (value * factor).round() / factor
}

/// An ordered run of 3D vertices. Lengths, projections and interpolation
/// are planar; z is interpolated alongside.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Polyline {
    points: Vec<Point3>,
}

impl Polyline {
    pub fn new(points: Vec<Point3>) -> Self {
        Self { points }
    }

    pub fn empty() -> Self {
        Self { points: Vec::new() }
    }

    pub fn from_xyz(coords: &[(f64, f64, f64)]) -> Self {
        Self::new(coords.iter().map(|&(x, y, z)| Point3::new(x, y, z)).collect())
    }

    pub fn from_xy(coords: &[(f64, f64)]) -> Self {
        Self::new(coords.iter().map(|&(x, y)| Point3::new(x, y, 0.0)).collect())
    }

    pub fn points(&self) -> &[Point3] {
        &self.points
    }

    pub fn into_points(self) -> Vec<Point3> {
        self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first(&self) -> Option<&Point3> {
        self.points.first()
    }

    pub fn last(&self) -> Option<&Point3> {
        self.points.last()
    }

    /// Consecutive vertex pairs.
    pub fn segments(&self) -> impl Iterator<Item = (&Point3, &Point3)> {
        self.points.windows(2).map(|w| (&w[0], &w[1]))
    }
}

impl fmt::Display for Polyline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let coords: Vec<String> = self
            .points
            .iter()
            .map(|p| format!("{} {} {}", p.x, p.y, p.z))
            .collect();
        write!(f, "LINESTRING Z ({})", coords.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_point() {
        let p = Point3::new(1.26, -3.04, 0.049).round(1);
        assert_eq!(p, Point3::new(1.3, -3.0, 0.0));
    }

    #[test]
    fn test_distance_ignores_z() {
        let a = Point3::new(0.0, 0.0, 0.0);
        let b = Point3::new(3.0, 4.0, 100.0);
        assert_eq!(a.distance_xy(&b), 5.0);
    }
}
