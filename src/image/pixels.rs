use super::volume::ImageVolume;
use crate::core::{Result, Value};
use crate::geometry::Polyline;
use crate::geometry::anchor::median;
use crate::geometry::raster::{Pixel, line_pixels, polygon_pixels};
use geo::MultiPolygon;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Aggregate {
    Sum,
    Max,
    Min,
    Mean,
    Median,
}

impl Aggregate {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Max => "max",
            Self::Min => "min",
            Self::Mean => "mean",
            Self::Median => "median",
        }
    }

    /// Reduces raw intensities. An empty set sums to zero; every other
    /// aggregate of nothing is `Null`.
    pub fn apply(&self, values: &[f64]) -> Value {
        if values.is_empty() {
            return match self {
                Self::Sum => Value::Float(0.0),
                _ => Value::Null,
            };
        }
        let result = match self {
            Self::Sum => values.iter().sum(),
            Self::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Self::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            Self::Mean => values.iter().sum::<f64>() / values.len() as f64,
            Self::Median => match median(values.to_vec()) {
                Some(m) => m,
                None => return Value::Null,
            },
        };
        Value::Float(result)
    }
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Aggregate {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "sum" => Ok(Self::Sum),
            "max" => Ok(Self::Max),
            "min" => Ok(Self::Min),
            "mean" => Ok(Self::Mean),
            "median" => Ok(Self::Median),
            other => Err(format!("unknown aggregate '{}'", other)),
        }
    }
}

/// A shape whose covered pixels are sampled.
#[derive(Debug, Clone)]
pub enum Shape {
    Polygon(MultiPolygon<f64>),
    Line(Polyline),
    Empty,
}

impl Shape {
    /// Shapes from cell values; anything that is not a polygon or a line covers nothing.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Polygon(poly) => Self::Polygon(poly.clone()),
            Value::Polyline(line) => Self::Line(line.clone()),
            _ => Self::Empty,
        }
    }

    pub fn pixels(&self) -> Vec<Pixel> {
        match self {
            Self::Polygon(poly) => polygon_pixels(poly),
            Self::Line(line) => line_pixels(line),
            Self::Empty => Vec::new(),
        }
    }
}

/// One shape to sample at a given time and z.
#[derive(Debug, Clone)]
pub struct ShapeRequest {
    pub t: i64,
    pub z: i64,
    pub shape: Shape,
}

/// Raw intensities under each requested shape, in request order.
///
/// Requests are grouped by `(t, z)` so each projected slice is fetched
/// once; the projection spans `[z - z_spread, z + z_spread]`.
pub fn gather_pixels(
    volume: &dyn ImageVolume,
    requests: &[ShapeRequest],
    channel: usize,
    z_spread: i64,
) -> Result<Vec<Vec<f64>>> {
    let mut groups: BTreeMap<(i64, i64), Vec<usize>> = BTreeMap::new();
    for (i, request) in requests.iter().enumerate() {
        groups.entry((request.t, request.z)).or_default().push(i);
    }

    let mut out = vec![Vec::new(); requests.len()];
    for ((t, z), members) in groups {
        let pixel_sets: Vec<Vec<Pixel>> = members.iter().map(|&i| requests[i].shape.pixels()).collect();
        if pixel_sets.iter().all(Vec::is_empty) {
            continue;
        }

        let slice = volume.fetch_intensity(t, channel, (z - z_spread, z + z_spread + 1))?;
        for (i, pixels) in members.into_iter().zip(pixel_sets) {
            out[i] = pixels.into_iter().map(|(x, y)| slice.get(x, y)).collect();
        }
    }
    Ok(out)
}

/// Intensities along a single line at `(t, z)`.
pub fn sample_line(
    volume: &dyn ImageVolume,
    line: &Polyline,
    t: i64,
    z: i64,
    channel: usize,
    z_spread: i64,
) -> Result<Vec<f64>> {
    let request = ShapeRequest {
        t,
        z,
        shape: Shape::Line(line.clone()),
    };
    Ok(gather_pixels(volume, &[request], channel, z_spread)?
        .pop()
        .unwrap_or_default())
}

/// Total intensity under a polygon at `(t, z)`.
pub fn polygon_sum(
    volume: &dyn ImageVolume,
    poly: &MultiPolygon<f64>,
    t: i64,
    z: i64,
    channel: usize,
    z_spread: i64,
) -> Result<f64> {
    let request = ShapeRequest {
        t,
        z,
        shape: Shape::Polygon(poly.clone()),
    };
    let values = gather_pixels(volume, &[request], channel, z_spread)?;
    Ok(values.iter().flatten().sum())
}
