use crate::geometry::{Point2, Point3, Polyline};
use chrono::{DateTime, TimeZone, Utc};
use geo::MultiPolygon;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single cell. Each variant corresponds to one [`DataType`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
    Point2(Point2),
    Point3(Point3),
    Polyline(Polyline),
    Polygon(MultiPolygon<f64>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Integer(_) => "INTEGER",
            Self::Float(_) => "FLOAT",
            Self::Text(_) => "TEXT",
            Self::Boolean(_) => "BOOLEAN",
            Self::Timestamp(_) => "TIMESTAMP",
            Self::Point2(_) => "POINT",
            Self::Point3(_) => "POINT Z",
            Self::Polyline(_) => "LINESTRING",
            Self::Polygon(_) => "POLYGON",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            Self::Float(f) if f.is_finite() => Some(f.trunc() as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_point2(&self) -> Option<Point2> {
        match self {
            Self::Point2(p) => Some(*p),
            Self::Point3(p) => Some(p.xy()),
            _ => None,
        }
    }

    pub fn as_point3(&self) -> Option<Point3> {
        match self {
            Self::Point3(p) => Some(*p),
            Self::Point2(p) => Some(p.with_z(0.0)),
            _ => None,
        }
    }

    pub fn as_polyline(&self) -> Option<&Polyline> {
        match self {
            Self::Polyline(line) => Some(line),
            _ => None,
        }
    }

    pub fn as_polygon(&self) -> Option<&MultiPolygon<f64>> {
        match self {
            Self::Polygon(poly) => Some(poly),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    /// Exact equality; NaN equals NaN so an untouched NaN cell never shows up as a change.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => (a.is_nan() && b.is_nan()) || a == b,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Timestamp(a), Self::Timestamp(b)) => a == b,
            (Self::Point2(a), Self::Point2(b)) => a == b,
            (Self::Point3(a), Self::Point3(b)) => a == b,
            (Self::Polyline(a), Self::Polyline(b)) => a == b,
            (Self::Polygon(a), Self::Polygon(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Float(fl) => {
                if fl.is_nan() {
                    write!(f, "NaN")
                } else {
                    write!(f, "{}", fl)
                }
            }
            Self::Text(s) => write!(f, "{}", s),
            Self::Boolean(b) => write!(f, "{}", b),
            Self::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339()),
            Self::Point2(p) => write!(f, "{}", p),
            Self::Point3(p) => write!(f, "{}", p),
            Self::Polyline(line) => write!(f, "{}", line),
            Self::Polygon(poly) => write!(f, "POLYGON[{}]", poly.0.len()),
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(ts: DateTime<Utc>) -> Self {
        Self::Timestamp(ts)
    }
}

impl From<Point2> for Value {
    fn from(p: Point2) -> Self {
        Self::Point2(p)
    }
}

impl From<Point3> for Value {
    fn from(p: Point3) -> Self {
        Self::Point3(p)
    }
}

impl From<Polyline> for Value {
    fn from(line: Polyline) -> Self {
        Self::Polyline(line)
    }
}

impl From<MultiPolygon<f64>> for Value {
    fn from(poly: MultiPolygon<f64>) -> Self {
        Self::Polygon(poly)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Integer,
    Float,
    Text,
    Boolean,
    Timestamp,
    Point2,
    Point3,
    Polyline,
    Polygon,
}

impl DataType {
    /// Casts `value` to this type. `None` means the value cannot be coerced.
    /// `Null` passes through untouched so defaults can fill it afterwards.
    pub fn coerce(&self, value: Value) -> Option<Value> {
        match (self, value) {
            (_, Value::Null) => Some(Value::Null),

            (Self::Integer, Value::Integer(i)) => Some(Value::Integer(i)),
            (Self::Integer, Value::Float(f)) if f.is_finite() => Some(Value::Integer(f.trunc() as i64)),
            (Self::Integer, Value::Boolean(b)) => Some(Value::Integer(i64::from(b))),

            (Self::Float, Value::Float(f)) => Some(Value::Float(f)),
            (Self::Float, Value::Integer(i)) => Some(Value::Float(i as f64)),

            (Self::Text, Value::Text(s)) => Some(Value::Text(s)),
            (Self::Text, v @ (Value::Integer(_) | Value::Float(_) | Value::Boolean(_))) => {
                Some(Value::Text(v.to_string()))
            }

            (Self::Boolean, Value::Boolean(b)) => Some(Value::Boolean(b)),
            (Self::Boolean, Value::Integer(0)) => Some(Value::Boolean(false)),
            (Self::Boolean, Value::Integer(1)) => Some(Value::Boolean(true)),

            (Self::Timestamp, Value::Timestamp(ts)) => Some(Value::Timestamp(ts)),
            (Self::Timestamp, Value::Integer(millis)) => {
                Utc.timestamp_millis_opt(millis).single().map(Value::Timestamp)
            }
            (Self::Timestamp, Value::Text(s)) => DateTime::parse_from_rfc3339(&s)
                .ok()
                .map(|dt| Value::Timestamp(dt.with_timezone(&Utc))),

            (Self::Point2, Value::Point2(p)) => Some(Value::Point2(p)),
            (Self::Point2, Value::Point3(p)) => Some(Value::Point2(p.xy())),

            (Self::Point3, Value::Point3(p)) => Some(Value::Point3(p)),
            (Self::Point3, Value::Point2(p)) => Some(Value::Point3(p.with_z(0.0))),

            // A rough tracing may start life as a single point.
            (Self::Polyline, Value::Polyline(line)) => Some(Value::Polyline(line)),
            (Self::Polyline, Value::Point3(p)) => Some(Value::Polyline(Polyline::new(vec![p]))),
            (Self::Polyline, Value::Point2(p)) => {
                Some(Value::Polyline(Polyline::new(vec![p.with_z(0.0)])))
            }

            (Self::Polygon, Value::Polygon(poly)) => Some(Value::Polygon(poly)),

            _ => None,
        }
    }

    pub fn is_compatible(&self, value: &Value) -> bool {
        self.coerce(value.clone()).is_some()
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer => write!(f, "INTEGER"),
            Self::Float => write!(f, "FLOAT"),
            Self::Text => write!(f, "TEXT"),
            Self::Boolean => write!(f, "BOOLEAN"),
            Self::Timestamp => write!(f, "TIMESTAMP"),
            Self::Point2 => write!(f, "POINT"),
            Self::Point3 => write!(f, "POINT Z"),
            Self::Polyline => write!(f, "LINESTRING"),
            Self::Polygon => write!(f, "POLYGON"),
        }
    }
}
