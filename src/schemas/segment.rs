//! Dendrite segments: a committed centerline, the rough tracing it was
//! optimized from and a radius.

use super::SEGMENT;
use crate::core::{DataType, Result, Value};
use crate::storage::{ColumnAttributes, ColumnDef, ComputedColumn, Constraint, Schema};

pub const DEFAULT_RADIUS: f64 = 4.0;

pub fn schema() -> Result<Schema> {
    Schema::builder(SEGMENT)
        .index(["segmentID", "t"])
        .index_attributes(
            "segmentID",
            ColumnAttributes::titled("Segment ID")
                .description("Unique identifier for each segment")
                .categorical(),
        )
        .index_attributes("t", ColumnAttributes::titled("Time").description("Time of the segment"))
        .column(
            ColumnDef::new("segment", DataType::Polyline)
                .constraint(Constraint::NonSelfIntersecting)
                .attributes(ColumnAttributes::titled("Segment").description("Centerline of the segment").hidden()),
        )
        .column(
            ColumnDef::new("roughTracing", DataType::Polyline).attributes(
                ColumnAttributes::titled("Rough Tracing")
                    .description("User drawn tracing the centerline is optimized from")
                    .hidden(),
            ),
        )
        .column(
            ColumnDef::new("radius", DataType::Float)
                .default_value(DEFAULT_RADIUS)
                .constraint(Constraint::Positive)
                .attributes(ColumnAttributes::titled("Radius").description("Radius of the segment (points)")),
        )
        .column(
            ColumnDef::new("modified", DataType::Timestamp).attributes(
                ColumnAttributes::titled("Modified")
                    .description("Time of last modification")
                    .hidden(),
            ),
        )
        .modified("modified")
        .computed(
            ComputedColumn::per_row("length", DataType::Float, ["segment"], |row| {
                Ok(row.polyline("segment")?.map_or(Value::Null, |line| Value::Float(line.length())))
            })
            .attributes(ColumnAttributes::titled("Length").description("Length of the centerline")),
        )
        // Image y points down, so the visual left is the negative offset.
        .computed(radius_line("leftRadiusLine", "Left Radius", -1.0))
        .computed(radius_line("rightRadiusLine", "Right Radius", 1.0))
        .build()
}

/// The centerline offset by `radius` to one side.
fn radius_line(name: &str, title: &str, side: f64) -> ComputedColumn {
    ComputedColumn::per_row(name, DataType::Polyline, ["segment", "radius"], move |row| {
        let (Some(segment), Some(radius)) = (row.polyline("segment")?, row.f64("radius")?) else {
            return Ok(Value::Null);
        };
        if segment.len() < 2 {
            return Ok(Value::Null);
        }
        Ok(Value::Polyline(segment.offset(side * radius)))
    })
    .attributes(ColumnAttributes::titled(title).hidden())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RowKey;
    use crate::frame::LazyFrame;
    use crate::geometry::Polyline;
    use crate::storage::FrameStore;

    fn segments() -> LazyFrame {
        let mut store = FrameStore::new();
        store.register(schema().unwrap()).unwrap();
        LazyFrame::new(store.shared(), SEGMENT).unwrap()
    }

    #[test]
    fn test_defaults_and_length() {
        let frame = segments();
        let line = Polyline::from_xy(&[(0.0, 0.0), (3.0, 4.0)]);
        frame.update(RowKey::Pair(0, 0), [("segment", Value::Polyline(line))]).unwrap();

        assert_eq!(frame.get(RowKey::Pair(0, 0), "radius").unwrap(), Value::Float(4.0));
        assert_eq!(frame.get(RowKey::Pair(0, 0), "length").unwrap(), Value::Float(5.0));
        assert!(frame.get(RowKey::Pair(0, 0), "modified").unwrap().as_timestamp().is_some());
    }

    #[test]
    fn test_radius_lines_follow_radius() {
        let frame = segments();
        let line = Polyline::from_xy(&[(0.0, 0.0), (10.0, 0.0)]);
        frame.update(RowKey::Pair(0, 0), [("segment", Value::Polyline(line))]).unwrap();

        let left = frame.get(RowKey::Pair(0, 0), "leftRadiusLine").unwrap();
        let right = frame.get(RowKey::Pair(0, 0), "rightRadiusLine").unwrap();
        let left_y = left.as_polyline().and_then(|l| l.first()).map(|p| p.y).unwrap();
        let right_y = right.as_polyline().and_then(|l| l.first()).map(|p| p.y).unwrap();
        assert_eq!(left_y, -4.0);
        assert_eq!(right_y, 4.0);
        assert_eq!(frame.get(RowKey::Pair(0, 0), "length").unwrap(), Value::Float(10.0));

        frame.update(RowKey::Pair(0, 0), [("radius", Value::Float(1.0))]).unwrap();
        assert!(!frame.is_valid(RowKey::Pair(0, 0), "leftRadiusLine").unwrap());
        assert!(frame.is_valid(RowKey::Pair(0, 0), "length").unwrap());
    }

    #[test]
    fn test_radius_must_be_positive() {
        let frame = segments();
        let err = frame.update(RowKey::Pair(0, 0), [("radius", Value::Float(0.0))]).unwrap_err();
        assert!(err.is_validation());
        assert!(frame.is_empty().unwrap());
    }

    #[test]
    fn test_empty_tracing_has_no_radius_lines() {
        let frame = segments();
        frame
            .update(RowKey::Pair(2, 1), [("segment", Value::Polyline(Polyline::empty()))])
            .unwrap();
        assert_eq!(frame.get(RowKey::Pair(2, 1), "leftRadiusLine").unwrap(), Value::Null);
        assert_eq!(frame.get(RowKey::Pair(2, 1), "length").unwrap(), Value::Float(0.0));
    }
}
