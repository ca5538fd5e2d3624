// ============================================================================
// Spine Schema
// ============================================================================
//
// A spine is a user-placed point attached to a segment centerline at its
// anchor. Everything but the placement is derived: coordinates, length and
// position along the segment, and the region of interest whose pixels
// feed the intensity statistics.
//
// ============================================================================

use super::{SEGMENT, SPINE};
use crate::core::{DataType, Result, Value};
use crate::geometry::line::spine_angle;
use crate::geometry::roi::{roi_base, roi_head, translate, union};
use crate::geometry::Polyline;
use crate::image::Aggregate;
use crate::storage::{ColumnAttributes, ColumnDef, ComputedColumn, Dependencies, PixelColumn, RowScope, Schema};

pub const DEFAULT_ROI_EXTEND: f64 = 4.0;
pub const DEFAULT_ROI_RADIUS: f64 = 4.0;

pub fn schema() -> Result<Schema> {
    let builder = Schema::builder(SPINE)
        .index(["spineID", "t"])
        .index_attributes(
            "spineID",
            ColumnAttributes::titled("Spine ID")
                .description("Unique identifier for each spine")
                .categorical()
                .hidden(),
        )
        .index_attributes("t", ColumnAttributes::titled("Time").description("Time of the spine"))
        .relationship(SEGMENT, ["segmentID", "t"])
        .column(
            ColumnDef::new("segmentID", DataType::Integer).attributes(
                ColumnAttributes::titled("Segment ID")
                    .description("Segment the spine is attached to")
                    .categorical()
                    .hidden(),
            ),
        )
        .column(
            ColumnDef::new("point", DataType::Point2)
                .attributes(ColumnAttributes::titled("Point").description("Location of the spine").hidden()),
        )
        .column(
            ColumnDef::new("anchor", DataType::Point2).attributes(
                ColumnAttributes::titled("Anchor")
                    .description("Where the spine meets the segment")
                    .hidden(),
            ),
        )
        .column(
            ColumnDef::new("xBackgroundOffset", DataType::Float)
                .default_value(0.0)
                .attributes(ColumnAttributes::titled("X Background Offset")),
        )
        .column(
            ColumnDef::new("yBackgroundOffset", DataType::Float)
                .default_value(0.0)
                .attributes(ColumnAttributes::titled("Y Background Offset")),
        )
        .column(
            ColumnDef::new("z", DataType::Integer)
                .attributes(ColumnAttributes::titled("Z").description("Z slice of the spine").group("Coordinate")),
        )
        .column(
            ColumnDef::new("anchorZ", DataType::Integer)
                .attributes(ColumnAttributes::titled("Anchor Z").group("Anchor Coordinate")),
        )
        .column(
            ColumnDef::new("modified", DataType::Timestamp)
                .attributes(ColumnAttributes::titled("Modified").hidden()),
        )
        .column(
            ColumnDef::new("roiExtend", DataType::Float)
                .default_value(DEFAULT_ROI_EXTEND)
                .attributes(ColumnAttributes::titled("ROI Extend").description("Region of interest extend")),
        )
        .column(
            ColumnDef::new("roiRadius", DataType::Float)
                .default_value(DEFAULT_ROI_RADIUS)
                .attributes(ColumnAttributes::titled("ROI Radius").description("Region of interest radius")),
        )
        .column(
            ColumnDef::new("note", DataType::Text)
                .default_value("")
                .attributes(ColumnAttributes::titled("Note").hidden()),
        )
        .column(
            ColumnDef::new("userType", DataType::Integer)
                .default_value(Value::Integer(0))
                .attributes(ColumnAttributes::titled("User Type").categorical()),
        )
        .column(
            ColumnDef::new("accept", DataType::Boolean)
                .default_value(true)
                .attributes(ColumnAttributes::titled("Accept").description("Whether the spine is accepted").categorical()),
        )
        .modified("modified");

    let builder = coordinates()
        .into_iter()
        .chain(measurements())
        .chain(regions())
        .fold(builder, |builder, column| builder.computed(column));

    builder
        .pixels(
            PixelColumn::new("roiStats", "roi", "z")
                .aggregates(vec![Aggregate::Sum, Aggregate::Max])
                .attributes(ColumnAttributes::titled("Roi").group("ROI")),
        )
        .pixels(
            PixelColumn::new("roiStatsBg", "roiBg", "z")
                .aggregates(vec![Aggregate::Sum, Aggregate::Max])
                .attributes(ColumnAttributes::titled("Background Roi").group("ROI Background")),
        )
        .build()
}

fn coordinate(name: &str, title: &str, source: &'static str, group: &str, pick: fn(f64, f64) -> f64) -> ComputedColumn {
    ComputedColumn::per_row(name, DataType::Float, [source], move |row| {
        Ok(row.point2(source)?.map_or(Value::Null, |p| Value::Float(pick(p.x, p.y))))
    })
    .attributes(ColumnAttributes::titled(title).group(group))
}

fn coordinates() -> Vec<ComputedColumn> {
    vec![
        coordinate("x", "X", "point", "Coordinate", |x, _| x),
        coordinate("y", "Y", "point", "Coordinate", |_, y| y),
        coordinate("anchorX", "Anchor X", "anchor", "Anchor Coordinate", |x, _| x),
        coordinate("anchorY", "Anchor Y", "anchor", "Anchor Coordinate", |_, y| y),
    ]
}

fn measurements() -> Vec<ComputedColumn> {
    vec![
        ComputedColumn::per_row("spineLength", DataType::Float, ["anchor", "point"], |row| {
            Ok(match (row.point2("anchor")?, row.point2("point")?) {
                (Some(anchor), Some(point)) => Value::Float(anchor.distance(&point)),
                _ => Value::Null,
            })
        })
        .attributes(ColumnAttributes::titled("Spine Length")),
        ComputedColumn::per_row(
            "spinePosition",
            DataType::Float,
            Dependencies::local(["anchor"]).on(SEGMENT, ["segment"]),
            |row| {
                Ok(match (segment_of(row)?, row.point2("anchor")?) {
                    (Some(segment), Some(anchor)) => Value::Float(segment.project(anchor)),
                    _ => Value::Null,
                })
            },
        )
        .attributes(ColumnAttributes::titled("Spine Position").description("Distance of the anchor along the segment")),
        ComputedColumn::per_row(
            "spineSide",
            DataType::Text,
            Dependencies::local(["point"]).on(SEGMENT, ["segment"]),
            |row| {
                Ok(match (segment_of(row)?, row.point2("point")?) {
                    (Some(segment), Some(point)) => Value::Text(segment.side(point).to_string()),
                    _ => Value::Null,
                })
            },
        )
        .attributes(ColumnAttributes::titled("Spine Side").categorical()),
        ComputedColumn::per_row("anchorLine", DataType::Polyline, ["anchor", "point"], |row| {
            Ok(match (row.point2("anchor")?, row.point2("point")?) {
                (Some(anchor), Some(point)) => Value::Polyline(Polyline::new(vec![anchor.with_z(0.0), point.with_z(0.0)])),
                _ => Value::Null,
            })
        })
        .attributes(ColumnAttributes::titled("Anchor").hidden()),
        ComputedColumn::per_row(
            "spineAngle",
            DataType::Float,
            Dependencies::local(["anchorLine"]).on(SEGMENT, ["segment"]),
            |row| {
                let (Some(segment), Some(anchor_line)) = (segment_of(row)?, row.polyline("anchorLine")?) else {
                    return Ok(Value::Null);
                };
                Ok(spine_angle(&segment, &anchor_line).map_or(Value::Null, Value::Float))
            },
        )
        .attributes(ColumnAttributes::titled("Spine Angle").divergent()),
    ]
}

fn regions() -> Vec<ComputedColumn> {
    vec![
        ComputedColumn::per_row(
            "roiBase",
            DataType::Polygon,
            Dependencies::local(["anchor"]).on(SEGMENT, ["segment", "radius"]),
            |row| {
                let segment = segment_of(row)?;
                let radius = row.related_f64(SEGMENT, "radius")?;
                Ok(match (segment, row.point2("anchor")?, radius) {
                    (Some(segment), Some(anchor), Some(radius)) => Value::Polygon(roi_base(&segment, anchor, radius)),
                    _ => Value::Null,
                })
            },
        )
        .attributes(ColumnAttributes::titled("ROI Base").hidden()),
        ComputedColumn::per_row(
            "roiHead",
            DataType::Polygon,
            ["point", "anchor", "roiExtend", "roiRadius", "roiBase"],
            |row| {
                let (Some(point), Some(anchor), Some(base)) =
                    (row.point2("point")?, row.point2("anchor")?, row.polygon("roiBase")?)
                else {
                    return Ok(Value::Null);
                };
                let extend = row.f64("roiExtend")?.unwrap_or(DEFAULT_ROI_EXTEND);
                let radius = row.f64("roiRadius")?.unwrap_or(DEFAULT_ROI_RADIUS);
                Ok(Value::Polygon(roi_head(anchor, point, extend, radius, &base)))
            },
        )
        .attributes(ColumnAttributes::titled("ROI Head").hidden()),
        background("roiBaseBg", "ROI Base Background", "roiBase"),
        background("roiHeadBg", "ROI Head Background", "roiHead"),
        combined("roi", "ROI", "roiBase", "roiHead"),
        combined("roiBg", "ROI Background", "roiBaseBg", "roiHeadBg"),
    ]
}

/// `source` moved by the spine's background offset.
fn background(name: &str, title: &str, source: &'static str) -> ComputedColumn {
    ComputedColumn::per_row(
        name,
        DataType::Polygon,
        [source, "xBackgroundOffset", "yBackgroundOffset"],
        move |row| {
            let Some(poly) = row.polygon(source)? else {
                return Ok(Value::Null);
            };
            let dx = row.f64("xBackgroundOffset")?.unwrap_or(0.0);
            let dy = row.f64("yBackgroundOffset")?.unwrap_or(0.0);
            Ok(Value::Polygon(translate(&poly, dx, dy)))
        },
    )
    .attributes(ColumnAttributes::titled(title).hidden())
}

fn combined(name: &str, title: &str, base: &'static str, head: &'static str) -> ComputedColumn {
    ComputedColumn::per_row(name, DataType::Polygon, [base, head], move |row| {
        Ok(match (row.polygon(base)?, row.polygon(head)?) {
            (Some(base), Some(head)) => Value::Polygon(union(&base, &head)),
            (Some(only), None) | (None, Some(only)) => Value::Polygon(only),
            (None, None) => Value::Null,
        })
    })
    .attributes(ColumnAttributes::titled(title).hidden())
}

fn segment_of(row: &RowScope<'_, '_>) -> Result<Option<Polyline>> {
    row.related_polyline(SEGMENT, "segment")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RowKey;
    use crate::frame::LazyFrame;
    use crate::geometry::Point2;
    use crate::geometry::roi::area;
    use crate::storage::FrameStore;

    fn frames() -> (LazyFrame, LazyFrame) {
        let mut store = FrameStore::new();
        store.register(crate::schemas::segment::schema().unwrap()).unwrap();
        store.register(schema().unwrap()).unwrap();
        let store = store.shared();
        let segments = LazyFrame::new(store.clone(), SEGMENT).unwrap();
        let spines = LazyFrame::new(store, SPINE).unwrap();

        let line = Polyline::from_xy(&[(0.0, 0.0), (20.0, 0.0)]);
        segments.update(RowKey::Pair(0, 0), [("segment", Value::Polyline(line))]).unwrap();
        spines
            .update(
                RowKey::Pair(0, 0),
                [
                    ("segmentID", Value::Integer(0)),
                    ("point", Value::Point2(Point2::new(10.0, 6.0))),
                    ("anchor", Value::Point2(Point2::new(10.0, 0.0))),
                    ("z", Value::Integer(0)),
                    ("anchorZ", Value::Integer(0)),
                ],
            )
            .unwrap();
        (segments, spines)
    }

    #[test]
    fn test_defaults() {
        let (_, spines) = frames();
        let key = RowKey::Pair(0, 0);
        assert_eq!(spines.get(key, "roiExtend").unwrap(), Value::Float(4.0));
        assert_eq!(spines.get(key, "note").unwrap(), Value::Text(String::new()));
        assert_eq!(spines.get(key, "accept").unwrap(), Value::Boolean(true));
        assert_eq!(spines.get(key, "xBackgroundOffset").unwrap(), Value::Float(0.0));
    }

    #[test]
    fn test_measurements() {
        let (_, spines) = frames();
        let key = RowKey::Pair(0, 0);
        assert_eq!(spines.get(key, "x").unwrap(), Value::Float(10.0));
        assert_eq!(spines.get(key, "anchorY").unwrap(), Value::Float(0.0));
        assert_eq!(spines.get(key, "spineLength").unwrap(), Value::Float(6.0));
        assert_eq!(spines.get(key, "spinePosition").unwrap(), Value::Float(10.0));
        assert_eq!(spines.get(key, "spineSide").unwrap(), Value::Text("Right".into()));

        let angle = spines.get(key, "spineAngle").unwrap().as_f64().unwrap();
        assert!((angle - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_background_is_translated() {
        let (_, spines) = frames();
        let key = RowKey::Pair(0, 0);
        let roi = spines.get(key, "roi").unwrap().as_polygon().cloned().unwrap();

        spines
            .update(key, [("xBackgroundOffset", Value::Float(30.0)), ("yBackgroundOffset", Value::Float(-5.0))])
            .unwrap();
        assert!(spines.is_valid(key, "roi").unwrap());
        let bg = spines.get(key, "roiBg").unwrap().as_polygon().cloned().unwrap();
        assert!((area(&bg) - area(&roi)).abs() < 1e-3);
    }

    #[test]
    fn test_segment_edit_reaches_regions() {
        let (segments, spines) = frames();
        let key = RowKey::Pair(0, 0);
        let before = area(spines.get(key, "roiBase").unwrap().as_polygon().unwrap());
        spines.get(key, "x").unwrap();

        segments.update(RowKey::Pair(0, 0), [("radius", Value::Float(2.0))]).unwrap();
        assert!(!spines.is_valid(key, "roiBase").unwrap());
        assert!(!spines.is_valid(key, "roi").unwrap());
        assert!(spines.is_valid(key, "x").unwrap());

        let after = area(spines.get(key, "roiBase").unwrap().as_polygon().unwrap());
        assert!((before - 2.0 * after).abs() < 1e-6);
    }

    #[test]
    fn test_moving_to_another_segment_recomputes() {
        let (segments, spines) = frames();
        let key = RowKey::Pair(0, 0);
        let line = Polyline::from_xy(&[(4.0, 0.0), (20.0, 0.0)]);
        segments.update(RowKey::Pair(1, 0), [("segment", Value::Polyline(line))]).unwrap();

        assert!((area(spines.get(key, "roiBase").unwrap().as_polygon().unwrap()) - 128.0).abs() < 1e-6);
        assert_eq!(spines.get(key, "spinePosition").unwrap(), Value::Float(10.0));
        spines.get(key, "x").unwrap();

        spines.update(key, [("segmentID", Value::Integer(1))]).unwrap();
        assert!(!spines.is_valid(key, "roiBase").unwrap());
        assert!(!spines.is_valid(key, "spinePosition").unwrap());
        assert!(spines.is_valid(key, "x").unwrap());

        // [4, 18] of the new centerline, buffered by 4
        assert!((area(spines.get(key, "roiBase").unwrap().as_polygon().unwrap()) - 112.0).abs() < 1e-6);
        assert_eq!(spines.get(key, "spinePosition").unwrap(), Value::Float(6.0));
    }

    #[test]
    fn test_dangling_segment_yields_null() {
        let (_, spines) = frames();
        assert!(spines.get(RowKey::Pair(0, 0), "roiBase").unwrap().as_polygon().is_some());
        spines.update(RowKey::Pair(0, 0), [("segmentID", Value::Integer(9))]).unwrap();
        assert_eq!(spines.get(RowKey::Pair(0, 0), "roiBase").unwrap(), Value::Null);
        assert_eq!(spines.get(RowKey::Pair(0, 0), "spinePosition").unwrap(), Value::Null);
    }

    #[test]
    fn test_pixel_columns_need_channels() {
        let (_, spines) = frames();
        assert!(!spines.schema().has_column("roiStats_ch1_sum"));
        assert_eq!(spines.schema().pixel_columns().len(), 2);
    }
}
