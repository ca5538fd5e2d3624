use geo::BooleanOps;
use spinemap::geometry::roi::{area, roi_base, roi_head};
use spinemap::{
    AnalysisParams, DragState, MapAnnotations, Point2, Point3, Polyline, RowKey, StoreError, UpdateOptions, Value,
};
use tempfile::TempDir;

fn straight_segment(map: &MapAnnotations, key: RowKey) {
    map.segments()
        .update(
            key,
            [
                ("segment", Value::Polyline(Polyline::from_xyz(&[(0.0, 0.0, 0.0), (10.0, 0.0, 0.0)]))),
                ("radius", Value::Float(4.0)),
            ],
        )
        .unwrap();
}

fn polygon_area(map: &MapAnnotations, key: RowKey, column: &str) -> f64 {
    area(map.spines().get(key, column).unwrap().as_polygon().unwrap())
}

#[test]
fn test_segment_radius_reaches_base_but_not_anchor() {
    let map = MapAnnotations::new(AnalysisParams::default()).unwrap();
    let segment = RowKey::Pair(0, 0);
    straight_segment(&map, segment);

    let id = map.add_spine(segment, Point3::new(5.0, 1.0, 0.0)).unwrap().unwrap();
    let spine = RowKey::Pair(id, 0);
    assert_eq!(map.spines().get(spine, "anchor").unwrap(), Value::Point2(Point2::new(5.0, 0.0)));
    assert_eq!(map.spines().get(spine, "anchorZ").unwrap(), Value::Integer(0));
    assert_eq!(map.spines().get(spine, "anchorX").unwrap(), Value::Float(5.0));
    assert!((polygon_area(&map, spine, "roiBase") - 80.0).abs() < 1e-6);

    map.update_segment(segment, [("radius", Value::Float(8.0))], UpdateOptions::default())
        .unwrap();
    assert!(!map.spines().is_valid(spine, "roiBase").unwrap());
    assert!(map.spines().is_valid(spine, "anchorX").unwrap());
    assert!((polygon_area(&map, spine, "roiBase") - 160.0).abs() < 1e-6);

    assert!(map.undo().unwrap());
    assert!((polygon_area(&map, spine, "roiBase") - 80.0).abs() < 1e-6);
}

#[test]
fn test_segment_edit_at_one_time_leaves_other_times_alone() {
    let map = MapAnnotations::new(AnalysisParams::default()).unwrap();
    for t in 0..2 {
        straight_segment(&map, RowKey::Pair(0, t));
        map.add_spine(RowKey::Pair(0, t), Point3::new(5.0, 1.0, 0.0)).unwrap();
    }
    map.spines().column("spinePosition").unwrap();
    let later = map.spines().keys().unwrap().into_iter().find(|k| k.t() == Some(1)).unwrap();
    let earlier = map.spines().keys().unwrap().into_iter().find(|k| k.t() == Some(0)).unwrap();

    map.update_segment(
        RowKey::Pair(0, 0),
        [("segment", Value::Polyline(Polyline::from_xy(&[(2.0, 0.0), (10.0, 0.0)])))],
        UpdateOptions::default(),
    )
    .unwrap();
    assert!(!map.spines().is_valid(earlier, "spinePosition").unwrap());
    assert!(map.spines().is_valid(later, "spinePosition").unwrap());
    assert_eq!(map.spines().get(earlier, "spinePosition").unwrap(), Value::Float(3.0));
}

#[test]
fn test_head_and_base_do_not_overlap() {
    let segment = Polyline::from_xy(&[(0.0, -20.0), (0.0, 20.0)]);
    let anchor = Point2::new(0.0, 0.0);
    let base = roi_base(&segment, anchor, 2.0);
    let head = roi_head(anchor, Point2::new(10.0, 0.0), 4.0, 2.0, &base);

    assert!(area(&head) > 0.0);
    assert!(area(&head.intersection(&base)) < 1e-6);
}

#[test]
fn test_new_ids_start_at_zero() {
    let map = MapAnnotations::new(AnalysisParams::default()).unwrap();
    assert_eq!(map.new_unassigned_spine_id().unwrap(), 0);
    assert_eq!(map.new_unassigned_segment_id().unwrap(), 0);

    for id in [0, 1, 3] {
        map.segments()
            .update(RowKey::Pair(id, 0), [("radius", Value::Float(2.0))])
            .unwrap();
    }
    assert_eq!(map.new_unassigned_segment_id().unwrap(), 4);
}

#[test]
fn test_time_point_view() {
    let map = MapAnnotations::new(AnalysisParams::default()).unwrap();
    straight_segment(&map, RowKey::Pair(0, 0));
    straight_segment(&map, RowKey::Pair(0, 3));
    map.add_spine(RowKey::Pair(0, 3), Point3::new(4.0, 2.0, 0.0)).unwrap();

    let view = map.time_point(3).unwrap();
    assert_eq!(view.spines().ids().unwrap(), vec![0]);
    assert_eq!(view.spines().get(0, "spineSide").unwrap(), Value::Text("Right".into()));
    assert!(map.time_point(0).unwrap().spines().is_empty().unwrap());

    view.move_roi_radius(0, Point2::new(4.0, 5.0), DragState::Manual).unwrap();
    assert_eq!(view.spines().get(0, "roiRadius").unwrap(), Value::Float(3.0));
    assert!(matches!(
        view.update_spine(0, [("t", Value::Integer(1))], UpdateOptions::default()),
        Err(StoreError::InvalidKey(_))
    ));
}

#[test]
fn test_save_and_reload() {
    let dir = TempDir::new().unwrap();
    let map = MapAnnotations::new(AnalysisParams::new().roi_radius(3.0)).unwrap();
    straight_segment(&map, RowKey::Pair(0, 0));
    map.add_spine(RowKey::Pair(0, 0), Point3::new(5.0, 1.0, 0.0)).unwrap();
    map.update_spine(RowKey::Pair(0, 0), [("note", Value::from("thin"))], UpdateOptions::default())
        .unwrap();
    map.save(dir.path()).unwrap();

    let mut reloaded = MapAnnotations::new(AnalysisParams::default()).unwrap();
    reloaded.load(dir.path()).unwrap();
    assert_eq!(reloaded.params().roi_radius, 3.0);
    assert_eq!(reloaded.spines().get(RowKey::Pair(0, 0), "note").unwrap(), Value::from("thin"));
    assert_eq!(
        reloaded.spines().get(RowKey::Pair(0, 0), "roiRadius").unwrap(),
        Value::Float(3.0)
    );
    assert_eq!(reloaded.spine_count(RowKey::Pair(0, 0)).unwrap(), 1);
    assert!(!reloaded.undo().unwrap());
}

#[test]
fn test_loading_a_missing_directory_fails() {
    let dir = TempDir::new().unwrap();
    let mut map = MapAnnotations::new(AnalysisParams::default()).unwrap();
    assert!(map.load(dir.path().join("absent")).is_err());
}
