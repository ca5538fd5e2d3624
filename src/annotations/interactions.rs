//! Pointer-driven edits of spines and segments.
//!
//! Every edit returns whether it was applied. Expected refusals (a tracing
//! point too far from the tracing, an anchor that cannot be placed) come
//! back as `false` or `None`; errors are reserved for invalid input.

use super::{DragState, MapAnnotations};
use crate::core::{Ids, Result, RowKey, StoreError, Value};
use crate::geometry::anchor::{brightest_anchor, project_anchor};
use crate::geometry::background::darkest_offset;
use crate::geometry::tracing::{append_point, delete_point, inject_point, move_point};
use crate::geometry::{Point2, Point3, Polyline};
use crate::image::ImageVolume;
use crate::image::pixels::{polygon_sum, sample_line};
use crate::schemas::{SEGMENT, SPINE};
use crate::storage::UpdateOptions;
use log::{debug, warn};

fn time_of(key: &RowKey) -> Result<i64> {
    key.t()
        .ok_or_else(|| StoreError::InvalidKey(format!("{} has no time level", key)))
}

impl MapAnnotations {
    /// Channel to sample, clamped to the volume.
    fn sample_channel(&self, images: &dyn ImageVolume) -> usize {
        let count = images.channel_count();
        if self.params.channel < count {
            return self.params.channel;
        }
        warn!(
            "channel {} is not in the volume ({} channel(s)), sampling the last one",
            self.params.channel, count
        );
        count.saturating_sub(1)
    }

    /// A polyline field of `segment`; empty when unset.
    fn segment_line(&self, segment: RowKey, column: &str) -> Result<Polyline> {
        Ok(self
            .segments
            .get(segment, column)?
            .as_polyline()
            .cloned()
            .unwrap_or_else(Polyline::empty))
    }

    fn rough_tracing(&self, segment: RowKey) -> Result<Polyline> {
        self.segment_line(segment, "roughTracing")
    }

    fn spine_point(&self, spine: RowKey) -> Result<Point2> {
        self.spines
            .get(spine, "point")?
            .as_point2()
            .ok_or_else(|| StoreError::Compute(format!("spine {} has no point", spine)))
    }

    // ------------------------------------------------------------------------
    // Anchors
    // ------------------------------------------------------------------------

    /// Where a spine at `point` attaches to `segment`.
    ///
    /// With an image volume and a positive search distance (`search`, or the
    /// params' brightest-path distance) the brightest straight path from
    /// `point` to the centerline wins; otherwise the orthogonal projection.
    /// `None` when the segment has no centerline or the window is empty.
    pub fn nearest_anchor(&self, segment: RowKey, point: Point3, search: Option<i64>) -> Result<Option<Point3>> {
        let t = time_of(&segment)?;
        let centerline = self.segment_line(segment, "segment")?;
        if centerline.is_empty() {
            debug!("segment {} has no centerline to anchor to", segment);
            return Ok(None);
        }

        let distance = search.unwrap_or(self.params.brightest_path_distance);
        let store = self.store.borrow();
        let images = match store.images() {
            Some(images) if distance > 0 => images,
            _ => return Ok(project_anchor(&centerline, point.xy())),
        };

        let channel = self.sample_channel(images);
        let z = point.z.round() as i64;
        let z_spread = self.params.z_spread;
        brightest_anchor(&centerline, point, distance, |candidate| {
            sample_line(images, candidate, t, z, channel, z_spread)
        })
    }

    // ------------------------------------------------------------------------
    // Spines
    // ------------------------------------------------------------------------

    /// Places a new spine at `point` on `segment` (a `(segmentID, t)` key)
    /// and returns its id. `None` when no anchor could be placed.
    pub fn add_spine(&self, segment: RowKey, point: Point3) -> Result<Option<i64>> {
        let t = time_of(&segment)?;
        let Some(anchor) = self.nearest_anchor(segment, point, None)? else {
            warn!("no anchor for a spine at {} on segment {}", point, segment);
            return Ok(None);
        };

        let id = self.new_unassigned_spine_id()?;
        self.spines.update(
            RowKey::Pair(id, t),
            [
                ("segmentID", Value::Integer(segment.id())),
                ("point", Value::Point2(point.xy())),
                ("z", Value::Integer(point.z.round() as i64)),
                ("anchor", Value::Point2(anchor.xy())),
                ("anchorZ", Value::Integer(anchor.z.round() as i64)),
                ("xBackgroundOffset", Value::Float(0.0)),
                ("yBackgroundOffset", Value::Float(0.0)),
                ("roiExtend", Value::Float(self.params.roi_extend)),
                ("roiRadius", Value::Float(self.params.roi_radius)),
            ],
        )?;
        debug!("added spine ({}, {}) anchored at {}", id, t, anchor);
        Ok(Some(id))
    }

    pub fn move_spine(&self, spine: RowKey, point: Point3, state: DragState) -> Result<bool> {
        self.update_spine(
            spine,
            [
                ("point", Value::Point2(point.xy())),
                ("z", Value::Integer(point.z.round() as i64)),
            ],
            state.options(),
        )?;
        Ok(true)
    }

    /// Re-anchors the spine at the centerline point nearest the cursor.
    pub fn move_anchor(&self, spine: RowKey, cursor: Point3, state: DragState) -> Result<bool> {
        let t = time_of(&spine)?;
        let Some(segment_id) = self.spines.get(spine, "segmentID")?.as_i64() else {
            return Ok(false);
        };
        let Some(anchor) = self.nearest_anchor(RowKey::Pair(segment_id, t), cursor, None)? else {
            return Ok(false);
        };
        self.update_spine(
            spine,
            [
                ("anchor", Value::Point2(anchor.xy())),
                ("anchorZ", Value::Integer(anchor.z.round() as i64)),
            ],
            state.options(),
        )?;
        Ok(true)
    }

    /// Moves the background ROI.
    ///
    /// A manual edit sets the offset to `cursor`. During a drag the offset
    /// follows the cursor's movement since the previous step.
    pub fn move_background_roi(&self, spine: RowKey, cursor: Point2, state: DragState) -> Result<bool> {
        if state == DragState::Manual {
            self.update_spine(
                spine,
                [
                    ("xBackgroundOffset", Value::Float(cursor.x)),
                    ("yBackgroundOffset", Value::Float(cursor.y)),
                ],
                state.options(),
            )?;
            return Ok(true);
        }

        let previous = match self.pending_background.get() {
            Some(previous) if state != DragState::Start => previous,
            _ => cursor,
        };
        let x = self.spines.get(spine, "xBackgroundOffset")?.as_f64().unwrap_or(0.0);
        let y = self.spines.get(spine, "yBackgroundOffset")?.as_f64().unwrap_or(0.0);
        self.update_spine(
            spine,
            [
                ("xBackgroundOffset", Value::Float(x + cursor.x - previous.x)),
                ("yBackgroundOffset", Value::Float(y + cursor.y - previous.y)),
            ],
            state.options(),
        )?;

        self.pending_background
            .set((state != DragState::End).then_some(cursor));
        Ok(true)
    }

    /// Sets the ROI extend to the cursor's distance from the spine point.
    pub fn move_roi_extend(&self, spine: RowKey, cursor: Point2, state: DragState) -> Result<bool> {
        let point = self.spine_point(spine)?;
        self.update_spine(spine, [("roiExtend", Value::Float(point.distance(&cursor)))], state.options())?;
        Ok(true)
    }

    /// Sets the ROI radius to the cursor's distance from the spine point.
    pub fn move_roi_radius(&self, spine: RowKey, cursor: Point2, state: DragState) -> Result<bool> {
        let point = self.spine_point(spine)?;
        self.update_spine(spine, [("roiRadius", Value::Float(point.distance(&cursor)))], state.options())?;
        Ok(true)
    }

    /// Searches the darkest nearby placement for the background ROI and
    /// stores it as the spine's offset. `None` when the spine has no ROI.
    pub fn snap_background_offset(&self, spine: RowKey) -> Result<Option<(f64, f64)>> {
        let t = time_of(&spine)?;
        let Some(roi) = self.spines.get(spine, "roi")?.as_polygon().cloned() else {
            return Ok(None);
        };
        let z = self.spines.get(spine, "z")?.as_i64().unwrap_or(0);

        let offset = {
            let store = self.store.borrow();
            let images = store
                .images()
                .ok_or_else(|| StoreError::Image("background search needs an image volume".into()))?;
            let channel = self.sample_channel(images);
            darkest_offset(
                &roi,
                self.params.background_roi_grid_points,
                self.params.background_roi_grid_overlap,
                |moved| polygon_sum(images, moved, t, z, channel, self.params.z_spread),
            )?
        };

        let Some((dx, dy)) = offset else {
            return Ok(None);
        };
        self.update_spine(
            spine,
            [("xBackgroundOffset", Value::Float(dx)), ("yBackgroundOffset", Value::Float(dy))],
            UpdateOptions::replace(),
        )?;
        Ok(Some((dx, dy)))
    }

    /// Gives `spine` and its future timepoints the id of `to`. A spine
    /// already holding that id at the same time is disconnected first.
    pub fn connect(&self, spine: RowKey, to: RowKey) -> Result<bool> {
        let t = time_of(&spine)?;
        if spine.id() == to.id() {
            return Ok(false);
        }
        if self.spines.get(spine, "segmentID")? != self.spines.get(to, "segmentID")? {
            return Err(StoreError::ConstraintViolation(
                "cannot connect spines from different segments".into(),
            ));
        }

        let existing = RowKey::Pair(to.id(), t);
        if self.spines.contains(&existing)? {
            self.disconnect(existing)?;
        }
        self.spines
            .update(Ids::from_time(spine.id(), t), [("spineID", Value::Integer(to.id()))])
    }

    /// Moves `spine` and its future timepoints to a fresh id.
    pub fn disconnect(&self, spine: RowKey) -> Result<bool> {
        let t = time_of(&spine)?;
        let id = self.new_unassigned_spine_id()?;
        self.spines
            .update(Ids::from_time(spine.id(), t), [("spineID", Value::Integer(id))])
    }

    // ------------------------------------------------------------------------
    // Segments
    // ------------------------------------------------------------------------

    /// A new segment at `t` with an empty tracing. Returns its id.
    pub fn add_segment(&self, t: i64) -> Result<i64> {
        let id = self.new_unassigned_segment_id()?;
        self.segments.update(
            RowKey::Pair(id, t),
            [
                ("segment", Value::Polyline(Polyline::empty())),
                ("roughTracing", Value::Polyline(Polyline::empty())),
                ("radius", Value::Float(self.params.segment_radius)),
            ],
        )?;
        Ok(id)
    }

    /// Sets the segment radius to the cursor's distance from the centerline.
    pub fn move_segment_radius(&self, segment: RowKey, cursor: Point2, state: DragState) -> Result<bool> {
        let Some(anchor) = self.nearest_anchor(segment, cursor.with_z(0.0), Some(0))? else {
            return Ok(false);
        };
        let radius = anchor.xy().distance(&cursor);
        if radius <= 0.0 {
            debug!("cursor sits on segment {}, radius left alone", segment);
            return Ok(false);
        }
        self.update_segment(segment, [("radius", Value::Float(radius))], state.options())?;
        Ok(true)
    }

    pub fn connect_segment(&self, segment: RowKey, to: RowKey) -> Result<bool> {
        let t = time_of(&segment)?;
        if Some(t) == to.t() {
            return Err(StoreError::ConstraintViolation(
                "cannot connect segments in the same time point".into(),
            ));
        }
        if segment.id() == to.id() {
            return Ok(false);
        }

        let existing = RowKey::Pair(to.id(), t);
        if self.segments.contains(&existing)? {
            self.disconnect_segment(existing)?;
        }
        self.rekey_segment(segment.id(), t, to.id())
    }

    pub fn disconnect_segment(&self, segment: RowKey) -> Result<bool> {
        let t = time_of(&segment)?;
        let id = self.new_unassigned_segment_id()?;
        self.rekey_segment(segment.id(), t, id)
    }

    /// Moves segment `id` to `new_id` from time `t` onward. Attached spines
    /// follow, and both writes undo as one step.
    fn rekey_segment(&self, id: i64, t: i64, new_id: i64) -> Result<bool> {
        let selected = Ids::from_time(id, t);
        let keys: Vec<RowKey> = self
            .segments
            .keys()?
            .into_iter()
            .filter(|key| selected.matches(key))
            .collect();
        for key in &keys {
            if let Some(at) = key.t()
                && self.segments.contains(&RowKey::Pair(new_id, at))?
            {
                return Err(StoreError::ConstraintViolation(format!(
                    "segment {} already exists at t = {}",
                    new_id, at
                )));
            }
        }

        let attached: Vec<RowKey> = self
            .store
            .borrow()
            .reverse_map_ids(SPINE, SEGMENT, &keys)?
            .into_iter()
            .flatten()
            .collect();
        if attached.is_empty() {
            return self.segments.update(selected, [("segmentID", Value::Integer(new_id))]);
        }

        debug!("re-pointing {} spine(s) from segment {} to {}", attached.len(), id, new_id);
        self.spines.update(Ids::Many(attached), [("segmentID", Value::Integer(new_id))])?;
        self.segments
            .update_with(selected, [("segmentID", Value::Integer(new_id))], UpdateOptions::linked())
    }

    /// Adds `point` to the rough tracing at the nearer end, or splits the
    /// tracing where it projects inside. With `speculate` the tracing is
    /// returned without being written. `None` when the point is too far
    /// from the tracing.
    pub fn append_segment_point(&self, segment: RowKey, point: Point3, speculate: bool) -> Result<Option<Polyline>> {
        let rough = self.rough_tracing(segment)?;
        let Some(tracing) = append_point(&rough, point, Some(self.params.segment_tracing_max_distance)) else {
            return Ok(None);
        };
        if !speculate {
            self.update_segment_with_live_tracing(segment, tracing.clone(), false)?;
        }
        Ok(Some(tracing))
    }

    /// Splits the rough tracing at the projection of `point`.
    pub fn inject_segment_point(&self, segment: RowKey, point: Point3) -> Result<bool> {
        let rough = self.rough_tracing(segment)?;
        let Some(tracing) = inject_point(&rough, point) else {
            return Ok(false);
        };
        self.update_segment_with_live_tracing(segment, tracing, false)
    }

    pub fn move_segment_point(&self, segment: RowKey, index: usize, point: Point3, state: DragState) -> Result<bool> {
        let rough = self.rough_tracing(segment)?;
        let Some(tracing) = move_point(&rough, index, point) else {
            warn!("segment {} has no tracing point {}", segment, index);
            return Ok(false);
        };
        self.update_segment_with_live_tracing(segment, tracing, state.replaces_log())
    }

    pub fn delete_segment_point(&self, segment: RowKey, index: usize) -> Result<bool> {
        let rough = self.rough_tracing(segment)?;
        let Some(tracing) = delete_point(&rough, index) else {
            warn!("segment {} has no tracing point {}", segment, index);
            return Ok(false);
        };
        self.update_segment_with_live_tracing(segment, tracing, false)
    }

    /// Stores the rough tracing, and the centerline too if the optimizer can
    /// already produce one.
    pub fn update_segment_with_live_tracing(&self, segment: RowKey, rough: Polyline, replace: bool) -> Result<bool> {
        let mut values = vec![("roughTracing", Value::Polyline(rough.clone()))];
        if let Some(centerline) = self.optimizer.optimize(&rough, true) {
            values.push(("segment", Value::Polyline(centerline)));
        }
        let options = UpdateOptions {
            replace_log: replace,
            skip_log: false,
            link_log: false,
        };
        self.update_segment(segment, values, options)?;
        Ok(true)
    }

    /// Optimizes the rough tracing into the committed centerline. Not
    /// recorded in the history.
    pub fn commit_segment_tracing(&self, segment: RowKey) -> Result<bool> {
        let rough = self.rough_tracing(segment)?;
        let Some(centerline) = self.optimizer.optimize(&rough, false) else {
            warn!("optimizer gave no centerline for segment {}", segment);
            return Ok(false);
        };
        self.update_segment(segment, [("segment", Value::Polyline(centerline))], UpdateOptions::unlogged())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisParams;
    use crate::geometry::roi::area;
    use crate::image::{ImageSlice, MemoryVolume};
    use std::rc::Rc;

    fn annotations() -> MapAnnotations {
        let map = MapAnnotations::new(AnalysisParams::default()).unwrap();
        let line = Polyline::from_xy(&[(0.0, 0.0), (10.0, 0.0)]);
        map.segments
            .update(RowKey::Pair(0, 0), [("segment", Value::Polyline(line))])
            .unwrap();
        map
    }

    #[test]
    fn test_add_spine_projects_without_images() {
        let map = annotations();
        let id = map.add_spine(RowKey::Pair(0, 0), Point3::new(5.0, 1.0, 0.0)).unwrap();
        assert_eq!(id, Some(0));

        let key = RowKey::Pair(0, 0);
        assert_eq!(map.spines.get(key, "anchor").unwrap(), Value::Point2(Point2::new(5.0, 0.0)));
        assert_eq!(map.spines.get(key, "anchorZ").unwrap(), Value::Integer(0));
        assert_eq!(map.spines.get(key, "roiRadius").unwrap(), Value::Float(4.0));
        assert_eq!(map.add_spine(RowKey::Pair(0, 0), Point3::new(2.0, 1.0, 0.0)).unwrap(), Some(1));
    }

    #[test]
    fn test_spine_on_empty_segment_is_refused() {
        let map = annotations();
        let segment = map.add_segment(0).unwrap();
        assert_eq!(segment, 1);
        assert_eq!(map.add_spine(RowKey::Pair(segment, 0), Point3::new(1.0, 1.0, 0.0)).unwrap(), None);
        assert!(map.spines.is_empty().unwrap());
    }

    #[test]
    fn test_drag_is_one_undo_step() {
        let map = annotations();
        map.add_spine(RowKey::Pair(0, 0), Point3::new(5.0, 1.0, 0.0)).unwrap();
        let key = RowKey::Pair(0, 0);

        map.move_spine(key, Point3::new(5.0, 2.0, 0.0), DragState::Start).unwrap();
        map.move_spine(key, Point3::new(5.0, 3.0, 0.0), DragState::Moving).unwrap();
        map.move_spine(key, Point3::new(5.0, 4.0, 1.0), DragState::End).unwrap();
        assert_eq!(map.spines.get(key, "z").unwrap(), Value::Integer(1));

        assert!(map.undo().unwrap());
        assert_eq!(map.spines.get(key, "point").unwrap(), Value::Point2(Point2::new(5.0, 1.0)));
    }

    #[test]
    fn test_background_drag_follows_cursor() {
        let map = annotations();
        map.add_spine(RowKey::Pair(0, 0), Point3::new(5.0, 1.0, 0.0)).unwrap();
        let key = RowKey::Pair(0, 0);

        map.move_background_roi(key, Point2::new(10.0, 10.0), DragState::Start).unwrap();
        map.move_background_roi(key, Point2::new(13.0, 11.0), DragState::Moving).unwrap();
        map.move_background_roi(key, Point2::new(15.0, 8.0), DragState::End).unwrap();
        assert_eq!(map.spines.get(key, "xBackgroundOffset").unwrap(), Value::Float(5.0));
        assert_eq!(map.spines.get(key, "yBackgroundOffset").unwrap(), Value::Float(-2.0));
        assert_eq!(map.pending_background.get(), None);

        map.move_background_roi(key, Point2::new(1.0, 2.0), DragState::Manual).unwrap();
        assert_eq!(map.spines.get(key, "xBackgroundOffset").unwrap(), Value::Float(1.0));
    }

    #[test]
    fn test_roi_extend_and_segment_radius() {
        let map = annotations();
        map.add_spine(RowKey::Pair(0, 0), Point3::new(5.0, 1.0, 0.0)).unwrap();
        map.move_roi_extend(RowKey::Pair(0, 0), Point2::new(5.0, 7.0), DragState::Manual).unwrap();
        assert_eq!(map.spines.get(RowKey::Pair(0, 0), "roiExtend").unwrap(), Value::Float(6.0));

        assert!(map.move_segment_radius(RowKey::Pair(0, 0), Point2::new(3.0, 2.5), DragState::Manual).unwrap());
        assert_eq!(map.segments.get(RowKey::Pair(0, 0), "radius").unwrap(), Value::Float(2.5));
        assert!(!map.move_segment_radius(RowKey::Pair(0, 0), Point2::new(3.0, 0.0), DragState::Manual).unwrap());
    }

    #[test]
    fn test_connect_and_disconnect() {
        let map = annotations();
        let line = Polyline::from_xy(&[(0.0, 0.0), (10.0, 0.0)]);
        map.segments
            .update(RowKey::Pair(0, 1), [("segment", Value::Polyline(line))])
            .unwrap();
        map.add_spine(RowKey::Pair(0, 0), Point3::new(5.0, 1.0, 0.0)).unwrap();
        map.add_spine(RowKey::Pair(0, 1), Point3::new(5.0, 1.0, 0.0)).unwrap();
        assert!(map.spines.contains(&RowKey::Pair(1, 1)).unwrap());

        assert!(map.connect(RowKey::Pair(1, 1), RowKey::Pair(0, 0)).unwrap());
        assert!(map.spines.contains(&RowKey::Pair(0, 1)).unwrap());
        assert!(!map.spines.contains(&RowKey::Pair(1, 1)).unwrap());

        assert!(map.disconnect(RowKey::Pair(0, 1)).unwrap());
        assert!(map.spines.contains(&RowKey::Pair(1, 1)).unwrap());
        assert!(map.spines.contains(&RowKey::Pair(0, 0)).unwrap());
    }

    #[test]
    fn test_connect_displaces_existing_spine() {
        let map = annotations();
        let line = Polyline::from_xy(&[(0.0, 0.0), (10.0, 0.0)]);
        map.segments
            .update(RowKey::Pair(0, 1), [("segment", Value::Polyline(line))])
            .unwrap();
        map.add_spine(RowKey::Pair(0, 0), Point3::new(5.0, 1.0, 0.0)).unwrap(); // (0, 0)
        map.add_spine(RowKey::Pair(0, 1), Point3::new(2.0, 1.0, 0.0)).unwrap(); // (1, 1)
        map.add_spine(RowKey::Pair(0, 1), Point3::new(8.0, 1.0, 0.0)).unwrap(); // (2, 1)
        map.connect(RowKey::Pair(1, 1), RowKey::Pair(0, 0)).unwrap();

        // (2, 1) takes over id 0 at t = 1; the old (0, 1) moves to a fresh id.
        map.connect(RowKey::Pair(2, 1), RowKey::Pair(0, 0)).unwrap();
        assert_eq!(
            map.spines.get(RowKey::Pair(0, 1), "point").unwrap(),
            Value::Point2(Point2::new(8.0, 1.0))
        );
        assert_eq!(
            map.spines.get(RowKey::Pair(3, 1), "point").unwrap(),
            Value::Point2(Point2::new(2.0, 1.0))
        );
    }

    #[test]
    fn test_connect_across_segments_is_rejected() {
        let map = annotations();
        let other = map.add_segment(0).unwrap();
        map.add_spine(RowKey::Pair(0, 0), Point3::new(5.0, 1.0, 0.0)).unwrap();
        map.spines
            .update(RowKey::Pair(7, 0), [("segmentID", Value::Integer(other))])
            .unwrap();
        assert!(map.connect(RowKey::Pair(7, 0), RowKey::Pair(0, 0)).is_err());
        assert!(map.connect_segment(RowKey::Pair(0, 0), RowKey::Pair(other, 0)).is_err());
    }

    #[test]
    fn test_disconnect_segment_carries_spines() {
        let map = annotations();
        map.add_spine(RowKey::Pair(0, 0), Point3::new(5.0, 1.0, 0.0)).unwrap();
        let spine = RowKey::Pair(0, 0);
        assert!((area(map.spines.get(spine, "roiBase").unwrap().as_polygon().unwrap()) - 80.0).abs() < 1e-6);

        assert!(map.disconnect_segment(RowKey::Pair(0, 0)).unwrap());
        assert!(map.segments.contains(&RowKey::Pair(1, 0)).unwrap());
        assert!(!map.segments.contains(&RowKey::Pair(0, 0)).unwrap());
        assert_eq!(map.spines.get(spine, "segmentID").unwrap(), Value::Integer(1));
        assert_eq!(map.spine_count(RowKey::Pair(1, 0)).unwrap(), 1);
        assert!(!map.spines.is_valid(spine, "roiBase").unwrap());
        assert!((area(map.spines.get(spine, "roiBase").unwrap().as_polygon().unwrap()) - 80.0).abs() < 1e-6);

        assert!(map.undo().unwrap());
        assert!(map.segments.contains(&RowKey::Pair(0, 0)).unwrap());
        assert_eq!(map.spines.get(spine, "segmentID").unwrap(), Value::Integer(0));
        assert_eq!(map.spine_count(RowKey::Pair(0, 0)).unwrap(), 1);

        assert!(map.redo().unwrap());
        assert_eq!(map.spines.get(spine, "segmentID").unwrap(), Value::Integer(1));
        assert!(map.segments.contains(&RowKey::Pair(1, 0)).unwrap());
    }

    #[test]
    fn test_connect_segment_carries_spines() {
        let map = annotations();
        let line = Polyline::from_xy(&[(0.0, 0.0), (10.0, 0.0)]);
        map.segments
            .update(RowKey::Pair(1, 1), [("segment", Value::Polyline(line))])
            .unwrap();
        map.add_spine(RowKey::Pair(1, 1), Point3::new(5.0, 1.0, 0.0)).unwrap();
        let spine = RowKey::Pair(0, 1);

        assert!(map.connect_segment(RowKey::Pair(1, 1), RowKey::Pair(0, 0)).unwrap());
        assert!(map.segments.contains(&RowKey::Pair(0, 1)).unwrap());
        assert!(!map.segments.contains(&RowKey::Pair(1, 1)).unwrap());
        assert_eq!(map.spines.get(spine, "segmentID").unwrap(), Value::Integer(0));
        assert_eq!(map.spine_count(RowKey::Pair(0, 1)).unwrap(), 1);
        assert!(map.spines.get(spine, "roiBase").unwrap().as_polygon().is_some());

        assert!(map.undo().unwrap());
        assert!(map.segments.contains(&RowKey::Pair(1, 1)).unwrap());
        assert_eq!(map.spines.get(spine, "segmentID").unwrap(), Value::Integer(1));
    }

    #[test]
    fn test_segment_rekey_with_spines_attached_is_rejected() {
        let map = annotations();
        map.add_spine(RowKey::Pair(0, 0), Point3::new(5.0, 1.0, 0.0)).unwrap();

        let moved = map.segments.update(Ids::from_time(0, 0), [("segmentID", Value::Integer(4))]);
        assert!(matches!(moved, Err(StoreError::ConstraintViolation(_))));
        assert!(map.segments.contains(&RowKey::Pair(0, 0)).unwrap());
        assert!(!map.segments.contains(&RowKey::Pair(4, 0)).unwrap());
        assert_eq!(map.spine_count(RowKey::Pair(0, 0)).unwrap(), 1);
    }

    #[test]
    fn test_tracing_edits() {
        let map = annotations();
        let segment = RowKey::Pair(map.add_segment(0).unwrap(), 0);

        let first = map.append_segment_point(segment, Point3::new(0.0, 0.0, 0.0), false).unwrap();
        assert_eq!(first.map(|l| l.len()), Some(1));
        map.append_segment_point(segment, Point3::new(10.0, 0.0, 0.0), false).unwrap();
        map.append_segment_point(segment, Point3::new(20.0, 0.0, 0.0), false).unwrap();

        let far = map.append_segment_point(segment, Point3::new(500.0, 0.0, 0.0), false).unwrap();
        assert_eq!(far, None);

        let speculated = map.append_segment_point(segment, Point3::new(25.0, 0.0, 0.0), true).unwrap();
        assert_eq!(speculated.map(|l| l.len()), Some(4));
        assert_eq!(map.rough_tracing(segment).unwrap().len(), 3);

        assert!(map.move_segment_point(segment, 1, Point3::new(10.0, 3.0, 0.0), DragState::Manual).unwrap());
        assert!(map.delete_segment_point(segment, 0).unwrap());
        assert!(!map.delete_segment_point(segment, 9).unwrap());
        assert_eq!(
            map.rough_tracing(segment).unwrap(),
            Polyline::from_xy(&[(10.0, 3.0), (20.0, 0.0)])
        );

        // The live pass never answers, so the centerline waits for a commit.
        assert_eq!(map.segments.get(segment, "segment").unwrap(), Value::Polyline(Polyline::empty()));
        assert!(map.commit_segment_tracing(segment).unwrap());
        assert_eq!(
            map.segments.get(segment, "segment").unwrap(),
            Value::Polyline(Polyline::from_xy(&[(10.0, 3.0), (20.0, 0.0)]))
        );
    }

    fn imaged() -> MapAnnotations {
        // Bright row at y = 2 with a dark column band at x >= 20.
        let slice = ImageSlice::from_fn(40, 40, |x, y| if x >= 20 { 0.0 } else if y == 2 { 100.0 } else { 10.0 })
            .unwrap();
        let volume = MemoryVolume::new(1).with_stack(0, 0, vec![slice]).unwrap();
        let params = AnalysisParams::new().channel(0).z_spread(0).brightest_path_distance(3);
        let map = MapAnnotations::with_images(Rc::new(volume), params).unwrap();
        let line = Polyline::from_xy(&[(0.0, 2.0), (30.0, 2.0)]);
        map.segments
            .update(RowKey::Pair(0, 0), [("segment", Value::Polyline(line))])
            .unwrap();
        map
    }

    #[test]
    fn test_pixel_columns_with_images() {
        let map = imaged();
        map.add_spine(RowKey::Pair(0, 0), Point3::new(8.0, 8.0, 0.0)).unwrap();
        let key = RowKey::Pair(0, 0);
        let sum = map.spines.get(key, "roiStats_ch1_sum").unwrap().as_f64().unwrap();
        let max = map.spines.get(key, "roiStats_ch1_max").unwrap();
        assert!(sum > 0.0);
        assert_eq!(max, Value::Float(100.0));
    }

    #[test]
    fn test_snap_background_prefers_dark_region() {
        let map = imaged();
        map.add_spine(RowKey::Pair(0, 0), Point3::new(14.0, 8.0, 0.0)).unwrap();
        let key = RowKey::Pair(0, 0);
        assert!(area(map.spines.get(key, "roi").unwrap().as_polygon().unwrap()) > 0.0);

        let (dx, _) = map.snap_background_offset(key).unwrap().unwrap();
        assert!(dx > 0.0);
        assert_eq!(map.spines.get(key, "xBackgroundOffset").unwrap(), Value::Float(dx));
    }

    #[test]
    fn test_snap_background_needs_images() {
        let map = annotations();
        map.add_spine(RowKey::Pair(0, 0), Point3::new(5.0, 1.0, 0.0)).unwrap();
        assert!(matches!(
            map.snap_background_offset(RowKey::Pair(0, 0)),
            Err(StoreError::Image(_))
        ));
    }
}
