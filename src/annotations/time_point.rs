use super::{DragState, MapAnnotations};
use crate::core::{Result, RowKey, Value};
use crate::frame::TimeProjection;
use crate::geometry::{Point2, Point3, Polyline};
use crate::storage::UpdateOptions;

/// The annotations at one timepoint, addressed by bare spine and segment ids.
///
/// Reads go through [`TimeProjection`]s of both frames; edits forward to
/// [`MapAnnotations`] with this timepoint attached to every id.
pub struct TimePoint<'a> {
    annotations: &'a MapAnnotations,
    t: i64,
    segments: TimeProjection,
    spines: TimeProjection,
}

impl<'a> TimePoint<'a> {
    pub fn new(annotations: &'a MapAnnotations, t: i64) -> Result<Self> {
        let (segments, spines) = annotations.projections(t)?;
        Ok(Self {
            annotations,
            t,
            segments,
            spines,
        })
    }

    pub fn t(&self) -> i64 {
        self.t
    }

    pub fn annotations(&self) -> &MapAnnotations {
        self.annotations
    }

    pub fn segments(&self) -> &TimeProjection {
        &self.segments
    }

    pub fn spines(&self) -> &TimeProjection {
        &self.spines
    }

    fn key(&self, id: i64) -> RowKey {
        RowKey::Pair(id, self.t)
    }

    // ------------------------------------------------------------------------
    // Spines
    // ------------------------------------------------------------------------

    pub fn add_spine(&self, segment_id: i64, point: Point3) -> Result<Option<i64>> {
        self.annotations.add_spine(self.key(segment_id), point)
    }

    pub fn move_spine(&self, spine_id: i64, point: Point3, state: DragState) -> Result<bool> {
        self.annotations.move_spine(self.key(spine_id), point, state)
    }

    pub fn move_anchor(&self, spine_id: i64, cursor: Point3, state: DragState) -> Result<bool> {
        self.annotations.move_anchor(self.key(spine_id), cursor, state)
    }

    pub fn move_background_roi(&self, spine_id: i64, cursor: Point2, state: DragState) -> Result<bool> {
        self.annotations.move_background_roi(self.key(spine_id), cursor, state)
    }

    pub fn move_roi_extend(&self, spine_id: i64, cursor: Point2, state: DragState) -> Result<bool> {
        self.annotations.move_roi_extend(self.key(spine_id), cursor, state)
    }

    pub fn move_roi_radius(&self, spine_id: i64, cursor: Point2, state: DragState) -> Result<bool> {
        self.annotations.move_roi_radius(self.key(spine_id), cursor, state)
    }

    pub fn snap_background_offset(&self, spine_id: i64) -> Result<Option<(f64, f64)>> {
        self.annotations.snap_background_offset(self.key(spine_id))
    }

    /// Connects a spine here to `to`, a spine at another timepoint.
    pub fn connect(&self, spine_id: i64, to: RowKey) -> Result<bool> {
        self.annotations.connect(self.key(spine_id), to)
    }

    pub fn disconnect(&self, spine_id: i64) -> Result<bool> {
        self.annotations.disconnect(self.key(spine_id))
    }

    pub fn update_spine<I, K>(&self, spine_id: i64, values: I, options: UpdateOptions) -> Result<bool>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        self.annotations.update_spine(self.key(spine_id), values, options)
    }

    pub fn delete_spine(&self, spine_id: i64) -> Result<bool> {
        self.annotations.delete_spine(self.key(spine_id))
    }

    // ------------------------------------------------------------------------
    // Segments
    // ------------------------------------------------------------------------

    pub fn add_segment(&self) -> Result<i64> {
        self.annotations.add_segment(self.t)
    }

    pub fn move_segment_radius(&self, segment_id: i64, cursor: Point2, state: DragState) -> Result<bool> {
        self.annotations.move_segment_radius(self.key(segment_id), cursor, state)
    }

    pub fn connect_segment(&self, segment_id: i64, to: RowKey) -> Result<bool> {
        self.annotations.connect_segment(self.key(segment_id), to)
    }

    pub fn disconnect_segment(&self, segment_id: i64) -> Result<bool> {
        self.annotations.disconnect_segment(self.key(segment_id))
    }

    pub fn append_segment_point(&self, segment_id: i64, point: Point3, speculate: bool) -> Result<Option<Polyline>> {
        self.annotations
            .append_segment_point(self.key(segment_id), point, speculate)
    }

    pub fn inject_segment_point(&self, segment_id: i64, point: Point3) -> Result<bool> {
        self.annotations.inject_segment_point(self.key(segment_id), point)
    }

    pub fn move_segment_point(&self, segment_id: i64, index: usize, point: Point3, state: DragState) -> Result<bool> {
        self.annotations
            .move_segment_point(self.key(segment_id), index, point, state)
    }

    pub fn delete_segment_point(&self, segment_id: i64, index: usize) -> Result<bool> {
        self.annotations.delete_segment_point(self.key(segment_id), index)
    }

    pub fn commit_segment_tracing(&self, segment_id: i64) -> Result<bool> {
        self.annotations.commit_segment_tracing(self.key(segment_id))
    }

    pub fn update_segment<I, K>(&self, segment_id: i64, values: I, options: UpdateOptions) -> Result<bool>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        self.annotations
            .update_segment(self.key(segment_id), values, options)
    }

    pub fn delete_segment(&self, segment_id: i64) -> Result<bool> {
        self.annotations.delete_segment(self.key(segment_id))
    }

    pub fn spine_count(&self, segment_id: i64) -> Result<usize> {
        self.annotations.spine_count(self.key(segment_id))
    }

    pub fn undo(&self) -> Result<bool> {
        self.annotations.undo()
    }

    pub fn redo(&self) -> Result<bool> {
        self.annotations.redo()
    }
}
