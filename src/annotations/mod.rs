// ============================================================================
// Map Annotations
// ============================================================================
//
// The editing surface of a spine map: Segment and Spine frames over one
// shared store, the analysis parameters the interactive tools read, and
// the segment optimizer. Interactions live in `interactions.rs`; the
// single-timepoint facade in `time_point.rs`.
//
// ============================================================================

pub mod interactions;
pub mod time_point;

pub use time_point::TimePoint;

use crate::config::AnalysisParams;
use crate::core::{Ids, Result, RowKey, StoreError, Value};
use crate::frame::{LazyFrame, TimeProjection};
use crate::geometry::{PassthroughOptimizer, Point2, SegmentOptimizer};
use crate::image::ImageVolume;
use crate::schemas::{self, SEGMENT, SPINE};
use crate::storage::persistence::{read_file, write_atomic};
use crate::storage::{FrameStore, SharedStore, UpdateOptions};
use log::info;
use std::cell::Cell;
use std::path::Path;
use std::rc::Rc;

const SEGMENT_FILE: &str = "segments.msgpack";
const SPINE_FILE: &str = "spines.msgpack";
const PARAMS_FILE: &str = "analysis_params.json";

/// Phase of a pointer drag driving an interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DragState {
    Start,
    Moving,
    End,
    /// A one-shot edit outside any drag.
    #[default]
    Manual,
}

impl DragState {
    /// Steps after the first of a drag fold into the drag's undo step.
    pub fn replaces_log(self) -> bool {
        !matches!(self, Self::Start | Self::Manual)
    }

    pub fn options(self) -> UpdateOptions {
        UpdateOptions {
            replace_log: self.replaces_log(),
            skip_log: false,
            link_log: false,
        }
    }
}

pub struct MapAnnotations {
    store: SharedStore,
    segments: LazyFrame,
    spines: LazyFrame,
    params: AnalysisParams,
    optimizer: Rc<dyn SegmentOptimizer>,
    /// Cursor position of the background drag in progress.
    pending_background: Cell<Option<Point2>>,
}

impl MapAnnotations {
    /// Annotations without an image volume. Pixel statistics and the
    /// brightest-path search are unavailable.
    pub fn new(params: AnalysisParams) -> Result<Self> {
        Self::from_store(FrameStore::new(), params)
    }

    pub fn with_images(images: Rc<dyn ImageVolume>, params: AnalysisParams) -> Result<Self> {
        Self::from_store(FrameStore::with_images(images), params)
    }

    /// Registers the Segment and Spine schemas on `store`.
    pub fn from_store(mut store: FrameStore, params: AnalysisParams) -> Result<Self> {
        params.validate()?;
        schemas::register_all(&mut store)?;
        let store = store.shared();
        Ok(Self {
            segments: LazyFrame::new(Rc::clone(&store), SEGMENT)?,
            spines: LazyFrame::new(Rc::clone(&store), SPINE)?,
            store,
            params,
            optimizer: Rc::new(PassthroughOptimizer),
            pending_background: Cell::new(None),
        })
    }

    pub fn with_optimizer(mut self, optimizer: Rc<dyn SegmentOptimizer>) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn segments(&self) -> &LazyFrame {
        &self.segments
    }

    pub fn spines(&self) -> &LazyFrame {
        &self.spines
    }

    pub fn params(&self) -> &AnalysisParams {
        &self.params
    }

    pub fn set_params(&mut self, params: AnalysisParams) -> Result<()> {
        params.validate()?;
        self.params = params;
        Ok(())
    }

    pub fn time_point(&self, t: i64) -> Result<TimePoint<'_>> {
        TimePoint::new(self, t)
    }

    /// Rows of both frames at `t`.
    pub(crate) fn projections(&self, t: i64) -> Result<(TimeProjection, TimeProjection)> {
        Ok((
            TimeProjection::new(self.segments.clone(), t)?,
            TimeProjection::new(self.spines.clone(), t)?,
        ))
    }

    // ------------------------------------------------------------------------
    // Edits
    // ------------------------------------------------------------------------

    /// Writes stored spine fields. The key fields are rejected here; spine
    /// ids only change through [`connect`](Self::connect) and
    /// [`disconnect`](Self::disconnect).
    pub fn update_spine<I, K>(&self, ids: impl Into<Ids>, values: I, options: UpdateOptions) -> Result<bool>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let values = reject_key_fields(&self.spines, values)?;
        self.spines.update_with(ids, values, options)
    }

    /// Writes stored segment fields. The key fields are rejected here.
    pub fn update_segment<I, K>(&self, ids: impl Into<Ids>, values: I, options: UpdateOptions) -> Result<bool>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let values = reject_key_fields(&self.segments, values)?;
        self.segments.update_with(ids, values, options)
    }

    pub fn delete_spine(&self, ids: impl Into<Ids>) -> Result<bool> {
        self.spines.drop(ids)
    }

    /// Rejected with a constraint violation while spines are attached.
    pub fn delete_segment(&self, ids: impl Into<Ids>) -> Result<bool> {
        self.segments.drop(ids)
    }

    pub fn new_unassigned_spine_id(&self) -> Result<i64> {
        self.spines.new_unassigned_id()
    }

    pub fn new_unassigned_segment_id(&self) -> Result<i64> {
        self.segments.new_unassigned_id()
    }

    /// Spines attached to `segment` at its time.
    pub fn spine_count(&self, segment: RowKey) -> Result<usize> {
        let reverse = self
            .store
            .borrow()
            .reverse_map_ids(SPINE, SEGMENT, &[segment])?;
        Ok(reverse.first().map_or(0, |spines| spines.len()))
    }

    pub fn undo(&self) -> Result<bool> {
        self.store.borrow_mut().undo()
    }

    pub fn redo(&self) -> Result<bool> {
        self.store.borrow_mut().redo()
    }

    // ------------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------------

    /// Writes both frames and the params into `dir`, one file each.
    pub fn save<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        let dir = dir.as_ref();
        {
            let store = self.store.borrow();
            write_atomic(dir.join(SEGMENT_FILE), &store.serialize_table(SEGMENT)?)?;
            write_atomic(dir.join(SPINE_FILE), &store.serialize_table(SPINE)?)?;
        }
        self.params.save(dir.join(PARAMS_FILE))?;
        info!("saved annotations to {}", dir.display());
        Ok(())
    }

    /// Replaces both frames and the params with what [`save`](Self::save)
    /// wrote into `dir`. The undo history is cleared.
    pub fn load<P: AsRef<Path>>(&mut self, dir: P) -> Result<()> {
        let dir = dir.as_ref();
        let params = AnalysisParams::load(dir.join(PARAMS_FILE))?;
        let segments = read_file(dir.join(SEGMENT_FILE))?;
        let spines = read_file(dir.join(SPINE_FILE))?;
        {
            let mut store = self.store.borrow_mut();
            store.load_table(SEGMENT, &segments)?;
            store.load_table(SPINE, &spines)?;
        }
        self.params = params;
        self.pending_background.set(None);
        Ok(())
    }
}

fn reject_key_fields<I, K>(frame: &LazyFrame, values: I) -> Result<Vec<(String, Value)>>
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    let values: Vec<(String, Value)> = values.into_iter().map(|(k, v)| (k.into(), v)).collect();
    if let Some((field, _)) = values.iter().find(|(k, _)| frame.schema().index().contains(k)) {
        return Err(StoreError::InvalidKey(format!(
            "'{}' must be set on the {} key",
            field,
            frame.name()
        )));
    }
    Ok(values)
}
