// ============================================================================
// spinemap Library
// ============================================================================
//
// A lazy, dependency-tracked frame store for dendritic spine annotations.
// Users edit a handful of stored columns (spine point, anchor, segment
// tracing, radius, background offset); every derived column is computed on
// first read, cached, and invalidated precisely when something it reads
// changes. Every edit is undoable.
//
// ============================================================================

pub mod annotations;
pub mod config;
pub mod core;
pub mod frame;
pub mod geometry;
pub mod history;
pub mod image;
pub mod schemas;
pub mod storage;

pub use annotations::{DragState, MapAnnotations, TimePoint};
pub use config::AnalysisParams;
pub use core::{DataType, Ids, Result, RowKey, StoreError, Value};
pub use frame::{FrameRows, LazyFrame, TimeProjection};
pub use geometry::{Point2, Point3, Polyline};
pub use image::{ImageSlice, ImageVolume, MemoryVolume};
pub use storage::{FrameStore, Schema, SharedStore, UpdateOptions};
