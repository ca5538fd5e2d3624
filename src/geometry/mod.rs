// ============================================================================
// Geometric Core
// ============================================================================
//
// Pure functions over centerlines, points and polygons. Nothing in here
// touches the frame store; computed columns call into it.
//
// ============================================================================

pub mod anchor;
pub mod background;
pub mod line;
pub mod primitives;
pub mod raster;
pub mod roi;
pub mod tracing;

pub use line::Side;
pub use primitives::{Point2, Point3, Polyline, round_to};
pub use roi::{CapStyle, SNAP_GRID};
pub use tracing::{PassthroughOptimizer, SegmentOptimizer};
