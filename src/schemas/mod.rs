//! The two entity frames of a spine map.

pub mod segment;
pub mod spine;

use crate::core::Result;
use crate::storage::FrameStore;

pub const SEGMENT: &str = "Segment";
pub const SPINE: &str = "Spine";

/// Registers Segment, then Spine (which references it).
pub fn register_all(store: &mut FrameStore) -> Result<()> {
    store.register(segment::schema()?)?;
    store.register(spine::schema()?)?;
    Ok(())
}
