pub mod pixels;
pub mod volume;

pub use pixels::{Aggregate, Shape, ShapeRequest, gather_pixels};
pub use volume::{CachedVolume, ImageSlice, ImageVolume, MemoryVolume};
