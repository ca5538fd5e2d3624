pub mod lazy;
pub mod projection;
pub mod result;

pub use lazy::LazyFrame;
pub use projection::TimeProjection;
pub use result::FrameRows;
