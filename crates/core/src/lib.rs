pub mod actions;
pub mod clock;
pub mod document;
pub mod error;
pub mod identity;
pub mod ids;
pub mod merge;
pub mod normalize;
pub mod slices;

pub use actions::Action;
pub use clock::{Clock, MAX_MILLIS, ManualClock, Millis, SliceClock, SystemClock};
pub use document::TripDocument;
pub use error::CoreError;
pub use ids::*;
pub use slices::*;
