pub mod bookkeeping;
pub mod error;
pub mod executor;
pub mod planner;
pub mod reconciler;
pub mod recovery;

pub use error::*;
