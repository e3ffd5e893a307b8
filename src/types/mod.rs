//! Domain types shared by the engine, the stores and the service layer.

mod event;
mod group;

pub use event::{DEFAULT_EXCEPTION_TYPE, ExceptionEvent};
pub use group::{ExceptionGroup, GroupId, GroupMetadata, GroupingResult, TopException};
