pub mod cache;
pub mod registry;

pub use cache::{Direction, Status, TagCache, TagPayload};
pub use registry::{Function, TagDefinition, TagMapping, TagRegistry};
