//! Object Module - block layout shared by the mutator and the collector

pub mod custom;
pub mod header;
pub mod value;
pub mod weak;

pub use custom::{CustomOps, CustomOpsTable};
pub use header::{tag, Color, Header, HeaderFields, MAX_WOSIZE, NO_PROFINFO, PROFINFO_MASK};
pub use value::Value;
pub use weak::{WeakCursor, WeakStats};
