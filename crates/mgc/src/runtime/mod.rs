//! Runtime Module - services the collector provides to the mutator
//!
//! - Finalisation of unreachable values

pub mod finaliser;

pub use finaliser::{FinaliseFn, Finaliser};
