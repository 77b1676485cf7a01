//! Custom Blocks - blocks with a finalizer run when the sweeper reclaims them
//!
//! Field 0 of a `CUSTOM` block holds the id of its operations as an
//! immediate integer; the payload follows.

use super::value::Value;

/// Operations attached to a family of custom blocks
#[derive(Debug, Clone)]
pub struct CustomOps {
    /// Identifier used in diagnostics
    pub name: String,
    /// Called once when a white block of this family is swept
    pub finalize: Option<fn(Value)>,
}

/// Registered custom operations, indexed by the id stored in field 0
#[derive(Debug, Default)]
pub struct CustomOpsTable {
    ops: Vec<CustomOps>,
}

impl CustomOpsTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `ops` and return the id to store in field 0
    pub fn register(&mut self, ops: CustomOps) -> usize {
        self.ops.push(ops);
        self.ops.len() - 1
    }

    pub fn get(&self, id: usize) -> Option<&CustomOps> {
        self.ops.get(id)
    }

    /// Operations of the custom block `v`
    ///
    /// # Safety
    ///
    /// `v` must be a live block tagged `CUSTOM` with at least one field.
    pub unsafe fn ops_of(&self, v: Value) -> Option<&CustomOps> {
        let id = v.field(0);
        if !id.is_int() || id.to_int() < 0 {
            return None;
        }
        self.get(id.to_int() as usize)
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}
