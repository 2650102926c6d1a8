//! Group units
//!
//! Groups are synchronization points that bundle other units together.
//! They hold no processes; status and lifecycle come from their requirements.

use super::UnitId;

#[derive(Debug, Clone, Default)]
pub struct GroupUnit {
    /// Requirement names as configured, in declaration order
    pub requires: Vec<String>,
    /// Resolved requirements, filled in when the graph is built
    pub(crate) requirements: Vec<UnitId>,
}

impl GroupUnit {
    pub fn new(requires: Vec<String>) -> Self {
        Self {
            requires,
            requirements: Vec::new(),
        }
    }

    pub fn requirements(&self) -> &[UnitId] {
        &self.requirements
    }
}
