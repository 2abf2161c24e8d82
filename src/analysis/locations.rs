//! Node location lookup.

use std::collections::HashMap;

use super::types::*;

/// Source of node positions
pub trait LocationSource {
    /// Latest position of `node` as of `as_of` (or overall when `None`)
    fn location_of(&self, node: NodeId, as_of: Option<Timestamp>) -> Option<NodeLocation>;
}

/// In-memory position history per node
#[derive(Debug, Clone, Default)]
pub struct LocationTable {
    /// Fixes per node, sorted by `as_of`
    history: HashMap<NodeId, Vec<NodeLocation>>,
}

impl LocationTable {
    pub fn new(fixes: impl IntoIterator<Item = NodeLocation>) -> Self {
        let mut table = Self::default();
        for fix in fixes {
            table.insert(fix);
        }
        table
    }

    pub fn insert(&mut self, fix: NodeLocation) {
        if !fix.latitude.is_finite() || !fix.longitude.is_finite() {
            log::debug!("Ignoring non-finite position for {}", fix.node_id);
            return;
        }
        let fixes = self.history.entry(fix.node_id).or_default();
        let pos = fixes.partition_point(|f| f.as_of <= fix.as_of);
        fixes.insert(pos, fix);
    }

    pub fn node_count(&self) -> usize {
        self.history.len()
    }
}

impl LocationSource for LocationTable {
    fn location_of(&self, node: NodeId, as_of: Option<Timestamp>) -> Option<NodeLocation> {
        let fixes = self.history.get(&node)?;
        match as_of {
            None => fixes.last().copied(),
            Some(ts) => {
                let idx = fixes.partition_point(|f| f.as_of <= ts);
                idx.checked_sub(1).map(|i| fixes[i])
            }
        }
    }
}

impl<T: LocationSource + ?Sized> LocationSource for &T {
    fn location_of(&self, node: NodeId, as_of: Option<Timestamp>) -> Option<NodeLocation> {
        (**self).location_of(node, as_of)
    }
}
