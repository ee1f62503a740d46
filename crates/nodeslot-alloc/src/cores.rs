//! Physical cores and their processing units.

use serde::Serialize;

/// A physical core, the leaf of the topology.
///
/// Busy state is kept per processing unit; everything above the core derives
/// its availability from these flags.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Core {
    id: u32,
    /// OS indices of the processing units on this core, in discovery order.
    indices: Vec<u32>,
    busy: Vec<bool>,
}

impl Core {
    pub fn new(id: u32, indices: Vec<u32>) -> Self {
        let busy = vec![false; indices.len()];
        Self { id, indices, busy }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn total_threads(&self) -> u32 {
        self.indices.len() as u32
    }

    /// True iff no processing unit on this core is in use.
    pub fn is_free(&self) -> bool {
        self.busy.iter().all(|busy| !busy)
    }

    pub fn processing_units_open(&self) -> u32 {
        self.busy.iter().filter(|busy| !**busy).count() as u32
    }

    /// Busy flag for the processing unit with OS index `index`, if this core owns it.
    pub fn is_index_busy(&self, index: u32) -> Option<bool> {
        self.position(index).map(|pos| self.busy[pos])
    }

    /// Claim every processing unit on the core and return their indices.
    pub(crate) fn mark_as_busy(&mut self) -> Vec<u32> {
        self.busy.iter_mut().for_each(|busy| *busy = true);
        self.indices.clone()
    }

    /// Claim the first open processing unit, if any.
    pub(crate) fn take_open_processing_unit(&mut self) -> Option<u32> {
        let pos = self.busy.iter().position(|busy| !busy)?;
        self.busy[pos] = true;
        Some(self.indices[pos])
    }

    /// Return one processing unit to the pool.
    ///
    /// Returns `None` if the index is not on this core, otherwise whether the
    /// core went from busy to free because of this call.
    pub(crate) fn free_pu_index(&mut self, index: u32) -> Option<bool> {
        let pos = self.position(index)?;
        if !self.busy[pos] {
            return Some(false);
        }
        self.busy[pos] = false;
        Some(self.is_free())
    }

    fn position(&self, index: u32) -> Option<usize> {
        self.indices.iter().position(|&i| i == index)
    }
}
