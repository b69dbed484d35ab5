/// Depth bookkeeping for the top-down passes of one hierarchical type.
///
/// Pass `n` imports rows at depth `n`. The maximum known depth grows as rows
/// are scanned, and passes continue until one finds no rows at a depth past
/// that maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HierarchyTracker {
    current: usize,
    max_known: usize,
}

impl HierarchyTracker {
    pub fn new() -> Self {
        Self {
            current: 1,
            max_known: 1,
        }
    }

    /// Depth imported by the running pass.
    pub fn current(&self) -> usize {
        self.current
    }

    pub fn max_known(&self) -> usize {
        self.max_known
    }

    /// Note a scanned row's depth; true when it belongs to the running pass.
    pub fn observe(&mut self, depth: usize) -> bool {
        self.max_known = self.max_known.max(depth);
        depth == self.current
    }

    /// Close the running pass. Returns false once the hierarchy is done.
    pub fn advance(&mut self, rows_in_pass: usize) -> bool {
        if rows_in_pass == 0 && self.current > self.max_known {
            return false;
        }
        self.current += 1;
        true
    }
}

impl Default for HierarchyTracker {
    fn default() -> Self {
        Self::new()
    }
}
