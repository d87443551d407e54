/// Whole-state snapshots for undo. Unbounded and never persisted.
#[derive(Debug, Clone, Default)]
pub struct HistoryStack {
    snapshots: Vec<String>,
}

impl HistoryStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, snapshot: String) {
        self.snapshots.push(snapshot);
    }

    /// Drops the current snapshot and returns the one to restore, or `None`
    /// when there is nothing earlier to go back to.
    pub fn undo(&mut self) -> Option<&str> {
        if self.snapshots.len() <= 1 {
            return None;
        }
        self.snapshots.pop();
        self.snapshots.last().map(String::as_str)
    }

    pub fn can_undo(&self) -> bool {
        self.snapshots.len() > 1
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn clear(&mut self) {
        self.snapshots.clear();
    }
}
