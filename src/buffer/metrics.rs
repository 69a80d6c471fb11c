#[derive(Debug, Clone, PartialEq)]
pub struct QueueMetrics {
    pub capacity: usize,
    pub len: usize,
    pub pushed: u64,
    pub popped: u64,
    /// Pushes refused because the queue was stopped.
    pub rejected: u64,
    pub stopped: bool,
}

impl QueueMetrics {
    pub fn fill_ratio(&self) -> f64 {
        self.len as f64 / self.capacity as f64
    }
}
