use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BufferError {
    #[error("Invalid buffer capacity: {capacity}")]
    InvalidCapacity { capacity: usize },
}

/// Returned by [`BoundedQueue::push`](super::BoundedQueue::push) when the
/// queue has been stopped. The rejected item is handed back to the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PushError<T> {
    #[error("Queue is stopped")]
    Stopped(T),
}

impl<T> PushError<T> {
    pub fn into_inner(self) -> T {
        match self {
            PushError::Stopped(item) => item,
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryPopError {
    /// Nothing queued right now; more may arrive.
    #[error("Queue is empty")]
    Empty,
    /// Stopped and fully drained; nothing will ever arrive again.
    #[error("Queue is stopped and drained")]
    Stopped,
}
