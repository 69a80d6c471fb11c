pub mod error;
pub mod metrics;
pub mod queue;

pub use error::{BufferError, PushError, TryPopError};
pub use metrics::QueueMetrics;
pub use queue::{BoundedQueue, DEFAULT_CAPACITY};
