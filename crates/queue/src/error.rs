use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    /// The worker side of the channel is gone.
    #[error("evaluation queue is closed")]
    Closed,
}
