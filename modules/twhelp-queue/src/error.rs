use thiserror::Error;

use crate::task::TaskKind;

#[derive(Error, Debug)]
pub enum RouterError {
    #[error("No lane configured for {0}")]
    UnknownLane(String),

    #[error("No handler registered for task {0}")]
    MissingHandler(TaskKind),

    #[error("Queue transport error: {0}")]
    Transport(String),

    #[error("Couldn't encode task payload: {0}")]
    Payload(#[from] serde_json::Error),
}
