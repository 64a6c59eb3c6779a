use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("broker error: {0}")]
    Database(String),

    #[error("queue is stopped")]
    Stopped,

    #[error("configuration error: {0}")]
    Config(String),
}
