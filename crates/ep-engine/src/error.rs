use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] ep_store::StoreError),
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("{0} is already running")]
    AlreadyRunning(&'static str),
    #[error("message {0} not found")]
    MessageNotFound(String),
}
