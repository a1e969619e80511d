use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("backend contract violation: {0}")]
    ContractViolation(String),
}
