use crate::domain::error::ControllerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("{0}")]
    Usage(String),
    #[error(transparent)]
    Controller(#[from] ControllerError),
}

impl From<ConsoleError> for String {
    fn from(err: ConsoleError) -> Self {
        err.to_string()
    }
}
