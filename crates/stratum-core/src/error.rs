//! Unified Error Model
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StratumError {
    /// Setup-time misconfiguration. Fatal: the stack shape and the logging
    /// configuration must be correct before any operation runs.
    #[error("CONFIG/{0}")]
    Config(String),

    /// An operation failed inside a stage.
    #[error("STAGE/{0}")]
    Stage(String),

    /// A stage received a value of a kind it does not own.
    #[error("TYPE/{0}")]
    Type(String),

    /// Remote delegation failed.
    #[error("REMOTE/{0}")]
    Remote(String),

    /// The stage (or its connection) was already closed.
    #[error("CLOSED/{0}")]
    Closed(String),
}

pub type StratumResult<T> = Result<T, StratumError>;
