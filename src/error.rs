use thiserror::Error;
use uuid::Uuid;

use crate::pool::HandleState;

#[derive(Error, Debug)]
pub enum TracerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Environment variable error: {0}")]
    EnvVar(String),
}

#[derive(Error, Debug, Clone)]
pub enum PoolError {
    #[error("Acquire failed: {0}")]
    AcquireFailed(String),

    #[error("Could not acquire resource after {attempts} attempts")]
    Exhausted { attempts: u32 },

    #[error("Resource {0} has been destroyed")]
    Destroyed(u64),

    #[error("Invalid state transition for resource {id}: {from:?} -> {to:?}")]
    InvalidStateTransition {
        id: u64,
        from: HandleState,
        to: HandleState,
    },

    #[error("Pool is draining")]
    Draining,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Client closed")]
    Closed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("Transaction {0} has already ended")]
    AlreadyEnded(Uuid),

    #[error("Segment {segment} not found in transaction {transaction}")]
    SegmentNotFound { transaction: Uuid, segment: usize },
}

pub type Result<T> = std::result::Result<T, TracerError>;
