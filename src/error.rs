use thiserror::Error;

use crate::raft::NodeId;

/// Errors from the [`crate::persist::StateStorage`] layer.
#[derive(Error, Debug)]
pub enum PersistError {
    #[error("persister I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode persisted state: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("failed to decode persisted state: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

pub type PersistResult<T> = std::result::Result<T, PersistError>;

/// Errors from the Raft consensus core.
#[derive(Error, Debug)]
pub enum RaftError {
    #[error("not the leader{}", .leader_hint.map(|id| format!(", try node {id}")).unwrap_or_default())]
    NotLeader { leader_hint: Option<NodeId> },

    #[error("stale term: local {local}, request carried {request}")]
    StaleTerm { local: u64, request: u64 },

    #[error(transparent)]
    Persist(#[from] PersistError),

    #[error("raft internal error: {0}")]
    Internal(String),
}

pub type RaftResult<T> = std::result::Result<T, RaftError>;

/// Reply status codes for the replicated KV service, mirroring the
/// `Err`/`OK` taxonomy clients retry against.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum KvError {
    #[error("not the leader")]
    WrongLeader,

    #[error("no such key")]
    NoKey,

    #[error("timed out waiting for the command to commit")]
    Timeout,
}

pub type KvResult<T> = std::result::Result<T, KvError>;

/// Crate-wide catch-all, used by the binaries and transport layer.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Persist(#[from] PersistError),

    #[error(transparent)]
    Raft(#[from] RaftError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
