use serde::{Deserialize, Serialize};

use crate::error::KvError;

/// A client's globally unique identity, picked once at `Clerk` creation.
pub type ClientId = u64;

/// Per-client monotonic sequence number, fixed across retries of one
/// logical call.
pub type Seq = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub enum OpKind {
    Get,
    Put,
    Append,
}

/// The command submitted to Raft for every client call, `Get` included
/// (so reads go through the same ordering and dedup path as writes).
#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Op {
    pub client_id: ClientId,
    pub seq: Seq,
    pub key: String,
    pub value: String,
    pub kind: OpKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetRequest {
    pub key: String,
    pub client_id: ClientId,
    pub seq: Seq,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetReply {
    pub result: Result<String, KvErrorWire>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutAppendRequest {
    pub key: String,
    pub value: String,
    pub kind: OpKind,
    pub client_id: ClientId,
    pub seq: Seq,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutAppendReply {
    pub result: Result<(), KvErrorWire>,
}

/// `KvError` isn't `Serialize`/`Deserialize` (it derives from `thiserror`
/// and borrows nothing that needs it), so replies carry this wire form
/// and convert back at the edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KvErrorWire {
    WrongLeader,
    NoKey,
    Timeout,
}

impl From<KvError> for KvErrorWire {
    fn from(e: KvError) -> Self {
        match e {
            KvError::WrongLeader => KvErrorWire::WrongLeader,
            KvError::NoKey => KvErrorWire::NoKey,
            KvError::Timeout => KvErrorWire::Timeout,
        }
    }
}

impl From<KvErrorWire> for KvError {
    fn from(e: KvErrorWire) -> Self {
        match e {
            KvErrorWire::WrongLeader => KvError::WrongLeader,
            KvErrorWire::NoKey => KvError::NoKey,
            KvErrorWire::Timeout => KvError::Timeout,
        }
    }
}
