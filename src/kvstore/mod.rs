//! The replicated key-value store built on top of [`crate::raft`]: a
//! string->string map with exactly-once client semantics and
//! threshold-triggered snapshotting.

pub(crate) mod op;
mod server;

pub use op::{
    ClientId, GetReply, GetRequest, KvErrorWire, Op, OpKind, PutAppendReply, PutAppendRequest, Seq,
};
pub use server::KvServer;
