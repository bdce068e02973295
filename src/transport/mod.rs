//! RPC transport abstraction.
//!
//! The Raft core and the `Clerk` client both see peers only through this
//! trait: a lossy, reordering, unreliable unicast where a call either
//! returns a reply within its timeout or doesn't. Callers never learn
//! *why* a call failed (timeout, refused connection, garbled frame) —
//! only that it did, which is all the retry logic above ever needs.

use async_trait::async_trait;
use thiserror::Error;

use crate::kvstore::op::{GetReply, GetRequest, PutAppendReply, PutAppendRequest};
use crate::raft::{
    AppendEntriesArgs, AppendEntriesReply, InstallSnapshotArgs, InstallSnapshotReply, NodeId,
    RequestVoteArgs, RequestVoteReply,
};

pub mod in_process;
pub mod tcp;

pub use in_process::InProcessTransport;
pub use tcp::TcpTransport;

#[derive(Error, Debug, Clone)]
#[error("rpc to node {0} did not complete")]
pub struct TransportError(pub NodeId);

pub type TransportResult<T> = Result<T, TransportError>;

#[async_trait]
pub trait Transport: Send + Sync {
    async fn request_vote(&self, to: NodeId, args: RequestVoteArgs) -> TransportResult<RequestVoteReply>;

    async fn append_entries(
        &self,
        to: NodeId,
        args: AppendEntriesArgs,
    ) -> TransportResult<AppendEntriesReply>;

    async fn install_snapshot(
        &self,
        to: NodeId,
        args: InstallSnapshotArgs,
    ) -> TransportResult<InstallSnapshotReply>;

    async fn client_get(&self, to: NodeId, args: GetRequest) -> TransportResult<GetReply>;

    async fn client_put_append(
        &self,
        to: NodeId,
        args: PutAppendRequest,
    ) -> TransportResult<PutAppendReply>;
}
