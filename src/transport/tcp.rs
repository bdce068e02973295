//! A length-prefixed bincode-over-TCP [`Transport`], for real
//! multi-process clusters. Each call opens a fresh connection; that
//! costs a handshake per RPC but keeps the client side free of
//! connection-pool bookkeeping, which at this cluster's scale is the
//! better trade.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{instrument, warn};

use crate::kvstore::{GetReply, GetRequest, KvServer, PutAppendReply, PutAppendRequest};
use crate::raft::{
    AppendEntriesArgs, AppendEntriesReply, InstallSnapshotArgs, InstallSnapshotReply, NodeId, Raft,
    RequestVoteArgs, RequestVoteReply,
};

use super::{Transport, TransportError, TransportResult};

const MAX_FRAME_BYTES: u32 = 64 * 1024 * 1024;

#[derive(Debug, Serialize, Deserialize)]
enum Request {
    RequestVote(RequestVoteArgs),
    AppendEntries(AppendEntriesArgs),
    InstallSnapshot(InstallSnapshotArgs),
    ClientGet(GetRequest),
    ClientPutAppend(PutAppendRequest),
}

#[derive(Debug, Serialize, Deserialize)]
enum Response {
    RequestVote(RequestVoteReply),
    AppendEntries(AppendEntriesReply),
    InstallSnapshot(InstallSnapshotReply),
    ClientGet(GetReply),
    ClientPutAppend(PutAppendReply),
}

async fn write_frame<T: Serialize>(stream: &mut TcpStream, value: &T) -> std::io::Result<()> {
    let payload = bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    stream.write_u32(payload.len() as u32).await?;
    stream.write_all(&payload).await
}

async fn read_frame<T: for<'de> Deserialize<'de>>(stream: &mut TcpStream) -> std::io::Result<T> {
    let len = stream.read_u32().await?;
    if len > MAX_FRAME_BYTES {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "frame too large"));
    }
    let mut buf = vec![0u8; len as usize];
    stream.read_exact(&mut buf).await?;
    let (value, _) = bincode::serde::decode_from_slice(&buf, bincode::config::standard())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    Ok(value)
}

/// Client side: dials peers by address on every call.
pub struct TcpTransport {
    peer_addrs: HashMap<NodeId, String>,
    rpc_timeout: Duration,
}

impl TcpTransport {
    pub fn new(peer_addrs: HashMap<NodeId, String>, rpc_timeout: Duration) -> Self {
        TcpTransport { peer_addrs, rpc_timeout }
    }

    async fn call(&self, to: NodeId, request: Request) -> TransportResult<Response> {
        let addr = self.peer_addrs.get(&to).ok_or(TransportError(to))?;
        let attempt = async {
            let mut stream = TcpStream::connect(addr).await?;
            write_frame(&mut stream, &request).await?;
            read_frame::<Response>(&mut stream).await
        };
        match tokio::time::timeout(self.rpc_timeout, attempt).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => {
                warn!(node_id = to, error = %e, "rpc failed");
                Err(TransportError(to))
            }
            Err(_) => Err(TransportError(to)),
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn request_vote(&self, to: NodeId, args: RequestVoteArgs) -> TransportResult<RequestVoteReply> {
        match self.call(to, Request::RequestVote(args)).await? {
            Response::RequestVote(reply) => Ok(reply),
            _ => Err(TransportError(to)),
        }
    }

    async fn append_entries(&self, to: NodeId, args: AppendEntriesArgs) -> TransportResult<AppendEntriesReply> {
        match self.call(to, Request::AppendEntries(args)).await? {
            Response::AppendEntries(reply) => Ok(reply),
            _ => Err(TransportError(to)),
        }
    }

    async fn install_snapshot(
        &self,
        to: NodeId,
        args: InstallSnapshotArgs,
    ) -> TransportResult<InstallSnapshotReply> {
        match self.call(to, Request::InstallSnapshot(args)).await? {
            Response::InstallSnapshot(reply) => Ok(reply),
            _ => Err(TransportError(to)),
        }
    }

    async fn client_get(&self, to: NodeId, args: GetRequest) -> TransportResult<GetReply> {
        match self.call(to, Request::ClientGet(args)).await? {
            Response::ClientGet(reply) => Ok(reply),
            _ => Err(TransportError(to)),
        }
    }

    async fn client_put_append(&self, to: NodeId, args: PutAppendRequest) -> TransportResult<PutAppendReply> {
        match self.call(to, Request::ClientPutAppend(args)).await? {
            Response::ClientPutAppend(reply) => Ok(reply),
            _ => Err(TransportError(to)),
        }
    }
}

/// Server side: accepts connections and dispatches each frame straight
/// into the local `Raft`/`KvServer` handles.
pub async fn serve(bind_addr: &str, raft: Arc<Raft>, kv: Arc<KvServer>) -> std::io::Result<()> {
    let listener = TcpListener::bind(bind_addr).await?;
    loop {
        let (stream, peer) = listener.accept().await?;
        let raft = raft.clone();
        let kv = kv.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, raft, kv).await {
                warn!(%peer, error = %e, "rpc connection ended with an error");
            }
        });
    }
}

#[instrument(skip(stream, raft, kv))]
async fn handle_connection(mut stream: TcpStream, raft: Arc<Raft>, kv: Arc<KvServer>) -> std::io::Result<()> {
    loop {
        let request: Request = match read_frame(&mut stream).await {
            Ok(req) => req,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e),
        };

        let response = match request {
            Request::RequestVote(args) => Response::RequestVote(raft.request_vote(args)),
            Request::AppendEntries(args) => Response::AppendEntries(raft.append_entries(args)),
            Request::InstallSnapshot(args) => Response::InstallSnapshot(raft.install_snapshot(args)),
            Request::ClientGet(args) => Response::ClientGet(kv.get(args).await),
            Request::ClientPutAppend(args) => Response::ClientPutAppend(kv.put_append(args).await),
        };

        write_frame(&mut stream, &response).await?;
    }
}
