//! The client-side handle for talking to the replicated store: hides
//! leader discovery and retries behind plain `get`/`put`/`append`
//! calls.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tracing::trace;

use crate::kvstore::{ClientId, GetRequest, KvErrorWire, OpKind, PutAppendRequest, Seq};
use crate::raft::NodeId;
use crate::transport::Transport;

const RETRY_SLEEP: Duration = Duration::from_millis(10);

/// One logical client. `client_id` is fixed for the clerk's lifetime;
/// `seq` only advances once a call has definitively succeeded, which is
/// what makes a retried `Append` idempotent.
pub struct Clerk {
    transport: Arc<dyn Transport>,
    peers: Vec<NodeId>,
    client_id: ClientId,
    seq: Mutex<Seq>,
    leader: Mutex<Option<NodeId>>,
}

impl Clerk {
    pub fn new(transport: Arc<dyn Transport>, peer_count: usize) -> Self {
        Self::with_peers(transport, (0..peer_count as NodeId).collect())
    }

    /// Like [`Clerk::new`], but restricted to a specific subset of node
    /// ids — useful for simulating a client that can only reach some
    /// minority of the cluster, regardless of which nodes those are.
    pub fn with_peers(transport: Arc<dyn Transport>, peers: Vec<NodeId>) -> Self {
        Clerk { transport, peers, client_id: rand::rng().random(), seq: Mutex::new(1), leader: Mutex::new(None) }
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        loop {
            let to = self.target();
            let seq = *self.seq.lock();
            let req = GetRequest { key: key.to_string(), client_id: self.client_id, seq };

            match self.transport.client_get(to, req).await {
                Ok(reply) => match reply.result {
                    Ok(value) => {
                        self.on_success(to);
                        return Some(value);
                    }
                    Err(KvErrorWire::NoKey) => {
                        self.on_success(to);
                        return None;
                    }
                    Err(KvErrorWire::WrongLeader) | Err(KvErrorWire::Timeout) => self.rotate(to),
                },
                Err(e) => {
                    trace!(node_id = to, error = %e, "get rpc failed");
                    self.rotate(to);
                }
            }
            tokio::time::sleep(RETRY_SLEEP).await;
        }
    }

    pub async fn put(&self, key: &str, value: &str) {
        self.put_append(key, value, OpKind::Put).await
    }

    pub async fn append(&self, key: &str, value: &str) {
        self.put_append(key, value, OpKind::Append).await
    }

    async fn put_append(&self, key: &str, value: &str, kind: OpKind) {
        loop {
            let to = self.target();
            let seq = *self.seq.lock();
            let req = PutAppendRequest { key: key.to_string(), value: value.to_string(), kind, client_id: self.client_id, seq };

            match self.transport.client_put_append(to, req).await {
                Ok(reply) => match reply.result {
                    Ok(()) => {
                        self.on_success(to);
                        return;
                    }
                    Err(_) => self.rotate(to),
                },
                Err(e) => {
                    trace!(node_id = to, error = %e, "put/append rpc failed");
                    self.rotate(to);
                }
            }
            tokio::time::sleep(RETRY_SLEEP).await;
        }
    }

    fn target(&self) -> NodeId {
        if let Some(leader) = *self.leader.lock() {
            return leader;
        }
        self.peers[rand::rng().random_range(0..self.peers.len())]
    }

    fn on_success(&self, served_by: NodeId) {
        *self.leader.lock() = Some(served_by);
        *self.seq.lock() += 1;
    }

    fn rotate(&self, failed: NodeId) {
        let mut leader = self.leader.lock();
        if *leader == Some(failed) {
            *leader = None;
        }
    }
}
