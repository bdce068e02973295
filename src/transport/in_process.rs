//! An in-memory [`Transport`] that calls straight into another node's
//! [`Raft`]/[`KvServer`] handles. Used by integration tests and the
//! dev-mode cluster runner, where spinning up real sockets would only
//! add noise. Supports injected latency and random drops so tests can
//! exercise partitions and flaky links without touching the network
//! stack.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use rand::Rng;

use crate::kvstore::{GetReply, GetRequest, KvServer, PutAppendReply, PutAppendRequest};
use crate::raft::{
    AppendEntriesArgs, AppendEntriesReply, InstallSnapshotArgs, InstallSnapshotReply, NodeId, Raft,
    RequestVoteArgs, RequestVoteReply,
};

use super::{Transport, TransportError, TransportResult};

/// The pair of handles a registered node exposes to its peers.
pub struct NodeHandle {
    pub raft: Arc<Raft>,
    pub kv: Arc<KvServer>,
}

pub struct InProcessTransport {
    nodes: RwLock<HashMap<NodeId, NodeHandle>>,
    /// Unordered pairs currently unable to reach each other, for
    /// partition simulation.
    severed: RwLock<HashSet<(NodeId, NodeId)>>,
    latency: Duration,
    drop_rate: f64,
}

impl InProcessTransport {
    pub fn new() -> Self {
        InProcessTransport {
            nodes: RwLock::new(HashMap::new()),
            severed: RwLock::new(HashSet::new()),
            latency: Duration::ZERO,
            drop_rate: 0.0,
        }
    }

    pub fn with_fault_injection(latency: Duration, drop_rate: f64) -> Self {
        InProcessTransport { latency, drop_rate, ..Self::new() }
    }

    pub fn register(&self, node_id: NodeId, handle: NodeHandle) {
        self.nodes.write().insert(node_id, handle);
    }

    /// Cuts the link between `a` and `b` in both directions until
    /// [`heal`](Self::heal) is called with the same pair.
    pub fn sever(&self, a: NodeId, b: NodeId) {
        self.severed.write().insert(ordered(a, b));
    }

    pub fn heal(&self, a: NodeId, b: NodeId) {
        self.severed.write().remove(&ordered(a, b));
    }

    async fn connected(&self, from: NodeId, to: NodeId) -> TransportResult<()> {
        if self.severed.read().contains(&ordered(from, to)) {
            return Err(TransportError(to));
        }
        if self.drop_rate > 0.0 && rand::rng().random::<f64>() < self.drop_rate {
            return Err(TransportError(to));
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Ok(())
    }

    async fn reachable(&self, to: NodeId) -> TransportResult<()> {
        if self.drop_rate > 0.0 && rand::rng().random::<f64>() < self.drop_rate {
            return Err(TransportError(to));
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Ok(())
    }

    fn handle(&self, to: NodeId) -> TransportResult<Arc<Raft>> {
        self.nodes.read().get(&to).map(|h| h.raft.clone()).ok_or(TransportError(to))
    }

    fn kv(&self, to: NodeId) -> TransportResult<Arc<KvServer>> {
        self.nodes.read().get(&to).map(|h| h.kv.clone()).ok_or(TransportError(to))
    }
}

fn ordered(a: NodeId, b: NodeId) -> (NodeId, NodeId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

impl Default for InProcessTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for InProcessTransport {
    async fn request_vote(&self, to: NodeId, args: RequestVoteArgs) -> TransportResult<RequestVoteReply> {
        self.connected(args.candidate_id, to).await?;
        let raft = self.handle(to)?;
        Ok(raft.request_vote(args))
    }

    async fn append_entries(&self, to: NodeId, args: AppendEntriesArgs) -> TransportResult<AppendEntriesReply> {
        self.connected(args.leader_id, to).await?;
        let raft = self.handle(to)?;
        Ok(raft.append_entries(args))
    }

    async fn install_snapshot(
        &self,
        to: NodeId,
        args: InstallSnapshotArgs,
    ) -> TransportResult<InstallSnapshotReply> {
        self.connected(args.leader_id, to).await?;
        let raft = self.handle(to)?;
        Ok(raft.install_snapshot(args))
    }

    async fn client_get(&self, to: NodeId, args: GetRequest) -> TransportResult<GetReply> {
        self.reachable(to).await?;
        let kv = self.kv(to)?;
        Ok(kv.get(args).await)
    }

    async fn client_put_append(&self, to: NodeId, args: PutAppendRequest) -> TransportResult<PutAppendReply> {
        self.reachable(to).await?;
        let kv = self.kv(to)?;
        Ok(kv.put_append(args).await)
    }
}
