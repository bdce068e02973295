use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::error::{KvError, PersistError, Result};
use crate::raft::{ApplyMsg, LogIndex, Raft};

use super::op::{ClientId, GetReply, GetRequest, Op, OpKind, PutAppendReply, PutAppendRequest, Seq};

/// What an applied `Op` produced, delivered back to whichever RPC
/// handler is waiting on its commit index. Carries `client_id`/`seq` so
/// the waiter can confirm the entry that landed there is the one it
/// submitted, not some other command that reused the index after a
/// leadership change.
struct Applied {
    client_id: ClientId,
    seq: Seq,
    value: String,
    found: bool,
}

/// The replicated state machine: a string->string map plus the
/// per-client dedup table, applied strictly in the order Raft commits
/// entries.
pub struct KvServer {
    raft: Arc<Raft>,
    state: RwLock<HashMap<String, String>>,
    client_seq: RwLock<HashMap<ClientId, Seq>>,
    wait_channels: Mutex<HashMap<LogIndex, oneshot::Sender<Applied>>>,
    max_raft_state_bytes: i64,
    rpc_timeout: Duration,
}

#[derive(serde::Serialize, serde::Deserialize, bincode::Encode, bincode::Decode)]
struct SnapshotPayload {
    state: HashMap<String, String>,
    client_seq: HashMap<ClientId, Seq>,
}

impl KvServer {
    /// A snapshot that's present but fails to decode is corruption, not
    /// absence — surfaced as an error rather than silently starting from
    /// an empty map, since that would quietly resurrect keys a client
    /// was already told were durable.
    pub fn new(
        raft: Arc<Raft>,
        apply_rx: mpsc::Receiver<ApplyMsg>,
        max_raft_state_bytes: i64,
        rpc_timeout: Duration,
    ) -> Result<Arc<KvServer>> {
        let mut state = HashMap::new();
        let mut client_seq = HashMap::new();
        if let Some(snapshot) = raft.read_snapshot()? {
            let (payload, _) =
                bincode::decode_from_slice::<SnapshotPayload, _>(&snapshot, bincode::config::standard())
                    .map_err(PersistError::from)?;
            state = payload.state;
            client_seq = payload.client_seq;
        }

        let kv = Arc::new(KvServer {
            raft,
            state: RwLock::new(state),
            client_seq: RwLock::new(client_seq),
            wait_channels: Mutex::new(HashMap::new()),
            max_raft_state_bytes,
            rpc_timeout,
        });

        tokio::spawn(run_applier(kv.clone(), apply_rx));
        Ok(kv)
    }

    pub async fn get(&self, req: GetRequest) -> GetReply {
        let op = Op { client_id: req.client_id, seq: req.seq, key: req.key, value: String::new(), kind: OpKind::Get };
        let result = match self.execute(op).await {
            Ok(applied) if applied.found => Ok(applied.value),
            Ok(_) => Err(KvError::NoKey),
            Err(e) => Err(e),
        };
        GetReply { result: result.map_err(Into::into) }
    }

    pub async fn put_append(&self, req: PutAppendRequest) -> PutAppendReply {
        let op = Op { client_id: req.client_id, seq: req.seq, key: req.key, value: req.value, kind: req.kind };
        PutAppendReply { result: self.execute(op).await.map(|_| ()).map_err(Into::into) }
    }

    async fn execute(&self, op: Op) -> Result<Applied, KvError> {
        let encoded = bincode::encode_to_vec(&op, bincode::config::standard()).expect("Op always encodes");
        let (index, _term) = self.raft.start(encoded).map_err(|_| KvError::WrongLeader)?;

        let (tx, rx) = oneshot::channel();
        self.wait_channels.lock().insert(index, tx);

        let outcome = tokio::time::timeout(self.rpc_timeout, rx).await;
        self.wait_channels.lock().remove(&index);

        match outcome {
            Ok(Ok(applied)) if applied.client_id == op.client_id && applied.seq == op.seq => Ok(applied),
            Ok(Ok(_)) => Err(KvError::WrongLeader), // a different command landed at our index: we lost leadership
            Ok(Err(_)) => Err(KvError::WrongLeader), // sender dropped without a value
            Err(_) => Err(KvError::Timeout),
        }
    }

    fn maybe_snapshot(&self, applied_index: LogIndex) {
        if self.max_raft_state_bytes < 0 {
            return;
        }
        if (self.raft.raft_state_size() as i64) <= self.max_raft_state_bytes {
            return;
        }
        let payload = SnapshotPayload { state: self.state.read().clone(), client_seq: self.client_seq.read().clone() };
        let bytes = bincode::encode_to_vec(&payload, bincode::config::standard())
            .map_err(PersistError::from)
            .expect("in-memory kv snapshot payload failed to encode");
        self.raft.snapshot(applied_index, bytes);
    }

    /// A snapshot this node already verified was newer than its applied
    /// state (via `cond_install_snapshot`) that then fails to decode is
    /// corruption, not a condition to shrug off and keep serving stale
    /// data from — this is fatal, matching the same policy applied at
    /// bootstrap.
    fn restore_snapshot(&self, data: &[u8]) {
        let (payload, _) = bincode::decode_from_slice::<SnapshotPayload, _>(data, bincode::config::standard())
            .expect("installed snapshot failed to decode");
        *self.state.write() = payload.state;
        *self.client_seq.write() = payload.client_seq;
    }
}

async fn run_applier(kv: Arc<KvServer>, mut apply_rx: mpsc::Receiver<ApplyMsg>) {
    while let Some(msg) = apply_rx.recv().await {
        match msg {
            ApplyMsg::Command { index, term: _, command } => {
                let Ok((op, _)) = bincode::decode_from_slice::<Op, _>(&command, bincode::config::standard()) else {
                    warn!(index, "failed to decode applied command, skipping");
                    continue;
                };

                let already_applied = {
                    let client_seq = kv.client_seq.read();
                    client_seq.get(&op.client_id).copied().unwrap_or(0) >= op.seq
                };

                if !already_applied {
                    match op.kind {
                        OpKind::Put => {
                            kv.state.write().insert(op.key.clone(), op.value.clone());
                        }
                        OpKind::Append => {
                            kv.state.write().entry(op.key.clone()).or_default().push_str(&op.value);
                        }
                        OpKind::Get => {}
                    }
                    kv.client_seq.write().insert(op.client_id, op.seq);
                }

                let (value, found) = match kv.state.read().get(&op.key) {
                    Some(v) => (v.clone(), true),
                    None => (String::new(), false),
                };

                if let Some(tx) = kv.wait_channels.lock().remove(&index) {
                    let _ = tx.send(Applied { client_id: op.client_id, seq: op.seq, value, found });
                }

                kv.maybe_snapshot(index);
            }
            ApplyMsg::Snapshot { index, term, data } => {
                if kv.raft.cond_install_snapshot(term, index, data.clone()) {
                    kv.restore_snapshot(&data);
                    info!(index, "installed snapshot from raft");
                }
            }
        }
    }
}
