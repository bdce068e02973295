//! Leader election, log replication, persistence and snapshotting.
//!
//! A [`Raft`] is a handle shared (via `Arc`) by a handful of background
//! `tokio` tasks spawned from [`Raft::new`]: one election ticker, one
//! replication task per peer, and one apply-pipeline task. All of them
//! touch the same [`Inner`] behind a `parking_lot::RwLock` — critical
//! sections are kept synchronous and short, never held across an
//! `.await`, so the lock never stalls the runtime.

mod apply;
mod election;
mod log;
mod replication;
mod state;
mod types;

pub use types::{
    AppendEntriesArgs, AppendEntriesReply, ApplyMsg, InstallSnapshotArgs, InstallSnapshotReply,
    LogEntry, LogIndex, NodeId, RequestVoteArgs, RequestVoteReply, Role, Term,
};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use rand::Rng;
use tokio::sync::{mpsc, Notify};
use tracing::{info, instrument, warn};

use crate::config::ClusterConfig;
use crate::error::{PersistError, PersistResult, RaftError, RaftResult};
use crate::persist::StateStorage;
use crate::transport::Transport;

use log::RaftLog;
use state::{LeaderState, PersistentState};

struct Inner {
    log: RaftLog,
    current_term: Term,
    voted_for: Option<NodeId>,
    role: Role,
    leader_id: Option<NodeId>,
    commit_index: LogIndex,
    last_applied: LogIndex,
    leader_state: Option<LeaderState>,
    election_deadline: Instant,
    pending_snapshot: Option<(LogIndex, Term, Vec<u8>)>,
}

pub struct Raft {
    node_id: NodeId,
    peers: Vec<NodeId>,
    persister: Arc<dyn StateStorage>,
    transport: Arc<dyn Transport>,
    config: ClusterConfig,
    inner: RwLock<Inner>,
    apply_tx: mpsc::Sender<ApplyMsg>,
    new_entry: Notify,
    apply_ready: Notify,
    dead: AtomicBool,
}

impl Raft {
    /// Rehydrates from whatever `persister` holds. A genuinely empty
    /// persister (nothing ever written) bootstraps a fresh node; a
    /// persister that returns bytes that fail to decode is corruption,
    /// not absence, and is fatal rather than silently treated as a fresh
    /// start — starting over from term 0 on a node that had already
    /// voted or logged entries could violate the election-safety and
    /// log-matching invariants the rest of Raft depends on.
    pub fn new(
        node_id: NodeId,
        peers: Vec<NodeId>,
        persister: Arc<dyn StateStorage>,
        transport: Arc<dyn Transport>,
        config: ClusterConfig,
    ) -> RaftResult<(Arc<Raft>, mpsc::Receiver<ApplyMsg>)> {
        let persisted = match persister.read_raft_state()? {
            Some(bytes) => {
                let (state, _) = bincode::decode_from_slice::<PersistentState, _>(&bytes, bincode::config::standard())
                    .map_err(PersistError::from)?;
                Some(state)
            }
            None => None,
        };

        let (current_term, voted_for, log) = match persisted {
            Some(state) => (state.current_term, state.voted_for, RaftLog::from_persisted(state.log)),
            None => (0, None, RaftLog::new()),
        };

        let (apply_tx, apply_rx) = mpsc::channel(1024);

        let inner = Inner {
            log,
            current_term,
            voted_for,
            role: Role::Follower,
            leader_id: None,
            commit_index: 0,
            last_applied: 0,
            leader_state: None,
            election_deadline: next_election_deadline(&config),
            pending_snapshot: None,
        };

        let raft = Arc::new(Raft {
            node_id,
            peers,
            persister,
            transport,
            config,
            inner: RwLock::new(inner),
            apply_tx,
            new_entry: Notify::new(),
            apply_ready: Notify::new(),
            dead: AtomicBool::new(false),
        });

        tokio::spawn(election::run_election_ticker(raft.clone()));
        for &peer in raft.peers.iter().filter(|&&p| p != raft.node_id) {
            tokio::spawn(replication::run_peer_replication(raft.clone(), peer));
        }
        tokio::spawn(apply::run_apply_pipeline(raft.clone()));

        Ok((raft, apply_rx))
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// `(current_term, is_leader)`, mirroring the reference `GetState`.
    pub fn state(&self) -> (Term, bool) {
        let inner = self.inner.read();
        (inner.current_term, inner.role == Role::Leader)
    }

    pub fn leader_hint(&self) -> Option<NodeId> {
        self.inner.read().leader_id
    }

    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Acquire)
    }

    pub fn kill(&self) {
        self.dead.store(true, Ordering::Release);
        self.new_entry.notify_waiters();
        self.apply_ready.notify_waiters();
    }

    pub fn raft_state_size(&self) -> usize {
        self.persister.raft_state_size()
    }

    /// `Ok(None)` means no snapshot has ever been taken. `Err` means the
    /// persister itself failed to read its snapshot file — distinct from
    /// "none taken" and not to be papered over as such.
    pub fn read_snapshot(&self) -> PersistResult<Option<Vec<u8>>> {
        self.persister.read_snapshot()
    }

    /// Append `command` to the log if this node is the leader. Returns
    /// the index it was placed at so the caller can later recognize it
    /// on the apply channel.
    #[instrument(skip(self, command), fields(node_id = self.node_id))]
    pub fn start(&self, command: Vec<u8>) -> RaftResult<(LogIndex, Term)> {
        let mut inner = self.inner.write();
        if inner.role != Role::Leader {
            return Err(RaftError::NotLeader { leader_hint: inner.leader_id });
        }
        let term = inner.current_term;
        let index = inner.log.last_index() + 1;
        inner.log.append(&[LogEntry { term, index, command }]);
        if let Some(ls) = inner.leader_state.as_mut() {
            ls.match_index.insert(self.node_id, index);
        }
        persist(self, &inner);
        drop(inner);
        self.new_entry.notify_waiters();
        Ok((index, term))
    }

    /// Compacts the log up to `index`, which must still be present in
    /// it. Called by the state machine once it has applied through
    /// `index` and decided the log has grown large enough to warrant it.
    pub fn snapshot(&self, index: LogIndex, data: Vec<u8>) {
        let mut inner = self.inner.write();
        if index <= inner.log.last_included_index() {
            return;
        }
        let Some(term) = inner.log.term_at(index) else {
            warn!(node_id = self.node_id, index, "snapshot requested at an index not in the log");
            return;
        };
        inner.log.compact(index, term);
        persist_with_snapshot(self, &inner, data);
    }

    #[instrument(skip(self, args), fields(node_id = self.node_id))]
    pub fn request_vote(&self, args: RequestVoteArgs) -> RequestVoteReply {
        let mut inner = self.inner.write();

        if args.term > inner.current_term {
            step_down(&mut inner, args.term);
        }

        if args.term < inner.current_term {
            return RequestVoteReply { term: inner.current_term, vote_granted: false };
        }

        let can_vote = inner.voted_for.is_none() || inner.voted_for == Some(args.candidate_id);
        let log_ok = args.last_log_term > inner.log.last_term()
            || (args.last_log_term == inner.log.last_term() && args.last_log_index >= inner.log.last_index());

        let vote_granted = can_vote && log_ok;
        if vote_granted {
            inner.voted_for = Some(args.candidate_id);
            inner.election_deadline = next_election_deadline(&self.config);
        }
        persist(self, &inner);
        RequestVoteReply { term: inner.current_term, vote_granted }
    }

    #[instrument(skip(self, args), fields(node_id = self.node_id))]
    pub fn append_entries(&self, args: AppendEntriesArgs) -> AppendEntriesReply {
        let mut inner = self.inner.write();

        if args.term > inner.current_term {
            step_down(&mut inner, args.term);
        }
        if args.term < inner.current_term {
            return AppendEntriesReply {
                term: inner.current_term,
                success: false,
                conflict_term: None,
                conflict_index: None,
            };
        }

        inner.role = Role::Follower;
        inner.leader_id = Some(args.leader_id);
        inner.election_deadline = next_election_deadline(&self.config);

        if args.prev_log_index < inner.log.last_included_index() {
            // Stale relative to our own snapshot; ask the leader to fast
            // forward past what we've already compacted.
            let conflict_index = inner.log.last_included_index() + 1;
            return AppendEntriesReply {
                term: inner.current_term,
                success: false,
                conflict_term: None,
                conflict_index: Some(conflict_index),
            };
        }

        match inner.log.term_at(args.prev_log_index) {
            None => {
                let conflict_index = inner.log.last_index() + 1;
                AppendEntriesReply {
                    term: inner.current_term,
                    success: false,
                    conflict_term: None,
                    conflict_index: Some(conflict_index),
                }
            }
            Some(term) if term != args.prev_log_term => {
                let conflict_index = first_index_with_term(&inner.log, term);
                AppendEntriesReply {
                    term: inner.current_term,
                    success: false,
                    conflict_term: Some(term),
                    conflict_index: Some(conflict_index),
                }
            }
            Some(_) => {
                inner.log.append(&args.entries);
                if args.leader_commit > inner.commit_index {
                    inner.commit_index = args.leader_commit.min(inner.log.last_index());
                    self.apply_ready.notify_one();
                }
                persist(self, &inner);
                AppendEntriesReply {
                    term: inner.current_term,
                    success: true,
                    conflict_term: None,
                    conflict_index: None,
                }
            }
        }
    }

    #[instrument(skip(self, args), fields(node_id = self.node_id))]
    pub fn install_snapshot(&self, args: InstallSnapshotArgs) -> InstallSnapshotReply {
        let mut inner = self.inner.write();

        if args.term > inner.current_term {
            step_down(&mut inner, args.term);
        }
        if args.term < inner.current_term {
            return InstallSnapshotReply { term: inner.current_term };
        }

        inner.role = Role::Follower;
        inner.leader_id = Some(args.leader_id);
        inner.election_deadline = next_election_deadline(&self.config);

        if args.last_included_index > inner.log.last_included_index()
            && args.last_included_index > inner.last_applied
        {
            inner.pending_snapshot = Some((args.last_included_index, args.last_included_term, args.data));
            self.apply_ready.notify_one();
        }
        InstallSnapshotReply { term: inner.current_term }
    }

    /// Called by the state machine after it decides (from its own
    /// applied-index bookkeeping) whether an `ApplyMsg::Snapshot` it
    /// just received is actually newer than what it has. Only on `true`
    /// does Raft commit the install into its own log/persistent state —
    /// this is what keeps a stale or reordered `InstallSnapshot` RPC
    /// from corrupting already-applied state (see design notes).
    pub fn cond_install_snapshot(&self, last_included_term: Term, last_included_index: LogIndex, data: Vec<u8>) -> bool {
        let mut inner = self.inner.write();
        if last_included_index <= inner.log.last_included_index() || last_included_index <= inner.last_applied {
            return false;
        }
        inner.log.compact(last_included_index, last_included_term);
        inner.commit_index = inner.commit_index.max(last_included_index);
        inner.last_applied = inner.last_applied.max(last_included_index);
        persist_with_snapshot(self, &inner, data);
        true
    }
}

fn first_index_with_term(log: &RaftLog, term: Term) -> LogIndex {
    let mut idx = log.last_included_index() + 1;
    let mut first = log.last_index() + 1;
    while idx <= log.last_index() {
        if log.term_at(idx) == Some(term) {
            first = idx;
            break;
        }
        idx += 1;
    }
    first
}

fn step_down(inner: &mut Inner, new_term: Term) {
    inner.current_term = new_term;
    inner.voted_for = None;
    inner.role = Role::Follower;
    inner.leader_state = None;
}

fn next_election_deadline(config: &ClusterConfig) -> Instant {
    let span = config.election_timeout_max.saturating_sub(config.election_timeout_min);
    let jitter = if span.is_zero() { Duration::ZERO } else { rand::rng().random_range(Duration::ZERO..span) };
    Instant::now() + config.election_timeout_min + jitter
}

/// Encoding our own just-built `PersistentState` (plain integers, an
/// `Option`, and a `Vec` of plain structs) has no failure mode short of
/// a `bincode` bug, unlike decoding bytes that arrived from disk or the
/// network — so a failure here is treated as an unreachable invariant
/// violation, not a recoverable I/O condition.
fn encode_state(inner: &Inner) -> Vec<u8> {
    let state = PersistentState {
        current_term: inner.current_term,
        voted_for: inner.voted_for,
        log: inner.log.as_persisted().to_vec(),
    };
    bincode::encode_to_vec(&state, bincode::config::standard())
        .map_err(PersistError::from)
        .expect("in-memory raft state failed to encode")
}

fn persist(raft: &Raft, inner: &Inner) {
    let bytes = encode_state(inner);
    if let Err(e) = raft.persister.save_raft_state(bytes) {
        warn!(node_id = raft.node_id, error = %e, "failed to persist raft state");
    }
}

fn persist_with_snapshot(raft: &Raft, inner: &Inner, snapshot: Vec<u8>) {
    let bytes = encode_state(inner);
    if let Err(e) = raft.persister.save_state_and_snapshot(bytes, snapshot) {
        warn!(node_id = raft.node_id, error = %e, "failed to persist raft state and snapshot");
    } else {
        info!(node_id = raft.node_id, last_included_index = inner.log.last_included_index(), "compacted log via snapshot");
    }
}
