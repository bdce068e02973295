//! Wire types and identifiers shared across the Raft core.

use serde::{Deserialize, Serialize};

/// Identifies a node by its index into the cluster's peer list.
pub type NodeId = u64;

/// Logical clock used for leader elections.
pub type Term = u64;

/// 1-based, monotonically increasing, snapshot-stable log position.
pub type LogIndex = u64;

/// An entry in the replicated log. `index`/`term` are carried on the
/// entry itself (rather than derived from its position in the backing
/// `Vec`) so the log can be trimmed by a snapshot without renumbering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct LogEntry {
    pub term: Term,
    pub index: LogIndex,
    pub command: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteArgs {
    pub term: Term,
    pub candidate_id: NodeId,
    pub last_log_index: LogIndex,
    pub last_log_term: Term,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteReply {
    pub term: Term,
    pub vote_granted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesArgs {
    pub term: Term,
    pub leader_id: NodeId,
    pub prev_log_index: LogIndex,
    pub prev_log_term: Term,
    pub entries: Vec<LogEntry>,
    pub leader_commit: LogIndex,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesReply {
    pub term: Term,
    pub success: bool,
    /// Fast-backup hints, set only when `success` is false.
    pub conflict_term: Option<Term>,
    pub conflict_index: Option<LogIndex>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallSnapshotArgs {
    pub term: Term,
    pub leader_id: NodeId,
    pub last_included_index: LogIndex,
    pub last_included_term: Term,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallSnapshotReply {
    pub term: Term,
}

/// What the apply pipeline hands to the state machine, in strict
/// commit order.
#[derive(Debug, Clone)]
pub enum ApplyMsg {
    Command {
        index: LogIndex,
        term: Term,
        command: Vec<u8>,
    },
    Snapshot {
        index: LogIndex,
        term: Term,
        data: Vec<u8>,
    },
}
