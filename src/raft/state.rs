use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::log::RaftLog;
use super::types::{LogEntry, LogIndex, NodeId, Term};

/// Everything that must survive a crash, serialized as a single blob by
/// the `Persister`.
#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct PersistentState {
    pub current_term: Term,
    pub voted_for: Option<NodeId>,
    pub log: Vec<LogEntry>,
}

impl PersistentState {
    pub fn new() -> Self {
        Self { current_term: 0, voted_for: None, log: RaftLog::new().as_persisted().to_vec() }
    }
}

impl Default for PersistentState {
    fn default() -> Self {
        Self::new()
    }
}

/// Leader-only volatile state, reset on every accession to leadership.
#[derive(Debug, Clone)]
pub struct LeaderState {
    pub next_index: HashMap<NodeId, LogIndex>,
    pub match_index: HashMap<NodeId, LogIndex>,
}

impl LeaderState {
    pub fn new(node_id: NodeId, peers: &[NodeId], last_log_index: LogIndex) -> Self {
        let mut next_index = HashMap::new();
        let mut match_index = HashMap::new();
        for &peer in peers {
            if peer == node_id {
                continue;
            }
            next_index.insert(peer, last_log_index + 1);
            match_index.insert(peer, 0);
        }
        // The leader's own match_index is always its own last log index;
        // it has no peer RPC reply to learn this from, so it is seeded
        // here rather than updated reactively.
        match_index.insert(node_id, last_log_index);
        Self { next_index, match_index }
    }

    /// Highest index held by a strict majority of `peers` (the leader
    /// included). The caller is responsible for checking that entry's
    /// term is the current term before treating it as committed (I3).
    pub fn majority_match_index(&self, peers: &[NodeId]) -> LogIndex {
        let mut indices: Vec<LogIndex> =
            peers.iter().map(|p| self.match_index.get(p).copied().unwrap_or(0)).collect();
        indices.sort_unstable();
        indices[(indices.len() - 1) / 2]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leader_state_seeds_self_match_index() {
        let state = LeaderState::new(0, &[0, 1, 2], 5);
        assert_eq!(state.match_index[&0], 5);
        assert_eq!(state.next_index[&1], 6);
    }

    #[test]
    fn majority_match_index_picks_median() {
        let mut state = LeaderState::new(0, &[0, 1, 2], 0);
        state.match_index.insert(0, 10);
        state.match_index.insert(1, 7);
        state.match_index.insert(2, 3);
        assert_eq!(state.majority_match_index(&[0, 1, 2]), 7);
    }
}
