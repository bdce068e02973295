use std::sync::Arc;

use super::log::RaftLog;
use super::types::{AppendEntriesArgs, AppendEntriesReply, InstallSnapshotArgs, NodeId, Role};
use super::{persist, step_down, Inner, Raft};

pub(super) async fn run_peer_replication(raft: Arc<Raft>, peer: NodeId) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(raft.config.heartbeat_interval) => {}
            _ = raft.new_entry.notified() => {}
        }
        if raft.is_dead() {
            return;
        }
        replicate_to_peer(&raft, peer).await;
    }
}

enum Send {
    Entries(AppendEntriesArgs),
    Snapshot(InstallSnapshotArgs),
}

async fn replicate_to_peer(raft: &Raft, peer: NodeId) {
    let (term, send) = {
        let inner = raft.inner.read();
        if inner.role != Role::Leader {
            return;
        }
        let Some(leader_state) = inner.leader_state.as_ref() else { return };
        let next_index = leader_state.next_index.get(&peer).copied().unwrap_or(1);

        if next_index <= inner.log.last_included_index() {
            let args = InstallSnapshotArgs {
                term: inner.current_term,
                leader_id: raft.node_id,
                last_included_index: inner.log.last_included_index(),
                last_included_term: inner.log.last_included_term(),
                data: raft.persister.read_snapshot().ok().flatten().unwrap_or_default(),
            };
            (inner.current_term, Send::Snapshot(args))
        } else {
            let prev_log_index = next_index - 1;
            let prev_log_term = inner.log.term_at(prev_log_index).unwrap_or(0);
            let entries = inner.log.entries_after(prev_log_index, raft.config.max_entries_per_append);
            let args = AppendEntriesArgs {
                term: inner.current_term,
                leader_id: raft.node_id,
                prev_log_index,
                prev_log_term,
                entries,
                leader_commit: inner.commit_index,
            };
            (inner.current_term, Send::Entries(args))
        }
    };

    match send {
        Send::Snapshot(args) => {
            let last_included_index = args.last_included_index;
            if let Ok(reply) = raft.transport.install_snapshot(peer, args).await {
                let mut inner = raft.inner.write();
                if reply.term > inner.current_term {
                    step_down(&mut inner, reply.term);
                    persist(raft, &inner);
                    return;
                }
                if inner.role != Role::Leader || inner.current_term != term {
                    return;
                }
                if let Some(ls) = inner.leader_state.as_mut() {
                    ls.match_index.insert(peer, last_included_index);
                    ls.next_index.insert(peer, last_included_index + 1);
                }
                advance_commit_index(raft, &mut inner);
            }
        }
        Send::Entries(args) => {
            let sent_last_index = args.prev_log_index + args.entries.len() as u64;
            if let Ok(reply) = raft.transport.append_entries(peer, args).await {
                let mut inner = raft.inner.write();
                if reply.term > inner.current_term {
                    step_down(&mut inner, reply.term);
                    persist(raft, &inner);
                    return;
                }
                if inner.role != Role::Leader || inner.current_term != term {
                    return;
                }
                apply_reply(&mut inner, peer, &reply, sent_last_index);
                if reply.success {
                    advance_commit_index(raft, &mut inner);
                }
            }
        }
    }
}

fn apply_reply(inner: &mut Inner, peer: NodeId, reply: &AppendEntriesReply, sent_last_index: super::LogIndex) {
    let Some(ls) = inner.leader_state.as_mut() else { return };
    if reply.success {
        ls.match_index.insert(peer, sent_last_index);
        ls.next_index.insert(peer, sent_last_index + 1);
    } else {
        let floor = ls.match_index.get(&peer).copied().unwrap_or(0) + 1;
        let new_next = fast_backup_next_index(&inner.log, reply);
        ls.next_index.insert(peer, new_next.max(floor));
    }
}

fn fast_backup_next_index(log: &RaftLog, reply: &AppendEntriesReply) -> super::LogIndex {
    match reply.conflict_term {
        Some(term) => {
            let mut idx = log.last_index();
            while idx > log.last_included_index() {
                match log.term_at(idx) {
                    Some(t) if t == term => return idx + 1,
                    Some(t) if t < term => break,
                    _ => {}
                }
                idx -= 1;
            }
            reply.conflict_index.unwrap_or(1)
        }
        None => reply.conflict_index.unwrap_or(1),
    }
}

fn advance_commit_index(raft: &Raft, inner: &mut Inner) {
    let Some(ls) = inner.leader_state.as_ref() else { return };
    let majority = ls.majority_match_index(&raft.peers);
    if majority > inner.commit_index {
        if let Some(term) = inner.log.term_at(majority) {
            if term == inner.current_term {
                inner.commit_index = majority;
                raft.apply_ready.notify_one();
            }
        }
    }
}
