use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::state::LeaderState;
use super::types::{RequestVoteArgs, RequestVoteReply, Role, Term};
use super::{next_election_deadline, persist, step_down, Inner, Raft};

const TICK: Duration = Duration::from_millis(10);

pub(super) async fn run_election_ticker(raft: Arc<Raft>) {
    loop {
        tokio::time::sleep(TICK).await;
        if raft.is_dead() {
            return;
        }
        let should_start = {
            let inner = raft.inner.read();
            inner.role != Role::Leader && Instant::now() >= inner.election_deadline
        };
        if should_start {
            start_election(&raft).await;
        }
    }
}

async fn start_election(raft: &Arc<Raft>) {
    let (term, args) = {
        let mut inner = raft.inner.write();
        inner.current_term += 1;
        inner.role = Role::Candidate;
        inner.voted_for = Some(raft.node_id);
        inner.leader_id = None;
        inner.election_deadline = next_election_deadline(&raft.config);
        persist(raft, &inner);
        let args = RequestVoteArgs {
            term: inner.current_term,
            candidate_id: raft.node_id,
            last_log_index: inner.log.last_index(),
            last_log_term: inner.log.last_term(),
        };
        (inner.current_term, args)
    };

    debug!(node_id = raft.node_id, term, "starting election");

    let votes = Arc::new(AtomicUsize::new(1));
    for &peer in raft.peers.iter().filter(|&&p| p != raft.node_id) {
        let raft = raft.clone();
        let args = args.clone();
        let votes = votes.clone();
        tokio::spawn(async move {
            if let Ok(reply) = raft.transport.request_vote(peer, args).await {
                handle_vote_reply(&raft, term, reply, &votes);
            }
        });
    }
}

fn handle_vote_reply(raft: &Raft, term: Term, reply: RequestVoteReply, votes: &Arc<AtomicUsize>) {
    let mut inner = raft.inner.write();

    if reply.term > inner.current_term {
        step_down(&mut inner, reply.term);
        persist(raft, &inner);
        return;
    }

    if inner.role != Role::Candidate || inner.current_term != term || !reply.vote_granted {
        return;
    }

    let total = votes.fetch_add(1, Ordering::SeqCst) + 1;
    if total * 2 > raft.peers.len() && inner.role == Role::Candidate {
        become_leader(raft, &mut inner);
    }
}

fn become_leader(raft: &Raft, inner: &mut Inner) {
    info!(node_id = raft.node_id, term = inner.current_term, "became leader");
    inner.role = Role::Leader;
    inner.leader_id = Some(raft.node_id);
    inner.leader_state = Some(LeaderState::new(raft.node_id, &raft.peers, inner.log.last_index()));
    raft.new_entry.notify_waiters();
}
