use std::sync::Arc;
use std::time::Duration;

use super::types::ApplyMsg;
use super::Raft;

/// Drains commit-index advances and pending snapshot installs, in the
/// order they became available, onto the apply channel the state
/// machine reads from. A short fallback tick guards against a missed
/// `Notify` wakeup; the `Notify` itself keeps latency low on the common
/// path.
pub(super) async fn run_apply_pipeline(raft: Arc<Raft>) {
    loop {
        let notified = raft.apply_ready.notified();
        let (pending_snapshot, batch) = drain(&raft);

        if let Some((index, term, data)) = pending_snapshot {
            if raft.apply_tx.send(ApplyMsg::Snapshot { index, term, data }).await.is_err() {
                return;
            }
        }
        for msg in batch {
            if raft.apply_tx.send(msg).await.is_err() {
                return;
            }
        }

        if raft.is_dead() {
            return;
        }

        tokio::select! {
            _ = notified => {}
            _ = tokio::time::sleep(Duration::from_millis(50)) => {}
        }
    }
}

fn drain(raft: &Raft) -> (Option<(super::LogIndex, super::Term, Vec<u8>)>, Vec<ApplyMsg>) {
    let mut inner = raft.inner.write();

    let pending_snapshot = inner.pending_snapshot.take();
    let mut batch = Vec::new();
    if pending_snapshot.is_none() {
        while inner.last_applied < inner.commit_index {
            inner.last_applied += 1;
            if let Some(entry) = inner.log.entry_at(inner.last_applied) {
                batch.push(ApplyMsg::Command { index: entry.index, term: entry.term, command: entry.command.clone() });
            }
        }
    }
    (pending_snapshot, batch)
}
