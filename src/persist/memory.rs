use parking_lot::Mutex;

use crate::error::PersistResult;

use super::StateStorage;

/// In-memory `Persister`, for unit tests and the in-process cluster
/// harness. Mirrors the reference implementation's test persister: a
/// crash is simulated by dropping the `Raft` and handing the same
/// `MemoryPersister` to a freshly constructed one.
#[derive(Default)]
pub struct MemoryPersister {
    state: Mutex<Vec<u8>>,
    snapshot: Mutex<Vec<u8>>,
}

impl MemoryPersister {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStorage for MemoryPersister {
    fn save_raft_state(&self, state: Vec<u8>) -> PersistResult<()> {
        *self.state.lock() = state;
        Ok(())
    }

    fn save_state_and_snapshot(&self, state: Vec<u8>, snapshot: Vec<u8>) -> PersistResult<()> {
        *self.state.lock() = state;
        *self.snapshot.lock() = snapshot;
        Ok(())
    }

    fn read_raft_state(&self) -> PersistResult<Option<Vec<u8>>> {
        let state = self.state.lock();
        Ok(if state.is_empty() { None } else { Some(state.clone()) })
    }

    fn read_snapshot(&self) -> PersistResult<Option<Vec<u8>>> {
        let snapshot = self.snapshot.lock();
        Ok(if snapshot.is_empty() { None } else { Some(snapshot.clone()) })
    }

    fn raft_state_size(&self) -> usize {
        self.state.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_reads_are_none() {
        let p = MemoryPersister::new();
        assert!(p.read_raft_state().unwrap().is_none());
        assert!(p.read_snapshot().unwrap().is_none());
        assert_eq!(p.raft_state_size(), 0);
    }

    #[test]
    fn save_and_read_round_trip() {
        let p = MemoryPersister::new();
        p.save_state_and_snapshot(vec![1, 2, 3], vec![4, 5]).unwrap();
        assert_eq!(p.read_raft_state().unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(p.read_snapshot().unwrap(), Some(vec![4, 5]));
        assert_eq!(p.raft_state_size(), 3);
    }
}
