use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::PersistResult;

use super::StateStorage;

/// File-backed `Persister`. Each write goes to a sibling `.tmp` file and
/// is then renamed into place — `rename(2)` is atomic on the same
/// filesystem, so a crash mid-write leaves the previous, still-valid
/// file behind rather than a half-written one. The combined
/// state+snapshot write renames the snapshot into place first and the
/// state second, so a crash between the two renames is recovered from by
/// replaying the (newer) state against the (older) snapshot — never the
/// other way around.
pub struct FilePersister {
    state_path: PathBuf,
    snapshot_path: PathBuf,
    cached_state_len: Mutex<usize>,
}

impl FilePersister {
    pub fn new(dir: impl AsRef<Path>) -> PersistResult<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let state_path = dir.join("raft-state.bin");
        let snapshot_path = dir.join("snapshot.bin");
        let cached_state_len = fs::metadata(&state_path).map(|m| m.len() as usize).unwrap_or(0);
        Ok(Self { state_path, snapshot_path, cached_state_len: Mutex::new(cached_state_len) })
    }

    fn write_atomic(&self, path: &Path, data: &[u8]) -> PersistResult<()> {
        let tmp = path.with_extension("tmp");
        {
            let mut f = fs::File::create(&tmp)?;
            f.write_all(data)?;
            f.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }

    fn read_opt(&self, path: &Path) -> PersistResult<Option<Vec<u8>>> {
        match fs::read(path) {
            Ok(bytes) if bytes.is_empty() => Ok(None),
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl StateStorage for FilePersister {
    fn save_raft_state(&self, state: Vec<u8>) -> PersistResult<()> {
        self.write_atomic(&self.state_path, &state)?;
        *self.cached_state_len.lock() = state.len();
        Ok(())
    }

    fn save_state_and_snapshot(&self, state: Vec<u8>, snapshot: Vec<u8>) -> PersistResult<()> {
        self.write_atomic(&self.snapshot_path, &snapshot)?;
        self.write_atomic(&self.state_path, &state)?;
        *self.cached_state_len.lock() = state.len();
        Ok(())
    }

    fn read_raft_state(&self) -> PersistResult<Option<Vec<u8>>> {
        self.read_opt(&self.state_path)
    }

    fn read_snapshot(&self) -> PersistResult<Option<Vec<u8>>> {
        self.read_opt(&self.snapshot_path)
    }

    fn raft_state_size(&self) -> usize {
        *self.cached_state_len.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let p = FilePersister::new(dir.path()).unwrap();
        assert!(p.read_raft_state().unwrap().is_none());

        p.save_state_and_snapshot(vec![9, 9], vec![1]).unwrap();
        assert_eq!(p.raft_state_size(), 2);

        let reopened = FilePersister::new(dir.path()).unwrap();
        assert_eq!(reopened.read_raft_state().unwrap(), Some(vec![9, 9]));
        assert_eq!(reopened.read_snapshot().unwrap(), Some(vec![1]));
        assert_eq!(reopened.raft_state_size(), 2);
    }

    #[test]
    fn save_raft_state_leaves_snapshot_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let p = FilePersister::new(dir.path()).unwrap();
        p.save_state_and_snapshot(vec![1], vec![2]).unwrap();
        p.save_raft_state(vec![1, 1]).unwrap();
        assert_eq!(p.read_snapshot().unwrap(), Some(vec![2]));
        assert_eq!(p.read_raft_state().unwrap(), Some(vec![1, 1]));
    }
}
