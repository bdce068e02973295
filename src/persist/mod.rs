//! Durable storage for Raft state and snapshots.

mod file;
mod memory;

pub use file::FilePersister;
pub use memory::MemoryPersister;

/// Storage for the Raft persistent state blob plus the most recent
/// snapshot. Implementations must make `save_state_and_snapshot` atomic
/// with respect to process crash: a crash must never leave the new
/// snapshot paired with the old state, or vice versa.
pub trait StateStorage: Send + Sync {
    fn save_raft_state(&self, state: Vec<u8>) -> crate::error::PersistResult<()>;

    fn save_state_and_snapshot(
        &self,
        state: Vec<u8>,
        snapshot: Vec<u8>,
    ) -> crate::error::PersistResult<()>;

    /// `None` means bootstrap: no state has ever been written.
    fn read_raft_state(&self) -> crate::error::PersistResult<Option<Vec<u8>>>;

    /// `None` means no snapshot has ever been taken.
    fn read_snapshot(&self) -> crate::error::PersistResult<Option<Vec<u8>>>;

    fn raft_state_size(&self) -> usize;
}
