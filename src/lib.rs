//! A fault-tolerant, strongly-consistent replicated key-value store
//! built on a Raft consensus core.

pub mod clerk;
pub mod config;
pub mod error;
pub mod kvstore;
pub mod persist;
pub mod raft;
pub mod transport;

pub use clerk::Clerk;
pub use config::ClusterConfig;
pub use error::{Error, Result};
pub use kvstore::KvServer;
pub use raft::Raft;
