//! Cluster and per-node configuration.
//!
//! Loaded from an optional TOML file next to the binary; any field left
//! unset falls back to [`ClusterConfig::default`].

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::raft::NodeId;
use crate::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// This node's id, 0-indexed into `peers`.
    pub node_id: NodeId,
    /// Every node's address, ordered so `peers[node_id]` is this node.
    pub peers: Vec<String>,
    /// Directory the `FilePersister` writes raft state and snapshots under.
    pub data_dir: String,
    #[serde(with = "duration_millis")]
    pub election_timeout_min: Duration,
    #[serde(with = "duration_millis")]
    pub election_timeout_max: Duration,
    #[serde(with = "duration_millis")]
    pub heartbeat_interval: Duration,
    #[serde(with = "duration_millis")]
    pub rpc_timeout: Duration,
    /// Max entries per `AppendEntries` batch.
    pub max_entries_per_append: usize,
    /// Snapshot once `Persister::raft_state_size()` exceeds this many bytes.
    /// `-1` disables snapshotting.
    pub max_raft_state_bytes: i64,
    /// Address this node's RPC listener binds to.
    pub bind_addr: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            node_id: 0,
            peers: vec!["127.0.0.1:7000".to_string()],
            data_dir: "./data".to_string(),
            election_timeout_min: Duration::from_millis(1000),
            election_timeout_max: Duration::from_millis(1500),
            heartbeat_interval: Duration::from_millis(50),
            rpc_timeout: Duration::from_millis(700),
            max_entries_per_append: 256,
            max_raft_state_bytes: -1,
            bind_addr: "127.0.0.1:7000".to_string(),
        }
    }
}

impl ClusterConfig {
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| crate::Error::Config(e.to_string()))
    }

    pub fn local_addr(&self) -> Result<&str> {
        self.peers
            .get(self.node_id as usize)
            .map(|s| s.as_str())
            .ok_or_else(|| crate::Error::Config(format!("node_id {} out of range", self.node_id)))
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_one_peer() {
        let cfg = ClusterConfig::default();
        assert_eq!(cfg.peers.len(), 1);
        assert_eq!(cfg.local_addr().unwrap(), "127.0.0.1:7000");
    }

    #[test]
    fn missing_file_falls_back_to_default() {
        let cfg = ClusterConfig::load_or_default(Path::new("/nonexistent/cfg.toml")).unwrap();
        assert_eq!(cfg.node_id, 0);
    }
}
