//! The `kvserver` binary: boots one Raft/KV node from a config file and
//! serves its RPCs over TCP.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use rusty_raft_kv::config::ClusterConfig;
use rusty_raft_kv::kvstore::KvServer;
use rusty_raft_kv::persist::FilePersister;
use rusty_raft_kv::raft::Raft;
use rusty_raft_kv::transport::{self, TcpTransport};
use rusty_raft_kv::Result;

fn config_path() -> PathBuf {
    std::env::args().nth(1).map(PathBuf::from).unwrap_or_else(|| PathBuf::from("kvserver.toml"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_target(false).with_thread_ids(true).with_level(true).init();

    let config = ClusterConfig::load_or_default(&config_path())?;

    info!(node_id = config.node_id, bind_addr = %config.bind_addr, "starting kvserver");

    std::fs::create_dir_all(&config.data_dir)?;
    let persister = Arc::new(FilePersister::new(PathBuf::from(&config.data_dir))?);

    let peer_addrs = config
        .peers
        .iter()
        .enumerate()
        .map(|(id, addr)| (id as u64, addr.clone()))
        .collect();
    let transport = Arc::new(TcpTransport::new(peer_addrs, config.rpc_timeout));

    let peers: Vec<u64> = (0..config.peers.len() as u64).collect();
    let bind_addr = config.bind_addr.clone();
    let max_raft_state_bytes = config.max_raft_state_bytes;
    let rpc_timeout = config.rpc_timeout;
    let node_id = config.node_id;

    let (raft, apply_rx) = Raft::new(node_id, peers, persister, transport, config)?;
    let kv = KvServer::new(raft.clone(), apply_rx, max_raft_state_bytes, rpc_timeout)?;

    info!(%bind_addr, "rpc listener starting");
    transport::tcp::serve(&bind_addr, raft, kv).await?;
    Ok(())
}
