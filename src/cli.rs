//! `kvctl`: a small interactive client for the replicated store, driven
//! through [`Clerk`].

use std::collections::HashMap;
use std::sync::Arc;

use tokio::io::{stdin, AsyncBufReadExt, BufReader};

use rusty_raft_kv::clerk::Clerk;
use rusty_raft_kv::config::ClusterConfig;
use rusty_raft_kv::transport::TcpTransport;
use rusty_raft_kv::Result;

fn config_path() -> std::path::PathBuf {
    std::env::args().nth(1).map(std::path::PathBuf::from).unwrap_or_else(|| std::path::PathBuf::from("kvctl.toml"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = ClusterConfig::load_or_default(&config_path())?;

    let peer_addrs: HashMap<u64, String> =
        config.peers.iter().enumerate().map(|(id, addr)| (id as u64, addr.clone())).collect();
    let transport = Arc::new(TcpTransport::new(peer_addrs, config.rpc_timeout));
    let clerk = Clerk::new(transport, config.peers.len());

    println!("kvctl connected to {} node(s). Commands: get <key>, put <key> <value>, append <key> <value>, exit", config.peers.len());

    let mut reader = BufReader::new(stdin()).lines();
    loop {
        print!("kvctl> ");
        std::io::Write::flush(&mut std::io::stdout()).ok();

        let Some(line) = reader.next_line().await? else { break };
        let mut parts = line.trim().splitn(3, ' ');
        match parts.next() {
            Some("get") => match parts.next() {
                Some(key) => match clerk.get(key).await {
                    Some(value) => println!("{value}"),
                    None => println!("(no key)"),
                },
                None => println!("usage: get <key>"),
            },
            Some("put") => match (parts.next(), parts.next()) {
                (Some(key), Some(value)) => {
                    clerk.put(key, value).await;
                    println!("ok");
                }
                _ => println!("usage: put <key> <value>"),
            },
            Some("append") => match (parts.next(), parts.next()) {
                (Some(key), Some(value)) => {
                    clerk.append(key, value).await;
                    println!("ok");
                }
                _ => println!("usage: append <key> <value>"),
            },
            Some("exit") | Some("quit") => break,
            Some("") | None => {}
            Some(other) => println!("unknown command: {other}"),
        }
    }
    Ok(())
}
