//! Node daemon for the replicated Chord key-value store.
//!
//! Parses the per-instance parameters (ring width, N/R/W quorums, bind and
//! advertise addresses, optional join target, persistence root), brings one
//! node up and runs it until interrupted.

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use runtime::{Node, NodeConfig};

/// A node of the replicated Chord key-value ring.
#[derive(Debug, Parser)]
#[command(name = "chord-kv", version, about)]
pub struct NodeCli {
    /// Host to bind to.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on (0 picks a free port).
    #[arg(long, default_value_t = 5000)]
    pub port: u16,

    /// Address other nodes should use to reach this one (defaults to the
    /// bound address; set it when binding a wildcard host).
    #[arg(long)]
    pub advertise: Option<String>,

    /// Address of an existing ring member to join (host:port). Omit to
    /// found a new ring.
    #[arg(long)]
    pub join: Option<String>,

    /// Identifier-space bits (ring size 2^m).
    #[arg(long, default_value_t = 6)]
    pub m: u32,

    /// Replication factor.
    #[arg(long = "replicas", short = 'N', default_value_t = 3)]
    pub n: usize,

    /// Read quorum size.
    #[arg(long = "read-quorum", short = 'R', default_value_t = 2)]
    pub r: usize,

    /// Write quorum size.
    #[arg(long = "write-quorum", short = 'W', default_value_t = 2)]
    pub w: usize,

    /// Root directory for persistent storage. Omit for memory-only.
    #[arg(long)]
    pub storage_dir: Option<PathBuf>,

    /// Log filter, e.g. `info` or `runtime=debug`.
    #[arg(long, default_value = "info")]
    pub log: String,
}

impl NodeCli {
    /// Run one node until ctrl-c.
    pub async fn run(self) -> anyhow::Result<()> {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::try_new(&self.log)?)
            .init();

        let mut config = NodeConfig::new(format!("{}:{}", self.host, self.port))
            .with_m(self.m)
            .with_quorum(self.n, self.r, self.w);
        config.advertise_address = self.advertise;
        config.join = self.join;
        config.storage_dir = self.storage_dir;

        let node = Node::start(config).await?;
        info!(
            node = %node.id(),
            address = %node.address(),
            state = %node.state(),
            "node is running, ctrl-c to stop"
        );

        tokio::signal::ctrl_c().await?;
        node.shutdown().await;
        info!(node = %node.id(), "node stopped");
        Ok(())
    }
}
