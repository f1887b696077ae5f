//! CLI entry point for the chord-kv node daemon.

use clap::Parser;
use cli::NodeCli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    NodeCli::parse().run().await
}
