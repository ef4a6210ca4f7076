//! CLI entry point:
//!
//! ```text
//! vr client <port>
//! vr server <port>
//! ```
//!
//! Wrong argument count and a non-integer port are both surfaced as
//! `clap`'s own usage errors, which already exit non-zero — no hand-rolled
//! `std::env::args()` parsing needed.

use clap::{Parser, Subcommand};
use std::net::{Ipv4Addr, SocketAddr};
use vr_kv::configuration::Configuration;
use vr_kv::error::Error;
use vr_kv::service::Database;
use vr_kv::transport::Transport;
use vr_kv::{Client, Replica};

#[derive(Parser)]
#[command(name = "vr", about = "A replicated key-value store over Viewstamped Replication")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Read commands from stdin and send them to the cluster.
    Client { port: u16 },
    /// Run one replica of the fixed loopback cluster.
    Server { port: u16 },
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    env_logger::init();

    let cli = Cli::parse();
    let configuration = Configuration::default_loopback();

    match cli.command {
        Command::Client { port } => run_client(configuration, port).await,
        Command::Server { port } => run_server(configuration, port).await,
    }
}

async fn run_client(configuration: Configuration, port: u16) -> Result<(), Error> {
    let address = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    let transport = Transport::bind(address).await.map_err(Error::Bind)?;
    let mut client = Client::new(configuration, transport);

    log::info!("client listening on {address}");
    client.run_repl(tokio::io::stdin()).await?;
    Ok(())
}

async fn run_server(configuration: Configuration, port: u16) -> Result<(), Error> {
    let address = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    let index = configuration
        .index_of(address)
        .ok_or(Error::UnknownReplicaPort(port))?;

    let replica = Replica::bind(configuration, index, Database::new()).await?;
    log::info!("replica {index} listening on {address}");
    replica.run().await;
    Ok(())
}
