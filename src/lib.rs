//! A replicated key-value store built on Viewstamped Replication: a
//! primary-backup protocol in which a fixed group of replicas totally
//! orders client operations, commits them under majority quorum, and
//! elects a new primary when the current one is suspected failed.
//!
//! The wire protocol, replica state machine, and election timer are the
//! hard parts and live in this crate; the CLI entry point (`src/bin/vr.rs`)
//! wires them to a real UDP socket.

pub mod client;
pub mod client_table;
pub mod codec;
pub mod configuration;
pub mod election;
pub mod error;
pub mod identifiers;
pub mod log;
pub mod message;
pub mod replica;
pub mod service;
pub mod transport;
pub mod viewstamp;

pub use client::Client;
pub use configuration::Configuration;
pub use error::Error;
pub use identifiers::ClientId;
pub use replica::Replica;
pub use service::{Database, Service};
