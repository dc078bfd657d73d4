//! The seam between drivers and the network or process layer.
//!
//! A [`Transport`] executes lowered queries and sends write/admin commands.
//! Drivers are written against this trait only; HTTP clients, Graphite
//! sockets and `rrdtool` process runners plug in behind it.

use async_trait::async_trait;

use crate::error::Result;
use crate::query::RawQuery;

pub mod memory;

pub use memory::MemoryTransport;

/// A write or administrative command for a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Encoded write payload (line protocol, plaintext, exposition format).
    Write(String),
    /// An rrdtool invocation such as `create` or `update`.
    Rrd { command: String, args: Vec<String> },
    CreateDatabase(String),
    DeleteDatabase(String),
    DeleteMeasurement(String),
}

impl Command {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Command::Write(_) => "write",
            Command::Rrd { .. } => "rrd",
            Command::CreateDatabase(_) => "create_database",
            Command::DeleteDatabase(_) => "delete_database",
            Command::DeleteMeasurement(_) => "delete_measurement",
        }
    }
}

/// Executes native queries and commands against a backend.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Runs `query` and returns the raw response body.
    async fn execute(&self, query: &RawQuery) -> Result<String>;

    /// Delivers `command`.
    async fn send(&self, command: &Command) -> Result<()>;
}
