//! Paxlab: replication protocols over a simulated message-passing network.
//!
//! Nodes are single-threaded actors driven by messages and timers. Two
//! replication protocols are provided on top of that substrate: a
//! leaderless multi-decree Paxos log and a view-server-based primary-backup
//! scheme, both replicating any deterministic `Application`.

#[macro_use]
mod utils;

pub mod app;
pub mod client;
pub mod node;
pub mod paxos;
pub mod primarybackup;

pub use utils::{logger_init, Bitmap, PaxlabError};

pub use app::{AmoApplication, Application, KvCommand, KvResult, KvStore};
pub use client::{ClientHandle, GenericClient, ResultState};
pub use node::{Address, Context, Network, NetworkConfig, Node, NodeHandle};

/// Replication protocols shipped, selectable by name.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Protocol {
    Paxos,
    PrimaryBackup,
}

impl Protocol {
    /// Parses a protocol name string.
    pub fn parse_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "paxos" => Some(Self::Paxos),
            "primarybackup" | "pb" => Some(Self::PrimaryBackup),
            _ => None,
        }
    }
}

#[cfg(test)]
mod protocol_tests {
    use super::*;

    #[test]
    fn parse_valid_names() {
        assert_eq!(Protocol::parse_name("Paxos"), Some(Protocol::Paxos));
        assert_eq!(
            Protocol::parse_name("PrimaryBackup"),
            Some(Protocol::PrimaryBackup)
        );
        assert_eq!(Protocol::parse_name("pb"), Some(Protocol::PrimaryBackup));
    }

    #[test]
    fn parse_invalid_name() {
        assert_eq!(Protocol::parse_name("Raft"), None);
    }
}
