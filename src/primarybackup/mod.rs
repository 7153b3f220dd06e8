//! Replication protocol: primary-backup with a view server.
//!
//! A single view server decides which server is the primary and which is
//! the backup, numbering each configuration as a view. The primary forwards
//! every client request to the backup and executes it only once the backup
//! has. On a view change the primary ships its whole application state to
//! the new backup before acknowledging the view.

mod client;
mod server;
mod viewserver;

use std::fmt;

use crate::app::{AmoApplication, Application};
use crate::node::Address;

use serde::{Deserialize, Serialize};

pub use client::{ClientConfigPb, ClientContext, ClientTimer, PbClient};
pub use server::{PbServer, PbServerContext, PbTimer, ServerConfigPb};
pub use viewserver::{
    ViewServer, ViewServerConfig, ViewServerContext, ViewServerTimer,
};

/// View number of the startup view, which has no servers.
pub const STARTUP_VIEWNUM: u64 = 0;

/// View number of the first real view.
pub const INITIAL_VIEWNUM: u64 = 1;

/// A primary-backup configuration as decided by the view server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct View {
    /// View number, increasing with every change.
    pub view_num: u64,

    /// Primary server, if any.
    pub primary: Option<Address>,

    /// Backup server, if any.
    pub backup: Option<Address>,
}

impl View {
    /// The startup view.
    pub fn startup() -> Self {
        View {
            view_num: STARTUP_VIEWNUM,
            primary: None,
            backup: None,
        }
    }

    #[inline]
    pub fn is_primary(&self, addr: &Address) -> bool {
        self.primary.as_ref() == Some(addr)
    }

    #[inline]
    pub fn is_backup(&self, addr: &Address) -> bool {
        self.backup.as_ref() == Some(addr)
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = |a: &Option<Address>| {
            a.as_ref().map_or("-".to_string(), |a| a.to_string())
        };
        write!(
            f,
            "<{} p:{} b:{}>",
            self.view_num,
            name(&self.primary),
            name(&self.backup)
        )
    }
}

/// Message type of a primary-backup deployment, shared by the view server,
/// the servers, and the clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub enum PbMsg<A: Application> {
    /// Server -> view server liveness report with its acknowledged view.
    Ping { view_num: u64 },

    /// Anyone -> view server query of the current view.
    GetView,

    /// View server -> anyone.
    ViewReply { view: View },

    /// Client -> primary.
    Request { command: A::Command, seq: u64 },

    /// Primary -> client.
    Reply { result: A::Result, seq: u64 },

    /// Primary -> backup, a request to execute first.
    Forward {
        view_num: u64,
        client: Address,
        seq: u64,
        command: A::Command,
    },

    /// Backup -> primary, the forwarded request has executed.
    ForwardReply {
        view_num: u64,
        client: Address,
        seq: u64,
    },

    /// Primary -> backup, the full application state.
    StateTransfer {
        view_num: u64,
        app: AmoApplication<A>,
    },

    /// Backup -> primary, state of the view installed.
    StateAck { view_num: u64 },
}

#[cfg(test)]
mod view_tests {
    use super::*;

    #[test]
    fn view_roles() {
        let view = View {
            view_num: 3,
            primary: Some(Address::server(0)),
            backup: None,
        };
        assert!(view.is_primary(&Address::server(0)));
        assert!(!view.is_backup(&Address::server(0)));
        assert!(!view.is_primary(&Address::server(1)));
        assert_eq!(format!("{}", view), "<3 p:server0 b:->");
        assert_eq!(format!("{}", View::startup()), "<0 p:- b:->");
    }
}
