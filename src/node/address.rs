//! Node addressing.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque endpoint identifier of a node (server, client, or view server).
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
pub struct Address(String);

impl Address {
    /// Creates an address from an arbitrary name.
    pub fn new(name: impl Into<String>) -> Self {
        Address(name.into())
    }

    /// Address of the `idx`-th server of a cluster.
    pub fn server(idx: usize) -> Self {
        Address(format!("server{}", idx))
    }

    /// Address of the `idx`-th client.
    pub fn client(idx: usize) -> Self {
        Address(format!("client{}", idx))
    }

    /// Address of the (single) view server of a primary-backup deployment.
    pub fn view_server() -> Self {
        Address("viewserver".into())
    }

    /// Returns the name string.
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
