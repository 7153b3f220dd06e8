//! Generic client trait to be implemented by all protocol-specific client
//! node structs.

use std::fmt;

use crate::node::{Context, Node};

use tokio::sync::watch;

/// Latest client-side result state, published through a `watch` channel.
/// `result` is `None` while command `seq` is still outstanding.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultState<R> {
    /// Sequence number of the latest command sent.
    pub seq: u64,

    /// Its result, once received.
    pub result: Option<R>,
}

impl<R> Default for ResultState<R> {
    fn default() -> Self {
        ResultState { seq: 0, result: None }
    }
}

/// Client trait to be implement by all protocol-specific client nodes.
pub trait GenericClient: Node {
    /// Command type this client submits.
    type Command: fmt::Debug + Clone + Send + 'static;

    /// Result type this client receives.
    type Result: fmt::Debug + Clone + Send + Sync + 'static;

    /// Starts a new command, replacing any outstanding one. Returns the
    /// sequence number assigned to it.
    fn send_command(
        &mut self,
        command: Self::Command,
        ctx: &mut Context<Self::Msg, Self::Timer>,
    ) -> u64;

    /// Subscribes to result state updates.
    fn result_watch(&self) -> watch::Receiver<ResultState<Self::Result>>;
}
