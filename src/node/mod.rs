//! Message-passing node substrate: addressing, the handler trait, effect
//! collection, the simulated network, and the per-node runner.

mod address;
mod context;
mod network;
mod runner;

use std::fmt;

use serde::{de::DeserializeOwned, Serialize};

pub use address::Address;
pub use context::Context;
pub use network::{Inbox, Network, NetworkConfig};
pub use runner::NodeHandle;

/// Anything that can travel over the network.
pub trait WireMsg:
    fmt::Debug + Clone + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> WireMsg for T where
    T: fmt::Debug + Clone + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// A node in a deployment. Handlers are synchronous and must never block;
/// every outbound effect goes through the `Context`.
pub trait Node: Send + 'static {
    /// Message type this node exchanges.
    type Msg: WireMsg;

    /// Timer type this node arms.
    type Timer: fmt::Debug + Send + 'static;

    /// Address of this node.
    fn address(&self) -> &Address;

    /// Called once when the node starts; typically arms periodic timers.
    fn init(&mut self, ctx: &mut Context<Self::Msg, Self::Timer>);

    /// Handler of a message delivered by the network.
    fn on_message(
        &mut self,
        from: Address,
        msg: Self::Msg,
        ctx: &mut Context<Self::Msg, Self::Timer>,
    );

    /// Handler of a fired timer.
    fn on_timer(
        &mut self,
        timer: Self::Timer,
        ctx: &mut Context<Self::Msg, Self::Timer>,
    );
}
