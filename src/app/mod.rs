//! Replicated application contract, the key-value store application, and
//! the at-most-once execution wrapper.

mod amo;
mod kvstore;

use std::fmt;

use serde::{de::DeserializeOwned, Serialize};

pub use amo::AmoApplication;
pub use kvstore::{KvCommand, KvResult, KvStore};

/// Bounds on application commands and results. The replication core only
/// clones, ships, and compares them.
pub trait AppPayload:
    fmt::Debug
    + Clone
    + PartialEq
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<T> AppPayload for T where
    T: fmt::Debug
        + Clone
        + PartialEq
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// A deterministic state machine replicated by the protocols. Applications
/// are serializable as a whole so that primary-backup can transfer them.
pub trait Application:
    fmt::Debug + Clone + Serialize + DeserializeOwned + Send + Sync + 'static
{
    type Command: AppPayload;
    type Result: AppPayload;

    /// Applies one command and returns its result. Must be deterministic.
    fn execute(&mut self, command: &Self::Command) -> Self::Result;
}
