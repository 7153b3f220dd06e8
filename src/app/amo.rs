//! At-most-once execution wrapper.

use std::collections::HashMap;

use crate::app::Application;
use crate::node::Address;

use serde::{Deserialize, Serialize};

/// Wraps an application so that every `(client, seq)` command is executed
/// at most once. Clients have at most one outstanding command, so it is
/// enough to remember the latest sequence number and result per client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct AmoApplication<A: Application> {
    /// The wrapped application.
    app: A,

    /// Map from client -> (latest executed seq, its result).
    last_executed: HashMap<Address, (u64, A::Result)>,
}

impl<A: Application> AmoApplication<A> {
    /// Wraps an application.
    pub fn new(app: A) -> Self {
        AmoApplication {
            app,
            last_executed: HashMap::new(),
        }
    }

    /// Executes a command unless already done. Returns the fresh result, the
    /// remembered result if `seq` is the latest executed one of the client,
    /// or `None` if `seq` is older than that.
    pub fn execute(
        &mut self,
        client: &Address,
        seq: u64,
        command: &A::Command,
    ) -> Option<A::Result> {
        if let Some((last_seq, result)) = self.last_executed.get(client) {
            if seq == *last_seq {
                return Some(result.clone());
            } else if seq < *last_seq {
                return None;
            }
        }

        let result = self.app.execute(command);
        self.last_executed
            .insert(client.clone(), (seq, result.clone()));
        Some(result)
    }

    /// True if the client's command `seq` (or a later one) has executed.
    pub fn already_executed(&self, client: &Address, seq: u64) -> bool {
        self.last_executed
            .get(client)
            .is_some_and(|(last_seq, _)| *last_seq >= seq)
    }

    /// The remembered result of exactly `(client, seq)`, if any.
    pub fn cached_result(
        &self,
        client: &Address,
        seq: u64,
    ) -> Option<&A::Result> {
        match self.last_executed.get(client) {
            Some((last_seq, result)) if *last_seq == seq => Some(result),
            _ => None,
        }
    }

    /// The wrapped application.
    pub fn application(&self) -> &A {
        &self.app
    }
}
