//! Key-value store application.

use std::collections::HashMap;

use crate::app::Application;

use serde::{Deserialize, Serialize};

/// Command to the key-value store.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum KvCommand {
    /// Get the value of given key.
    Get { key: String },

    /// Put a new value into key, overwriting any old value.
    Put { key: String, value: String },

    /// Append to the value of key (treating a missing key as empty).
    Append { key: String, value: String },
}

/// Command execution result returned by the key-value store.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum KvResult {
    /// Key was found with this value.
    GetResult { value: String },

    /// Key was not found by a `Get`.
    KeyNotFound,

    /// `Put` done.
    PutOk,

    /// Value of the key after an `Append`.
    AppendResult { value: String },
}

/// The key-value store is simply a `HashMap` from `String` key -> `String`
/// value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvStore {
    state: HashMap<String, String>,
}

impl KvStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.state.len()
    }

    /// True if no key is stored.
    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }
}

impl Application for KvStore {
    type Command = KvCommand;
    type Result = KvResult;

    fn execute(&mut self, command: &KvCommand) -> KvResult {
        match command {
            KvCommand::Get { key } => match self.state.get(key) {
                Some(value) => KvResult::GetResult {
                    value: value.clone(),
                },
                None => KvResult::KeyNotFound,
            },

            KvCommand::Put { key, value } => {
                self.state.insert(key.clone(), value.clone());
                KvResult::PutOk
            }

            KvCommand::Append { key, value } => {
                let entry = self.state.entry(key.clone()).or_default();
                entry.push_str(value);
                KvResult::AppendResult {
                    value: entry.clone(),
                }
            }
        }
    }
}
