//! Paxos -- wire message types and ballot helpers.

use crate::node::Address;

use serde::{Deserialize, Serialize};

/// Ballot number type. Use 0 as a null ballot number.
///
/// The low 8 bits carry `index + 1` of the proposing server in the static
/// server list and the rest carry the round, so ballots made by different
/// servers never collide and integer comparison is a total order.
pub type Ballot = u64;

/// Composes a unique ballot number of given round for server `index`.
#[inline]
pub fn make_unique_ballot(round: u64, index: usize) -> Ballot {
    debug_assert!(index < 255);
    (round << 8) | (index as u64 + 1)
}

/// Composes a unique ballot number for server `index` greater than the
/// given one.
#[inline]
pub fn make_greater_ballot(bal: Ballot, index: usize) -> Ballot {
    make_unique_ballot((bal >> 8) + 1, index)
}

/// Round part of a ballot number.
#[inline]
pub fn ballot_round(bal: Ballot) -> u64 {
    bal >> 8
}

/// A client request carried through consensus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaxosRequest<C> {
    /// Application command.
    pub command: C,

    /// Requesting client.
    pub client: Address,

    /// Client sequence number.
    pub seq: u64,
}

/// Value decided for a log slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogValue<C> {
    /// A client request.
    Request(PaxosRequest<C>),

    /// No-op used to fill a hole nobody is driving anymore.
    Noop,
}

impl<C> LogValue<C> {
    /// True if this value is the request `(client, seq)`.
    pub fn is_request(&self, client: &Address, seq: u64) -> bool {
        match self {
            LogValue::Request(req) => req.client == *client && req.seq == seq,
            LogValue::Noop => false,
        }
    }
}

/// Message type of a Paxos deployment, exchanged both between servers and
/// between clients and servers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PaxosMsg<C, R> {
    /// Phase 1a.
    Prepare { ballot: Ballot, slot: usize },

    /// Phase 1b, carrying the acceptor's own vote for the slot, if any.
    Promise {
        ballot: Ballot,
        accepted_ballot: Ballot,
        accepted_command: Option<LogValue<C>>,
        slot: usize,
    },

    /// Phase 2a.
    Accept {
        ballot: Ballot,
        slot: usize,
        command: LogValue<C>,
    },

    /// Phase 2b.
    Accepted {
        ballot: Ballot,
        slot: usize,
        command: LogValue<C>,
    },

    /// Slot has been decided.
    Decision { slot: usize, command: LogValue<C> },

    /// Periodic heartbeat carrying the sender's highest contiguously
    /// executed slot.
    Heartbeat { cleared_slot: usize },

    /// Client request.
    Request {
        command: C,
        client: Address,
        seq: u64,
    },

    /// Reply to client.
    Reply {
        result: R,
        client: Address,
        seq: u64,
    },
}
