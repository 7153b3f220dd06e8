//! Replication protocol: Paxos replicated log.
//!
//! Leaderless multi-decree Paxos over a static server set. Any server may
//! propose into any slot; servers garbage collect the log prefix that every
//! server has executed. References:
//!   - <https://lamport.azurewebsites.net/pubs/paxos-simple.pdf>
//!   - <https://www.cs.cornell.edu/courses/cs7412/2011sp/paxos.pdf>

mod client;
mod messages;
mod server;
mod slot;


pub use client::{ClientConfigPaxos, ClientContext, ClientTimer, PaxosClient};
pub use messages::{
    ballot_round, make_greater_ballot, make_unique_ballot, Ballot, LogValue,
    PaxosMsg, PaxosRequest,
};
pub use server::{PaxosServer, PaxosTimer, ServerConfigPaxos, ServerContext};
pub use slot::{LogSlot, SlotStatus};
