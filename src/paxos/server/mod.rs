//! Paxos -- server node.
//!
//! Every server plays both the acceptor and the proposer role for every
//! slot of the replicated log. A client request is proposed by whichever
//! servers receive it into their next free slot; ballot preemption and the
//! adopt-highest-vote rule sort out the competition. Decided slots are
//! executed in order through the at-most-once application, and heartbeats
//! carry each server's executed prefix so that slots executed everywhere
//! can be garbage collected.

mod consensus;
mod execution;
mod heartbeat;
mod request;

use std::collections::{BTreeMap, HashMap};

use crate::app::{AmoApplication, Application};
use crate::node::{Address, Context, Node};
use crate::paxos::{Ballot, LogSlot, LogValue, PaxosMsg, SlotStatus};
use crate::utils::PaxlabError;

use rand::Rng;

use serde::Deserialize;

use tokio::time::Duration;

/// Configuration parameters struct.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServerConfigPaxos {
    /// Interval of sending heartbeats to peers in millisecs.
    pub heartbeat_interval_ms: u64,

    /// Base timeout of retrying an undecided proposal in millisecs.
    pub retry_interval_ms: u64,

    /// Max random jitter added on top of the retry timeout in millisecs.
    pub retry_jitter_ms: u64,
}

#[allow(clippy::derivable_impls)]
impl Default for ServerConfigPaxos {
    fn default() -> Self {
        ServerConfigPaxos {
            heartbeat_interval_ms: 100,
            retry_interval_ms: 50,
            retry_jitter_ms: 50,
        }
    }
}

/// Timers armed by a Paxos server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaxosTimer {
    /// Periodic heartbeat tick.
    Heartbeat,

    /// Retry check of my proposal for `slot` made at `ballot`.
    Proposal { slot: usize, ballot: Ballot },
}

/// Context type handed to Paxos server handlers.
pub type ServerContext<A> = Context<
    PaxosMsg<<A as Application>::Command, <A as Application>::Result>,
    PaxosTimer,
>;

/// Paxos server node replicating application `A`.
pub struct PaxosServer<A: Application> {
    /// My address.
    me: Address,

    /// My position in the server list.
    index: usize,

    /// Static list of all servers, including myself.
    servers: Vec<Address>,

    /// Configuration parameters struct.
    config: ServerConfigPaxos,

    /// Sparse replicated log, holding only slots above `gc_bar`.
    log: BTreeMap<usize, LogSlot<A::Command>>,

    /// Map from server -> highest slot it has executed contiguously, as
    /// last heard.
    cleared_until: HashMap<Address, usize>,

    /// The replicated application, behind at-most-once execution.
    app: AmoApplication<A>,

    /// First slot not yet executed.
    exec_bar: usize,

    /// Highest slot removed by garbage collection.
    gc_bar: usize,

    /// Next free slot index for new proposals.
    next_slot: usize,

    /// Value of `exec_bar` seen at the last heartbeat tick, if a hole was
    /// pending there.
    hole_watch: Option<usize>,
}

impl<A: Application> PaxosServer<A> {
    /// Creates a new Paxos server `me` among `servers`.
    pub fn new_and_setup(
        me: Address,
        servers: Vec<Address>,
        app: A,
        config_str: Option<&str>,
    ) -> Result<Self, PaxlabError> {
        let config = parsed_config!(config_str => ServerConfigPaxos;
                                    heartbeat_interval_ms, retry_interval_ms,
                                    retry_jitter_ms)?;
        if config.heartbeat_interval_ms == 0 {
            return logged_err!(
                me;
                "invalid config.heartbeat_interval_ms '{}'",
                config.heartbeat_interval_ms
            );
        }
        if config.retry_interval_ms == 0 {
            return logged_err!(
                me;
                "invalid config.retry_interval_ms '{}'",
                config.retry_interval_ms
            );
        }

        if servers.is_empty() || servers.len() >= 255 {
            return logged_err!(me; "invalid population {}", servers.len());
        }
        let index = match servers.iter().position(|s| *s == me) {
            Some(index) => index,
            None => return logged_err!(me; "not in server list {:?}", servers),
        };
        let cleared_until: HashMap<Address, usize> =
            servers.iter().map(|s| (s.clone(), 0)).collect();
        if cleared_until.len() != servers.len() {
            return logged_err!(me; "duplicate in server list {:?}", servers);
        }

        Ok(PaxosServer {
            me,
            index,
            servers,
            config,
            log: BTreeMap::new(),
            cleared_until,
            app: AmoApplication::new(app),
            exec_bar: 1,
            gc_bar: 0,
            next_slot: 1,
            hole_watch: None,
        })
    }

    /// Total number of servers.
    #[inline]
    fn population(&self) -> usize {
        self.servers.len()
    }

    /// Index of a server address in the server list.
    #[inline]
    fn server_index(&self, addr: &Address) -> Option<usize> {
        self.servers.iter().position(|s| s == addr)
    }

    /// Keeps new proposals away from any slot I have heard of.
    #[inline]
    fn bump_next_slot(&mut self, slot: usize) {
        if self.next_slot <= slot {
            self.next_slot = slot + 1;
        }
    }

    /// Proposal retry timeout with random jitter.
    fn retry_timeout(&self) -> Duration {
        let jitter = if self.config.retry_jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.config.retry_jitter_ms)
        } else {
            0
        };
        Duration::from_millis(self.config.retry_interval_ms + jitter)
    }

    /// Status of a slot.
    pub fn status(&self, slot: usize) -> SlotStatus {
        if slot <= self.gc_bar {
            return SlotStatus::Cleared;
        }
        match self.log.get(&slot) {
            Some(inst) => inst.status(),
            None => SlotStatus::Empty,
        }
    }

    /// Chosen value of a slot, if chosen and not yet cleared.
    pub fn command(&self, slot: usize) -> Option<&LogValue<A::Command>> {
        self.log.get(&slot).and_then(|inst| inst.chosen())
    }

    /// Smallest slot index not garbage collected.
    pub fn first_non_cleared(&self) -> usize {
        self.gc_bar + 1
    }

    /// Largest slot index that is not empty; `0` if there is none.
    pub fn last_non_empty(&self) -> usize {
        self.log
            .iter()
            .rev()
            .find(|(_, inst)| inst.status() != SlotStatus::Empty)
            .map_or(self.gc_bar, |(slot, _)| *slot)
    }

    /// Number of slots held in memory.
    pub fn log_len(&self) -> usize {
        self.log.len()
    }

    /// Cleared-until table as last heard.
    pub fn cleared_until(&self) -> &HashMap<Address, usize> {
        &self.cleared_until
    }

    /// First slot not yet executed.
    pub fn exec_bar(&self) -> usize {
        self.exec_bar
    }

    /// The replicated application.
    pub fn app(&self) -> &A {
        self.app.application()
    }
}

impl<A: Application> Node for PaxosServer<A> {
    type Msg = PaxosMsg<A::Command, A::Result>;
    type Timer = PaxosTimer;

    fn address(&self) -> &Address {
        &self.me
    }

    fn init(&mut self, ctx: &mut ServerContext<A>) {
        ctx.set_timer(
            PaxosTimer::Heartbeat,
            Duration::from_millis(self.config.heartbeat_interval_ms),
        );
        pf_info!(self.me; "paxos server up among {} servers",
                          self.population());
    }

    fn on_message(
        &mut self,
        from: Address,
        msg: Self::Msg,
        ctx: &mut ServerContext<A>,
    ) {
        // client requests may come from anyone; everything else must come
        // from a known server
        if !matches!(msg, PaxosMsg::Request { .. })
            && self.server_index(&from).is_none()
        {
            pf_warn!(self.me; "ignoring msg from unknown {}: {:?}", from, msg);
            return;
        }

        match msg {
            PaxosMsg::Prepare { ballot, slot } => {
                self.handle_msg_prepare(from, ballot, slot, ctx)
            }
            PaxosMsg::Promise {
                ballot,
                accepted_ballot,
                accepted_command,
                slot,
            } => self.handle_msg_promise(
                from,
                ballot,
                accepted_ballot,
                accepted_command,
                slot,
                ctx,
            ),
            PaxosMsg::Accept {
                ballot,
                slot,
                command,
            } => self.handle_msg_accept(from, ballot, slot, command, ctx),
            PaxosMsg::Accepted {
                ballot,
                slot,
                command,
            } => self.handle_msg_accepted(from, ballot, slot, command, ctx),
            PaxosMsg::Decision { slot, command } => {
                self.handle_msg_decision(from, slot, command, ctx)
            }
            PaxosMsg::Heartbeat { cleared_slot } => {
                self.handle_msg_heartbeat(from, cleared_slot)
            }
            PaxosMsg::Request {
                command,
                client,
                seq,
            } => self.handle_msg_request(from, command, client, seq, ctx),
            PaxosMsg::Reply { .. } => {
                pf_warn!(self.me; "ignoring misrouted Reply from {}", from);
            }
        }
    }

    fn on_timer(&mut self, timer: PaxosTimer, ctx: &mut ServerContext<A>) {
        match timer {
            PaxosTimer::Heartbeat => self.handle_heartbeat_timeout(ctx),
            PaxosTimer::Proposal { slot, ballot } => {
                self.handle_proposal_timeout(slot, ballot, ctx)
            }
        }
    }
}
