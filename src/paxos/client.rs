//! Paxos -- client node.

use std::marker::PhantomData;

use crate::app::Application;
use crate::client::{GenericClient, ResultState};
use crate::node::{Address, Context, Node};
use crate::paxos::PaxosMsg;
use crate::utils::PaxlabError;

use serde::Deserialize;

use tokio::sync::watch;
use tokio::time::Duration;

/// Configuration parameters struct.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClientConfigPaxos {
    /// Interval of rebroadcasting an unanswered request in millisecs.
    pub resend_interval_ms: u64,
}

#[allow(clippy::derivable_impls)]
impl Default for ClientConfigPaxos {
    fn default() -> Self {
        ClientConfigPaxos {
            resend_interval_ms: 100,
        }
    }
}

/// Timers armed by a Paxos client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientTimer {
    /// Resend check of command `seq`.
    Retry { seq: u64 },
}

/// Context type handed to Paxos client handlers.
pub type ClientContext<A> = Context<
    PaxosMsg<<A as Application>::Command, <A as Application>::Result>,
    ClientTimer,
>;

/// Paxos client node for application `A`. Has at most one outstanding
/// command, broadcast to all servers until some server replies.
pub struct PaxosClient<A: Application> {
    /// My address.
    me: Address,

    /// Static list of all servers.
    servers: Vec<Address>,

    /// Configuration parameters struct.
    config: ClientConfigPaxos,

    /// Sequence number of the latest command.
    seq: u64,

    /// Outstanding command, if any.
    pending: Option<(u64, A::Command)>,

    /// Sender side of the result watch channel.
    tx_result: watch::Sender<ResultState<A::Result>>,

    _app: PhantomData<fn() -> A>,
}

impl<A: Application> PaxosClient<A> {
    /// Creates a new Paxos client `me` talking to `servers`.
    pub fn new_and_setup(
        me: Address,
        servers: Vec<Address>,
        config_str: Option<&str>,
    ) -> Result<Self, PaxlabError> {
        let config = parsed_config!(config_str => ClientConfigPaxos;
                                    resend_interval_ms)?;
        if config.resend_interval_ms == 0 {
            return logged_err!(
                me;
                "invalid config.resend_interval_ms '{}'",
                config.resend_interval_ms
            );
        }
        if servers.is_empty() {
            return logged_err!(me; "empty server list");
        }

        let (tx_result, _) = watch::channel(ResultState::default());
        Ok(PaxosClient {
            me,
            servers,
            config,
            seq: 0,
            pending: None,
            tx_result,
            _app: PhantomData,
        })
    }

    /// Sequence number of the latest command.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// True if a command is outstanding.
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Broadcasts the pending command and arms its resend timer.
    fn broadcast_request(&self, ctx: &mut ClientContext<A>) {
        if let Some((seq, command)) = &self.pending {
            ctx.broadcast(
                PaxosMsg::Request {
                    command: command.clone(),
                    client: self.me.clone(),
                    seq: *seq,
                },
                &self.servers,
            );
            ctx.set_timer(
                ClientTimer::Retry { seq: *seq },
                Duration::from_millis(self.config.resend_interval_ms),
            );
        }
    }

    /// Handler of Reply from a server.
    fn handle_msg_reply(
        &mut self,
        peer: Address,
        result: A::Result,
        client: Address,
        seq: u64,
    ) {
        if client != self.me {
            return; // ignore if misrouted
        }
        match &self.pending {
            Some((pending_seq, _)) if *pending_seq == seq => {}
            _ => return, // ignore if outdated or duplicate
        }
        pf_trace!(self.me; "received Reply <- {} for seq {}", peer, seq);

        self.pending = None;
        self.tx_result.send_replace(ResultState {
            seq,
            result: Some(result),
        });
    }
}

impl<A: Application> Node for PaxosClient<A> {
    type Msg = PaxosMsg<A::Command, A::Result>;
    type Timer = ClientTimer;

    fn address(&self) -> &Address {
        &self.me
    }

    fn init(&mut self, _ctx: &mut ClientContext<A>) {}

    fn on_message(
        &mut self,
        from: Address,
        msg: Self::Msg,
        _ctx: &mut ClientContext<A>,
    ) {
        match msg {
            PaxosMsg::Reply {
                result,
                client,
                seq,
            } => self.handle_msg_reply(from, result, client, seq),
            _ => {
                pf_warn!(self.me; "ignoring unexpected msg from {}: {:?}",
                                  from, msg);
            }
        }
    }

    fn on_timer(&mut self, timer: ClientTimer, ctx: &mut ClientContext<A>) {
        match timer {
            ClientTimer::Retry { seq } => {
                if matches!(&self.pending, Some((s, _)) if *s == seq) {
                    pf_debug!(self.me; "resending seq {}", seq);
                    self.broadcast_request(ctx);
                }
            }
        }
    }
}

impl<A: Application> GenericClient for PaxosClient<A> {
    type Command = A::Command;
    type Result = A::Result;

    fn send_command(
        &mut self,
        command: A::Command,
        ctx: &mut ClientContext<A>,
    ) -> u64 {
        self.seq += 1;
        self.pending = Some((self.seq, command));
        self.tx_result.send_replace(ResultState {
            seq: self.seq,
            result: None,
        });
        self.broadcast_request(ctx);
        self.seq
    }

    fn result_watch(&self) -> watch::Receiver<ResultState<A::Result>> {
        self.tx_result.subscribe()
    }
}
