//! Primary-backup -- client node.

use std::marker::PhantomData;

use crate::app::Application;
use crate::client::{GenericClient, ResultState};
use crate::node::{Address, Context, Node};
use crate::primarybackup::{PbMsg, View};
use crate::utils::PaxlabError;

use serde::Deserialize;

use tokio::sync::watch;
use tokio::time::Duration;

/// Configuration parameters struct.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClientConfigPb {
    /// Interval of refreshing the view and resending an unanswered request
    /// in millisecs.
    pub retry_interval_ms: u64,
}

#[allow(clippy::derivable_impls)]
impl Default for ClientConfigPb {
    fn default() -> Self {
        ClientConfigPb {
            retry_interval_ms: 100,
        }
    }
}

/// Timers armed by a primary-backup client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientTimer {
    /// Retry check of command `seq`.
    Retry { seq: u64 },
}

/// Context type handed to primary-backup client handlers.
pub type ClientContext<A> = Context<PbMsg<A>, ClientTimer>;

/// Primary-backup client node for application `A`. Sends its single
/// outstanding command to the primary of the latest view it knows.
pub struct PbClient<A: Application> {
    /// My address.
    me: Address,

    /// Address of the view server.
    view_server: Address,

    /// Configuration parameters struct.
    config: ClientConfigPb,

    /// Latest view heard of, if any.
    view: Option<View>,

    /// Sequence number of the latest command.
    seq: u64,

    /// Outstanding command, if any.
    pending: Option<(u64, A::Command)>,

    /// Sender side of the result watch channel.
    tx_result: watch::Sender<ResultState<A::Result>>,

    _app: PhantomData<fn() -> A>,
}

impl<A: Application> PbClient<A> {
    /// Creates a new primary-backup client `me`.
    pub fn new_and_setup(
        me: Address,
        view_server: Address,
        config_str: Option<&str>,
    ) -> Result<Self, PaxlabError> {
        let config = parsed_config!(config_str => ClientConfigPb;
                                    retry_interval_ms)?;
        if config.retry_interval_ms == 0 {
            return logged_err!(
                me;
                "invalid config.retry_interval_ms '{}'",
                config.retry_interval_ms
            );
        }

        let (tx_result, _) = watch::channel(ResultState::default());
        Ok(PbClient {
            me,
            view_server,
            config,
            view: None,
            seq: 0,
            pending: None,
            tx_result,
            _app: PhantomData,
        })
    }

    /// Latest view heard of.
    pub fn view(&self) -> Option<&View> {
        self.view.as_ref()
    }

    /// True if a command is outstanding.
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Sends the pending command to the primary I know of, if any.
    fn send_request(&self, ctx: &mut ClientContext<A>) {
        let primary = self.view.as_ref().and_then(|v| v.primary.as_ref());
        if let (Some((seq, command)), Some(primary)) = (&self.pending, primary)
        {
            ctx.send(
                PbMsg::Request {
                    command: command.clone(),
                    seq: *seq,
                },
                primary,
            );
        }
    }

    /// Handler of ViewReply message from the view server.
    fn handle_msg_view_reply(
        &mut self,
        peer: Address,
        view: View,
        ctx: &mut ClientContext<A>,
    ) {
        if peer != self.view_server {
            return; // ignore if misrouted
        }
        let primary_changed = self
            .view
            .as_ref()
            .map_or(true, |v| v.primary != view.primary);
        if self.view.as_ref().is_some_and(|v| v.view_num > view.view_num) {
            return; // ignore if outdated
        }
        self.view = Some(view);
        if primary_changed {
            self.send_request(ctx);
        }
    }

    /// Handler of Reply from a server.
    fn handle_msg_reply(&mut self, peer: Address, result: A::Result, seq: u64) {
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

impl<A: Application> Node for PbClient<A> {
    type Msg = PbMsg<A>;
    type Timer = ClientTimer;

    fn address(&self) -> &Address {
        &self.me
    }

    fn init(&mut self, ctx: &mut ClientContext<A>) {
        ctx.send(PbMsg::GetView, &self.view_server);
    }

    fn on_message(
        &mut self,
        from: Address,
        msg: PbMsg<A>,
        ctx: &mut ClientContext<A>,
    ) {
        match msg {
            PbMsg::ViewReply { view } => {
                self.handle_msg_view_reply(from, view, ctx)
            }
            PbMsg::Reply { result, seq } => {
                self.handle_msg_reply(from, result, seq)
            }
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
                    pf_debug!(self.me; "retrying seq {}", seq);
                    ctx.send(PbMsg::GetView, &self.view_server);
                    self.send_request(ctx);
                    ctx.set_timer(
                        ClientTimer::Retry { seq },
                        Duration::from_millis(self.config.retry_interval_ms),
                    );
                }
            }
        }
    }
}

impl<A: Application> GenericClient for PbClient<A> {
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
        if self.view.is_none() {
            ctx.send(PbMsg::GetView, &self.view_server);
        }
        self.send_request(ctx);
        ctx.set_timer(
            ClientTimer::Retry { seq: self.seq },
            Duration::from_millis(self.config.retry_interval_ms),
        );
        self.seq
    }

    fn result_watch(&self) -> watch::Receiver<ResultState<A::Result>> {
        self.tx_result.subscribe()
    }
}

#[cfg(test)]
mod client_tests {
    use super::*;
    use crate::app::{KvCommand, KvResult, KvStore};

    fn new_client() -> PbClient<KvStore> {
        PbClient::new_and_setup(Address::client(0), Address::view_server(), None)
            .unwrap()
    }

    fn get(key: &str) -> KvCommand {
        KvCommand::Get { key: key.into() }
    }

    fn view(num: u64, p: usize) -> View {
        View {
            view_num: num,
            primary: Some(Address::server(p)),
            backup: None,
        }
    }

    #[test]
    fn waits_for_view_then_sends() {
        let mut client = new_client();
        let mut ctx = Context::new(Address::client(0));
        client.init(&mut ctx);
        assert!(matches!(&ctx.take_sends()[..], [(_, PbMsg::GetView)]));

        client.send_command(get("x"), &mut ctx);
        // no view yet: only another view query goes out
        assert!(matches!(&ctx.take_sends()[..], [(_, PbMsg::GetView)]));
        assert_eq!(ctx.take_timers().len(), 1);

        client.on_message(
            Address::view_server(),
            PbMsg::ViewReply { view: view(1, 0) },
            &mut ctx,
        );
        let sends = ctx.take_sends();
        assert!(matches!(
            &sends[..],
            [(to, PbMsg::Request { seq: 1, .. })] if *to == Address::server(0)
        ));

        // same primary in a later view: nothing resent
        client.on_message(
            Address::view_server(),
            PbMsg::ViewReply { view: view(2, 0) },
            &mut ctx,
        );
        assert!(ctx.sends().is_empty());
    }

    #[test]
    fn reply_matching_and_retry() {
        let mut client = new_client();
        let rx = client.result_watch();
        let mut ctx = Context::new(Address::client(0));
        client.on_message(
            Address::view_server(),
            PbMsg::ViewReply { view: view(1, 0) },
            &mut ctx,
        );
        client.send_command(get("x"), &mut ctx);
        client.send_command(get("y"), &mut ctx);
        ctx.take_sends();
        ctx.take_timers();

        client.on_message(
            Address::server(0),
            PbMsg::Reply {
                result: KvResult::KeyNotFound,
                seq: 1,
            },
            &mut ctx,
        );
        assert!(client.is_pending());

        client.on_timer(ClientTimer::Retry { seq: 2 }, &mut ctx);
        assert_eq!(ctx.take_sends().len(), 2);
        assert_eq!(ctx.take_timers().len(), 1);

        client.on_message(
            Address::server(0),
            PbMsg::Reply {
                result: KvResult::KeyNotFound,
                seq: 2,
            },
            &mut ctx,
        );
        assert!(!client.is_pending());
        assert_eq!(
            *rx.borrow(),
            ResultState {
                seq: 2,
                result: Some(KvResult::KeyNotFound)
            }
        );

        client.on_timer(ClientTimer::Retry { seq: 2 }, &mut ctx);
        assert!(ctx.sends().is_empty());
        assert!(ctx.timers().is_empty());
    }
}
