//! Primary-backup -- replica server node.

use crate::app::{AmoApplication, Application};
use crate::node::{Address, Context, Node};
use crate::primarybackup::{PbMsg, View, INITIAL_VIEWNUM};
use crate::utils::PaxlabError;

use serde::Deserialize;

use tokio::time::Duration;

/// Configuration parameters struct.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServerConfigPb {
    /// Interval of pinging the view server in millisecs.
    pub ping_interval_ms: u64,

    /// Interval of resending unacknowledged forwards and state transfers
    /// in millisecs.
    pub forward_retry_ms: u64,
}

#[allow(clippy::derivable_impls)]
impl Default for ServerConfigPb {
    fn default() -> Self {
        ServerConfigPb {
            ping_interval_ms: 25,
            forward_retry_ms: 50,
        }
    }
}

/// Timers armed by a primary-backup server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PbTimer {
    /// Periodic ping to the view server.
    Ping,

    /// Periodic resend check of forwards and state transfers.
    ForwardRetry,
}

/// Context type handed to primary-backup server handlers.
pub type PbServerContext<A> = Context<PbMsg<A>, PbTimer>;

/// A request forwarded to the backup and not yet confirmed.
#[derive(Debug, Clone)]
struct PendingForward<C> {
    client: Address,
    seq: u64,
    command: C,
}

/// Primary-backup server node replicating application `A`. Acts as primary,
/// backup, or idle spare depending on the latest view it has heard of.
pub struct PbServer<A: Application> {
    /// My address.
    me: Address,

    /// Address of the view server.
    view_server: Address,

    /// Configuration parameters struct.
    config: ServerConfigPb,

    /// Latest view heard from the view server.
    view: View,

    /// View number reported in my pings.
    acked_view: u64,

    /// The replicated application, behind at-most-once execution.
    app: AmoApplication<A>,

    /// True if `app` holds valid state for the current view.
    has_state: bool,

    /// True while, as primary, my state transfer awaits the backup's ack.
    transfer_pending: bool,

    /// Request forwarded to the backup and awaiting its reply.
    pending_forward: Option<PendingForward<A::Command>>,
}

impl<A: Application> PbServer<A> {
    /// Creates a new primary-backup server `me`.
    pub fn new_and_setup(
        me: Address,
        view_server: Address,
        app: A,
        config_str: Option<&str>,
    ) -> Result<Self, PaxlabError> {
        let config = parsed_config!(config_str => ServerConfigPb;
                                    ping_interval_ms, forward_retry_ms)?;
        if config.ping_interval_ms == 0 {
            return logged_err!(
                me;
                "invalid config.ping_interval_ms '{}'",
                config.ping_interval_ms
            );
        }
        if config.forward_retry_ms == 0 {
            return logged_err!(
                me;
                "invalid config.forward_retry_ms '{}'",
                config.forward_retry_ms
            );
        }

        Ok(PbServer {
            me,
            view_server,
            config,
            view: View::startup(),
            acked_view: 0,
            app: AmoApplication::new(app),
            has_state: false,
            transfer_pending: false,
            pending_forward: None,
        })
    }

    /// Latest view heard of.
    pub fn view(&self) -> &View {
        &self.view
    }

    /// View number reported to the view server.
    pub fn acked_view(&self) -> u64 {
        self.acked_view
    }

    /// True if I hold valid state for the current view.
    pub fn has_state(&self) -> bool {
        self.has_state
    }

    /// The replicated application.
    pub fn app(&self) -> &A {
        self.app.application()
    }

    #[inline]
    fn is_primary(&self) -> bool {
        self.view.is_primary(&self.me)
    }

    #[inline]
    fn is_backup(&self) -> bool {
        self.view.is_backup(&self.me)
    }

    fn send_ping(&self, ctx: &mut PbServerContext<A>) {
        ctx.send(
            PbMsg::Ping {
                view_num: self.acked_view,
            },
            &self.view_server,
        );
    }

    /// Sends the whole application state to my backup.
    fn send_state(&self, ctx: &mut PbServerContext<A>) {
        if let Some(backup) = &self.view.backup {
            ctx.send(
                PbMsg::StateTransfer {
                    view_num: self.view.view_num,
                    app: self.app.clone(),
                },
                backup,
            );
        }
    }

    /// Sends the pending forward to my backup.
    fn send_forward(&self, ctx: &mut PbServerContext<A>) {
        if let (Some(fwd), Some(backup)) =
            (&self.pending_forward, &self.view.backup)
        {
            ctx.send(
                PbMsg::Forward {
                    view_num: self.view.view_num,
                    client: fwd.client.clone(),
                    seq: fwd.seq,
                    command: fwd.command.clone(),
                },
                backup,
            );
        }
    }

    /// Executes a request and replies to its client.
    fn execute_and_reply(
        &mut self,
        client: Address,
        seq: u64,
        command: &A::Command,
        ctx: &mut PbServerContext<A>,
    ) {
        if let Some(result) = self.app.execute(&client, seq, command) {
            pf_trace!(self.me; "executed {} seq {}", client, seq);
            ctx.send(PbMsg::Reply { result, seq }, &client);
        }
    }

    /// Handler of ViewReply message from the view server.
    fn handle_msg_view_reply(
        &mut self,
        peer: Address,
        view: View,
        ctx: &mut PbServerContext<A>,
    ) {
        if peer != self.view_server || view.view_num <= self.view.view_num {
            return; // ignore if misrouted or not newer
        }
        let was_primary = self.is_primary();
        self.view = view;
        self.pending_forward = None;
        self.transfer_pending = false;
        pf_debug!(self.me; "learned view {}", self.view);

        if self.is_primary() {
            // a promoted backup carries the state of the previous view
            if !was_primary && !self.has_state {
                if self.view.view_num == INITIAL_VIEWNUM {
                    self.has_state = true;
                } else {
                    pf_error!(self.me; "promoted to primary without state in {}",
                                       self.view);
                }
            }
            if self.view.backup.is_some() {
                self.transfer_pending = true;
                self.send_state(ctx);
            } else {
                self.acked_view = self.view.view_num;
            }
        } else {
            self.has_state = false;
            self.acked_view = self.view.view_num;
        }
    }

    /// Handler of client Request, as primary.
    fn handle_msg_request(
        &mut self,
        client: Address,
        command: A::Command,
        seq: u64,
        ctx: &mut PbServerContext<A>,
    ) {
        if !self.is_primary() || !self.has_state {
            return; // ignore if not serving
        }
        pf_trace!(self.me; "received Request <- {} seq {}", client, seq);

        if let Some(result) = self.app.cached_result(&client, seq) {
            ctx.send(
                PbMsg::Reply {
                    result: result.clone(),
                    seq,
                },
                &client,
            );
            return;
        }
        if self.app.already_executed(&client, seq) {
            return; // ignore if outdated
        }

        if self.view.backup.is_none() {
            self.execute_and_reply(client, seq, &command, ctx);
            return;
        }
        if self.transfer_pending || self.pending_forward.is_some() {
            return; // busy; the client retries
        }
        self.pending_forward = Some(PendingForward {
            client,
            seq,
            command,
        });
        self.send_forward(ctx);
    }

    /// Handler of Forward message, as backup.
    fn handle_msg_forward(
        &mut self,
        peer: Address,
        view_num: u64,
        client: Address,
        seq: u64,
        command: A::Command,
        ctx: &mut PbServerContext<A>,
    ) {
        if view_num != self.view.view_num
            || !self.is_backup()
            || !self.view.is_primary(&peer)
            || !self.has_state
        {
            return; // ignore if not for my current role
        }
        pf_trace!(self.me; "received Forward <- {} for {} seq {}",
                           peer, client, seq);

        // duplicates are absorbed by the AMO wrapper
        self.app.execute(&client, seq, &command);
        ctx.send(
            PbMsg::ForwardReply {
                view_num,
                client,
                seq,
            },
            &peer,
        );
    }

    /// Handler of ForwardReply message, as primary.
    fn handle_msg_forward_reply(
        &mut self,
        peer: Address,
        view_num: u64,
        client: Address,
        seq: u64,
        ctx: &mut PbServerContext<A>,
    ) {
        if view_num != self.view.view_num
            || !self.is_primary()
            || !self.view.is_backup(&peer)
        {
            return; // ignore if outdated
        }
        match &self.pending_forward {
            Some(fwd) if fwd.client == client && fwd.seq == seq => {}
            _ => return, // ignore duplicate
        }
        if let Some(fwd) = self.pending_forward.take() {
            self.execute_and_reply(fwd.client, fwd.seq, &fwd.command, ctx);
        }
    }

    /// Handler of StateTransfer message, as backup.
    fn handle_msg_state_transfer(
        &mut self,
        peer: Address,
        view_num: u64,
        app: AmoApplication<A>,
        ctx: &mut PbServerContext<A>,
    ) {
        if view_num != self.view.view_num
            || !self.is_backup()
            || !self.view.is_primary(&peer)
        {
            return; // ignore if not for my current role
        }
        if !self.has_state {
            self.app = app;
            self.has_state = true;
            pf_debug!(self.me; "installed state of view {}", view_num);
        }
        ctx.send(PbMsg::StateAck { view_num }, &peer);
    }

    /// Handler of StateAck message, as primary.
    fn handle_msg_state_ack(&mut self, peer: Address, view_num: u64) {
        if view_num != self.view.view_num
            || !self.is_primary()
            || !self.view.is_backup(&peer)
            || !self.transfer_pending
        {
            return; // ignore if outdated or duplicate
        }
        self.transfer_pending = false;
        self.acked_view = view_num;
        pf_debug!(self.me; "backup {} has state of view {}", peer, view_num);
    }

    /// Handler of forward retry timer tick.
    fn handle_forward_retry(&mut self, ctx: &mut PbServerContext<A>) {
        if self.is_primary() {
            if self.transfer_pending {
                self.send_state(ctx);
            } else {
                self.send_forward(ctx);
            }
        }
        ctx.set_timer(
            PbTimer::ForwardRetry,
            Duration::from_millis(self.config.forward_retry_ms),
        );
    }
}

impl<A: Application> Node for PbServer<A> {
    type Msg = PbMsg<A>;
    type Timer = PbTimer;

    fn address(&self) -> &Address {
        &self.me
    }

    fn init(&mut self, ctx: &mut PbServerContext<A>) {
        self.send_ping(ctx);
        ctx.set_timer(
            PbTimer::Ping,
            Duration::from_millis(self.config.ping_interval_ms),
        );
        ctx.set_timer(
            PbTimer::ForwardRetry,
            Duration::from_millis(self.config.forward_retry_ms),
        );
        pf_info!(self.me; "primary-backup server up");
    }

    fn on_message(
        &mut self,
        from: Address,
        msg: PbMsg<A>,
        ctx: &mut PbServerContext<A>,
    ) {
        match msg {
            PbMsg::ViewReply { view } => {
                self.handle_msg_view_reply(from, view, ctx)
            }
            PbMsg::Request { command, seq } => {
                self.handle_msg_request(from, command, seq, ctx)
            }
            PbMsg::Forward {
                view_num,
                client,
                seq,
                command,
            } => self
                .handle_msg_forward(from, view_num, client, seq, command, ctx),
            PbMsg::ForwardReply {
                view_num,
                client,
                seq,
            } => self.handle_msg_forward_reply(from, view_num, client, seq, ctx),
            PbMsg::StateTransfer { view_num, app } => {
                self.handle_msg_state_transfer(from, view_num, app, ctx)
            }
            PbMsg::StateAck { view_num } => {
                self.handle_msg_state_ack(from, view_num)
            }
            _ => {
                pf_warn!(self.me; "ignoring unexpected msg from {}: {:?}",
                                  from, msg);
            }
        }
    }

    fn on_timer(&mut self, timer: PbTimer, ctx: &mut PbServerContext<A>) {
        match timer {
            PbTimer::Ping => {
                self.send_ping(ctx);
                ctx.set_timer(
                    PbTimer::Ping,
                    Duration::from_millis(self.config.ping_interval_ms),
                );
            }
            PbTimer::ForwardRetry => self.handle_forward_retry(ctx),
        }
    }
}

#[cfg(test)]
mod server_tests {
    use super::*;
    use crate::app::{KvCommand, KvResult, KvStore};

    type Msg = PbMsg<KvStore>;

    fn new_server(idx: usize) -> PbServer<KvStore> {
        PbServer::new_and_setup(
            Address::server(idx),
            Address::view_server(),
            KvStore::new(),
            None,
        )
        .unwrap()
    }

    fn view(num: u64, p: usize, b: Option<usize>) -> View {
        View {
            view_num: num,
            primary: Some(Address::server(p)),
            backup: b.map(Address::server),
        }
    }

    fn put(key: &str, value: &str) -> KvCommand {
        KvCommand::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    fn deliver(
        server: &mut PbServer<KvStore>,
        from: Address,
        msg: Msg,
    ) -> Vec<(Address, Msg)> {
        let mut ctx = Context::new(server.address().clone());
        server.on_message(from, msg, &mut ctx);
        ctx.take_sends()
    }

    fn learn(server: &mut PbServer<KvStore>, v: View) -> Vec<(Address, Msg)> {
        deliver(server, Address::view_server(), PbMsg::ViewReply { view: v })
    }

    #[test]
    fn init_pings_and_arms() {
        let mut server = new_server(0);
        let mut ctx = Context::new(Address::server(0));
        server.init(&mut ctx);
        assert!(matches!(
            ctx.sends(),
            [(_, PbMsg::Ping { view_num: 0 })]
        ));
        assert_eq!(ctx.timers().len(), 2);
    }

    #[test]
    fn lone_primary_executes_directly() {
        let mut server = new_server(0);
        assert!(learn(&mut server, view(1, 0, None)).is_empty());
        assert_eq!(server.acked_view(), 1);
        assert!(server.has_state());

        let sends = deliver(
            &mut server,
            Address::client(0),
            PbMsg::Request {
                command: put("k", "v"),
                seq: 1,
            },
        );
        assert!(matches!(
            &sends[..],
            [(to, PbMsg::Reply { result: KvResult::PutOk, seq: 1 })]
                if *to == Address::client(0)
        ));

        // a retried request is answered from the stored result
        let sends = deliver(
            &mut server,
            Address::client(0),
            PbMsg::Request {
                command: put("k", "v"),
                seq: 1,
            },
        );
        assert_eq!(sends.len(), 1);
    }

    #[test]
    fn view_acked_after_state_transfer() {
        let mut primary = new_server(0);
        let mut backup = new_server(1);
        learn(&mut primary, view(1, 0, None));
        deliver(
            &mut primary,
            Address::client(0),
            PbMsg::Request {
                command: put("k", "v"),
                seq: 1,
            },
        );

        let mut sends = learn(&mut primary, view(2, 0, Some(1)));
        assert_eq!(primary.acked_view(), 1);
        let (to, transfer) = sends.pop().unwrap();
        assert_eq!(to, Address::server(1));

        // backup not yet aware of view 2 ignores the transfer
        assert!(deliver(&mut backup, Address::server(0), transfer.clone())
            .is_empty());
        learn(&mut backup, view(2, 0, Some(1)));
        assert!(!backup.has_state());
        let mut acks = deliver(&mut backup, Address::server(0), transfer);
        assert!(backup.has_state());
        assert_eq!(backup.app(), primary.app());

        let (_, ack) = acks.pop().unwrap();
        deliver(&mut primary, Address::server(1), ack);
        assert_eq!(primary.acked_view(), 2);
    }

    #[test]
    fn request_forwarded_before_execution() {
        let mut primary = new_server(0);
        let mut backup = new_server(1);
        learn(&mut primary, view(1, 0, None));
        let (_, transfer) = learn(&mut primary, view(2, 0, Some(1))).remove(0);
        learn(&mut backup, view(2, 0, Some(1)));
        let (_, ack) = deliver(&mut backup, Address::server(0), transfer)
            .remove(0);
        deliver(&mut primary, Address::server(1), ack);

        let mut sends = deliver(
            &mut primary,
            Address::client(0),
            PbMsg::Request {
                command: put("k", "v"),
                seq: 1,
            },
        );
        assert_eq!(primary.app().len(), 0);
        let (to, forward) = sends.pop().unwrap();
        assert_eq!(to, Address::server(1));

        // a second client is turned away while the forward is outstanding
        assert!(deliver(
            &mut primary,
            Address::client(1),
            PbMsg::Request {
                command: put("j", "w"),
                seq: 1,
            },
        )
        .is_empty());

        // a forward from a non-primary is ignored
        assert!(deliver(&mut backup, Address::server(2), forward.clone())
            .is_empty());
        let (_, reply) =
            deliver(&mut backup, Address::server(0), forward).remove(0);
        assert_eq!(backup.app().len(), 1);

        let sends = deliver(&mut primary, Address::server(1), reply);
        assert_eq!(primary.app().len(), 1);
        assert!(matches!(
            &sends[..],
            [(_, PbMsg::Reply { result: KvResult::PutOk, seq: 1 })]
        ));
    }

    #[test]
    fn retry_timer_resends_transfer() {
        let mut primary = new_server(0);
        learn(&mut primary, view(1, 0, None));
        learn(&mut primary, view(2, 0, Some(1)));
        let mut ctx = Context::new(Address::server(0));
        primary.on_timer(PbTimer::ForwardRetry, &mut ctx);
        assert!(matches!(
            ctx.sends(),
            [(_, PbMsg::StateTransfer { view_num: 2, .. })]
        ));
        assert_eq!(ctx.timers().len(), 1);
    }

    #[test]
    fn non_primary_ignores_requests() {
        let mut server = new_server(1);
        learn(&mut server, view(2, 0, Some(1)));
        assert!(deliver(
            &mut server,
            Address::client(0),
            PbMsg::Request {
                command: put("k", "v"),
                seq: 1,
            },
        )
        .is_empty());
        // old views are not re-learned
        assert!(learn(&mut server, view(1, 1, None)).is_empty());
        assert_eq!(server.view().view_num, 2);
    }
}
