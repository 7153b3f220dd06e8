//! Primary-backup -- view server node.

use std::collections::BTreeSet;
use std::marker::PhantomData;

use crate::app::Application;
use crate::node::{Address, Context, Node};
use crate::primarybackup::{PbMsg, View, INITIAL_VIEWNUM, STARTUP_VIEWNUM};
use crate::utils::PaxlabError;

use serde::Deserialize;

use tokio::time::Duration;

/// Configuration parameters struct.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ViewServerConfig {
    /// Length of a ping check period in millisecs. A server is considered
    /// dead after a full period without pings.
    pub ping_check_ms: u64,
}

#[allow(clippy::derivable_impls)]
impl Default for ViewServerConfig {
    fn default() -> Self {
        ViewServerConfig { ping_check_ms: 100 }
    }
}

/// Timers armed by the view server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewServerTimer {
    /// End of a ping check period.
    PingCheck,
}

/// Context type handed to view server handlers.
pub type ViewServerContext<A> = Context<PbMsg<A>, ViewServerTimer>;

/// The view server. Decides the sequence of views from server pings and
/// never moves past a view its primary has not acknowledged.
pub struct ViewServer<A: Application> {
    /// My address.
    me: Address,

    /// Configuration parameters struct.
    config: ViewServerConfig,

    /// Current view.
    view: View,

    /// True once the primary has pinged with the current view number.
    acked: bool,

    /// Servers that pinged in the current check period.
    pings_curr: BTreeSet<Address>,

    /// Servers that pinged in the previous check period.
    pings_prev: BTreeSet<Address>,

    _app: PhantomData<fn() -> A>,
}

impl<A: Application> ViewServer<A> {
    /// Creates a new view server at `me`.
    pub fn new_and_setup(
        me: Address,
        config_str: Option<&str>,
    ) -> Result<Self, PaxlabError> {
        let config = parsed_config!(config_str => ViewServerConfig;
                                    ping_check_ms)?;
        if config.ping_check_ms == 0 {
            return logged_err!(
                me;
                "invalid config.ping_check_ms '{}'",
                config.ping_check_ms
            );
        }

        Ok(ViewServer {
            me,
            config,
            view: View::startup(),
            acked: false,
            pings_curr: BTreeSet::new(),
            pings_prev: BTreeSet::new(),
            _app: PhantomData,
        })
    }

    /// Current view.
    pub fn view(&self) -> &View {
        &self.view
    }

    /// True if the current view has been acknowledged by its primary.
    pub fn is_acked(&self) -> bool {
        self.acked
    }

    #[inline]
    fn is_alive(&self, addr: &Address) -> bool {
        self.pings_curr.contains(addr) || self.pings_prev.contains(addr)
    }

    /// Smallest live server that is neither primary nor backup.
    fn idle_server(&self, skip: &[Option<&Address>]) -> Option<Address> {
        self.pings_curr
            .union(&self.pings_prev)
            .find(|s| !skip.contains(&Some(*s)))
            .cloned()
    }

    /// Moves to the next view.
    fn change_view(
        &mut self,
        primary: Option<Address>,
        backup: Option<Address>,
    ) {
        self.view = View {
            view_num: self.view.view_num + 1,
            primary,
            backup,
        };
        self.acked = false;
        pf_info!(self.me; "entering view {}", self.view);
    }

    /// Creates a new view if the current one is acknowledged and its
    /// primary or backup is missing or dead.
    fn try_new_view(&mut self) {
        if self.view.view_num == STARTUP_VIEWNUM || !self.acked {
            return;
        }
        let primary = self.view.primary.clone();
        let backup = self.view.backup.clone();

        let primary_alive = primary.as_ref().is_some_and(|p| self.is_alive(p));
        let backup_alive = backup.as_ref().is_some_and(|b| self.is_alive(b));

        if !primary_alive {
            if backup_alive {
                let new_backup =
                    self.idle_server(&[primary.as_ref(), backup.as_ref()]);
                self.change_view(backup, new_backup);
            }
            // otherwise no server holding the state is left; stay put
        } else if !backup_alive {
            let new_backup =
                self.idle_server(&[primary.as_ref(), backup.as_ref()]);
            if backup.is_some() || new_backup.is_some() {
                self.change_view(primary, new_backup);
            }
        }
    }

    /// Handler of Ping message from a server.
    fn handle_msg_ping(
        &mut self,
        peer: Address,
        view_num: u64,
        ctx: &mut ViewServerContext<A>,
    ) {
        pf_trace!(self.me; "received Ping <- {} view {}", peer, view_num);
        self.pings_curr.insert(peer.clone());

        if self.view.view_num == STARTUP_VIEWNUM {
            self.view = View {
                view_num: INITIAL_VIEWNUM,
                primary: Some(peer.clone()),
                backup: None,
            };
            self.acked = false;
            pf_info!(self.me; "entering view {}", self.view);
        } else if self.view.is_primary(&peer) && view_num == self.view.view_num
        {
            self.acked = true;
        }
        self.try_new_view();

        ctx.send(
            PbMsg::ViewReply {
                view: self.view.clone(),
            },
            &peer,
        );
    }

    /// Handler of ping check timer tick.
    fn handle_ping_check(&mut self, ctx: &mut ViewServerContext<A>) {
        self.try_new_view();
        self.pings_prev = std::mem::take(&mut self.pings_curr);
        ctx.set_timer(
            ViewServerTimer::PingCheck,
            Duration::from_millis(self.config.ping_check_ms),
        );
    }
}

impl<A: Application> Node for ViewServer<A> {
    type Msg = PbMsg<A>;
    type Timer = ViewServerTimer;

    fn address(&self) -> &Address {
        &self.me
    }

    fn init(&mut self, ctx: &mut ViewServerContext<A>) {
        ctx.set_timer(
            ViewServerTimer::PingCheck,
            Duration::from_millis(self.config.ping_check_ms),
        );
        pf_info!(self.me; "view server up");
    }

    fn on_message(
        &mut self,
        from: Address,
        msg: PbMsg<A>,
        ctx: &mut ViewServerContext<A>,
    ) {
        match msg {
            PbMsg::Ping { view_num } => {
                self.handle_msg_ping(from, view_num, ctx)
            }
            PbMsg::GetView => ctx.send(
                PbMsg::ViewReply {
                    view: self.view.clone(),
                },
                &from,
            ),
            _ => {
                pf_warn!(self.me; "ignoring unexpected msg from {}: {:?}",
                                  from, msg);
            }
        }
    }

    fn on_timer(
        &mut self,
        timer: ViewServerTimer,
        ctx: &mut ViewServerContext<A>,
    ) {
        match timer {
            ViewServerTimer::PingCheck => self.handle_ping_check(ctx),
        }
    }
}
