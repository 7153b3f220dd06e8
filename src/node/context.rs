//! Effect-collecting handler context.

use crate::node::Address;

use tokio::time::Duration;

/// Outbox handed to every node handler. Handlers never touch the network or
/// the clock directly; they record sends and timer requests here and the
/// runner flushes them after the handler returns.
#[derive(Debug)]
pub struct Context<M, T> {
    /// Address of the node owning this context.
    me: Address,

    /// Messages queued for sending, in order.
    sends: Vec<(Address, M)>,

    /// Timers queued for arming, in order.
    timers: Vec<(T, Duration)>,
}

impl<M, T> Context<M, T>
where
    M: Clone,
{
    /// Creates an empty context for node `me`.
    pub fn new(me: Address) -> Self {
        Context {
            me,
            sends: vec![],
            timers: vec![],
        }
    }

    /// Address of the owning node.
    pub fn me(&self) -> &Address {
        &self.me
    }

    /// Queues a message to a single destination.
    pub fn send(&mut self, msg: M, to: &Address) {
        self.sends.push((to.clone(), msg));
    }

    /// Queues a copy of the message to every destination except myself.
    pub fn broadcast<'a>(
        &mut self,
        msg: M,
        to_all: impl IntoIterator<Item = &'a Address>,
    ) {
        for to in to_all {
            if *to != self.me {
                self.sends.push((to.clone(), msg.clone()));
            }
        }
    }

    /// Queues a single-shot timer that fires after `dur`.
    pub fn set_timer(&mut self, timer: T, dur: Duration) {
        self.timers.push((timer, dur));
    }

    /// Queued sends so far.
    pub fn sends(&self) -> &[(Address, M)] {
        &self.sends
    }

    /// Queued timers so far.
    pub fn timers(&self) -> &[(T, Duration)] {
        &self.timers
    }

    /// Drains all queued sends.
    pub fn take_sends(&mut self) -> Vec<(Address, M)> {
        std::mem::take(&mut self.sends)
    }

    /// Drains all queued timers.
    pub fn take_timers(&mut self) -> Vec<(T, Duration)> {
        std::mem::take(&mut self.timers)
    }
}

#[cfg(test)]
mod context_tests {
    use super::*;

    #[test]
    fn broadcast_skips_self() {
        let servers: Vec<Address> = (0..3).map(Address::server).collect();
        let mut ctx: Context<u32, ()> = Context::new(Address::server(1));
        ctx.broadcast(7, &servers);
        let dsts: Vec<_> = ctx.sends().iter().map(|(a, _)| a.clone()).collect();
        assert_eq!(dsts, vec![Address::server(0), Address::server(2)]);
    }

    #[test]
    fn take_drains() {
        let mut ctx: Context<u32, &str> = Context::new(Address::client(0));
        ctx.send(1, &Address::server(0));
        ctx.set_timer("retry", Duration::from_millis(10));
        assert_eq!(ctx.take_sends().len(), 1);
        assert_eq!(ctx.take_timers(), vec![("retry", Duration::from_millis(10))]);
        assert!(ctx.sends().is_empty());
        assert!(ctx.timers().is_empty());
    }
}
