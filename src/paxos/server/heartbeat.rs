//! Paxos -- heartbeats, hole filling, and garbage collection.

use super::*;

use crate::paxos::make_greater_ballot;

// PaxosServer heartbeat and log GC functionality
impl<A: Application> PaxosServer<A> {
    /// Handler of heartbeat timer tick: tell peers how far I have executed,
    /// fill long-standing holes, and re-arm.
    pub(super) fn handle_heartbeat_timeout(
        &mut self,
        ctx: &mut ServerContext<A>,
    ) {
        ctx.broadcast(
            PaxosMsg::Heartbeat {
                cleared_slot: self.exec_bar - 1,
            },
            &self.servers,
        );

        self.check_holes(ctx);

        ctx.set_timer(
            PaxosTimer::Heartbeat,
            Duration::from_millis(self.config.heartbeat_interval_ms),
        );
    }

    /// Handler of Heartbeat message from a peer.
    pub(super) fn handle_msg_heartbeat(
        &mut self,
        peer: Address,
        cleared_slot: usize,
    ) {
        pf_trace!(self.me; "received Heartbeat <- {} cleared {}",
                           peer, cleared_slot);
        match self.cleared_until.get_mut(&peer) {
            Some(cleared) if *cleared < cleared_slot => *cleared = cleared_slot,
            Some(_) => return, // never lowered
            None => return,
        }
        self.bump_next_slot(cleared_slot);
        self.garbage_collect();
    }

    /// Proposes into every undecided slot between the execution bar and the
    /// highest slot known to exist, if execution has been stuck at the same
    /// slot across two heartbeat ticks. A vote at the execution bar counts
    /// as a hole, since its proposer may have crashed. A no-op is proposed
    /// unless promises reveal a voted value.
    fn check_holes(&mut self, ctx: &mut ServerContext<A>) {
        let hole = self.exec_bar;
        let log_last = self.log.keys().next_back().copied().unwrap_or(0);
        let peer_cleared =
            self.cleared_until.values().copied().max().unwrap_or(0);
        let voted_at_hole = self
            .log
            .get(&hole)
            .is_some_and(|inst| inst.voted().is_some());
        if log_last <= hole && peer_cleared < hole && !voted_at_hole {
            // nothing decided or voted is known at or beyond the execution bar
            self.hole_watch = None;
            return;
        }
        let known_last = log_last.max(peer_cleared);
        if self.hole_watch != Some(hole) {
            self.hole_watch = Some(hole);
            return;
        }

        let stuck: Vec<(usize, Ballot)> = (hole..=known_last)
            .filter_map(|slot| match self.log.get(&slot) {
                Some(inst) if inst.is_chosen() || inst.proposal().is_some() => {
                    None
                }
                Some(inst) => Some((slot, inst.ballot())),
                None => Some((slot, 0)),
            })
            .collect();
        for (slot, seen) in stuck {
            let ballot = make_greater_ballot(seen, self.index);
            pf_debug!(self.me; "filling hole at slot {} bal {}", slot, ballot);
            self.start_proposal(slot, ballot, LogValue::Noop, ctx);
        }
    }

    /// Removes every slot that all servers have executed.
    pub(super) fn garbage_collect(&mut self) {
        let min_cleared = self
            .cleared_until
            .values()
            .copied()
            .min()
            .unwrap_or(0)
            .min(self.exec_bar - 1);
        if min_cleared <= self.gc_bar {
            return;
        }

        self.log = self.log.split_off(&(min_cleared + 1));
        pf_debug!(self.me; "garbage collected slots {} to {}",
                           self.gc_bar + 1, min_cleared);
        self.gc_bar = min_cleared;
    }
}
