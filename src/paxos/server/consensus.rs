//! Paxos -- prepare and accept phases, both roles.

use super::*;

// PaxosServer acceptor/proposer message handling
impl<A: Application> PaxosServer<A> {
    /// Handler of Prepare message from a proposer.
    pub(super) fn handle_msg_prepare(
        &mut self,
        peer: Address,
        ballot: Ballot,
        slot: usize,
        ctx: &mut ServerContext<A>,
    ) {
        if slot <= self.gc_bar {
            return; // ignore if slot index outdated
        }
        pf_trace!(self.me; "received Prepare <- {} for slot {} bal {}",
                           peer, slot, ballot);
        self.bump_next_slot(slot);

        let inst = self.log.entry(slot).or_insert_with(|| LogSlot::new(slot));

        // lagging proposer: tell it what was decided
        if let Some(chosen) = inst.chosen() {
            ctx.send(
                PaxosMsg::Decision {
                    slot,
                    command: chosen.clone(),
                },
                &peer,
            );
            return;
        }

        // if ballot is not smaller than what I have seen:
        if inst.prepare(ballot) {
            let (accepted_ballot, accepted_command) = match inst.voted() {
                Some((bal, value)) => (*bal, Some(value.clone())),
                None => (0, None),
            };
            ctx.send(
                PaxosMsg::Promise {
                    ballot,
                    accepted_ballot,
                    accepted_command,
                    slot,
                },
                &peer,
            );
            pf_trace!(self.me; "sent Promise -> {} for slot {} bal {}",
                               peer, slot, ballot);
        }
    }

    /// Handler of Promise reply from an acceptor.
    pub(super) fn handle_msg_promise(
        &mut self,
        peer: Address,
        ballot: Ballot,
        accepted_ballot: Ballot,
        accepted_command: Option<LogValue<A::Command>>,
        slot: usize,
        ctx: &mut ServerContext<A>,
    ) {
        if slot <= self.gc_bar {
            return; // ignore if slot index outdated
        }
        pf_trace!(self.me; "received Promise <- {} for slot {} bal {}",
                           peer, slot, ballot);

        let population = self.population();
        let inst = match self.log.get_mut(&slot) {
            Some(inst) if !inst.is_chosen() => inst,
            _ => return,
        };
        let voted = accepted_command.map(|value| (accepted_ballot, value));
        if inst.record_promise(&peer, ballot, voted, population) {
            pf_debug!(self.me; "enter Accept phase for slot {} bal {}",
                               slot, ballot);
            self.enter_accept_phase(slot, ctx);
        }
    }

    /// Starts phase 2 of my proposal for a slot that just gathered a
    /// majority of promises: vote locally, then ask peers.
    pub(super) fn enter_accept_phase(
        &mut self,
        slot: usize,
        ctx: &mut ServerContext<A>,
    ) {
        let index = self.index;
        let inst = match self.log.get_mut(&slot) {
            Some(inst) => inst,
            None => return,
        };
        let (ballot, value) = match inst.candidate() {
            Some((ballot, value)) => (ballot, value.clone()),
            None => return,
        };

        // my own acceptor may have moved on to a higher ballot meanwhile
        let mut reached = false;
        if inst.accept(ballot, value.clone()) {
            reached = inst.record_accepted(index, ballot, &value);
        }

        ctx.broadcast(
            PaxosMsg::Accept {
                ballot,
                slot,
                command: value.clone(),
            },
            &self.servers,
        );
        pf_trace!(self.me; "broadcast Accept messages for slot {} bal {}",
                           slot, ballot);

        if reached {
            self.commit_decision(slot, value, ctx);
        }
    }

    /// Handler of Accept message from a proposer.
    pub(super) fn handle_msg_accept(
        &mut self,
        peer: Address,
        ballot: Ballot,
        slot: usize,
        command: LogValue<A::Command>,
        ctx: &mut ServerContext<A>,
    ) {
        if slot <= self.gc_bar {
            return; // ignore if slot index outdated
        }
        pf_trace!(self.me; "received Accept <- {} for slot {} bal {}",
                           peer, slot, ballot);
        self.bump_next_slot(slot);

        let inst = self.log.entry(slot).or_insert_with(|| LogSlot::new(slot));

        if let Some(chosen) = inst.chosen() {
            ctx.send(
                PaxosMsg::Decision {
                    slot,
                    command: chosen.clone(),
                },
                &peer,
            );
            return;
        }

        // if ballot is not smaller than what I have made promises for:
        if inst.accept(ballot, command.clone()) {
            ctx.send(
                PaxosMsg::Accepted {
                    ballot,
                    slot,
                    command,
                },
                &peer,
            );
            pf_trace!(self.me; "sent Accepted -> {} for slot {} bal {}",
                               peer, slot, ballot);
        }
    }

    /// Handler of Accepted reply from an acceptor.
    pub(super) fn handle_msg_accepted(
        &mut self,
        peer: Address,
        ballot: Ballot,
        slot: usize,
        command: LogValue<A::Command>,
        ctx: &mut ServerContext<A>,
    ) {
        if slot <= self.gc_bar {
            return; // ignore if slot index outdated
        }
        pf_trace!(self.me; "received Accepted <- {} for slot {} bal {}",
                           peer, slot, ballot);

        let peer_index = match self.server_index(&peer) {
            Some(peer_index) => peer_index,
            None => return,
        };
        let inst = match self.log.get_mut(&slot) {
            Some(inst) if !inst.is_chosen() => inst,
            _ => return,
        };
        if inst.record_accepted(peer_index, ballot, &command) {
            self.commit_decision(slot, command, ctx);
        }
    }

    /// A majority accepted `value` for `slot`: let everyone know and apply
    /// it locally.
    fn commit_decision(
        &mut self,
        slot: usize,
        value: LogValue<A::Command>,
        ctx: &mut ServerContext<A>,
    ) {
        pf_debug!(self.me; "chosen slot {} value {:?}", slot, value);
        ctx.broadcast(
            PaxosMsg::Decision {
                slot,
                command: value.clone(),
            },
            &self.servers,
        );
        self.apply_decision(slot, value, ctx);
    }
}
