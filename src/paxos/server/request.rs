//! Paxos -- client request entrance and proposal driving.

use super::*;

use crate::paxos::{make_greater_ballot, make_unique_ballot, PaxosRequest};

// PaxosServer client requests entrance
impl<A: Application> PaxosServer<A> {
    /// Handler of client request.
    pub(super) fn handle_msg_request(
        &mut self,
        from: Address,
        command: A::Command,
        client: Address,
        seq: u64,
        ctx: &mut ServerContext<A>,
    ) {
        pf_trace!(self.me; "received Request <- {} for {} seq {}",
                           from, client, seq);

        // executed before: answer from the stored result
        if let Some(result) = self.app.cached_result(&client, seq) {
            ctx.send(
                PaxosMsg::Reply {
                    result: result.clone(),
                    client: client.clone(),
                    seq,
                },
                &client,
            );
            return;
        }
        if self.app.already_executed(&client, seq) {
            return; // ignore if outdated
        }
        if self.request_in_flight(&client, seq) {
            return; // ignore duplicate
        }

        self.propose_new(
            LogValue::Request(PaxosRequest {
                command,
                client,
                seq,
            }),
            ctx,
        );
    }

    /// True if request `(client, seq)` lives in some slot not yet executed.
    pub(super) fn request_in_flight(&self, client: &Address, seq: u64) -> bool {
        self.log
            .range(self.exec_bar..)
            .any(|(_, inst)| inst.holds_request(client, seq))
    }

    /// Proposes a value into my next free slot.
    pub(super) fn propose_new(
        &mut self,
        value: LogValue<A::Command>,
        ctx: &mut ServerContext<A>,
    ) {
        let slot = self.next_slot;
        self.next_slot += 1;
        let ballot = match self.log.get(&slot) {
            Some(inst) => make_greater_ballot(inst.ballot(), self.index),
            None => make_unique_ballot(1, self.index),
        };
        self.start_proposal(slot, ballot, value, ctx);
    }

    /// Starts phase 1 of my proposal of `value` for `slot` at `ballot`:
    /// promise locally, ask peers, and arm the retry timer.
    pub(super) fn start_proposal(
        &mut self,
        slot: usize,
        ballot: Ballot,
        value: LogValue<A::Command>,
        ctx: &mut ServerContext<A>,
    ) {
        let population = self.population();
        let inst = self.log.entry(slot).or_insert_with(|| LogSlot::new(slot));
        if inst.is_chosen() {
            return;
        }
        debug_assert!(ballot >= inst.ballot());

        inst.start_proposal(ballot, value, population);
        let own_vote = inst.voted().cloned();
        let reached = inst.record_promise(&self.me, ballot, own_vote, population);

        ctx.broadcast(PaxosMsg::Prepare { ballot, slot }, &self.servers);
        ctx.set_timer(PaxosTimer::Proposal { slot, ballot }, self.retry_timeout());
        pf_debug!(self.me; "enter Prepare phase for slot {} bal {}",
                           slot, ballot);

        if reached {
            self.enter_accept_phase(slot, ctx);
        }
    }

    /// Handler of proposal retry timeout: if my proposal for the slot is
    /// still undecided at the same ballot, retry with a greater one.
    pub(super) fn handle_proposal_timeout(
        &mut self,
        slot: usize,
        ballot: Ballot,
        ctx: &mut ServerContext<A>,
    ) {
        if slot <= self.gc_bar {
            return;
        }
        let (seen, original) = match self.log.get(&slot) {
            Some(inst) if !inst.is_chosen() => match inst.proposal() {
                Some(p) if p.ballot == ballot => {
                    (inst.ballot(), p.original.clone())
                }
                _ => return,
            },
            _ => return,
        };

        if let LogValue::Request(req) = &original {
            if self.app.already_executed(&req.client, req.seq) {
                // executed via another slot; fill this one with a no-op
                let new_ballot = make_greater_ballot(seen, self.index);
                pf_debug!(self.me; "retrying slot {} with no-op bal {}",
                                   slot, new_ballot);
                self.start_proposal(slot, new_ballot, LogValue::Noop, ctx);
                return;
            }
        }

        let new_ballot = make_greater_ballot(seen, self.index);
        pf_debug!(self.me; "retrying slot {} bal {} -> {}",
                           slot, ballot, new_ballot);
        self.start_proposal(slot, new_ballot, original, ctx);
    }
}
