//! Paxos -- decisions and in-order execution.

use super::*;

use crate::paxos::PaxosRequest;

// PaxosServer decision handling and execution
impl<A: Application> PaxosServer<A> {
    /// Handler of Decision message. Decisions are adopted unconditionally,
    /// regardless of any ballot I have seen for the slot.
    pub(super) fn handle_msg_decision(
        &mut self,
        peer: Address,
        slot: usize,
        command: LogValue<A::Command>,
        ctx: &mut ServerContext<A>,
    ) {
        if slot <= self.gc_bar {
            return; // ignore if slot index outdated
        }
        pf_trace!(self.me; "received Decision <- {} for slot {}", peer, slot);
        self.apply_decision(slot, command, ctx);
    }

    /// Marks a slot decided, executes whatever became executable, re-proposes
    /// my own request if it lost this slot to another value, then garbage
    /// collects.
    pub(super) fn apply_decision(
        &mut self,
        slot: usize,
        value: LogValue<A::Command>,
        ctx: &mut ServerContext<A>,
    ) {
        self.bump_next_slot(slot);
        let inst = self.log.entry(slot).or_insert_with(|| LogSlot::new(slot));
        if !inst.decide(value.clone()) {
            return; // duplicate decision
        }

        let displaced = match inst.finish_proposal() {
            Some(proposal) if proposal.original != value => {
                match proposal.original {
                    LogValue::Request(req) => Some(req),
                    LogValue::Noop => None,
                }
            }
            _ => None,
        };
        pf_debug!(self.me; "decided slot {} value {:?}", slot, value);

        self.execute_decided(ctx);
        if let Some(req) = displaced {
            self.repropose(req, ctx);
        }
        self.garbage_collect();
    }

    /// Executes every contiguous decided slot from the execution bar on,
    /// replying to the requesting clients.
    fn execute_decided(&mut self, ctx: &mut ServerContext<A>) {
        while let Some(value) = self
            .log
            .get(&self.exec_bar)
            .and_then(|inst| inst.chosen())
            .cloned()
        {
            if let LogValue::Request(PaxosRequest {
                command,
                client,
                seq,
            }) = value
            {
                match self.app.execute(&client, seq, &command) {
                    Some(result) => {
                        pf_trace!(self.me; "executed slot {} for {} seq {}",
                                           self.exec_bar, client, seq);
                        ctx.send(
                            PaxosMsg::Reply {
                                result,
                                client: client.clone(),
                                seq,
                            },
                            &client,
                        );
                    }
                    None => {
                        pf_trace!(self.me; "skipped stale slot {} for {} seq {}",
                                           self.exec_bar, client, seq);
                    }
                }
            }
            self.exec_bar += 1;
        }

        self.cleared_until.insert(self.me.clone(), self.exec_bar - 1);
    }

    /// Proposes again a request of mine whose slot was decided otherwise,
    /// unless it got executed or is already riding in another slot.
    fn repropose(
        &mut self,
        req: PaxosRequest<A::Command>,
        ctx: &mut ServerContext<A>,
    ) {
        if self.app.already_executed(&req.client, req.seq)
            || self.request_in_flight(&req.client, req.seq)
        {
            return;
        }
        pf_debug!(self.me; "re-proposing displaced request {} seq {}",
                           req.client, req.seq);
        self.propose_new(LogValue::Request(req), ctx);
    }
}
