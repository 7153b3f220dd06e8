//! Paxos -- per-slot consensus instance.

use std::collections::HashMap;
use std::fmt;

use crate::node::Address;
use crate::paxos::{Ballot, LogValue};
use crate::utils::Bitmap;

/// Externally visible status of a log slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SlotStatus {
    /// Nothing accepted here yet.
    Empty,

    /// Some value accepted, not known to be chosen.
    Accepted,

    /// Value chosen.
    Chosen,

    /// Garbage collected after every server executed it.
    Cleared,
}

/// Proposer-side bookkeeping of my own proposal for a slot.
#[derive(Debug, Clone)]
pub(crate) struct Proposal<C> {
    /// Ballot of this proposal.
    pub(crate) ballot: Ballot,

    /// Value I originally wanted in this slot.
    pub(crate) original: LogValue<C>,

    /// Candidate value to send in Accepts; replaced by the highest-ballot
    /// vote revealed by promises.
    pub(crate) value: LogValue<C>,

    /// Map from acceptor -> ballot of its vote (0 if none).
    pub(crate) promises: HashMap<Address, Ballot>,

    /// Highest voted ballot seen among promises.
    pub(crate) max_voted: Ballot,

    /// Which servers acknowledged my Accept.
    pub(crate) accept_acks: Bitmap,

    /// Whether phase 2 has started.
    pub(crate) accepting: bool,
}

/// One consensus instance of the replicated log.
#[derive(Clone)]
pub struct LogSlot<C> {
    /// Slot index.
    index: usize,

    /// Highest ballot seen (promised or accepted).
    ballot: Ballot,

    /// My vote: accepted ballot and value.
    voted: Option<(Ballot, LogValue<C>)>,

    /// Chosen value, once decided.
    chosen: Option<LogValue<C>>,

    /// My own proposal for this slot, if I am driving one.
    proposal: Option<Proposal<C>>,
}

impl<C> LogSlot<C>
where
    C: fmt::Debug + Clone + PartialEq,
{
    /// Creates an empty slot.
    pub fn new(index: usize) -> Self {
        LogSlot {
            index,
            ballot: 0,
            voted: None,
            chosen: None,
            proposal: None,
        }
    }

    /// Slot index.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Highest ballot seen.
    pub fn ballot(&self) -> Ballot {
        self.ballot
    }

    /// My vote, if any.
    pub fn voted(&self) -> Option<&(Ballot, LogValue<C>)> {
        self.voted.as_ref()
    }

    /// Chosen value, if decided.
    pub fn chosen(&self) -> Option<&LogValue<C>> {
        self.chosen.as_ref()
    }

    /// True once decided.
    pub fn is_chosen(&self) -> bool {
        self.chosen.is_some()
    }

    /// Status of the slot as seen locally.
    pub fn status(&self) -> SlotStatus {
        if self.chosen.is_some() {
            SlotStatus::Chosen
        } else if self.voted.is_some() {
            SlotStatus::Accepted
        } else {
            SlotStatus::Empty
        }
    }

    /// Acceptor side of Prepare: adopts `ballot` if it is not smaller than
    /// what I have seen. Returns whether it was adopted.
    pub fn prepare(&mut self, ballot: Ballot) -> bool {
        if ballot >= self.ballot {
            self.ballot = ballot;
            true
        } else {
            false
        }
    }

    /// Acceptor side of Accept: votes for `value` at `ballot` if the ballot
    /// is not smaller than what I have seen. Returns whether it was accepted.
    pub fn accept(&mut self, ballot: Ballot, value: LogValue<C>) -> bool {
        if ballot >= self.ballot {
            self.ballot = ballot;
            self.voted = Some((ballot, value));
            true
        } else {
            false
        }
    }

    /// Marks the slot decided with `value`. Returns `true` if newly decided.
    ///
    /// Panics if a different value has already been decided here.
    pub fn decide(&mut self, value: LogValue<C>) -> bool {
        match &self.chosen {
            Some(chosen) if *chosen == value => false,
            Some(chosen) => {
                panic!(
                    "agreement violated at slot {}: decided {:?} then {:?}",
                    self.index, chosen, value
                );
            }
            None => {
                self.chosen = Some(value);
                true
            }
        }
    }

    /// Starts (or restarts) my own proposal of `original` at `ballot`. The
    /// candidate starts out as my own vote if I have one, else `original`.
    pub(crate) fn start_proposal(
        &mut self,
        ballot: Ballot,
        original: LogValue<C>,
        population: usize,
    ) {
        debug_assert!(ballot >= self.ballot);
        self.ballot = ballot;
        self.proposal = Some(Proposal {
            ballot,
            value: original.clone(),
            original,
            promises: HashMap::new(),
            max_voted: 0,
            accept_acks: Bitmap::new(population),
            accepting: false,
        });
    }

    /// Proposer side of Promise. Only promises for my current proposal's
    /// ballot count, each acceptor once. The candidate value is replaced by
    /// any vote with a higher ballot than all votes seen so far. Returns
    /// `true` exactly when a strict majority is reached.
    pub(crate) fn record_promise(
        &mut self,
        peer: &Address,
        ballot: Ballot,
        voted: Option<(Ballot, LogValue<C>)>,
        population: usize,
    ) -> bool {
        let proposal = match self.proposal.as_mut() {
            Some(p) if p.ballot == ballot && !p.accepting => p,
            _ => return false,
        };
        if proposal.promises.contains_key(peer) {
            return false;
        }

        let voted_bal = voted.as_ref().map_or(0, |(bal, _)| *bal);
        proposal.promises.insert(peer.clone(), voted_bal);
        if let Some((bal, value)) = voted {
            if bal > proposal.max_voted {
                proposal.max_voted = bal;
                proposal.value = value;
            }
        }

        if proposal.promises.len() > population / 2 {
            proposal.accepting = true;
            true
        } else {
            false
        }
    }

    /// Proposer side of Accepted. Returns `true` exactly when a strict
    /// majority of acceptors has accepted my candidate at my ballot.
    pub(crate) fn record_accepted(
        &mut self,
        peer_index: usize,
        ballot: Ballot,
        value: &LogValue<C>,
    ) -> bool {
        let proposal = match self.proposal.as_mut() {
            Some(p) if p.ballot == ballot && p.accepting => p,
            _ => return false,
        };
        if proposal.value != *value {
            return false;
        }

        let had_majority = proposal.accept_acks.is_majority();
        match proposal.accept_acks.set(peer_index) {
            Ok(true) => !had_majority && proposal.accept_acks.is_majority(),
            _ => false,
        }
    }

    /// My current proposal, if any.
    pub(crate) fn proposal(&self) -> Option<&Proposal<C>> {
        self.proposal.as_ref()
    }

    /// Drops my proposal, returning it.
    pub(crate) fn finish_proposal(&mut self) -> Option<Proposal<C>> {
        self.proposal.take()
    }

    /// Candidate ballot and value of my proposal once phase 2 has started.
    pub(crate) fn candidate(&self) -> Option<(Ballot, &LogValue<C>)> {
        match &self.proposal {
            Some(p) if p.accepting => Some((p.ballot, &p.value)),
            _ => None,
        }
    }

    /// True if request `(client, seq)` is bound to get decided through this
    /// slot: it is the chosen value, or the slot is undecided and I am
    /// driving a proposal carrying it. A bare vote does not count, as its
    /// proposer may be gone.
    pub(crate) fn holds_request(&self, client: &Address, seq: u64) -> bool {
        match &self.chosen {
            Some(chosen) => chosen.is_request(client, seq),
            None => self.proposal.as_ref().is_some_and(|p| {
                p.value.is_request(client, seq)
                    || p.original.is_request(client, seq)
            }),
        }
    }
}

// Implement `Debug` trait manually for shorter trace printing.
impl<C: fmt::Debug> fmt::Debug for LogSlot<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{{#{} bal {} voted {:?} chosen {:?}}}",
            self.index, self.ballot, self.voted, self.chosen
        )
    }
}
