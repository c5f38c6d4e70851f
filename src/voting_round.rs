//! One round of polling the cell for votes.
//!
//! The round's table starts with the local status; the manager adds every status a peer
//! reports and then asks the round for its [`RoundOutcome`]. A candidate wins when it is
//! feasible and a quorum of reports vote for it in the same epoch. With no winner, the local
//! peer moves its vote to the best candidate it has seen, or back to itself when the candidate
//! it voted for is gone.

use super::state::{Epoch, State, Status};
use super::PeerId;
use log::debug;
use std::collections::BTreeMap;

/// Statuses collected by one round, keyed by the reporting peer.
pub type StatusTable = BTreeMap<PeerId, Status>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundOutcome {
    /// Self has a quorum.
    Lead,
    /// Another peer leads with a quorum.
    Follow { leader_id: PeerId, epoch: Epoch },
    /// No quorum yet; vote for this candidate and run another round.
    VoteFor { candidate: PeerId, epoch: Epoch },
    /// The local vote went to a peer that is gone and no other vote is eligible; vote for
    /// self in a fresh epoch.
    VoteForSelf,
}

pub struct VotingRound {
    self_id: PeerId,
    quorum: usize,
    local_vote: PeerId,
    local_epoch: Epoch,
    table: StatusTable,
}

impl VotingRound {
    /// # Panics
    /// If the local status is not a vote cast while voting
    pub fn new(self_id: PeerId, quorum: usize, local: Status) -> Self {
        assert_eq!(
            local.state,
            State::Voting,
            "A voting round can only start while voting"
        );
        let (local_vote, local_epoch) = match (local.vote_id, local.vote_epoch) {
            (Some(vote), Some(epoch)) => (vote, epoch),
            _ => panic!("A voting round needs a local vote, got {:?}", local),
        };
        let mut table = StatusTable::new();
        table.insert(self_id, local);
        Self {
            self_id,
            quorum,
            local_vote,
            local_epoch,
            table,
        }
    }

    pub fn table(&self) -> &StatusTable {
        &self.table
    }

    /// Add a peer's report. A report from self replaces the seeded local status.
    pub fn record(&mut self, peer: PeerId, status: Status) {
        self.table.insert(peer, status);
    }

    /// Number of reports, self included, voting for `candidate` in `epoch`.
    pub fn count_votes(&self, candidate: PeerId, epoch: Epoch) -> usize {
        self.table
            .values()
            .filter(|status| status.votes_for(candidate, epoch))
            .count()
    }

    /// A candidate must vote for itself. Self must still be voting; anybody else must already
    /// know it leads.
    pub fn is_feasible(&self, candidate: PeerId, status: &Status) -> bool {
        if status.vote_id != Some(candidate) {
            return false;
        }
        if candidate == self.self_id {
            assert_eq!(
                status.state,
                State::Voting,
                "Self can only be a candidate while voting"
            );
            true
        } else {
            status.state == State::Leading
        }
    }

    /// First feasible candidate, in table order, with a quorum of votes in its epoch.
    pub fn check_for_leader(&self) -> Option<RoundOutcome> {
        for (&candidate, status) in &self.table {
            if !self.is_feasible(candidate, status) {
                continue;
            }
            // peers may still report a stale epoch for self, so self counts in its own
            let epoch = if candidate == self.self_id {
                self.local_epoch
            } else {
                match status.vote_epoch {
                    Some(epoch) => epoch,
                    None => continue,
                }
            };
            let votes = self.count_votes(candidate, epoch);
            if votes < self.quorum {
                debug!(
                    "{}; candidate {} has too few votes ({}/{}, epoch {})",
                    self.self_id, candidate, votes, self.quorum, epoch
                );
                continue;
            }
            debug!(
                "{}; candidate {} has quorum ({}/{}, epoch {})",
                self.self_id, candidate, votes, self.quorum, epoch
            );
            return Some(if candidate == self.self_id {
                RoundOutcome::Lead
            } else {
                RoundOutcome::Follow {
                    leader_id: candidate,
                    epoch,
                }
            });
        }
        None
    }

    /// Whether a vote for `target` can be adopted: the target answered this round and its
    /// own vote points at a peer that answered as well.
    fn is_eligible(&self, target: PeerId) -> bool {
        match self.table.get(&target) {
            Some(Status {
                vote_id: Some(vote),
                vote_epoch: Some(_),
                ..
            }) => self.table.contains_key(vote),
            _ => false,
        }
    }

    /// Best vote seen in the table, ordered by the voter's priority and then by the lower
    /// candidate id. The vote moves to whatever that candidate itself votes for.
    pub fn choose_vote(&self) -> RoundOutcome {
        let mut best: Option<(&Status, PeerId)> = None;
        for status in self.table.values() {
            let target = match status.vote_id {
                Some(target) if self.is_eligible(target) => target,
                _ => continue,
            };
            let better = match best {
                None => true,
                Some((current, current_target)) => {
                    status.priority > current.priority
                        || (status.priority == current.priority && target < current_target)
                }
            };
            if better {
                best = Some((status, target));
            }
        }

        let chosen = best
            .and_then(|(_, target)| self.table.get(&target))
            .and_then(|status| match (status.vote_id, status.vote_epoch) {
                (Some(candidate), Some(epoch)) => Some((candidate, epoch)),
                _ => None,
            });
        match chosen {
            Some((candidate, epoch)) => {
                debug!(
                    "{}; no candidate has quorum, voting for {} (epoch {})",
                    self.self_id, candidate, epoch
                );
                RoundOutcome::VoteFor { candidate, epoch }
            }
            None => {
                debug!(
                    "{}; voted for {} who did not answer, voting for self",
                    self.self_id, self.local_vote
                );
                RoundOutcome::VoteForSelf
            }
        }
    }

    pub fn conclude(&self) -> RoundOutcome {
        self.check_for_leader()
            .unwrap_or_else(|| self.choose_vote())
    }
}
