//! Election scenarios played out by hand on the voting and pinging bookkeeping, without any
//! timers, transport or actors

use election::follower_pinger::FollowerPinger;
use election::rpc::{PingError, RpcError};
use election::voting_round::{RoundOutcome, VotingRound};
use election::{Epoch, PeerId, Priority, State, Status};
use std::time::{Duration, Instant};

struct TestCell {
    statuses: Vec<Status>,
    reachable: Vec<bool>,
}

impl TestCell {
    /// Every peer starts out voting for itself in its own epoch.
    fn new(priorities: &[Priority]) -> TestCell {
        let statuses = priorities
            .iter()
            .enumerate()
            .map(|(id, &priority)| {
                Status::new(State::Voting, id as PeerId, priority, epoch_of(id as PeerId))
            })
            .collect();
        TestCell {
            statuses,
            reachable: vec![true; priorities.len()],
        }
    }

    fn quorum(&self) -> usize {
        self.statuses.len() / 2 + 1
    }

    /// One voting round run by `id`, returning what it decided.
    fn round(&mut self, id: PeerId) -> RoundOutcome {
        let local = self.statuses[id as usize];
        let mut round = VotingRound::new(id, self.quorum(), local);
        for (peer, status) in self.statuses.iter().enumerate() {
            if peer as PeerId != id && self.reachable[peer] {
                round.record(peer as PeerId, *status);
            }
        }
        let outcome = round.conclude();
        let priority = local.priority;
        self.statuses[id as usize] = match outcome {
            RoundOutcome::Lead => {
                Status::new(State::Leading, id, priority, local.vote_epoch.unwrap())
            }
            RoundOutcome::Follow { leader_id, epoch } => {
                Status::new(State::Following, leader_id, priority, epoch)
            }
            RoundOutcome::VoteFor { candidate, epoch } => {
                Status::new(State::Voting, candidate, priority, epoch)
            }
            RoundOutcome::VoteForSelf => Status::new(State::Voting, id, priority, Epoch::random()),
        };
        outcome
    }

    /// Voting peers take turns running rounds until nobody is voting anymore.
    fn settle(&mut self) {
        for _ in 0..10 {
            let voting: Vec<PeerId> = (0..self.statuses.len() as PeerId)
                .filter(|&id| self.reachable[id as usize])
                .filter(|&id| self.statuses[id as usize].state == State::Voting)
                .collect();
            if voting.is_empty() {
                return;
            }
            for id in voting {
                self.round(id);
            }
        }
        panic!("cell did not settle: {:?}", self.statuses);
    }

    fn leaders(&self) -> Vec<PeerId> {
        (0..self.statuses.len() as PeerId)
            .filter(|&id| self.statuses[id as usize].state == State::Leading)
            .collect()
    }
}

fn epoch_of(id: PeerId) -> Epoch {
    Epoch::from_raw(10 + id as u128)
}

#[test]
fn happy_path() {
    // cell of 3 peers where peer 1 has the highest priority
    let mut cell = TestCell::new(&[0, 5, 0]);

    // peer 0 sees nobody with a quorum and moves its vote to the best peer it knows of
    assert_eq!(
        cell.round(0),
        RoundOutcome::VoteFor {
            candidate: 1,
            epoch: epoch_of(1)
        }
    );
    // peer 1 now counts its own vote and the one from peer 0, which is a majority
    assert_eq!(cell.round(1), RoundOutcome::Lead);
    // peer 2 finds a leader backed by a quorum in one epoch and follows it
    assert_eq!(
        cell.round(2),
        RoundOutcome::Follow {
            leader_id: 1,
            epoch: epoch_of(1)
        }
    );
    // peer 0 was still voting and now follows as well
    assert_eq!(
        cell.round(0),
        RoundOutcome::Follow {
            leader_id: 1,
            epoch: epoch_of(1)
        }
    );
    assert_eq!(cell.leaders(), vec![1]);
}

mod elections {
    use super::*;

    // with equal priorities every vote drifts to the lowest peer id
    #[test]
    fn equal_priorities() {
        let mut cell = TestCell::new(&[0, 0, 0, 0, 0]);
        cell.settle();
        assert_eq!(cell.leaders(), vec![0]);
        for status in &cell.statuses[1..] {
            assert_eq!(status.state, State::Following);
            assert!(status.votes_for(0, epoch_of(0)));
        }
    }

    // a peer that voted for a candidate reports that candidate's epoch, so the candidate can
    // gather a quorum even though it started out in a different epoch than the voters
    #[test]
    fn votes_carry_the_candidates_epoch() {
        let mut cell = TestCell::new(&[1, 2, 3]);
        cell.settle();
        assert_eq!(cell.leaders(), vec![2]);
        assert!(cell.statuses[0].votes_for(2, epoch_of(2)));
        assert!(cell.statuses[1].votes_for(2, epoch_of(2)));
    }

    // an unreachable peer does not stop a majority from electing a leader
    #[test]
    fn minority_unreachable() {
        let mut cell = TestCell::new(&[0, 9, 0]);
        cell.reachable[1] = false;
        cell.settle();
        assert_eq!(cell.leaders(), vec![0]);
        assert_eq!(cell.statuses[2].state, State::Following);
    }

    // a peer cut off from the majority can never elect itself
    #[test]
    fn alone_in_a_partition() {
        let mut cell = TestCell::new(&[9, 0, 0]);
        cell.reachable[1] = false;
        cell.reachable[2] = false;
        for _ in 0..5 {
            assert_eq!(
                cell.round(0),
                RoundOutcome::VoteFor {
                    candidate: 0,
                    epoch: epoch_of(0)
                }
            );
        }
        assert!(cell.leaders().is_empty());
    }

    // a peer still leading an old epoch without support is not followed
    #[test]
    fn stale_leader_is_ignored() {
        let mut cell = TestCell::new(&[0, 0, 0]);
        cell.statuses[2] = Status::new(State::Leading, 2, 0, Epoch::from_raw(5));
        assert_eq!(
            cell.round(1),
            RoundOutcome::VoteFor {
                candidate: 0,
                epoch: epoch_of(0)
            }
        );
        assert_eq!(cell.round(0), RoundOutcome::Lead);
    }

    // the candidate everybody voted for disappears before it learns it leads, the remaining
    // majority starts over in fresh epochs and elects one of its own
    #[test]
    fn candidate_gone_before_leading() {
        let mut cell = TestCell::new(&[0, 0, 5]);
        assert_eq!(
            cell.round(0),
            RoundOutcome::VoteFor {
                candidate: 2,
                epoch: epoch_of(2)
            }
        );
        assert_eq!(
            cell.round(1),
            RoundOutcome::VoteFor {
                candidate: 2,
                epoch: epoch_of(2)
            }
        );

        cell.reachable[2] = false;
        assert_eq!(cell.round(0), RoundOutcome::VoteForSelf);
        assert_eq!(cell.statuses[0].vote_id, Some(0));
        assert_ne!(cell.statuses[0].vote_epoch, Some(epoch_of(0)));

        cell.settle();
        assert_eq!(cell.leaders(), vec![0]);
        assert_eq!(cell.statuses[1].state, State::Following);
    }

    // a stopped candidate is abandoned the same way
    #[test]
    fn candidate_stopped_before_leading() {
        let mut cell = TestCell::new(&[0, 0, 5]);
        cell.round(0);
        cell.round(1);
        cell.statuses[2] = Status::stopped(5);
        assert_eq!(cell.round(0), RoundOutcome::VoteForSelf);
        let fresh = cell.statuses[0].vote_epoch.unwrap();
        // peer 1 moves straight to peer 0's new vote
        assert_eq!(
            cell.round(1),
            RoundOutcome::VoteFor {
                candidate: 0,
                epoch: fresh
            }
        );
        assert_eq!(cell.round(0), RoundOutcome::Lead);
        assert_eq!(
            cell.round(1),
            RoundOutcome::Follow {
                leader_id: 0,
                epoch: fresh
            }
        );
    }

    // stopped peers answer but never receive a vote
    #[test]
    fn stopped_peer_is_skipped() {
        let mut cell = TestCell::new(&[9, 0, 0]);
        cell.statuses[0] = Status::stopped(9);
        assert_eq!(
            cell.round(2),
            RoundOutcome::VoteFor {
                candidate: 1,
                epoch: epoch_of(1)
            }
        );
        assert_eq!(cell.round(1), RoundOutcome::Lead);
    }
}

/// A leader of a cell of 3 keeping track of its followers after it won an election.
mod leadership {
    use super::*;

    const POTENTIAL_TIMEOUT: Duration = Duration::from_millis(500);

    fn not_following() -> Result<(), RpcError> {
        Err(PingError::InvalidState {
            state: State::Voting,
            leader_id: 0,
            epoch: epoch_of(0),
        }
        .into())
    }

    #[test]
    fn followers_join_late() {
        let start = Instant::now();
        let mut pinger = FollowerPinger::new(0, 0..3, 2, epoch_of(0), start, POTENTIAL_TIMEOUT);

        // peer 1 already follows
        pinger.record(1, &Ok(()), start);
        // peer 2 is still voting, which is fine for a while
        pinger.record(2, &not_following(), start + Duration::from_millis(100));
        assert!(pinger.alive_followers().contains(&2));
        // until it catches up
        pinger.record(2, &Ok(()), start + Duration::from_millis(200));
        assert!(pinger.potential_followers().iter().all(|&id| id == 0));
        assert_eq!(pinger.alive_followers().len(), 3);
        assert!(pinger.has_quorum());
    }

    #[test]
    fn follower_that_never_joins() {
        let start = Instant::now();
        let mut pinger = FollowerPinger::new(0, 0..3, 2, epoch_of(0), start, POTENTIAL_TIMEOUT);
        pinger.record(1, &Ok(()), start);
        pinger.record(2, &not_following(), start + POTENTIAL_TIMEOUT * 2);
        assert!(!pinger.alive_followers().contains(&2));
        // one follower is still enough for a majority
        assert!(pinger.has_quorum());
    }

    #[test]
    fn quorum_lost() {
        let start = Instant::now();
        let mut pinger = FollowerPinger::new(0, 0..3, 2, epoch_of(0), start, POTENTIAL_TIMEOUT);
        pinger.record(1, &Ok(()), start);
        pinger.record(2, &Ok(()), start);

        // both followers become unreachable
        pinger.record(1, &Err(RpcError::Timeout), start + Duration::from_secs(1));
        assert!(pinger.has_quorum());
        pinger.record(2, &Err(RpcError::Unreachable(2)), start + Duration::from_secs(1));
        assert!(!pinger.has_quorum());
        assert_eq!(pinger.alive_followers().iter().copied().collect::<Vec<_>>(), vec![0]);
    }
}
