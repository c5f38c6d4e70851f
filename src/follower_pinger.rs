//! Leader side liveness bookkeeping.
//!
//! While leading, every other peer is pinged periodically. Peers start out both alive and
//! potential; a first successful ping confirms a potential follower. Transport errors drop a
//! follower at once, rejections are tolerated from potential followers for a grace period after
//! the leadership began. Leadership is lost once fewer than a quorum of peers are alive.

use super::rpc::{PingFollower, RpcError};
use super::state::Epoch;
use super::PeerId;
use core::time::Duration;
use log::{info, warn};
use std::collections::BTreeSet;
use std::time::Instant;

/// When to ping a follower again after an outcome was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextPing {
    /// The ping timed out, which already took longer than an interval.
    Now,
    /// After the ping interval.
    Later,
}

pub struct FollowerPinger {
    leader_id: PeerId,
    quorum: usize,
    epoch: Epoch,
    started_at: Instant,
    potential_timeout: Duration,
    alive: BTreeSet<PeerId>,
    potential: BTreeSet<PeerId>,
}

impl FollowerPinger {
    /// Both follower sets start out with every peer of the cell, the leader included.
    pub fn new(
        leader_id: PeerId,
        peers: impl IntoIterator<Item = PeerId>,
        quorum: usize,
        epoch: Epoch,
        started_at: Instant,
        potential_timeout: Duration,
    ) -> Self {
        let alive: BTreeSet<PeerId> = peers.into_iter().collect();
        let potential = alive.clone();
        Self {
            leader_id,
            quorum,
            epoch,
            started_at,
            potential_timeout,
            alive,
            potential,
        }
    }

    pub fn alive_followers(&self) -> &BTreeSet<PeerId> {
        &self.alive
    }

    pub fn potential_followers(&self) -> &BTreeSet<PeerId> {
        &self.potential
    }

    pub fn has_quorum(&self) -> bool {
        self.alive.len() >= self.quorum
    }

    pub fn request(&self) -> PingFollower {
        PingFollower {
            leader_id: self.leader_id,
            epoch: self.epoch,
        }
    }

    /// Update the follower sets with the outcome of a ping to `peer` observed at `now`.
    pub fn record(&mut self, peer: PeerId, outcome: &Result<(), RpcError>, now: Instant) -> NextPing {
        let err = match outcome {
            Ok(()) => {
                if self.potential.remove(&peer) {
                    info!("{}; follower {} is up, first success", self.leader_id, peer);
                } else if self.alive.insert(peer) {
                    info!("{}; follower {} is up", self.leader_id, peer);
                }
                return NextPing::Later;
            }
            Err(err) => err,
        };

        if err.is_transport() {
            if self.alive.remove(&peer) {
                warn!(
                    "{}; error pinging follower {}, considered down: {}",
                    self.leader_id, peer, err
                );
            }
            self.potential.remove(&peer);
        } else if !self.potential.contains(&peer) {
            // a rejection after a success means the follower's view has diverged
            if self.alive.remove(&peer) {
                warn!(
                    "{}; follower {} rejected ping, considered down: {}",
                    self.leader_id, peer, err
                );
            }
        } else if now.saturating_duration_since(self.started_at) > self.potential_timeout {
            warn!(
                "{}; follower {} did not accept a ping within {:?}, considered down: {}",
                self.leader_id, peer, self.potential_timeout, err
            );
            self.potential.remove(&peer);
            self.alive.remove(&peer);
        } else {
            info!(
                "{}; follower {} rejected ping, will retry: {}",
                self.leader_id, peer, err
            );
        }

        if *err == RpcError::Timeout {
            NextPing::Now
        } else {
            NextPing::Later
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::PingError;
    use crate::state::State;

    const GRACE: Duration = Duration::from_millis(100);

    fn pinger(start: Instant) -> FollowerPinger {
        FollowerPinger::new(0, 0..3, 2, Epoch::from_raw(1), start, GRACE)
    }

    fn rejected() -> Result<(), RpcError> {
        Err(PingError::InvalidState {
            state: State::Voting,
            leader_id: 0,
            epoch: Epoch::from_raw(1),
        }
        .into())
    }

    #[test]
    fn starts_with_every_peer() {
        let p = pinger(Instant::now());
        assert_eq!(p.alive_followers().len(), 3);
        assert_eq!(p.potential_followers().len(), 3);
        assert!(p.has_quorum());
        assert_eq!(
            p.request(),
            PingFollower {
                leader_id: 0,
                epoch: Epoch::from_raw(1)
            }
        );
    }

    #[test]
    fn success_confirms_potential_follower() {
        let start = Instant::now();
        let mut p = pinger(start);
        assert_eq!(p.record(1, &Ok(()), start), NextPing::Later);
        assert!(!p.potential_followers().contains(&1));
        assert!(p.alive_followers().contains(&1));
    }

    #[test]
    fn transport_error_drops_follower() {
        let start = Instant::now();
        let mut p = pinger(start);
        let next = p.record(1, &Err(RpcError::Unreachable(1)), start);
        assert_eq!(next, NextPing::Later);
        assert!(!p.alive_followers().contains(&1));
        assert!(!p.potential_followers().contains(&1));
        assert!(p.has_quorum());
    }

    #[test]
    fn timeout_is_retried_immediately() {
        let start = Instant::now();
        let mut p = pinger(start);
        assert_eq!(p.record(2, &Err(RpcError::Timeout), start), NextPing::Now);
        assert!(!p.alive_followers().contains(&2));
    }

    #[test]
    fn rejection_tolerated_within_grace_period() {
        let start = Instant::now();
        let mut p = pinger(start);
        assert_eq!(p.record(1, &rejected(), start + GRACE / 2), NextPing::Later);
        assert!(p.alive_followers().contains(&1));
        assert!(p.potential_followers().contains(&1));
    }

    #[test]
    fn rejection_after_grace_period_drops_follower() {
        let start = Instant::now();
        let mut p = pinger(start);
        p.record(1, &rejected(), start + GRACE * 2);
        assert!(!p.alive_followers().contains(&1));
        assert!(!p.potential_followers().contains(&1));
    }

    #[test]
    fn rejection_after_success_drops_follower() {
        let start = Instant::now();
        let mut p = pinger(start);
        p.record(1, &Ok(()), start);
        p.record(1, &rejected(), start);
        assert!(!p.alive_followers().contains(&1));
    }

    #[test]
    fn dropped_follower_comes_back() {
        let start = Instant::now();
        let mut p = pinger(start);
        p.record(1, &Err(RpcError::Timeout), start);
        assert!(!p.alive_followers().contains(&1));
        p.record(1, &Ok(()), start);
        assert!(p.alive_followers().contains(&1));
    }

    #[test]
    fn losing_both_followers_loses_quorum() {
        let start = Instant::now();
        let mut p = pinger(start);
        p.record(1, &Err(RpcError::Timeout), start);
        assert!(p.has_quorum());
        p.record(2, &Err(RpcError::Unreachable(2)), start);
        assert_eq!(p.alive_followers().len(), 1);
        assert!(!p.has_quorum());
    }
}
