use super::{PeerId, Priority};
use core::fmt;
use serde::{Deserialize, Serialize};

/// Election states of a peer. Exactly one holds at any instant and every transition happens on
/// the manager's control thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum State {
    /// Not taking part in elections. Reports no vote.
    Stopped,
    /// Collecting statuses from the cell until some candidate has a quorum.
    Voting,
    /// Won a round; pings followers and steps down on quorum loss.
    Leading,
    /// Recognises a leader and expects its pings.
    Following,
}

impl Default for State {
    fn default() -> Self {
        Self::Stopped
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Stopped => "Stopped",
            State::Voting => "Voting",
            State::Leading => "Leading",
            State::Following => "Following",
        };
        f.write_str(name)
    }
}

/// Identifies a leadership term. A fresh one is minted each time a peer votes for itself, a peer
/// voting for or following another candidate copies that candidate's epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Epoch(u128);

impl Epoch {
    pub fn random() -> Self {
        Epoch(random_number::rand::random())
    }

    pub fn from_raw(raw: u128) -> Self {
        Epoch(raw)
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// A peer's self report, valid only for the instant it was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub state: State,
    /// candidate this peer currently votes for, `None` while stopped
    pub vote_id: Option<PeerId>,
    /// the reporting peer's own priority
    pub priority: Priority,
    /// epoch of the vote, `None` while stopped
    pub vote_epoch: Option<Epoch>,
}

impl Status {
    pub fn new(state: State, vote_id: PeerId, priority: Priority, vote_epoch: Epoch) -> Self {
        Self {
            state,
            vote_id: Some(vote_id),
            priority,
            vote_epoch: Some(vote_epoch),
        }
    }

    pub fn stopped(priority: Priority) -> Self {
        Self {
            state: State::Stopped,
            vote_id: None,
            priority,
            vote_epoch: None,
        }
    }

    /// Whether this report is a vote for `candidate` in `epoch`.
    pub fn votes_for(&self, candidate: PeerId, epoch: Epoch) -> bool {
        self.vote_id == Some(candidate) && self.vote_epoch == Some(epoch)
    }
}
