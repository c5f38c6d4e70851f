//! Peers talk to each other through two RPCs. GetStatus is issued by voting rounds to learn every
//! peer's current vote; PingFollower is issued by a leader to each follower to keep its
//! leadership alive. Both are served by every peer's election manager.

use super::state::{Epoch, State, Status};
use super::{PeerId, Priority};
use actix::Message;
use core::future::Future;
use core::time::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Invoked by voting rounds to collect a peer's vote; read only and always succeeds.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Message)]
#[rtype(result = "StatusResponse")]
pub struct GetStatus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    /// responder's election state
    pub state: State,
    /// candidate the responder votes for
    pub vote_id: Option<PeerId>,
    /// responder's priority
    pub priority: Priority,
    /// epoch of the responder's vote
    pub vote_epoch: Option<Epoch>,
    /// responder's id, as it sees itself
    pub self_id: PeerId,
    /// responder's view of the cell, indexed by peer id
    pub peer_addresses: Vec<String>,
}

impl StatusResponse {
    pub fn status(&self) -> Status {
        Status {
            state: self.state,
            vote_id: self.vote_id,
            priority: self.priority,
            vote_epoch: self.vote_epoch,
        }
    }
}

/// Invoked by a leader on each follower, periodically, for as long as it leads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Message)]
#[rtype(result = "Result<(), PingError>")]
pub struct PingFollower {
    /// the pinging leader
    pub leader_id: PeerId,
    /// epoch the leader leads
    pub epoch: Epoch,
}

/// Rejections of a ping by the follower. They signal that leader and follower disagree about
/// the current epoch and are never transport faults.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum PingError {
    #[error("ping from leader {leader_id} (epoch {epoch}) while in state {state}")]
    InvalidState {
        state: State,
        leader_id: PeerId,
        epoch: Epoch,
    },
    #[error("ping from an invalid leader: expected {expected}, got {actual}")]
    InvalidLeader { expected: PeerId, actual: PeerId },
    #[error("ping with invalid epoch: expected {expected}, got {actual}")]
    InvalidEpoch { expected: Epoch, actual: Epoch },
}

/// Outcome of a failed call to a peer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    #[error("request timed out")]
    Timeout,
    #[error("peer {0} is unreachable")]
    Unreachable(PeerId),
    #[error(transparent)]
    Ping(#[from] PingError),
}

impl RpcError {
    /// Transport level failure: the peer is presumed unreachable.
    pub fn is_transport(&self) -> bool {
        !matches!(self, RpcError::Ping(_))
    }
}

/// Bounds a call by `timeout`, reporting an elapsed call as [`RpcError::Timeout`].
pub async fn with_timeout<T, F>(timeout: Duration, call: F) -> Result<T, RpcError>
where
    F: Future<Output = Result<T, RpcError>>,
{
    tokio::time::timeout(timeout, call)
        .await
        .unwrap_or(Err(RpcError::Timeout))
}


#[cfg(test)]
mod test_timeout {
    use super::*;
    use futures::future;

    #[actix_rt::test]
    async fn elapsed_call_is_a_timeout() {
        let res: Result<(), RpcError> =
            with_timeout(Duration::from_millis(10), future::pending()).await;
        assert_eq!(res, Err(RpcError::Timeout));
    }

    #[actix_rt::test]
    async fn completed_call_passes_through() {
        let res = with_timeout(Duration::from_millis(10), future::ready(Ok(4))).await;
        assert_eq!(res, Ok(4));
    }
}
