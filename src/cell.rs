//! Cell membership: who the peers are and how to reach them.

use super::rpc::{PingFollower, RpcError, StatusResponse};
use super::PeerId;
use core::ops::Range;
use futures::future::LocalBoxFuture;

/// Client side of the two election RPCs for one peer.
///
/// Calls only report transport failures and application rejections; deadlines are applied by
/// the caller.
pub trait PeerStub {
    fn get_status(&self) -> LocalBoxFuture<'static, Result<StatusResponse, RpcError>>;
    fn ping_follower(&self, req: PingFollower) -> LocalBoxFuture<'static, Result<(), RpcError>>;
}

/// A fixed, ordered cell of peers, static for the lifetime of a manager.
pub trait CellManager {
    fn self_id(&self) -> PeerId;
    fn peer_count(&self) -> PeerId;
    /// Minimum number of matching votes to elect a candidate.
    fn quorum(&self) -> usize;
    fn peer_address(&self, id: PeerId) -> String;
    /// # Panics
    /// If `id` is not a member of the cell
    fn peer_stub(&self, id: PeerId) -> &dyn PeerStub;

    fn peer_ids(&self) -> Range<PeerId> {
        0..self.peer_count()
    }

    /// Every peer except self.
    fn other_peer_ids(&self) -> Vec<PeerId> {
        let self_id = self.self_id();
        self.peer_ids().filter(|&id| id != self_id).collect()
    }
}

pub struct Peer {
    pub address: String,
    pub stub: Box<dyn PeerStub>,
}

/// Cell built from a fixed peer list, using a simple majority as quorum.
pub struct StaticCell {
    self_id: PeerId,
    peers: Vec<Peer>,
}

impl StaticCell {
    /// # Panics
    /// If `self_id` does not index into `peers`
    pub fn new(self_id: PeerId, peers: Vec<Peer>) -> Self {
        assert!(
            (self_id as usize) < peers.len(),
            "Self id {} is outside of a cell of {} peers",
            self_id,
            peers.len()
        );
        Self { self_id, peers }
    }
}

impl CellManager for StaticCell {
    fn self_id(&self) -> PeerId {
        self.self_id
    }

    fn peer_count(&self) -> PeerId {
        self.peers.len() as PeerId
    }

    fn quorum(&self) -> usize {
        self.peers.len() / 2 + 1
    }

    fn peer_address(&self, id: PeerId) -> String {
        self.peers[id as usize].address.clone()
    }

    fn peer_stub(&self, id: PeerId) -> &dyn PeerStub {
        self.peers[id as usize].stub.as_ref()
    }
}
