//! Decentralized leader election for a fixed cell of peers.
//!
//! Every peer runs an [`ElectionManager`](manager::ElectionManager). Peers poll each other's
//! status in voting rounds until one candidate collects a quorum of votes for the same epoch,
//! that candidate leads and pings its followers, and the followers watch for those pings. Any
//! detected failure ends the epoch and the peer votes for itself again.

/// Stable index of a peer in the cell's membership list.
pub type PeerId = u16;
/// Tie-break key supplied by the callback host; higher wins.
pub type Priority = i64;

pub mod callbacks;
pub mod cell;
pub mod config;
pub mod dev;
mod epoch;
pub mod follower_pinger;
pub mod manager;
pub mod rpc;
pub mod state;
pub mod voting_round;

pub use callbacks::ElectionCallbacks;
pub use cell::{CellManager, PeerStub, StaticCell};
pub use config::ElectionConfig;
pub use manager::ElectionManager;
pub use state::{Epoch, State, Status};
