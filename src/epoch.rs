//! Epoch-scoped cancellation.
//!
//! A scope opens when a peer votes for itself and is cancelled when the role it led to ends.
//! Work scheduled from inside the scope (round RPCs, follower pings, watchdogs) holds a child
//! token and turns into a no-op once the scope or the child is cancelled.

use crate::Epoch;
use core::future::Future;
use tokio_util::sync::CancellationToken;

pub(crate) struct EpochScope {
    epoch: Epoch,
    token: CancellationToken,
}

impl EpochScope {
    pub fn new(epoch: Epoch) -> Self {
        Self {
            epoch,
            token: CancellationToken::new(),
        }
    }

    /// Epoch minted by the self vote that opened this scope.
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Token cancelled together with the scope.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Token that can be cancelled on its own and is also cancelled with the scope.
    pub fn child(&self) -> CancellationToken {
        self.token.child_token()
    }

    pub fn cancel(self) {
        self.token.cancel();
    }
}

/// Runs `future` unless `token` is cancelled first, in which case the output is dropped.
pub(crate) fn guarded<F: Future>(
    token: CancellationToken,
    future: F,
) -> impl Future<Output = Option<F::Output>> {
    async move {
        tokio::select! {
            biased;
            _ = token.cancelled() => None,
            output = future => Some(output),
        }
    }
}
