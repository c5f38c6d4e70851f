//! In-process transport for running a whole cell inside one actix system.
//!
//! Every peer's stubs go through a single [`Router`] actor that knows each peer's address and
//! can cut peers off from the rest of the cell. Messages to or from an isolated peer are never
//! delivered, so callers observe a timeout just as they would with a partitioned network.

use super::cell::{Peer, PeerStub, StaticCell};
use super::manager::ElectionManager;
use super::rpc::{GetStatus, PingFollower, RpcError, StatusResponse};
use super::PeerId;
use actix::prelude::*;
use futures::future::{self, FutureExt, LocalBoxFuture};
use log::{debug, trace};
use std::collections::{BTreeMap, BTreeSet};

/// A request from one peer to another, passing through the router.
pub struct RoutedMessage<Req> {
    pub from: PeerId,
    pub to: PeerId,
    pub msg: Req,
}

impl<Req: Message> Message for RoutedMessage<Req> {
    type Result = Result<Req::Result, RpcError>;
}

#[derive(Default)]
pub struct Router {
    routes: BTreeMap<PeerId, Addr<ElectionManager>>,
    isolated: BTreeSet<PeerId>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Actor for Router {
    type Context = Context<Self>;
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Register {
    pub id: PeerId,
    pub addr: Addr<ElectionManager>,
}

/// Drop all traffic to and from a peer.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Isolate(pub PeerId);

/// Undo [`Isolate`].
#[derive(Message)]
#[rtype(result = "()")]
pub struct Restore(pub PeerId);

impl Handler<Register> for Router {
    type Result = ();

    fn handle(&mut self, Register { id, addr }: Register, _ctx: &mut Self::Context) {
        self.routes.insert(id, addr);
    }
}

impl Handler<Isolate> for Router {
    type Result = ();

    fn handle(&mut self, Isolate(id): Isolate, _ctx: &mut Self::Context) {
        debug!("R; isolating peer {}", id);
        self.isolated.insert(id);
    }
}

impl Handler<Restore> for Router {
    type Result = ();

    fn handle(&mut self, Restore(id): Restore, _ctx: &mut Self::Context) {
        debug!("R; restoring peer {}", id);
        self.isolated.remove(&id);
    }
}

/// The router forwards any request an election manager can handle.
impl<Req> Handler<RoutedMessage<Req>> for Router
where
    Req: Message + Send + 'static,
    Req::Result: Send,
    ElectionManager: Handler<Req>,
{
    type Result = ResponseFuture<Result<Req::Result, RpcError>>;

    fn handle(
        &mut self,
        RoutedMessage { from, to, msg }: RoutedMessage<Req>,
        _ctx: &mut Self::Context,
    ) -> Self::Result {
        if self.isolated.contains(&from) || self.isolated.contains(&to) {
            trace!("R; dropping {} -> {}", from, to);
            return Box::pin(future::pending::<Result<Req::Result, RpcError>>());
        }
        let request = match self.routes.get(&to) {
            Some(addr) => addr.send(msg),
            None => {
                return Box::pin(future::ready(Err::<Req::Result, _>(RpcError::Unreachable(
                    to,
                ))))
            }
        };
        trace!("R; {} -> {}", from, to);
        Box::pin(async move { request.await.map_err(|_| RpcError::Unreachable(to)) })
    }
}

/// Stub used by peer `from` to reach peer `to` through the router.
pub struct RouterStub {
    router: Addr<Router>,
    from: PeerId,
    to: PeerId,
}

impl RouterStub {
    pub fn new(router: Addr<Router>, from: PeerId, to: PeerId) -> Self {
        Self { router, from, to }
    }
}

impl PeerStub for RouterStub {
    fn get_status(&self) -> LocalBoxFuture<'static, Result<StatusResponse, RpcError>> {
        let to = self.to;
        let request = self.router.send(RoutedMessage {
            from: self.from,
            to,
            msg: GetStatus,
        });
        async move {
            match request.await {
                Ok(res) => res,
                Err(_) => Err(RpcError::Unreachable(to)),
            }
        }
        .boxed_local()
    }

    fn ping_follower(&self, req: PingFollower) -> LocalBoxFuture<'static, Result<(), RpcError>> {
        let to = self.to;
        let request = self.router.send(RoutedMessage {
            from: self.from,
            to,
            msg: req,
        });
        async move {
            match request.await {
                Ok(Ok(res)) => res.map_err(RpcError::from),
                Ok(Err(err)) => Err(err),
                Err(_) => Err(RpcError::Unreachable(to)),
            }
        }
        .boxed_local()
    }
}

/// Cell of `size` peers as seen by `self_id`, with every peer reached through `router`.
pub fn cell(router: &Addr<Router>, self_id: PeerId, size: PeerId) -> StaticCell {
    let peers = (0..size)
        .map(|to| Peer {
            address: format!("local:{}", to),
            stub: Box::new(RouterStub::new(router.clone(), self_id, to)),
        })
        .collect();
    StaticCell::new(self_id, peers)
}
