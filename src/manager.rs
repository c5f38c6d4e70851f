//! The election manager actor.
//!
//! The actor's context is the control thread: every state change happens inside one of its
//! handlers or inside a continuation spawned into its context. `Start`, `Stop` and `Restart` as
//! well as the two RPCs arrive as messages, so any thread holding an `Addr` may call them.

use super::callbacks::ElectionCallbacks;
use super::cell::CellManager;
use super::config::ElectionConfig;
use super::epoch::{guarded, EpochScope};
use super::follower_pinger::{FollowerPinger, NextPing};
use super::rpc::{self, GetStatus, PingError, PingFollower, RpcError, StatusResponse};
use super::state::{Epoch, State, Status};
use super::voting_round::{RoundOutcome, VotingRound};
use super::PeerId;
use actix::prelude::*;
use futures::future::join_all;
use log::{debug, info, trace, warn};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Begin voting; does nothing unless stopped.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Start;

/// Leave whatever role is active and stop.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Stop;

/// `Stop` followed by `Start`.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Restart;

/// Monitoring view of the manager.
#[derive(Message)]
#[rtype(result = "ElectionInfo")]
pub struct GetElectionInfo;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElectionInfo {
    pub self_id: PeerId,
    pub state: State,
    pub vote_id: Option<PeerId>,
    pub vote_epoch: Option<Epoch>,
    /// leader of the current epoch, while leading or following
    pub leader_id: Option<PeerId>,
    pub epoch: Option<Epoch>,
    /// time since the current epoch started
    pub epoch_age: Option<Duration>,
    /// empty unless leading
    pub alive_followers: Vec<PeerId>,
    /// empty unless leading
    pub potential_followers: Vec<PeerId>,
}

pub struct ElectionManager {
    config: ElectionConfig,
    cell: Box<dyn CellManager>,
    callbacks: Box<dyn ElectionCallbacks>,

    state: State,
    vote_id: Option<PeerId>,
    vote_epoch: Option<Epoch>,
    leader_id: Option<PeerId>,
    epoch: Option<Epoch>,
    epoch_start: Option<Instant>,

    /// Opened by a self vote, cancelled by `reset`.
    scope: Option<EpochScope>,
    voting_round: Option<(VotingRound, CancellationToken)>,
    follower_pinger: Option<(FollowerPinger, CancellationToken)>,
    /// Watchdog for pings from the leader.
    ping_timeout: Option<SpawnHandle>,
}

impl ElectionManager {
    /// The manager must be started inside a running actix system; it stays `Stopped` until it
    /// receives `Start`.
    pub fn new(
        config: ElectionConfig,
        cell: Box<dyn CellManager>,
        callbacks: Box<dyn ElectionCallbacks>,
    ) -> Self {
        Self {
            config,
            cell,
            callbacks,
            state: State::Stopped,
            vote_id: None,
            vote_epoch: None,
            leader_id: None,
            epoch: None,
            epoch_start: None,
            scope: None,
            voting_round: None,
            follower_pinger: None,
            ping_timeout: None,
        }
    }

    fn self_id(&self) -> PeerId {
        self.cell.self_id()
    }

    fn status(&self) -> Status {
        Status {
            state: self.state,
            vote_id: self.vote_id,
            priority: self.callbacks.priority(),
            vote_epoch: self.vote_epoch,
        }
    }

    fn scope_token(&self) -> CancellationToken {
        self.scope
            .as_ref()
            .expect("an active role runs inside an epoch scope")
            .token()
    }

    fn do_start(&mut self, ctx: &mut Context<Self>) {
        if self.state != State::Stopped {
            debug!("{}; already started ({})", self.self_id(), self.state);
            return;
        }
        self.start_vote_for_self(ctx);
    }

    fn do_stop(&mut self, ctx: &mut Context<Self>) {
        match self.state {
            State::Stopped => {}
            State::Voting => {
                info!("{}; stopping voting", self.self_id());
                self.reset(ctx);
            }
            State::Leading => self.stop_leading(ctx),
            State::Following => self.stop_following(ctx),
        }
    }

    /// Forget the vote and the epoch and cancel everything scheduled inside the epoch scope.
    fn reset(&mut self, ctx: &mut Context<Self>) {
        self.state = State::Stopped;
        self.vote_id = None;
        self.vote_epoch = None;
        self.leader_id = None;
        self.epoch = None;
        self.epoch_start = None;
        if let Some(scope) = self.scope.take() {
            trace!("{}; closing epoch scope {}", self.self_id(), scope.epoch());
            scope.cancel();
        }
        self.voting_round = None;
        self.follower_pinger = None;
        if let Some(handle) = self.ping_timeout.take() {
            ctx.cancel_future(handle);
        }
    }

    fn start_vote_for_self(&mut self, ctx: &mut Context<Self>) {
        assert!(
            self.scope.is_none(),
            "Voting for self must open a fresh epoch scope"
        );
        let self_id = self.self_id();
        let epoch = Epoch::random();
        self.state = State::Voting;
        self.vote_id = Some(self_id);
        self.vote_epoch = Some(epoch);
        self.scope = Some(EpochScope::new(epoch));

        let priority = self.callbacks.priority();
        debug!(
            "{}; voting for self (priority {}, epoch {})",
            self_id,
            self.callbacks.format_priority(priority),
            epoch
        );
        self.start_voting_round(ctx);
    }

    fn start_vote_for(&mut self, vote_id: PeerId, vote_epoch: Epoch, ctx: &mut Context<Self>) {
        self.state = State::Voting;
        self.vote_id = Some(vote_id);
        self.vote_epoch = Some(vote_epoch);

        let delay = self.config.revote_delay();
        if delay == Duration::from_millis(0) {
            self.start_voting_round(ctx);
            return;
        }
        let token = self.scope_token();
        ctx.run_later(delay, move |act, ctx| {
            if !token.is_cancelled() {
                act.start_voting_round(ctx);
            }
        });
    }

    /// Ask every other peer for its status; the round is decided once all calls have resolved.
    fn start_voting_round(&mut self, ctx: &mut Context<Self>) {
        assert_eq!(
            self.state,
            State::Voting,
            "A voting round can only start while voting"
        );
        let token = self
            .scope
            .as_ref()
            .expect("voting runs inside an epoch scope")
            .child();
        if let Some((_, previous)) = self.voting_round.take() {
            previous.cancel();
        }

        let self_id = self.self_id();
        let local = self.status();
        debug!(
            "{}; new voting round (vote {}, priority {}, epoch {})",
            self_id,
            fmt_vote(local.vote_id),
            self.callbacks.format_priority(local.priority),
            fmt_epoch(local.vote_epoch)
        );
        let round = VotingRound::new(self_id, self.cell.quorum(), local);

        let rpc_timeout = self.config.rpc_timeout();
        let calls: Vec<_> = self
            .cell
            .other_peer_ids()
            .into_iter()
            .map(|id| {
                let call = self.cell.peer_stub(id).get_status();
                async move { (id, rpc::with_timeout(rpc_timeout, call).await) }
            })
            .collect();
        self.voting_round = Some((round, token.clone()));

        ctx.spawn(
            fut::wrap_future(guarded(token, join_all(calls))).map(
                |responses, act: &mut Self, ctx: &mut Context<Self>| {
                    if let Some(responses) = responses {
                        act.complete_voting_round(responses, ctx);
                    }
                },
            ),
        );
    }

    fn complete_voting_round(
        &mut self,
        responses: Vec<(PeerId, Result<StatusResponse, RpcError>)>,
        ctx: &mut Context<Self>,
    ) {
        let self_id = self.self_id();
        let (mut round, token) = self
            .voting_round
            .take()
            .expect("a completing voting round is the current one");
        token.cancel();

        for (id, response) in responses {
            match response {
                Ok(res) => {
                    debug!(
                        "{}; status from peer {} ({}, vote {}, priority {}, epoch {})",
                        self_id,
                        id,
                        res.state,
                        fmt_vote(res.vote_id),
                        self.callbacks.format_priority(res.priority),
                        fmt_epoch(res.vote_epoch)
                    );
                    round.record(id, res.status());
                }
                Err(err) => {
                    info!(
                        "{}; error requesting status from peer {}: {}",
                        self_id, id, err
                    );
                }
            }
        }

        match round.conclude() {
            RoundOutcome::Lead => self.start_leading(ctx),
            RoundOutcome::Follow { leader_id, epoch } => {
                self.start_following(leader_id, epoch, ctx)
            }
            RoundOutcome::VoteFor { candidate, epoch } => {
                self.start_vote_for(candidate, epoch, ctx)
            }
            RoundOutcome::VoteForSelf => {
                info!(
                    "{}; candidate {} is gone, voting for self",
                    self_id,
                    fmt_vote(self.vote_id)
                );
                if let Some(scope) = self.scope.take() {
                    scope.cancel();
                }
                self.start_vote_for_self(ctx);
            }
        }
    }

    fn start_epoch(&mut self, leader_id: PeerId, epoch: Epoch) -> Instant {
        let now = Instant::now();
        self.leader_id = Some(leader_id);
        self.epoch = Some(epoch);
        self.epoch_start = Some(now);
        now
    }

    fn stop_epoch(&mut self) {
        self.leader_id = None;
        self.epoch = None;
        self.epoch_start = None;
    }

    fn start_leading(&mut self, ctx: &mut Context<Self>) {
        let self_id = self.self_id();
        assert_eq!(
            self.vote_id,
            Some(self_id),
            "Only a peer voting for itself can lead"
        );
        self.state = State::Leading;
        let epoch = self.vote_epoch.expect("a vote carries an epoch");
        let started_at = self.start_epoch(self_id, epoch);

        assert!(
            self.follower_pinger.is_none(),
            "A new leadership starts without a follower pinger"
        );
        let token = self
            .scope
            .as_ref()
            .expect("leading runs inside an epoch scope")
            .child();
        let pinger = FollowerPinger::new(
            self_id,
            self.cell.peer_ids(),
            self.cell.quorum(),
            epoch,
            started_at,
            self.config.potential_follower_timeout(),
        );
        self.follower_pinger = Some((pinger, token));
        for id in self.cell.other_peer_ids() {
            self.send_ping(id, ctx);
        }

        info!("{}; starting leading (epoch {})", self_id, epoch);
        self.callbacks.on_start_leading(epoch);
    }

    fn stop_leading(&mut self, ctx: &mut Context<Self>) {
        assert_eq!(self.state, State::Leading, "Only a leader can stop leading");
        info!(
            "{}; stopping leading (epoch {})",
            self.self_id(),
            fmt_epoch(self.epoch)
        );
        self.callbacks.on_stop_leading();

        let (_, token) = self
            .follower_pinger
            .take()
            .expect("a leader owns a follower pinger");
        token.cancel();

        self.stop_epoch();
        self.reset(ctx);
    }

    fn start_following(&mut self, leader_id: PeerId, epoch: Epoch, ctx: &mut Context<Self>) {
        self.state = State::Following;
        self.vote_id = Some(leader_id);
        self.vote_epoch = Some(epoch);
        self.start_epoch(leader_id, epoch);

        self.arm_ping_timeout(self.config.ready_to_follow_timeout(), ctx);

        info!(
            "{}; starting following (leader {}, epoch {})",
            self.self_id(),
            leader_id,
            epoch
        );
        self.callbacks.on_start_following(leader_id, epoch);
    }

    fn stop_following(&mut self, ctx: &mut Context<Self>) {
        assert_eq!(
            self.state,
            State::Following,
            "Only a follower can stop following"
        );
        info!(
            "{}; stopping following (leader {}, epoch {})",
            self.self_id(),
            fmt_vote(self.leader_id),
            fmt_epoch(self.epoch)
        );
        self.callbacks.on_stop_following();

        self.stop_epoch();
        self.reset(ctx);
    }

    /// Replace the leader ping watchdog; at most one is ever pending.
    fn arm_ping_timeout(&mut self, timeout: Duration, ctx: &mut Context<Self>) {
        if let Some(handle) = self.ping_timeout.take() {
            ctx.cancel_future(handle);
        }
        let token = self.scope_token();
        let handle = ctx.run_later(timeout, move |act, ctx| {
            if token.is_cancelled() {
                return;
            }
            act.ping_timeout = None;
            act.on_leader_ping_timeout(ctx);
        });
        self.ping_timeout = Some(handle);
    }

    fn on_leader_ping_timeout(&mut self, ctx: &mut Context<Self>) {
        assert_eq!(
            self.state,
            State::Following,
            "The ping watchdog only runs while following"
        );
        info!("{}; no ping from the leader within timeout", self.self_id());
        self.stop_following(ctx);
        self.start_vote_for_self(ctx);
    }

    fn send_ping(&mut self, id: PeerId, ctx: &mut Context<Self>) {
        let (req, token) = match &self.follower_pinger {
            Some((pinger, token)) if !token.is_cancelled() => (pinger.request(), token.clone()),
            _ => return,
        };
        trace!("{}; pinging follower {}", self.self_id(), id);
        let call = self.cell.peer_stub(id).ping_follower(req);
        let call = rpc::with_timeout(self.config.rpc_timeout(), call);
        ctx.spawn(fut::wrap_future(guarded(token, call)).map(
            move |outcome, act: &mut Self, ctx: &mut Context<Self>| {
                if let Some(outcome) = outcome {
                    act.on_ping_response(id, outcome, ctx);
                }
            },
        ));
    }

    fn schedule_ping(&mut self, id: PeerId, ctx: &mut Context<Self>) {
        let token = match &self.follower_pinger {
            Some((_, token)) => token.clone(),
            None => return,
        };
        ctx.run_later(self.config.follower_ping_interval(), move |act, ctx| {
            if !token.is_cancelled() {
                act.send_ping(id, ctx);
            }
        });
    }

    fn on_ping_response(
        &mut self,
        id: PeerId,
        outcome: Result<(), RpcError>,
        ctx: &mut Context<Self>,
    ) {
        assert_eq!(
            self.state,
            State::Leading,
            "Ping responses are only handled while leading"
        );
        let self_id = self.self_id();
        if outcome.is_ok() {
            trace!("{}; ping reply from follower {}", self_id, id);
        }
        let (next, has_quorum) = {
            let (pinger, _) = self
                .follower_pinger
                .as_mut()
                .expect("a leader owns a follower pinger");
            let next = pinger.record(id, &outcome, Instant::now());
            (next, pinger.has_quorum())
        };

        if !has_quorum {
            warn!(
                "{}; quorum is lost (epoch {})",
                self_id,
                fmt_epoch(self.epoch)
            );
            self.stop_leading(ctx);
            self.start_vote_for_self(ctx);
            return;
        }

        match next {
            NextPing::Now => self.send_ping(id, ctx),
            NextPing::Later => self.schedule_ping(id, ctx),
        }
    }
}

fn fmt_vote(vote: Option<PeerId>) -> String {
    vote.map_or_else(|| "-".to_string(), |id| id.to_string())
}

fn fmt_epoch(epoch: Option<Epoch>) -> String {
    epoch.map_or_else(|| "-".to_string(), |epoch| epoch.to_string())
}

impl Actor for ElectionManager {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Self::Context) {
        debug!(
            "{}; election manager up in a cell of {} (quorum {})",
            self.self_id(),
            self.cell.peer_count(),
            self.cell.quorum()
        );
    }
}

impl Handler<Start> for ElectionManager {
    type Result = ();

    fn handle(&mut self, _: Start, ctx: &mut Self::Context) -> Self::Result {
        self.do_start(ctx);
    }
}

impl Handler<Stop> for ElectionManager {
    type Result = ();

    fn handle(&mut self, _: Stop, ctx: &mut Self::Context) -> Self::Result {
        self.do_stop(ctx);
    }
}

impl Handler<Restart> for ElectionManager {
    type Result = ();

    fn handle(&mut self, _: Restart, ctx: &mut Self::Context) -> Self::Result {
        self.do_stop(ctx);
        self.do_start(ctx);
    }
}

impl Handler<GetStatus> for ElectionManager {
    type Result = MessageResult<GetStatus>;

    fn handle(&mut self, _: GetStatus, _ctx: &mut Self::Context) -> Self::Result {
        let status = self.status();
        trace!(
            "{}; reporting status ({}, vote {}, epoch {})",
            self.self_id(),
            status.state,
            fmt_vote(status.vote_id),
            fmt_epoch(status.vote_epoch)
        );
        MessageResult(StatusResponse {
            state: status.state,
            vote_id: status.vote_id,
            priority: status.priority,
            vote_epoch: status.vote_epoch,
            self_id: self.self_id(),
            peer_addresses: self
                .cell
                .peer_ids()
                .map(|id| self.cell.peer_address(id))
                .collect(),
        })
    }
}

impl Handler<PingFollower> for ElectionManager {
    type Result = Result<(), PingError>;

    fn handle(&mut self, req: PingFollower, ctx: &mut Self::Context) -> Self::Result {
        trace!(
            "{}; ping from leader {} (epoch {})",
            self.self_id(),
            req.leader_id,
            req.epoch
        );
        if self.state != State::Following {
            return Err(PingError::InvalidState {
                state: self.state,
                leader_id: req.leader_id,
                epoch: req.epoch,
            });
        }
        let leader_id = self.leader_id.expect("a follower knows its leader");
        if req.leader_id != leader_id {
            return Err(PingError::InvalidLeader {
                expected: leader_id,
                actual: req.leader_id,
            });
        }
        let epoch = self.epoch.expect("a follower knows its epoch");
        if req.epoch != epoch {
            return Err(PingError::InvalidEpoch {
                expected: epoch,
                actual: req.epoch,
            });
        }

        self.arm_ping_timeout(self.config.follower_ping_timeout(), ctx);
        Ok(())
    }
}

impl Handler<GetElectionInfo> for ElectionManager {
    type Result = MessageResult<GetElectionInfo>;

    fn handle(&mut self, _: GetElectionInfo, _ctx: &mut Self::Context) -> Self::Result {
        let (alive_followers, potential_followers) = match &self.follower_pinger {
            Some((pinger, _)) => (
                pinger.alive_followers().iter().copied().collect(),
                pinger.potential_followers().iter().copied().collect(),
            ),
            None => (vec![], vec![]),
        };
        MessageResult(ElectionInfo {
            self_id: self.self_id(),
            state: self.state,
            vote_id: self.vote_id,
            vote_epoch: self.vote_epoch,
            leader_id: self.leader_id,
            epoch: self.epoch,
            epoch_age: self.epoch_start.map(|start| start.elapsed()),
            alive_followers,
            potential_followers,
        })
    }
}
