//! Per-room state machine actor (spec §4.5).
//!
//! Generalises the teacher's `room::actor::Room` (a `players: Vec<Option<PlayerInRoom>>`
//! actor with an `id_map` index, driven entirely through `Handler` impls) to
//! the full Selecting → WaitingForReady → Playing → Results lifecycle. The
//! teacher's matchmaking-pool concept (`free`/`reserved`/`open`) has no
//! counterpart here — matchmaking is an explicit spec Non-goal — so rooms
//! are purely id-addressed and created on demand by the Room Registry.

use std::collections::{HashSet, VecDeque};
use std::time::Instant;

use actix::prelude::*;

use super::{
    ChartDescriptor, ChatEvent, MemberSnapshot, RankedResult, ResultsSnapshot, RoomId,
    RoomRegistry, RoomSnapshot, RoomState, ScoreRecord, UserJoinedRoom, UserLeftRoom,
    CHAT_BUFFER_BOUND,
};
use crate::error::RoomError;
use crate::identity::{User, UserId};
use crate::observer::{ObserverHub, RoomsChanged};
use crate::session::actor::{KickedFromRoom, Session};

#[derive(Debug, Clone, Copy)]
enum ScoreOutcome {
    Submitted(ScoreRecord),
    Aborted,
}

struct Member {
    user: User,
    addr: Option<Addr<Session>>,
    ready: bool,
    outcome: Option<(ScoreOutcome, Instant)>,
    joined_seq: u64,
}

impl Member {
    fn connected(&self) -> bool {
        self.addr.is_some()
    }

    fn last_score(&self) -> Option<ScoreRecord> {
        match self.outcome {
            Some((ScoreOutcome::Submitted(record), _)) => Some(record),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum LeaveReason {
    Voluntary,
    Disconnected,
    Kicked,
    Banned,
}

pub struct Room {
    id: RoomId,
    name: String,
    host: UserId,
    members: Vec<Member>,
    capacity: u8,
    locked: bool,
    cycle_mode: bool,
    blacklist: HashSet<UserId>,
    whitelist: HashSet<UserId>,
    chat: VecDeque<ChatEvent>,
    state: RoomState,
    chart: Option<ChartDescriptor>,
    last_game_chart: Option<ChartDescriptor>,
    next_join_seq: u64,
    registry: Addr<RoomRegistry>,
    observer_hub: Addr<ObserverHub>,
    reconnect_grace_secs: u64,
    pending_removal: std::collections::HashMap<UserId, SpawnHandle>,
}

impl Room {
    pub fn new(
        id: RoomId,
        name: String,
        host: User,
        host_addr: Addr<Session>,
        capacity: u8,
        registry: Addr<RoomRegistry>,
        observer_hub: Addr<ObserverHub>,
    ) -> Self {
        let host_id = host.id;
        let mut chat = VecDeque::with_capacity(CHAT_BUFFER_BOUND);
        chat.push_back(ChatEvent::CreateRoom { user_id: host_id });
        Self {
            id,
            name,
            host: host_id,
            members: vec![Member {
                user: host,
                addr: Some(host_addr),
                ready: false,
                outcome: None,
                joined_seq: 0,
            }],
            capacity: capacity.max(1),
            locked: false,
            cycle_mode: false,
            blacklist: HashSet::new(),
            whitelist: HashSet::new(),
            chat,
            state: RoomState::Selecting,
            chart: None,
            last_game_chart: None,
            next_join_seq: 1,
            registry,
            observer_hub,
            reconnect_grace_secs: 15,
            pending_removal: std::collections::HashMap::new(),
        }
    }

    pub fn with_reconnect_grace(mut self, secs: u64) -> Self {
        self.reconnect_grace_secs = secs;
        self
    }

    fn push_chat(&mut self, event: ChatEvent) {
        if self.chat.len() >= CHAT_BUFFER_BOUND {
            self.chat.pop_front();
        }
        self.chat.push_back(event);
    }

    fn member_idx(&self, user_id: UserId) -> Option<usize> {
        self.members.iter().position(|m| m.user.id == user_id)
    }

    fn broadcast(&self, msg: crate::codec::ServerMessage) {
        for member in &self.members {
            if let Some(addr) = &member.addr {
                addr.do_send(crate::session::actor::Deliver(msg.clone()));
            }
        }
    }

    fn unicast(&self, user_id: UserId, msg: crate::codec::ServerMessage) {
        if let Some(member) = self.members.iter().find(|m| m.user.id == user_id) {
            if let Some(addr) = &member.addr {
                addr.do_send(crate::session::actor::Deliver(msg));
            }
        }
    }

    fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            host: self.host,
            members: self
                .members
                .iter()
                .map(|m| MemberSnapshot {
                    user: m.user.clone(),
                    ready: m.ready,
                    connected: m.connected(),
                    last_score: m.last_score(),
                })
                .collect(),
            capacity: self.capacity,
            locked: self.locked,
            cycle_mode: self.cycle_mode,
            state: self.state,
            chart: self.chart.clone(),
            last_game_chart: self.last_game_chart.clone(),
            chat: self.chat.iter().cloned().collect(),
        }
    }

    fn broadcast_room_state(&self) {
        self.broadcast(crate::codec::ServerMessage::RoomStateUpdate(self.snapshot()));
        self.observer_hub.do_send(RoomsChanged);
    }

    fn non_host_quorum_met(&self) -> bool {
        // Open Question resolution (spec §9 / SPEC_FULL §4.5): the host is
        // a member like any other and must explicitly ready up too.
        !self.members.is_empty() && self.members.iter().all(|m| m.ready)
    }

    fn clear_ready_flags(&mut self) {
        for m in &mut self.members {
            m.ready = false;
        }
    }

    fn transition_to_playing(&mut self, ctx: &mut Context<Self>) {
        self.state = RoomState::Playing;
        for m in &mut self.members {
            m.outcome = None;
        }
        self.push_chat(ChatEvent::StartPlaying);
        self.broadcast(crate::codec::ServerMessage::StartPlaying);
        self.broadcast_room_state();
        let _ = ctx;
    }

    fn all_submitted_or_aborted(&self) -> bool {
        !self.members.is_empty() && self.members.iter().all(|m| m.outcome.is_some())
    }

    fn transition_to_results(&mut self, ctx: &mut Context<Self>) {
        self.state = RoomState::Results;
        self.push_chat(ChatEvent::GameEnd);
        let mut ranking: Vec<RankedResult> = self
            .members
            .iter()
            .map(|m| {
                let (aborted, score) = match m.outcome {
                    Some((ScoreOutcome::Submitted(record), _)) => (false, Some(record)),
                    Some((ScoreOutcome::Aborted, _)) => (true, None),
                    None => (true, None),
                };
                RankedResult {
                    user_id: m.user.id,
                    score,
                    aborted,
                }
            })
            .collect();
        let submitted_at = |user_id: UserId| -> Option<Instant> {
            self.members
                .iter()
                .find(|m| m.user.id == user_id)
                .and_then(|m| m.outcome.map(|(_, at)| at))
        };
        ranking.sort_by(|a, b| {
            match (a.aborted, b.aborted) {
                (true, false) => return std::cmp::Ordering::Greater,
                (false, true) => return std::cmp::Ordering::Less,
                _ => {}
            }
            let sa = a.score.unwrap_or(ScoreRecord {
                score: 0,
                accuracy: 0.0,
                max_combo: 0,
                perfect: 0,
                good: 0,
                bad: 0,
                miss: 0,
            });
            let sb = b.score.unwrap_or(ScoreRecord {
                score: 0,
                accuracy: 0.0,
                max_combo: 0,
                perfect: 0,
                good: 0,
                bad: 0,
                miss: 0,
            });
            sb.score
                .cmp(&sa.score)
                .then_with(|| sb.accuracy.partial_cmp(&sa.accuracy).unwrap_or(std::cmp::Ordering::Equal))
                .then_with(|| submitted_at(a.user_id).cmp(&submitted_at(b.user_id)))
        });
        self.broadcast(crate::codec::ServerMessage::Results(ResultsSnapshot {
            room_id: self.id.clone(),
            ranking,
        }));
        // Members who left mid-round (voluntary/kicked/banned) are kept
        // around just long enough to be ranked above; now that the round
        // has concluded they will never reconnect, so sweep them out.
        self.purge_departed_members(ctx);
        if self.cycle_mode {
            self.advance_cycle();
        }
        self.broadcast_room_state();
    }

    /// Removes members who are disconnected and not awaiting a reconnect
    /// grace timer — i.e. members who left `Playing` for a reason other than
    /// `Disconnected` and were kept in place only so `transition_to_results`
    /// could rank their `Abort` outcome.
    fn purge_departed_members(&mut self, ctx: &mut Context<Self>) {
        let ghost_ids: Vec<UserId> = self
            .members
            .iter()
            .filter(|m| !m.connected() && !self.pending_removal.contains_key(&m.user.id))
            .map(|m| m.user.id)
            .collect();
        for user_id in ghost_ids {
            if let Some(idx) = self.member_idx(user_id) {
                self.members.remove(idx);
                if self.host == user_id {
                    self.reassign_host_after_leave(true);
                }
            }
        }
        if self.members.is_empty() {
            ctx.stop();
        }
    }

    /// Results → Selecting auto-advance for cycle-mode rooms: host rotates
    /// one position among members sorted by join order (spec §4.5, scenario 5).
    fn advance_cycle(&mut self) {
        let mut order: Vec<UserId> = self.members.iter().map(|m| m.user.id).collect();
        order.sort_by_key(|uid| {
            self.members
                .iter()
                .find(|m| m.user.id == *uid)
                .map(|m| m.joined_seq)
                .unwrap_or(u64::MAX)
        });
        if let Some(pos) = order.iter().position(|uid| *uid == self.host) {
            let next = order[(pos + 1) % order.len()];
            if next != self.host {
                self.host = next;
                self.push_chat(ChatEvent::NewHost { user_id: next });
            }
        }
        self.last_game_chart = self.chart.take();
        self.clear_ready_flags();
        self.state = RoomState::Selecting;
    }

    fn reassign_host_after_leave(&mut self, left_host: bool) {
        if !left_host || self.members.is_empty() {
            return;
        }
        let new_host = self
            .members
            .iter()
            .min_by_key(|m| m.joined_seq)
            .map(|m| m.user.id);
        if let Some(new_host) = new_host {
            self.host = new_host;
            self.push_chat(ChatEvent::NewHost { user_id: new_host });
        }
    }

    fn schedule_reconnect_removal(&mut self, ctx: &mut Context<Self>, user_id: UserId) {
        let handle = ctx.run_later(
            std::time::Duration::from_secs(self.reconnect_grace_secs),
            move |act, ctx| {
                act.pending_removal.remove(&user_id);
                if let Some(idx) = act.member_idx(user_id) {
                    if !act.members[idx].connected() {
                        act.remove_member(ctx, idx, LeaveReason::Disconnected);
                    }
                }
            },
        );
        self.pending_removal.insert(user_id, handle);
    }

    fn remove_member(&mut self, ctx: &mut Context<Self>, idx: usize, reason: LeaveReason) {
        if self.state == RoomState::Playing && !matches!(reason, LeaveReason::Disconnected) {
            // A voluntary/kicked/banned leave mid-game still resolves as an
            // Abort in this round's results (spec §4.5: "If in Playing, the
            // leaver is recorded as Abort"). Keep the row, just like a
            // disconnect, so `transition_to_results` can rank it — it gets
            // swept out in `purge_departed_members` once the round ends.
            let user_id = self.members[idx].user.id;
            self.members[idx].addr = None;
            if self.members[idx].outcome.is_none() {
                self.members[idx].outcome = Some((ScoreOutcome::Aborted, Instant::now()));
                self.push_chat(ChatEvent::Abort { user_id });
            }
            self.registry.do_send(UserLeftRoom { user_id });
            self.push_chat(ChatEvent::LeaveRoom { user_id });
            if self.all_submitted_or_aborted() {
                self.transition_to_results(ctx);
            } else {
                self.broadcast_room_state();
            }
            return;
        }

        let member = self.members.remove(idx);
        let user_id = member.user.id;
        if let Some(handle) = self.pending_removal.remove(&user_id) {
            ctx.cancel_future(handle);
        }
        self.registry.do_send(UserLeftRoom { user_id });
        self.push_chat(ChatEvent::LeaveRoom { user_id });

        let was_host = self.host == user_id;
        self.reassign_host_after_leave(was_host);

        if self.state == RoomState::WaitingForReady && self.non_host_quorum_met() {
            self.transition_to_playing(ctx);
        }

        if self.members.is_empty() {
            ctx.stop();
        } else {
            self.broadcast_room_state();
        }
    }
}

impl Actor for Room {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        ctx.set_mailbox_capacity(256);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        for member in &self.members {
            if let Some(addr) = &member.addr {
                addr.do_send(KickedFromRoom {
                    reason: "room closed".into(),
                });
            }
            self.registry.do_send(UserLeftRoom { user_id: member.user.id });
        }
        self.registry.do_send(super::DestroyRoom(self.id.clone()));
        self.observer_hub.do_send(RoomsChanged);
    }
}

#[derive(Message)]
#[rtype(result = "Result<RoomSnapshot, RoomError>")]
pub struct Join {
    pub user: User,
    pub addr: Addr<Session>,
}

impl Handler<Join> for Room {
    type Result = Result<RoomSnapshot, RoomError>;

    fn handle(&mut self, msg: Join, ctx: &mut Self::Context) -> Self::Result {
        let Join { user, addr } = msg;

        if let Some(idx) = self.member_idx(user.id) {
            // Reconnect within the grace window (spec §4.5: "rejoin of a
            // current player ... implemented as membership resume").
            if matches!(self.state, RoomState::Playing | RoomState::Results) {
                self.members[idx].addr = Some(addr);
                if let Some(handle) = self.pending_removal.remove(&user.id) {
                    ctx.cancel_future(handle);
                }
                self.broadcast_room_state();
                return Ok(self.snapshot());
            }
            return Err(RoomError::AlreadyInRoom);
        }

        if self.blacklist.contains(&user.id) {
            return Err(RoomError::Blacklisted);
        }
        if self.locked && !self.whitelist.contains(&user.id) {
            return Err(RoomError::Locked);
        }
        if self.members.len() >= self.capacity as usize {
            return Err(RoomError::Full);
        }
        match self.state {
            RoomState::Selecting | RoomState::WaitingForReady => {}
            RoomState::Playing | RoomState::Results => return Err(RoomError::WrongState),
        }

        let seq = self.next_join_seq;
        self.next_join_seq += 1;
        let user_id = user.id;
        self.members.push(Member {
            user,
            addr: Some(addr),
            ready: false,
            outcome: None,
            joined_seq: seq,
        });
        self.push_chat(ChatEvent::JoinRoom { user_id });
        self.registry.do_send(UserJoinedRoom {
            user_id,
            room_id: self.id.clone(),
        });
        self.broadcast_room_state();
        Ok(self.snapshot())
    }
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Leave {
    pub user_id: UserId,
    pub reason: LeaveReason,
}

impl Handler<Leave> for Room {
    type Result = ();

    fn handle(&mut self, msg: Leave, ctx: &mut Self::Context) -> Self::Result {
        let Some(idx) = self.member_idx(msg.user_id) else {
            return;
        };

        if matches!(msg.reason, LeaveReason::Disconnected) && self.state == RoomState::Playing {
            // Record the abort immediately so Results can proceed without
            // waiting out the reconnect grace window, but keep the member
            // row so a reconnect can resume it (spec §4.5, §9).
            self.members[idx].addr = None;
            if self.members[idx].outcome.is_none() {
                self.members[idx].outcome = Some((ScoreOutcome::Aborted, Instant::now()));
                let user_id = self.members[idx].user.id;
                self.push_chat(ChatEvent::Abort { user_id });
            }
            self.schedule_reconnect_removal(ctx, msg.user_id);
            if self.all_submitted_or_aborted() {
                self.transition_to_results(ctx);
            } else {
                self.broadcast_room_state();
            }
            return;
        }
        if matches!(msg.reason, LeaveReason::Disconnected)
            && matches!(self.state, RoomState::Results)
        {
            self.members[idx].addr = None;
            self.schedule_reconnect_removal(ctx, msg.user_id);
            self.broadcast_room_state();
            return;
        }

        self.remove_member(ctx, idx, msg.reason);
    }
}

#[derive(Message)]
#[rtype(result = "Result<(), RoomError>")]
pub struct SelectChart {
    pub user_id: UserId,
    pub chart: ChartDescriptor,
}

impl Handler<SelectChart> for Room {
    type Result = Result<(), RoomError>;

    /// Selecting a chart while in `Results` doubles as "next round": the
    /// host is the only one who can pick a chart, in either state (spec
    /// §4.5 scenario 5, cycle-mode and manual alike).
    fn handle(&mut self, msg: SelectChart, _: &mut Self::Context) -> Self::Result {
        if msg.user_id != self.host {
            return Err(RoomError::NotHost);
        }
        match self.state {
            RoomState::Selecting => {}
            RoomState::Results => {
                self.last_game_chart = self.chart.take();
                self.state = RoomState::Selecting;
            }
            _ => return Err(RoomError::WrongState),
        }
        self.chart = Some(msg.chart.clone());
        self.clear_ready_flags();
        self.push_chat(ChatEvent::SelectChart { chart_id: msg.chart.id });
        self.broadcast_room_state();
        Ok(())
    }
}

#[derive(Message)]
#[rtype(result = "Result<(), RoomError>")]
pub struct SetReady {
    pub user_id: UserId,
    pub ready: bool,
}

impl Handler<SetReady> for Room {
    type Result = Result<(), RoomError>;

    /// The host's own `Ready` doubles as "start the game": sent while still
    /// `Selecting` with a chart chosen, it opens the ready phase (spec
    /// §4.5's Open Question resolution: the host must ready up like anyone
    /// else, so there is no separate "request start" wire message).
    fn handle(&mut self, msg: SetReady, ctx: &mut Self::Context) -> Self::Result {
        let Some(idx) = self.member_idx(msg.user_id) else {
            return Err(RoomError::NotInRoom);
        };
        match self.state {
            RoomState::Selecting => {
                if msg.user_id != self.host {
                    return Err(RoomError::NotHost);
                }
                if self.chart.is_none() || !msg.ready {
                    return Err(RoomError::WrongState);
                }
                self.state = RoomState::WaitingForReady;
                self.clear_ready_flags();
                self.members[idx].ready = true;
                self.push_chat(ChatEvent::Ready { user_id: msg.user_id });
                if self.non_host_quorum_met() {
                    self.transition_to_playing(ctx);
                } else {
                    self.broadcast_room_state();
                }
            }
            RoomState::WaitingForReady => {
                self.members[idx].ready = msg.ready;
                self.push_chat(if msg.ready {
                    ChatEvent::Ready { user_id: msg.user_id }
                } else {
                    ChatEvent::CancelReady { user_id: msg.user_id }
                });
                if msg.ready && self.non_host_quorum_met() {
                    self.transition_to_playing(ctx);
                } else {
                    self.broadcast_room_state();
                }
            }
            _ => return Err(RoomError::WrongState),
        }
        Ok(())
    }
}

/// Admin force-start bypasses the ready quorum (spec §4.5).
#[derive(Message)]
#[rtype(result = "Result<(), RoomError>")]
pub struct ForceStart;

impl Handler<ForceStart> for Room {
    type Result = Result<(), RoomError>;

    fn handle(&mut self, _: ForceStart, ctx: &mut Self::Context) -> Self::Result {
        if self.chart.is_none() {
            return Err(RoomError::WrongState);
        }
        match self.state {
            RoomState::Selecting | RoomState::WaitingForReady => {
                self.transition_to_playing(ctx);
                Ok(())
            }
            _ => Err(RoomError::WrongState),
        }
    }
}

#[derive(Message)]
#[rtype(result = "Result<(), RoomError>")]
pub struct SubmitScore {
    pub user_id: UserId,
    pub score: ScoreRecord,
}

impl Handler<SubmitScore> for Room {
    type Result = Result<(), RoomError>;

    fn handle(&mut self, msg: SubmitScore, ctx: &mut Self::Context) -> Self::Result {
        let Some(idx) = self.member_idx(msg.user_id) else {
            return Err(RoomError::NotInRoom);
        };
        if self.state != RoomState::Playing {
            return Err(RoomError::WrongState);
        }
        // First submission per (user, game) wins; later ones are ignored.
        if self.members[idx].outcome.is_none() {
            self.members[idx].outcome = Some((ScoreOutcome::Submitted(msg.score), Instant::now()));
            self.push_chat(ChatEvent::Played { user_id: msg.user_id });
        }
        if self.all_submitted_or_aborted() {
            self.transition_to_results(ctx);
        } else {
            self.broadcast_room_state();
        }
        Ok(())
    }
}

#[derive(Message)]
#[rtype(result = "Result<(), RoomError>")]
pub struct Abort {
    pub user_id: UserId,
}

impl Handler<Abort> for Room {
    type Result = Result<(), RoomError>;

    fn handle(&mut self, msg: Abort, ctx: &mut Self::Context) -> Self::Result {
        let Some(idx) = self.member_idx(msg.user_id) else {
            return Err(RoomError::NotInRoom);
        };
        if self.state != RoomState::Playing {
            return Err(RoomError::WrongState);
        }
        if self.members[idx].outcome.is_none() {
            self.members[idx].outcome = Some((ScoreOutcome::Aborted, Instant::now()));
            self.push_chat(ChatEvent::Abort { user_id: msg.user_id });
        }
        if self.all_submitted_or_aborted() {
            self.transition_to_results(ctx);
        } else {
            self.broadcast_room_state();
        }
        Ok(())
    }
}

#[derive(Message)]
#[rtype(result = "Result<(), RoomError>")]
pub struct Chat {
    pub user_id: UserId,
    pub text: String,
}

impl Handler<Chat> for Room {
    type Result = Result<(), RoomError>;

    fn handle(&mut self, msg: Chat, _: &mut Self::Context) -> Self::Result {
        if self.member_idx(msg.user_id).is_none() {
            return Err(RoomError::NotInRoom);
        }
        self.push_chat(ChatEvent::Chat {
            user_id: msg.user_id,
            text: msg.text,
        });
        self.broadcast_room_state();
        Ok(())
    }
}

#[derive(Message)]
#[rtype(result = "RoomSnapshot")]
pub struct GetSnapshot;

impl Handler<GetSnapshot> for Room {
    type Result = RoomSnapshot;
    fn handle(&mut self, _: GetSnapshot, _: &mut Self::Context) -> Self::Result {
        self.snapshot()
    }
}

#[derive(Message)]
#[rtype(result = "super::RoomDigest")]
pub struct GetDigest;

impl Handler<GetDigest> for Room {
    type Result = super::RoomDigest;
    fn handle(&mut self, _: GetDigest, _: &mut Self::Context) -> Self::Result {
        super::RoomDigest {
            id: self.id.clone(),
            name: self.name.clone(),
            player_count: self.members.len(),
            capacity: self.capacity,
            locked: self.locked,
            state: self.state,
        }
    }
}

#[derive(Message)]
#[rtype(result = "(HashSet<UserId>, HashSet<UserId>)")]
pub struct GetAccessLists;

impl Handler<GetAccessLists> for Room {
    type Result = (HashSet<UserId>, HashSet<UserId>);
    fn handle(&mut self, _: GetAccessLists, _: &mut Self::Context) -> Self::Result {
        (self.blacklist.clone(), self.whitelist.clone())
    }
}

// ---- Admin/host mutations (spec §4.5 "Lock / Cycle / Capacity", "Access lists") ----

#[derive(Message)]
#[rtype(result = "()")]
pub struct SetLocked(pub bool);

impl Handler<SetLocked> for Room {
    type Result = ();
    fn handle(&mut self, msg: SetLocked, _: &mut Self::Context) -> Self::Result {
        self.locked = msg.0;
        self.push_chat(ChatEvent::LockRoom { locked: msg.0 });
        self.broadcast_room_state();
    }
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct SetCycleMode(pub bool);

impl Handler<SetCycleMode> for Room {
    type Result = ();
    fn handle(&mut self, msg: SetCycleMode, _: &mut Self::Context) -> Self::Result {
        self.cycle_mode = msg.0;
        self.push_chat(ChatEvent::CycleRoom { enabled: msg.0 });
        self.broadcast_room_state();
    }
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct SetCapacity(pub u8);

impl Handler<SetCapacity> for Room {
    type Result = ();
    fn handle(&mut self, msg: SetCapacity, _: &mut Self::Context) -> Self::Result {
        self.capacity = msg.0.max(self.members.len() as u8).max(1);
        self.broadcast_room_state();
    }
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct SetBlacklist(pub HashSet<UserId>);

impl Handler<SetBlacklist> for Room {
    type Result = ();
    fn handle(&mut self, msg: SetBlacklist, ctx: &mut Self::Context) -> Self::Result {
        self.blacklist = msg.0;
        let to_remove: Vec<usize> = self
            .members
            .iter()
            .enumerate()
            .filter(|(_, m)| self.blacklist.contains(&m.user.id))
            .map(|(i, _)| i)
            .collect();
        for idx in to_remove.into_iter().rev() {
            self.remove_member(ctx, idx, LeaveReason::Kicked);
        }
    }
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct SetWhitelist(pub HashSet<UserId>);

impl Handler<SetWhitelist> for Room {
    type Result = ();
    fn handle(&mut self, msg: SetWhitelist, ctx: &mut Self::Context) -> Self::Result {
        self.whitelist = msg.0;
        if self.locked {
            let to_remove: Vec<usize> = self
                .members
                .iter()
                .enumerate()
                .filter(|(_, m)| !self.whitelist.contains(&m.user.id))
                .map(|(i, _)| i)
                .collect();
            for idx in to_remove.into_iter().rev() {
                self.remove_member(ctx, idx, LeaveReason::Kicked);
            }
        }
    }
}

#[derive(Message)]
#[rtype(result = "Result<(), RoomError>")]
pub struct Kick(pub UserId);

impl Handler<Kick> for Room {
    type Result = Result<(), RoomError>;
    fn handle(&mut self, msg: Kick, ctx: &mut Self::Context) -> Self::Result {
        let idx = self.member_idx(msg.0).ok_or(RoomError::NotInRoom)?;
        self.remove_member(ctx, idx, LeaveReason::Kicked);
        Ok(())
    }
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct CloseRoom;

impl Handler<CloseRoom> for Room {
    type Result = ();
    fn handle(&mut self, _: CloseRoom, ctx: &mut Self::Context) -> Self::Result {
        ctx.stop();
    }
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct ServerAnnouncement(pub String);

impl Handler<ServerAnnouncement> for Room {
    type Result = ();
    fn handle(&mut self, msg: ServerAnnouncement, _: &mut Self::Context) -> Self::Result {
        self.broadcast(crate::codec::ServerMessage::Announcement(msg.0));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::User;

    fn user(id: UserId) -> User {
        User {
            id,
            name: format!("user{id}"),
            avatar_url: "avatar".into(),
        }
    }

    fn chart() -> ChartDescriptor {
        ChartDescriptor {
            id: "c1".into(),
            name: "Song".into(),
            level: "Lv.12".into(),
            difficulty: 12.0,
            charter: "c".into(),
            composer: "m".into(),
            illustration_url: "i".into(),
            file_url: "f".into(),
            rating: 4.5,
            rating_count: 10,
            uploader: "u".into(),
        }
    }

    #[actix::test]
    async fn host_must_ready_before_start() {
        let hub = ObserverHub::new().start();
        let registry = RoomRegistry::new(hub.clone()).start();
        // A minimal fake session target is not needed for this unit test:
        // we exercise Room in isolation by constructing it directly.
        let room = Room::new(
            RoomId::from("R1"),
            "room".into(),
            user(1),
            fake_session_addr(),
            4,
            registry,
            hub,
        )
        .start();

        room.send(SelectChart { user_id: 1, chart: chart() }).await.unwrap().unwrap();
        room.send(Join { user: user(2), addr: fake_session_addr() })
            .await
            .unwrap()
            .unwrap();
        // Host readies up, opening the ready phase; member 2 has not readied
        // yet, so the room must not start.
        room.send(SetReady { user_id: 1, ready: true }).await.unwrap().unwrap();
        let snapshot = room.send(GetSnapshot).await.unwrap();
        assert_eq!(snapshot.state, RoomState::WaitingForReady);

        room.send(SetReady { user_id: 2, ready: true }).await.unwrap().unwrap();
        let snapshot = room.send(GetSnapshot).await.unwrap();
        assert_eq!(snapshot.state, RoomState::Playing);
    }

    fn fake_session_addr() -> Addr<Session> {
        Session::new_disconnected().start()
    }
}
