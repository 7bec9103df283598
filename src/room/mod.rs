//! Room data model, the Room Registry actor, and wire snapshot types
//! (spec §3, §4.6). The per-room state machine itself lives in
//! [`actor`], mirroring the way the teacher splits `room::mod` (registry +
//! shared types) from `room::actor` (the per-room actor).

pub mod actor;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use actix::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::RoomError;
use crate::identity::{User, UserId};
use crate::observer::ObserverHub;
use crate::session::actor::Session;

pub use actor::Room;

pub type RoomId = Arc<str>;

pub const ROOM_ID_LENGTH: usize = 6;
const ROOM_ID_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Bound on the per-room chat/event ring buffer (spec §3 "chat ring buffer
/// (bounded, most recent N events)"). Not a configured key in spec §6, so
/// this is an implementation constant.
pub const CHAT_BUFFER_BOUND: usize = 200;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartDescriptor {
    pub id: String,
    pub name: String,
    pub level: String,
    pub difficulty: f32,
    pub charter: String,
    pub composer: String,
    pub illustration_url: String,
    pub file_url: String,
    pub rating: f32,
    pub rating_count: u32,
    pub uploader: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub score: u32,
    pub accuracy: f32,
    pub max_combo: u32,
    pub perfect: u32,
    pub good: u32,
    pub bad: u32,
    pub miss: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomState {
    Selecting,
    WaitingForReady,
    Playing,
    Results,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ChatEvent {
    Chat { user_id: UserId, text: String },
    JoinRoom { user_id: UserId },
    LeaveRoom { user_id: UserId },
    CreateRoom { user_id: UserId },
    NewHost { user_id: UserId },
    SelectChart { chart_id: String },
    Ready { user_id: UserId },
    CancelReady { user_id: UserId },
    CancelGame,
    StartPlaying,
    Played { user_id: UserId },
    Abort { user_id: UserId },
    GameEnd,
    LockRoom { locked: bool },
    CycleRoom { enabled: bool },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberSnapshot {
    pub user: User,
    pub ready: bool,
    pub connected: bool,
    pub last_score: Option<ScoreRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub id: RoomId,
    pub name: String,
    pub host: UserId,
    pub members: Vec<MemberSnapshot>,
    pub capacity: u8,
    pub locked: bool,
    pub cycle_mode: bool,
    pub state: RoomState,
    pub chart: Option<ChartDescriptor>,
    pub last_game_chart: Option<ChartDescriptor>,
    pub chat: Vec<ChatEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedResult {
    pub user_id: UserId,
    pub score: Option<ScoreRecord>,
    pub aborted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultsSnapshot {
    pub room_id: RoomId,
    pub ranking: Vec<RankedResult>,
}

/// Compact per-room digest used for the observer `roomList` fan-out (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomDigest {
    pub id: RoomId,
    pub name: String,
    pub player_count: usize,
    pub capacity: u8,
    pub locked: bool,
    pub state: RoomState,
}

fn generate_room_id(taken: &HashMap<RoomId, Addr<Room>>) -> RoomId {
    loop {
        let mut buf = String::with_capacity(ROOM_ID_LENGTH);
        for _ in 0..ROOM_ID_LENGTH {
            let idx = fastrand::usize(0..ROOM_ID_CHARSET.len());
            buf.push(ROOM_ID_CHARSET[idx] as char);
        }
        let id: RoomId = Arc::from(buf.as_str());
        if !taken.contains_key(&id) {
            return id;
        }
    }
}

/// Normalises a room id for the case-insensitive compare spec §3 requires.
pub fn normalize_room_id(raw: &str) -> RoomId {
    Arc::from(raw.to_ascii_uppercase().as_str())
}

/// Single-writer actor owning room creation/lookup/destruction and the
/// cross-room "one room per user" invariant (spec §4.6, §3).
pub struct RoomRegistry {
    rooms: HashMap<RoomId, Addr<Room>>,
    user_rooms: HashMap<UserId, RoomId>,
    observer_hub: Addr<ObserverHub>,
}

impl RoomRegistry {
    pub fn new(observer_hub: Addr<ObserverHub>) -> Self {
        Self {
            rooms: HashMap::new(),
            user_rooms: HashMap::new(),
            observer_hub,
        }
    }
}

impl Actor for RoomRegistry {
    type Context = Context<Self>;
}

#[derive(Message)]
#[rtype(result = "Result<(RoomId, Addr<Room>), RoomError>")]
pub struct CreateRoom {
    pub host: User,
    pub host_addr: Addr<Session>,
    pub name: String,
    pub capacity: u8,
}

impl Handler<CreateRoom> for RoomRegistry {
    type Result = Result<(RoomId, Addr<Room>), RoomError>;

    fn handle(&mut self, msg: CreateRoom, ctx: &mut Self::Context) -> Self::Result {
        if self.user_rooms.contains_key(&msg.host.id) {
            return Err(RoomError::AlreadyInRoom);
        }
        let id = generate_room_id(&self.rooms);
        let room = Room::new(
            id.clone(),
            msg.name,
            msg.host.clone(),
            msg.host_addr,
            msg.capacity,
            ctx.address(),
            self.observer_hub.clone(),
        )
        .start();
        self.rooms.insert(id.clone(), room.clone());
        self.user_rooms.insert(msg.host.id, id.clone());
        self.observer_hub.do_send(crate::observer::RoomsChanged);
        Ok((id, room))
    }
}

#[derive(Message)]
#[rtype(result = "Option<Addr<Room>>")]
pub struct LookupRoom(pub RoomId);

impl Handler<LookupRoom> for RoomRegistry {
    type Result = Option<Addr<Room>>;
    fn handle(&mut self, msg: LookupRoom, _: &mut Self::Context) -> Self::Result {
        self.rooms.get(&msg.0).cloned()
    }
}

#[derive(Message)]
#[rtype(result = "Option<RoomId>")]
pub struct LookupUserRoom(pub UserId);

impl Handler<LookupUserRoom> for RoomRegistry {
    type Result = Option<RoomId>;
    fn handle(&mut self, msg: LookupUserRoom, _: &mut Self::Context) -> Self::Result {
        self.user_rooms.get(&msg.0).cloned()
    }
}

/// Sent by a Room when a user successfully joins, so the registry can
/// enforce the one-room-per-user invariant without every Room knowing
/// about every other Room.
#[derive(Message)]
#[rtype(result = "()")]
pub struct UserJoinedRoom {
    pub user_id: UserId,
    pub room_id: RoomId,
}

impl Handler<UserJoinedRoom> for RoomRegistry {
    type Result = ();
    fn handle(&mut self, msg: UserJoinedRoom, _: &mut Self::Context) -> Self::Result {
        self.user_rooms.insert(msg.user_id, msg.room_id);
    }
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct UserLeftRoom {
    pub user_id: UserId,
}

impl Handler<UserLeftRoom> for RoomRegistry {
    type Result = ();
    fn handle(&mut self, msg: UserLeftRoom, _: &mut Self::Context) -> Self::Result {
        self.user_rooms.remove(&msg.user_id);
    }
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct DestroyRoom(pub RoomId);

impl Handler<DestroyRoom> for RoomRegistry {
    type Result = ();
    fn handle(&mut self, msg: DestroyRoom, _: &mut Self::Context) -> Self::Result {
        self.rooms.remove(&msg.0);
        self.observer_hub.do_send(crate::observer::RoomsChanged);
    }
}

#[derive(Message)]
#[rtype(result = "Vec<Addr<Room>>")]
pub struct AllRooms;

impl Handler<AllRooms> for RoomRegistry {
    type Result = Vec<Addr<Room>>;
    fn handle(&mut self, _: AllRooms, _: &mut Self::Context) -> Self::Result {
        self.rooms.values().cloned().collect()
    }
}

#[derive(Message)]
#[rtype(result = "usize")]
pub struct RoomCount;

impl Handler<RoomCount> for RoomRegistry {
    type Result = usize;
    fn handle(&mut self, _: RoomCount, _: &mut Self::Context) -> Self::Result {
        self.rooms.len()
    }
}

/// User ids currently banned from ever being considered "in a room" set,
/// used by the whitelist/blacklist admin surface; kept separate from
/// `ban::BanRegistry`, which governs connection-level banning.
pub type UserIdSet = HashSet<UserId>;
