//! Observer Hub: the admin-facing WebSocket fan-out of `serverStats`,
//! `roomList`, and `roomDetails` events (spec §4.8, §6).
//!
//! Generalises the teacher's WebSocket actor pattern
//! (`actix_web_actors::ws::WebsocketContext` + `StreamHandler<Result<ws::Message,
//! ProtocolError>>`, used in the teacher for the game session itself) to its
//! natural home here: the observer channel really is WebSocket + JSON, so
//! `ObserverSession` keeps that idiom almost verbatim while the game
//! session (`crate::session::actor::Session`) moved to raw TCP framing.
//! `roomList` coalescing reuses the teacher's `SpawnHandle`/`ctx.run_later`
//! timer idiom (the same one backing its reconnection timer) as a
//! trailing-edge debounce instead.

use std::collections::HashMap;
use std::time::Duration;

use actix::prelude::*;
use actix_web_actors::ws::{self, ProtocolError, WebsocketContext};
use serde::{Deserialize, Serialize};

use crate::room::{RoomDigest, RoomRegistry, RoomSnapshot};
use crate::session::SessionManager;

/// Debounce window for coalesced `roomList` pushes (spec §4.8).
const ROOM_LIST_DEBOUNCE_MS: u64 = 200;

#[derive(Debug, Clone, Serialize)]
pub enum ObserverEvent {
    ServerStats { connections: usize, rooms: usize },
    RoomList { rooms: Vec<RoomDigest> },
    RoomDetails { room: RoomSnapshot, other_rooms: Vec<RoomDigest> },
}

/// Wire envelope: `{type, payload}` (spec §6 "Observer (WebSocket) protocol").
#[derive(Serialize)]
struct WireEvent {
    #[serde(rename = "type")]
    kind: &'static str,
    payload: serde_json::Value,
}

impl From<&ObserverEvent> for WireEvent {
    fn from(event: &ObserverEvent) -> Self {
        let (kind, payload) = match event {
            ObserverEvent::ServerStats { connections, rooms } => (
                "serverStats",
                serde_json::json!({ "totalPlayers": connections, "totalRooms": rooms }),
            ),
            ObserverEvent::RoomList { rooms } => {
                ("roomList", serde_json::json!({ "rooms": rooms }))
            }
            ObserverEvent::RoomDetails { room, other_rooms } => {
                let mut payload = serde_json::to_value(room).unwrap_or_default();
                if let serde_json::Value::Object(map) = &mut payload {
                    map.insert(
                        "other_rooms".to_string(),
                        serde_json::to_value(other_rooms).unwrap_or_default(),
                    );
                }
                ("roomDetails", payload)
            }
        };
        Self { kind, payload }
    }
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum ObserverRequest {
    GetRoomDetails { payload: GetRoomDetailsPayload },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetRoomDetailsPayload {
    room_id: String,
}

/// Single-writer actor owning the observer subscriber table. Bounded,
/// coalesced fan-out: each subscriber is reached through its own actor
/// mailbox (capacity set in [`ObserverSession::started`]); a subscriber
/// that falls behind has its oldest pushes dropped by the mailbox itself
/// rather than blocking the hub (spec §4.8 "bounded per-subscriber queues,
/// drop-on-full").
pub struct ObserverHub {
    subscribers: HashMap<usize, Addr<ObserverSession>>,
    next_id: usize,
    registry: Option<Addr<RoomRegistry>>,
    sessions: Option<Addr<SessionManager>>,
    debounce: Option<SpawnHandle>,
}

impl ObserverHub {
    pub fn new() -> Self {
        Self {
            subscribers: HashMap::new(),
            next_id: 0,
            registry: None,
            sessions: None,
            debounce: None,
        }
    }

    fn broadcast(&self, event: ObserverEvent) {
        for sub in self.subscribers.values() {
            sub.do_send(Push(event.clone()));
        }
    }
}

impl Default for ObserverHub {
    fn default() -> Self {
        Self::new()
    }
}

impl Actor for ObserverHub {
    type Context = Context<Self>;
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct AttachCollaborators {
    pub registry: Addr<RoomRegistry>,
    pub sessions: Addr<SessionManager>,
}

impl Handler<AttachCollaborators> for ObserverHub {
    type Result = ();
    fn handle(&mut self, msg: AttachCollaborators, _: &mut Self::Context) -> Self::Result {
        self.registry = Some(msg.registry);
        self.sessions = Some(msg.sessions);
    }
}

#[derive(Message)]
#[rtype(result = "usize")]
pub struct Subscribe(pub Addr<ObserverSession>);

impl Handler<Subscribe> for ObserverHub {
    type Result = usize;
    fn handle(&mut self, msg: Subscribe, _: &mut Self::Context) -> Self::Result {
        let id = self.next_id;
        self.next_id += 1;
        self.subscribers.insert(id, msg.0);
        id
    }
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Unsubscribe(pub usize);

impl Handler<Unsubscribe> for ObserverHub {
    type Result = ();
    fn handle(&mut self, msg: Unsubscribe, _: &mut Self::Context) -> Self::Result {
        self.subscribers.remove(&msg.0);
    }
}

/// Sent by the Room Registry whenever a room is created, destroyed, or a
/// member of any room changes (it is cheaper for every Room to just ping
/// "something changed" than to carry a precise diff cross-actor).
#[derive(Message)]
#[rtype(result = "()")]
pub struct RoomsChanged;

impl Handler<RoomsChanged> for ObserverHub {
    type Result = ();
    fn handle(&mut self, _: RoomsChanged, ctx: &mut Self::Context) -> Self::Result {
        if self.debounce.is_some() {
            return;
        }
        self.debounce = Some(ctx.run_later(Duration::from_millis(ROOM_LIST_DEBOUNCE_MS), |act, ctx| {
            act.debounce = None;
            act.publish_room_list(ctx);
        }));
    }
}

impl ObserverHub {
    fn publish_room_list(&self, ctx: &mut Context<Self>) {
        let Some(registry) = self.registry.clone() else {
            return;
        };
        let sessions = self.sessions.clone();
        let subscribers: Vec<Addr<ObserverSession>> = self.subscribers.values().cloned().collect();
        if subscribers.is_empty() {
            return;
        }
        registry
            .send(crate::room::AllRooms)
            .into_actor(self)
            .then(move |res, _act, _ctx| {
                let rooms = res.unwrap_or_default();
                let subscribers = subscribers.clone();
                let sessions = sessions.clone();
                async move {
                    let mut digests = Vec::with_capacity(rooms.len());
                    for room in &rooms {
                        if let Ok(digest) = room.send(crate::room::actor::GetDigest).await {
                            digests.push(digest);
                        }
                    }
                    let connections = if let Some(sessions) = &sessions {
                        sessions.send(crate::session::ConnectionCount).await.unwrap_or(0)
                    } else {
                        0
                    };
                    let stats = ObserverEvent::ServerStats {
                        connections,
                        rooms: digests.len(),
                    };
                    let list = ObserverEvent::RoomList { rooms: digests };
                    for sub in &subscribers {
                        sub.do_send(Push(stats.clone()));
                        sub.do_send(Push(list.clone()));
                    }
                }
                .into_actor(_act)
            })
            .wait(ctx);
    }
}

/// The admin WebSocket connection itself. Unlike `crate::session::actor::Session`
/// (raw-TCP, our own framing) this is plain `actix-web-actors` WS + JSON, since
/// the observer surface is explicitly a browser-facing admin tool (spec §6).
pub struct ObserverSession {
    id: Option<usize>,
    hub: Addr<ObserverHub>,
}

impl ObserverSession {
    pub fn new(hub: Addr<ObserverHub>) -> Self {
        Self { id: None, hub }
    }
}

impl Actor for ObserverSession {
    type Context = WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        ctx.set_mailbox_capacity(64);
        self.hub
            .send(Subscribe(ctx.address()))
            .into_actor(self)
            .then(|res, act, _| {
                if let Ok(id) = res {
                    act.id = Some(id);
                }
                actix::fut::ready(())
            })
            .wait(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        if let Some(id) = self.id {
            self.hub.do_send(Unsubscribe(id));
        }
    }
}

impl StreamHandler<Result<ws::Message, ProtocolError>> for ObserverSession {
    fn handle(&mut self, item: Result<ws::Message, ProtocolError>, ctx: &mut Self::Context) {
        match item {
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<ObserverRequest>(&text) {
                Ok(ObserverRequest::GetRoomDetails { payload }) => {
                    let room_id = crate::room::normalize_room_id(&payload.room_id);
                    self.hub.do_send(RequestRoomDetails {
                        room_id,
                        requester: ctx.address(),
                    });
                }
                Err(err) => log::warn!("malformed observer request: {err}"),
            },
            Ok(ws::Message::Ping(bytes)) => ctx.pong(&bytes),
            Ok(ws::Message::Close(reason)) => ctx.close(reason),
            Ok(_) => {}
            Err(err) => log::warn!("observer socket error: {err}"),
        }
    }
}

#[derive(Message)]
#[rtype(result = "()")]
struct Push(ObserverEvent);

impl Handler<Push> for ObserverSession {
    type Result = ();
    fn handle(&mut self, msg: Push, ctx: &mut Self::Context) -> Self::Result {
        let wire = WireEvent::from(&msg.0);
        match serde_json::to_string(&wire) {
            Ok(text) => ctx.text(text),
            Err(err) => log::error!("failed to serialize observer event: {err}"),
        }
    }
}

#[derive(Message)]
#[rtype(result = "()")]
struct RequestRoomDetails {
    room_id: crate::room::RoomId,
    requester: Addr<ObserverSession>,
}

impl Handler<RequestRoomDetails> for ObserverHub {
    type Result = ();
    fn handle(&mut self, msg: RequestRoomDetails, ctx: &mut Self::Context) -> Self::Result {
        let Some(registry) = self.registry.clone() else {
            return;
        };
        registry
            .send(crate::room::LookupRoom(msg.room_id.clone()))
            .into_actor(self)
            .then(move |res, _act, _ctx| {
                let requester = msg.requester.clone();
                let room_id = msg.room_id.clone();
                let registry = registry.clone();
                async move {
                    let Ok(Some(room)) = res else { return };
                    let Ok(snapshot) = room.send(crate::room::actor::GetSnapshot).await else {
                        return;
                    };
                    let other_rooms = fetch_other_room_digests(&registry, &room_id).await;
                    requester.do_send(Push(ObserverEvent::RoomDetails {
                        room: snapshot,
                        other_rooms,
                    }));
                }
                .into_actor(_act)
            })
            .wait(ctx);
    }
}

/// Digests of every room other than `exclude`, for the `roomDetails`
/// payload's `otherRooms` field (spec §4.8).
async fn fetch_other_room_digests(
    registry: &Addr<RoomRegistry>,
    exclude: &crate::room::RoomId,
) -> Vec<RoomDigest> {
    let rooms = registry.send(crate::room::AllRooms).await.unwrap_or_default();
    let mut digests = Vec::with_capacity(rooms.len());
    for room in &rooms {
        if let Ok(digest) = room.send(crate::room::actor::GetDigest).await {
            if &digest.id != exclude {
                digests.push(digest);
            }
        }
    }
    digests
}

/// Pushes a single room's full detail view to every observer, used by the
/// Admin HTTP surface's `roomDetails` query (spec §6) when it wants the
/// authoritative current snapshot rather than the last coalesced digest.
pub fn publish_room_details(hub: &Addr<ObserverHub>, snapshot: RoomSnapshot) {
    hub.do_send(PublishDetails(snapshot));
}

#[derive(Message)]
#[rtype(result = "()")]
struct PublishDetails(RoomSnapshot);

impl Handler<PublishDetails> for ObserverHub {
    type Result = ();
    fn handle(&mut self, msg: PublishDetails, ctx: &mut Self::Context) -> Self::Result {
        let subscribers: Vec<Addr<ObserverSession>> = self.subscribers.values().cloned().collect();
        if subscribers.is_empty() {
            return;
        }
        let Some(registry) = self.registry.clone() else {
            self.broadcast(ObserverEvent::RoomDetails {
                room: msg.0,
                other_rooms: Vec::new(),
            });
            return;
        };
        let snapshot = msg.0;
        async move {
            let other_rooms = fetch_other_room_digests(&registry, &snapshot.id).await;
            (snapshot, other_rooms)
        }
        .into_actor(self)
        .then(|(snapshot, other_rooms), _act, _ctx| {
            for sub in &subscribers {
                sub.do_send(Push(ObserverEvent::RoomDetails {
                    room: snapshot.clone(),
                    other_rooms: other_rooms.clone(),
                }));
            }
            actix::fut::ready(())
        })
        .wait(ctx);
    }
}
