//! The per-connection actor (spec §4.4): Accepted -> AwaitingAuth ->
//! Authenticated -> InRoom. Generalises the teacher's WebSocket-backed
//! `Session` (a `WebsocketContext` actor reading `ws::Message` and writing
//! through `ctx.text`) to a raw-TCP actor reading a [`FrameCodec`] stream
//! and writing through an [`actix::io::FramedWrite`] sink, the idiomatic
//! actix pattern for a framed TCP connection (as in actix's own chat-server
//! example, which this edition otherwise has no relation to).

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use actix::io::{FramedWrite, WriteHandler};
use actix::prelude::*;
use bytes::Bytes;
use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio_util::codec::FramedRead;

use crate::ban::BanRegistry;
use crate::codec::{
    encode_server_message, ClientMessage, FrameCodec, FrameCodecError, ProtocolErrorWire,
    RawFrame, ServerMessage, PROTOCOL_VERSION,
};
use crate::error::ProtocolErrorCode;
use crate::identity::{IdentityClient, User, UserId};
use actix::fut::ActorFutureExt;
use crate::room::actor::{
    Abort, Chat as RoomChat, Join as RoomJoin, Leave as RoomLeave, LeaveReason,
    SelectChart as RoomSelectChart, SetReady, SubmitScore as RoomSubmitScore,
};
use crate::room::{CreateRoom, LookupRoom, Room, RoomId, RoomRegistry};
use crate::session::{Authenticated as ManagerAuthenticated, Connected, Disconnected, TransientId};

use super::SessionManager;

/// How long an accepted connection has to complete Authenticate before it
/// is dropped (spec §4.4, wire error `AuthTimeout`).
const AUTH_TIMEOUT_SECS: u64 = 10;
/// How often we check for an idle connection.
const IDLE_CHECK_INTERVAL_SECS: u64 = 10;
/// A connection that sends nothing — not even a `Ping` — for this long is
/// considered dead. Clients are expected to `Ping` well inside this window.
const IDLE_TIMEOUT_SECS: u64 = 30;

/// Destination for outbound frames. `Null` exists only so the Room actor's
/// tests can drive a `Session` without a real socket attached.
enum Sink {
    Tcp(FramedWrite<(u8, Bytes), WriteHalf<TcpStream>, FrameCodec>),
    Null,
}

pub struct Session {
    transient_id: Option<TransientId>,
    peer_addr: SocketAddr,
    sink: Sink,
    session_manager: Addr<SessionManager>,
    registry: Addr<RoomRegistry>,
    identity: IdentityClient,
    bans: BanRegistry,
    hb: Instant,
    auth_deadline: Option<SpawnHandle>,
    user: Option<User>,
    room: Option<(RoomId, Addr<Room>)>,
    /// Monotonic counters (spec §3 "Sequence counters"). `outbound_seq` is
    /// stamped onto every frame we send; `last_acked_seq` tracks the
    /// highest sequence the client has acknowledged so out-of-order acks
    /// can be rejected as protocol violations.
    inbound_seq: u32,
    outbound_seq: u32,
    last_acked_seq: u32,
}

impl Session {
    /// Spawns a session actor bound to an accepted TCP connection. Split
    /// into read/write halves like `tokio_util`'s own framed-connection
    /// idiom: the read half feeds `Context::add_stream`, the write half
    /// backs a `FramedWrite` sink driven by the actor's own mailbox.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        read_half: ReadHalf<TcpStream>,
        write_half: WriteHalf<TcpStream>,
        peer_addr: SocketAddr,
        session_manager: Addr<SessionManager>,
        registry: Addr<RoomRegistry>,
        identity: IdentityClient,
        bans: BanRegistry,
        max_frame_len: u32,
    ) -> Addr<Self> {
        Self::create(move |ctx| {
            ctx.add_stream(FramedRead::new(read_half, FrameCodec::new(max_frame_len)));
            let sink = FramedWrite::new(write_half, FrameCodec::new(max_frame_len), ctx);
            Self {
                transient_id: None,
                peer_addr,
                sink: Sink::Tcp(sink),
                session_manager,
                registry,
                identity,
                bans,
                hb: Instant::now(),
                auth_deadline: None,
                user: None,
                room: None,
                inbound_seq: 0,
                outbound_seq: 0,
                last_acked_seq: 0,
            }
        })
    }

    /// Test-only constructor: a session with no underlying socket. Any
    /// `Deliver` it receives is simply logged and dropped.
    #[cfg(test)]
    pub fn new_disconnected() -> Self {
        Self {
            transient_id: None,
            peer_addr: "0.0.0.0:0".parse().unwrap(),
            sink: Sink::Null,
            session_manager: SessionManager::new().start(),
            registry: {
                // A registry with no observer hub reference is never used by
                // these tests; it exists only to satisfy the field type.
                let hub = crate::observer::ObserverHub::new().start();
                RoomRegistry::new(hub).start()
            },
            identity: IdentityClient::new("http://localhost", "", Duration::from_secs(1)),
            bans: BanRegistry::new(),
            hb: Instant::now(),
            auth_deadline: None,
            user: None,
            room: None,
            inbound_seq: 0,
            outbound_seq: 0,
            last_acked_seq: 0,
        }
    }

    fn send_frame(&mut self, msg: ServerMessage) {
        self.outbound_seq += 1;
        match encode_server_message(&msg, self.outbound_seq) {
            Ok((tag, payload)) => {
                if let Sink::Tcp(sink) = &mut self.sink {
                    sink.write((tag, payload));
                }
            }
            Err(err) => log::error!("failed to encode outbound message: {err}"),
        }
    }

    /// A client ack naming a sequence we haven't sent yet, or an older
    /// sequence than one already acked, is a protocol violation (spec §3:
    /// "clients that acknowledge out of order are treated as protocol
    /// violations").
    fn handle_ack(&mut self, seq: u32, ctx: &mut Context<Self>) {
        if seq > self.outbound_seq || seq < self.last_acked_seq {
            self.fail(ctx, ProtocolErrorCode::ProtocolViolation);
            return;
        }
        self.last_acked_seq = seq;
    }

    fn fail(&mut self, ctx: &mut Context<Self>, code: ProtocolErrorCode) {
        self.send_frame(ServerMessage::Error(ProtocolErrorWire::from(code)));
        if code.is_fatal() {
            ctx.stop();
        }
    }

    fn start_auth_timeout(&mut self, ctx: &mut Context<Self>) {
        let handle = ctx.run_later(Duration::from_secs(AUTH_TIMEOUT_SECS), |act, ctx| {
            if act.user.is_none() {
                act.fail(ctx, ProtocolErrorCode::AuthTimeout);
            }
        });
        self.auth_deadline = Some(handle);
    }

    fn idle_check(&mut self, ctx: &mut Context<Self>) {
        ctx.run_interval(Duration::from_secs(IDLE_CHECK_INTERVAL_SECS), |act, ctx| {
            if act.hb.elapsed().as_secs() >= IDLE_TIMEOUT_SECS {
                ctx.stop();
            }
        });
    }

    fn leave_current_room(&mut self, reason: LeaveReason) {
        if let (Some((_, room)), Some(user)) = (self.room.take(), &self.user) {
            room.do_send(RoomLeave {
                user_id: user.id,
                reason,
            });
        }
    }

    fn handle_client_message(&mut self, msg: ClientMessage, ctx: &mut Context<Self>) {
        match msg {
            ClientMessage::Hello(body) => {
                if body.version != PROTOCOL_VERSION {
                    self.fail(ctx, ProtocolErrorCode::UnsupportedVersion);
                    return;
                }
                self.send_frame(ServerMessage::HelloAck {
                    version: PROTOCOL_VERSION,
                });
            }
            ClientMessage::Authenticate(body) => self.authenticate(body.token, ctx),
            ClientMessage::Ping => self.send_frame(ServerMessage::Pong),
            ClientMessage::CreateRoom(body) => self.create_room(body.name, body.capacity, ctx),
            ClientMessage::JoinRoom(body) => self.join_room(body.room_id, ctx),
            ClientMessage::LeaveRoom => {
                self.leave_current_room(LeaveReason::Voluntary);
            }
            ClientMessage::SelectChart(body) => self.in_room(ctx, |room, user_id| {
                room.do_send(RoomSelectChart {
                    user_id,
                    chart: body.chart,
                })
            }),
            ClientMessage::Ready => self.in_room(ctx, |room, user_id| {
                room.do_send(SetReady { user_id, ready: true })
            }),
            ClientMessage::CancelReady => self.in_room(ctx, |room, user_id| {
                room.do_send(SetReady {
                    user_id,
                    ready: false,
                })
            }),
            ClientMessage::SubmitScore(body) => self.in_room(ctx, |room, user_id| {
                room.do_send(RoomSubmitScore {
                    user_id,
                    score: body.score,
                })
            }),
            ClientMessage::GameEnd(body) => self.in_room(ctx, |room, user_id| {
                if body.aborted {
                    room.do_send(Abort { user_id });
                }
            }),
            ClientMessage::Chat(body) => self.in_room(ctx, |room, user_id| {
                room.do_send(RoomChat {
                    user_id,
                    text: body.text,
                })
            }),
            ClientMessage::Ack(body) => self.handle_ack(body.seq, ctx),
        }
    }

    fn in_room(&mut self, ctx: &mut Context<Self>, f: impl FnOnce(&Addr<Room>, UserId)) {
        match (&self.room, &self.user) {
            (Some((_, room)), Some(user)) => f(room, user.id),
            _ => self.fail(ctx, ProtocolErrorCode::NotInRoom),
        }
    }

    fn authenticate(&mut self, token: String, ctx: &mut Context<Self>) {
        if self.user.is_some() {
            self.fail(ctx, ProtocolErrorCode::Unauthorized);
            return;
        }
        let identity = self.identity.clone();
        let peer_ip = self.peer_addr.ip().to_string();
        identity
            .authenticate(&token)
            .into_actor(self)
            .then(move |res, act, ctx| {
                match res {
                    Ok(user) => {
                        if matches!(
                            act.bans.check(user.id, &peer_ip),
                            crate::ban::BanCheck::Denied { .. }
                        ) {
                            act.fail(ctx, ProtocolErrorCode::Banned);
                            return actix::fut::ready(());
                        }
                        if let Some(handle) = act.auth_deadline.take() {
                            ctx.cancel_future(handle);
                        }
                        act.user = Some(user.clone());
                        if let Some(transient_id) = act.transient_id {
                            act.session_manager.do_send(ManagerAuthenticated {
                                transient_id,
                                user_id: user.id,
                            });
                        }
                        act.send_frame(ServerMessage::AuthenticateResult(Ok(user)));
                    }
                    Err(err) => {
                        log::warn!("authentication failed: {err}");
                        act.send_frame(ServerMessage::AuthenticateResult(Err(
                            ProtocolErrorWire::from(ProtocolErrorCode::Unauthorized),
                        )));
                    }
                }
                actix::fut::ready(())
            })
            .wait(ctx);
    }

    fn create_room(&mut self, name: String, capacity: u8, ctx: &mut Context<Self>) {
        let Some(user) = self.user.clone() else {
            self.fail(ctx, ProtocolErrorCode::Unauthorized);
            return;
        };
        if self.room.is_some() {
            self.fail(ctx, ProtocolErrorCode::AlreadyInRoom);
            return;
        }
        self.registry
            .send(CreateRoom {
                host: user,
                host_addr: ctx.address(),
                name,
                capacity,
            })
            .into_actor(self)
            .then(|res, act, ctx| {
                match res {
                    Ok(Ok((room_id, room))) => {
                        act.room = Some((room_id, room.clone()));
                        let snapshot_fut = room.send(crate::room::actor::GetSnapshot);
                        return actix::fut::wrap_future(snapshot_fut)
                            .map(|res, act: &mut Self, _| {
                                if let Ok(snapshot) = res {
                                    act.send_frame(ServerMessage::RoomStateUpdate(snapshot));
                                }
                            })
                            .boxed_local();
                    }
                    Ok(Err(err)) => {
                        act.fail(ctx, err.into());
                    }
                    Err(err) => {
                        log::error!("room registry unreachable: {err}");
                        act.fail(ctx, ProtocolErrorCode::Internal);
                    }
                }
                actix::fut::ready(()).boxed_local()
            })
            .wait(ctx);
    }

    fn join_room(&mut self, room_id: RoomId, ctx: &mut Context<Self>) {
        let Some(user) = self.user.clone() else {
            self.fail(ctx, ProtocolErrorCode::Unauthorized);
            return;
        };
        if self.room.is_some() {
            self.fail(ctx, ProtocolErrorCode::AlreadyInRoom);
            return;
        }
        let room_id = crate::room::normalize_room_id(&room_id);
        self.registry
            .send(LookupRoom(room_id.clone()))
            .into_actor(self)
            .then(move |res, act, ctx| {
                let Ok(Some(room)) = res else {
                    act.fail(ctx, ProtocolErrorCode::RoomNotFound);
                    return actix::fut::ready(()).boxed_local();
                };
                let addr = ctx.address();
                let room_id2 = room_id.clone();
                actix::fut::wrap_future(room.send(RoomJoin { user, addr }))
                    .map(move |res, act: &mut Self, ctx| match res {
                        Ok(Ok(snapshot)) => {
                            act.room = Some((room_id2.clone(), room.clone()));
                            act.send_frame(ServerMessage::RoomStateUpdate(snapshot));
                        }
                        Ok(Err(err)) => act.fail(ctx, err.into()),
                        Err(err) => {
                            log::error!("room actor unreachable: {err}");
                            act.fail(ctx, ProtocolErrorCode::Internal);
                        }
                    })
                    .boxed_local()
            })
            .wait(ctx);
    }
}

impl Actor for Session {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.start_auth_timeout(ctx);
        self.idle_check(ctx);
        self.session_manager
            .send(Connected {
                addr: ctx.address(),
                peer_ip: self.peer_addr.ip().to_string(),
            })
            .into_actor(self)
            .then(|res, act, _| {
                if let Ok(id) = res {
                    act.transient_id = Some(id);
                }
                actix::fut::ready(())
            })
            .wait(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.leave_current_room(LeaveReason::Disconnected);
        if let Some(transient_id) = self.transient_id.take() {
            self.session_manager.do_send(Disconnected { transient_id });
        }
    }
}

impl WriteHandler<FrameCodecError> for Session {
    fn error(&mut self, err: FrameCodecError, _ctx: &mut Self::Context) -> Running {
        log::error!("write error on session {:?}: {err}", self.transient_id);
        Running::Stop
    }
}

impl StreamHandler<Result<RawFrame, FrameCodecError>> for Session {
    fn handle(&mut self, item: Result<RawFrame, FrameCodecError>, ctx: &mut Self::Context) {
        self.hb = Instant::now();
        match item {
            Ok(frame) => {
                self.inbound_seq += 1;
                match crate::codec::decode_client_message(&frame) {
                    Ok(Some(msg)) => self.handle_client_message(msg, ctx),
                    Ok(None) => log::debug!("discarding frame with unknown tag {}", frame.tag),
                    Err(err) => {
                        log::warn!("malformed frame: {err}");
                        self.fail(ctx, ProtocolErrorCode::ProtocolViolation);
                    }
                }
            }
            Err(FrameCodecError::FrameTooLarge(len, max)) => {
                log::warn!("peer declared oversized frame {len} > {max}");
                self.fail(ctx, ProtocolErrorCode::ProtocolViolation);
            }
            Err(err) => {
                log::warn!("stream error: {err}");
                ctx.stop();
            }
        }
    }
}

/// Delivers a typed server message to this session's socket.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Deliver(pub ServerMessage);

impl Handler<Deliver> for Session {
    type Result = ();
    fn handle(&mut self, msg: Deliver, _: &mut Self::Context) -> Self::Result {
        self.send_frame(msg.0);
    }
}

/// Sent by [`SessionManager`] when a newer connection for the same user has
/// authenticated, or by [`crate::ban::BanRegistry`] on a fresh ban.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Stop;

impl Handler<Stop> for Session {
    type Result = ();
    fn handle(&mut self, _: Stop, ctx: &mut Self::Context) -> Self::Result {
        ctx.stop();
    }
}

/// Sent by a Room when this session's user is kicked, or when the room the
/// session is in gets closed with members still attached.
#[derive(Message)]
#[rtype(result = "()")]
pub struct KickedFromRoom {
    pub reason: String,
}

impl Handler<KickedFromRoom> for Session {
    type Result = ();
    fn handle(&mut self, msg: KickedFromRoom, _: &mut Self::Context) -> Self::Result {
        self.room = None;
        self.send_frame(ServerMessage::Kicked { reason: msg.reason });
    }
}
