//! Session bookkeeping: the `SessionManager` actor tracks every live TCP
//! connection and the (at most one) authenticated user behind it, so a
//! reconnect can be recognised and a ban can be enforced against an
//! already-open socket (spec §4.3, §4.4). Generalises the teacher's
//! `Server`/session-manager split (a `sessions` map keyed by transient id
//! plus an inverted `UserId -> TransientId` map) from WebSocket sessions to
//! raw-TCP ones.

pub mod actor;

use std::collections::HashMap;

use actix::prelude::*;

use crate::ban::BanKind;
use crate::identity::UserId;
use actor::Session;

/// Identifies a single TCP connection for its lifetime. Not persisted and
/// unrelated to `UserId` — a user reconnecting gets a new `TransientId`.
pub type TransientId = u64;

pub struct ConnectionInfo {
    pub transient_id: TransientId,
    pub user_id: Option<UserId>,
    pub peer_ip: String,
}

struct ConnectionEntry {
    addr: Addr<Session>,
    user_id: Option<UserId>,
    peer_ip: String,
}

pub struct SessionManager {
    connections: HashMap<TransientId, ConnectionEntry>,
    by_user: HashMap<UserId, TransientId>,
    next_id: TransientId,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            connections: HashMap::new(),
            by_user: HashMap::new(),
            next_id: 0,
        }
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Actor for SessionManager {
    type Context = Context<Self>;
}

#[derive(Message)]
#[rtype(result = "TransientId")]
pub struct Connected {
    pub addr: Addr<Session>,
    pub peer_ip: String,
}

impl Handler<Connected> for SessionManager {
    type Result = TransientId;
    fn handle(&mut self, msg: Connected, _: &mut Self::Context) -> Self::Result {
        let id = self.next_id;
        self.next_id += 1;
        self.connections.insert(
            id,
            ConnectionEntry {
                addr: msg.addr,
                user_id: None,
                peer_ip: msg.peer_ip,
            },
        );
        id
    }
}

/// Sent once a session's Authenticate handshake succeeds. If the same user
/// already has a live connection, the older one is told to stop (spec §4.4:
/// a fresh connection for an already-connected identity replaces the old
/// one rather than being rejected).
#[derive(Message)]
#[rtype(result = "()")]
pub struct Authenticated {
    pub transient_id: TransientId,
    pub user_id: UserId,
}

impl Handler<Authenticated> for SessionManager {
    type Result = ();
    fn handle(&mut self, msg: Authenticated, _: &mut Self::Context) -> Self::Result {
        if let Some(prev_transient) = self.by_user.insert(msg.user_id, msg.transient_id) {
            if prev_transient != msg.transient_id {
                if let Some(prev) = self.connections.remove(&prev_transient) {
                    prev.addr.do_send(actor::Stop);
                }
            }
        }
        if let Some(entry) = self.connections.get_mut(&msg.transient_id) {
            entry.user_id = Some(msg.user_id);
        }
    }
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Disconnected {
    pub transient_id: TransientId,
}

impl Handler<Disconnected> for SessionManager {
    type Result = ();
    fn handle(&mut self, msg: Disconnected, _: &mut Self::Context) -> Self::Result {
        if let Some(entry) = self.connections.remove(&msg.transient_id) {
            if let Some(user_id) = entry.user_id {
                if self.by_user.get(&user_id) == Some(&msg.transient_id) {
                    self.by_user.remove(&user_id);
                }
            }
        }
    }
}

/// Sent by [`crate::ban::BanRegistry`] when a new ban is recorded, so any
/// already-open connection matching it is terminated immediately rather
/// than waiting for its next action to hit the ban check.
#[derive(Message)]
#[rtype(result = "()")]
pub struct TerminateBanned {
    pub kind: BanKind,
    pub target: String,
}

impl Handler<TerminateBanned> for SessionManager {
    type Result = ();
    fn handle(&mut self, msg: TerminateBanned, _: &mut Self::Context) -> Self::Result {
        let matches: Vec<Addr<Session>> = match msg.kind {
            BanKind::ByUserId => {
                let Ok(uid) = msg.target.parse::<UserId>() else {
                    return;
                };
                self.connections
                    .values()
                    .filter(|e| e.user_id == Some(uid))
                    .map(|e| e.addr.clone())
                    .collect()
            }
            BanKind::ByIp => self
                .connections
                .values()
                .filter(|e| e.peer_ip == msg.target)
                .map(|e| e.addr.clone())
                .collect(),
        };
        for addr in matches {
            addr.do_send(actor::Stop);
        }
    }
}

#[derive(Message)]
#[rtype(result = "Vec<ConnectionInfo>")]
pub struct ListConnections;

impl Handler<ListConnections> for SessionManager {
    type Result = Vec<ConnectionInfo>;
    fn handle(&mut self, _: ListConnections, _: &mut Self::Context) -> Self::Result {
        self.connections
            .iter()
            .map(|(id, e)| ConnectionInfo {
                transient_id: *id,
                user_id: e.user_id,
                peer_ip: e.peer_ip.clone(),
            })
            .collect()
    }
}

#[derive(Message)]
#[rtype(result = "usize")]
pub struct ConnectionCount;

impl Handler<ConnectionCount> for SessionManager {
    type Result = usize;
    fn handle(&mut self, _: ConnectionCount, _: &mut Self::Context) -> Self::Result {
        self.connections.len()
    }
}
