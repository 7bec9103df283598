//! Admin HTTP surface (spec §6 "Admin HTTP surface", §9 "Admin HTTP as an
//! external collaborator"). A thin `actix-web` adapter: every handler here
//! does nothing but authorize the caller and forward to the same domain
//! operations (`Room`/`RoomRegistry`/`BanRegistry` messages) the protocol
//! path uses, matching the spec's contract that every admin action be
//! expressible as a domain operation with the same semantics as its
//! protocol-path counterpart.

use std::collections::HashSet;
use std::time::Duration;

use actix::Addr;
use actix_web::{web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};

use crate::ban::{BanKind, BanRegistry};
use crate::config::Config;
use crate::identity::UserId;
use crate::observer::ObserverHub;
use crate::room::{actor as room_actor, LookupRoom, RoomId, RoomRegistry};
use crate::session::SessionManager;

#[derive(Clone)]
pub struct AdminState {
    pub config: Config,
    pub registry: Addr<RoomRegistry>,
    pub sessions: Addr<SessionManager>,
    pub observer_hub: Addr<ObserverHub>,
    pub bans: BanRegistry,
}

fn is_authorized(req: &HttpRequest, state: &AdminState) -> bool {
    let Some(expected) = &state.config.admin_token else {
        return false;
    };
    req.headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token == expected)
}

fn forbidden() -> HttpResponse {
    HttpResponse::Forbidden().json(serde_json::json!({ "error": "forbidden" }))
}

macro_rules! require_auth {
    ($req:expr, $state:expr) => {
        if !is_authorized(&$req, &$state) {
            return forbidden();
        }
    };
}

async fn lookup_room(state: &AdminState, room_id: &str) -> Option<Addr<room_actor::Room>> {
    let id: RoomId = crate::room::normalize_room_id(room_id);
    state.registry.send(LookupRoom(id)).await.ok().flatten()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoomIdPayload {
    room_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerMessagePayload {
    room_id: Option<String>,
    message: String,
}

/// `/api/admin/server-message` — broadcasts to one room, or to every room
/// when `roomId` is omitted.
pub async fn server_message(
    req: HttpRequest,
    state: web::Data<AdminState>,
    body: web::Json<ServerMessagePayload>,
) -> HttpResponse {
    require_auth!(req, state);
    match &body.room_id {
        Some(room_id) => match lookup_room(&state, room_id).await {
            Some(room) => {
                room.do_send(room_actor::ServerAnnouncement(body.message.clone()));
                HttpResponse::Ok().finish()
            }
            None => HttpResponse::NotFound().finish(),
        },
        None => {
            if let Ok(rooms) = state.registry.send(crate::room::AllRooms).await {
                for room in rooms {
                    room.do_send(room_actor::ServerAnnouncement(body.message.clone()));
                }
            }
            HttpResponse::Ok().finish()
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct KickPlayerPayload {
    room_id: String,
    user_id: UserId,
}

pub async fn kick_player(
    req: HttpRequest,
    state: web::Data<AdminState>,
    body: web::Json<KickPlayerPayload>,
) -> HttpResponse {
    require_auth!(req, state);
    let Some(room) = lookup_room(&state, &body.room_id).await else {
        return HttpResponse::NotFound().finish();
    };
    match room.send(room_actor::Kick(body.user_id)).await {
        Ok(Ok(())) => HttpResponse::Ok().finish(),
        Ok(Err(err)) => HttpResponse::BadRequest().json(serde_json::json!({ "error": err.to_string() })),
        Err(_) => HttpResponse::InternalServerError().finish(),
    }
}

pub async fn force_start(
    req: HttpRequest,
    state: web::Data<AdminState>,
    body: web::Json<RoomIdPayload>,
) -> HttpResponse {
    require_auth!(req, state);
    let Some(room) = lookup_room(&state, &body.room_id).await else {
        return HttpResponse::NotFound().finish();
    };
    match room.send(room_actor::ForceStart).await {
        Ok(Ok(())) => HttpResponse::Ok().finish(),
        Ok(Err(err)) => HttpResponse::BadRequest().json(serde_json::json!({ "error": err.to_string() })),
        Err(_) => HttpResponse::InternalServerError().finish(),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToggleLockPayload {
    room_id: String,
    locked: bool,
}

pub async fn toggle_lock(
    req: HttpRequest,
    state: web::Data<AdminState>,
    body: web::Json<ToggleLockPayload>,
) -> HttpResponse {
    require_auth!(req, state);
    let Some(room) = lookup_room(&state, &body.room_id).await else {
        return HttpResponse::NotFound().finish();
    };
    room.do_send(room_actor::SetLocked(body.locked));
    HttpResponse::Ok().finish()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetMaxPlayersPayload {
    room_id: String,
    capacity: u8,
}

pub async fn set_max_players(
    req: HttpRequest,
    state: web::Data<AdminState>,
    body: web::Json<SetMaxPlayersPayload>,
) -> HttpResponse {
    require_auth!(req, state);
    let Some(room) = lookup_room(&state, &body.room_id).await else {
        return HttpResponse::NotFound().finish();
    };
    room.do_send(room_actor::SetCapacity(body.capacity));
    HttpResponse::Ok().finish()
}

pub async fn close_room(
    req: HttpRequest,
    state: web::Data<AdminState>,
    body: web::Json<RoomIdPayload>,
) -> HttpResponse {
    require_auth!(req, state);
    let Some(room) = lookup_room(&state, &body.room_id).await else {
        return HttpResponse::NotFound().finish();
    };
    room.do_send(room_actor::CloseRoom);
    HttpResponse::Ok().finish()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToggleModePayload {
    room_id: String,
    cycle_mode: bool,
}

pub async fn toggle_mode(
    req: HttpRequest,
    state: web::Data<AdminState>,
    body: web::Json<ToggleModePayload>,
) -> HttpResponse {
    require_auth!(req, state);
    let Some(room) = lookup_room(&state, &body.room_id).await else {
        return HttpResponse::NotFound().finish();
    };
    room.do_send(room_actor::SetCycleMode(body.cycle_mode));
    HttpResponse::Ok().finish()
}

#[derive(Deserialize)]
struct RoomIdQuery {
    #[serde(rename = "roomId")]
    room_id: String,
}

pub async fn room_blacklist(
    req: HttpRequest,
    state: web::Data<AdminState>,
    query: web::Query<RoomIdQuery>,
) -> HttpResponse {
    require_auth!(req, state);
    let Some(room) = lookup_room(&state, &query.room_id).await else {
        return HttpResponse::NotFound().finish();
    };
    match room.send(room_actor::GetAccessLists).await {
        Ok((blacklist, _)) => HttpResponse::Ok().json(serde_json::json!({ "userIds": blacklist })),
        Err(_) => HttpResponse::InternalServerError().finish(),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetAccessListPayload {
    room_id: String,
    user_ids: HashSet<UserId>,
}

pub async fn set_room_blacklist(
    req: HttpRequest,
    state: web::Data<AdminState>,
    body: web::Json<SetAccessListPayload>,
) -> HttpResponse {
    require_auth!(req, state);
    let Some(room) = lookup_room(&state, &body.room_id).await else {
        return HttpResponse::NotFound().finish();
    };
    room.do_send(room_actor::SetBlacklist(body.user_ids.clone()));
    HttpResponse::Ok().finish()
}

pub async fn room_whitelist(
    req: HttpRequest,
    state: web::Data<AdminState>,
    query: web::Query<RoomIdQuery>,
) -> HttpResponse {
    require_auth!(req, state);
    let Some(room) = lookup_room(&state, &query.room_id).await else {
        return HttpResponse::NotFound().finish();
    };
    match room.send(room_actor::GetAccessLists).await {
        Ok((_, whitelist)) => HttpResponse::Ok().json(serde_json::json!({ "userIds": whitelist })),
        Err(_) => HttpResponse::InternalServerError().finish(),
    }
}

pub async fn set_room_whitelist(
    req: HttpRequest,
    state: web::Data<AdminState>,
    body: web::Json<SetAccessListPayload>,
) -> HttpResponse {
    require_auth!(req, state);
    let Some(room) = lookup_room(&state, &body.room_id).await else {
        return HttpResponse::NotFound().finish();
    };
    room.do_send(room_actor::SetWhitelist(body.user_ids.clone()));
    HttpResponse::Ok().finish()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BanPayload {
    kind: BanPayloadKind,
    target: String,
    reason: String,
    ttl_secs: Option<u64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
enum BanPayloadKind {
    ByUserId,
    ByIp,
}

impl From<BanPayloadKind> for BanKind {
    fn from(kind: BanPayloadKind) -> Self {
        match kind {
            BanPayloadKind::ByUserId => BanKind::ByUserId,
            BanPayloadKind::ByIp => BanKind::ByIp,
        }
    }
}

pub async fn ban(req: HttpRequest, state: web::Data<AdminState>, body: web::Json<BanPayload>) -> HttpResponse {
    require_auth!(req, state);
    let BanPayload { kind, target, reason, ttl_secs } = body.into_inner();
    let ttl = ttl_secs.map(Duration::from_secs);
    state.bans.add(kind.into(), target, ttl, reason, &state.sessions);
    HttpResponse::Ok().finish()
}

#[derive(Serialize)]
struct CheckAuthResponse {
    admin: bool,
}

pub async fn check_auth(req: HttpRequest, state: web::Data<AdminState>) -> HttpResponse {
    HttpResponse::Ok().json(CheckAuthResponse { admin: is_authorized(&req, &state) })
}

#[derive(Serialize)]
struct PlayerSummary {
    user_id: Option<UserId>,
    peer_ip: String,
}

pub async fn all_players(req: HttpRequest, state: web::Data<AdminState>) -> HttpResponse {
    require_auth!(req, state);
    match state.sessions.send(crate::session::ListConnections).await {
        Ok(connections) => {
            let players: Vec<PlayerSummary> = connections
                .into_iter()
                .map(|c| PlayerSummary { user_id: c.user_id, peer_ip: c.peer_ip })
                .collect();
            HttpResponse::Ok().json(players)
        }
        Err(_) => HttpResponse::InternalServerError().finish(),
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/api/admin/server-message").route(web::post().to(server_message)))
        .service(web::resource("/kick-player").route(web::post().to(kick_player)))
        .service(web::resource("/force-start").route(web::post().to(force_start)))
        .service(web::resource("/toggle-lock").route(web::post().to(toggle_lock)))
        .service(web::resource("/set-max-players").route(web::post().to(set_max_players)))
        .service(web::resource("/close-room").route(web::post().to(close_room)))
        .service(web::resource("/toggle-mode").route(web::post().to(toggle_mode)))
        .service(web::resource("/room-blacklist").route(web::get().to(room_blacklist)))
        .service(web::resource("/set-room-blacklist").route(web::post().to(set_room_blacklist)))
        .service(web::resource("/room-whitelist").route(web::get().to(room_whitelist)))
        .service(web::resource("/set-room-whitelist").route(web::post().to(set_room_whitelist)))
        .service(web::resource("/ban").route(web::post().to(ban)))
        .service(web::resource("/check-auth").route(web::get().to(check_auth)))
        .service(web::resource("/api/all-players").route(web::get().to(all_players)));
}
