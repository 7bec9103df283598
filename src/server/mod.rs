//! Process wiring: constructs the shared actors (Session Manager, Room
//! Registry, Observer Hub, Ban Registry, Identity Client), runs the raw-TCP
//! accept loop for game clients, and starts the `actix-web::HttpServer`
//! hosting the Observer WebSocket upgrade and the Admin HTTP surface (spec
//! §6). Generalises the teacher's `server::http::start`, which built one
//! `SessionManager` + `RoomManager` pair and bound a single WebSocket route;
//! here the game transport moves to raw TCP while the admin/observer
//! transport keeps the teacher's WebSocket-on-actix-web shape.

pub mod http;

use std::time::Duration;

use actix::prelude::*;
use tokio::net::TcpListener;

use crate::ban::BanRegistry;
use crate::config::Config;
use crate::identity::IdentityClient;
use crate::observer::{AttachCollaborators, ObserverHub};
use crate::room::RoomRegistry;
use crate::session::actor::Session;
use crate::session::SessionManager;

pub async fn run(config: Config) -> anyhow::Result<()> {
    let observer_hub = ObserverHub::new().start();
    let registry = RoomRegistry::new(observer_hub.clone()).start();
    let session_manager = SessionManager::new().start();
    observer_hub.do_send(AttachCollaborators {
        registry: registry.clone(),
        sessions: session_manager.clone(),
    });

    let bans = BanRegistry::new();
    bans.set_whitelists(config.ban_id_whitelist.clone(), config.ban_ip_whitelist.clone());

    let identity = IdentityClient::new(
        config.phira_api_url.clone(),
        config.default_avatar.clone(),
        Duration::from_secs(10),
    );

    if let Some(message) = config.server_announcement.clone() {
        log::info!("server announcement configured: {message}");
    }

    let tcp_addr = config.bind_addr();
    let listener = TcpListener::bind(&tcp_addr).await?;
    log::info!("game protocol listening on {tcp_addr}");

    let max_frame_bytes = config.max_frame_bytes;
    let use_proxy_protocol = config.use_proxy_protocol;
    let accept_registry = registry.clone();
    let accept_sessions = session_manager.clone();
    let accept_identity = identity.clone();
    let accept_bans = bans.clone();

    actix_rt::spawn(async move {
        loop {
            let (socket, peer_addr) = match listener.accept().await {
                Ok(pair) => pair,
                Err(err) => {
                    log::warn!("accept error: {err}");
                    continue;
                }
            };
            let registry = accept_registry.clone();
            let sessions = accept_sessions.clone();
            let identity = accept_identity.clone();
            let bans = accept_bans.clone();
            actix_rt::spawn(async move {
                let (mut read_half, write_half) = tokio::io::split(socket);
                let resolved_addr = if use_proxy_protocol {
                    match crate::proxy_protocol::consume_if_present(&mut read_half).await {
                        Ok(Some(addr)) => addr,
                        Ok(None) => peer_addr,
                        Err(err) => {
                            log::warn!("malformed PROXY protocol header from {peer_addr}: {err}");
                            return;
                        }
                    }
                } else {
                    peer_addr
                };
                Session::spawn(
                    read_half,
                    write_half,
                    resolved_addr,
                    sessions,
                    registry,
                    identity,
                    bans,
                    max_frame_bytes,
                );
            });
        }
    });

    if config.enable_web_server {
        http::start(config, registry, session_manager, observer_hub, bans).await?;
    } else {
        log::info!("web server disabled by configuration; running TCP protocol only");
        std::future::pending::<()>().await;
    }

    Ok(())
}
