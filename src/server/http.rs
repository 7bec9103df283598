use actix::Addr;
use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
use actix_web_actors::ws;

use crate::admin::{self, AdminState};
use crate::ban::BanRegistry;
use crate::config::Config;
use crate::observer::{ObserverHub, ObserverSession};
use crate::room::RoomRegistry;
use crate::session::SessionManager;

async fn observer_socket(
    req: HttpRequest,
    payload: web::Payload,
    hub: web::Data<Addr<ObserverHub>>,
) -> actix_web::Result<HttpResponse> {
    ws::start(ObserverSession::new(hub.get_ref().clone()), &req, payload)
}

pub async fn start(
    config: Config,
    registry: Addr<RoomRegistry>,
    sessions: Addr<SessionManager>,
    observer_hub: Addr<ObserverHub>,
    bans: BanRegistry,
) -> std::io::Result<()> {
    let admin_state = AdminState {
        config: config.clone(),
        registry,
        sessions,
        observer_hub: observer_hub.clone(),
        bans,
    };
    let web_addr = format!("{}:{}", config.host, config.port as u32 + 1);
    log::info!("admin/observer web server listening on {web_addr}");

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(observer_hub.clone()))
            .app_data(web::Data::new(admin_state.clone()))
            .route("/observer", web::get().to(observer_socket))
            .configure(admin::configure)
    })
    .bind(web_addr)?
    .run()
    .await
}
