mod admin;
mod ban;
mod codec;
mod config;
mod error;
mod identity;
mod logging;
mod observer;
mod proxy_protocol;
mod room;
mod server;
mod session;

#[actix::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let config_path = std::env::var("ZGM_CONFIG").unwrap_or_else(|_| "config.json".into());
    let config = config::Config::load(&config_path)?;
    log::info!("loaded configuration from {config_path}");

    if config.enable_update_check {
        log::info!("update check enabled (no-op: out of scope for this build)");
    }

    server::run(config).await
}
