use actix_web::{web, App, HttpServer};
use realtime_notify_service::{
    config, error, logging, routes,
    services::{Dispatcher, PgNotificationSource, SubscriptionManager},
    state::AppState,
    websocket::{ConnectionRegistry, Gateway},
};
use std::sync::Arc;

#[actix_web::main]
async fn main() -> Result<(), error::AppError> {
    logging::init_tracing();

    let cfg = Arc::new(config::Config::from_env()?);
    tracing::info!(
        port = cfg.port,
        ws_path = %cfg.ws_path,
        channels = ?cfg.subscription.channels,
        "starting realtime-notify-service"
    );

    let registry = ConnectionRegistry::new();
    let gateway = Gateway::new(registry.clone(), cfg.peer_buffer);
    let dispatcher = Arc::new(Dispatcher::new(cfg.event_types.clone(), registry.clone()));

    let source = Arc::new(PgNotificationSource::new(&cfg.database_url)?);
    let subscription = Arc::new(SubscriptionManager::new(cfg.subscription.clone(), source));
    subscription.on_notification(dispatcher);
    subscription.start();

    let state = AppState {
        config: cfg.clone(),
        registry: registry.clone(),
        gateway,
        subscription: subscription.clone(),
    };

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    let ws_path = cfg.ws_path.clone();
    tracing::info!("listening on {bind_addr}");

    // actix-web server futures are not Send; run in the foreground
    let server = HttpServer::new(move || {
        let ws_path = ws_path.clone();
        App::new()
            .app_data(web::Data::new(state.clone()))
            .configure(move |c| routes::configure(c, &ws_path))
    })
    .bind(&bind_addr)
    .map_err(|e| error::AppError::StartServer(format!("bind {bind_addr}: {e}")))?
    .run();

    let result = server
        .await
        .map_err(|e| error::AppError::StartServer(format!("HTTP server: {e}")));

    tracing::info!("shutting down");
    subscription.stop().await;
    registry.clear().await;

    result
}
