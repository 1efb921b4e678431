pub mod health;
pub mod wsroute;

use actix_web::web;

/// Mounts the WebSocket upgrade on `ws_path` plus the operational endpoints.
/// Any other path falls through to actix's default 404.
pub fn configure(cfg: &mut web::ServiceConfig, ws_path: &str) {
    cfg.route(ws_path, web::get().to(wsroute::ws_handler))
        .route("/health", web::get().to(health::health))
        .route("/ready", web::get().to(health::ready))
        .route("/metrics", web::get().to(crate::metrics::serve_metrics));
}
