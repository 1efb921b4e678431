use crate::services::LinkState;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health() -> &'static str {
    "OK"
}

/// Ready only while the upstream subscription is live.
pub async fn ready(state: web::Data<AppState>) -> HttpResponse {
    let upstream = state.subscription.state();
    let peers = state.registry.len().await;
    let body = json!({ "upstream": upstream, "peers": peers });

    if upstream == LinkState::Subscribed {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::ServiceUnavailable().json(body)
    }
}
