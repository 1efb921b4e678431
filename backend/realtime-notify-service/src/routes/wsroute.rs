use crate::state::AppState;
use crate::websocket::WsPeer;
use actix_web::{web, Error, HttpRequest, HttpResponse};

/// Completes the WebSocket handshake and hands the connection to the gateway.
///
/// No authentication and no inbound protocol: the peer only receives.
pub async fn ws_handler(
    req: HttpRequest,
    body: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let (response, session, stream) = actix_ws::handle(&req, body)?;

    let gateway = state.gateway.clone();
    actix_rt::spawn(async move {
        gateway.serve(WsPeer::new(session, stream)).await;
    });

    Ok(response)
}
