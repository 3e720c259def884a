use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{delete, get, post},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use glint_api::middleware::{decode_token, require_auth};
use glint_api::state::AppState;
use glint_api::{chats, lives};
use glint_gateway::connection;

#[derive(Debug, Deserialize)]
pub struct GatewayQuery {
    token: String,
}

pub fn router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/chats", post(chats::create_conversation))
        .route("/chats/requests", get(chats::pending_requests))
        .route("/chats/active", get(chats::active_conversations))
        .route("/chats/history", get(chats::history))
        .route("/chats/{id}", get(chats::get_conversation).delete(chats::delete_conversation))
        .route("/chats/{id}/messages", get(chats::get_messages).post(chats::send_message))
        .route("/chats/{id}/search", get(chats::search_messages))
        .route("/chats/{id}/accept", post(chats::accept))
        .route("/chats/{id}/reject", post(chats::reject))
        .route("/chats/{id}/block", post(chats::block))
        .route("/chats/{id}/unblock", post(chats::unblock))
        .route("/chats/{id}/archive", post(chats::toggle_archive))
        .route("/chats/{id}/read", post(chats::mark_read))
        .route("/chats/{id}/messages/{message_id}", delete(chats::delete_message))
        .route("/chats/{id}/messages/{message_id}/reactions", post(chats::toggle_reaction))
        .route("/lives", post(lives::start_stream))
        .route("/lives/video", get(lives::live_video))
        .route("/lives/audio", get(lives::live_audio))
        .route("/lives/{stream_id}/end", post(lives::end_stream))
        .route("/lives/{stream_id}/gifts", get(lives::stream_gifts))
        .route("/lives/{stream_id}/comments", get(lives::stream_comments))
        .route("/gifts", get(lives::gift_catalog))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state.clone());

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state);

    Router::new()
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// The token is checked before the upgrade, so the connection loop starts
/// already authenticated.
async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<GatewayQuery>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, StatusCode> {
    let claims = decode_token(&query.token, &state.jwt_secret).ok_or_else(|| {
        warn!("Rejected gateway upgrade with an invalid token");
        StatusCode::UNAUTHORIZED
    })?;

    let gateway = state.gateway.clone();
    Ok(ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, gateway, claims.sub, claims.username)
    }))
}
