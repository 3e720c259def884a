use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use glint_types::StreamId;
use glint_types::api::{Claims, StartStreamRequest};
use glint_types::models::MediaKind;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    50
}

impl RecentQuery {
    fn limit(&self) -> u32 {
        self.limit.clamp(1, 200)
    }
}

pub async fn live_video(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.gateway.rooms.live_streams(MediaKind::Video).await?))
}

pub async fn live_audio(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.gateway.rooms.live_streams(MediaKind::Audio).await?))
}

pub async fn start_stream(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<StartStreamRequest>,
) -> ApiResult<impl IntoResponse> {
    let stream = state
        .gateway
        .rooms
        .start_stream(claims.sub, req.media, req.stream_url)
        .await?;
    Ok((StatusCode::CREATED, Json(stream)))
}

pub async fn end_stream(
    State(state): State<AppState>,
    Path(stream_id): Path<StreamId>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    state.gateway.rooms.end_stream(stream_id, claims.sub).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn stream_gifts(
    State(state): State<AppState>,
    Path(stream_id): Path<StreamId>,
    Query(query): Query<RecentQuery>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.gateway.gifts.ledger(stream_id, query.limit()).await?))
}

pub async fn stream_comments(
    State(state): State<AppState>,
    Path(stream_id): Path<StreamId>,
    Query(query): Query<RecentQuery>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.gateway.rooms.recent_comments(stream_id, query.limit()).await?))
}

pub async fn gift_catalog(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.gateway.gifts.catalog().await?))
}
