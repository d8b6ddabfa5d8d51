use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;

use crate::cache::SeatMapLookup;
use crate::error::ApiError;
use crate::middleware::AdminUser;
use crate::services::booking::BookingError;
use crate::services::scheduling::{ShowtimeChanges, ShowtimeDraft};
use crate::store::ShowtimeFilter;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/showtimes", get(list_showtimes).post(create_showtime))
        .route("/showtimes/{id}", patch(update_showtime))
        .route("/showtimes/{id}/seats", get(seat_map))
        .route("/showtimes/{id}/seats/", get(seat_map))
}

/* ---------- SHOWTIMES ---------- */

#[derive(Debug, Deserialize)]
struct ShowtimeQuery {
    movie: Option<i64>,
    screen: Option<i64>,
}

// GET /api/showtimes?movie=&screen=
async fn list_showtimes(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ShowtimeQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = ShowtimeFilter { movie_id: query.movie, screen_id: query.screen };
    let showtimes = state.store.upcoming_showtimes(Utc::now(), &filter).await?;
    Ok(Json(showtimes))
}

#[derive(Debug, Deserialize)]
struct CreateShowtimeRequest {
    movie_id: i64,
    screen_id: i64,
    start_time: DateTime<Utc>,
}

// POST /api/showtimes (staff)
async fn create_showtime(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    payload: Result<Json<CreateShowtimeRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;
    tracing::info!(user_id = admin.user_id, "scheduling showtime");

    let showtime = state
        .scheduling
        .schedule_showtime(ShowtimeDraft {
            movie_id: req.movie_id,
            screen_id: req.screen_id,
            start_time: req.start_time,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(showtime)))
}

#[derive(Debug, Deserialize)]
struct UpdateShowtimeRequest {
    movie_id: Option<i64>,
    screen_id: Option<i64>,
    start_time: Option<DateTime<Utc>>,
}

// PATCH /api/showtimes/{id} (staff)
async fn update_showtime(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(showtime_id): Path<i64>,
    payload: Result<Json<UpdateShowtimeRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;
    tracing::info!(user_id = admin.user_id, showtime_id, "rescheduling showtime");

    let showtime = state
        .scheduling
        .reschedule_showtime(
            showtime_id,
            ShowtimeChanges {
                movie_id: req.movie_id,
                screen_id: req.screen_id,
                start_time: req.start_time,
            },
        )
        .await?;

    Ok(Json(showtime))
}

// GET /api/showtimes/{id}/seats
async fn seat_map(
    State(state): State<Arc<AppState>>,
    Path(showtime_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let generation = match state.cache.seat_map(showtime_id).await {
        SeatMapLookup::Hit(seats) => return Ok(Json(seats)),
        SeatMapLookup::Miss(generation) => generation,
    };

    let seats = state.bookings.seat_map(showtime_id).await.map_err(|e| match e {
        BookingError::ShowtimeNotFound(_) => ApiError::not_found("Showtime not found."),
        other => other.into(),
    })?;
    state.cache.save_seat_map(showtime_id, generation, &seats).await;

    Ok(Json(seats))
}
