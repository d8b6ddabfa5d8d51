use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Time the screen is blocked after the credits roll.
pub const CLEANING_BUFFER_MINUTES: i64 = 15;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Showtime {
    pub id: i64,
    pub movie_id: i64,
    pub screen_id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl Showtime {
    /// `start + duration + cleaning buffer`. Recomputed on every save.
    pub fn end_time_for(start_time: DateTime<Utc>, duration_minutes: i32) -> DateTime<Utc> {
        start_time
            + Duration::minutes(i64::from(duration_minutes))
            + Duration::minutes(CLEANING_BUFFER_MINUTES)
    }

    /// Half-open interval test: `[a_start, a_end)` against `[b_start, b_end)`.
    pub fn windows_overlap(
        a_start: DateTime<Utc>,
        a_end: DateTime<Utc>,
        b_start: DateTime<Utc>,
        b_end: DateTime<Utc>,
    ) -> bool {
        a_start < b_end && a_end > b_start
    }
}

/// Showtime joined with the catalog data the booking flow needs.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ShowtimeDetails {
    pub id: i64,
    pub movie_id: i64,
    pub movie_title: String,
    pub duration_minutes: i32,
    pub base_price: Decimal,
    pub screen_id: i64,
    pub screen_name: String,
    pub theater_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// An existing showtime that blocks a requested window.
#[derive(Debug, Clone, FromRow, PartialEq, Eq)]
pub struct ShowtimeConflict {
    pub showtime_id: i64,
    pub movie_title: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}
