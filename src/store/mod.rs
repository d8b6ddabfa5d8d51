//! Persistence boundary.
//!
//! Every multi-step write goes through a [`StoreTx`]: the services open one
//! with [`Store::begin`], pass it explicitly to each step, and finish with
//! [`StoreTx::commit`]. Dropping a transaction without committing rolls it
//! back, so an early `?` return never leaves partial rows behind.
//!
//! Two implementations exist: [`postgres::PgStore`] for production and
//! [`memory::MemoryStore`] for tests and local demos.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::models::{
    Booking, BookingStatus, BookingView, Movie, Screen, Seat, SeatAvailability, Showtime,
    ShowtimeConflict, ShowtimeDetails, Ticket, User,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A uniqueness or exclusion constraint rejected the write.
    #[error("constraint violated: {0}")]
    Conflict(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone)]
pub struct NewTicket {
    pub booking_id: i64,
    pub showtime_id: i64,
    pub seat_id: i64,
    pub price: Decimal,
}

#[derive(Debug, Clone)]
pub struct NewShowtime {
    pub movie_id: i64,
    pub screen_id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// Optional filters for the showtime listing.
#[derive(Debug, Clone, Default)]
pub struct ShowtimeFilter {
    pub movie_id: Option<i64>,
    pub screen_id: Option<i64>,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>>;

    async fn user(&self, user_id: i64) -> StoreResult<Option<User>>;

    /// Seat map of a showtime, `None` when the showtime does not exist.
    async fn seat_map(&self, showtime_id: i64) -> StoreResult<Option<Vec<SeatAvailability>>>;

    async fn booking_view(&self, booking_id: i64) -> StoreResult<Option<BookingView>>;

    /// The user's bookings, newest first.
    async fn user_bookings(&self, user_id: i64) -> StoreResult<Vec<BookingView>>;

    async fn upcoming_showtimes(
        &self,
        after: DateTime<Utc>,
        filter: &ShowtimeFilter,
    ) -> StoreResult<Vec<ShowtimeDetails>>;

    /// Ids of Pending bookings created before `cutoff`.
    async fn stale_pending_bookings(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<i64>>;
}

/// One open database transaction.
#[async_trait]
pub trait StoreTx: Send {
    async fn showtime_details(&mut self, showtime_id: i64) -> StoreResult<Option<ShowtimeDetails>>;

    async fn insert_booking(&mut self, user_id: i64, showtime_id: i64) -> StoreResult<Booking>;

    async fn find_seat(&mut self, screen_id: i64, row: &str, number: i32) -> StoreResult<Option<Seat>>;

    /// Id of the live (Pending or Confirmed) booking holding the seat for
    /// this showtime, if any.
    async fn seat_holder(&mut self, showtime_id: i64, seat_id: i64) -> StoreResult<Option<i64>>;

    /// Fails with [`StoreError::Conflict`] when the seat already has a ticket
    /// for the showtime.
    async fn insert_ticket(&mut self, ticket: NewTicket) -> StoreResult<Ticket>;

    async fn attach_payment_intent(&mut self, booking_id: i64, intent_id: &str) -> StoreResult<()>;

    /// Loads the booking and holds a row lock on it until the transaction ends.
    async fn lock_booking(&mut self, booking_id: i64) -> StoreResult<Option<Booking>>;

    async fn set_booking_status(&mut self, booking_id: i64, status: BookingStatus) -> StoreResult<()>;

    /// Deletes the booking's tickets, returning how many were removed.
    async fn delete_tickets(&mut self, booking_id: i64) -> StoreResult<u64>;

    async fn movie(&mut self, movie_id: i64) -> StoreResult<Option<Movie>>;

    /// Loads the screen and locks it so schedulers of one screen serialize.
    async fn lock_screen(&mut self, screen_id: i64) -> StoreResult<Option<Screen>>;

    /// Loads the showtime and locks it against concurrent edits.
    async fn showtime(&mut self, showtime_id: i64) -> StoreResult<Option<Showtime>>;

    /// Number of tickets sold for the showtime. Tickets only exist for live
    /// bookings.
    async fn live_tickets(&mut self, showtime_id: i64) -> StoreResult<u64>;

    async fn overlapping_showtimes(
        &mut self,
        screen_id: i64,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        exclude_id: Option<i64>,
    ) -> StoreResult<Vec<ShowtimeConflict>>;

    async fn insert_showtime(&mut self, showtime: NewShowtime) -> StoreResult<Showtime>;

    async fn update_showtime(&mut self, showtime_id: i64, showtime: NewShowtime) -> StoreResult<Showtime>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}
