//! In-memory [`Store`] for tests and local demos.
//!
//! A transaction takes the table lock for its whole lifetime and works on a
//! private copy of the tables, which replaces the shared state on commit.
//! Transactions are therefore fully serialized, and a dropped transaction
//! leaves no trace. Ids come from one shared sequence that, like a Postgres
//! sequence, is not rolled back.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{NewShowtime, NewTicket, ShowtimeFilter, Store, StoreError, StoreResult, StoreTx};
use crate::models::{
    Booking, BookingStatus, BookingView, Movie, Screen, Seat, SeatAvailability, SeatType, Showtime,
    ShowtimeConflict, ShowtimeDetails, Theater, Ticket, TicketLine, User,
};

#[derive(Debug, Default, Clone)]
struct Tables {
    users: BTreeMap<i64, User>,
    movies: BTreeMap<i64, Movie>,
    theaters: BTreeMap<i64, Theater>,
    screens: BTreeMap<i64, Screen>,
    seats: BTreeMap<i64, Seat>,
    showtimes: BTreeMap<i64, Showtime>,
    bookings: BTreeMap<i64, Booking>,
    tickets: BTreeMap<i64, Ticket>,
}

impl Tables {
    fn showtime_details(&self, showtime_id: i64) -> Option<ShowtimeDetails> {
        let showtime = self.showtimes.get(&showtime_id)?;
        let movie = self.movies.get(&showtime.movie_id)?;
        let screen = self.screens.get(&showtime.screen_id)?;
        let theater = self.theaters.get(&screen.theater_id)?;
        Some(ShowtimeDetails {
            id: showtime.id,
            movie_id: movie.id,
            movie_title: movie.title.clone(),
            duration_minutes: movie.duration_minutes,
            base_price: movie.base_price,
            screen_id: screen.id,
            screen_name: screen.name.clone(),
            theater_name: theater.name.clone(),
            start_time: showtime.start_time,
            end_time: showtime.end_time,
        })
    }

    fn seat_holder(&self, showtime_id: i64, seat_id: i64) -> Option<i64> {
        self.tickets
            .values()
            .filter(|t| t.showtime_id == showtime_id && t.seat_id == seat_id)
            .find(|t| {
                self.bookings
                    .get(&t.booking_id)
                    .is_some_and(|b| b.status.is_live())
            })
            .map(|t| t.booking_id)
    }

    fn booking_view(&self, booking: &Booking) -> Option<BookingView> {
        let showtime = self.showtime_details(booking.showtime_id)?;
        let tickets = self
            .tickets
            .values()
            .filter(|t| t.booking_id == booking.id)
            .filter_map(|t| {
                let seat = self.seats.get(&t.seat_id)?;
                Some(TicketLine {
                    id: t.id,
                    booking_id: t.booking_id,
                    row: seat.row.clone(),
                    number: seat.number,
                    seat_type: seat.seat_type,
                    price: t.price,
                })
            })
            .collect();
        Some(BookingView {
            id: booking.id,
            user_id: booking.user_id,
            status: booking.status,
            created_at: booking.created_at,
            payment_intent_id: booking.payment_intent_id.clone(),
            showtime,
            tickets,
        })
    }

    fn showtime_conflicts(
        &self,
        screen_id: i64,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        exclude_id: Option<i64>,
    ) -> Vec<ShowtimeConflict> {
        let mut conflicts: Vec<ShowtimeConflict> = self
            .showtimes
            .values()
            .filter(|s| s.screen_id == screen_id && Some(s.id) != exclude_id)
            .filter(|s| Showtime::windows_overlap(s.start_time, s.end_time, start_time, end_time))
            .map(|s| ShowtimeConflict {
                showtime_id: s.id,
                movie_title: self
                    .movies
                    .get(&s.movie_id)
                    .map(|m| m.title.clone())
                    .unwrap_or_default(),
                start_time: s.start_time,
                end_time: s.end_time,
            })
            .collect();
        conflicts.sort_by_key(|c| c.start_time);
        conflicts
    }

    /// Stands in for the exclusion constraint on `showtimes`.
    fn check_showtime_exclusion(&self, showtime: &NewShowtime, exclude_id: Option<i64>) -> StoreResult<()> {
        if self
            .showtime_conflicts(showtime.screen_id, showtime.start_time, showtime.end_time, exclude_id)
            .is_empty()
        {
            Ok(())
        } else {
            Err(StoreError::Conflict("showtimes_no_overlap".to_string()))
        }
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    ids: Arc<AtomicI64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> i64 {
        self.ids.fetch_add(1, Ordering::Relaxed) + 1
    }

    // --- Seeding ---

    pub async fn add_user(&self, username: &str, email: &str, is_staff: bool) -> User {
        let user = User {
            id: self.next_id(),
            username: username.to_string(),
            email: email.to_string(),
            is_staff,
        };
        self.tables.lock().await.users.insert(user.id, user.clone());
        user
    }

    pub async fn add_theater(&self, name: &str, city: &str) -> Theater {
        let theater = Theater {
            id: self.next_id(),
            name: name.to_string(),
            city: city.to_string(),
        };
        self.tables.lock().await.theaters.insert(theater.id, theater.clone());
        theater
    }

    pub async fn add_screen(&self, theater_id: i64, name: &str, capacity: i32) -> Screen {
        let screen = Screen {
            id: self.next_id(),
            theater_id,
            name: name.to_string(),
            capacity,
        };
        self.tables.lock().await.screens.insert(screen.id, screen.clone());
        screen
    }

    pub async fn add_seat(&self, screen_id: i64, row: &str, number: i32, seat_type: SeatType) -> Seat {
        let seat = Seat {
            id: self.next_id(),
            screen_id,
            row: row.to_string(),
            number,
            seat_type,
        };
        self.tables.lock().await.seats.insert(seat.id, seat.clone());
        seat
    }

    pub async fn add_movie(&self, title: &str, duration_minutes: i32, base_price: Decimal) -> Movie {
        let movie = Movie {
            id: self.next_id(),
            title: title.to_string(),
            duration_minutes,
            base_price,
            release_date: NaiveDate::default(),
            is_active: true,
        };
        self.tables.lock().await.movies.insert(movie.id, movie.clone());
        movie
    }

    /// Inserts a showtime without the scheduling checks.
    pub async fn add_showtime(&self, movie_id: i64, screen_id: i64, start_time: DateTime<Utc>) -> Showtime {
        let mut tables = self.tables.lock().await;
        let duration = tables
            .movies
            .get(&movie_id)
            .map(|m| m.duration_minutes)
            .unwrap_or_default();
        let showtime = Showtime {
            id: self.next_id(),
            movie_id,
            screen_id,
            start_time,
            end_time: Showtime::end_time_for(start_time, duration),
        };
        tables.showtimes.insert(showtime.id, showtime.clone());
        showtime
    }

    // --- Inspection ---

    pub async fn booking(&self, booking_id: i64) -> Option<Booking> {
        self.tables.lock().await.bookings.get(&booking_id).cloned()
    }

    pub async fn booking_count(&self) -> usize {
        self.tables.lock().await.bookings.len()
    }

    pub async fn ticket_count(&self) -> usize {
        self.tables.lock().await.tickets.len()
    }

    pub async fn showtimes_on_screen(&self, screen_id: i64) -> Vec<Showtime> {
        self.tables
            .lock()
            .await
            .showtimes
            .values()
            .filter(|s| s.screen_id == screen_id)
            .cloned()
            .collect()
    }

    /// Moves a booking's creation time, for expiry tests.
    pub async fn backdate_booking(&self, booking_id: i64, created_at: DateTime<Utc>) {
        if let Some(booking) = self.tables.lock().await.bookings.get_mut(&booking_id) {
            booking.created_at = created_at;
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let guard = self.tables.clone().lock_owned().await;
        let work = guard.clone();
        Ok(Box::new(MemoryTx {
            guard,
            work,
            ids: self.ids.clone(),
        }))
    }

    async fn user(&self, user_id: i64) -> StoreResult<Option<User>> {
        Ok(self.tables.lock().await.users.get(&user_id).cloned())
    }

    async fn seat_map(&self, showtime_id: i64) -> StoreResult<Option<Vec<SeatAvailability>>> {
        let tables = self.tables.lock().await;
        let Some(showtime) = tables.showtimes.get(&showtime_id) else {
            return Ok(None);
        };
        let mut seats: Vec<&Seat> = tables
            .seats
            .values()
            .filter(|s| s.screen_id == showtime.screen_id)
            .collect();
        seats.sort_by(|a, b| {
            (a.row.len(), &a.row, a.number).cmp(&(b.row.len(), &b.row, b.number))
        });
        Ok(Some(
            seats
                .into_iter()
                .map(|s| SeatAvailability {
                    row: s.row.clone(),
                    number: s.number,
                    seat_type: s.seat_type,
                    status: tables.seat_holder(showtime_id, s.id).is_some().into(),
                })
                .collect(),
        ))
    }

    async fn booking_view(&self, booking_id: i64) -> StoreResult<Option<BookingView>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .bookings
            .get(&booking_id)
            .and_then(|b| tables.booking_view(b)))
    }

    async fn user_bookings(&self, user_id: i64) -> StoreResult<Vec<BookingView>> {
        let tables = self.tables.lock().await;
        let mut bookings: Vec<&Booking> = tables
            .bookings
            .values()
            .filter(|b| b.user_id == user_id)
            .collect();
        bookings.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(bookings
            .into_iter()
            .filter_map(|b| tables.booking_view(b))
            .collect())
    }

    async fn upcoming_showtimes(
        &self,
        after: DateTime<Utc>,
        filter: &ShowtimeFilter,
    ) -> StoreResult<Vec<ShowtimeDetails>> {
        let tables = self.tables.lock().await;
        let mut showtimes: Vec<ShowtimeDetails> = tables
            .showtimes
            .values()
            .filter(|s| s.start_time > after)
            .filter(|s| filter.movie_id.map_or(true, |id| s.movie_id == id))
            .filter(|s| filter.screen_id.map_or(true, |id| s.screen_id == id))
            .filter_map(|s| tables.showtime_details(s.id))
            .collect();
        showtimes.sort_by_key(|s| (s.start_time, s.id));
        Ok(showtimes)
    }

    async fn stale_pending_bookings(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<i64>> {
        Ok(self
            .tables
            .lock()
            .await
            .bookings
            .values()
            .filter(|b| b.status == BookingStatus::Pending && b.created_at < cutoff)
            .map(|b| b.id)
            .collect())
    }
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<Tables>,
    work: Tables,
    ids: Arc<AtomicI64>,
}

impl MemoryTx {
    fn next_id(&self) -> i64 {
        self.ids.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn showtime_details(&mut self, showtime_id: i64) -> StoreResult<Option<ShowtimeDetails>> {
        Ok(self.work.showtime_details(showtime_id))
    }

    async fn insert_booking(&mut self, user_id: i64, showtime_id: i64) -> StoreResult<Booking> {
        let booking = Booking {
            id: self.next_id(),
            user_id,
            showtime_id,
            created_at: Utc::now(),
            status: BookingStatus::Pending,
            payment_intent_id: None,
        };
        self.work.bookings.insert(booking.id, booking.clone());
        Ok(booking)
    }

    async fn find_seat(&mut self, screen_id: i64, row: &str, number: i32) -> StoreResult<Option<Seat>> {
        Ok(self
            .work
            .seats
            .values()
            .find(|s| s.screen_id == screen_id && s.row == row && s.number == number)
            .cloned())
    }

    async fn seat_holder(&mut self, showtime_id: i64, seat_id: i64) -> StoreResult<Option<i64>> {
        Ok(self.work.seat_holder(showtime_id, seat_id))
    }

    async fn insert_ticket(&mut self, ticket: NewTicket) -> StoreResult<Ticket> {
        // same two unique keys as the tickets table
        for existing in self.work.tickets.values() {
            if existing.showtime_id == ticket.showtime_id && existing.seat_id == ticket.seat_id {
                return Err(StoreError::Conflict("tickets_showtime_seat_key".to_string()));
            }
            if existing.booking_id == ticket.booking_id && existing.seat_id == ticket.seat_id {
                return Err(StoreError::Conflict("tickets_booking_seat_key".to_string()));
            }
        }
        let ticket = Ticket {
            id: self.next_id(),
            booking_id: ticket.booking_id,
            showtime_id: ticket.showtime_id,
            seat_id: ticket.seat_id,
            price: ticket.price,
        };
        self.work.tickets.insert(ticket.id, ticket.clone());
        Ok(ticket)
    }

    async fn attach_payment_intent(&mut self, booking_id: i64, intent_id: &str) -> StoreResult<()> {
        if let Some(booking) = self.work.bookings.get_mut(&booking_id) {
            booking.payment_intent_id = Some(intent_id.to_string());
        }
        Ok(())
    }

    async fn lock_booking(&mut self, booking_id: i64) -> StoreResult<Option<Booking>> {
        Ok(self.work.bookings.get(&booking_id).cloned())
    }

    async fn set_booking_status(&mut self, booking_id: i64, status: BookingStatus) -> StoreResult<()> {
        if let Some(booking) = self.work.bookings.get_mut(&booking_id) {
            booking.status = status;
        }
        Ok(())
    }

    async fn delete_tickets(&mut self, booking_id: i64) -> StoreResult<u64> {
        let before = self.work.tickets.len();
        self.work.tickets.retain(|_, t| t.booking_id != booking_id);
        Ok((before - self.work.tickets.len()) as u64)
    }

    async fn movie(&mut self, movie_id: i64) -> StoreResult<Option<Movie>> {
        Ok(self.work.movies.get(&movie_id).cloned())
    }

    async fn lock_screen(&mut self, screen_id: i64) -> StoreResult<Option<Screen>> {
        Ok(self.work.screens.get(&screen_id).cloned())
    }

    async fn showtime(&mut self, showtime_id: i64) -> StoreResult<Option<Showtime>> {
        Ok(self.work.showtimes.get(&showtime_id).cloned())
    }

    async fn live_tickets(&mut self, showtime_id: i64) -> StoreResult<u64> {
        Ok(self
            .work
            .tickets
            .values()
            .filter(|t| t.showtime_id == showtime_id)
            .count() as u64)
    }

    async fn overlapping_showtimes(
        &mut self,
        screen_id: i64,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        exclude_id: Option<i64>,
    ) -> StoreResult<Vec<ShowtimeConflict>> {
        Ok(self
            .work
            .showtime_conflicts(screen_id, start_time, end_time, exclude_id))
    }

    async fn insert_showtime(&mut self, showtime: NewShowtime) -> StoreResult<Showtime> {
        self.work.check_showtime_exclusion(&showtime, None)?;
        let showtime = Showtime {
            id: self.next_id(),
            movie_id: showtime.movie_id,
            screen_id: showtime.screen_id,
            start_time: showtime.start_time,
            end_time: showtime.end_time,
        };
        self.work.showtimes.insert(showtime.id, showtime.clone());
        Ok(showtime)
    }

    async fn update_showtime(&mut self, showtime_id: i64, showtime: NewShowtime) -> StoreResult<Showtime> {
        self.work.check_showtime_exclusion(&showtime, Some(showtime_id))?;
        let updated = Showtime {
            id: showtime_id,
            movie_id: showtime.movie_id,
            screen_id: showtime.screen_id,
            start_time: showtime.start_time,
            end_time: showtime.end_time,
        };
        self.work.showtimes.insert(showtime_id, updated.clone());
        Ok(updated)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryTx { mut guard, work, .. } = *self;
        *guard = work;
        Ok(())
    }
}
