use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::collections::HashMap;

use super::{NewShowtime, NewTicket, ShowtimeFilter, Store, StoreError, StoreResult, StoreTx};
use crate::models::{
    Booking, BookingStatus, BookingView, Movie, Screen, Seat, SeatAvailability, SeatType, Showtime,
    ShowtimeConflict, ShowtimeDetails, Ticket, TicketLine, User,
};

macro_rules! showtime_details_sql {
    () => {
        r#"
        SELECT st.id, st.movie_id, m.title AS movie_title, m.duration_minutes, m.base_price,
               st.screen_id, sc.name AS screen_name, th.name AS theater_name,
               st.start_time, st.end_time
        FROM showtimes st
        JOIN movies m ON m.id = st.movie_id
        JOIN screens sc ON sc.id = st.screen_id
        JOIN theaters th ON th.id = sc.theater_id
        "#
    };
}

const BOOKING_COLUMNS: &str = "id, user_id, showtime_id, created_at, status, payment_intent_id";

/// Unique violations (23505) and exclusion violations (23P01) become
/// [`StoreError::Conflict`]; everything else stays a database error.
fn map_write_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() || db.code().as_deref() == Some("23P01") {
            return StoreError::Conflict(db.constraint().unwrap_or("unknown").to_string());
        }
    }
    StoreError::Database(err)
}

#[derive(FromRow)]
struct SeatMapRow {
    row_label: String,
    number: i32,
    seat_type: SeatType,
    taken: bool,
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Attaches showtime details and tickets to a batch of bookings, keeping
    /// the input order.
    async fn assemble(&self, bookings: Vec<Booking>) -> StoreResult<Vec<BookingView>> {
        if bookings.is_empty() {
            return Ok(Vec::new());
        }

        let booking_ids: Vec<i64> = bookings.iter().map(|b| b.id).collect();
        let mut showtime_ids: Vec<i64> = bookings.iter().map(|b| b.showtime_id).collect();
        showtime_ids.sort_unstable();
        showtime_ids.dedup();

        let showtimes: HashMap<i64, ShowtimeDetails> = sqlx::query_as::<_, ShowtimeDetails>(
            concat!(showtime_details_sql!(), " WHERE st.id = ANY($1)"),
        )
        .bind(&showtime_ids)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|s| (s.id, s))
        .collect();

        let mut tickets: HashMap<i64, Vec<TicketLine>> = HashMap::new();
        let lines = sqlx::query_as::<_, TicketLine>(
            r#"
            SELECT t.id, t.booking_id, s.row_label, s.number, s.seat_type, t.price
            FROM tickets t
            JOIN seats s ON s.id = t.seat_id
            WHERE t.booking_id = ANY($1)
            ORDER BY t.id
            "#,
        )
        .bind(&booking_ids)
        .fetch_all(&self.pool)
        .await?;
        for line in lines {
            tickets.entry(line.booking_id).or_default().push(line);
        }

        let mut views = Vec::with_capacity(bookings.len());
        for booking in bookings {
            // showtimes cascade to bookings, so the join cannot miss
            let Some(showtime) = showtimes.get(&booking.showtime_id).cloned() else {
                tracing::warn!(booking_id = booking.id, "booking without showtime skipped");
                continue;
            };
            views.push(BookingView {
                id: booking.id,
                user_id: booking.user_id,
                status: booking.status,
                created_at: booking.created_at,
                payment_intent_id: booking.payment_intent_id,
                showtime,
                tickets: tickets.remove(&booking.id).unwrap_or_default(),
            });
        }
        Ok(views)
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx }))
    }

    async fn user(&self, user_id: i64) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, username, email, is_staff FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn seat_map(&self, showtime_id: i64) -> StoreResult<Option<Vec<SeatAvailability>>> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM showtimes WHERE id = $1)",
        )
        .bind(showtime_id)
        .fetch_one(&self.pool)
        .await?;
        if !exists {
            return Ok(None);
        }

        let rows = sqlx::query_as::<_, SeatMapRow>(
            r#"
            SELECT s.row_label, s.number, s.seat_type,
                   EXISTS(
                       SELECT 1
                       FROM tickets t
                       JOIN bookings b ON b.id = t.booking_id
                       WHERE t.showtime_id = st.id
                         AND t.seat_id = s.id
                         AND b.status <> 'Cancelled'
                   ) AS taken
            FROM showtimes st
            JOIN seats s ON s.screen_id = st.screen_id
            WHERE st.id = $1
            ORDER BY length(s.row_label), s.row_label, s.number
            "#,
        )
        .bind(showtime_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(
            rows.into_iter()
                .map(|r| SeatAvailability {
                    row: r.row_label,
                    number: r.number,
                    seat_type: r.seat_type,
                    status: r.taken.into(),
                })
                .collect(),
        ))
    }

    async fn booking_view(&self, booking_id: i64) -> StoreResult<Option<BookingView>> {
        let booking = sqlx::query_as::<_, Booking>(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1"
        ))
        .bind(booking_id)
        .fetch_optional(&self.pool)
        .await?;

        match booking {
            Some(booking) => Ok(self.assemble(vec![booking]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn user_bookings(&self, user_id: i64) -> StoreResult<Vec<BookingView>> {
        let bookings = sqlx::query_as::<_, Booking>(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE user_id = $1 ORDER BY created_at DESC, id DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        self.assemble(bookings).await
    }

    async fn upcoming_showtimes(
        &self,
        after: DateTime<Utc>,
        filter: &ShowtimeFilter,
    ) -> StoreResult<Vec<ShowtimeDetails>> {
        let showtimes = sqlx::query_as::<_, ShowtimeDetails>(concat!(
            showtime_details_sql!(),
            r#"
            WHERE st.start_time > $1
              AND ($2::BIGINT IS NULL OR st.movie_id = $2)
              AND ($3::BIGINT IS NULL OR st.screen_id = $3)
            ORDER BY st.start_time, st.id
            "#
        ))
        .bind(after)
        .bind(filter.movie_id)
        .bind(filter.screen_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(showtimes)
    }

    async fn stale_pending_bookings(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<i64>> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM bookings WHERE status = 'Pending' AND created_at < $1 ORDER BY id",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }
}

pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgTx {
    async fn showtime_details(&mut self, showtime_id: i64) -> StoreResult<Option<ShowtimeDetails>> {
        // shares the row with other bookings, blocks a reschedule until commit
        let details = sqlx::query_as::<_, ShowtimeDetails>(concat!(
            showtime_details_sql!(),
            " WHERE st.id = $1 FOR SHARE OF st"
        ))
        .bind(showtime_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(details)
    }

    async fn insert_booking(&mut self, user_id: i64, showtime_id: i64) -> StoreResult<Booking> {
        let booking = sqlx::query_as::<_, Booking>(&format!(
            "INSERT INTO bookings (user_id, showtime_id, status) VALUES ($1, $2, $3) RETURNING {BOOKING_COLUMNS}"
        ))
        .bind(user_id)
        .bind(showtime_id)
        .bind(BookingStatus::Pending)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(map_write_error)?;
        Ok(booking)
    }

    async fn find_seat(&mut self, screen_id: i64, row: &str, number: i32) -> StoreResult<Option<Seat>> {
        let seat = sqlx::query_as::<_, Seat>(
            r#"
            SELECT id, screen_id, row_label, number, seat_type
            FROM seats
            WHERE screen_id = $1 AND row_label = $2 AND number = $3
            "#,
        )
        .bind(screen_id)
        .bind(row)
        .bind(number)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(seat)
    }

    async fn seat_holder(&mut self, showtime_id: i64, seat_id: i64) -> StoreResult<Option<i64>> {
        let holder = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT t.booking_id
            FROM tickets t
            JOIN bookings b ON b.id = t.booking_id
            WHERE t.showtime_id = $1 AND t.seat_id = $2 AND b.status <> 'Cancelled'
            LIMIT 1
            "#,
        )
        .bind(showtime_id)
        .bind(seat_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(holder)
    }

    async fn insert_ticket(&mut self, ticket: NewTicket) -> StoreResult<Ticket> {
        let ticket = sqlx::query_as::<_, Ticket>(
            r#"
            INSERT INTO tickets (booking_id, showtime_id, seat_id, price)
            VALUES ($1, $2, $3, $4)
            RETURNING id, booking_id, showtime_id, seat_id, price
            "#,
        )
        .bind(ticket.booking_id)
        .bind(ticket.showtime_id)
        .bind(ticket.seat_id)
        .bind(ticket.price)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(map_write_error)?;
        Ok(ticket)
    }

    async fn attach_payment_intent(&mut self, booking_id: i64, intent_id: &str) -> StoreResult<()> {
        sqlx::query("UPDATE bookings SET payment_intent_id = $2 WHERE id = $1")
            .bind(booking_id)
            .bind(intent_id)
            .execute(&mut *self.tx)
            .await
            .map_err(map_write_error)?;
        Ok(())
    }

    async fn lock_booking(&mut self, booking_id: i64) -> StoreResult<Option<Booking>> {
        let booking = sqlx::query_as::<_, Booking>(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1 FOR UPDATE"
        ))
        .bind(booking_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(booking)
    }

    async fn set_booking_status(&mut self, booking_id: i64, status: BookingStatus) -> StoreResult<()> {
        sqlx::query("UPDATE bookings SET status = $2 WHERE id = $1")
            .bind(booking_id)
            .bind(status)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn delete_tickets(&mut self, booking_id: i64) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM tickets WHERE booking_id = $1")
            .bind(booking_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn movie(&mut self, movie_id: i64) -> StoreResult<Option<Movie>> {
        let movie = sqlx::query_as::<_, Movie>(
            "SELECT id, title, duration_minutes, base_price, release_date, is_active FROM movies WHERE id = $1",
        )
        .bind(movie_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(movie)
    }

    async fn lock_screen(&mut self, screen_id: i64) -> StoreResult<Option<Screen>> {
        let screen = sqlx::query_as::<_, Screen>(
            "SELECT id, theater_id, name, capacity FROM screens WHERE id = $1 FOR UPDATE",
        )
        .bind(screen_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(screen)
    }

    async fn showtime(&mut self, showtime_id: i64) -> StoreResult<Option<Showtime>> {
        let showtime = sqlx::query_as::<_, Showtime>(
            "SELECT id, movie_id, screen_id, start_time, end_time FROM showtimes WHERE id = $1 FOR UPDATE",
        )
        .bind(showtime_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(showtime)
    }

    async fn live_tickets(&mut self, showtime_id: i64) -> StoreResult<u64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM tickets WHERE showtime_id = $1")
            .bind(showtime_id)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn overlapping_showtimes(
        &mut self,
        screen_id: i64,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        exclude_id: Option<i64>,
    ) -> StoreResult<Vec<ShowtimeConflict>> {
        let conflicts = sqlx::query_as::<_, ShowtimeConflict>(
            r#"
            SELECT st.id AS showtime_id, m.title AS movie_title, st.start_time, st.end_time
            FROM showtimes st
            JOIN movies m ON m.id = st.movie_id
            WHERE st.screen_id = $1
              AND st.start_time < $3
              AND st.end_time > $2
              AND ($4::BIGINT IS NULL OR st.id <> $4)
            ORDER BY st.start_time
            "#,
        )
        .bind(screen_id)
        .bind(start_time)
        .bind(end_time)
        .bind(exclude_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(conflicts)
    }

    async fn insert_showtime(&mut self, showtime: NewShowtime) -> StoreResult<Showtime> {
        let showtime = sqlx::query_as::<_, Showtime>(
            r#"
            INSERT INTO showtimes (movie_id, screen_id, start_time, end_time)
            VALUES ($1, $2, $3, $4)
            RETURNING id, movie_id, screen_id, start_time, end_time
            "#,
        )
        .bind(showtime.movie_id)
        .bind(showtime.screen_id)
        .bind(showtime.start_time)
        .bind(showtime.end_time)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(map_write_error)?;
        Ok(showtime)
    }

    async fn update_showtime(&mut self, showtime_id: i64, showtime: NewShowtime) -> StoreResult<Showtime> {
        let showtime = sqlx::query_as::<_, Showtime>(
            r#"
            UPDATE showtimes
            SET movie_id = $2, screen_id = $3, start_time = $4, end_time = $5
            WHERE id = $1
            RETURNING id, movie_id, screen_id, start_time, end_time
            "#,
        )
        .bind(showtime_id)
        .bind(showtime.movie_id)
        .bind(showtime.screen_id)
        .bind(showtime.start_time)
        .bind(showtime.end_time)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(map_write_error)?;
        Ok(showtime)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
