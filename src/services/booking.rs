//! Booking transaction engine.
//!
//! A booking is created in a single store transaction: booking row, one
//! ticket per requested seat, payment intent id. Any failure drops the
//! transaction, which rolls everything back, so a rejected request never
//! leaves a half-built booking behind.
//!
//! Seats are never flagged as sold. A seat is taken for a showtime while a
//! ticket for it exists, and the `(showtime_id, seat_id)` unique key on
//! tickets is what actually stops two concurrent requests from both winning.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use validator::Validate;

use crate::models::{Booking, BookingStatus, BookingView, SeatAvailability, TicketLine};
use crate::services::payment::{PaymentError, PaymentProvider};
use crate::services::pricing::PricingPolicy;
use crate::store::{NewTicket, Store, StoreError, StoreTx};

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("Showtime {0} not found.")]
    ShowtimeNotFound(i64),
    #[error("At least one seat must be requested.")]
    NoSeats,
    #[error("Seat {row}{number} was requested more than once.")]
    DuplicateSeat { row: String, number: i32 },
    #[error("Seat {row}{number} does not exist in {screen}")]
    SeatNotFound { row: String, number: i32, screen: String },
    #[error("Seat {row}{number} is already booked!")]
    SeatTaken { row: String, number: i32 },
    #[error("Booking total {0} cannot be charged.")]
    InvalidAmount(Decimal),
    #[error("Payment could not be started: {0}")]
    Payment(#[from] PaymentError),
    #[error("Booking {0} not found.")]
    BookingNotFound(i64),
    #[error("Booking is already cancelled.")]
    AlreadyCancelled,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SeatRequest {
    #[validate(length(min = 1, max = 8, message = "row must not be empty"))]
    pub row: String,
    #[validate(range(min = 1, message = "seat number must be positive"))]
    pub number: i32,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct BookingRequest {
    pub showtime_id: i64,
    #[validate(length(min = 1, message = "at least one seat is required"), nested)]
    pub seats: Vec<SeatRequest>,
}

/// What the client gets back from a successful booking: the booking itself,
/// what it costs and the secret needed to complete payment.
#[derive(Debug, Clone, Serialize)]
pub struct BookingReceipt {
    #[serde(flatten)]
    pub booking: BookingView,
    pub total_amount: Decimal,
    pub client_secret: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Released {
    pub booking_id: i64,
    pub showtime_id: i64,
    pub tickets: u64,
}

#[derive(Clone)]
pub struct BookingService {
    store: Arc<dyn Store>,
    payments: Arc<dyn PaymentProvider>,
    pricing: PricingPolicy,
    currency: String,
}

impl BookingService {
    pub fn new(
        store: Arc<dyn Store>,
        payments: Arc<dyn PaymentProvider>,
        pricing: PricingPolicy,
        currency: impl Into<String>,
    ) -> Self {
        Self { store, payments, pricing, currency: currency.into() }
    }

    pub async fn create_booking(
        &self,
        user_id: i64,
        request: &BookingRequest,
    ) -> Result<BookingReceipt, BookingError> {
        let seats = canonical_seats(&request.seats)?;

        let mut tx = self.store.begin().await?;
        let showtime = tx
            .showtime_details(request.showtime_id)
            .await?
            .ok_or(BookingError::ShowtimeNotFound(request.showtime_id))?;

        let booking = tx.insert_booking(user_id, showtime.id).await?;

        let mut total = Decimal::ZERO;
        let mut lines = Vec::with_capacity(seats.len());
        for wanted in seats {
            let seat = tx
                .find_seat(showtime.screen_id, &wanted.row, wanted.number)
                .await?
                .ok_or_else(|| BookingError::SeatNotFound {
                    row: wanted.row.clone(),
                    number: wanted.number,
                    screen: showtime.screen_name.clone(),
                })?;

            let taken = || BookingError::SeatTaken { row: seat.row.clone(), number: seat.number };
            if tx.seat_holder(showtime.id, seat.id).await?.is_some() {
                return Err(taken());
            }

            let price = self.pricing.price(&showtime, &seat);
            total += price;

            let ticket = tx
                .insert_ticket(NewTicket {
                    booking_id: booking.id,
                    showtime_id: showtime.id,
                    seat_id: seat.id,
                    price,
                })
                .await
                .map_err(|e| match e {
                    // lost the race to a concurrent booking
                    StoreError::Conflict(_) => taken(),
                    other => other.into(),
                })?;

            lines.push(TicketLine {
                id: ticket.id,
                booking_id: booking.id,
                row: seat.row.clone(),
                number: seat.number,
                seat_type: seat.seat_type,
                price: ticket.price,
            });
        }

        let amount_minor = minor_units(total).ok_or(BookingError::InvalidAmount(total))?;
        let intent = self
            .payments
            .create_intent(amount_minor, &self.currency, booking.id)
            .await?;
        tx.attach_payment_intent(booking.id, &intent.id).await?;
        tx.commit().await?;

        info!(
            booking_id = booking.id,
            user_id,
            showtime_id = showtime.id,
            seats = lines.len(),
            total = %total,
            "booking created, awaiting payment"
        );

        Ok(BookingReceipt {
            booking: BookingView {
                id: booking.id,
                user_id,
                status: booking.status,
                created_at: booking.created_at,
                payment_intent_id: Some(intent.id),
                showtime,
                tickets: lines,
            },
            total_amount: total,
            client_secret: intent.client_secret,
        })
    }

    /// Cancels one of the user's bookings and frees its seats.
    pub async fn cancel_booking(&self, user_id: i64, booking_id: i64) -> Result<Released, BookingError> {
        let mut tx = self.store.begin().await?;
        let booking = tx
            .lock_booking(booking_id)
            .await?
            .filter(|b| b.user_id == user_id)
            .ok_or(BookingError::BookingNotFound(booking_id))?;

        let released = cancel_locked(&mut *tx, &booking).await?;
        tx.commit().await?;

        info!(booking_id, user_id, tickets = released.tickets, "booking cancelled");
        Ok(released)
    }

    /// Cancels a booking that is still Pending, leaving anything else alone.
    /// Returns what was released, `None` when the booking was no longer Pending.
    pub async fn expire_booking(&self, booking_id: i64) -> Result<Option<Released>, BookingError> {
        let mut tx = self.store.begin().await?;
        let Some(booking) = tx.lock_booking(booking_id).await? else {
            return Ok(None);
        };
        if booking.status != BookingStatus::Pending {
            return Ok(None);
        }

        let released = cancel_locked(&mut *tx, &booking).await?;
        tx.commit().await?;

        warn!(booking_id, tickets = released.tickets, "pending booking expired without payment");
        Ok(Some(released))
    }

    /// Ids of Pending bookings created before `cutoff`.
    pub async fn stale_pending(&self, cutoff: DateTime<Utc>) -> Result<Vec<i64>, BookingError> {
        Ok(self.store.stale_pending_bookings(cutoff).await?)
    }

    pub async fn seat_map(&self, showtime_id: i64) -> Result<Vec<SeatAvailability>, BookingError> {
        self.store
            .seat_map(showtime_id)
            .await?
            .ok_or(BookingError::ShowtimeNotFound(showtime_id))
    }

    pub async fn user_bookings(&self, user_id: i64) -> Result<Vec<BookingView>, BookingError> {
        Ok(self.store.user_bookings(user_id).await?)
    }

    pub async fn user_booking(&self, user_id: i64, booking_id: i64) -> Result<BookingView, BookingError> {
        self.store
            .booking_view(booking_id)
            .await?
            .filter(|b| b.user_id == user_id)
            .ok_or(BookingError::BookingNotFound(booking_id))
    }
}

async fn cancel_locked(
    tx: &mut dyn StoreTx,
    booking: &Booking,
) -> Result<Released, BookingError> {
    let next = booking
        .status
        .transition(BookingStatus::Cancelled)
        .map_err(|_| BookingError::AlreadyCancelled)?;

    tx.set_booking_status(booking.id, next).await?;
    let tickets = tx.delete_tickets(booking.id).await?;

    Ok(Released { booking_id: booking.id, showtime_id: booking.showtime_id, tickets })
}

/// Sorts the request by (row, number) and rejects repeats.
fn canonical_seats(requested: &[SeatRequest]) -> Result<Vec<SeatRequest>, BookingError> {
    if requested.is_empty() {
        return Err(BookingError::NoSeats);
    }

    let mut seats = requested.to_vec();
    seats.sort_by(|a, b| (a.row.as_str(), a.number).cmp(&(b.row.as_str(), b.number)));

    if let Some(pair) = seats.windows(2).find(|w| w[0].row == w[1].row && w[0].number == w[1].number) {
        return Err(BookingError::DuplicateSeat { row: pair[0].row.clone(), number: pair[0].number });
    }
    Ok(seats)
}

/// Amount in the currency's minor units (cents), rounded half away from zero.
pub fn minor_units(amount: Decimal) -> Option<i64> {
    if amount.is_sign_negative() {
        return None;
    }
    (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{Offset, TimeZone};
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::models::{Movie, Screen, Seat, SeatType, Showtime, ShowtimeConflict, ShowtimeDetails, Ticket, User};
    use crate::services::payment::PaymentIntent;
    use crate::store::{NewShowtime, ShowtimeFilter, StoreResult};

    fn seat(row: &str, number: i32) -> SeatRequest {
        SeatRequest { row: row.into(), number }
    }

    #[test]
    fn seats_are_processed_in_row_then_number_order() {
        let ordered = canonical_seats(&[seat("B", 1), seat("A", 10), seat("A", 2)]).unwrap();
        let labels: Vec<_> = ordered.iter().map(|s| format!("{}{}", s.row, s.number)).collect();
        assert_eq!(labels, ["A2", "A10", "B1"]);
    }

    #[test]
    fn repeated_seat_is_rejected() {
        let err = canonical_seats(&[seat("A", 1), seat("B", 2), seat("A", 1)]).unwrap_err();
        assert!(matches!(err, BookingError::DuplicateSeat { ref row, number: 1 } if row == "A"));
        assert!(matches!(canonical_seats(&[]), Err(BookingError::NoSeats)));
    }

    #[test]
    fn minor_units_round_half_away_from_zero() {
        assert_eq!(minor_units(dec!(30.00)), Some(3000));
        assert_eq!(minor_units(dec!(12.345)), Some(1235));
        assert_eq!(minor_units(dec!(0)), Some(0));
        assert_eq!(minor_units(dec!(-1)), None);
    }

    #[test]
    fn request_validation() {
        let ok = BookingRequest { showtime_id: 1, seats: vec![seat("A", 1)] };
        assert!(ok.validate().is_ok());

        let empty = BookingRequest { showtime_id: 1, seats: vec![] };
        assert!(empty.validate().is_err());

        let bad_seat = BookingRequest { showtime_id: 1, seats: vec![seat("", 0)] };
        let errors = bad_seat.validate().unwrap_err();
        assert!(errors.errors().contains_key("seats"));
    }

    #[test]
    fn seat_request_serializes_as_sent() {
        assert_eq!(serde_json::to_value(seat("A", 1)).unwrap(), serde_json::json!({"row": "A", "number": 1}));
    }

    #[test]
    fn failures_read_as_single_messages() {
        let err = BookingError::SeatNotFound { row: "Z".into(), number: 99, screen: "Screen 1".into() };
        assert_eq!(err.to_string(), "Seat Z99 does not exist in Screen 1");
        let err = BookingError::SeatTaken { row: "A".into(), number: 1 };
        assert_eq!(err.to_string(), "Seat A1 is already booked!");
        assert_eq!(BookingError::AlreadyCancelled.to_string(), "Booking is already cancelled.");
    }

    /// A transaction that saw the seat free but lost the insert to a
    /// concurrent booking that committed in between.
    struct RacingTx;

    #[async_trait]
    impl StoreTx for RacingTx {
        async fn showtime_details(&mut self, showtime_id: i64) -> StoreResult<Option<ShowtimeDetails>> {
            Ok(Some(ShowtimeDetails {
                id: showtime_id,
                movie_id: 1,
                movie_title: "Dune".into(),
                duration_minutes: 120,
                base_price: dec!(10.00),
                screen_id: 1,
                screen_name: "Screen 1".into(),
                theater_name: "Grand Cinema".into(),
                start_time: Utc.with_ymd_and_hms(2030, 6, 1, 18, 0, 0).unwrap(),
                end_time: Utc.with_ymd_and_hms(2030, 6, 1, 20, 15, 0).unwrap(),
            }))
        }

        async fn insert_booking(&mut self, user_id: i64, showtime_id: i64) -> StoreResult<Booking> {
            Ok(Booking {
                id: 7,
                user_id,
                showtime_id,
                created_at: Utc::now(),
                status: BookingStatus::Pending,
                payment_intent_id: None,
            })
        }

        async fn find_seat(&mut self, screen_id: i64, row: &str, number: i32) -> StoreResult<Option<Seat>> {
            Ok(Some(Seat { id: 11, screen_id, row: row.into(), number, seat_type: SeatType::Regular }))
        }

        async fn seat_holder(&mut self, _: i64, _: i64) -> StoreResult<Option<i64>> {
            Ok(None)
        }

        async fn insert_ticket(&mut self, _: NewTicket) -> StoreResult<Ticket> {
            Err(StoreError::Conflict("tickets_showtime_seat_key".into()))
        }

        async fn attach_payment_intent(&mut self, _: i64, _: &str) -> StoreResult<()> {
            unreachable!("payment is attached only after every ticket is in")
        }

        async fn lock_booking(&mut self, _: i64) -> StoreResult<Option<Booking>> {
            unreachable!()
        }

        async fn set_booking_status(&mut self, _: i64, _: BookingStatus) -> StoreResult<()> {
            unreachable!()
        }

        async fn delete_tickets(&mut self, _: i64) -> StoreResult<u64> {
            unreachable!()
        }

        async fn movie(&mut self, _: i64) -> StoreResult<Option<Movie>> {
            unreachable!()
        }

        async fn lock_screen(&mut self, _: i64) -> StoreResult<Option<Screen>> {
            unreachable!()
        }

        async fn showtime(&mut self, _: i64) -> StoreResult<Option<Showtime>> {
            unreachable!()
        }

        async fn live_tickets(&mut self, _: i64) -> StoreResult<u64> {
            unreachable!()
        }

        async fn overlapping_showtimes(
            &mut self,
            _: i64,
            _: DateTime<Utc>,
            _: DateTime<Utc>,
            _: Option<i64>,
        ) -> StoreResult<Vec<ShowtimeConflict>> {
            unreachable!()
        }

        async fn insert_showtime(&mut self, _: NewShowtime) -> StoreResult<Showtime> {
            unreachable!()
        }

        async fn update_showtime(&mut self, _: i64, _: NewShowtime) -> StoreResult<Showtime> {
            unreachable!()
        }

        async fn commit(self: Box<Self>) -> StoreResult<()> {
            unreachable!("a lost race must not commit")
        }
    }

    struct RacingStore;

    #[async_trait]
    impl Store for RacingStore {
        async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
            Ok(Box::new(RacingTx))
        }

        async fn user(&self, _: i64) -> StoreResult<Option<User>> {
            unreachable!()
        }

        async fn seat_map(&self, _: i64) -> StoreResult<Option<Vec<SeatAvailability>>> {
            unreachable!()
        }

        async fn booking_view(&self, _: i64) -> StoreResult<Option<BookingView>> {
            unreachable!()
        }

        async fn user_bookings(&self, _: i64) -> StoreResult<Vec<BookingView>> {
            unreachable!()
        }

        async fn upcoming_showtimes(&self, _: DateTime<Utc>, _: &ShowtimeFilter) -> StoreResult<Vec<ShowtimeDetails>> {
            unreachable!()
        }

        async fn stale_pending_bookings(&self, _: DateTime<Utc>) -> StoreResult<Vec<i64>> {
            unreachable!()
        }
    }

    #[derive(Default)]
    struct CountingPayments(AtomicUsize);

    #[async_trait]
    impl PaymentProvider for CountingPayments {
        async fn create_intent(&self, _: i64, _: &str, booking_id: i64) -> Result<PaymentIntent, PaymentError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(PaymentIntent { id: format!("pi_{booking_id}"), client_secret: "secret".into() })
        }
    }

    #[tokio::test]
    async fn conflict_on_insert_reads_as_seat_taken() {
        let payments = Arc::new(CountingPayments::default());
        let service = BookingService::new(
            Arc::new(RacingStore),
            payments.clone(),
            PricingPolicy::new(Utc.fix()),
            "usd",
        );

        let request = BookingRequest { showtime_id: 3, seats: vec![seat("A", 1)] };
        let err = service.create_booking(1, &request).await.unwrap_err();

        assert!(matches!(err, BookingError::SeatTaken { ref row, number: 1 } if row == "A"));
        assert_eq!(err.to_string(), "Seat A1 is already booked!");
        assert_eq!(payments.0.load(Ordering::SeqCst), 0);
    }
}
