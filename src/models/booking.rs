use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

use super::{SeatType, ShowtimeDetails};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "booking_status")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("booking cannot move from {from} to {to}")]
pub struct InvalidTransition {
    pub from: BookingStatus,
    pub to: BookingStatus,
}

impl BookingStatus {
    /// Pending and Confirmed bookings hold their seats.
    pub fn is_live(self) -> bool {
        !matches!(self, BookingStatus::Cancelled)
    }

    /// The only legal moves are Pending -> Confirmed, Pending -> Cancelled
    /// and Confirmed -> Cancelled. Cancelled is terminal.
    pub fn transition(self, to: BookingStatus) -> Result<BookingStatus, InvalidTransition> {
        use BookingStatus::*;
        match (self, to) {
            (Pending, Confirmed) | (Pending, Cancelled) | (Confirmed, Cancelled) => Ok(to),
            (from, to) => Err(InvalidTransition { from, to }),
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BookingStatus::Pending => "Pending",
            BookingStatus::Confirmed => "Confirmed",
            BookingStatus::Cancelled => "Cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Booking {
    pub id: i64,
    pub user_id: i64,
    pub showtime_id: i64,
    pub created_at: DateTime<Utc>,
    pub status: BookingStatus,
    pub payment_intent_id: Option<String>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Ticket {
    pub id: i64,
    pub booking_id: i64,
    pub showtime_id: i64,
    pub seat_id: i64,
    pub price: Decimal,
}

/// Ticket as shown to the customer.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TicketLine {
    pub id: i64,
    #[serde(skip)]
    pub booking_id: i64,
    #[sqlx(rename = "row_label")]
    pub row: String,
    pub number: i32,
    pub seat_type: SeatType,
    pub price: Decimal,
}

impl TicketLine {
    pub fn seat_label(&self) -> String {
        format!("{}{}", self.row, self.number)
    }
}

/// A booking with everything needed to render it: the showtime it is for and
/// its tickets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingView {
    pub id: i64,
    pub user_id: i64,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
    pub payment_intent_id: Option<String>,
    pub showtime: ShowtimeDetails,
    pub tickets: Vec<TicketLine>,
}

impl BookingView {
    pub fn total_amount(&self) -> Decimal {
        self.tickets.iter().map(|t| t.price).sum()
    }
}
