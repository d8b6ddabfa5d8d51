use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "seat_type")]
pub enum SeatType {
    Regular,
    Premium,
    #[serde(rename = "VIP")]
    #[sqlx(rename = "VIP")]
    Vip,
}

impl fmt::Display for SeatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeatType::Regular => f.write_str("Regular"),
            SeatType::Premium => f.write_str("Premium"),
            SeatType::Vip => f.write_str("VIP"),
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Seat {
    pub id: i64,
    pub screen_id: i64,
    #[sqlx(rename = "row_label")]
    pub row: String,
    pub number: i32,
    pub seat_type: SeatType,
}

impl Seat {
    /// Human label such as `A1`.
    pub fn label(&self) -> String {
        format!("{}{}", self.row, self.number)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeatStatus {
    Available,
    Taken,
}

/// One entry of a showtime's seat map. Availability is never stored: a seat
/// is taken exactly while a ticket of a live booking references it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeatAvailability {
    pub row: String,
    pub number: i32,
    pub seat_type: SeatType,
    pub status: SeatStatus,
}

impl From<bool> for SeatStatus {
    fn from(taken: bool) -> Self {
        if taken {
            SeatStatus::Taken
        } else {
            SeatStatus::Available
        }
    }
}
