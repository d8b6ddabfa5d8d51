use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Movie {
    pub id: i64,
    pub title: String,
    /// Running time in minutes.
    pub duration_minutes: i32,
    pub base_price: Decimal,
    pub release_date: NaiveDate,
    pub is_active: bool,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Theater {
    pub id: i64,
    pub name: String,
    pub city: String,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Screen {
    pub id: i64,
    pub theater_id: i64,
    pub name: String,
    pub capacity: i32,
}
