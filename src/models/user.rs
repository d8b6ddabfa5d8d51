use serde::Serialize;
use sqlx::FromRow;

/// Account record. Registration and credentials live in the auth service;
/// this crate only needs enough to address a ticket email.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub is_staff: bool,
}
