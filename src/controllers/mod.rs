pub mod bookings;
pub mod showtimes;
pub mod webhook;

use axum::Router;
use std::sync::Arc;

pub fn routes() -> Router<Arc<crate::AppState>> {
    Router::new()
        .merge(bookings::routes())
        .merge(showtimes::routes())
        .merge(webhook::routes())
}
