use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use crate::services::booking::BookingError;
use crate::services::scheduling::SchedulingError;
use crate::services::webhook::WebhookError;
use crate::store::StoreError;

/// Error returned by every handler, rendered as `{"error": message}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "Authentication credentials were not provided or are invalid.")
    }

    pub fn forbidden() -> Self {
        Self::new(StatusCode::FORBIDDEN, "You do not have permission to perform this action.")
    }

    /// Logs the cause and hides it from the client.
    pub fn internal(cause: impl std::fmt::Display) -> Self {
        error!("internal error: {}", cause);
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(_) => Self::new(StatusCode::CONFLICT, err.to_string()),
            StoreError::Database(_) => Self::internal(err),
        }
    }
}

// Every failure of a booking request is a 400 with a readable message,
// except lookups of a missing booking and infrastructure faults.
impl From<BookingError> for ApiError {
    fn from(err: BookingError) -> Self {
        match err {
            BookingError::BookingNotFound(_) => Self::not_found(err.to_string()),
            BookingError::Store(StoreError::Database(_)) => Self::internal(err),
            other => Self::bad_request(other.to_string()),
        }
    }
}

impl From<SchedulingError> for ApiError {
    fn from(err: SchedulingError) -> Self {
        match err {
            SchedulingError::ShowtimeNotFound(_) => Self::not_found(err.to_string()),
            SchedulingError::Store(inner) => inner.into(),
            other => Self::bad_request(other.to_string()),
        }
    }
}

impl From<WebhookError> for ApiError {
    fn from(err: WebhookError) -> Self {
        match err {
            WebhookError::Store(inner) => Self::internal(inner),
            other => Self::bad_request(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn booking_failures_map_to_client_errors() {
        let taken: ApiError = BookingError::SeatTaken { row: "A".into(), number: 1 }.into();
        assert_eq!(taken.status, StatusCode::BAD_REQUEST);
        assert_eq!(taken.message, "Seat A1 is already booked!");

        let cancelled: ApiError = BookingError::AlreadyCancelled.into();
        assert_eq!(cancelled.status, StatusCode::BAD_REQUEST);

        let missing: ApiError = BookingError::BookingNotFound(4).into();
        assert_eq!(missing.status, StatusCode::NOT_FOUND);

        let raced: ApiError = BookingError::Store(StoreError::Conflict("tickets".into())).into();
        assert_eq!(raced.status, StatusCode::BAD_REQUEST);

        // create answers 201 or 400 only, an unknown showtime included
        let unknown: ApiError = BookingError::ShowtimeNotFound(9).into();
        assert_eq!(unknown.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn database_faults_are_hidden() {
        let err: ApiError = StoreError::Database(sqlx::Error::PoolTimedOut).into();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.message, "Internal server error");
    }

    #[test]
    fn webhook_auth_failures_are_bad_requests() {
        let err: ApiError = WebhookError::SignatureInvalid.into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        let err: ApiError = WebhookError::Store(StoreError::Database(sqlx::Error::PoolClosed)).into();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
