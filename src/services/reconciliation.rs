//! Applies payment provider events to bookings.
//!
//! Only `payment_intent.succeeded` moves state, and only Pending -> Confirmed.
//! The booking row is locked before its status is read, so a delivery that
//! races its own retry confirms once and mails once. Everything the provider
//! sends that cannot be applied is still acknowledged: answering with an
//! error would only make the provider retry something that will never apply.

use chrono::{FixedOffset, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::models::{BookingStatus, BookingView, User};
use crate::services::notifier::{Notifier, TicketEmail};
use crate::services::webhook::{WebhookError, WebhookEvent, WebhookVerifier, PAYMENT_SUCCEEDED};
use crate::store::Store;

/// How a verified delivery was handled. All of these are acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciled {
    Confirmed { booking_id: i64 },
    AlreadyConfirmed { booking_id: i64 },
    Ignored { event_type: String },
    BookingMissing,
    NotConfirmable { booking_id: i64, status: BookingStatus },
    IntentMismatch { booking_id: i64 },
}

#[derive(Clone)]
pub struct PaymentReconciler {
    store: Arc<dyn Store>,
    verifier: WebhookVerifier,
    notifier: Arc<dyn Notifier>,
    venue_offset: FixedOffset,
}

impl PaymentReconciler {
    pub fn new(
        store: Arc<dyn Store>,
        verifier: WebhookVerifier,
        notifier: Arc<dyn Notifier>,
        venue_offset: FixedOffset,
    ) -> Self {
        Self { store, verifier, notifier, venue_offset }
    }

    /// Verifies and applies one raw webhook delivery.
    pub async fn handle_webhook(&self, payload: &[u8], signature: Option<&str>) -> Result<Reconciled, WebhookError> {
        let event = self.verifier.verify(payload, signature, Utc::now().timestamp())?;
        self.apply(&event).await
    }

    pub async fn apply(&self, event: &WebhookEvent) -> Result<Reconciled, WebhookError> {
        if event.event_type != PAYMENT_SUCCEEDED {
            info!(event_id = %event.id, event_type = %event.event_type, "webhook event ignored");
            return Ok(Reconciled::Ignored { event_type: event.event_type.clone() });
        }

        let Some(booking_id) = event.booking_id() else {
            warn!(event_id = %event.id, intent_id = %event.intent_id(), "payment succeeded without a booking id");
            return Ok(Reconciled::BookingMissing);
        };

        let mut tx = self.store.begin().await?;
        let Some(booking) = tx.lock_booking(booking_id).await? else {
            warn!(event_id = %event.id, booking_id, "payment succeeded for unknown booking");
            return Ok(Reconciled::BookingMissing);
        };

        if let Some(stored) = booking.payment_intent_id.as_deref() {
            if stored != event.intent_id() {
                warn!(
                    booking_id,
                    stored_intent = stored,
                    event_intent = %event.intent_id(),
                    "payment intent does not belong to booking"
                );
                return Ok(Reconciled::IntentMismatch { booking_id });
            }
        }

        match booking.status {
            BookingStatus::Confirmed => {
                info!(booking_id, "booking already confirmed, duplicate delivery");
                Ok(Reconciled::AlreadyConfirmed { booking_id })
            }
            BookingStatus::Cancelled => {
                warn!(booking_id, "payment succeeded for a cancelled booking, needs a refund");
                Ok(Reconciled::NotConfirmable { booking_id, status: booking.status })
            }
            BookingStatus::Pending => {
                tx.set_booking_status(booking_id, BookingStatus::Confirmed).await?;
                tx.commit().await?;
                info!(booking_id, event_id = %event.id, "booking confirmed");

                self.send_ticket(booking_id).await;
                Ok(Reconciled::Confirmed { booking_id })
            }
        }
    }

    /// Mails the ticket. Failures are logged and swallowed.
    async fn send_ticket(&self, booking_id: i64) {
        let (user, booking) = match self.load_for_mail(booking_id).await {
            Ok(Some(found)) => found,
            Ok(None) => {
                error!(booking_id, "confirmed booking vanished before the ticket was mailed");
                return;
            }
            Err(e) => {
                error!(booking_id, "could not load booking for ticket email: {}", e);
                return;
            }
        };

        let email = TicketEmail::compose(&user, &booking, self.venue_offset);
        match self.notifier.send_ticket_email(email).await {
            Ok(()) => info!(booking_id, to = %user.email, "ticket email sent"),
            Err(e) => error!(booking_id, "failed to send ticket email: {}", e),
        }
    }

    async fn load_for_mail(
        &self,
        booking_id: i64,
    ) -> Result<Option<(User, BookingView)>, WebhookError> {
        let Some(booking) = self.store.booking_view(booking_id).await? else {
            return Ok(None);
        };
        let user = self.store.user(booking.user_id).await?;
        Ok(user.map(|u| (u, booking)))
    }
}
