mod common;

use chrono::Utc;
use std::sync::atomic::Ordering;

use cinema_booking::models::BookingStatus;
use cinema_booking::services::reconciliation::Reconciled;
use cinema_booking::services::webhook::{signature_header, WebhookError, PAYMENT_SUCCEEDED};

use common::{request, signed_event, Fixture, WEBHOOK_SECRET};

async fn pending_booking(fx: &Fixture) -> i64 {
    fx.bookings
        .create_booking(fx.alice.id, &request(fx.showtime.id, &[("A", 1), ("A", 2)]))
        .await
        .unwrap()
        .booking
        .id
}

#[tokio::test]
async fn succeeded_payment_confirms_and_mails_the_ticket() {
    let fx = Fixture::new().await;
    let booking_id = pending_booking(&fx).await;

    let (body, header) = signed_event(PAYMENT_SUCCEEDED, &format!("pi_{booking_id}"), Some(booking_id));
    let outcome = fx.reconciler.handle_webhook(&body, Some(&header)).await.unwrap();

    assert_eq!(outcome, Reconciled::Confirmed { booking_id });
    assert_eq!(fx.store.booking(booking_id).await.unwrap().status, BookingStatus::Confirmed);

    let sent = fx.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "alice@example.com");
    assert_eq!(sent[0].subject, "Your Ticket for Dune");
    assert!(sent[0].body.contains("Cinema: Grand Cinema"));
    assert!(sent[0].body.contains("Seats:  A1, A2"));
    assert!(sent[0].body.contains("Total Paid: $30.00"));
}

#[tokio::test]
async fn redelivery_is_acknowledged_without_a_second_email() {
    let fx = Fixture::new().await;
    let booking_id = pending_booking(&fx).await;

    let (body, header) = signed_event(PAYMENT_SUCCEEDED, &format!("pi_{booking_id}"), Some(booking_id));
    fx.reconciler.handle_webhook(&body, Some(&header)).await.unwrap();
    let again = fx.reconciler.handle_webhook(&body, Some(&header)).await.unwrap();

    assert_eq!(again, Reconciled::AlreadyConfirmed { booking_id });
    assert_eq!(fx.notifier.sent().len(), 1);
}

#[tokio::test]
async fn concurrent_redeliveries_confirm_once() {
    let fx = Fixture::new().await;
    let booking_id = pending_booking(&fx).await;
    let (body, header) = signed_event(PAYMENT_SUCCEEDED, &format!("pi_{booking_id}"), Some(booking_id));

    let (a, b) = tokio::join!(
        fx.reconciler.handle_webhook(&body, Some(&header)),
        fx.reconciler.handle_webhook(&body, Some(&header)),
    );
    let outcomes = [a.unwrap(), b.unwrap()];

    assert!(outcomes.contains(&Reconciled::Confirmed { booking_id }));
    assert!(outcomes.contains(&Reconciled::AlreadyConfirmed { booking_id }));
    assert_eq!(fx.notifier.sent().len(), 1);
}

#[tokio::test]
async fn other_event_types_are_ignored() {
    let fx = Fixture::new().await;
    let booking_id = pending_booking(&fx).await;

    let (body, header) = signed_event("payment_intent.payment_failed", &format!("pi_{booking_id}"), Some(booking_id));
    let outcome = fx.reconciler.handle_webhook(&body, Some(&header)).await.unwrap();

    assert_eq!(outcome, Reconciled::Ignored { event_type: "payment_intent.payment_failed".into() });
    assert_eq!(fx.store.booking(booking_id).await.unwrap().status, BookingStatus::Pending);
    assert!(fx.notifier.sent().is_empty());
}

#[tokio::test]
async fn unknown_or_missing_booking_is_acknowledged() {
    let fx = Fixture::new().await;

    let (body, header) = signed_event(PAYMENT_SUCCEEDED, "pi_ghost", Some(424_242));
    assert_eq!(
        fx.reconciler.handle_webhook(&body, Some(&header)).await.unwrap(),
        Reconciled::BookingMissing
    );

    let (body, header) = signed_event(PAYMENT_SUCCEEDED, "pi_anonymous", None);
    assert_eq!(
        fx.reconciler.handle_webhook(&body, Some(&header)).await.unwrap(),
        Reconciled::BookingMissing
    );
    assert!(fx.notifier.sent().is_empty());
}

#[tokio::test]
async fn bad_signatures_change_nothing() {
    let fx = Fixture::new().await;
    let booking_id = pending_booking(&fx).await;
    let (body, header) = signed_event(PAYMENT_SUCCEEDED, &format!("pi_{booking_id}"), Some(booking_id));

    assert!(matches!(
        fx.reconciler.handle_webhook(&body, None).await,
        Err(WebhookError::MissingSignature)
    ));

    let forged = signature_header("whsec_wrong", &body, Utc::now().timestamp()).unwrap();
    assert!(matches!(
        fx.reconciler.handle_webhook(&body, Some(&forged)).await,
        Err(WebhookError::SignatureInvalid)
    ));

    let mut tampered = body.clone();
    tampered.extend_from_slice(b" ");
    assert!(matches!(
        fx.reconciler.handle_webhook(&tampered, Some(&header)).await,
        Err(WebhookError::SignatureInvalid)
    ));

    let stale = signature_header(WEBHOOK_SECRET, &body, Utc::now().timestamp() - 3_600).unwrap();
    assert!(matches!(
        fx.reconciler.handle_webhook(&body, Some(&stale)).await,
        Err(WebhookError::SignatureInvalid)
    ));

    assert_eq!(fx.store.booking(booking_id).await.unwrap().status, BookingStatus::Pending);
    assert!(fx.notifier.sent().is_empty());
}

#[tokio::test]
async fn cancelled_booking_is_not_revived() {
    let fx = Fixture::new().await;
    let booking_id = pending_booking(&fx).await;
    fx.bookings.cancel_booking(fx.alice.id, booking_id).await.unwrap();

    let (body, header) = signed_event(PAYMENT_SUCCEEDED, &format!("pi_{booking_id}"), Some(booking_id));
    let outcome = fx.reconciler.handle_webhook(&body, Some(&header)).await.unwrap();

    assert_eq!(
        outcome,
        Reconciled::NotConfirmable { booking_id, status: BookingStatus::Cancelled }
    );
    assert_eq!(fx.store.booking(booking_id).await.unwrap().status, BookingStatus::Cancelled);
    assert!(fx.notifier.sent().is_empty());
}

#[tokio::test]
async fn intent_from_another_booking_is_refused() {
    let fx = Fixture::new().await;
    let booking_id = pending_booking(&fx).await;

    let (body, header) = signed_event(PAYMENT_SUCCEEDED, "pi_someone_else", Some(booking_id));
    let outcome = fx.reconciler.handle_webhook(&body, Some(&header)).await.unwrap();

    assert_eq!(outcome, Reconciled::IntentMismatch { booking_id });
    assert_eq!(fx.store.booking(booking_id).await.unwrap().status, BookingStatus::Pending);
}

#[tokio::test]
async fn mail_failure_does_not_undo_the_confirmation() {
    let fx = Fixture::new().await;
    let booking_id = pending_booking(&fx).await;
    fx.notifier.fail.store(true, Ordering::SeqCst);

    let (body, header) = signed_event(PAYMENT_SUCCEEDED, &format!("pi_{booking_id}"), Some(booking_id));
    let outcome = fx.reconciler.handle_webhook(&body, Some(&header)).await.unwrap();

    assert_eq!(outcome, Reconciled::Confirmed { booking_id });
    assert_eq!(fx.store.booking(booking_id).await.unwrap().status, BookingStatus::Confirmed);
}
