#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Offset, TimeZone, Utc};
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use cinema_booking::models::{Movie, Screen, SeatType, Showtime, User};
use cinema_booking::services::booking::{BookingRequest, BookingService, SeatRequest};
use cinema_booking::services::notifier::{Notifier, NotifyError, TicketEmail};
use cinema_booking::services::payment::{PaymentError, PaymentIntent, PaymentProvider};
use cinema_booking::services::pricing::PricingPolicy;
use cinema_booking::services::reconciliation::PaymentReconciler;
use cinema_booking::services::scheduling::SchedulingService;
use cinema_booking::services::webhook::{signature_header, WebhookVerifier};
use cinema_booking::store::MemoryStore;

pub const WEBHOOK_SECRET: &str = "whsec_test";
pub const JWT_SECRET: &str = "jwt-test-secret";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentCall {
    pub amount_minor: i64,
    pub currency: String,
    pub booking_id: i64,
}

/// Payment provider double: hands out `pi_<booking>` intents and records calls.
#[derive(Default)]
pub struct MockPayments {
    pub calls: Mutex<Vec<IntentCall>>,
    pub fail: AtomicBool,
}

impl MockPayments {
    pub fn calls(&self) -> Vec<IntentCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fail_next_calls(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl PaymentProvider for MockPayments {
    async fn create_intent(
        &self,
        amount_minor: i64,
        currency: &str,
        booking_id: i64,
    ) -> Result<PaymentIntent, PaymentError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PaymentError::Rejected { status: 402, message: "card_declined".into() });
        }
        self.calls.lock().unwrap().push(IntentCall {
            amount_minor,
            currency: currency.to_string(),
            booking_id,
        });
        Ok(PaymentIntent {
            id: format!("pi_{booking_id}"),
            client_secret: format!("pi_{booking_id}_secret_test"),
        })
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<TicketEmail>>,
    pub fail: AtomicBool,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<TicketEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_ticket_email(&self, email: TicketEmail) -> Result<(), NotifyError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(NotifyError::Transport("connection refused".into()));
        }
        self.sent.lock().unwrap().push(email);
        Ok(())
    }
}

/// 2030-06-01 at `hour`:00 UTC.
pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2030, 6, 1, hour, minute, 0).unwrap()
}

pub fn seat(row: &str, number: i32) -> SeatRequest {
    SeatRequest { row: row.into(), number }
}

pub fn request(showtime_id: i64, seats: &[(&str, i32)]) -> BookingRequest {
    BookingRequest {
        showtime_id,
        seats: seats.iter().map(|(row, number)| seat(row, *number)).collect(),
    }
}

/// A theater with one screen of seats A1..A10 (A2 VIP, A3 Premium), a
/// 120 minute movie at base price 10.00 and an 18:00 showtime.
pub struct Fixture {
    pub store: MemoryStore,
    pub payments: Arc<MockPayments>,
    pub notifier: Arc<RecordingNotifier>,
    pub bookings: BookingService,
    pub scheduling: SchedulingService,
    pub reconciler: PaymentReconciler,
    pub alice: User,
    pub bob: User,
    pub admin: User,
    pub screen: Screen,
    pub movie: Movie,
    pub showtime: Showtime,
}

impl Fixture {
    pub async fn new() -> Self {
        let store = MemoryStore::new();

        let alice = store.add_user("alice", "alice@example.com", false).await;
        let bob = store.add_user("bob", "bob@example.com", false).await;
        let admin = store.add_user("admin", "admin@example.com", true).await;

        let theater = store.add_theater("Grand Cinema", "Springfield").await;
        let screen = store.add_screen(theater.id, "Screen 1", 10).await;
        for number in 1..=10 {
            let seat_type = match number {
                2 => SeatType::Vip,
                3 => SeatType::Premium,
                _ => SeatType::Regular,
            };
            store.add_seat(screen.id, "A", number, seat_type).await;
        }

        let movie = store.add_movie("Dune", 120, dec!(10.00)).await;
        let showtime = store.add_showtime(movie.id, screen.id, at(18, 0)).await;

        let payments = Arc::new(MockPayments::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let shared: Arc<MemoryStore> = Arc::new(store.clone());
        let offset = Utc.fix();

        let bookings = BookingService::new(shared.clone(), payments.clone(), PricingPolicy::new(offset), "usd");
        let scheduling = SchedulingService::new(shared.clone(), offset);
        let reconciler = PaymentReconciler::new(
            shared,
            WebhookVerifier::new(WEBHOOK_SECRET, 300),
            notifier.clone(),
            offset,
        );

        Self {
            store,
            payments,
            notifier,
            bookings,
            scheduling,
            reconciler,
            alice,
            bob,
            admin,
            screen,
            movie,
            showtime,
        }
    }
}

/// A provider event body plus a valid signature header for it.
pub fn signed_event(event_type: &str, intent_id: &str, booking_id: Option<i64>) -> (Vec<u8>, String) {
    let metadata = match booking_id {
        Some(id) => serde_json::json!({ "booking_id": id.to_string() }),
        None => serde_json::json!({}),
    };
    let body = serde_json::json!({
        "id": format!("evt_{intent_id}"),
        "type": event_type,
        "data": { "object": { "id": intent_id, "metadata": metadata } }
    })
    .to_string()
    .into_bytes();
    let header = signature_header(WEBHOOK_SECRET, &body, Utc::now().timestamp()).unwrap();
    (body, header)
}
