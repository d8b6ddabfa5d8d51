//! payment.rs
//!
//! Service layer for the external payment provider.
//!
//! 1.  **CircuitBreaker**: stops hammering a provider that keeps failing.
//!     After `failure_threshold` consecutive failures the breaker opens and
//!     rejects calls until `open_timeout` has passed; then a single trial
//!     call decides whether it closes again.
//! 2.  **PaymentProvider**: the create-intent contract the booking engine
//!     depends on.
//! 3.  **StripeClient**: HTTP implementation of that contract for a
//!     Stripe-compatible `/v1/payment_intents` endpoint, with every call
//!     routed through the breaker.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::config::{CircuitBreakerConfig, PaymentConfig};

/// Breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, calls go through.
    Closed,
    /// Too many failures, calls are rejected until the timeout elapses.
    Open,
    /// Timeout elapsed; calls are let through to test the provider.
    HalfOpen,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<Instant>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<BreakerState>,
    failure_threshold: u32,
    open_timeout: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, open_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                opened_at: None,
            }),
            failure_threshold: failure_threshold.max(1),
            open_timeout,
        }
    }

    pub fn from_config(config: &CircuitBreakerConfig) -> Self {
        Self::new(config.failure_threshold, Duration::from_secs(config.timeout_seconds))
    }

    /// Whether the next call may go out. Moves Open -> HalfOpen once the
    /// timeout has elapsed.
    pub fn can_execute(&self) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or(Duration::MAX);
                if elapsed >= self.open_timeout {
                    inner.state = CircuitState::HalfOpen;
                    info!("Circuit breaker transitioning to HalfOpen state");
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.state == CircuitState::HalfOpen {
            info!("Circuit breaker recovered - transitioning to Closed state");
        }
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.opened_at = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.failure_count = inner.failure_count.saturating_add(1);

        match inner.state {
            CircuitState::Closed if inner.failure_count >= self.failure_threshold => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                error!(
                    "Circuit breaker OPENED - {} failures reached threshold {}",
                    inner.failure_count, self.failure_threshold
                );
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                warn!("Circuit breaker test failed - returning to Open state");
            }
            _ => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).state
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("payment provider temporarily unavailable")]
    CircuitOpen,
    #[error("payment provider request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("payment provider returned {status}: {message}")]
    Rejected { status: u16, message: String },
}

/// Handle returned by the provider for a new charge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: String,
}

/// Outbound contract with the payment provider.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Creates an intent for `amount_minor` units of `currency`, tagged with
    /// the booking id so the provider's webhook can be correlated back.
    async fn create_intent(
        &self,
        amount_minor: i64,
        currency: &str,
        booking_id: i64,
    ) -> Result<PaymentIntent, PaymentError>;
}

// --- Wire format ---

#[derive(Debug, Serialize)]
struct CreateIntentForm<'a> {
    amount: i64,
    currency: &'a str,
    #[serde(rename = "metadata[booking_id]")]
    booking_id: i64,
    #[serde(rename = "automatic_payment_methods[enabled]")]
    automatic_payment_methods: bool,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorBody {
    error: ProviderErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorDetail {
    message: String,
}

/// Client for a Stripe-compatible payment intents API.
#[derive(Clone)]
pub struct StripeClient {
    api_base: String,
    secret_key: String,
    http_client: reqwest::Client,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl StripeClient {
    pub fn new(
        api_base: impl Into<String>,
        secret_key: impl Into<String>,
        timeout: Duration,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, PaymentError> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
            http_client,
            circuit_breaker,
        })
    }

    pub fn from_config(config: &PaymentConfig, breaker: &CircuitBreakerConfig) -> Result<Self, PaymentError> {
        Self::new(
            config.api_base.clone(),
            config.secret_key.clone(),
            Duration::from_secs(config.timeout_seconds),
            Arc::new(CircuitBreaker::from_config(breaker)),
        )
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.state()
    }

    async fn post_intent(&self, form: &CreateIntentForm<'_>) -> Result<PaymentIntent, PaymentError> {
        let body = serde_urlencoded::to_string(form).map_err(|e| PaymentError::Rejected {
            status: 0,
            message: format!("could not encode request: {e}"),
        })?;

        let response = self
            .http_client
            .post(format!("{}/v1/payment_intents", self.api_base))
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", format!("booking-{}", form.booking_id))
            .header(reqwest::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<PaymentIntent>().await?);
        }

        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ProviderErrorBody>(&text)
            .map(|b| b.error.message)
            .unwrap_or(text);
        Err(PaymentError::Rejected { status: status.as_u16(), message })
    }
}

#[async_trait]
impl PaymentProvider for StripeClient {
    async fn create_intent(
        &self,
        amount_minor: i64,
        currency: &str,
        booking_id: i64,
    ) -> Result<PaymentIntent, PaymentError> {
        if !self.circuit_breaker.can_execute() {
            warn!(booking_id, "Circuit breaker is OPEN - blocking payment provider request");
            return Err(PaymentError::CircuitOpen);
        }

        info!(booking_id, amount_minor, currency, "creating payment intent");
        let form = CreateIntentForm {
            amount: amount_minor,
            currency,
            booking_id,
            automatic_payment_methods: true,
        };

        match self.post_intent(&form).await {
            Ok(intent) => {
                self.circuit_breaker.record_success();
                Ok(intent)
            }
            // a 4xx means the provider is up and disliked the request
            Err(PaymentError::Rejected { status, message }) if status < 500 => {
                self.circuit_breaker.record_success();
                error!(booking_id, status, "payment provider rejected intent: {}", message);
                Err(PaymentError::Rejected { status, message })
            }
            Err(e) => {
                self.circuit_breaker.record_failure();
                error!(booking_id, "payment provider request failed: {:?}", e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breaker_opens_after_threshold() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.can_execute());

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.can_execute());
    }

    #[test]
    fn success_resets_failure_count() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_trial_call_decides() {
        let breaker = CircuitBreaker::new(1, Duration::ZERO);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        assert!(breaker.can_execute());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        assert!(breaker.can_execute());
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn intent_form_uses_bracketed_metadata_keys() {
        let form = CreateIntentForm {
            amount: 3000,
            currency: "usd",
            booking_id: 42,
            automatic_payment_methods: true,
        };
        let encoded = serde_urlencoded::to_string(&form).unwrap();
        assert_eq!(
            encoded,
            "amount=3000&currency=usd&metadata%5Bbooking_id%5D=42&automatic_payment_methods%5Benabled%5D=true"
        );
    }
}
