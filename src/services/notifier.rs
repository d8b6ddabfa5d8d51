//! Ticket confirmation mail.
//!
//! Delivery is best effort: callers log a [`NotifyError`] and move on, a
//! confirmed booking stays confirmed whether or not the mail went out.

use async_trait::async_trait;
use chrono::FixedOffset;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use tracing::info;

use crate::config::EmailConfig;
use crate::models::{BookingView, User};

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("invalid address: {0}")]
    Address(String),
    #[error("failed to build email: {0}")]
    Build(String),
    #[error("failed to send email: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl TicketEmail {
    /// Renders the confirmation for a booking; times are shown on the venue clock.
    pub fn compose(user: &User, booking: &BookingView, venue_offset: FixedOffset) -> Self {
        let showtime = &booking.showtime;
        let seats = booking
            .tickets
            .iter()
            .map(|t| t.seat_label())
            .collect::<Vec<_>>()
            .join(", ");
        let starts = showtime
            .start_time
            .with_timezone(&venue_offset)
            .format("%Y-%m-%d %H:%M");

        let body = format!(
            "Hello {user},\n\
             \n\
             Your booking is confirmed!\n\
             \n\
             Movie:  {movie}\n\
             Cinema: {theater}\n\
             Screen: {screen}\n\
             Time:   {starts}\n\
             \n\
             Seats:  {seats}\n\
             \n\
             Total Paid: ${total}\n\
             \n\
             Please show this email at the entrance.\n",
            user = user.username,
            movie = showtime.movie_title,
            theater = showtime.theater_name,
            screen = showtime.screen_name,
            total = booking.total_amount(),
        );

        Self {
            to: user.email.clone(),
            subject: format!("Your Ticket for {}", showtime.movie_title),
            body,
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_ticket_email(&self, email: TicketEmail) -> Result<(), NotifyError>;
}

/// Writes mail to the log instead of sending it. Used when no SMTP relay is configured.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_ticket_email(&self, email: TicketEmail) -> Result<(), NotifyError> {
        info!(to = %email.to, subject = %email.subject, "ticket email (not sent)\n{}", email.body);
        Ok(())
    }
}

#[derive(Clone)]
pub struct SmtpNotifier {
    host: String,
    port: u16,
    credentials: Credentials,
    from_email: String,
    from_name: String,
}

impl SmtpNotifier {
    pub fn new(config: &EmailConfig, host: String) -> Self {
        Self {
            host,
            port: config.smtp_port,
            credentials: Credentials::new(config.smtp_username.clone(), config.smtp_password.clone()),
            from_email: config.from_email.clone(),
            from_name: config.from_name.clone(),
        }
    }

    fn build_transport(&self) -> Result<SmtpTransport, NotifyError> {
        let transport = SmtpTransport::relay(&self.host)
            .map_err(|e| NotifyError::Transport(format!("SMTP relay error: {e}")))?
            .port(self.port)
            .credentials(self.credentials.clone())
            .build();
        Ok(transport)
    }

    fn from_header(&self) -> String {
        format!("{} <{}>", self.from_name, self.from_email)
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send_ticket_email(&self, email: TicketEmail) -> Result<(), NotifyError> {
        let message = Message::builder()
            .from(self.from_header().parse().map_err(|e| NotifyError::Address(format!("{e}")))?)
            .to(email.to.parse().map_err(|e| NotifyError::Address(format!("{e}")))?)
            .subject(email.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(email.body)
            .map_err(|e| NotifyError::Build(e.to_string()))?;

        let mailer = self.build_transport()?;

        tokio::task::spawn_blocking(move || {
            mailer
                .send(&message)
                .map_err(|e| NotifyError::Transport(e.to_string()))
        })
        .await
        .map_err(|e| NotifyError::Transport(format!("email task failed: {e}")))?
        .map(|_| ())
    }
}
