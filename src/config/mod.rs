use chrono::FixedOffset;
use std::str::FromStr;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{key} has an invalid value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

// Top-level configuration, one section per concern
#[derive(Debug, Clone)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub jwt: JwtConfig,
    pub payment: PaymentConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub booking: BookingConfig,
    pub email: EmailConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Plain,
    Json,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub rust_log: String,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
    pub acquire_timeout_seconds: u64,
}

// Redis is optional; without a URL the seat map is not cached
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: Option<String>,
    pub seat_map_ttl_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
}

#[derive(Debug, Clone)]
pub struct PaymentConfig {
    pub secret_key: String,
    pub api_base: String,
    pub currency: String,
    pub webhook_secret: String,
    pub webhook_tolerance_seconds: i64,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct BookingConfig {
    pub pending_ttl_minutes: i64,
    pub cleanup_interval_seconds: u64,
    /// Offset of the venue clock from UTC. Pricing and ticket mails use it.
    pub venue_utc_offset_minutes: i32,
}

impl BookingConfig {
    pub fn venue_offset(&self) -> Result<FixedOffset, ConfigError> {
        FixedOffset::east_opt(self.venue_utc_offset_minutes * 60).ok_or_else(|| ConfigError::Invalid {
            key: "VENUE_UTC_OFFSET_MINUTES",
            value: self.venue_utc_offset_minutes.to_string(),
            reason: "offset must be within +/- 24 hours".to_string(),
        })
    }
}

// SMTP is optional; without a host ticket mails are only logged
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: String,
    pub from_email: String,
    pub from_name: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let log_format = match env.or("LOG_FORMAT", "plain").to_ascii_lowercase().as_str() {
            "plain" | "pretty" | "text" => LogFormat::Plain,
            "json" => LogFormat::Json,
            other => {
                return Err(ConfigError::Invalid {
                    key: "LOG_FORMAT",
                    value: other.to_string(),
                    reason: "expected plain or json".to_string(),
                })
            }
        };

        let config = Config {
            app: AppConfig {
                host: env.or("HOST", "0.0.0.0"),
                port: env.parse_or("PORT", 8000)?,
                environment: env.or("ENVIRONMENT", "development"),
                rust_log: env.or("RUST_LOG", "cinema_booking=debug,tower_http=debug"),
                log_format,
            },
            database: DatabaseConfig {
                url: env.required("DATABASE_URL")?,
                pool_size: env.parse_or("DB_POOL_SIZE", 20)?,
                acquire_timeout_seconds: env.parse_or("DB_ACQUIRE_TIMEOUT_SECONDS", 5)?,
            },
            redis: RedisConfig {
                url: env.optional("REDIS_URL"),
                seat_map_ttl_seconds: env.parse_or("SEAT_MAP_CACHE_TTL", 30)?,
            },
            jwt: JwtConfig {
                secret: env.required("JWT_SECRET")?,
            },
            payment: PaymentConfig {
                secret_key: env.required("PAYMENT_SECRET_KEY")?,
                api_base: env.or("PAYMENT_API_BASE", "https://api.stripe.com"),
                currency: env.or("PAYMENT_CURRENCY", "usd").to_ascii_lowercase(),
                webhook_secret: env.required("PAYMENT_WEBHOOK_SECRET")?,
                webhook_tolerance_seconds: env.parse_or("PAYMENT_WEBHOOK_TOLERANCE_SECONDS", 300)?,
                timeout_seconds: env.parse_or("PAYMENT_TIMEOUT_SECONDS", 10)?,
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: env.parse_or("CIRCUIT_BREAKER_FAILURE_THRESHOLD", 5)?,
                timeout_seconds: env.parse_or("CIRCUIT_BREAKER_TIMEOUT_SECONDS", 60)?,
            },
            booking: BookingConfig {
                pending_ttl_minutes: env.parse_or("PENDING_BOOKING_TTL_MINUTES", 15)?,
                cleanup_interval_seconds: env.parse_or("CLEANUP_INTERVAL_SECONDS", 60)?,
                venue_utc_offset_minutes: env.parse_or("VENUE_UTC_OFFSET_MINUTES", 0)?,
            },
            email: EmailConfig {
                smtp_host: env.optional("SMTP_HOST"),
                smtp_port: env.parse_or("SMTP_PORT", 587)?,
                smtp_username: env.or("SMTP_USERNAME", ""),
                smtp_password: env.or("SMTP_PASSWORD", ""),
                from_email: env.or("EMAIL_FROM", "tickets@localhost"),
                from_name: env.or("EMAIL_FROM_NAME", "Cinema Tickets"),
            },
        };

        config.booking.venue_offset()?;
        Ok(config)
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.optional(key).ok_or(ConfigError::Missing(key))
    }

    fn or(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    fn parse_or<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(key) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
                key,
                reason: e.to_string(),
                value,
            }),
        }
    }
}
