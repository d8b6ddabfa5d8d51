use chrono::{Duration as ChronoDuration, Utc};
use std::time::Duration;
use tracing::{error, info};

use crate::cache::CacheService;
use crate::services::booking::BookingService;

/// Periodically cancels Pending bookings whose payment never arrived, so the
/// seats they hold go back on sale.
#[derive(Clone)]
pub struct CleanupService {
    bookings: BookingService,
    cache: CacheService,
    pending_ttl: ChronoDuration,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanupStats {
    pub expired_bookings: usize,
    pub released_tickets: u64,
    pub failures: usize,
}

impl CleanupService {
    pub fn new(bookings: BookingService, cache: CacheService, pending_ttl: ChronoDuration) -> Self {
        Self { bookings, cache, pending_ttl }
    }

    /// Runs forever, one sweep per `interval`.
    pub async fn run(self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            self.sweep_expired_bookings().await;
        }
    }

    /// One pass over stale Pending bookings.
    pub async fn sweep_expired_bookings(&self) -> CleanupStats {
        let cutoff = Utc::now() - self.pending_ttl;
        let stale = match self.bookings.stale_pending(cutoff).await {
            Ok(ids) => ids,
            Err(e) => {
                error!("Failed to list stale pending bookings: {}", e);
                return CleanupStats { failures: 1, ..CleanupStats::default() };
            }
        };

        let mut stats = CleanupStats::default();
        if stale.is_empty() {
            return stats;
        }
        info!("Found {} stale pending bookings to expire", stale.len());

        for booking_id in stale {
            match self.bookings.expire_booking(booking_id).await {
                Ok(Some(released)) => {
                    stats.expired_bookings += 1;
                    stats.released_tickets += released.tickets;
                    self.cache.invalidate_seat_map(released.showtime_id).await;
                }
                // confirmed or cancelled since it was listed
                Ok(None) => {}
                Err(e) => {
                    stats.failures += 1;
                    error!(booking_id, "Failed to expire booking: {}", e);
                }
            }
        }

        info!(
            expired = stats.expired_bookings,
            released = stats.released_tickets,
            failures = stats.failures,
            "Expired booking sweep completed"
        );
        stats
    }
}
