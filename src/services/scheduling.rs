//! Showtime scheduling.
//!
//! Every create and update recomputes the end time and re-runs the overlap
//! query inside the same transaction that writes the row. The screen row is
//! locked first so two schedulers working on one screen take turns, and the
//! exclusion constraint on `showtimes` backs the check at the database level.

use chrono::{DateTime, FixedOffset, Utc};
use std::sync::Arc;
use tracing::{info, warn};

use crate::models::{Showtime, ShowtimeConflict};
use crate::store::{NewShowtime, Store, StoreError, StoreTx};

#[derive(Debug, thiserror::Error)]
pub enum SchedulingError {
    #[error("Movie {0} not found.")]
    MovieNotFound(i64),
    #[error("Screen {0} not found.")]
    ScreenNotFound(i64),
    #[error("Showtime {0} not found.")]
    ShowtimeNotFound(i64),
    #[error("Overlap detected! {movie_title} is playing from {from} to {to}.")]
    Overlap {
        movie_title: String,
        from: String,
        to: String,
        conflict: ShowtimeConflict,
    },
    #[error("Showtime {showtime_id} already has {tickets} ticket(s) sold and cannot move to another screen.")]
    ScreenChangeWithTickets { showtime_id: i64, tickets: u64 },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What to schedule.
#[derive(Debug, Clone)]
pub struct ShowtimeDraft {
    pub movie_id: i64,
    pub screen_id: i64,
    pub start_time: DateTime<Utc>,
}

/// Partial edit of an existing showtime; `None` keeps the current value.
#[derive(Debug, Clone, Default)]
pub struct ShowtimeChanges {
    pub movie_id: Option<i64>,
    pub screen_id: Option<i64>,
    pub start_time: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct SchedulingService {
    store: Arc<dyn Store>,
    venue_offset: FixedOffset,
}

impl SchedulingService {
    pub fn new(store: Arc<dyn Store>, venue_offset: FixedOffset) -> Self {
        Self { store, venue_offset }
    }

    pub async fn schedule_showtime(&self, draft: ShowtimeDraft) -> Result<Showtime, SchedulingError> {
        let mut tx = self.store.begin().await?;
        let showtime = self.save(&mut *tx, draft, None).await?;
        tx.commit().await?;

        info!(
            showtime_id = showtime.id,
            screen_id = showtime.screen_id,
            "scheduled showtime {} - {}",
            showtime.start_time,
            showtime.end_time
        );
        Ok(showtime)
    }

    pub async fn reschedule_showtime(
        &self,
        showtime_id: i64,
        changes: ShowtimeChanges,
    ) -> Result<Showtime, SchedulingError> {
        let mut tx = self.store.begin().await?;
        let current = tx
            .showtime(showtime_id)
            .await?
            .ok_or(SchedulingError::ShowtimeNotFound(showtime_id))?;

        if let Some(screen_id) = changes.screen_id.filter(|id| *id != current.screen_id) {
            let tickets = tx.live_tickets(showtime_id).await?;
            if tickets > 0 {
                warn!(showtime_id, screen_id, tickets, "refusing to move a showtime with sold tickets");
                return Err(SchedulingError::ScreenChangeWithTickets { showtime_id, tickets });
            }
        }

        let draft = ShowtimeDraft {
            movie_id: changes.movie_id.unwrap_or(current.movie_id),
            screen_id: changes.screen_id.unwrap_or(current.screen_id),
            start_time: changes.start_time.unwrap_or(current.start_time),
        };
        let showtime = self.save(&mut *tx, draft, Some(showtime_id)).await?;
        tx.commit().await?;

        info!(showtime_id, "rescheduled showtime to {} - {}", showtime.start_time, showtime.end_time);
        Ok(showtime)
    }

    async fn save(
        &self,
        tx: &mut dyn StoreTx,
        draft: ShowtimeDraft,
        existing: Option<i64>,
    ) -> Result<Showtime, SchedulingError> {
        let movie = tx
            .movie(draft.movie_id)
            .await?
            .ok_or(SchedulingError::MovieNotFound(draft.movie_id))?;
        tx.lock_screen(draft.screen_id)
            .await?
            .ok_or(SchedulingError::ScreenNotFound(draft.screen_id))?;

        let end_time = Showtime::end_time_for(draft.start_time, movie.duration_minutes);
        let conflicts = tx
            .overlapping_showtimes(draft.screen_id, draft.start_time, end_time, existing)
            .await?;
        if let Some(conflict) = conflicts.into_iter().next() {
            return Err(self.overlap_error(conflict));
        }

        let row = NewShowtime {
            movie_id: draft.movie_id,
            screen_id: draft.screen_id,
            start_time: draft.start_time,
            end_time,
        };
        let showtime = match existing {
            Some(id) => tx.update_showtime(id, row).await?,
            None => tx.insert_showtime(row).await?,
        };
        Ok(showtime)
    }

    fn overlap_error(&self, conflict: ShowtimeConflict) -> SchedulingError {
        let local = |t: DateTime<Utc>| t.with_timezone(&self.venue_offset).format("%H:%M").to_string();
        SchedulingError::Overlap {
            movie_title: conflict.movie_title.clone(),
            from: local(conflict.start_time),
            to: local(conflict.end_time),
            conflict,
        }
    }
}
