use crate::cache::CacheService;
use crate::models::SeatAvailability;
use redis::AsyncCommands;
use tracing::{debug, warn};

// Bumped on every invalidation. Entries are stored under the generation the
// reader saw before it queried the database, so a map computed before a
// booking committed can never be served after that booking's invalidation.
fn generation_key(showtime_id: i64) -> String {
    format!("seatmap:{}:gen", showtime_id)
}

fn seat_map_key(showtime_id: i64, generation: u64) -> String {
    format!("seatmap:{}:v{}", showtime_id, generation)
}

/// Outcome of a seat map lookup.
#[derive(Debug)]
pub enum SeatMapLookup {
    Hit(Vec<SeatAvailability>),
    /// Nothing cached for the current generation. Pass the generation back to
    /// [`CacheService::save_seat_map`] once the map is loaded.
    Miss(u64),
}

impl CacheService {
    // Cached seat map for the current generation. Redis errors read as a miss
    pub async fn seat_map(&self, showtime_id: i64) -> SeatMapLookup {
        let Some(redis) = self.redis.as_ref() else {
            return SeatMapLookup::Miss(0);
        };
        let mut conn = redis.conn.clone();

        let generation: redis::RedisResult<Option<u64>> = conn.get(generation_key(showtime_id)).await;
        let generation = match generation {
            Ok(generation) => generation.unwrap_or_default(),
            Err(e) => {
                warn!(showtime_id, "seat map generation read failed: {}", e);
                return SeatMapLookup::Miss(0);
            }
        };

        let data: Option<String> = match conn.get(seat_map_key(showtime_id, generation)).await {
            Ok(data) => data,
            Err(e) => {
                warn!(showtime_id, "seat map cache read failed: {}", e);
                return SeatMapLookup::Miss(generation);
            }
        };
        let Some(data) = data else {
            return SeatMapLookup::Miss(generation);
        };

        match serde_json::from_str(&data) {
            Ok(seats) => {
                debug!(showtime_id, generation, "seat map cache hit");
                SeatMapLookup::Hit(seats)
            }
            Err(e) => {
                warn!(showtime_id, "discarding unreadable seat map cache entry: {}", e);
                let _: redis::RedisResult<()> = conn.del(seat_map_key(showtime_id, generation)).await;
                SeatMapLookup::Miss(generation)
            }
        }
    }

    pub async fn save_seat_map(&self, showtime_id: i64, generation: u64, seats: &[SeatAvailability]) {
        let Some(redis) = self.redis.as_ref() else {
            return;
        };
        let data = match serde_json::to_string(seats) {
            Ok(data) => data,
            Err(e) => {
                warn!(showtime_id, "seat map serialization failed: {}", e);
                return;
            }
        };

        let mut conn = redis.conn.clone();
        let result: redis::RedisResult<()> =
            conn.set_ex(seat_map_key(showtime_id, generation), data, self.seat_map_ttl).await;
        if let Err(e) = result {
            warn!(showtime_id, "seat map cache write failed: {}", e);
        }
    }

    // Retire the cached map after any change to the showtime's tickets
    pub async fn invalidate_seat_map(&self, showtime_id: i64) {
        let Some(redis) = self.redis.as_ref() else {
            return;
        };
        let mut conn = redis.conn.clone();
        let result: redis::RedisResult<u64> = conn.incr(generation_key(showtime_id), 1).await;
        if let Err(e) = result {
            warn!(showtime_id, "seat map cache invalidation failed: {}", e);
        }
    }
}
