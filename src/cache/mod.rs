use crate::redis_client::RedisClient;

pub mod seats;

pub use seats::SeatMapLookup;

/// Read-through cache in front of the store. Without Redis every call is a
/// no-op miss and reads go straight to the database.
#[derive(Clone)]
pub struct CacheService {
    redis: Option<RedisClient>,
    seat_map_ttl: u64,
}

impl CacheService {
    pub fn new(redis: RedisClient, seat_map_ttl: u64) -> Self {
        Self { redis: Some(redis), seat_map_ttl }
    }

    pub fn disabled() -> Self {
        Self { redis: None, seat_map_ttl: 0 }
    }

    pub fn is_enabled(&self) -> bool {
        self.redis.is_some()
    }
}
