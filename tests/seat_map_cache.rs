//! Seat map cache against a real Redis started with testcontainers.
//!
//! Docker must be running, so these tests are ignored by default. Run them
//! with `cargo test --test seat_map_cache -- --ignored`.

use testcontainers::{runners::AsyncRunner, ContainerAsync};
use testcontainers_modules::redis::{Redis, REDIS_PORT};

use cinema_booking::cache::{CacheService, SeatMapLookup};
use cinema_booking::models::{SeatAvailability, SeatStatus, SeatType};
use cinema_booking::redis_client::RedisClient;

async fn start_redis() -> (ContainerAsync<Redis>, CacheService) {
    let container = Redis::default().start().await.expect("Failed to start redis container");
    let port = container
        .get_host_port_ipv4(REDIS_PORT)
        .await
        .expect("Failed to get redis port");
    let redis = RedisClient::connect(&format!("redis://127.0.0.1:{port}"))
        .await
        .expect("Failed to connect to redis");
    (container, CacheService::new(redis, 60))
}

fn seats(status: SeatStatus) -> Vec<SeatAvailability> {
    vec![SeatAvailability { row: "A".into(), number: 1, seat_type: SeatType::Regular, status }]
}

fn hit(lookup: SeatMapLookup) -> Vec<SeatAvailability> {
    match lookup {
        SeatMapLookup::Hit(seats) => seats,
        SeatMapLookup::Miss(generation) => panic!("expected a hit, missed at generation {generation}"),
    }
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn saved_map_is_served_until_invalidated() {
    let (_container, cache) = start_redis().await;

    let SeatMapLookup::Miss(generation) = cache.seat_map(1).await else {
        panic!("fresh cache should miss");
    };
    cache.save_seat_map(1, generation, &seats(SeatStatus::Available)).await;
    assert_eq!(hit(cache.seat_map(1).await)[0].status, SeatStatus::Available);

    // other showtimes are untouched
    cache.invalidate_seat_map(2).await;
    assert_eq!(hit(cache.seat_map(1).await).len(), 1);

    cache.invalidate_seat_map(1).await;
    assert!(matches!(cache.seat_map(1).await, SeatMapLookup::Miss(g) if g == generation + 1));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn map_loaded_before_a_booking_is_never_served_after_it() {
    let (_container, cache) = start_redis().await;

    // a reader misses and starts loading the map from the database
    let SeatMapLookup::Miss(seen) = cache.seat_map(7).await else {
        panic!("fresh cache should miss");
    };
    // a booking commits and invalidates before the reader writes back
    cache.invalidate_seat_map(7).await;
    cache.save_seat_map(7, seen, &seats(SeatStatus::Available)).await;

    let SeatMapLookup::Miss(current) = cache.seat_map(7).await else {
        panic!("stale map was served after invalidation");
    };
    assert!(current > seen);

    cache.save_seat_map(7, current, &seats(SeatStatus::Taken)).await;
    assert_eq!(hit(cache.seat_map(7).await)[0].status, SeatStatus::Taken);
}
