//! Dynamic ticket pricing.
//!
//! `price = base - morning discount + seat surcharge`, where the discount is
//! 20% of the movie's base price for showtimes starting before noon on the
//! venue clock, and the surcharge is a flat amount for VIP or Premium seats.

use chrono::{FixedOffset, Offset, Timelike, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

use crate::models::{Seat, SeatType, ShowtimeDetails};

pub const MORNING_CUTOFF_HOUR: u32 = 12;
pub const MORNING_DISCOUNT_RATE: Decimal = dec!(0.20);
pub const VIP_SURCHARGE: Decimal = dec!(10.00);
pub const PREMIUM_SURCHARGE: Decimal = dec!(5.00);

#[derive(Debug, Clone, Copy)]
pub struct PricingPolicy {
    venue_offset: FixedOffset,
}

impl PricingPolicy {
    pub fn new(venue_offset: FixedOffset) -> Self {
        Self { venue_offset }
    }

    pub fn price(&self, showtime: &ShowtimeDetails, seat: &Seat) -> Decimal {
        let local_hour = showtime.start_time.with_timezone(&self.venue_offset).hour();
        ticket_price(showtime.base_price, local_hour, seat.seat_type)
    }
}

impl Default for PricingPolicy {
    fn default() -> Self {
        Self::new(Utc.fix())
    }
}

/// Price for one seat given the movie's base price and the local start hour.
pub fn ticket_price(base_price: Decimal, local_start_hour: u32, seat_type: SeatType) -> Decimal {
    let mut price = base_price;
    if local_start_hour < MORNING_CUTOFF_HOUR {
        price -= base_price * MORNING_DISCOUNT_RATE;
    }
    price += match seat_type {
        SeatType::Vip => VIP_SURCHARGE,
        SeatType::Premium => PREMIUM_SURCHARGE,
        SeatType::Regular => Decimal::ZERO,
    };
    round_currency(price).max(Decimal::ZERO)
}

/// Two decimal places, halves away from zero.
pub fn round_currency(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}
