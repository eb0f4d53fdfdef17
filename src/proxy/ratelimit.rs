use governor::clock::{Clock, DefaultClock};
use governor::{NegativeMultiDecision, Quota, RateLimiter as Limiter};
use std::num::NonZeroU32;

use crate::error::{Error, Result};

type DirectLimiter =
    Limiter<governor::state::direct::NotKeyed, governor::state::InMemoryState, DefaultClock>;

/// Token-bucket byte-rate limiter: rate tokens per second, burst equal to
/// the rate. One limiter is shared by both copy directions.
pub struct RateLimiter {
    lim: DirectLimiter,
    clock: DefaultClock,
    burst: u32,
}

impl RateLimiter {
    pub fn new(bytes_per_second: u32) -> Result<Self> {
        let rate = NonZeroU32::new(bytes_per_second)
            .ok_or_else(|| Error::RateParse("0".to_string()))?;
        Ok(Self {
            lim: Limiter::direct(Quota::per_second(rate)),
            clock: DefaultClock::default(),
            burst: bytes_per_second,
        })
    }

    /// Parse a human-readable byte rate like `"1MB"` and build a limiter.
    pub fn from_rate(input: &str) -> Result<Self> {
        Self::new(parse_rate(input)?)
    }

    /// Wait until `amount` bytes are admitted. Amounts above the burst
    /// size are admitted in burst-sized chunks.
    pub async fn admit(&self, amount: u32) {
        let mut remaining = amount;
        while remaining > 0 {
            let chunk = remaining.min(self.burst);
            let n = NonZeroU32::new(chunk).expect("chunk is non-zero");
            match self.lim.check_n(n) {
                Ok(()) => remaining -= chunk,
                Err(NegativeMultiDecision::BatchNonConforming(_, over)) => {
                    tokio::time::sleep(over.wait_time_from(self.clock.now())).await;
                }
                Err(NegativeMultiDecision::InsufficientCapacity(_)) => {
                    // chunk is clamped to the burst size, so this cannot
                    // happen; bail out rather than spin.
                    return;
                }
            }
        }
    }
}

/// Parse a human-readable byte rate: a number with an optional decimal
/// (`KB`, `MB`, `GB`) or binary (`KiB`, `MiB`, `GiB`) suffix.
pub fn parse_rate(input: &str) -> Result<u32> {
    let trimmed = input.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(trimmed.len());
    let (number, suffix) = trimmed.split_at(split);

    let value: f64 = number
        .parse()
        .map_err(|_| Error::RateParse(input.to_string()))?;
    let multiplier: f64 = match suffix.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1.0,
        "k" | "kb" => 1e3,
        "m" | "mb" => 1e6,
        "g" | "gb" => 1e9,
        "kib" => 1024.0,
        "mib" => 1024.0 * 1024.0,
        "gib" => 1024.0 * 1024.0 * 1024.0,
        _ => return Err(Error::RateParse(input.to_string())),
    };

    let bytes = value * multiplier;
    if !(1.0..=u32::MAX as f64).contains(&bytes) {
        return Err(Error::RateParse(input.to_string()));
    }
    Ok(bytes as u32)
}
