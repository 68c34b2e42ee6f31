//! Divisor/range search.
//!
//! The PWM output frequency is `clock / divisor / range`, with both factors
//! integers bounded by the controller. Reaching a frequency therefore means
//! finding a product `divisor * range` close to the ideal `clock / frequency`
//! that factors into an acceptable pair.
//!
//! The search walks totals outward from the ideal product: `P`, `P + 1`,
//! `P - 1`, `P + 2`, `P - 2`, and so on. For each total it takes the smallest
//! divisor that divides it evenly while keeping the range under the limit;
//! the smallest such divisor leaves the largest range, which is the best
//! duty-cycle resolution that total can offer. The first total whose range
//! also meets the requested minimum resolution wins.
//!
//! Everything here is pure so it can be tested without a controller.

/// Bounds of a PWM controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PwmLimits {
    /// Base clock feeding the divisor (Hz).
    pub clock_hz: f64,
    /// Smallest usable clock divisor.
    pub min_divisor: u32,
    /// Largest usable clock divisor.
    pub max_divisor: u32,
    /// Largest range register value.
    pub max_range: u32,
}

impl PwmLimits {
    /// The BCM283x PWM controller: 19.2 MHz oscillator, 12-bit divisor,
    /// range up to 4096.
    pub const BCM283X: PwmLimits = PwmLimits {
        clock_hz: 19.2e6,
        min_divisor: 2,
        max_divisor: 4095,
        max_range: 4096,
    };
}

impl Default for PwmLimits {
    fn default() -> Self {
        PwmLimits::BCM283X
    }
}

/// A divisor/range pair accepted by [`synthesize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockSettings {
    /// Clock divisor.
    pub divisor: u32,
    /// Range (counter modulus).
    pub range: u32,
}

impl ClockSettings {
    /// Output frequency these settings produce from `clock_hz`.
    pub fn frequency(&self, clock_hz: f64) -> f64 {
        clock_hz / self.divisor as f64 / self.range as f64
    }
}

/// Finds the divisor/range pair closest to `frequency`.
///
/// Returns `None` when the frequency is not positive and finite, when
/// `min_resolution` is zero or above `limits.max_range`, when the frequency
/// is too high to give `min_resolution` steps, when it is too low to reach
/// even with the largest divisor, or when no total within `2 * P` steps of
/// the ideal product factors into an acceptable pair.
///
/// The returned range may make the achieved frequency differ slightly from
/// the request; that rounding is expected.
pub fn synthesize(
    frequency: f64,
    min_resolution: u32,
    limits: &PwmLimits,
) -> Option<ClockSettings> {
    if !frequency.is_finite() || frequency <= 0.0 {
        return None;
    }
    if min_resolution == 0 || min_resolution > limits.max_range {
        return None;
    }

    let ideal = (limits.clock_hz / frequency).round();
    if !(1.0..=u32::MAX as f64).contains(&ideal) {
        return None;
    }
    let product = ideal as u64;

    // Integer division on purpose: these are the coarse bounds of the
    // reachable band.
    if product / u64::from(min_resolution) < u64::from(limits.min_divisor)
        || product / u64::from(limits.max_divisor) > u64::from(limits.max_range)
    {
        return None;
    }

    candidate_totals(product).find_map(|total| {
        let divisor = minimum_acceptable_factor(total, limits)?;
        let range = (total / u64::from(divisor)) as u32;
        (range >= min_resolution).then_some(ClockSettings { divisor, range })
    })
}

/// Totals in search order: `P, P+1, P-1, P+2, P-2, ...` down to 1.
fn candidate_totals(product: u64) -> impl Iterator<Item = u64> {
    (1..2 * product).map(move |step| {
        if step % 2 == 1 {
            product - step / 2
        } else {
            product + step / 2
        }
    })
}

/// Smallest divisor `d >= min_divisor` with `total % d == 0` and
/// `total / d <= max_range`, or `None` if no such `d <= max_divisor` exists.
fn minimum_acceptable_factor(total: u64, limits: &PwmLimits) -> Option<u32> {
    let max_range = u64::from(limits.max_range);
    // Below this, total / d would exceed the range limit.
    let lower = u64::from(limits.min_divisor).max(total.div_ceil(max_range));
    (lower..=u64::from(limits.max_divisor))
        .find(|&d| total % d == 0)
        .map(|d| d as u32)
}
