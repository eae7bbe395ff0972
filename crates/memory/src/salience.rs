//! Salience: how "top of mind" a claim is, in [0, 1].

use chrono::{DateTime, Utc};
use kenning_config::MemoryConfig;
use kenning_core::claim::Claim;
use serde::{Deserialize, Serialize};

/// Each weighted input of the salience score, plus the final value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SalienceBreakdown {
    pub recency: f64,
    pub emotional: f64,
    pub stakes: f64,
    pub confirmation: f64,
    pub access: f64,
    /// Weighted mean of the factors, floored for long-term claims.
    pub total: f64,
}

pub(crate) fn days_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds().max(0) as f64 / 86_400_000.0
}

/// `0.5^(elapsed / half_life)`; 1.0 for a non-positive half-life.
pub fn half_life_factor(elapsed: f64, half_life: f64) -> f64 {
    if half_life <= 0.0 || !elapsed.is_finite() {
        return 1.0;
    }
    0.5f64.powf(elapsed.max(0.0) / half_life)
}

pub fn confirmation_factor(confirmations: u32) -> f64 {
    ((f64::from(confirmations) + 1.0).log2() / 4.0).min(1.0)
}

pub fn access_factor(last_accessed: Option<DateTime<Utc>>, now: DateTime<Utc>, window_hours: f64) -> f64 {
    let Some(at) = last_accessed else {
        return 0.0;
    };
    if window_hours <= 0.0 {
        return 0.0;
    }
    let hours = days_between(at, now) * 24.0;
    (1.0 - hours / window_hours).clamp(0.0, 1.0)
}

pub fn breakdown(claim: &Claim, config: &MemoryConfig, now: DateTime<Utc>) -> SalienceBreakdown {
    let recency = half_life_factor(days_between(claim.last_confirmed, now), config.recency_half_life_days);
    let emotional = claim.emotional_intensity.clamp(0.0, 1.0);
    let stakes = claim.stakes.weight();
    let confirmation = confirmation_factor(claim.confirmation_count);
    let access = access_factor(claim.last_accessed, now, config.access_boost_hours);

    let w = &config.weights;
    let weight_sum = w.total();
    let mut total = if weight_sum > 0.0 {
        (w.recency * recency
            + w.emotional * emotional
            + w.stakes * stakes
            + w.confirmation * confirmation
            + w.access * access)
            / weight_sum
    } else {
        0.0
    };
    if !total.is_finite() {
        total = 0.0;
    }
    total = total.clamp(0.0, 1.0);
    if claim.is_long_term() {
        total = total.max(config.long_term_floor);
    }

    SalienceBreakdown {
        recency,
        emotional,
        stakes,
        confirmation,
        access,
        total,
    }
}

pub fn salience(claim: &Claim, config: &MemoryConfig, now: DateTime<Utc>) -> f64 {
    breakdown(claim, config, now).total
}
