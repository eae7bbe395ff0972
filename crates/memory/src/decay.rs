//! Confidence decay keyed to each claim's temporality.
//!
//! Decay is measured from `last_decayed_at`, so consecutive passes compose:
//! two passes a day apart decay exactly as much as one pass covering both
//! days. A pass can lower confidence and push the state down the
//! active → stale → dormant path, never the other way.

use chrono::{DateTime, Utc};
use kenning_config::MemoryConfig;
use kenning_core::claim::{Claim, ClaimState, Temporality};
use serde::{Deserialize, Serialize};

use crate::salience::{days_between, half_life_factor};

/// One claim the pass could not update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecayError {
    /// `None` when the failure was not tied to one claim.
    pub claim_id: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecayReport {
    pub processed: usize,
    pub became_stale: usize,
    pub became_dormant: usize,
    pub errors: Vec<DecayError>,
}

/// New confidence and state for one claim.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecayUpdate {
    pub confidence: f64,
    pub state: ClaimState,
}

/// Half-life in days, or `None` for claims that never decay.
pub fn half_life_days(claim: &Claim, config: &MemoryConfig) -> Option<f64> {
    let base = match claim.temporality {
        Temporality::Eternal => return None,
        Temporality::FastDecaying => config.half_lives.fast_decaying_days,
        Temporality::PointInTime => config.half_lives.point_in_time_days,
        Temporality::SlowlyDecaying => config.half_lives.slowly_decaying_days,
    };
    if claim.is_long_term() {
        Some(base * config.long_term_half_life_multiplier.max(1.0))
    } else {
        Some(base)
    }
}

/// The state a confidence level maps to, never earlier on the decay path
/// than `current`.
pub fn next_state(current: ClaimState, confidence: f64, config: &MemoryConfig) -> ClaimState {
    let by_threshold = if confidence < config.dormant_threshold {
        ClaimState::Dormant
    } else if confidence < config.stale_threshold {
        ClaimState::Stale
    } else {
        ClaimState::Active
    };
    if by_threshold.decay_rank() > current.decay_rank() {
        by_threshold
    } else {
        current
    }
}

/// Decay one claim up to `now`. `None` when the claim is not decayable.
pub fn decay_claim(claim: &Claim, config: &MemoryConfig, now: DateTime<Utc>) -> Result<Option<DecayUpdate>, String> {
    if !claim.is_decayable() {
        return Ok(None);
    }
    let Some(half_life) = half_life_days(claim, config) else {
        return Ok(None);
    };
    if !claim.current_confidence.is_finite() {
        return Err(format!("confidence is not a number: {}", claim.current_confidence));
    }

    let current = claim.current_confidence.clamp(0.0, 1.0);
    let factor = half_life_factor(days_between(claim.last_decayed_at, now), half_life);
    let confidence = (current * factor).clamp(0.0, current);

    Ok(Some(DecayUpdate {
        confidence,
        state: next_state(claim.state, confidence, config),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use kenning_core::claim::{ClaimAttributes, MemoryTier};

    fn claim(temporality: Temporality, confidence: f64, days_ago: i64) -> Claim {
        let attrs = ClaimAttributes {
            temporality,
            initial_confidence: confidence,
            ..ClaimAttributes::default()
        };
        let mut c = Claim::from_attributes("test", "user", &attrs);
        c.last_decayed_at = Utc::now() - Duration::days(days_ago);
        c
    }

    #[test]
    fn half_lives_per_temporality() {
        let config = MemoryConfig::default();
        assert_eq!(half_life_days(&claim(Temporality::Eternal, 1.0, 0), &config), None);
        assert_eq!(half_life_days(&claim(Temporality::FastDecaying, 1.0, 0), &config), Some(3.0));

        let mut slow = claim(Temporality::SlowlyDecaying, 1.0, 0);
        assert_eq!(half_life_days(&slow, &config), Some(60.0));
        slow.memory_tier = MemoryTier::LongTerm;
        assert_eq!(half_life_days(&slow, &config), Some(240.0));
    }

    #[test]
    fn one_half_life_halves_confidence() {
        let config = MemoryConfig::default();
        let c = claim(Temporality::FastDecaying, 0.8, 3);
        let update = decay_claim(&c, &config, Utc::now()).unwrap().unwrap();
        assert!((update.confidence - 0.4).abs() < 1e-3);
        assert_eq!(update.state, ClaimState::Active);
    }

    #[test]
    fn thresholds_move_state_down_only() {
        let config = MemoryConfig::default();
        assert_eq!(next_state(ClaimState::Active, 0.25, &config), ClaimState::Stale);
        assert_eq!(next_state(ClaimState::Active, 0.05, &config), ClaimState::Dormant);
        assert_eq!(next_state(ClaimState::Dormant, 0.9, &config), ClaimState::Dormant);
        assert_eq!(next_state(ClaimState::Stale, 0.05, &config), ClaimState::Dormant);
    }

    #[test]
    fn eternal_and_superseded_are_skipped() {
        let config = MemoryConfig::default();
        let now = Utc::now();
        assert!(decay_claim(&claim(Temporality::Eternal, 0.9, 30), &config, now).unwrap().is_none());

        let mut gone = claim(Temporality::FastDecaying, 0.9, 30);
        gone.state = ClaimState::Superseded;
        assert!(decay_claim(&gone, &config, now).unwrap().is_none());
    }

    #[test]
    fn bad_confidence_is_an_error() {
        let mut c = claim(Temporality::FastDecaying, 0.9, 1);
        c.current_confidence = f64::NAN;
        assert!(decay_claim(&c, &MemoryConfig::default(), Utc::now()).is_err());
    }
}
