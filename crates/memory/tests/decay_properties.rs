use chrono::{Duration, Utc};
use kenning_config::MemoryConfig;
use kenning_core::claim::{Claim, ClaimAttributes, ClaimState, MemoryTier, Stakes, Temporality};
use kenning_memory::decay::{decay_claim, next_state};
use kenning_memory::salience::salience;
use proptest::prelude::*;

fn make_claim(temporality: Temporality, confidence: f64, stakes: Stakes, intensity: f64) -> Claim {
    Claim::from_attributes(
        "Property claim",
        "user",
        &ClaimAttributes {
            temporality,
            stakes,
            initial_confidence: confidence,
            emotional_intensity: intensity,
            ..ClaimAttributes::default()
        },
    )
}

fn arb_temporality() -> impl Strategy<Value = Temporality> {
    prop_oneof![
        Just(Temporality::FastDecaying),
        Just(Temporality::PointInTime),
        Just(Temporality::SlowlyDecaying),
    ]
}

fn arb_stakes() -> impl Strategy<Value = Stakes> {
    prop_oneof![
        Just(Stakes::Low),
        Just(Stakes::Medium),
        Just(Stakes::High),
        Just(Stakes::Existential),
    ]
}

// ── Repeated passes never raise confidence ──────────────────────────────

proptest! {
    #[test]
    fn repeated_passes_never_increase_confidence(
        temporality in arb_temporality(),
        confidence in 0.0f64..=1.0,
        steps in proptest::collection::vec(0i64..2000, 1..10),
    ) {
        let config = MemoryConfig::default();
        let mut claim = make_claim(temporality, confidence, Stakes::Low, 0.0);
        let mut now = claim.last_decayed_at;

        for hours in steps {
            now += Duration::hours(hours);
            let update = decay_claim(&claim, &config, now).unwrap().unwrap();
            prop_assert!(update.confidence <= claim.current_confidence + 1e-12);
            prop_assert!(update.state.decay_rank() >= claim.state.decay_rank());
            claim.current_confidence = update.confidence;
            claim.state = update.state;
            claim.last_decayed_at = now;
        }
    }
}

// ── Confidence stays in [0, 1] ───────────────────────────────────────────

proptest! {
    #[test]
    fn confidence_stays_bounded(
        temporality in arb_temporality(),
        confidence in -1.0f64..2.0,
        days in 0i64..3650,
    ) {
        let config = MemoryConfig::default();
        let mut claim = make_claim(temporality, 0.5, Stakes::Low, 0.0);
        claim.current_confidence = confidence;
        let update = decay_claim(&claim, &config, claim.last_decayed_at + Duration::days(days))
            .unwrap()
            .unwrap();
        prop_assert!((0.0..=1.0).contains(&update.confidence));
    }
}

// ── Eternal claims do not decay ──────────────────────────────────────────

proptest! {
    #[test]
    fn eternal_claims_are_untouched(
        confidence in 0.0f64..=1.0,
        days in 0i64..3650,
    ) {
        let config = MemoryConfig::default();
        let claim = make_claim(Temporality::Eternal, confidence, Stakes::Low, 0.0);
        let update = decay_claim(&claim, &config, claim.last_decayed_at + Duration::days(days)).unwrap();
        prop_assert!(update.is_none());
    }
}

// ── State only moves down the decay path ─────────────────────────────────

proptest! {
    #[test]
    fn dormant_is_terminal(confidence in 0.0f64..=1.0) {
        let config = MemoryConfig::default();
        prop_assert_eq!(next_state(ClaimState::Dormant, confidence, &config), ClaimState::Dormant);
    }
}

// ── Salience bounds and the long-term floor ──────────────────────────────

proptest! {
    #[test]
    fn salience_is_bounded(
        stakes in arb_stakes(),
        intensity in 0.0f64..=1.0,
        confirmations in 0u32..100,
        days_ago in 0i64..3650,
        long_term in any::<bool>(),
    ) {
        let config = MemoryConfig::default();
        let now = Utc::now();
        let mut claim = make_claim(Temporality::SlowlyDecaying, 0.5, stakes, intensity);
        claim.confirmation_count = confirmations;
        claim.last_confirmed = now - Duration::days(days_ago);
        if long_term {
            claim.memory_tier = MemoryTier::LongTerm;
        }

        let value = salience(&claim, &config, now);
        prop_assert!((0.0..=1.0).contains(&value));
        if long_term {
            prop_assert!(value >= config.long_term_floor);
        }
    }
}
