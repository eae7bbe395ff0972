//! Consolidation score: how strongly a claim deserves long-term memory.
//!
//! The Consolidation observer and `MemoryService::should_promote` both call
//! [`consolidation_score`], so the flagging and the promotion decision can
//! never disagree.

use kenning_core::claim::{Claim, ClaimType};
use kenning_core::text::contains_any;

pub const IMPORTANCE_KEYWORDS: &[&str] = &[
    "important",
    "remember",
    "never forget",
    "crucial",
    "matters",
    "significant",
    "life-changing",
];

fn type_bonus(claim_type: ClaimType) -> f64 {
    match claim_type {
        ClaimType::Goal | ClaimType::Commitment | ClaimType::Decision | ClaimType::Concern => 0.1,
        ClaimType::Emotion => 0.05,
        _ => 0.0,
    }
}

/// 0.3·intensity + 0.25·stakes + 0.2·repetition + 0.15·importance + type bonus.
pub fn consolidation_score(claim: &Claim) -> f64 {
    let intensity = claim.emotional_intensity.clamp(0.0, 1.0);
    let repetition = (f64::from(claim.confirmation_count) / 5.0).min(1.0);
    let importance = if contains_any(&claim.statement, IMPORTANCE_KEYWORDS) {
        1.0
    } else {
        0.0
    };

    let score = 0.3 * intensity
        + 0.25 * claim.stakes.weight()
        + 0.2 * repetition
        + 0.15 * importance
        + type_bonus(claim.claim_type);
    score.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kenning_core::claim::{ClaimAttributes, Stakes};

    fn claim(statement: &str, attrs: ClaimAttributes) -> Claim {
        Claim::from_attributes(statement, "user", &attrs)
    }

    #[test]
    fn plain_belief_scores_low() {
        let c = claim("the sky is grey", ClaimAttributes::default());
        // 0.25 * 0.2 stakes + 0.2 * 0.2 repetition
        assert!((consolidation_score(&c) - 0.09).abs() < 1e-9);
    }

    #[test]
    fn intense_high_stakes_concern_qualifies() {
        let mut c = claim(
            "It's important that I don't lose my job",
            ClaimAttributes {
                claim_type: ClaimType::Concern,
                stakes: Stakes::High,
                emotional_intensity: 0.8,
                ..ClaimAttributes::default()
            },
        );
        c.confirmation_count = 5;
        let score = consolidation_score(&c);
        // .24 + .2 + .2 + .15 + .1
        assert!((score - 0.89).abs() < 1e-9);
        assert!(score >= 0.6);
    }

    #[test]
    fn score_is_clamped() {
        let mut c = claim(
            "Remember this, it matters",
            ClaimAttributes {
                claim_type: ClaimType::Decision,
                stakes: Stakes::Existential,
                emotional_intensity: 1.0,
                ..ClaimAttributes::default()
            },
        );
        c.confirmation_count = 50;
        let score = consolidation_score(&c);
        assert!(score > 0.99 && score <= 1.0);
    }
}
