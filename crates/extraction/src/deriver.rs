//! Claim deriver: maps a proposition and its primary stance to claim attributes.
//!
//! Every decision is an ordered table of `(predicate, result)` pairs evaluated
//! top-down; the first predicate that holds wins. Rule order is part of the
//! contract, so the tables are plain data and are tested as such.

use kenning_core::claim::{Abstraction, ClaimAttributes, ClaimType, Stakes, Temporality};
use kenning_core::proposition::{DeonticType, Evidence, Proposition, PropositionType, Stance, VolitionalType};

type Predicate = fn(&Proposition, &Stance) -> bool;

fn volition(stance: &Stance, kind: VolitionalType, threshold: f64) -> bool {
    stance
        .volitional
        .as_ref()
        .is_some_and(|v| v.volitional_type == kind && v.strength > threshold)
}

fn obligation(stance: &Stance, kinds: &[DeonticType], threshold: f64) -> bool {
    stance
        .deontic
        .as_ref()
        .is_some_and(|d| kinds.contains(&d.deontic_type) && d.strength > threshold)
}

fn volitional_strength(stance: &Stance) -> f64 {
    stance.volitional.as_ref().map_or(0.0, |v| v.strength)
}

fn deontic_strength(stance: &Stance) -> f64 {
    stance.deontic.as_ref().map_or(0.0, |d| d.strength)
}

// ── Claim type ──────────────────────────────────────────────────────────────

fn intends(_: &Proposition, s: &Stance) -> bool {
    volition(s, VolitionalType::Intend, 0.5)
}
fn wants(_: &Proposition, s: &Stance) -> bool {
    volition(s, VolitionalType::Want, 0.6)
}
fn fears(_: &Proposition, s: &Stance) -> bool {
    volition(s, VolitionalType::Fear, 0.4)
}
fn prefers(_: &Proposition, s: &Stance) -> bool {
    volition(s, VolitionalType::Prefer, 0.4)
}
fn hopes(_: &Proposition, s: &Stance) -> bool {
    volition(s, VolitionalType::Hope, 0.5)
}
fn obliged(_: &Proposition, s: &Stance) -> bool {
    obligation(s, &[DeonticType::Must, DeonticType::Should], 0.5)
}
fn emotional(_: &Proposition, s: &Stance) -> bool {
    s.affective.arousal > 0.7 || !s.affective.emotions.is_empty()
}
fn witnessed(_: &Proposition, s: &Stance) -> bool {
    s.epistemic.certainty > 0.8 && s.epistemic.evidence == Evidence::Direct
}
fn hypothetical(p: &Proposition, _: &Stance) -> bool {
    p.proposition_type == PropositionType::Hypothetical
}

pub const CLAIM_TYPE_RULES: &[(Predicate, ClaimType)] = &[
    (intends, ClaimType::Intention),
    (wants, ClaimType::Goal),
    (fears, ClaimType::Concern),
    (prefers, ClaimType::Preference),
    (hopes, ClaimType::Goal),
    (obliged, ClaimType::Commitment),
    (emotional, ClaimType::Emotion),
    (witnessed, ClaimType::Factual),
    (hypothetical, ClaimType::Hypothetical),
];

// ── Stakes ──────────────────────────────────────────────────────────────────

fn existential(_: &Proposition, s: &Stance) -> bool {
    (s.affective.arousal > 0.9 && s.affective.valence.abs() > 0.8) || volition(s, VolitionalType::Fear, 0.8)
}
fn high_stakes(_: &Proposition, s: &Stance) -> bool {
    s.affective.arousal > 0.7
        || volition(s, VolitionalType::Fear, 0.5)
        || obligation(s, &[DeonticType::Must], 0.7)
        || volitional_strength(s) > 0.8
}
fn medium_stakes(_: &Proposition, s: &Stance) -> bool {
    s.affective.arousal > 0.4 || volitional_strength(s) > 0.5 || deontic_strength(s) > 0.5
}

pub const STAKES_RULES: &[(Predicate, Stakes)] = &[
    (existential, Stakes::Existential),
    (high_stakes, Stakes::High),
    (medium_stakes, Stakes::Medium),
];

// ── Temporality ─────────────────────────────────────────────────────────────

fn event(p: &Proposition, _: &Stance) -> bool {
    p.proposition_type == PropositionType::Event
}
fn generic(p: &Proposition, _: &Stance) -> bool {
    p.proposition_type == PropositionType::Generic
}
fn aroused(_: &Proposition, s: &Stance) -> bool {
    s.affective.arousal > 0.7
}
fn assumed(_: &Proposition, s: &Stance) -> bool {
    s.epistemic.evidence == Evidence::Assumption
}

pub const TEMPORALITY_RULES: &[(Predicate, Temporality)] = &[
    (event, Temporality::PointInTime),
    (generic, Temporality::Eternal),
    (aroused, Temporality::FastDecaying),
    (assumed, Temporality::FastDecaying),
];

// ── Abstraction ─────────────────────────────────────────────────────────────

pub const ABSTRACTION_RULES: &[(Predicate, Abstraction)] = &[
    (generic, Abstraction::General),
    (hypothetical, Abstraction::Hypothetical),
];

fn first_match<T: Copy>(rules: &[(Predicate, T)], p: &Proposition, s: &Stance, fallback: T) -> T {
    rules
        .iter()
        .find(|(predicate, _)| predicate(p, s))
        .map_or(fallback, |(_, result)| *result)
}

/// Derive claim attributes. Pure and storage-independent.
pub fn derive(proposition: &Proposition, stance: &Stance) -> ClaimAttributes {
    ClaimAttributes {
        claim_type: first_match(CLAIM_TYPE_RULES, proposition, stance, ClaimType::Belief),
        temporality: first_match(TEMPORALITY_RULES, proposition, stance, Temporality::SlowlyDecaying),
        abstraction: first_match(ABSTRACTION_RULES, proposition, stance, Abstraction::Specific),
        stakes: first_match(STAKES_RULES, proposition, stance, Stakes::Low),
        initial_confidence: stance.epistemic.certainty.clamp(0.0, 1.0),
        emotional_valence: stance.affective.valence.clamp(-1.0, 1.0),
        emotional_intensity: stance.affective.arousal.clamp(0.0, 1.0),
    }
}
