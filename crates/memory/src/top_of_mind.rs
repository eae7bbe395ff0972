//! Read-only "what is on the speaker's mind" snapshot.

use chrono::{DateTime, Utc};
use kenning_config::MemoryConfig;
use kenning_core::claim::{Claim, ClaimState, ClaimType};
use kenning_core::entity::{Entity, EntityType};
use kenning_core::goal::{Goal, GoalStatus};
use kenning_core::text::{keywords, shared_keywords};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::salience::{days_between, half_life_factor, salience};

/// Emotional intensity above which a claim is a highlight.
const HIGHLIGHT_INTENSITY: f64 = 0.6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicSummary {
    pub subject: String,
    pub claim_count: usize,
    /// Mean salience of the topic's claims.
    pub salience: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySummary {
    pub entity_id: String,
    pub name: String,
    pub entity_type: EntityType,
    pub mention_count: u32,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalSummary {
    pub goal_id: String,
    pub title: String,
    pub status: GoalStatus,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimSummary {
    pub claim_id: String,
    pub statement: String,
    pub claim_type: ClaimType,
    pub salience: f64,
    pub emotional_intensity: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopOfMind {
    pub topics: Vec<TopicSummary>,
    pub entities: Vec<EntitySummary>,
    pub goals: Vec<GoalSummary>,
    pub concerns: Vec<ClaimSummary>,
    pub questions: Vec<ClaimSummary>,
    pub emotional_highlights: Vec<ClaimSummary>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub generated_at: DateTime<Utc>,
}

fn descending(a: f64, b: f64) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

impl TopOfMind {
    /// Build the snapshot. Superseded and dormant claims are left out.
    pub fn build(
        claims: &[Claim],
        entities: &[Entity],
        goals: &[Goal],
        config: &MemoryConfig,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Self {
        let live: Vec<(&Claim, f64)> = claims
            .iter()
            .filter(|c| !matches!(c.state, ClaimState::Superseded | ClaimState::Dormant))
            .map(|c| (c, salience(c, config, now)))
            .collect();

        let summary = |c: &Claim, s: f64| ClaimSummary {
            claim_id: c.id.clone(),
            statement: c.statement.clone(),
            claim_type: c.claim_type,
            salience: s,
            emotional_intensity: c.emotional_intensity,
        };

        // Topics: claims grouped by subject, first-seen order for ties.
        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, (usize, f64)> = HashMap::new();
        for (c, s) in &live {
            let subject = c.subject.trim().to_lowercase();
            if subject.is_empty() {
                continue;
            }
            let entry = groups.entry(subject.clone()).or_insert_with(|| {
                order.push(subject);
                (0, 0.0)
            });
            entry.0 += 1;
            entry.1 += s;
        }
        let mut topics: Vec<TopicSummary> = order
            .into_iter()
            .filter_map(|subject| {
                groups.get(&subject).map(|(count, sum)| TopicSummary {
                    salience: sum / *count as f64,
                    claim_count: *count,
                    subject,
                })
            })
            .collect();
        topics.sort_by(|a, b| descending(a.salience, b.salience));
        topics.truncate(limit);

        // Entities: half recency, half (capped) mention frequency.
        let mut top_entities: Vec<EntitySummary> = entities
            .iter()
            .filter(|e| e.entity_type != EntityType::SelfEntity)
            .map(|e| {
                let recency = half_life_factor(days_between(e.last_referenced, now), config.recency_half_life_days);
                let frequency = (f64::from(e.mention_count) / 10.0).min(1.0);
                EntitySummary {
                    entity_id: e.id.clone(),
                    name: e.canonical_name.clone(),
                    entity_type: e.entity_type,
                    mention_count: e.mention_count,
                    score: 0.5 * recency + 0.5 * frequency,
                }
            })
            .collect();
        top_entities.sort_by(|a, b| descending(a.score, b.score));
        top_entities.truncate(limit);

        // Goals: recency blended with the salience of claims that talk about them.
        let claim_words: Vec<(Vec<String>, f64)> = live.iter().map(|(c, s)| (keywords(&c.statement), *s)).collect();
        let mut top_goals: Vec<GoalSummary> = goals
            .iter()
            .filter(|g| g.status.is_open())
            .map(|g| {
                let recency = half_life_factor(days_between(g.last_referenced, now), config.recency_half_life_days);
                let related: Vec<f64> = claim_words
                    .iter()
                    .filter(|(words, _)| shared_keywords(&g.keywords, words) > 0)
                    .map(|(_, s)| *s)
                    .collect();
                let related_salience = if related.is_empty() {
                    0.0
                } else {
                    related.iter().sum::<f64>() / related.len() as f64
                };
                GoalSummary {
                    goal_id: g.id.clone(),
                    title: g.title.clone(),
                    status: g.status,
                    score: 0.5 * recency + 0.5 * related_salience,
                }
            })
            .collect();
        top_goals.sort_by(|a, b| descending(a.score, b.score));
        top_goals.truncate(limit);

        let by_type = |kind: ClaimType| {
            let mut out: Vec<ClaimSummary> = live
                .iter()
                .filter(|(c, _)| c.claim_type == kind)
                .map(|(c, s)| summary(c, *s))
                .collect();
            out.sort_by(|a, b| descending(a.salience, b.salience));
            out.truncate(limit);
            out
        };
        let concerns = by_type(ClaimType::Concern);
        let questions = by_type(ClaimType::Question);

        let mut emotional_highlights: Vec<ClaimSummary> = live
            .iter()
            .filter(|(c, _)| c.emotional_intensity > HIGHLIGHT_INTENSITY)
            .map(|(c, s)| summary(c, *s))
            .collect();
        emotional_highlights.sort_by(|a, b| descending(a.emotional_intensity, b.emotional_intensity));
        emotional_highlights.truncate(limit);

        Self {
            topics,
            entities: top_entities,
            goals: top_goals,
            concerns,
            questions,
            emotional_highlights,
            generated_at: now,
        }
    }
}
