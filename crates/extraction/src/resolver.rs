//! Entity resolver: maps raw mentions to canonical entities.
//!
//! Resolution is sequential: each mention sees the context left behind by
//! the mentions before it in the same batch, so input order matters.
//!
//! Strategy by mention type:
//! - pronoun: recency context slots only, never creates an entity
//! - proper noun: exact name, alias, spelling vocabulary / fuzzy, else create
//! - self reference: the singleton self entity
//! - common noun / definite description: most recent entity of the suggested
//!   type, else create
//! - anything else: exact name, else create

use chrono::Utc;
use kenning_config::ResolverConfig;
use kenning_core::entity::{normalize_name, Entity, EntityMention, EntityType, MentionType, ResolutionMethod};
use kenning_core::error::{ExtractionError, StoreError};
use kenning_core::proposition::Proposition;
use kenning_core::store::{Query, Store, StoreExt};
use kenning_core::Claim;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

const SELF_NAME: &str = "Self";
const SELF_ALIASES: &[&str] = &["I", "me", "myself", "my"];

/// Recently referenced entities plus the per-kind slots pronouns resolve to.
#[derive(Debug, Clone, Default)]
pub struct RecencyContext {
    window: usize,
    /// Most recent first.
    recent: Vec<Entity>,
    person_a: Option<Entity>,
    person_b: Option<Entity>,
    project: Option<Entity>,
    organization: Option<Entity>,
    neutral: Option<Entity>,
    other: Option<Entity>,
}

impl RecencyContext {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            ..Self::default()
        }
    }

    /// Build from entities ordered most recent first.
    pub fn from_recent(entities: Vec<Entity>, window: usize) -> Self {
        let mut context = Self::new(window);
        for entity in entities.into_iter().take(context.window).rev() {
            context.touch(&entity);
        }
        context
    }

    /// Record a reference to `entity`, making it the most recent.
    pub fn touch(&mut self, entity: &Entity) {
        self.recent.retain(|e| e.id != entity.id);
        self.recent.insert(0, entity.clone());
        self.recent.truncate(self.window);

        match entity.entity_type {
            // No gender signal: both person slots follow the latest person.
            EntityType::Person => {
                self.person_a = Some(entity.clone());
                self.person_b = Some(entity.clone());
            }
            EntityType::Project => self.project = Some(entity.clone()),
            EntityType::Organization => self.organization = Some(entity.clone()),
            EntityType::Other => self.other = Some(entity.clone()),
            _ => {}
        }
        if entity.entity_type.is_neutral() {
            self.neutral = Some(entity.clone());
        }
    }

    pub fn recent(&self) -> &[Entity] {
        &self.recent
    }

    pub fn project(&self) -> Option<&Entity> {
        self.project.as_ref()
    }

    pub fn organization(&self) -> Option<&Entity> {
        self.organization.as_ref()
    }

    pub fn other(&self) -> Option<&Entity> {
        self.other.as_ref()
    }

    /// Most recent entity overall.
    pub fn latest(&self) -> Option<&Entity> {
        self.recent.first()
    }

    pub fn most_recent_of(&self, entity_type: EntityType) -> Option<&Entity> {
        self.recent.iter().find(|e| e.entity_type == entity_type)
    }

    /// The entity a pronoun refers to, if the context has one.
    pub fn pronoun_target(&self, pronoun: &str) -> Option<&Entity> {
        match pronoun.trim().to_lowercase().as_str() {
            "he" | "him" | "his" | "himself" => self.person_a.as_ref(),
            "she" | "her" | "hers" | "herself" => self.person_b.as_ref(),
            "it" | "its" | "itself" => self.neutral.as_ref(),
            "they" | "them" | "their" | "theirs" | "themselves" => self.latest(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionStats {
    pub total: usize,
    pub resolved: usize,
    pub unresolved: usize,
    pub created: usize,
    pub by_context: usize,
    pub by_name: usize,
    pub by_alias: usize,
    pub by_fuzzy: usize,
    pub by_self: usize,
}

impl ResolutionStats {
    fn record(&mut self, method: ResolutionMethod) {
        self.total += 1;
        match method {
            ResolutionMethod::Unresolved => {
                self.unresolved += 1;
                return;
            }
            ResolutionMethod::Context => self.by_context += 1,
            ResolutionMethod::ExactName => self.by_name += 1,
            ResolutionMethod::Alias => self.by_alias += 1,
            ResolutionMethod::Fuzzy => self.by_fuzzy += 1,
            ResolutionMethod::SelfEntity => self.by_self += 1,
            ResolutionMethod::Created => self.created += 1,
        }
        self.resolved += 1;
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResolutionOutcome {
    pub resolved_mentions: Vec<EntityMention>,
    pub new_entities: Vec<Entity>,
    pub stats: ResolutionStats,
}

/// What one mention resolved to.
enum Resolution {
    Existing { id: String, method: ResolutionMethod, alias: Option<String> },
    Create(Entity),
    Unresolved,
}

pub struct EntityResolver {
    store: Arc<dyn Store>,
    config: ResolverConfig,
}

impl EntityResolver {
    pub fn new(store: Arc<dyn Store>, config: ResolverConfig) -> Self {
        Self { store, config }
    }

    /// Build the recency context from the store.
    pub async fn context(&self) -> Result<RecencyContext, StoreError> {
        let recent: Vec<Entity> = self
            .store
            .query(Query::new().sort_desc("last_referenced").limit(self.config.recency_window))
            .await?;
        Ok(RecencyContext::from_recent(recent, self.config.recency_window))
    }

    /// Resolve `mentions` in order, persisting every mention and entity change.
    pub async fn resolve(&self, mentions: Vec<EntityMention>, session_id: &str) -> Result<ResolutionOutcome, ExtractionError> {
        let mut context = self.context().await?;
        let mut known: Vec<Entity> = self.store.query(Query::new()).await?;
        let mut outcome = ResolutionOutcome::default();

        for mut mention in mentions {
            let resolution = self.resolve_one(&mention, &context, &known);
            let now = Utc::now();

            let (entity_id, method) = match resolution {
                Resolution::Existing { id, method, alias } => {
                    if let Some(entity) = known.iter_mut().find(|e| e.id == id) {
                        entity.mention_count = entity.mention_count.saturating_add(1);
                        entity.last_referenced = now;
                        let mut patch = json!({
                            "mention_count": entity.mention_count,
                            "last_referenced": now.timestamp_millis(),
                        });
                        if let Some(alias) = alias
                            && !entity.answers_to(&alias)
                        {
                            entity.aliases.push(alias);
                            patch["aliases"] = json!(entity.aliases.encode());
                        }
                        self.store.update::<Entity>(&entity.id, patch).await?;
                        context.touch(entity);
                    }
                    (Some(id), method)
                }
                Resolution::Create(entity) => {
                    self.store.create(&entity).await?;
                    debug!(entity = %entity.canonical_name, kind = entity.entity_type.as_str(), "Created entity");
                    context.touch(&entity);
                    let id = entity.id.clone();
                    known.push(entity.clone());
                    outcome.new_entities.push(entity);
                    (Some(id), ResolutionMethod::Created)
                }
                Resolution::Unresolved => (None, ResolutionMethod::Unresolved),
            };

            mention.resolved_entity_id = entity_id;
            mention.resolution_method = Some(method);
            self.persist_mention(&mention).await?;
            outcome.stats.record(method);
            outcome.resolved_mentions.push(mention);
        }

        info!(
            session = session_id,
            total = outcome.stats.total,
            resolved = outcome.stats.resolved,
            created = outcome.stats.created,
            "Resolved entity mentions"
        );
        Ok(outcome)
    }

    fn resolve_one(&self, mention: &EntityMention, context: &RecencyContext, known: &[Entity]) -> Resolution {
        let text = mention.text.trim();
        match mention.mention_type {
            MentionType::Pronoun => match context.pronoun_target(text) {
                Some(entity) => existing(entity, ResolutionMethod::Context),
                None => Resolution::Unresolved,
            },
            MentionType::ProperNoun => {
                let entity_type = mention.suggested_type.unwrap_or(EntityType::Other);
                if let Some(entity) = find_by_name(known, text) {
                    return existing(entity, ResolutionMethod::ExactName);
                }
                if let Some(entity) = known.iter().find(|e| e.answers_to(text)) {
                    return existing(entity, ResolutionMethod::Alias);
                }
                if let Some(entity) = self.fuzzy_match(known, text) {
                    return Resolution::Existing {
                        id: entity.id.clone(),
                        method: ResolutionMethod::Fuzzy,
                        alias: Some(text.to_string()),
                    };
                }
                Resolution::Create(Entity::new(text, entity_type))
            }
            MentionType::SelfReference => match known.iter().find(|e| e.entity_type == EntityType::SelfEntity) {
                Some(entity) => existing(entity, ResolutionMethod::SelfEntity),
                None => {
                    let mut entity = Entity::new(SELF_NAME, EntityType::SelfEntity);
                    entity.aliases = SELF_ALIASES.iter().map(|a| a.to_string()).collect();
                    Resolution::Create(entity)
                }
            },
            MentionType::CommonNoun | MentionType::DefiniteDescription => match mention.suggested_type {
                Some(entity_type) => match context.most_recent_of(entity_type) {
                    Some(entity) => existing(entity, ResolutionMethod::Context),
                    None => Resolution::Create(Entity::new(strip_article(text), entity_type)),
                },
                None => match find_by_name(known, strip_article(text)) {
                    Some(entity) => existing(entity, ResolutionMethod::ExactName),
                    None => Resolution::Create(Entity::new(strip_article(text), EntityType::Other)),
                },
            },
        }
    }

    /// Spelling vocabulary first, then phonetic key plus edit distance.
    fn fuzzy_match<'a>(&self, known: &'a [Entity], text: &str) -> Option<&'a Entity> {
        let normalized = normalize_name(text);

        if let Some((_, canonical)) = self
            .config
            .spelling
            .iter()
            .find(|(heard, _)| normalize_name(heard) == normalized)
            && let Some(entity) = known.iter().find(|e| e.answers_to(canonical))
        {
            return Some(entity);
        }

        if normalized.chars().count() < 4 {
            return None;
        }
        let key = phonetic_key(&normalized);

        known
            .iter()
            .filter(|e| e.entity_type != EntityType::SelfEntity)
            .filter_map(|e| {
                std::iter::once(e.normalized_name.as_str())
                    .chain(e.aliases.iter().map(String::as_str))
                    .map(|name| {
                        let name = normalize_name(name);
                        let distance = levenshtein_distance(&normalized, &name);
                        let phonetic = !key.is_empty() && phonetic_key(&name) == key;
                        (distance, phonetic)
                    })
                    .filter(|(distance, phonetic)| *distance <= self.config.fuzzy_max_distance && (*phonetic || *distance <= 1))
                    .map(|(distance, _)| distance)
                    .min()
                    .map(|distance| (distance, e))
            })
            .min_by_key(|(distance, _)| *distance)
            .map(|(_, e)| e)
    }

    async fn persist_mention(&self, mention: &EntityMention) -> Result<(), StoreError> {
        let patch = json!({
            "resolved_entity_id": mention.resolved_entity_id,
            "resolution_method": mention.resolution_method,
        });
        if !self.store.update::<EntityMention>(&mention.id, patch).await? {
            self.store.create(mention).await?;
        }
        Ok(())
    }

    /// Fold `source_id` into `target_id`: union aliases (including the
    /// source's name), sum counts, widen the reference window, repoint
    /// mentions, propositions, and claims, then delete the source.
    ///
    /// Returns the merged entity, or `None` if either id is missing.
    pub async fn merge_entities(&self, target_id: &str, source_id: &str) -> Result<Option<Entity>, StoreError> {
        if target_id == source_id {
            return self.store.get::<Entity>(target_id).await;
        }
        let (Some(mut target), Some(source)) = (
            self.store.get::<Entity>(target_id).await?,
            self.store.get::<Entity>(source_id).await?,
        ) else {
            return Ok(None);
        };

        for name in std::iter::once(&source.canonical_name).chain(source.aliases.iter()) {
            if !target.answers_to(name) {
                target.aliases.push(name.clone());
            }
        }
        target.mention_count = target.mention_count.saturating_add(source.mention_count);
        target.first_referenced = target.first_referenced.min(source.first_referenced);
        target.last_referenced = target.last_referenced.max(source.last_referenced);

        self.store
            .update::<Entity>(
                target_id,
                json!({
                    "aliases": target.aliases.encode(),
                    "mention_count": target.mention_count,
                    "first_referenced": target.first_referenced.timestamp_millis(),
                    "last_referenced": target.last_referenced.timestamp_millis(),
                }),
            )
            .await?;

        let mentions: Vec<EntityMention> = self
            .store
            .query(Query::new().eq("resolved_entity_id", source_id))
            .await?;
        for mention in &mentions {
            self.store
                .update::<EntityMention>(&mention.id, json!({"resolved_entity_id": target_id}))
                .await?;
        }

        let propositions: Vec<Proposition> = self.store.query(Query::new()).await?;
        for p in propositions.iter().filter(|p| p.entity_ids.contains(&source.id)) {
            let ids = repoint(&p.entity_ids, source_id, target_id);
            self.store
                .update::<Proposition>(&p.id, json!({"entity_ids": ids.encode()}))
                .await?;
        }

        let claims: Vec<Claim> = self.store.query(Query::new()).await?;
        for c in claims.iter().filter(|c| c.entity_ids.contains(&source.id)) {
            let ids = repoint(&c.entity_ids, source_id, target_id);
            self.store
                .update::<Claim>(&c.id, json!({"entity_ids": ids.encode()}))
                .await?;
        }

        self.store.delete::<Entity>(source_id).await?;
        info!(target = %target.canonical_name, source = %source.canonical_name, "Merged entities");
        Ok(Some(target))
    }
}

fn existing(entity: &Entity, method: ResolutionMethod) -> Resolution {
    Resolution::Existing {
        id: entity.id.clone(),
        method,
        alias: None,
    }
}

fn find_by_name<'a>(known: &'a [Entity], name: &str) -> Option<&'a Entity> {
    let name = normalize_name(name);
    known.iter().find(|e| e.normalized_name == name)
}

fn repoint(ids: &[String], from: &str, to: &str) -> kenning_core::JsonList<String> {
    let mut out: Vec<String> = Vec::with_capacity(ids.len());
    for id in ids {
        let id = if id == from { to.to_string() } else { id.clone() };
        if !out.contains(&id) {
            out.push(id);
        }
    }
    out.into()
}

fn strip_article(text: &str) -> &str {
    let trimmed = text.trim();
    let lower = trimmed.to_lowercase();
    for article in ["the ", "a ", "an ", "my ", "our "] {
        if lower.starts_with(article) {
            return trimmed[article.len()..].trim_start();
        }
    }
    trimmed
}

/// Soundex-style key: first letter plus up to three consonant-class digits.
fn phonetic_key(name: &str) -> String {
    fn class(c: char) -> Option<char> {
        match c {
            'b' | 'f' | 'p' | 'v' => Some('1'),
            'c' | 'g' | 'j' | 'k' | 'q' | 's' | 'x' | 'z' => Some('2'),
            'd' | 't' => Some('3'),
            'l' => Some('4'),
            'm' | 'n' => Some('5'),
            'r' => Some('6'),
            _ => None,
        }
    }

    let letters: Vec<char> = name
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    let Some(&first) = letters.first() else {
        return String::new();
    };

    let mut key = String::from(first.to_ascii_uppercase());
    let mut last = class(first);
    for &c in &letters[1..] {
        let code = class(c);
        if let Some(digit) = code
            && code != last
        {
            key.push(digit);
            if key.len() == 4 {
                break;
            }
        }
        if c != 'h' && c != 'w' {
            last = code;
        }
    }
    while key.len() < 4 {
        key.push('0');
    }
    key
}

fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];
    for i in 1..=a.len() {
        current[0] = i;
        for j in 1..=b.len() {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            current[j] = (previous[j] + 1).min(current[j - 1] + 1).min(previous[j - 1] + cost);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}
