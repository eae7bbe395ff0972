//! The five pipeline steps. Every step is idempotent on its own: it checks
//! what is already persisted for the unit before doing any work.

use chrono::Utc;
use kenning_config::{PipelineConfig, ResolverConfig};
use kenning_core::claim::{normalize_statement, Claim, ClaimSource, ClaimState};
use kenning_core::entity::{Entity, EntityMention};
use kenning_core::error::{ExtractionError, LlmError, PipelineError, StoreError};
use kenning_core::event::{DomainEvent, EventBus};
use kenning_core::llm::{CallOptions, LlmClient};
use kenning_core::proposition::{ExtractionTrace, Proposition, Relation, Stance};
use kenning_core::record::{new_id, JsonList, Record};
use kenning_core::store::{Query, Store, StoreExt};
use kenning_core::task::PipelineStep;
use kenning_core::unit::{ConversationUnit, Span};
use kenning_extraction::extractor::tier_from_label;
use kenning_extraction::patterns::sanitize;
use kenning_extraction::{derive, EntityResolver, ExtractionContext, PatternMatcher, PropositionExtractor};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Store a new, unprocessed conversation unit.
pub async fn ingest_unit(
    store: &dyn Store,
    session_id: &str,
    speaker: &str,
    raw_text: &str,
) -> Result<ConversationUnit, StoreError> {
    let unit = ConversationUnit::new(session_id, speaker, raw_text);
    store.create(&unit).await?;
    debug!(unit_id = %unit.id, session = session_id, "Ingested conversation unit");
    Ok(unit)
}

/// Runs individual steps against one unit.
pub struct Pipeline {
    store: Arc<dyn Store>,
    llm: Option<Arc<dyn LlmClient>>,
    matcher: PatternMatcher,
    resolver: EntityResolver,
    config: PipelineConfig,
    options: CallOptions,
    events: Arc<EventBus>,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn Store>,
        llm: Option<Arc<dyn LlmClient>>,
        config: PipelineConfig,
        resolver: ResolverConfig,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            resolver: EntityResolver::new(store.clone(), resolver),
            store,
            llm,
            matcher: PatternMatcher::with_defaults(),
            config,
            options: CallOptions::default(),
            events,
        }
    }

    pub fn with_matcher(mut self, matcher: PatternMatcher) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn with_options(mut self, options: CallOptions) -> Self {
        self.options = options;
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn resolver(&self) -> &EntityResolver {
        &self.resolver
    }

    pub async fn run_step(&self, step: PipelineStep, unit: &ConversationUnit) -> Result<(), PipelineError> {
        match step {
            PipelineStep::Preprocess => self.preprocess(unit).await,
            PipelineStep::Extract => self.extract(unit).await,
            PipelineStep::Resolve => self.resolve(unit).await,
            PipelineStep::Derive => self.derive(unit).await,
            PipelineStep::Complete => self.complete(unit).await,
        }
    }

    async fn preprocess(&self, unit: &ConversationUnit) -> Result<(), PipelineError> {
        let text = match unit.sanitized_text.as_deref() {
            Some(text) if !text.is_empty() => text.to_string(),
            _ => {
                let sanitized = sanitize(&unit.raw_text);
                self.store
                    .update::<ConversationUnit>(&unit.id, json!({"sanitized_text": sanitized}))
                    .await?;
                sanitized
            }
        };

        if self.store.count::<Span>(Query::new().eq("unit_id", &unit.id)).await? > 0 {
            debug!(unit_id = %unit.id, "Spans already present, skipping pattern match");
            return Ok(());
        }

        let now = Utc::now();
        let mut created = 0;
        for result in self.matcher.find(&text) {
            for m in result.matches {
                let span = Span {
                    id: new_id(),
                    unit_id: unit.id.clone(),
                    pattern_id: m.pattern_id,
                    text: m.text,
                    start: m.start,
                    end: m.end,
                    created_at: now,
                };
                self.store.create(&span).await?;
                created += 1;
            }
        }
        debug!(unit_id = %unit.id, spans = created, "Preprocessed unit");
        Ok(())
    }

    async fn extract(&self, unit: &ConversationUnit) -> Result<(), PipelineError> {
        let by_unit = || Query::new().eq("unit_id", &unit.id);
        let existing = self.store.count::<Proposition>(by_unit()).await?;
        if existing > 0 {
            // Traces are written last, one per proposition.
            let traces = self.store.count::<ExtractionTrace>(by_unit()).await?;
            if traces >= existing {
                debug!(unit_id = %unit.id, propositions = existing, "Propositions already extracted, skipping LLM call");
                return Ok(());
            }
        }
        let discarded = self.discard_extraction(&unit.id).await?;
        if discarded > 0 {
            warn!(unit_id = %unit.id, discarded, "Discarded records from an interrupted extraction");
        }

        let llm = self
            .llm
            .clone()
            .ok_or_else(|| ExtractionError::from(LlmError::NotConfigured("no LLM client for extraction".into())))?;

        // The unit may have been sanitized by an earlier step of this run.
        let unit = self
            .store
            .get::<ConversationUnit>(&unit.id)
            .await?
            .unwrap_or_else(|| unit.clone());
        let text = unit.working_text().to_string();

        let spans: Vec<Span> = self
            .store
            .query(Query::new().eq("unit_id", &unit.id).sort_asc("start"))
            .await?;
        let entities: Vec<Entity> = self
            .store
            .query(Query::new().sort_desc("last_referenced").limit(self.config.recent_entities))
            .await?;
        let mut propositions: Vec<Proposition> = self
            .store
            .query(Query::new().sort_desc("created_at").limit(self.config.recent_propositions))
            .await?;
        propositions.reverse();

        let context = ExtractionContext {
            text: text.clone(),
            spans,
            entities,
            propositions,
        };
        let extractor = PropositionExtractor::new(llm, tier_from_label(&self.config.extraction_tier), self.options.clone());
        let output = extractor.extract(&context).await.map_err(ExtractionError::from)?;
        let records = output.into_records(&unit.id, &text, &context.spans);

        for proposition in &records.propositions {
            self.store.create(proposition).await?;
        }
        for stance in &records.stances {
            self.store.create(stance).await?;
        }
        for relation in &records.relations {
            self.store.create(relation).await?;
        }
        for mention in &records.mentions {
            self.store.create(mention).await?;
        }
        // Traces last: a full set marks the extraction as persisted.
        for trace in &records.traces {
            self.store.create(trace).await?;
        }

        info!(
            unit_id = %unit.id,
            propositions = records.propositions.len(),
            mentions = records.mentions.len(),
            "Extracted propositions"
        );
        Ok(())
    }

    /// Delete every record an earlier extraction of `unit_id` wrote.
    async fn discard_extraction(&self, unit_id: &str) -> Result<usize, StoreError> {
        let by_unit = || Query::new().eq("unit_id", unit_id);
        let mut removed = 0;
        let propositions: Vec<Proposition> = self.store.query(by_unit()).await?;
        for proposition in &propositions {
            removed += self
                .delete_all::<Stance>(Query::new().eq("proposition_id", &proposition.id))
                .await?;
        }
        removed += self.delete_all::<Relation>(by_unit()).await?;
        removed += self.delete_all::<EntityMention>(by_unit()).await?;
        removed += self.delete_all::<ExtractionTrace>(by_unit()).await?;
        removed += self.delete_all::<Proposition>(by_unit()).await?;
        Ok(removed)
    }

    async fn delete_all<T: Record>(&self, query: Query) -> Result<usize, StoreError> {
        let records: Vec<T> = self.store.query(query).await?;
        let mut removed = 0;
        for record in &records {
            if self.store.delete::<T>(record.id()).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn resolve(&self, unit: &ConversationUnit) -> Result<(), PipelineError> {
        let pending: Vec<EntityMention> = self
            .store
            .query(
                Query::new()
                    .eq("unit_id", &unit.id)
                    .is_null("resolution_method")
                    .sort_asc("created_at"),
            )
            .await?;
        if !pending.is_empty() {
            self.resolver.resolve(pending, &unit.session_id).await?;
        }

        let mentions: Vec<EntityMention> = self
            .store
            .query(Query::new().eq("unit_id", &unit.id).sort_asc("created_at"))
            .await?;
        let mut by_proposition: HashMap<&str, Vec<String>> = HashMap::new();
        for m in &mentions {
            if let (Some(prop_id), Some(entity_id)) = (m.proposition_id.as_deref(), m.resolved_entity_id.as_ref()) {
                let ids = by_proposition.entry(prop_id).or_default();
                if !ids.contains(entity_id) {
                    ids.push(entity_id.clone());
                }
            }
        }

        let propositions: Vec<Proposition> = self.store.query(Query::new().eq("unit_id", &unit.id)).await?;
        for p in propositions {
            let ids = by_proposition.remove(p.id.as_str()).unwrap_or_default();
            if ids != *p.entity_ids {
                let ids: JsonList<String> = ids.into();
                self.store
                    .update::<Proposition>(&p.id, json!({"entity_ids": ids.encode()}))
                    .await?;
            }
        }
        Ok(())
    }

    async fn derive(&self, unit: &ConversationUnit) -> Result<(), PipelineError> {
        let propositions: Vec<Proposition> = self
            .store
            .query(Query::new().eq("unit_id", &unit.id).sort_asc("created_at"))
            .await?;

        let mut created = 0;
        let mut reinforced = 0;
        for p in propositions {
            if self
                .store
                .count::<ClaimSource>(Query::new().eq("proposition_id", &p.id))
                .await?
                > 0
            {
                continue;
            }
            let Some(stance) = self
                .store
                .first::<Stance>(Query::new().eq("proposition_id", &p.id).sort_asc("created_at"))
                .await?
            else {
                continue;
            };

            let normalized = normalize_statement(&p.content);
            let existing = self
                .store
                .query::<Claim>(Query::new().eq("normalized_statement", &normalized).sort_asc("created_at"))
                .await?
                .into_iter()
                .find(|c| c.state != ClaimState::Superseded);

            let now = Utc::now();
            let claim_id = match existing.and_then(|c| c.reinforcement_patch(now).map(|patch| (c, patch))) {
                Some((claim, patch)) => {
                    self.store.update::<Claim>(&claim.id, patch).await?;
                    self.events.publish(DomainEvent::ClaimReinforced {
                        claim_id: claim.id.clone(),
                        confirmation_count: claim.confirmation_count.saturating_add(1),
                        timestamp: now,
                    });
                    reinforced += 1;
                    claim.id
                }
                None => {
                    let attrs = derive(&p, &stance);
                    let mut claim = Claim::from_attributes(&p.content, &p.subject, &attrs);
                    claim.source_proposition_id = Some(p.id.clone());
                    claim.source_stance_id = Some(stance.id.clone());
                    claim.session_id = Some(unit.session_id.clone());
                    claim.entity_ids = p.entity_ids.clone();
                    self.store.create(&claim).await?;
                    self.events.publish(DomainEvent::ClaimCreated {
                        claim_id: claim.id.clone(),
                        claim_type: claim.claim_type,
                        session_id: claim.session_id.clone(),
                        timestamp: now,
                    });
                    created += 1;
                    claim.id
                }
            };

            self.store
                .create(&ClaimSource::new(&claim_id, &unit.id, &p.id))
                .await?;
        }

        if created + reinforced > 0 {
            info!(unit_id = %unit.id, created, reinforced, "Derived claims");
        }
        Ok(())
    }

    async fn complete(&self, unit: &ConversationUnit) -> Result<(), PipelineError> {
        self.store
            .update::<ConversationUnit>(&unit.id, json!({"processed": true}))
            .await?;
        Ok(())
    }
}
