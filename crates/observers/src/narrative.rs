//! Self-narrative summaries.

use async_trait::async_trait;
use kenning_core::claim::{Claim, ClaimState, ClaimType};
use kenning_core::error::ObserverError;
use kenning_core::llm::{parse_json_block, CallOptions, LlmClient, LlmRequest, ModelTier};
use kenning_core::observation::{ObserverOutput, Trigger};
use kenning_core::store::{Query, StoreExt};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::observer::{Observer, ObserverContext};

pub const KIND: &str = "narrative";
pub const OUTPUT: &str = "narrative_summary";

/// Most recent claims sent for summarization.
const WINDOW: usize = 20;

const SYSTEM_PROMPT: &str = "You summarize how a person sees themselves, using only the statements given. \
Answer with JSON only: {\"narrative\": \"<two or three sentences>\", \"themes\": [\"<short theme>\"]}.";

#[derive(Debug, Deserialize)]
struct Summary {
    narrative: String,
    #[serde(default)]
    themes: Vec<String>,
}

fn is_narrative(claim: &Claim) -> bool {
    matches!(claim.claim_type, ClaimType::SelfPerception | ClaimType::Memory) && claim.state != ClaimState::Superseded
}

pub struct NarrativeObserver {
    min_claims: usize,
}

impl NarrativeObserver {
    pub fn new(min_claims: usize) -> Self {
        Self {
            min_claims: min_claims.max(1),
        }
    }
}

#[async_trait]
impl Observer for NarrativeObserver {
    fn kind(&self) -> &str {
        KIND
    }

    fn triggers(&self) -> &[Trigger] {
        &[Trigger::SessionEnd, Trigger::Schedule, Trigger::Manual]
    }

    fn priority(&self) -> i32 {
        20
    }

    fn uses_llm(&self) -> bool {
        true
    }

    async fn run(&self, ctx: &ObserverContext) -> Result<Vec<ObserverOutput>, ObserverError> {
        let claims: Vec<Claim> = ctx
            .store
            .query::<Claim>(Query::new().sort_desc("created_at"))
            .await?
            .into_iter()
            .filter(is_narrative)
            .collect();
        if claims.len() < self.min_claims {
            debug!(claims = claims.len(), needed = self.min_claims, "Not enough material for a narrative");
            return Ok(Vec::new());
        }

        // Nothing new since the last summary.
        let last: Option<ObserverOutput> = ctx
            .store
            .first(Query::new().eq("output_type", OUTPUT).sort_desc("created_at"))
            .await?;
        if let Some(last) = last
            && last.payload["claim_count"].as_u64() == Some(claims.len() as u64)
        {
            return Ok(Vec::new());
        }

        let llm = ctx.llm(KIND)?;
        let window = &claims[..claims.len().min(WINDOW)];
        let mut prompt = String::from("Statements, newest first:\n");
        for claim in window {
            prompt.push_str(&format!("- {}\n", claim.statement));
        }

        let request = LlmRequest::new(ModelTier::Medium, prompt)
            .with_system(SYSTEM_PROMPT)
            .with_options(CallOptions {
                temperature: 0.4,
                max_tokens: 400,
            });
        let response = llm.call(request).await.map_err(|source| ObserverError::Llm {
            observer: KIND.to_string(),
            source,
        })?;
        let Some(summary) = parse_json_block::<Summary>(&response.content) else {
            debug!("Unparseable narrative summary");
            return Ok(Vec::new());
        };
        if summary.narrative.trim().is_empty() {
            return Ok(Vec::new());
        }

        Ok(vec![ctx.output(
            KIND,
            OUTPUT,
            json!({
                "narrative": summary.narrative.trim(),
                "themes": summary.themes,
                "claim_count": claims.len(),
                "model": response.model,
            }),
            window.iter().map(|c| c.id.clone()).collect(),
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kenning_core::claim::ClaimAttributes;
    use kenning_core::store::Store;
    use kenning_providers::ScriptedClient;
    use kenning_store::InMemoryStore;
    use std::sync::Arc;

    fn self_view(i: usize) -> Claim {
        Claim::from_attributes(
            format!("I am someone who keeps promises ({i})"),
            "self",
            &ClaimAttributes {
                claim_type: ClaimType::SelfPerception,
                ..ClaimAttributes::default()
            },
        )
    }

    fn ctx(store: Arc<dyn Store>, llm: Arc<dyn LlmClient>) -> ObserverContext {
        ObserverContext {
            store,
            llm: Some(llm),
            trigger: Trigger::SessionEnd,
            session_id: None,
            claims: vec![],
            now: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn gated_on_claim_count() {
        let store = Arc::new(InMemoryStore::new());
        let client = Arc::new(ScriptedClient::with_responses([
            r#"{"narrative": "Reliable and loyal.", "themes": ["reliability"]}"#,
        ]));
        let observer = NarrativeObserver::new(10);

        for i in 0..9 {
            store.create(&self_view(i)).await.unwrap();
        }
        assert!(observer.run(&ctx(store.clone(), client.clone())).await.unwrap().is_empty());
        assert_eq!(client.calls(), 0);

        store.create(&self_view(9)).await.unwrap();
        let out = observer.run(&ctx(store.clone(), client.clone())).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].payload["narrative"], "Reliable and loyal.");
        assert_eq!(out[0].source_claim_ids.len(), 10);
        store.create(&out[0]).await.unwrap();

        // Same material, no second call.
        assert!(observer.run(&ctx(store.clone(), client.clone())).await.unwrap().is_empty());
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn malformed_summary_is_a_no_op() {
        let store = Arc::new(InMemoryStore::new());
        store.create(&self_view(0)).await.unwrap();
        let client = Arc::new(ScriptedClient::with_responses(["I'd rather not"]));
        let out = NarrativeObserver::new(1).run(&ctx(store, client)).await.unwrap();
        assert!(out.is_empty());
    }
}
