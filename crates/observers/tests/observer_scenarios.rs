use kenning_config::{MemoryConfig, ObserverConfig, PipelineConfig, ResolverConfig};
use kenning_core::claim::{Claim, ClaimAttributes, ClaimType};
use kenning_core::event::{DomainEvent, EventBus};
use kenning_core::llm::LlmClient;
use kenning_core::observation::{ObserverOutput, Trigger};
use kenning_core::store::{Query, Store, StoreExt};
use kenning_memory::MemoryService;
use kenning_observers::contradiction::{find_candidates, SUBJECT_OVERLAP};
use kenning_observers::{default_registry, spawn_bridge, Dispatcher, ObserverEvent};
use kenning_pipeline::{Pipeline, TaskQueue};
use kenning_providers::ScriptedClient;
use kenning_store::InMemoryStore;
use std::sync::Arc;
use std::time::Duration;

const WORRIED: &str = r#"{"propositions": [
    {"content": "I might lose my job", "subject": "job", "type": "state",
     "stance": {"epistemic": {"certainty": 0.7, "evidence": "inferred"},
                "volitional": {"type": "fear", "strength": 0.8, "valence": -0.8},
                "affective": {"valence": -0.7, "arousal": 0.65, "emotions": ["worry"]}}}],
  "relations": [],
  "entities": [{"text": "I", "mention_type": "self_reference", "proposition_index": 0}]}"#;

fn dispatcher(store: Arc<InMemoryStore>, llm: Arc<dyn LlmClient>, events: Arc<EventBus>) -> Dispatcher {
    let memory = Arc::new(MemoryService::new(store.clone(), MemoryConfig::default(), events.clone()));
    let config = ObserverConfig::default();
    Dispatcher::new(default_registry(&config, memory), store, Some(llm), &config, events)
}

#[tokio::test]
async fn worried_utterance_raises_a_concern() {
    let store = Arc::new(InMemoryStore::new());
    let llm: Arc<dyn LlmClient> = Arc::new(ScriptedClient::with_responses([WORRIED]));
    let events = Arc::new(EventBus::default());

    let observers = Arc::new(dispatcher(store.clone(), llm.clone(), events.clone()));
    let mut rx = events.subscribe();
    let bridge = spawn_bridge(observers, &events);

    let queue = TaskQueue::new(Pipeline::new(
        store.clone(),
        Some(llm),
        PipelineConfig::default(),
        ResolverConfig::default(),
        events.clone(),
    ));
    queue
        .ingest("s1", "user", "I'm really worried I might lose my job")
        .await
        .unwrap();
    queue.wait_idle().await.unwrap();

    // Consolidation always runs last for an event.
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = rx.recv().await.unwrap();
            if let DomainEvent::ObserverRan { observer, .. } = event.as_ref()
                && observer == "consolidation"
            {
                break;
            }
        }
    })
    .await
    .unwrap();

    let claim: Claim = store.first(Query::new()).await.unwrap().unwrap();
    assert_eq!(claim.claim_type, ClaimType::Concern);

    let concerns: Vec<ObserverOutput> = store
        .query(Query::new().eq("output_type", "concern_new"))
        .await
        .unwrap();
    assert_eq!(concerns.len(), 1);
    assert!(concerns[0].references(&claim.id));
    assert_eq!(concerns[0].trigger, Trigger::NewClaim);

    bridge.abort();
}

#[tokio::test]
async fn changed_decision_is_flagged_as_contradiction() {
    let store = Arc::new(InMemoryStore::new());
    let decided = Claim::from_attributes(
        "I decided to quit my job",
        "job",
        &ClaimAttributes {
            claim_type: ClaimType::Decision,
            ..ClaimAttributes::default()
        },
    );
    let reversed = Claim::from_attributes("I'm not quitting after all", "job", &ClaimAttributes::default());
    store.create(&decided).await.unwrap();
    store.create(&reversed).await.unwrap();

    let pool: Vec<Claim> = store.query(Query::new()).await.unwrap();
    let candidates = find_candidates(&reversed, &pool, 0.5, 5);
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].claim.id, decided.id);
    assert_eq!(candidates[0].similarity, SUBJECT_OVERLAP);

    let verdict = format!(
        r#"{{"contradictions": [{{"claim_a": "{}", "claim_b": "{}", "type": "temporal", "explanation": "Changed their mind about quitting."}}]}}"#,
        reversed.id, decided.id
    );
    let llm: Arc<dyn LlmClient> = Arc::new(ScriptedClient::new().respond_when("Earlier statements", verdict));
    let events = Arc::new(EventBus::default());
    let d = dispatcher(store.clone(), llm, events);

    let reports = d
        .dispatch(ObserverEvent::new_claim(reversed.id.clone(), None))
        .await;
    let run = reports.iter().find(|r| r.observer == "contradiction").unwrap();
    assert!(run.success());
    assert_eq!(run.output_ids.len(), 1);

    let found: ObserverOutput = store.get(&run.output_ids[0]).await.unwrap().unwrap();
    assert_eq!(found.payload["contradiction_type"], "temporal");
    assert!(found.references(&decided.id) && found.references(&reversed.id));
    assert_eq!(reports.last().map(|r| r.observer.as_str()), Some("consolidation"));
}

#[tokio::test]
async fn session_end_without_llm_still_runs_rule_observers() {
    let store = Arc::new(InMemoryStore::new());
    let events = Arc::new(EventBus::default());
    let memory = Arc::new(MemoryService::new(store.clone(), MemoryConfig::default(), events.clone()));
    let config = ObserverConfig::default();
    let d = Dispatcher::new(
        default_registry(&config, memory),
        store.clone() as Arc<dyn Store>,
        None,
        &config,
        events,
    );

    let reports = d.dispatch(ObserverEvent::session_end("s1")).await;
    let ran: Vec<&str> = reports.iter().map(|r| r.observer.as_str()).collect();
    assert_eq!(ran, vec!["concern", "relationship", "narrative", "consolidation"]);
    assert!(reports.iter().all(|r| r.success()));
}
