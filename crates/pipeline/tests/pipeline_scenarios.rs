use chrono::Utc;
use kenning_config::{PipelineConfig, ResolverConfig};
use kenning_core::claim::{Claim, ClaimSource, ClaimType, Stakes};
use kenning_core::entity::{Entity, EntityType};
use kenning_core::event::EventBus;
use kenning_core::llm::LlmClient;
use kenning_core::proposition::{Proposition, Stance, VolitionalType};
use kenning_core::store::{Query, StoreExt};
use kenning_core::task::{Checkpoint, PipelineStep, Task, TaskStatus};
use kenning_core::unit::{ConversationUnit, Span};
use kenning_pipeline::{Pipeline, TaskQueue};
use kenning_providers::ScriptedClient;
use kenning_store::InMemoryStore;
use std::sync::Arc;

const WORRIED: &str = r#"{"propositions": [
    {"content": "I might lose my job", "subject": "job", "type": "state",
     "stance": {"epistemic": {"certainty": 0.7, "evidence": "inferred"},
                "volitional": {"type": "fear", "strength": 0.8, "valence": -0.8},
                "affective": {"valence": -0.7, "arousal": 0.65, "emotions": ["worry"]}}}],
  "relations": [],
  "entities": [{"text": "I", "mention_type": "self_reference", "proposition_index": 0},
               {"text": "my job", "mention_type": "common_noun", "suggested_type": "thing", "proposition_index": 0}]}"#;

fn queue(store: Arc<InMemoryStore>, llm: Arc<ScriptedClient>) -> TaskQueue {
    TaskQueue::new(Pipeline::new(
        store,
        Some(llm as Arc<dyn LlmClient>),
        PipelineConfig::default(),
        ResolverConfig::default(),
        Arc::new(EventBus::default()),
    ))
}

async fn counts(store: &InMemoryStore) -> (usize, usize, usize, usize) {
    (
        store.count::<Span>(Query::new()).await.unwrap(),
        store.count::<Proposition>(Query::new()).await.unwrap(),
        store.count::<Claim>(Query::new()).await.unwrap(),
        store.count::<ClaimSource>(Query::new()).await.unwrap(),
    )
}

#[tokio::test]
async fn worried_utterance_becomes_high_stakes_concern() {
    let store = Arc::new(InMemoryStore::new());
    let llm = Arc::new(ScriptedClient::with_responses([WORRIED]));
    let q = queue(store.clone(), llm);

    let (unit, _) = q
        .ingest("s1", "user", "I'm really worried I might lose my job")
        .await
        .unwrap();
    q.wait_idle().await.unwrap();

    let spans: Vec<Span> = store.query(Query::new().eq("unit_id", &unit.id)).await.unwrap();
    assert!(spans.iter().any(|s| s.text == "worried"));

    let props: Vec<Proposition> = store.query(Query::new().eq("unit_id", &unit.id)).await.unwrap();
    assert_eq!(props.len(), 1);
    assert_eq!(props[0].subject, "job");

    let stance: Stance = store
        .first(Query::new().eq("proposition_id", &props[0].id))
        .await
        .unwrap()
        .unwrap();
    let volition = stance.volitional.unwrap();
    assert_eq!(volition.volitional_type, VolitionalType::Fear);
    assert!(volition.strength > 0.5);
    assert!(stance.affective.valence < 0.0 && stance.affective.arousal > 0.5);

    let claims: Vec<Claim> = store.query(Query::new()).await.unwrap();
    assert_eq!(claims.len(), 1);
    assert_eq!(claims[0].claim_type, ClaimType::Concern);
    assert!(matches!(claims[0].stakes, Stakes::High | Stakes::Existential));
    assert_eq!(claims[0].entity_ids.len(), 2);

    let me: Entity = store
        .first(Query::new().eq("entity_type", EntityType::SelfEntity))
        .await
        .unwrap()
        .unwrap();
    assert!(claims[0].entity_ids.contains(&me.id));
}

#[tokio::test]
async fn rerunning_a_unit_duplicates_nothing() {
    let store = Arc::new(InMemoryStore::new());
    let llm = Arc::new(ScriptedClient::with_responses([WORRIED]));
    let q = queue(store.clone(), llm.clone());

    let (unit, _) = q
        .ingest("s1", "user", "I'm really worried I might lose my job")
        .await
        .unwrap();
    q.wait_idle().await.unwrap();
    let before = counts(&store).await;

    // Already processed: a fresh task is a no-op.
    q.enqueue(&unit.id).await.unwrap();
    q.wait_idle().await.unwrap();
    assert_eq!(counts(&store).await, before);

    // Partially processed: every step finds its work done.
    store
        .update::<ConversationUnit>(&unit.id, serde_json::json!({"processed": false}))
        .await
        .unwrap();
    q.enqueue(&unit.id).await.unwrap();
    q.wait_idle().await.unwrap();

    assert_eq!(counts(&store).await, before);
    assert_eq!(llm.calls(), 1);
    let claim: Claim = store.first(Query::new()).await.unwrap().unwrap();
    assert_eq!(claim.confirmation_count, 1);
}

#[tokio::test]
async fn crashed_task_resumes_after_checkpoint() {
    let store = Arc::new(InMemoryStore::new());
    let llm = Arc::new(ScriptedClient::with_responses([WORRIED]));
    let q = queue(store.clone(), llm.clone());

    let unit = kenning_pipeline::ingest_unit(store.as_ref(), "s1", "user", "I'm really worried I might lose my job")
        .await
        .unwrap();
    for step in [PipelineStep::Preprocess, PipelineStep::Extract, PipelineStep::Resolve] {
        q.pipeline().run_step(step, &unit).await.unwrap();
    }
    let spans_before = store.count::<Span>(Query::new()).await.unwrap();

    // The process died while the task was mid-flight.
    let mut task = Task::process_unit(&unit.id, 3);
    task.status = TaskStatus::Processing;
    task.attempts = 1;
    task.checkpoint = Some(Checkpoint {
        step: PipelineStep::Resolve,
        timestamp: Utc::now(),
    });
    store.create(&task).await.unwrap();

    assert_eq!(q.recover().await.unwrap(), 1);
    q.wait_idle().await.unwrap();

    let task: Task = store.get(&task.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.checkpoint.map(|c| c.step), Some(PipelineStep::Complete));
    assert_eq!(llm.calls(), 1);
    assert_eq!(store.count::<Span>(Query::new()).await.unwrap(), spans_before);
    assert_eq!(store.count::<Claim>(Query::new()).await.unwrap(), 1);

    let unit: ConversationUnit = store.get(&unit.id).await.unwrap().unwrap();
    assert!(unit.processed);
}
