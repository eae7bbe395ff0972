//! `kenning ingest`: store one utterance and process it in the foreground.

use kenning_core::store::StoreExt;
use kenning_core::task::Task;
use kenning_observers::bridge::observer_event;
use tokio::sync::broadcast::error::TryRecvError;
use tracing::warn;

use crate::runtime::{CliResult, Runtime};

pub async fn run(rt: &Runtime, session: &str, speaker: &str, text: &str) -> CliResult {
    // Subscribe before ingesting so no claim event is missed.
    let mut rx = rt.events.subscribe();

    let (unit, task) = rt.queue.ingest(session, speaker, text).await?;
    println!("📥 Ingested unit {} (task {})", unit.id, task.id);

    rt.queue.wait_idle().await?;

    let mut claims = 0;
    let mut outputs = 0;
    loop {
        let event = match rx.try_recv() {
            Ok(event) => event,
            Err(TryRecvError::Lagged(skipped)) => {
                warn!(skipped, "Dropped events while ingesting");
                continue;
            }
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        };
        if let Some(dispatch) = observer_event(&event) {
            claims += 1;
            for report in rt.dispatcher.dispatch(dispatch).await {
                match &report.error {
                    Some(e) => println!("   ⚠️  {} failed: {e}", report.observer),
                    None => outputs += report.output_ids.len(),
                }
            }
        }
    }

    let done: Task = rt
        .store
        .get(&task.id)
        .await?
        .ok_or_else(|| format!("Task {} disappeared", task.id))?;
    println!("   Task:      {}", done.status.as_str());
    if let Some(error) = &done.error {
        println!("   Error:     {error}");
    }
    println!("   Claims:    {claims}");
    println!("   Outputs:   {outputs}");
    Ok(())
}
