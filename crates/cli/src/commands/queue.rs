//! `kenning process | recover | retry`: pipeline queue maintenance.

use crate::runtime::{CliResult, Runtime};

pub async fn process(rt: &Runtime) -> CliResult {
    let processed = rt.queue.advance().await;
    let status = rt.queue.status().await?;
    println!("⚙️  Processed {processed} task(s)");
    println!("   Pending: {}  Failed: {}", status.pending, status.failed);
    Ok(())
}

pub async fn recover(rt: &Runtime) -> CliResult {
    let recovered = rt.queue.recover().await?;
    println!("♻️  Re-queued {recovered} interrupted task(s)");
    if recovered > 0 {
        let processed = rt.queue.advance().await;
        println!("   Processed {processed} task(s)");
    }
    Ok(())
}

pub async fn retry(rt: &Runtime, task_id: &str) -> CliResult {
    let task = rt.queue.retry(task_id).await?;
    println!("🔁 Task {} re-queued (attempt {} of {})", task.id, task.attempts + 1, task.max_attempts);
    rt.queue.wait_idle().await?;
    Ok(())
}
