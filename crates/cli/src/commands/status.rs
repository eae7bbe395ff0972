//! `kenning status`: show configuration, queue, and memory state.

use kenning_config::AppConfig;
use kenning_core::claim::{Claim, ClaimState, MemoryTier};
use kenning_core::store::{Query, StoreExt};

use crate::runtime::{CliResult, Runtime};

pub async fn run(rt: &Runtime) -> CliResult {
    let config = &rt.config;
    let queue = rt.queue.status().await?;
    let store = rt.store.as_ref();

    let claims = store.count::<Claim>(Query::new()).await?;
    let long_term = store
        .count::<Claim>(Query::new().eq("memory_tier", MemoryTier::LongTerm))
        .await?;
    let stale = store.count::<Claim>(Query::new().eq("state", ClaimState::Stale)).await?;
    let dormant = store.count::<Claim>(Query::new().eq("state", ClaimState::Dormant)).await?;

    println!("🧠 Kenning Status");
    println!("=================");
    println!("  Config dir:   {}", AppConfig::config_dir().display());
    println!("  Store:        {}", config.store.backend);
    if config.store.backend == "sqlite" {
        println!("  Database:     {}", config.store.resolved_path().display());
    }
    println!(
        "  LLM:          {}",
        if config.llm.api_key.is_some() { config.llm.api_url.as_str() } else { "not configured" }
    );
    println!("  Observers:    {}", rt.dispatcher.registry().kinds().join(", "));
    println!();
    println!("  Tasks:        {} pending, {} processing, {} completed, {} failed",
        queue.pending, queue.processing, queue.completed, queue.failed);
    println!("  Claims:       {claims} ({long_term} long-term, {stale} stale, {dormant} dormant)");

    if config.llm.api_key.is_none() {
        println!("\n  ⚠️  No API key: set KENNING_API_KEY to enable extraction");
    }
    Ok(())
}
