//! `kenning decay | consolidate | top`: memory maintenance and recall.

use kenning_core::claim::{Claim, MemoryTier};
use kenning_core::store::{Query, StoreExt};
use kenning_memory::TopOfMind;

use crate::runtime::{CliResult, Runtime};

pub async fn decay(rt: &Runtime) -> CliResult {
    let report = rt.memory.run_decay().await;
    println!("🍂 Decay pass complete");
    println!("   Processed:      {}", report.processed);
    println!("   Became stale:   {}", report.became_stale);
    println!("   Became dormant: {}", report.became_dormant);
    for error in &report.errors {
        match &error.claim_id {
            Some(id) => println!("   ⚠️  {id}: {}", error.message),
            None => println!("   ⚠️  {}", error.message),
        }
    }
    let refreshed = rt.memory.refresh_salience().await?;
    println!("   Salience moved: {refreshed}");
    Ok(())
}

pub async fn consolidate(rt: &Runtime) -> CliResult {
    let working: Vec<Claim> = rt
        .store
        .query(Query::new().eq("memory_tier", MemoryTier::Working).is_null("superseded_by"))
        .await?;

    let mut promoted = 0;
    for claim in working.iter().filter(|c| rt.memory.should_promote(c)) {
        if rt.memory.promote_to_long_term(&claim.id).await? {
            println!("   ⬆️  {}", claim.statement);
            promoted += 1;
        }
    }
    println!("📚 Promoted {promoted} of {} working claim(s)", working.len());
    Ok(())
}

pub async fn top(rt: &Runtime, limit: Option<usize>, json: bool) -> CliResult {
    let top = rt.memory.top_of_mind(limit).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&top)?);
    } else {
        print_summary(&top);
    }
    Ok(())
}

fn print_summary(top: &TopOfMind) {
    println!("💭 Top of mind ({})", top.generated_at.format("%Y-%m-%d %H:%M"));

    section("Topics", top.topics.iter().map(|t| format!("{} ({} claims, {:.2})", t.subject, t.claim_count, t.salience)));
    section("People & things", top.entities.iter().map(|e| format!("{} [{}] ×{}", e.name, e.entity_type.as_str(), e.mention_count)));
    section("Goals", top.goals.iter().map(|g| format!("{} [{}]", g.title, g.status.as_str())));
    section("Concerns", top.concerns.iter().map(|c| c.statement.clone()));
    section("Open questions", top.questions.iter().map(|c| c.statement.clone()));
    section("Emotional highlights", top.emotional_highlights.iter().map(|c| format!("{} ({:.2})", c.statement, c.emotional_intensity)));
}

fn section(title: &str, lines: impl Iterator<Item = String>) {
    let lines: Vec<String> = lines.collect();
    if lines.is_empty() {
        return;
    }
    println!("\n  {title}:");
    for line in lines {
        println!("   - {line}");
    }
}
