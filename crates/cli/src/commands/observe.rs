//! `kenning session-end | observe`: run observers outside the claim stream.

use kenning_core::observation::Trigger;
use kenning_observers::{ObserverEvent, ObserverRunReport};

use crate::runtime::{CliResult, Runtime};

pub async fn session_end(rt: &Runtime, session: &str) -> CliResult {
    println!("🔚 Closing session {session}");
    let reports = rt.dispatcher.dispatch(ObserverEvent::session_end(session)).await;
    print_reports(&reports);
    Ok(())
}

pub async fn sweep(rt: &Runtime, scheduled: bool) -> CliResult {
    let trigger = if scheduled { Trigger::Schedule } else { Trigger::Manual };
    println!("🔭 Running observers ({})", trigger.as_str());
    let reports = rt.dispatcher.dispatch(ObserverEvent::new(trigger)).await;
    print_reports(&reports);
    Ok(())
}

fn print_reports(reports: &[ObserverRunReport]) {
    if reports.is_empty() {
        println!("   No observers ran.");
        return;
    }
    for report in reports {
        match &report.error {
            Some(e) => println!("   ❌ {:<14} {e}", report.observer),
            None => println!(
                "   ✅ {:<14} {} output(s) in {}ms",
                report.observer,
                report.output_ids.len(),
                report.duration_ms
            ),
        }
    }
}
