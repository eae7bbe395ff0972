//! `kenning daemon`: long-running pipeline, decay, and observer runtime.

use kenning_core::observation::Trigger;
use kenning_observers::{ObserverEvent, spawn_bridge};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::runtime::{CliResult, Runtime};

/// Which periodic jobs are due on a tick.
#[derive(Debug, Default, PartialEq, Eq)]
struct Due {
    decay: bool,
    sweep: bool,
}

/// Tracks when decay and scheduled observer sweeps last ran.
struct Cadence {
    decay_every: Duration,
    sweep_every: Duration,
    last_decay: Option<Instant>,
    last_sweep: Option<Instant>,
}

impl Cadence {
    fn new(decay_every: Duration, sweep_every: Duration) -> Self {
        Self {
            decay_every,
            sweep_every,
            last_decay: None,
            last_sweep: None,
        }
    }

    /// Jobs due at `now`. Marks them as run.
    fn poll(&mut self, now: Instant) -> Due {
        let decay = self.last_decay.is_none_or(|t| now - t >= self.decay_every);
        let sweep = self.last_sweep.is_none_or(|t| now - t >= self.sweep_every);
        if decay {
            self.last_decay = Some(now);
        }
        if sweep {
            self.last_sweep = Some(now);
        }
        Due { decay, sweep }
    }
}

pub async fn run(rt: Runtime, tick_secs: u64, decay_minutes: u64, sweep_minutes: u64) -> CliResult {
    println!("🧠 Kenning Daemon: starting");
    println!("   Store:      {}", rt.config.store.backend);
    println!("   Observers:  {}", rt.dispatcher.registry().kinds().join(", "));
    println!("   Tick:       {tick_secs}s, decay every {decay_minutes}m, sweep every {sweep_minutes}m");

    let recovered = rt.queue.recover().await?;
    if recovered > 0 {
        info!(recovered, "Resuming interrupted tasks");
    }

    let bridge = spawn_bridge(rt.dispatcher.clone(), &rt.events);

    let queue = rt.queue.clone();
    let memory = rt.memory.clone();
    let dispatcher = rt.dispatcher.clone();
    let mut cadence = Cadence::new(
        Duration::from_secs(decay_minutes.max(1) * 60),
        Duration::from_secs(sweep_minutes.max(1) * 60),
    );

    let maintenance = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(tick_secs.max(1)));

        loop {
            interval.tick().await;

            let processed = queue.advance().await;
            if processed > 0 {
                info!(processed, "Drained pipeline queue");
            }

            let due = cadence.poll(Instant::now());
            if due.decay {
                let report = memory.run_decay().await;
                if !report.errors.is_empty() {
                    warn!(errors = report.errors.len(), "Decay pass had errors");
                }
                if let Err(e) = memory.refresh_salience().await {
                    warn!(error = %e, "Salience refresh failed");
                }
            }
            if due.sweep {
                let reports = dispatcher.dispatch(ObserverEvent::new(Trigger::Schedule)).await;
                let failed = reports.iter().filter(|r| !r.success()).count();
                info!(runs = reports.len(), failed, "Scheduled observer sweep");
            }
        }
    });

    info!("Daemon running; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down");
    maintenance.abort();
    rt.queue.wait_idle().await?;
    bridge.abort();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_poll_runs_everything() {
        let mut cadence = Cadence::new(Duration::from_secs(60), Duration::from_secs(120));
        assert_eq!(cadence.poll(Instant::now()), Due { decay: true, sweep: true });
    }

    #[test]
    fn jobs_wait_for_their_interval() {
        let start = Instant::now();
        let mut cadence = Cadence::new(Duration::from_secs(60), Duration::from_secs(120));
        cadence.poll(start);

        assert_eq!(cadence.poll(start + Duration::from_secs(30)), Due::default());
        assert_eq!(
            cadence.poll(start + Duration::from_secs(60)),
            Due { decay: true, sweep: false }
        );
        assert_eq!(
            cadence.poll(start + Duration::from_secs(120)),
            Due { decay: true, sweep: true }
        );
    }
}
