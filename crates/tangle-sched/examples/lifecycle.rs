//! End-to-end lifecycle demo: groups, deadlines, oversight and collection on
//! a virtual clock.
//!
//! Run with:
//!   cargo run --example lifecycle -p tangle-sched
//!   cargo run --example lifecycle -p tangle-sched -- path/to/policy.json
//!
//! Set `RUST_LOG=debug` to see every lifecycle transition.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tangle_core::prelude::*;
use tangle_sched::prelude::*;
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

fn load_policy() -> anyhow::Result<GcPolicy> {
    match std::env::args().nth(1) {
        Some(path) => {
            let json = std::fs::read_to_string(&path)
                .with_context(|| format!("reading policy file {path}"))?;
            GcPolicy::from_json_str(&json).with_context(|| format!("loading policy from {path}"))
        }
        None => Ok(GcPolicy::default()),
    }
}

fn print_report(label: &str, report: &GcResult) -> anyhow::Result<()> {
    println!("--- {label} ---");
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let policy = load_policy()?;
    let config = SchedulerConfig {
        policy: policy.clone(),
        ..SchedulerConfig::default()
    };

    let clock = Arc::new(VirtualClock::new());
    let provider = Arc::new(InMemoryProvider::new());
    let journal = Arc::new(EventJournal::new());
    let mut tracker = GroupTracker::new(clock.clone());
    tracker.subscribe(journal.clone());
    let mut scheduler = DeadlineScheduler::with_config(clock.clone(), provider.clone(), config)?;
    scheduler.subscribe(journal.clone());

    // -----------------------------------------------------------------------
    // Resources and groups
    // -----------------------------------------------------------------------

    let ids: Vec<ResourceId> = (1..=6).map(ResourceId::new).collect();
    for (i, &id) in ids.iter().enumerate() {
        provider.insert(id, 4_096 * (i as u64 + 1));
    }
    provider.set_critical(ids[5], true);

    let bell = tracker.create_group(&ids[0..2], GroupKind::Bell)?;
    let ghz = tracker.create_group(&ids[2..5], GroupKind::Ghz)?;
    println!("created {bell} (bell) and {ghz} (ghz)");

    for (&id, ms) in ids.iter().zip([800, 900, 1_500, 1_500, 20_000, 700]) {
        let handle = scheduler.schedule_decoherence(id, Duration::from_millis(ms));
        println!("{id}: deadline {} ms, priority {}", handle.deadline_ms, handle.priority);
    }

    // -----------------------------------------------------------------------
    // Time passes
    // -----------------------------------------------------------------------

    clock.advance(1_000);
    let tick = scheduler.tick(&mut tracker);
    println!("t={} ms: new candidates {:?}", tick.at_ms, tick.timers.new_candidates);
    print_report("gc at 1s", &scheduler.trigger_gc(&mut tracker, &policy))?;

    clock.advance(1_000);
    scheduler.reset_activity(ids[4]);
    scheduler.tick(&mut tracker);
    let report = scheduler.trigger_gc(&mut tracker, &policy);
    print_report("gc at 2s", &report)?;

    for id in &report.oversight_required {
        println!("oversight approved {id}");
        scheduler.approve_oversight(*id);
    }
    print_report("gc after approval", &scheduler.trigger_gc(&mut tracker, &policy))?;

    // -----------------------------------------------------------------------
    // Summary
    // -----------------------------------------------------------------------

    println!("--- summary ---");
    println!("{}", serde_json::to_string_pretty(&scheduler.stats())?);
    println!("{}", serde_json::to_string_pretty(&tracker.metrics())?);
    println!("tracker state hash {}", tracker.view().state_hash());
    println!("{} events journaled", journal.len());
    Ok(())
}
