//! Gather exit codes and watch handles move through their lifecycle
//!
//! Run with: cargo run --example gather

use anyhow::Result;
use shellpool::{Scheduler, SchedulerConfig};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("🧪 Testing shellpool scheduler\n");

    let config = SchedulerConfig::new()
        .with_max_concurrency(2)
        .with_poll_interval(Duration::from_millis(50));
    let scheduler = Scheduler::new(config)?;
    scheduler.start()?;

    let codes = scheduler.gather(["exit 0", "exit 1", "exit 2"]).await?;
    println!("✅ Gathered exit codes: {:?}\n", codes);

    let handles = scheduler.spawn((1..=5).map(|n| format!("sleep 0.{} && exit {}", n, n)))?;

    println!("📊 Lifecycle:\n");
    while handles.iter().any(|handle| !handle.is_done()) {
        println!(
            "   pending: {}  running: {}",
            scheduler.pending_handles().len(),
            scheduler.running_handles().len()
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    println!();

    for handle in &handles {
        let report = handle.report();
        println!(
            "   {} [{}] exit: {:?} queued for: {:?}",
            handle,
            report.state,
            report.exit_code,
            report.queued_for().map(|d| d.num_milliseconds())
        );
    }

    scheduler.stop().await?;
    println!("\n✅ Scheduler stopped");
    Ok(())
}
