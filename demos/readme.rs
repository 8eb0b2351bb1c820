//! Run the same batch under different concurrency caps
//!
//! Run with: cargo run --example readme

use anyhow::Result;
use futures::stream::{self, StreamExt};
use shellpool::{merge, Scheduler, SchedulerConfig, StreamSelector};
use std::time::Instant;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    for cap in [1, 2, 4] {
        let start = Instant::now();
        Scheduler::scoped(SchedulerConfig::new().with_max_concurrency(cap), |s| async move {
            tokio::try_join!(one(&s), two(&s))?;
            Ok::<_, anyhow::Error>(())
        })
        .await?;
        println!(
            "⏱  Limiting to {} concurrent process(es) took {:.2?}\n",
            cap,
            start.elapsed()
        );
    }

    Ok(())
}

/// Merged, decoded lines straight from the scheduler
async fn one(s: &Scheduler) -> Result<()> {
    let cmds = [
        "sleep 1 && echo process 1 in task one",
        "sleep 1 && echo process 2 in task one",
    ];
    let mut lines = s.iter_lines(cmds, StreamSelector::Stdout)?;
    while let Some(line) = lines.next().await {
        println!("{}", line);
    }
    Ok(())
}

/// Raw chunks from individual handles, merged by hand
async fn two(s: &Scheduler) -> Result<()> {
    let handles = s.spawn([
        "sleep 1 && echo process 1 in task two",
        "sleep 1 && echo process 2 in task two",
    ])?;
    let mut chunks = merge(handles.iter().map(|handle| handle.stdout_chunks()));
    while let Some(chunk) = chunks.next().await {
        print!("{}", String::from_utf8_lossy(&chunk?));
    }

    let codes: Vec<i32> = stream::iter(&handles)
        .then(|handle| handle.wait_done())
        .collect()
        .await;
    println!("   task two exit codes: {:?}", codes);
    Ok(())
}
