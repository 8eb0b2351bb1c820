//! Shellpool CLI entry point

use anyhow::Result;
use clap::Parser;
use futures::future::join_all;
use futures::StreamExt;
use shellpool::{report, Scheduler, SchedulerConfig, StreamSelector};
use std::path::PathBuf;

/// Run shell commands with bounded concurrency
#[derive(Debug, Parser)]
#[command(name = "shellpool", version, about)]
struct Cli {
    /// Maximum number of commands running at once
    #[arg(short = 'j', long = "jobs")]
    jobs: Option<usize>,

    /// Detect exits by polling every N milliseconds
    #[arg(long = "poll-ms")]
    poll_ms: Option<u64>,

    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output stream to print: stdout, stderr or both
    #[arg(short, long, default_value = "both")]
    stream: String,

    /// Wait for all commands and print their exit codes instead of output
    #[arg(short, long)]
    gather: bool,

    /// With --gather, print a JSON report per command
    #[arg(long, requires = "gather")]
    json: bool,

    /// Shell commands to run
    #[arg(required = true)]
    commands: Vec<String>,
}

impl Cli {
    fn scheduler_config(&self) -> Result<SchedulerConfig> {
        let mut config = match &self.config {
            Some(path) => SchedulerConfig::from_file(path)?,
            None => SchedulerConfig::default(),
        };
        if let Some(jobs) = self.jobs {
            config.max_concurrency = jobs;
        }
        if let Some(ms) = self.poll_ms {
            config.poll_interval_ms = Some(ms);
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let selector: StreamSelector = cli.stream.parse()?;
    let config = cli.scheduler_config()?;

    log::info!(
        "shellpool v{}: {} command(s), max concurrency {}",
        env!("CARGO_PKG_VERSION"),
        cli.commands.len(),
        config.max_concurrency
    );

    let all_ok = Scheduler::scoped(config, |scheduler| async move {
        if !cli.gather {
            let mut lines = scheduler.iter_lines(&cli.commands, selector)?;
            while let Some(line) = lines.next().await {
                println!("{}", line);
            }
            return Ok::<_, anyhow::Error>(true);
        }

        let handles = scheduler.spawn(&cli.commands)?;
        join_all(handles.iter().map(|handle| handle.drain())).await;

        if cli.json {
            let reports: Vec<_> = handles.iter().map(|handle| handle.report()).collect();
            println!("{}", report::to_json(&reports)?);
        } else {
            for handle in &handles {
                println!("{}", handle.exit_code().unwrap_or(shellpool::core::UNKNOWN_EXIT_CODE));
            }
        }

        Ok(handles.iter().all(|handle| handle.exit_code() == Some(0)))
    })
    .await?;

    if !all_ok {
        std::process::exit(1);
    }
    Ok(())
}
