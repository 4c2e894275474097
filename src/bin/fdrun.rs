//! fdrun CLI: read or generate large file sets without tripping over the
//! open-file limit.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use fdrun::BatchEvent;
use fdrun::config::Config;
use fdrun::files::{generate_fixtures, list_files, read_all};
use fdrun::runner::Runner;
use fdrun::telemetry::{TelemetryConfig, init_telemetry};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "fdrun", about = "Run file operations with adaptive concurrency")]
struct Cli {
    /// TOML config file (environment variables are used when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Read every file in a directory concurrently
    Read {
        dir: PathBuf,
        /// Print the batch summary as JSON
        #[arg(long)]
        json: bool,
        /// Print each file as it completes
        #[arg(long, short)]
        verbose: bool,
    },
    /// Recreate a directory filled with identical fixture files
    Generate {
        dir: PathBuf,
        /// Number of files
        #[arg(long, default_value_t = 20_000)]
        count: usize,
        /// Size of each file in bytes
        #[arg(long, default_value_t = 1024)]
        size: usize,
        /// Print the batch summary as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Serialize)]
struct ReadReport {
    files: usize,
    total_bytes: u64,
    #[serde(flatten)]
    summary: fdrun::BatchSummary,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_toml_file(path)?,
        None => Config::from_env()?,
    };

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "fdrun".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let runner = Runner::new(config.runner_config());

    match cli.command {
        Command::Read { dir, json, verbose } => cmd_read(&runner, &dir, json, verbose).await,
        Command::Generate {
            dir,
            count,
            size,
            json,
        } => cmd_generate(&runner, &dir, count, size, json).await,
    }
}

async fn cmd_read(runner: &Runner, dir: &Path, json: bool, verbose: bool) -> anyhow::Result<()> {
    let paths = list_files(dir).await?;
    let mut stream = read_all(runner, paths);

    let mut files = 0usize;
    let mut total_bytes = 0u64;

    while let Some(event) = stream.next().await {
        match event {
            BatchEvent::Item(read) => {
                files += 1;
                total_bytes += read.bytes;
                if verbose {
                    println!("{:>10}  {}", read.bytes, read.path.display());
                }
            }
            BatchEvent::Failed(e) => {
                return Err(anyhow::Error::new(e).context(format!("reading {}", dir.display())));
            }
            BatchEvent::Completed(summary) => {
                let report = ReadReport {
                    files,
                    total_bytes,
                    summary,
                };
                if json {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                } else {
                    println!(
                        "Read {} files ({} bytes) in {} ms; {} retries, {} backoff timers",
                        report.files,
                        report.total_bytes,
                        report.summary.elapsed_ms,
                        report.summary.retries(),
                        report.summary.backoff_delays_ms.len()
                    );
                }
                return Ok(());
            }
        }
    }

    anyhow::bail!("batch reading {} aborted", dir.display())
}

async fn cmd_generate(
    runner: &Runner,
    dir: &Path,
    count: usize,
    size: usize,
    json: bool,
) -> anyhow::Result<()> {
    let summary = generate_fixtures(runner, dir, count, size).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "Generated {count} files of {size} bytes in {}; {} retries",
            dir.display(),
            summary.retries()
        );
    }
    Ok(())
}
