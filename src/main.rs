//! # Lead Validator CLI
//!
//! Command-line interface for the Lead Validator library (`lead_validator_core`).
//! This binary parses arguments, sets up configuration, builds the verifier,
//! and either checks a single address or runs a newline-delimited file as a job.

use lead_validator_core::{
    check_smtp_connectivity, initialize_verifier, BatchRow, Config, ConfigBuilder, EmailVerifier,
    InMemoryJobStore, Job, JobRunner, JobStatus, JobStore, JsonLinesSink, StallMonitor,
    ValidatorMode,
};

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Checks whether email addresses are likely deliverable.",
    long_about = "Lead Validator combines syntax checks, denylists, MX lookups, catch-all detection and SMTP recipient probing to score each address without sending mail."
)]
struct AppArgs {
    /// Single address to verify. Overrides --input.
    #[arg(short, long, env = "LEAD_VALIDATOR_EMAIL")]
    email: Option<String>,

    /// Newline-delimited file of addresses to verify as one job.
    #[arg(short, long, default_value = "input.txt", env = "LEAD_VALIDATOR_INPUT")]
    input: String,

    /// JSON Lines file receiving one result per row.
    #[arg(
        short,
        long,
        default_value = "results.jsonl",
        env = "LEAD_VALIDATOR_OUTPUT"
    )]
    output: String,

    /// Print the single-address result to standard output instead of a file.
    #[arg(long, default_value = "false", env = "LEAD_VALIDATOR_STDOUT")]
    stdout: bool,

    /// Optional job name recorded with the batch.
    #[arg(long, env = "LEAD_VALIDATOR_JOB_NAME")]
    job_name: Option<String>,

    /// Path to a configuration file (TOML format). CLI args override file settings.
    #[arg(long, env = "LEAD_VALIDATOR_CONFIG")]
    config_file: Option<String>,

    /// Validator mode: `real` hits the network, `mock` applies fixed offline rules.
    #[arg(long, env = "LEAD_VALIDATOR_MODE")]
    mode: Option<String>,

    /// Sender address used in `MAIL FROM` during probes.
    #[arg(long, env = "LEAD_VALIDATOR_SMTP_SENDER")]
    smtp_sender: Option<String>,

    /// SMTP session timeout in seconds.
    #[arg(long, env = "LEAD_VALIDATOR_SMTP_TIMEOUT")]
    smtp_timeout: Option<u64>,

    /// DNS resolution timeout in seconds.
    #[arg(long, env = "LEAD_VALIDATOR_DNS_TIMEOUT")]
    dns_timeout: Option<u64>,

    /// Comma-separated list of DNS servers to use for MX lookups.
    #[arg(long, value_delimiter = ',', env = "LEAD_VALIDATOR_DNS_SERVERS")]
    dns_servers: Option<Vec<String>>,

    /// Extra SMTP attempts after a transient failure.
    #[arg(long, env = "LEAD_VALIDATOR_SMTP_RETRIES")]
    retries: Option<u32>,

    /// Maximum simultaneous SMTP sessions across all domains.
    #[arg(long, env = "LEAD_VALIDATOR_GLOBAL_WORKERS")]
    global_workers: Option<usize>,

    /// Maximum simultaneous SMTP sessions per recipient domain.
    #[arg(long, env = "LEAD_VALIDATOR_PER_DOMAIN_LIMIT")]
    per_domain_limit: Option<usize>,

    /// Rows between two heartbeat writes.
    #[arg(long, env = "LEAD_VALIDATOR_HEARTBEAT_ROWS")]
    heartbeat_rows: Option<usize>,

    /// Skip the outbound port 25 connectivity check in real mode.
    #[arg(long, default_value = "false", env = "LEAD_VALIDATOR_SKIP_CONNECTIVITY_CHECK")]
    skip_connectivity_check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let start_time = Instant::now();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_thread_names(true)
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set global tracing subscriber")?;

    let args = AppArgs::parse();
    tracing::debug!("Parsed arguments: {:?}", args);

    let config = Arc::new(build_config(&args)?);
    tracing::debug!("Using configuration: {:?}", config);

    if config.validator_mode == ValidatorMode::Real && !args.skip_connectivity_check {
        match check_smtp_connectivity(&config).await {
            Ok(()) => tracing::info!("SMTP connectivity pre-check passed."),
            Err(e) => {
                tracing::warn!("SMTP connectivity pre-check failed: {}", e);
                tracing::warn!(
                    "Probes will likely report timeouts or connection errors. Continuing anyway."
                );
            }
        }
    }

    let verifier = Arc::new(
        initialize_verifier(config.clone())
            .map_err(|e| anyhow::anyhow!("Failed to initialize verifier: {}", e))?,
    );

    let outcome = match args.email.as_deref() {
        Some(email) => process_single_mode(&verifier, email, &args).await,
        None => process_file_mode(config, verifier, &args, start_time).await,
    };

    if let Err(e) = &outcome {
        tracing::error!("Lead Validator failed: {:#}", e);
    }
    outcome
}

fn build_config(args: &AppArgs) -> Result<Config> {
    let mut builder = ConfigBuilder::new();

    if let Some(path) = &args.config_file {
        builder = builder.config_file(path.clone());
    }
    if let Some(mode) = &args.mode {
        let mode: ValidatorMode = mode
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid --mode: {}", e))?;
        builder = builder.validator_mode(mode);
    }
    if let Some(sender) = &args.smtp_sender {
        builder = builder.smtp_sender_email(sender.clone());
    }
    if let Some(secs) = args.smtp_timeout {
        builder = builder.smtp_timeout(Duration::from_secs(secs));
    }
    if let Some(secs) = args.dns_timeout {
        builder = builder.dns_timeout(Duration::from_secs(secs));
    }
    if let Some(servers) = &args.dns_servers {
        builder = builder.dns_servers(servers.clone());
    }
    if let Some(retries) = args.retries {
        builder = builder.smtp_retries(retries);
    }
    if let Some(workers) = args.global_workers {
        builder = builder.smtp_global_workers(workers);
    }
    if let Some(limit) = args.per_domain_limit {
        builder = builder.smtp_per_domain_limit(limit);
    }
    if let Some(rows) = args.heartbeat_rows {
        builder = builder.heartbeat_interval_rows(rows);
    }

    builder
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to build configuration: {}", e))
}

async fn process_single_mode(verifier: &EmailVerifier, email: &str, args: &AppArgs) -> Result<()> {
    tracing::info!("Running in single address mode for <{}>", email);
    let outcome = verifier.verify(email).await;
    let body = serde_json::to_string_pretty(&serde_json::json!({
        "email": email,
        "result": outcome,
    }))
    .context("Failed to serialize result")?;

    if args.stdout {
        println!("{}", body);
    } else {
        std::fs::write(&args.output, format!("{}\n", body))
            .with_context(|| format!("Failed to write result to '{}'", args.output))?;
        tracing::info!("Result saved to '{}'", args.output);
    }
    Ok(())
}

async fn process_file_mode(
    config: Arc<Config>,
    verifier: Arc<EmailVerifier>,
    args: &AppArgs,
    start_time: Instant,
) -> Result<()> {
    tracing::info!(
        "Running in file mode. Input: '{}', Output: '{}' (Mode: {})",
        args.input,
        args.output,
        config.validator_mode
    );

    let input_path = Path::new(&args.input);
    if !input_path.is_file() {
        return Err(anyhow::anyhow!(
            "Input file not found or is not a file: {}",
            args.input
        ));
    }
    if let Some(parent_dir) = Path::new(&args.output).parent() {
        if !parent_dir.as_os_str().is_empty() && !parent_dir.exists() {
            std::fs::create_dir_all(parent_dir).with_context(|| {
                format!(
                    "Failed to create output directory '{}'",
                    parent_dir.display()
                )
            })?;
        }
    }

    let rows = load_rows(&args.input)?;
    tracing::info!("Loaded {} rows from '{}'", rows.len(), args.input);

    let store = Arc::new(InMemoryJobStore::new());
    let sink = Arc::new(
        JsonLinesSink::create(&args.output)
            .map_err(|e| anyhow::anyhow!("Cannot write to output file '{}': {}", args.output, e))?,
    );
    let runner = JobRunner::new(verifier, store.clone(), sink, config.clone());
    let monitor = StallMonitor::new(store.clone(), &config);
    monitor.start();

    let total = rows.len();
    let submitted = runner
        .submit(rows, args.job_name.clone())
        .await
        .map_err(|e| anyhow::anyhow!("Job was not accepted: {}", e))?;
    let job_id = submitted.id;

    let pb = ProgressBar::new(total as u64);
    pb.set_style(ProgressStyle::default_bar()
         .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) | ETA: {eta} | {msg}")
         .context("Failed to set progress bar template")?
         .progress_chars("=> "));
    pb.set_message(format!("Job {}", job_id));

    let mut handle = submitted.handle;
    let mut ticker = tokio::time::interval(Duration::from_millis(250));
    let mut cancel_sent = false;
    let result = loop {
        tokio::select! {
            joined = &mut handle => break joined,
            signal = tokio::signal::ctrl_c(), if !cancel_sent => {
                cancel_sent = true;
                if signal.is_ok() {
                    pb.set_message("Cancelling...");
                    if let Err(e) = runner.cancel(job_id).await {
                        tracing::warn!("Could not cancel job {}: {}", job_id, e);
                    }
                }
            }
            _ = ticker.tick() => {
                if let Ok(Some(job)) = store.get(job_id).await {
                    pb.set_position(job.completed_rows as u64);
                }
            }
        }
    };

    monitor.stop().await;

    let job = result
        .context("Job task terminated abnormally")?
        .map_err(|e| anyhow::anyhow!("Job {} failed: {}", job_id, e))?;
    pb.set_position(job.completed_rows as u64);
    pb.finish_with_message(format!("Job {}", job.status));

    log_summary(&job, start_time.elapsed());
    println!(
        "{}",
        serde_json::to_string_pretty(&job).context("Failed to serialize job summary")?
    );

    if job.status == JobStatus::Failed {
        return Err(anyhow::anyhow!(
            "Job {} failed: {}",
            job.id,
            job.error_message.as_deref().unwrap_or("unknown error")
        ));
    }
    Ok(())
}

/// Reads one row per non-empty line. The raw line is kept as the `raw` field.
fn load_rows(file_path: &str) -> Result<Vec<BatchRow>> {
    let file = File::open(file_path)
        .with_context(|| format!("Failed to open input file '{}'", file_path))?;
    let reader = BufReader::new(file);

    let mut rows = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.with_context(|| {
            format!("Failed to read line {} of '{}'", line_no + 1, file_path)
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let mut fields = BTreeMap::new();
        fields.insert("raw".to_string(), line.clone());
        fields.insert("line".to_string(), (line_no + 1).to_string());
        rows.push(BatchRow {
            raw_email: line,
            fields,
        });
    }
    Ok(rows)
}

fn log_summary(job: &Job, duration: Duration) {
    tracing::info!("-------------------- Job Summary --------------------");
    tracing::info!("Job ID                : {}", job.id);
    tracing::info!("Final Status          : {}", job.status);
    tracing::info!("Rows Completed        : {}/{}", job.completed_rows, job.total_rows);
    if let Some(summary) = &job.summary {
        tracing::info!("  - Valid             : {}", summary.valid);
        tracing::info!("  - Risky             : {}", summary.risky);
        tracing::info!("  - Invalid           : {}", summary.invalid);
        tracing::info!("  - Average Score     : {:.1}", summary.avg_score);
    }
    tracing::info!("Total Time Taken      : {:.2?}", duration);
    if duration.as_secs_f64() > 0.01 && job.completed_rows > 0 {
        let rate = (job.completed_rows as f64) / duration.as_secs_f64();
        tracing::info!("Average Rate          : {:.2} rows/sec", rate);
    }
    tracing::info!("-----------------------------------------------------");
}
