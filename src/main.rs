use bulkpay::application::executor::BatchExecutor;
use bulkpay::application::planner::{BatchPlan, BatchPlanner};
use bulkpay::config::BatchConfig;
use bulkpay::domain::key::{KeyDeriver, KeyMode};
use bulkpay::domain::money::Currency;
use bulkpay::domain::operation::{ActionKind, OperationIdentity};
use bulkpay::domain::ports::{LedgerClientRef, LedgerFault, OperationFilter};
use bulkpay::domain::target::RefundReason;
use bulkpay::infrastructure::in_memory::InMemoryLedger;
use bulkpay::interfaces::csv::audit_writer::AuditWriter;
use bulkpay::interfaces::csv::target_reader::TargetReader;
use bulkpay::telemetry;
use clap::{Args, Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the idempotency key for an operation identity
    Key {
        actor: String,
        subject: String,
        /// `create_payment` or `refund`
        action: String,
        /// Issue a one-off random key instead of the derived one
        #[arg(long)]
        random: bool,
        #[arg(long)]
        length: Option<usize>,
    },
    /// Dry run: plan a bulk refund and print the preview
    Plan {
        #[command(flatten)]
        batch: BatchArgs,
        /// Print the preview and skip list as JSON
        #[arg(long)]
        json: bool,
    },
    /// Plan and execute a bulk refund against an in-memory ledger seeded
    /// from the input file
    Execute {
        #[command(flatten)]
        batch: BatchArgs,
        /// Reject every reversal for this charge
        #[arg(long = "fail", value_name = "ID")]
        fail: Vec<String>,
        /// Fail the first N reversal calls for a charge with a connection error
        #[arg(long = "flaky", value_name = "ID=N", value_parser = parse_flaky)]
        flaky: Vec<(String, u32)>,
        #[arg(long, default_value = "requested_by_customer")]
        reason: String,
        /// Print the reconciliation report as JSON instead of the audit CSV
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct BatchArgs {
    /// Charges CSV: id, amount, refunded, currency, status, metadata
    input: PathBuf,

    /// Batch reference; part of every derived key
    #[arg(long)]
    reference: String,

    /// Only consider charges whose metadata has this KEY=VALUE pair
    #[arg(long, value_name = "KEY=VALUE")]
    filter: Option<String>,

    /// Restrict the batch to one currency
    #[arg(long)]
    currency: Option<String>,

    #[arg(long)]
    max_attempts: Option<u32>,
    #[arg(long)]
    base_delay_ms: Option<u64>,
    #[arg(long)]
    request_timeout_ms: Option<u64>,
    #[arg(long)]
    chunk_size: Option<usize>,
    #[arg(long)]
    chunk_pause_ms: Option<u64>,
}

impl BatchArgs {
    fn config(&self) -> Result<BatchConfig> {
        let mut config = BatchConfig::from_env();
        if let Some(v) = self.max_attempts {
            config.max_attempts = v;
        }
        if let Some(v) = self.base_delay_ms {
            config.base_delay_ms = v;
        }
        if let Some(v) = self.request_timeout_ms {
            config.request_timeout_ms = v;
        }
        if let Some(v) = self.chunk_size {
            config.chunk_size = v;
        }
        if let Some(v) = self.chunk_pause_ms {
            config.chunk_pause_ms = v;
        }
        config.validate().into_diagnostic()?;
        Ok(config)
    }
}

fn parse_flaky(raw: &str) -> std::result::Result<(String, u32), String> {
    let (id, count) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected ID=N, got {raw:?}"))?;
    let count = count
        .parse()
        .map_err(|_| format!("invalid failure count in {raw:?}"))?;
    Ok((id.to_string(), count))
}

/// Seeds a ledger from the input file and plans over it.
async fn seed_and_plan(
    batch: &BatchArgs,
    config: &BatchConfig,
) -> Result<(InMemoryLedger, BatchPlan)> {
    let file = File::open(&batch.input).into_diagnostic()?;
    let charges = TargetReader::new(file).read_all().into_diagnostic()?;
    let ids: Vec<String> = charges.iter().map(|c| c.id.clone()).collect();

    let ledger = InMemoryLedger::with_key_validity(config.key_validity());
    for charge in charges {
        ledger.insert_payment(charge).await;
    }

    let client: LedgerClientRef = Arc::new(ledger.clone());
    let mut planner = BatchPlanner::new(client, batch.reference.clone()).into_diagnostic()?;
    if let Some(code) = &batch.currency {
        planner = planner.with_currency(Currency::new(code).into_diagnostic()?);
    }

    let plan = match &batch.filter {
        Some(pair) => {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| miette::miette!("--filter expects KEY=VALUE, got {pair:?}"))?;
            planner
                .discover(&OperationFilter::by_metadata(key, value))
                .await
                .into_diagnostic()?
        }
        None => planner.plan(&ids).await.into_diagnostic()?,
    };
    Ok((ledger, plan))
}

fn print_preview(plan: &BatchPlan) {
    let preview = plan.preview();
    let currency = preview
        .currency
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_default();
    println!(
        "Batch {}: {} targets, total {} {}",
        preview.reference, preview.count, preview.total_amount, currency
    );
    for (kind, summary) in &preview.by_kind {
        println!("  {kind}: {} ({})", summary.count, summary.total);
    }
    if !plan.skipped().is_empty() {
        println!("Skipped {}:", plan.skipped().len());
        for skipped in plan.skipped() {
            println!("  {}: {}", skipped.subject_id, skipped.reason);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Key {
            actor,
            subject,
            action,
            random,
            length,
        } => {
            let action: ActionKind = action.parse().into_diagnostic()?;
            let identity = OperationIdentity::new(actor, subject, action).into_diagnostic()?;
            let mut config = BatchConfig::from_env();
            if let Some(length) = length {
                config.key_length = length;
            }
            let mode = if random { KeyMode::Random } else { config.key_mode };
            let issued = KeyDeriver::new(mode, config.key_length)
                .into_diagnostic()?
                .issue(&identity);
            println!("{}", issued.key);
        }

        Command::Plan { batch, json } => {
            let config = batch.config()?;
            let (_ledger, plan) = seed_and_plan(&batch, &config).await?;
            if json {
                let body = serde_json::json!({
                    "preview": plan.preview(),
                    "skipped": plan.skipped(),
                });
                println!("{}", serde_json::to_string_pretty(&body).into_diagnostic()?);
            } else {
                print_preview(&plan);
            }
        }

        Command::Execute {
            batch,
            fail,
            flaky,
            reason,
            json,
        } => {
            let config = batch.config()?;
            let reason: RefundReason = reason.parse().into_diagnostic()?;
            let (ledger, plan) = seed_and_plan(&batch, &config).await?;

            for id in &fail {
                ledger
                    .fail_always(
                        id,
                        LedgerFault::Rejected {
                            code: "invalid_request".to_string(),
                            message: "rejected by operator rehearsal".to_string(),
                        },
                    )
                    .await;
            }
            for (id, count) in &flaky {
                for _ in 0..*count {
                    ledger
                        .fail_next(id, LedgerFault::Connection("connection reset".to_string()))
                        .await;
                }
            }

            let executor = BatchExecutor::from_config(Arc::new(ledger.clone()), &config)
                .into_diagnostic()?
                .with_reason(reason);
            let stop = executor.stop_signal();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupt received; stopping after the current item");
                    stop.stop();
                }
            });

            let outcome = executor.execute(plan).await;
            if !outcome.replay_protected() {
                tracing::warn!("Random keys used; rerunning this batch may refund twice");
            }
            let report = outcome.report();

            if json {
                println!("{}", serde_json::to_string_pretty(&report).into_diagnostic()?);
            } else {
                let stdout = io::stdout();
                AuditWriter::new(stdout.lock())
                    .write_log(&outcome.log)
                    .into_diagnostic()?;
            }

            if !report.is_clean() {
                miette::bail!(
                    "{} succeeded, {} failed, {} pending, {} not attempted (totals {})",
                    report.succeeded_count,
                    report.failed_count,
                    report.pending_count,
                    report.not_attempted.len(),
                    if report.matches { "match" } else { "DO NOT MATCH" }
                );
            }
        }
    }

    Ok(())
}
