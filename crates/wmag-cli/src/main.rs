// crates/wmag-cli/src/main.rs
// ============================================================================
// Module: wmag CLI Entry Point
// Description: Operator commands over the kernel: submit a mission, decide
// a pending approval, verify a run's hash chain, tail its event log, or run
// a standalone worker pool. Reads the same KernelConfig environment
// variables as wmag-server and operates directly on the configured store,
// so it is meant to be pointed at the same SQLite file a running server is
// using, not at the server's HTTP surface.
// Grounded on: decision-gate-cli::main's clap::Parser/Subcommand dispatch
// shape, scaled down to this workspace's narrower operator surface.
// ============================================================================

mod bootstrap;
mod error;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use clap::Subcommand;
use tokio::sync::watch;
use tokio_stream::StreamExt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use wmag_adapters::TaskDescriptor;
use wmag_core::hashchain::verify_chain_hash;
use wmag_core::identifiers::OrgId;
use wmag_core::identifiers::RunId;
use wmag_core::identifiers::Seq;
use wmag_core::identifiers::TaskId;
use wmag_core::identifiers::TenantId;
use wmag_core::identifiers::UserId;
use wmag_core::model::approval::ApprovalDecision;
use wmag_pipeline::AdvanceOutcome;
use wmag_streamer::Frame;
use wmag_worker::WorkerPool;
use wmag_worker::WorkerPoolConfig;

use crate::error::CliError;

#[derive(Debug, Parser)]
#[command(name = "wmag", about = "Operator CLI for the WMAG kernel")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Submit a new mission and print its task/run identifiers.
    Submit {
        /// Tenant the mission belongs to.
        #[arg(long)]
        tenant: String,
        /// Organization the tenant belongs to.
        #[arg(long, default_value = "default")]
        org: String,
        /// Submitting user.
        #[arg(long, default_value = "cli")]
        user: String,
        /// Free-text mission goal.
        #[arg(long)]
        message: String,
        /// Roles held by the submitting principal, comma-separated.
        #[arg(long, value_delimiter = ',')]
        roles: Vec<String>,
        /// Extra JSON merged into the mission's params (e.g. a plan seed).
        #[arg(long)]
        params: Option<String>,
        /// Drive the run to completion in-process after submitting,
        /// bypassing the job queue/worker pool. Convenient for local
        /// testing; a real deployment relies on `wmag worker` or
        /// `wmag-server`'s embedded pool instead.
        #[arg(long)]
        drive: bool,
    },
    /// Decide a run's pending approval.
    Approve {
        /// Run to decide.
        #[arg(long = "run-id")]
        run_id: String,
        /// `approved` or `denied`.
        #[arg(long)]
        decision: String,
        /// Principal recording the decision.
        #[arg(long, default_value = "cli")]
        by: String,
    },
    /// Recompute and verify a run's hash chain.
    Verify {
        /// Run to verify.
        #[arg(long = "run-id")]
        run_id: String,
    },
    /// Replay a run's persisted events, then tail new ones as they arrive.
    Tail {
        /// Run to subscribe to.
        #[arg(long = "run-id")]
        run_id: String,
        /// Only deliver events after this sequence number.
        #[arg(long = "since-seq", default_value_t = 0)]
        since_seq: u64,
    },
    /// Run a standalone worker pool against the configured store until
    /// interrupted, without serving HTTP.
    Worker {
        /// Number of concurrent worker loops.
        #[arg(long, default_value_t = 4)]
        count: usize,
    },
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "wmag_cli=info,wmag_worker=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Writes a JSON value to stdout with a trailing newline, using
/// `std::io::Write` directly rather than `println!` (the workspace denies
/// `clippy::print_stdout`).
fn print_json(value: &impl serde::Serialize) -> Result<(), CliError> {
    use std::io::Write;
    let body = serde_json::to_string_pretty(value)?;
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{body}").map_err(CliError::Io)?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "command failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> Result<(), CliError> {
    match command {
        Command::Submit { tenant, org, user, message, roles, params, drive } => submit(tenant, org, user, message, roles, params, drive).await,
        Command::Approve { run_id, decision, by } => approve(run_id, decision, by),
        Command::Verify { run_id } => verify(run_id),
        Command::Tail { run_id, since_seq } => tail(run_id, since_seq).await,
        Command::Worker { count } => worker(count).await,
    }
}

async fn submit(
    tenant: String,
    org: String,
    user: String,
    message: String,
    roles: Vec<String>,
    params: Option<String>,
    drive: bool,
) -> Result<(), CliError> {
    let kernel = bootstrap::bootstrap()?;
    let tenant_id = TenantId::new(tenant);

    if kernel.store.audit_keys(&tenant_id).is_err() {
        kernel.store.save_audit_keys(&tenant_id, &kernel.default_audit_keys)?;
    }

    let now = kernel.clock.now();
    let task_id = TaskId::new(format!("task-cli-{}", now.as_millis()));
    let run_id = RunId::new(format!("run-cli-{}", now.as_millis()));
    let extra_params = params
        .map(|raw| serde_json::from_str(&raw))
        .transpose()
        .map_err(CliError::Serialize)?
        .unwrap_or(serde_json::Value::Null);

    let task = TaskDescriptor {
        task_id: task_id.clone(),
        tenant_id,
        org_id: OrgId::new(org),
        submitted_by: UserId::new(user),
        goal: message,
        params: extra_params,
    };

    kernel.pipeline.submit(run_id.clone(), task, roles.into_iter().collect())?;

    if drive {
        loop {
            match kernel.pipeline.advance(&run_id).await? {
                AdvanceOutcome::Continue => {}
                AdvanceOutcome::WaitingForApproval | AdvanceOutcome::Terminal => break,
            }
        }
    }

    print_json(&serde_json::json!({"task_id": task_id.as_str(), "run_id": run_id.as_str()}))
}

fn approve(run_id: String, decision: String, by: String) -> Result<(), CliError> {
    let kernel = bootstrap::bootstrap()?;
    let decision = match decision.as_str() {
        "approved" => ApprovalDecision::Approved,
        "denied" | "rejected" => ApprovalDecision::Rejected,
        other => return Err(CliError::UnknownDecision(other.to_string())),
    };
    let approval = kernel.pipeline.decide_approval(&RunId::new(run_id), decision, UserId::new(by))?;
    print_json(&approval)
}

fn verify(run_id: String) -> Result<(), CliError> {
    let kernel = bootstrap::bootstrap()?;
    let run_id = RunId::new(run_id);
    let run = kernel.store.load_run(&run_id)?.ok_or_else(|| CliError::RunNotFound(run_id.as_str().to_string()))?;
    let audit_keys = kernel.store.audit_keys(&run.tenant_id)?;
    let events = kernel.store.get_events(&run_id, Seq::new(0))?;

    let mut expected_seq = Seq::FIRST;
    let mut expected_prev = None;
    for event in &events {
        if event.seq != expected_seq || event.prev_hash != expected_prev {
            return print_json(&serde_json::json!({"ok": false, "broken_at": event.seq.get()}));
        }
        let verified = verify_chain_hash(&audit_keys, &event.signed_by, event.prev_hash.as_ref(), &event.payload, &event.hash)?;
        if !verified {
            return print_json(&serde_json::json!({"ok": false, "broken_at": event.seq.get()}));
        }
        expected_prev = Some(event.hash);
        expected_seq = expected_seq.next();
    }
    print_json(&serde_json::json!({"ok": true, "broken_at": serde_json::Value::Null}))
}

async fn tail(run_id: String, since_seq: u64) -> Result<(), CliError> {
    let kernel = bootstrap::bootstrap()?;
    let run_id = RunId::new(run_id);
    let mut frames = kernel.streamer.subscribe(run_id.clone(), Seq::new(since_seq))?;

    loop {
        tokio::select! {
            frame = frames.next() => {
                match frame {
                    Some(Frame::Event(event)) => print_json(&event)?,
                    Some(Frame::Heartbeat) => tracing::debug!("heartbeat"),
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }

        if let Some(run) = kernel.store.load_run(&run_id)? {
            if run.phase.is_terminal() {
                break;
            }
        }
    }
    Ok(())
}

async fn worker(count: usize) -> Result<(), CliError> {
    let kernel = bootstrap::bootstrap()?;
    let pool = Arc::new(WorkerPool::new(
        Arc::clone(&kernel.store),
        Arc::clone(&kernel.pipeline),
        Arc::clone(&kernel.registry),
        Arc::clone(&kernel.clock),
        WorkerPoolConfig {
            worker_count: count,
            poll_interval: wmag_worker::DEFAULT_POLL_INTERVAL,
            default_tenant_max_concurrency: kernel.config.tenant_max_concurrency,
            default_rate_limit_window_s: kernel.config.rate_limit_window_s,
        },
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = pool.spawn(shutdown_rx);
    tracing::info!(count, "worker pool started, press ctrl-c to stop");

    let _ = tokio::signal::ctrl_c().await;
    let _ = shutdown_tx.send(true);
    for handle in handles {
        let _ = handle.await;
    }
    Ok(())
}
