// crates/wmag-server/src/main.rs
// ============================================================================
// Module: Server Entry Point
// Description: Wires the kernel crates into one process: loads config,
// builds the store/registry/pipeline/streamer, spawns the worker pool, and
// serves the HTTP surface until shutdown.
// Grounded on: the pack's `tracing_subscriber::registry().with(EnvFilter)
// .with(fmt::layer()).init()` startup convention, and
// `axum::serve(..).with_graceful_shutdown(..)`'s ctrl-c-driven shutdown.
// ============================================================================

mod error;
mod routes;
mod state;

use std::process::ExitCode;
use std::sync::Arc;

use tokio::sync::watch;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use wmag_adapters::EchoToolAdapter;
use wmag_adapters::EmptyContextProvider;
use wmag_adapters::FirstActionPlannerAdapter;
use wmag_config::KernelConfig;
use wmag_core::hashchain::AuditKeyRegistry;
use wmag_core::time::Clock;
use wmag_core::time::SystemClock;
use wmag_executor::StepExecutor;
use wmag_pipeline::Pipeline;
use wmag_registry::EffectiveRegistry;
use wmag_registry::RegistrySnapshot;
use wmag_store::Store;
use wmag_streamer::RunBus;
use wmag_streamer::Streamer;
use wmag_worker::WorkerPool;
use wmag_worker::WorkerPoolConfig;

use crate::state::AppState;

/// `WMAG_BIND_ADDR`: the socket address the HTTP surface listens on.
/// Not part of `wmag-config::KernelConfig` since spec.md §6 names it as a
/// deployment detail of the (out-of-scope) HTTP frontend, not a kernel
/// setting.
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
/// `WMAG_WORKER_COUNT`: number of in-process job-claiming worker loops.
const DEFAULT_WORKER_COUNT: usize = 4;

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name).ok().filter(|v| !v.is_empty()).unwrap_or_else(|| default.to_string())
}

fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "wmag_server=info,wmag_worker=info,tower_http=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "wmag-server exited with an error");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = KernelConfig::from_env()?;
    let registry_layers = config.load_registry_layers()?;
    let effective = EffectiveRegistry::build(
        Some(&registry_layers.base),
        registry_layers.org.as_ref(),
        registry_layers.tenant.as_ref(),
        registry_layers.user.as_ref(),
    )?;
    let registry = Arc::new(RegistrySnapshot::new(effective));

    let store: Arc<dyn Store> = config.build_store()?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let default_audit_keys = Arc::new(AuditKeyRegistry::new(config.audit_key_seeds.clone())?);

    let bus = Arc::new(RunBus::default());
    let streamer = Arc::new(Streamer::new(Arc::clone(&store), Arc::clone(&bus), wmag_streamer::DEFAULT_HEARTBEAT_INTERVAL));

    let executor = Arc::new(StepExecutor::new(Arc::clone(&store), Arc::new(EchoToolAdapter), Arc::clone(&clock)));
    let pipeline = Arc::new(Pipeline::new(
        Arc::clone(&store),
        Arc::clone(&registry),
        Arc::new(EmptyContextProvider),
        Arc::new(FirstActionPlannerAdapter),
        executor,
        Arc::clone(&bus),
        Arc::clone(&clock),
        config.approval_timeout_s,
    ));

    let worker_pool = Arc::new(WorkerPool::new(
        Arc::clone(&store),
        Arc::clone(&pipeline),
        Arc::clone(&registry),
        Arc::clone(&clock),
        WorkerPoolConfig {
            worker_count: env_usize("WMAG_WORKER_COUNT", DEFAULT_WORKER_COUNT),
            poll_interval: wmag_worker::DEFAULT_POLL_INTERVAL,
            default_tenant_max_concurrency: config.tenant_max_concurrency,
            default_rate_limit_window_s: config.rate_limit_window_s,
        },
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_handles = worker_pool.spawn(shutdown_rx);

    let state = AppState::new(pipeline, store, registry, registry_layers, streamer, clock, default_audit_keys);
    let app = routes::router(state);

    let bind_addr = env_string("WMAG_BIND_ADDR", DEFAULT_BIND_ADDR);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(%bind_addr, "wmag-server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    for handle in worker_handles {
        let _ = handle.await;
    }
    Ok(())
}
