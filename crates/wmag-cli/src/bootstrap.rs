// crates/wmag-cli/src/bootstrap.rs
// ============================================================================
// Module: Kernel Bootstrap
// Description: Builds the same collaborators wmag-server wires (store,
// registry snapshot, pipeline, streamer, worker pool) from the shared
// KernelConfig, so the CLI can operate directly against whichever backend a
// running server/worker process is also pointed at.
// Grounded on: wmag-server::main's wiring order, reused here instead of
// duplicated per subcommand.
// ============================================================================

use std::sync::Arc;

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

use crate::error::CliError;

/// Everything a subcommand needs to talk to the kernel directly, without an
/// HTTP hop.
pub struct Kernel {
    pub store: Arc<dyn Store>,
    pub registry: Arc<RegistrySnapshot>,
    pub pipeline: Arc<Pipeline>,
    pub streamer: Arc<Streamer>,
    pub clock: Arc<dyn Clock>,
    pub default_audit_keys: Arc<AuditKeyRegistry>,
    pub config: KernelConfig,
}

/// Loads `KernelConfig` from the environment and builds every collaborator
/// `wmag-server` would, using the stub adapters (`wmag-cli` has no concrete
/// LLM planner or tool transport of its own; see `DESIGN.md`).
///
/// # Errors
/// Returns [`CliError`] if configuration loading, registry merging, or
/// store construction fails.
pub fn bootstrap() -> Result<Kernel, CliError> {
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

    Ok(Kernel { store, registry, pipeline, streamer, clock, default_audit_keys, config })
}
