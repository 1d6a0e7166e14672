//! Dependency construction for the server process. Grounded in the
//! teacher's `main.rs` `run_server()` sequence: build each component in
//! order, log readiness, then assemble the shared state.

use std::sync::Arc;

use anyhow::Context;

use ao_cache::CacheManager;
use ao_domain::config::Config;
use ao_engine::{EventBus, Executor, TaskService, TraceLockMap};
use ao_providers::registry::ProviderRegistry;
use ao_store::checkpoint::{CheckpointStore, FileCheckpointStore};
use ao_store::tool_result::ToolResultStore;
use ao_tools::{ProcessManager, ToolRegistry};

use crate::state::AppState;

/// Build the full dependency graph and return the shared [`AppState`].
pub fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    std::fs::create_dir_all(&config.workspace.path)
        .with_context(|| format!("creating workspace dir {:?}", config.workspace.path))?;
    std::fs::create_dir_all(&config.workspace.state_path)
        .with_context(|| format!("creating state dir {:?}", config.workspace.state_path))?;

    // ── Tool-result store (content-addressed externalized observations) ──
    let tool_result_store = Arc::new(
        ToolResultStore::new(config.workspace.path.clone(), &config.store.tool_result_root_dir)
            .context("initializing tool result store")?,
    );
    tracing::info!("tool result store ready");

    // ── Checkpoint store (durable Trace snapshots) ──────────────────────
    let checkpoint_root = config.workspace.state_path.join("checkpoints");
    let checkpoint_store: Arc<dyn CheckpointStore> = Arc::new(
        FileCheckpointStore::new(checkpoint_root.clone())
            .with_context(|| format!("initializing checkpoint store at {checkpoint_root:?}"))?,
    );
    tracing::info!(path = %checkpoint_root.display(), "checkpoint store ready");

    // ── LLM providers ────────────────────────────────────────────────────
    let providers = Arc::new(
        ProviderRegistry::from_config(&config.llm).context("initializing LLM providers")?,
    );
    if providers.is_empty() {
        tracing::warn!(
            "no LLM providers initialized — the server will boot but every \
             turn will fail until auth is configured"
        );
    } else {
        tracing::info!(providers = providers.len(), "LLM provider registry ready");
    }

    // ── Process manager + tool registry ─────────────────────────────────
    let process_manager = Arc::new(ProcessManager::new(config.tools.exec.clone()));
    let tools = Arc::new(ToolRegistry::with_defaults(
        process_manager.clone(),
        config.workspace.path.clone(),
    ));
    tracing::info!("process manager + tool registry ready");

    // ── Context cache ────────────────────────────────────────────────────
    let cache = Arc::new(CacheManager::new(config.cache.clone()));
    tracing::info!("context cache ready");

    // ── Event bus + per-trace locks ──────────────────────────────────────
    let events = Arc::new(EventBus::new());
    let locks = Arc::new(TraceLockMap::new());

    // ── Executor + facade ────────────────────────────────────────────────
    let executor = Arc::new(Executor::new(
        cache,
        tools,
        tool_result_store,
        config.store.clone(),
        checkpoint_store.clone(),
        events.clone(),
        locks,
        providers,
        config.executor.clone(),
        config.executor.system_prompt.clone(),
    ));
    let tasks = Arc::new(TaskService::new(
        executor,
        checkpoint_store,
        events.clone(),
        config.executor.max_turns,
    ));
    tracing::info!("executor + task service ready");

    Ok(AppState {
        config,
        tasks,
        events,
    })
}
