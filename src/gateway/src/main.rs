use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use delve_core::{
    build_router, research_graph, DelveConfig, Executor, GraphExecutor, MemoryTier, PathRouter,
    ResearchOptions, ServerConfig, SqliteTier, StorageTier, StreamMode,
};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_filter())
        .init();

    let file_config = match DelveConfig::load() {
        Ok(cfg) => cfg,
        Err(err) => {
            tracing::warn!(error = %err, "config.toml unusable, using defaults");
            DelveConfig::default()
        }
    };
    let defaults = file_config.apply(ServerConfig::default());

    let config = ServerConfig {
        bind: parse_socket("DELVE_BIND", defaults.bind),
        recursion_limit: parse_u32("DELVE_RECURSION_LIMIT", defaults.recursion_limit),
        stream_modes: parse_stream_modes("DELVE_STREAM_MODES", defaults.stream_modes.clone()),
        event_buffer: parse_usize("DELVE_EVENT_BUFFER", defaults.event_buffer).max(1),
        checkpoint_retention: parse_usize(
            "DELVE_CHECKPOINT_RETENTION",
            defaults.checkpoint_retention,
        )
        .max(1),
        db_path: env::var("DELVE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| defaults.db_path.clone()),
        durable_prefixes: defaults.durable_prefixes.clone(),
        require_approval: parse_bool("DELVE_REQUIRE_APPROVAL", defaults.require_approval),
    };

    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let durable: Arc<dyn StorageTier> = Arc::new(SqliteTier::open(&config.db_path)?);
    let mut router = PathRouter::new(Arc::new(MemoryTier::ephemeral()));
    for prefix in &config.durable_prefixes {
        router = router.with_route(prefix, durable.clone())?;
    }
    tracing::info!(
        db_path = %config.db_path.display(),
        prefixes = ?router.prefixes(),
        "durable storage ready"
    );

    let graph = research_graph(ResearchOptions {
        require_approval: config.require_approval,
        archive_prefix: config
            .durable_prefixes
            .first()
            .cloned()
            .unwrap_or_else(|| delve_core::DEFAULT_DURABLE_PREFIX.to_string()),
    })?;
    let executor: Arc<dyn Executor> = Arc::new(
        GraphExecutor::new(graph, Arc::new(router))
            .with_event_buffer(config.event_buffer)
            .with_checkpoint_retention(config.checkpoint_retention),
    );

    let app = build_router(config.clone(), executor);

    let listener = TcpListener::bind(config.bind).await?;
    tracing::info!(
        addr = %config.bind,
        recursion_limit = config.recursion_limit,
        modes = ?config.stream_modes,
        "listening"
    );
    axum::serve(listener, app).await?;

    Ok(())
}

fn parse_socket(key: &str, default: SocketAddr) -> SocketAddr {
    match env::var(key) {
        Ok(v) => v.parse().unwrap_or(default),
        Err(_) => default,
    }
}

fn parse_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"),
        Err(_) => default,
    }
}

fn parse_u32(key: &str, default: u32) -> u32 {
    match env::var(key) {
        Ok(v) => v.parse::<u32>().unwrap_or(default),
        Err(_) => default,
    }
}

fn parse_usize(key: &str, default: usize) -> usize {
    match env::var(key) {
        Ok(v) => v.parse::<usize>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Comma separated tags; an unknown tag keeps the default.
fn parse_stream_modes(key: &str, default: Vec<StreamMode>) -> Vec<StreamMode> {
    let Ok(raw) = env::var(key) else {
        return default;
    };
    let tags: Vec<&str> = raw
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect();
    match StreamMode::parse_list(&tags) {
        Ok(modes) if !modes.is_empty() => modes,
        Ok(_) => default,
        Err(err) => {
            tracing::warn!(%key, error = %err, "ignoring stream modes");
            default
        }
    }
}

fn tracing_filter() -> tracing_subscriber::EnvFilter {
    let explicit = env::var("DELVE_LOG").or_else(|_| env::var("RUST_LOG")).ok();
    if let Some(filter) = explicit {
        return tracing_subscriber::EnvFilter::new(filter);
    }
    if matches!(
        env::var("DELVE_DEBUG").as_deref(),
        Ok("1" | "true" | "TRUE" | "yes" | "YES")
    ) {
        return tracing_subscriber::EnvFilter::new("debug");
    }
    tracing_subscriber::EnvFilter::new("info")
}
