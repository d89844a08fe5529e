use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use delve_protocol::{StreamMode, DEFAULT_STREAM_MODES};

use crate::executor::DEFAULT_CHECKPOINT_RETENTION;

/// Prefix bound to the durable tier unless configured otherwise.
pub const DEFAULT_DURABLE_PREFIX: &str = "/memories/";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: 127.0.0.1:2024).
    pub bind: SocketAddr,
    /// Step ceiling applied when a run does not set `config.recursion_limit`.
    pub recursion_limit: u32,
    /// Channels streamed when a run does not set `stream_mode`.
    pub stream_modes: Vec<StreamMode>,
    /// Capacity of the per-run event channel between executor and framer.
    pub event_buffer: usize,
    /// Checkpoints kept per thread; older ones are dropped.
    pub checkpoint_retention: usize,
    /// Path of the sqlite database backing the durable tier.
    pub db_path: PathBuf,
    /// Virtual path prefixes routed to the durable tier.
    pub durable_prefixes: Vec<String>,
    /// Whether the research graph pauses for approval before publishing.
    pub require_approval: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 2024),
            recursion_limit: 50,
            stream_modes: DEFAULT_STREAM_MODES.to_vec(),
            event_buffer: 64,
            checkpoint_retention: DEFAULT_CHECKPOINT_RETENTION,
            db_path: PathBuf::from("delve.db"),
            durable_prefixes: vec![DEFAULT_DURABLE_PREFIX.to_string()],
            require_approval: true,
        }
    }
}
