//! Run orchestration core of the delve research agent server.
//!
//! Requests are normalized into one [`RunRequest`], handed to an
//! [`Executor`], and the executor's tagged events are framed as SSE.
//! Nodes read and write files through a [`PathRouter`] that splits one
//! virtual namespace across ephemeral and durable [`StorageTier`]s.

mod config;
mod delve_config;
mod error;
pub mod executor;
mod framer;
mod merge;
mod messages;
mod paths;
mod request;
mod server;
pub mod storage;

pub use config::{ServerConfig, DEFAULT_DURABLE_PREFIX};
pub use delve_protocol::StreamMode;
pub use delve_config::{AgentConfig, DelveConfig, RunsConfig, StorageConfig};
pub use error::ApiError;
pub use executor::{
    research_graph, EventStream, Executor, ExecutorError, GraphExecutor, ResearchOptions,
    RunError, StateSnapshot, StreamEvent,
};
pub use framer::{frame_event, frame_events, sse_response, FrameInput, FramerState};
pub use merge::{merge_state, overlay, MergeError, MergeOutcome};
pub use messages::{append_messages, state_messages, Message};
pub use paths::{delve_config_path, delve_home_dir, user_home_dir};
pub use request::{normalize, RunOptions, RunRequest, INTERRUPT_ALL};
pub use server::build_router;
pub use storage::{MemoryTier, PathRouter, SqliteTier, StorageError, StorageTier, TierKind};
