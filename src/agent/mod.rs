//! Agent module: Claude CLI process management and client bridge
//!
//! Each client command spawns one Claude CLI process in `stream-json` mode.
//! Its stdout is parsed line by line into normalized events which are
//! forwarded to a [`ProxyWriter`]; the process is tracked in the
//! [`ProcessRegistry`] until it exits or is aborted.
//!
//! ## Architecture
//!
//! ```text
//! Client ←→ WS (JSON) ←→ claude-proxy (axum) ──spawn──→ claude -p ... --output-format stream-json
//!           /ws/claude-proxy  ├ handler                  │ stdout (NDJSON)
//!                             ├ bridge  ←── parser ←─────┘
//!                             ├ registry
//!                             └ probe
//! ```

pub mod args;
pub mod bridge;
pub mod handler;
pub mod parser;
pub mod probe;
pub mod registry;
pub mod types;

pub use bridge::ClaudeProxy;
pub use handler::{proxy_router, AgentState, ProxyStatus, WebSocketWriter};
pub use registry::{ProcessHandle, ProcessRegistry};
pub use types::{ExitCode, ProxyEvent, ProxyWriter, RunOptions};
