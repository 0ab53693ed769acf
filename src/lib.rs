//! claude-proxy - Claude CLI streaming bridge
//!
//! Spawns the Claude CLI in `stream-json` mode against an Anthropic-compatible
//! proxy (configured through `ANTHROPIC_BASE_URL` and `ANTHROPIC_API_KEY`),
//! normalizes its NDJSON output into client events and tracks running
//! processes so sessions can be aborted.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     claude-proxy                          │
//! │  ┌────────────┐   ┌──────────────┐   ┌────────────────┐  │
//! │  │ api / WS   │──▶│ ClaudeProxy  │──▶│ ProcessRegistry│  │
//! │  │ handlers   │◀──│  (bridge)    │   └────────────────┘  │
//! │  └────────────┘   └──────┬───────┘                       │
//! │                          │ args / parser                  │
//! └──────────────────────────┼───────────────────────────────┘
//!                            │ spawn, stdout NDJSON
//!                     ┌──────▼──────┐
//!                     │ claude CLI  │──▶ ANTHROPIC_BASE_URL
//!                     └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`agent`]: CLI process bridge, output parser, registry and handlers
//! - [`api`]: HTTP application
//! - [`config`]: Configuration management

pub mod agent;
pub mod api;
pub mod config;
pub mod error;

pub use agent::{ClaudeProxy, ProcessRegistry, ProxyEvent, ProxyWriter, RunOptions};
pub use config::{check_proxy_configuration, ProxyConfig};
pub use error::{Error, Result};
