//! Claude Proxy error types

use thiserror::Error;

/// Claude Proxy error type
#[derive(Error, Debug)]
pub enum Error {
    /// Required proxy environment settings are missing
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Config file could not be loaded or parsed
    #[error("Config file error: {0}")]
    Config(String),

    /// The agent process could not be spawned or waited on
    #[error("Process error: {0}")]
    Process(String),

    /// The agent process ran but did not exit cleanly
    #[error("Claude CLI exited with {}", describe_exit(.code))]
    ProcessExit { code: Option<i32> },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {}", code),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

/// Result type alias for Claude Proxy operations
pub type Result<T> = std::result::Result<T, Error>;
