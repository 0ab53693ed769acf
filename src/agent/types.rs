//! Protocol types for the Claude CLI bridge
//!
//! Defines:
//! - [`RunOptions`]: per-invocation options supplied by the client
//! - [`ProxyEvent`]: normalized events pushed to a client
//! - [`ProxyWriter`]: the sink receiving those events
//! - WebSocket client → server messages

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// =============================================================================
// Run options
// =============================================================================

/// Options for one bridge invocation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunOptions {
    /// Existing CLI session to resume
    pub session_id: Option<String>,
    /// Project directory, used when `cwd` is not set
    pub project_path: Option<String>,
    /// Working directory for the CLI process
    pub cwd: Option<String>,
    /// Model for new sessions (ignored when resuming)
    pub model: Option<String>,
    pub skip_permissions: bool,
    pub dangerously_skip_permissions: bool,
}

impl RunOptions {
    /// Caller-supplied session id, treating an empty string as absent
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref().filter(|s| !s.is_empty())
    }

    /// Model, treating an empty string as absent
    pub fn model(&self) -> Option<&str> {
        self.model.as_deref().filter(|s| !s.is_empty())
    }

    pub fn skips_permissions(&self) -> bool {
        self.skip_permissions || self.dangerously_skip_permissions
    }

    /// `cwd`, else `project_path`; `None` means the server's own directory
    pub fn working_dir(&self) -> Option<PathBuf> {
        self.cwd
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| self.project_path.as_deref().filter(|s| !s.is_empty()))
            .map(PathBuf::from)
    }
}

// =============================================================================
// Server → client events
// =============================================================================

/// Normalized event sent to the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProxyEvent {
    #[serde(rename = "error")]
    Error { error: String },

    /// Full `system/init` record
    #[serde(rename = "claude-proxy-system")]
    System { data: serde_json::Value },

    /// `user` record passthrough
    #[serde(rename = "cursor-user")]
    User { data: serde_json::Value },

    #[serde(rename = "claude-response")]
    Response { data: ResponseData },

    #[serde(rename = "claude-complete")]
    Complete {
        #[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        /// Set for completions derived from a `result` record
        #[serde(default, skip_serializing_if = "Option::is_none")]
        success: Option<bool>,
        /// Set for the completion sent on process exit
        #[serde(rename = "exitCode", default, skip_serializing_if = "is_not_exit")]
        exit_code: ExitCode,
        #[serde(rename = "isNewSession")]
        is_new_session: bool,
    },

    /// Any other JSON record
    #[serde(rename = "claude-proxy-response")]
    Passthrough { data: serde_json::Value },

    /// Non-JSON stdout line
    #[serde(rename = "claude-proxy-output")]
    RawOutput { data: String },

    #[serde(rename = "session-created")]
    SessionCreated {
        #[serde(rename = "sessionId")]
        session_id: String,
        model: Option<String>,
        cwd: Option<String>,
    },
}

impl ProxyEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ProxyEvent::Error {
            error: message.into(),
        }
    }

    pub fn text_delta(text: impl Into<String>) -> Self {
        ProxyEvent::Response {
            data: ResponseData::ContentBlockDelta {
                delta: TextDelta::TextDelta { text: text.into() },
            },
        }
    }

    pub fn content_block_stop() -> Self {
        ProxyEvent::Response {
            data: ResponseData::ContentBlockStop,
        }
    }

    /// Wire name of the event (`type` tag)
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyEvent::Error { .. } => "error",
            ProxyEvent::System { .. } => "claude-proxy-system",
            ProxyEvent::User { .. } => "cursor-user",
            ProxyEvent::Response { .. } => "claude-response",
            ProxyEvent::Complete { .. } => "claude-complete",
            ProxyEvent::Passthrough { .. } => "claude-proxy-response",
            ProxyEvent::RawOutput { .. } => "claude-proxy-output",
            ProxyEvent::SessionCreated { .. } => "session-created",
        }
    }
}

/// Exit status carried by the process-exit completion.
///
/// `Absent` means the completion came from a `result` record; `Exited(None)`
/// is a process killed by a signal and serializes as `null`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExitCode {
    #[default]
    Absent,
    Exited(Option<i32>),
}

fn is_not_exit(code: &ExitCode) -> bool {
    matches!(code, ExitCode::Absent)
}

impl Serialize for ExitCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ExitCode::Absent | ExitCode::Exited(None) => serializer.serialize_none(),
            ExitCode::Exited(Some(code)) => serializer.serialize_some(code),
        }
    }
}

impl<'de> Deserialize<'de> for ExitCode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Option::<i32>::deserialize(deserializer).map(ExitCode::Exited)
    }
}

/// Payload of a `claude-response` event (Anthropic streaming shape)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseData {
    ContentBlockDelta { delta: TextDelta },
    ContentBlockStop,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TextDelta {
    TextDelta { text: String },
}

// =============================================================================
// Writer
// =============================================================================

/// Sink for bridge events, usually a live client connection
pub trait ProxyWriter: Send + Sync {
    /// Deliver one event. Delivery failures are the writer's concern.
    fn send(&self, event: ProxyEvent);

    /// Called once the CLI session id is known
    fn set_session_id(&self, _session_id: &str) {}
}

// =============================================================================
// Client → server messages (WebSocket JSON)
// =============================================================================

/// Message received from WebSocket clients
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "claude-proxy-command")]
    Command {
        #[serde(default)]
        command: String,
        #[serde(default)]
        options: RunOptions,
    },
    #[serde(rename = "abort-session")]
    Abort {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
}

/// Reply to an `abort-session` request
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename = "session-aborted")]
pub struct AbortReply {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub success: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_run_options_camel_case() {
        let opts: RunOptions = serde_json::from_value(json!({
            "sessionId": "abc",
            "projectPath": "/work",
            "skipPermissions": true
        }))
        .unwrap();
        assert_eq!(opts.session_id(), Some("abc"));
        assert_eq!(opts.working_dir(), Some(PathBuf::from("/work")));
        assert!(opts.skips_permissions());
        assert!(opts.model().is_none());
    }

    #[test]
    fn test_working_dir_prefers_cwd() {
        let opts = RunOptions {
            cwd: Some("/a".to_string()),
            project_path: Some("/b".to_string()),
            ..Default::default()
        };
        assert_eq!(opts.working_dir(), Some(PathBuf::from("/a")));
        assert_eq!(RunOptions::default().working_dir(), None);
    }

    #[test]
    fn test_empty_session_id_is_absent() {
        let opts = RunOptions {
            session_id: Some(String::new()),
            ..Default::default()
        };
        assert!(opts.session_id().is_none());
    }

    #[test]
    fn test_text_delta_shape() {
        let value = serde_json::to_value(ProxyEvent::text_delta("Hi")).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "claude-response",
                "data": {
                    "type": "content_block_delta",
                    "delta": {"type": "text_delta", "text": "Hi"}
                }
            })
        );
    }

    #[test]
    fn test_content_block_stop_shape() {
        let value = serde_json::to_value(ProxyEvent::content_block_stop()).unwrap();
        assert_eq!(
            value,
            json!({"type": "claude-response", "data": {"type": "content_block_stop"}})
        );
    }

    #[test]
    fn test_result_completion_shape() {
        let event = ProxyEvent::Complete {
            session_id: Some("s1".to_string()),
            success: Some(true),
            exit_code: ExitCode::Absent,
            is_new_session: true,
        };
        let value = serde_json::to_value(event).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "claude-complete",
                "sessionId": "s1",
                "success": true,
                "isNewSession": true
            })
        );
    }

    #[test]
    fn test_exit_completion_shape() {
        let event = ProxyEvent::Complete {
            session_id: Some("s1".to_string()),
            success: None,
            exit_code: ExitCode::Exited(Some(1)),
            is_new_session: false,
        };
        let value = serde_json::to_value(event).unwrap();
        assert_eq!(value["exitCode"], 1);
        assert!(value.get("success").is_none());

        let killed = ProxyEvent::Complete {
            session_id: Some("s1".to_string()),
            success: None,
            exit_code: ExitCode::Exited(None),
            is_new_session: false,
        };
        let value = serde_json::to_value(killed).unwrap();
        assert!(value["exitCode"].is_null());
        assert!(value.as_object().unwrap().contains_key("exitCode"));
    }

    #[test]
    fn test_session_created_shape() {
        let event = ProxyEvent::SessionCreated {
            session_id: "s1".to_string(),
            model: Some("default".to_string()),
            cwd: Some("/tmp".to_string()),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "session-created");
        assert_eq!(value["sessionId"], "s1");
        assert_eq!(event.kind(), "session-created");
    }

    #[test]
    fn test_client_message_command() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"claude-proxy-command","command":"hi","options":{"model":"opus"}}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::Command { command, options } => {
                assert_eq!(command, "hi");
                assert_eq!(options.model(), Some("opus"));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_client_message_abort() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"abort-session","sessionId":"s9"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Abort { session_id } if session_id == "s9"));
    }

    #[test]
    fn test_abort_reply_shape() {
        let reply = AbortReply {
            session_id: "s1".to_string(),
            success: false,
        };
        let value = serde_json::to_value(reply).unwrap();
        assert_eq!(
            value,
            json!({"type": "session-aborted", "sessionId": "s1", "success": false})
        );
    }
}
