//! Claude CLI argument construction

use crate::agent::types::RunOptions;

/// Build the Claude CLI argument list for one invocation.
///
/// The model flag is only valid for new sessions, and the CLI requires
/// `--verbose` whenever `-p` is combined with `stream-json` output.
pub fn build_claude_args(message: &str, options: &RunOptions) -> Vec<String> {
    let mut args = Vec::new();
    let has_prompt = !message.trim().is_empty();

    if let Some(session_id) = options.session_id() {
        args.push("--resume".to_string());
        args.push(session_id.to_string());
    }

    if has_prompt {
        args.push("-p".to_string());
        args.push(message.to_string());
    }

    if options.session_id().is_none() {
        if let Some(model) = options.model() {
            args.push("--model".to_string());
            args.push(model.to_string());
        }
    }

    args.push("--output-format".to_string());
    args.push("stream-json".to_string());

    if has_prompt {
        args.push("--verbose".to_string());
    }

    if options.skips_permissions() {
        tracing::warn!("Using --dangerously-skip-permissions");
        args.push("--dangerously-skip-permissions".to_string());
    }

    args
}
