//! Claude CLI session bridge
//!
//! Spawns one Claude CLI process per request, streams its `stream-json`
//! stdout through the parser and forwards normalized events to a
//! [`ProxyWriter`]. The process stays in the [`ProcessRegistry`] while it
//! runs, first under a provisional key and then under the session id the
//! CLI reports, so it can be aborted from another connection.

use crate::agent::args::build_claude_args;
use crate::agent::parser::{decode_line, NdjsonLine, NdjsonLineCodec, TurnTracker};
use crate::agent::registry::{ProcessHandle, ProcessRegistry};
use crate::agent::types::{ExitCode, ProxyEvent, ProxyWriter, RunOptions};
use crate::config::{CliConfig, CredentialSource, ProxyConfigStatus};
use crate::error::{Error, Result};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::process::{Child, Command};
use tokio_util::codec::{BytesCodec, FramedRead};
use tokio_util::sync::CancellationToken;

const NOT_CONFIGURED: &str = "Claude Code Proxy not configured. Please set ANTHROPIC_BASE_URL and ANTHROPIC_API_KEY environment variables.";

/// Bridge between clients and Claude CLI processes
pub struct ClaudeProxy {
    registry: Arc<ProcessRegistry>,
    binary: PathBuf,
    credentials: CredentialSource,
}

impl ClaudeProxy {
    /// Create a bridge reading credentials from the process environment
    pub fn new(registry: Arc<ProcessRegistry>, cli: &CliConfig) -> Self {
        Self {
            registry,
            binary: cli.binary.clone(),
            credentials: CredentialSource::Environment,
        }
    }

    /// Replace the credential source
    pub fn with_credentials(mut self, credentials: CredentialSource) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Current configuration status of this bridge's credentials
    pub fn config_status(&self) -> ProxyConfigStatus {
        self.credentials.resolve().status()
    }

    /// Run one CLI invocation to completion.
    ///
    /// The writer receives an event for every terminal state. The returned
    /// result additionally tells the caller whether the process succeeded.
    pub async fn run(
        &self,
        message: &str,
        options: &RunOptions,
        writer: &dyn ProxyWriter,
    ) -> Result<()> {
        let credentials = self.credentials.resolve();
        if !credentials.status().configured {
            tracing::error!("{}", NOT_CONFIGURED);
            writer.send(ProxyEvent::error(NOT_CONFIGURED));
            return Err(Error::Configuration(NOT_CONFIGURED.to_string()));
        }

        let args = build_claude_args(message, options);
        let working_dir = options.working_dir();

        tracing::info!(
            binary = %self.binary.display(),
            args = %args.join(" "),
            cwd = ?working_dir,
            session_id = ?options.session_id(),
            "Spawning Claude CLI"
        );

        let mut command = Command::new(&self.binary);
        command
            .args(&args)
            .envs(credentials.env_pairs())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref dir) = working_dir {
            command.current_dir(dir);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                let message = format!(
                    "Failed to spawn Claude CLI at {}: {}",
                    self.binary.display(),
                    e
                );
                tracing::error!("{}", message);
                writer.send(ProxyEvent::error(message.clone()));
                return Err(Error::Process(message));
            }
        };

        // The CLI is not interactive
        drop(child.stdin.take());

        let handle = ProcessHandle::new(child.id());
        let provisional_key = match options.session_id() {
            Some(session_id) => {
                self.registry.insert(session_id, handle.clone()).await;
                session_id.to_string()
            }
            None => {
                self.registry
                    .insert_provisional(now_millis(), handle.clone())
                    .await
            }
        };

        let mut stream = StreamSession {
            registry: &self.registry,
            writer,
            handle: handle.clone(),
            provisional_key,
            tracker: TurnTracker::new(
                options.session_id().map(str::to_string),
                !message.is_empty(),
            ),
        };

        let outcome = stream.pump(&mut child, handle.cancellation()).await;

        let final_key = stream.final_key();
        self.registry.remove_if_owned(&final_key, handle.id()).await;

        match outcome {
            Ok(status) => {
                let code = status.code();
                tracing::info!(session_id = %final_key, exit_code = ?code, "Claude CLI exited");

                writer.send(ProxyEvent::Complete {
                    session_id: Some(final_key),
                    success: None,
                    exit_code: ExitCode::Exited(code),
                    is_new_session: stream.tracker.is_new_session(),
                });

                if status.success() {
                    Ok(())
                } else {
                    Err(Error::ProcessExit { code })
                }
            }
            Err(e) => {
                tracing::error!(session_id = %final_key, "Claude CLI process error: {}", e);
                writer.send(ProxyEvent::error(e.to_string()));
                Err(Error::Process(e.to_string()))
            }
        }
    }

    /// Terminate the process serving `session_id`.
    ///
    /// Returns `false` when no such process is registered.
    pub async fn abort(&self, session_id: &str) -> bool {
        self.registry.abort(session_id).await
    }

    pub async fn is_active(&self, session_id: &str) -> bool {
        self.registry.contains(session_id).await
    }

    pub async fn active_sessions(&self) -> Vec<String> {
        self.registry.keys().await
    }
}

/// Per-invocation streaming state
struct StreamSession<'a> {
    registry: &'a ProcessRegistry,
    writer: &'a dyn ProxyWriter,
    handle: ProcessHandle,
    provisional_key: String,
    tracker: TurnTracker,
}

impl StreamSession<'_> {
    /// Registry key the process ends up under
    fn final_key(&self) -> String {
        self.tracker
            .session_id()
            .map(str::to_string)
            .unwrap_or_else(|| self.provisional_key.clone())
    }

    /// Forward stdout/stderr until both close, then reap the child.
    async fn pump(
        &mut self,
        child: &mut Child,
        cancel: CancellationToken,
    ) -> std::io::Result<ExitStatus> {
        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "Claude CLI stdio was not captured",
            ));
        };

        let mut stdout = FramedRead::new(stdout, NdjsonLineCodec::new());
        let max_line = stdout.decoder().max_length();
        let mut stderr = FramedRead::new(stderr, BytesCodec::new());
        let mut stdout_open = true;
        let mut stderr_open = true;
        let mut terminating = false;

        while stdout_open || stderr_open {
            tokio::select! {
                line = stdout.next(), if stdout_open => match line {
                    Some(Ok(NdjsonLine::Line(line))) => self.handle_line(&line).await,
                    Some(Ok(NdjsonLine::Oversized { length })) => {
                        let message = format!(
                            "Claude CLI output line of {} bytes exceeds the {} byte limit and was dropped",
                            length,
                            max_line
                        );
                        tracing::warn!("{}", message);
                        self.writer.send(ProxyEvent::error(message));
                    }
                    Some(Err(e)) => {
                        tracing::warn!("Claude CLI stdout read failed: {}", e);
                        stdout_open = false;
                    }
                    None => stdout_open = false,
                },
                chunk = stderr.next(), if stderr_open => match chunk {
                    Some(Ok(chunk)) => {
                        let text = String::from_utf8_lossy(&chunk).into_owned();
                        tracing::warn!("Claude CLI stderr: {}", text.trim_end());
                        self.writer.send(ProxyEvent::error(text));
                    }
                    Some(Err(e)) => {
                        tracing::warn!("Claude CLI stderr read failed: {}", e);
                        stderr_open = false;
                    }
                    None => stderr_open = false,
                },
                _ = cancel.cancelled(), if !terminating => {
                    terminating = true;
                    terminate_child(child);
                }
            }
        }

        loop {
            let cancelled = tokio::select! {
                status = child.wait() => return status,
                _ = cancel.cancelled(), if !terminating => true,
            };
            if cancelled {
                terminating = true;
                terminate_child(child);
            }
        }
    }

    async fn handle_line(&mut self, line: &str) {
        tracing::trace!("Claude CLI stdout: {}", line);

        let dispatch = self.tracker.apply(decode_line(line));

        if let Some(ref session_id) = dispatch.captured_session_id {
            if self.provisional_key != *session_id {
                self.registry
                    .rekey(&self.provisional_key, session_id, &self.handle)
                    .await;
            }
            self.writer.set_session_id(session_id);
        }

        for event in dispatch.events {
            self.writer.send(event);
        }
    }
}

/// Send SIGTERM where available, else kill outright
fn terminate_child(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // SAFETY: `pid` belongs to a child we spawned and have not reaped yet.
            if unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) } == 0 {
                return;
            }
        }
    }

    if let Err(e) = child.start_kill() {
        tracing::warn!("Failed to kill Claude CLI process: {}", e);
    }
}

/// Current time in milliseconds since UNIX epoch
fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
