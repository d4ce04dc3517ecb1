//! Child-process transport: newline-delimited JSON over stdin/stdout.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use meshmate_core::ServerConfig;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;

use super::path::{build_effective_path, resolve_executable, validate_working_dir};
use super::{MessageTransport, TransportFactory};
use crate::error::McpClientError;

/// How long `close` waits for the child to exit after it was killed.
const EXIT_GRACE: Duration = Duration::from_secs(2);

/// Spawns server processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdioTransportFactory;

impl StdioTransportFactory {
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TransportFactory for StdioTransportFactory {
    async fn launch(
        &self,
        config: &ServerConfig,
    ) -> Result<Box<dyn MessageTransport>, McpClientError> {
        Ok(Box::new(StdioTransport::spawn(config)?))
    }
}

/// A running server process.
pub struct StdioTransport {
    server: String,
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Lines<BufReader<ChildStdout>>,
    stderr_task: Option<JoinHandle<()>>,
}

impl StdioTransport {
    /// Spawn the configured command with piped stdio.
    ///
    /// The child is killed when the transport is dropped.
    pub fn spawn(config: &ServerConfig) -> Result<Self, McpClientError> {
        let path_extra = config.env.get("PATH").map(String::as_str);
        let exe = resolve_executable(&config.command, path_extra).map_err(McpClientError::Launch)?;

        if let Some(cwd) = &config.cwd {
            validate_working_dir(cwd).map_err(McpClientError::Launch)?;
        }

        let effective_path = build_effective_path(&exe, path_extra);

        let mut command = Command::new(&exe);
        command
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env("PATH", &effective_path)
            .kill_on_drop(true);

        if let Some(cwd) = &config.cwd {
            command.current_dir(cwd);
        }

        for (key, value) in config.env.iter().filter(|(key, _)| key.as_str() != "PATH") {
            command.env(key, expand_env_value(value));
        }

        let mut child = command.spawn().map_err(|e| {
            McpClientError::Launch(format!(
                "Failed to spawn '{}': {e}\nArgs: {:?}\nCwd: {:?}\nEffective PATH: {}",
                exe.display(),
                config.args,
                config.cwd,
                effective_path.to_string_lossy()
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpClientError::Launch("Failed to open stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpClientError::Launch("Failed to open stdout".to_string()))?;
        let stderr = child.stderr.take();

        let stderr_task = stderr.map(|stderr| {
            let server = config.name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(target: "meshmate_mcp::stderr", server = %server, "{line}");
                }
            })
        });

        tracing::info!(
            server = %config.name,
            command = %exe.display(),
            pid = child.id(),
            "Server process started"
        );

        Ok(Self {
            server: config.name.clone(),
            child,
            stdin: Some(stdin),
            stdout: BufReader::new(stdout).lines(),
            stderr_task,
        })
    }
}

#[async_trait]
impl MessageTransport for StdioTransport {
    async fn send(&mut self, message: String) -> Result<(), McpClientError> {
        let stdin = self.stdin.as_mut().ok_or(McpClientError::Closed)?;
        tracing::trace!(server = %self.server, %message, "-> server");
        stdin.write_all(message.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<String>, McpClientError> {
        loop {
            let Some(line) = self.stdout.next_line().await? else {
                return Ok(None);
            };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            // Package runners (npx, uvx) sometimes print banners to stdout.
            if !trimmed.starts_with('{') {
                tracing::debug!(server = %self.server, line = trimmed, "Skipping non-JSON-RPC output");
                continue;
            }
            tracing::trace!(server = %self.server, message = trimmed, "<- server");
            return Ok(Some(trimmed.to_string()));
        }
    }

    async fn close(&mut self) {
        // Dropping stdin signals EOF to well-behaved servers.
        self.stdin = None;
        if let Err(e) = self.child.start_kill() {
            tracing::debug!(server = %self.server, error = %e, "Server process already gone");
        }
        match tokio::time::timeout(EXIT_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!(server = %self.server, %status, "Server process exited");
            }
            Ok(Err(e)) => tracing::warn!(server = %self.server, error = %e, "Failed to reap server process"),
            Err(_) => tracing::warn!(server = %self.server, "Server process did not exit in time"),
        }
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
    }
}

/// Resolve a `${VAR}` value from the host environment; other values pass through.
fn expand_env_value(value: &str) -> String {
    value
        .strip_prefix("${")
        .and_then(|rest| rest.strip_suffix('}'))
        .map_or_else(
            || value.to_string(),
            |var| std::env::var(var).unwrap_or_default(),
        )
}
