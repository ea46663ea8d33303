//! Session backed by an interpreter bridge process.
//!
//! The bridge is any program that reads execution requests as JSON lines on
//! stdin and writes result messages as JSON lines on stdout:
//!
//! ```text
//! stdin  → {"msg_id": "<token>", "code": "print(2+3)"}
//! stdout ← {"parent_id": "<token>", "msg_type": "stream", "content": {"name": "stdout", "text": "5\n"}}
//! stdout ← {"parent_id": "<token>", "msg_type": "status", "content": {"execution_state": "idle"}}
//! ```

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};

use super::{
    ChannelSession, ExecuteRequest, ExecutionToken, InterpreterSession, KernelEndpoint,
    KernelMessage, SessionFactory,
};

/// Session talking to a spawned bridge process over stdio.
pub struct ProcessSession {
    /// The bridge process
    child: Child,
    /// Correlation and timeouts are handled by the channel session
    inner: ChannelSession,
    /// Forwards requests to the bridge's stdin
    writer: JoinHandle<()>,
    /// Forwards parsed stdout lines as messages
    reader: JoinHandle<()>,
}

impl ProcessSession {
    /// Spawn the bridge process.
    pub async fn spawn(program: &Path, args: &[String]) -> Result<Self> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::Session(format!(
                    "Failed to spawn interpreter bridge '{}': {}",
                    program.display(),
                    e
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Session("Failed to get interpreter bridge stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Session("Failed to get interpreter bridge stdout".to_string()))?;

        let (inner, endpoint) = ChannelSession::pair();
        let KernelEndpoint { requests, messages } = endpoint;

        let writer = tokio::spawn(forward_requests(requests, stdin));
        let reader = tokio::spawn(forward_messages(stdout, messages));

        tracing::info!(
            "Started interpreter bridge {} (pid {:?})",
            program.display(),
            child.id()
        );

        Ok(Self {
            child,
            inner,
            writer,
            reader,
        })
    }
}

/// Write each request to the bridge as one JSON line.
async fn forward_requests(mut requests: mpsc::UnboundedReceiver<ExecuteRequest>, mut stdin: ChildStdin) {
    while let Some(request) = requests.recv().await {
        let mut line = match serde_json::to_string(&request) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("Failed to encode execution request: {}", e);
                continue;
            }
        };
        line.push('\n');

        if let Err(e) = stdin.write_all(line.as_bytes()).await {
            tracing::warn!("Interpreter bridge stopped accepting requests: {}", e);
            break;
        }
        if let Err(e) = stdin.flush().await {
            tracing::warn!("Failed to flush interpreter bridge stdin: {}", e);
            break;
        }
    }
}

/// Parse the bridge's stdout into messages until it closes.
async fn forward_messages(stdout: ChildStdout, messages: mpsc::UnboundedSender<KernelMessage>) {
    let mut lines = BufReader::new(stdout).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("Failed to read from interpreter bridge: {}", e);
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match serde_json::from_str::<KernelMessage>(line) {
            Ok(message) => {
                if messages.send(message).is_err() {
                    break;
                }
            }
            Err(e) => tracing::warn!("Ignoring unparseable interpreter bridge line: {}", e),
        }
    }

    tracing::debug!("Interpreter bridge output closed");
}

#[async_trait]
impl InterpreterSession for ProcessSession {
    async fn execute(&mut self, code: &str) -> Result<ExecutionToken> {
        self.inner.execute(code).await
    }

    async fn listen(&mut self, token: &ExecutionToken, timeout: Duration) -> Result<KernelMessage> {
        self.inner.listen(token, timeout).await
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.close().await?;
        self.writer.abort();
        self.reader.abort();

        match self.child.kill().await {
            Ok(()) => {}
            // Already exited on its own.
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => {}
            Err(e) => return Err(Error::Io(e)),
        }
        tracing::info!("Interpreter bridge shut down");
        Ok(())
    }
}

/// Starts a new bridge process for every session.
#[derive(Debug, Clone)]
pub struct ProcessSessionFactory {
    /// Resolved bridge executable
    program: PathBuf,
    /// Arguments passed to every bridge process
    args: Vec<String>,
}

impl ProcessSessionFactory {
    /// Create a factory for `program`, looked up on `PATH` unless it is a path.
    pub fn new(program: &str, args: Vec<String>) -> Result<Self> {
        let program = which::which(program).map_err(|e| {
            Error::Session(format!("Could not find interpreter bridge '{}': {}", program, e))
        })?;
        Ok(Self { program, args })
    }

    /// The resolved bridge executable.
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Arguments passed to the bridge.
    pub fn args(&self) -> &[String] {
        &self.args
    }
}

#[async_trait]
impl SessionFactory for ProcessSessionFactory {
    type Session = ProcessSession;

    async fn open(&mut self) -> Result<ProcessSession> {
        ProcessSession::spawn(&self.program, &self.args).await
    }
}
