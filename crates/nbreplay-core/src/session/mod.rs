//! Interpreter sessions.
//!
//! A session submits code to a live interpreter and hands back the result
//! messages correlated with each submission.
//!
//! # Protocol
//!
//! ```text
//! execute(code) ──► token
//!                    │
//! listen(token) ◄────┘  stream / display_data / execute_result / error ...
//! listen(token) ◄────   status: idle   (execution finished)
//! ```
//!
//! Only one execution is outstanding at a time: the caller drains a token to
//! `idle` before submitting the next one.
//!
//! # Transports
//!
//! - [`ChannelSession`] - in-process, over tokio channels
//! - [`ProcessSession`] - an interpreter bridge process speaking JSON lines

mod channel;
mod process;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use channel::{ChannelSession, KernelEndpoint};
pub use process::{ProcessSession, ProcessSessionFactory};

/// Identifier of one submitted execution.
///
/// Tokens are random UUIDs, so they are unique for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionToken(String);

impl ExecutionToken {
    /// Generate a fresh token.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Wrap an existing identifier.
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ExecutionToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExecutionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Request to execute code, as sent to the interpreter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    /// Token the interpreter must echo as `parent_id`
    pub msg_id: ExecutionToken,
    /// Source to execute
    pub code: String,
}

/// A result message from the interpreter.
///
/// `msg_type` and `content` follow the Jupyter iopub message shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelMessage {
    /// Token of the execution this message belongs to
    pub parent_id: ExecutionToken,
    /// Message kind (`stream`, `status`, `execute_result`, ...)
    pub msg_type: String,
    /// Kind-specific payload
    #[serde(default)]
    pub content: serde_json::Value,
}

impl KernelMessage {
    /// Create a message.
    pub fn new(
        parent_id: &ExecutionToken,
        msg_type: impl Into<String>,
        content: serde_json::Value,
    ) -> Self {
        Self {
            parent_id: parent_id.clone(),
            msg_type: msg_type.into(),
            content,
        }
    }

    pub fn stream(parent_id: &ExecutionToken, name: &str, text: &str) -> Self {
        Self::new(parent_id, "stream", serde_json::json!({ "name": name, "text": text }))
    }

    pub fn status(parent_id: &ExecutionToken, execution_state: &str) -> Self {
        Self::new(
            parent_id,
            "status",
            serde_json::json!({ "execution_state": execution_state }),
        )
    }

    pub fn idle(parent_id: &ExecutionToken) -> Self {
        Self::status(parent_id, "idle")
    }

    pub fn busy(parent_id: &ExecutionToken) -> Self {
        Self::status(parent_id, "busy")
    }

    pub fn execute_input(parent_id: &ExecutionToken, code: &str) -> Self {
        Self::new(parent_id, "execute_input", serde_json::json!({ "code": code }))
    }

    pub fn clear_output(parent_id: &ExecutionToken) -> Self {
        Self::new(parent_id, "clear_output", serde_json::json!({ "wait": false }))
    }

    pub fn display_data(parent_id: &ExecutionToken, data: serde_json::Value) -> Self {
        Self::new(
            parent_id,
            "display_data",
            serde_json::json!({ "data": data, "metadata": {} }),
        )
    }

    pub fn execute_result(
        parent_id: &ExecutionToken,
        execution_count: u32,
        data: serde_json::Value,
    ) -> Self {
        Self::new(
            parent_id,
            "execute_result",
            serde_json::json!({ "execution_count": execution_count, "data": data, "metadata": {} }),
        )
    }

    pub fn error(parent_id: &ExecutionToken, ename: &str, evalue: &str, traceback: &[&str]) -> Self {
        Self::new(
            parent_id,
            "error",
            serde_json::json!({ "ename": ename, "evalue": evalue, "traceback": traceback }),
        )
    }
}

/// Live interpreter session.
#[async_trait]
pub trait InterpreterSession: Send {
    /// Submit code for execution and return its token.
    async fn execute(&mut self, code: &str) -> Result<ExecutionToken>;

    /// Wait for the next message correlated with `token`.
    ///
    /// Returns `Error::TimedOut` if none arrives within `timeout`. A timeout
    /// only ends the wait; the interpreter may still be running the code.
    async fn listen(&mut self, token: &ExecutionToken, timeout: Duration) -> Result<KernelMessage>;

    /// Shut the session down.
    async fn close(&mut self) -> Result<()>;
}

/// Allocates a fresh session for every pass over a notebook.
#[async_trait]
pub trait SessionFactory: Send {
    type Session: InterpreterSession;

    /// Start a new session.
    async fn open(&mut self) -> Result<Self::Session>;
}
