//! Turning interpreter messages into output records.
//!
//! ```text
//! stream(stdout,"a") ─┐
//! stream(stdout,"b") ─┼─► [stream(stdout,"ab"), stream(stderr,"x")]
//! stream(stderr,"x") ─┘
//! status(idle)       ───► done
//! ```

use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};
use crate::notebook::{MimeBundle, OutputRecord};
use crate::session::{ExecutionToken, InterpreterSession, KernelMessage};

/// Whether collection should continue after a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectStep {
    /// More messages are expected
    Continue,
    /// The interpreter reported idle; the execution is finished
    Idle,
}

#[derive(Deserialize)]
struct StreamContent {
    name: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct StatusContent {
    execution_state: String,
}

#[derive(Deserialize)]
struct DisplayContent {
    #[serde(default)]
    data: MimeBundle,
    #[serde(default)]
    metadata: serde_json::Value,
}

#[derive(Deserialize)]
struct ExecuteResultContent {
    #[serde(default)]
    execution_count: Option<u32>,
    #[serde(default)]
    data: MimeBundle,
    #[serde(default)]
    metadata: serde_json::Value,
}

#[derive(Deserialize)]
struct ErrorContent {
    ename: String,
    evalue: String,
    #[serde(default)]
    traceback: Vec<String>,
}

fn parse_content<T: DeserializeOwned>(message: &KernelMessage) -> Result<T> {
    serde_json::from_value(message.content.clone()).map_err(|e| {
        Error::Protocol(format!("malformed `{}` message: {}", message.msg_type, e))
    })
}

/// Accumulates the outputs of one execution.
#[derive(Debug, Default)]
pub struct OutputCollector {
    outputs: Vec<OutputRecord>,
}

impl OutputCollector {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one message to the accumulated outputs.
    pub fn push(&mut self, message: &KernelMessage) -> Result<CollectStep> {
        match message.msg_type.as_str() {
            "execute_input" => {}
            "clear_output" => self.outputs.clear(),
            "status" => {
                let status: StatusContent = parse_content(message)?;
                if status.execution_state == "idle" {
                    return Ok(CollectStep::Idle);
                }
            }
            "stream" => {
                let StreamContent { name, text } = parse_content(message)?;
                self.append_stream(name, &text);
            }
            "display_data" => {
                let DisplayContent { data, metadata } = parse_content(message)?;
                self.outputs.push(OutputRecord::DisplayData { data, metadata });
            }
            "execute_result" => {
                let ExecuteResultContent {
                    execution_count,
                    data,
                    metadata,
                } = parse_content(message)?;
                self.outputs.push(OutputRecord::ExecuteResult {
                    execution_count,
                    data,
                    metadata,
                });
            }
            "error" => {
                let ErrorContent {
                    ename,
                    evalue,
                    traceback,
                } = parse_content(message)?;
                self.outputs.push(OutputRecord::Error {
                    ename,
                    evalue,
                    traceback,
                });
            }
            // Widget traffic.
            kind if kind.starts_with("comm_") => {
                tracing::debug!("Ignoring `{}` message", kind);
            }
            kind => {
                tracing::warn!("Unhandled interpreter message of type `{}`", kind);
            }
        }
        Ok(CollectStep::Continue)
    }

    /// Append stream text, merging into an existing record of the same stream.
    fn append_stream(&mut self, name: String, chunk: &str) {
        let existing = self.outputs.iter_mut().find_map(|output| match output {
            OutputRecord::Stream { name: n, text } if *n == name => Some(text),
            _ => None,
        });

        match existing {
            Some(existing) => existing.push_str(chunk),
            None => self.outputs.push(OutputRecord::Stream {
                name,
                text: chunk.to_string(),
            }),
        }
    }

    /// Outputs collected so far.
    pub fn outputs(&self) -> &[OutputRecord] {
        &self.outputs
    }

    /// Consume the collector, returning its outputs.
    pub fn into_outputs(self) -> Vec<OutputRecord> {
        self.outputs
    }

    /// Listen on `token` until the interpreter goes idle.
    ///
    /// `timeout` bounds the wait for each message, not the whole execution.
    pub async fn collect<S>(
        session: &mut S,
        token: &ExecutionToken,
        timeout: Duration,
    ) -> Result<Vec<OutputRecord>>
    where
        S: InterpreterSession + ?Sized,
    {
        let mut collector = Self::new();
        loop {
            let message = session.listen(token, timeout).await?;
            if collector.push(&message)? == CollectStep::Idle {
                return Ok(collector.into_outputs());
            }
        }
    }
}
