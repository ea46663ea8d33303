//! In-process session over tokio channels.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::error::{Error, Result};

use super::{ExecuteRequest, ExecutionToken, InterpreterSession, KernelMessage};

/// Session whose interpreter lives on the other end of a pair of channels.
///
/// Messages that arrive for a token other than the one being listened for
/// are parked in a mailbox until asked for. The mailbox is emptied on every
/// `execute`: with a single outstanding execution, anything still parked at
/// that point belongs to an abandoned submission.
pub struct ChannelSession {
    /// Outgoing execution requests
    requests: mpsc::UnboundedSender<ExecuteRequest>,
    /// Incoming result messages
    messages: mpsc::UnboundedReceiver<KernelMessage>,
    /// Messages received for tokens nobody has asked for yet
    mailbox: FxHashMap<ExecutionToken, VecDeque<KernelMessage>>,
    closed: bool,
}

/// The interpreter side of a [`ChannelSession`].
pub struct KernelEndpoint {
    /// Execution requests submitted by the session
    pub requests: mpsc::UnboundedReceiver<ExecuteRequest>,
    /// Where result messages are delivered
    pub messages: mpsc::UnboundedSender<KernelMessage>,
}

impl ChannelSession {
    /// Create a connected session and interpreter endpoint.
    pub fn pair() -> (Self, KernelEndpoint) {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (message_tx, message_rx) = mpsc::unbounded_channel();

        let session = Self::from_channels(request_tx, message_rx);
        let endpoint = KernelEndpoint {
            requests: request_rx,
            messages: message_tx,
        };
        (session, endpoint)
    }

    /// Create a session from existing channels.
    pub fn from_channels(
        requests: mpsc::UnboundedSender<ExecuteRequest>,
        messages: mpsc::UnboundedReceiver<KernelMessage>,
    ) -> Self {
        Self {
            requests,
            messages,
            mailbox: FxHashMap::default(),
            closed: false,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::Session("session is closed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl InterpreterSession for ChannelSession {
    async fn execute(&mut self, code: &str) -> Result<ExecutionToken> {
        self.ensure_open()?;
        self.mailbox.clear();

        let token = ExecutionToken::new();
        self.requests
            .send(ExecuteRequest {
                msg_id: token.clone(),
                code: code.to_string(),
            })
            .map_err(|_| Error::Session("interpreter is no longer accepting requests".to_string()))?;

        tracing::debug!("Submitted execution {}", token);
        Ok(token)
    }

    async fn listen(&mut self, token: &ExecutionToken, timeout: Duration) -> Result<KernelMessage> {
        self.ensure_open()?;

        if let Some(message) = self.mailbox.get_mut(token).and_then(VecDeque::pop_front) {
            return Ok(message);
        }

        let deadline = deadline_after(timeout);
        loop {
            match tokio::time::timeout_at(deadline, self.messages.recv()).await {
                Err(_) => {
                    return Err(Error::TimedOut {
                        seconds: timeout.as_secs(),
                    });
                }
                Ok(None) => {
                    return Err(Error::Session(
                        "interpreter closed the message channel".to_string(),
                    ));
                }
                Ok(Some(message)) if &message.parent_id == token => return Ok(message),
                Ok(Some(message)) => {
                    tracing::trace!(
                        "Parking `{}` message for execution {}",
                        message.msg_type,
                        message.parent_id
                    );
                    self.mailbox
                        .entry(message.parent_id.clone())
                        .or_default()
                        .push_back(message);
                }
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.messages.close();
        self.mailbox.clear();
        Ok(())
    }
}

/// Roughly 30 years, the wait used when `timeout` is too large to add to now.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Deadline `timeout` from now, capped for timeouts too large to represent.
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE)
}
