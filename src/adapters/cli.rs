//! CLI adapter - interactive command line channel over the message bus.
//!
//! Lines typed by the user go onto the bus as `cli` inbound messages; the
//! replies published for `cli` are printed before the next prompt.

use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::bus::{topics, InboundMessage, MessageBus, OutboundMessage, Subscription};
use crate::error::Error;
use crate::ui;
use crate::Result;

use super::Channel;

/// Metadata key pairing a reply with the line that asked for it.
const REQUEST_ID: &str = "request_id";

/// CLI channel for interactive agent sessions.
pub struct CliChannel {
    bus: MessageBus,
    sender_id: String,
    cancel: CancellationToken,
    reply_timeout: Duration,
    replies: Mutex<mpsc::UnboundedReceiver<OutboundMessage>>,
    subscription: Subscription,
}

impl CliChannel {
    /// Create a CLI channel talking as `sender_id`. Replies are collected from
    /// the moment of construction.
    pub fn new(bus: MessageBus, sender_id: &str, cancel: CancellationToken) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = bus.subscribe_outbound(topics::CLI, move |msg: OutboundMessage| {
            let tx = tx.clone();
            async move {
                tx.send(msg).map_err(|_| Error::BusClosed)?;
                Ok::<(), Error>(())
            }
        });

        Self {
            bus,
            sender_id: sender_id.to_string(),
            cancel,
            reply_timeout: Duration::from_secs(600),
            replies: Mutex::new(rx),
            subscription,
        }
    }

    /// How long to wait for the agent before giving up on a line.
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// Send one line and wait for the reply to it. Replies to earlier lines
    /// that arrive late are skipped.
    pub async fn ask(&self, text: &str) -> Result<String> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let msg = InboundMessage::new(topics::CLI, &self.sender_id, text)
            .with_metadata(REQUEST_ID, request_id.as_str());
        self.bus.send_blocking(&self.cancel, msg).await?;

        let mut replies = self.replies.lock().await;
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                next = tokio::time::timeout(self.reply_timeout, replies.recv()) => next,
            };

            match next {
                Err(_) => return Err(Error::Timeout),
                Ok(None) => return Err(Error::BusClosed),
                Ok(Some(reply)) if reply.metadata.get(REQUEST_ID).and_then(|v| v.as_str()) == Some(request_id.as_str()) => {
                    return Ok(reply.content)
                }
                Ok(Some(other)) => debug!(sender = %other.sender_id, "Ignoring stale or foreign reply"),
            }
        }
    }

    /// REPL over any line source. Returns on EOF, `exit`/`quit`, or cancel.
    pub async fn run<R>(&self, input: R) -> Result<()>
    where
        R: AsyncBufRead + Unpin + Send,
    {
        let mut lines = input.lines();

        loop {
            ui::print_prompt();

            let line = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                line = lines.next_line() => line?,
            };

            let Some(line) = line else {
                break;
            };

            let input = line.trim();
            if input.is_empty() {
                continue;
            }
            if matches!(input.to_lowercase().as_str(), "exit" | "quit" | "q") {
                break;
            }

            match self.ask(input).await {
                Ok(reply) => ui::print_reply(&reply),
                Err(Error::Cancelled) => break,
                Err(e) => ui::print_error(&e.to_string()),
            }
        }

        ui::print_goodbye();
        Ok(())
    }
}

impl Channel for CliChannel {
    fn name(&self) -> &str {
        topics::CLI
    }

    async fn start(&self) -> Result<()> {
        self.run(BufReader::new(tokio::io::stdin())).await
    }

    async fn stop(&self) -> Result<()> {
        self.cancel.cancel();
        self.bus.unsubscribe(&self.subscription);
        Ok(())
    }
}
