//! Heartbeat - periodic task prompts from `HEARTBEAT.md`
//!
//! Every unchecked checkbox (`- [ ] ...`) in `<workspace>/HEARTBEAT.md` is sent
//! to the bus as an inbound message on the `heartbeat` channel, once at start
//! and then on every tick. Ticking the box in the file stops the reminders.

use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::{topics, InboundMessage, MessageBus};
use crate::error::Error;
use crate::Result;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Sender id (and `source` metadata) of heartbeat messages.
pub const HEARTBEAT_SENDER: &str = "heartbeat";

const TASK_PATTERN: &str = r"(?m)^[ \t]*[-*][ \t]*\[ \][ \t]*(.+)$";

pub struct Heartbeat {
    bus: MessageBus,
    path: PathBuf,
    interval: Duration,
    task_pattern: Regex,
}

impl Heartbeat {
    pub fn new(bus: MessageBus, workspace: &Path) -> Result<Self> {
        let task_pattern =
            Regex::new(TASK_PATTERN).map_err(|e| Error::Config(format!("Invalid heartbeat pattern: {}", e)))?;

        Ok(Self {
            bus,
            path: workspace.join("HEARTBEAT.md"),
            interval: DEFAULT_INTERVAL,
            task_pattern,
        })
    }

    /// Override the polling interval. Zero keeps the current one.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        if !interval.is_zero() {
            self.interval = interval;
        }
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Unchecked tasks in `text`, in file order.
    pub fn pending_tasks(&self, text: &str) -> Vec<String> {
        self.task_pattern
            .captures_iter(text)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|task| !task.is_empty())
            .collect()
    }

    /// Read the file and send each pending task. Returns how many were queued.
    pub fn tick(&self) -> usize {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return 0,
            Err(e) => {
                warn!(path = ?self.path, error = %e, "Failed to read HEARTBEAT.md");
                return 0;
            }
        };

        let mut sent = 0;
        for task in self.pending_tasks(&content) {
            let msg = InboundMessage::new(topics::HEARTBEAT, HEARTBEAT_SENDER, &task)
                .with_metadata("source", HEARTBEAT_SENDER)
                .with_metadata("task", task.as_str());
            if self.bus.send(msg) {
                sent += 1;
            } else {
                warn!(task = %task, "Inbound queue unavailable, heartbeat task skipped");
            }
        }

        debug!(sent, "Heartbeat tick");
        sent
    }

    /// Tick immediately, then every interval, until `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval = ?self.interval, path = ?self.path, "Heartbeat started");
            let mut ticker = tokio::time::interval(self.interval);

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        self.tick();
                    }
                }
            }
            info!("Heartbeat stopped");
        })
    }
}
