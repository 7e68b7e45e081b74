//! Activation progress events

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

/// Events buffered between the pipeline and a slow consumer
const FEED_BUFFER: usize = 64;

/// Event class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventChannel {
    Info,
    Warning,
    Error,
    Done,
}

impl EventChannel {
    /// Warnings only ever close a run (degraded or slow start), so every
    /// class except `info` ends the feed.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, EventChannel::Info)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventChannel::Info => "info",
            EventChannel::Warning => "warning",
            EventChannel::Error => "error",
            EventChannel::Done => "done",
        }
    }
}

impl fmt::Display for EventChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of activation progress
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationEvent {
    /// Position in the run, starting at 1
    pub sequence: u64,
    pub channel: EventChannel,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ActivationEvent {
    /// `channel: text` on a single line
    pub fn to_line(&self) -> String {
        format!("{}: {}", self.channel, self.text.replace('\n', " | "))
    }
}

/// Normalize one line of external command output for a line-oriented
/// transport: quotes become apostrophes, line terminators and surrounding
/// whitespace are dropped.
pub fn sanitize_line(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| *c != '\r' && *c != '\n')
        .map(|c| match c {
            '"' | '\u{201C}' | '\u{201D}' | '\u{2018}' | '\u{2019}' | '`' => '\'',
            other => other,
        })
        .collect()
}

/// [`sanitize_line`] applied to each line, blank lines dropped
pub fn sanitize_output(raw: &str) -> String {
    raw.lines()
        .map(sanitize_line)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Ordered, finite feed of events for one activation run
pub struct ActivationFeed {
    rx: mpsc::Receiver<ActivationEvent>,
}

impl ActivationFeed {
    /// Next event; `None` after the terminal event has been delivered
    pub async fn next_event(&mut self) -> Option<ActivationEvent> {
        self.rx.recv().await
    }
}

impl Stream for ActivationFeed {
    type Item = ActivationEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Producer side of an [`ActivationFeed`].
///
/// Numbers events, refuses anything after the terminal event and notices
/// when the consumer has gone away.
pub struct EventSink {
    tx: mpsc::Sender<ActivationEvent>,
    next_sequence: u64,
    detached: bool,
    terminated: bool,
}

impl EventSink {
    pub fn channel() -> (Self, ActivationFeed) {
        let (tx, rx) = mpsc::channel(FEED_BUFFER);
        let sink = Self {
            tx,
            next_sequence: 1,
            detached: false,
            terminated: false,
        };
        (sink, ActivationFeed { rx })
    }

    /// Whether the consumer stopped listening
    pub fn is_detached(&self) -> bool {
        self.detached || self.tx.is_closed()
    }

    pub async fn info(&mut self, text: impl Into<String>) {
        self.emit(EventChannel::Info, text).await;
    }

    pub async fn warning(&mut self, text: impl Into<String>) {
        self.emit(EventChannel::Warning, text).await;
    }

    pub async fn error(&mut self, text: impl Into<String>) {
        self.emit(EventChannel::Error, text).await;
    }

    pub async fn done(&mut self, text: impl Into<String>) {
        self.emit(EventChannel::Done, text).await;
    }

    async fn emit(&mut self, channel: EventChannel, text: impl Into<String>) {
        let text = text.into();
        if self.terminated {
            debug!("Dropping {} event after terminal event: {}", channel, text);
            return;
        }
        if channel.is_terminal() {
            self.terminated = true;
        }

        let event = ActivationEvent {
            sequence: self.next_sequence,
            channel,
            text,
            timestamp: Utc::now(),
        };
        self.next_sequence += 1;

        if self.detached {
            return;
        }
        if self.tx.send(event).await.is_err() {
            debug!("Activation feed consumer disconnected");
            self.detached = true;
        }
    }
}
