// Streaming feeds
//
// Server-sent-event style streams over the progress tracker, the message queue and
// the log file. Each feed waits on the stop flag between ticks and ends within one
// interval of a stop request.

use crate::messages::{MessageQueue, Role};
use crate::progress::ProgressTracker;
use crate::stop::StopFlag;
use futures::stream::{self, Stream};
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::debug;

/// Minimum number of lines the log feed starts with
pub const MIN_LOG_TAIL: usize = 50;

/// Encode one payload as an SSE `data:` frame
pub fn sse_frame(payload: &str) -> String {
    let mut frame = String::with_capacity(payload.len() + 8);
    for line in payload.split('\n') {
        frame.push_str("data: ");
        frame.push_str(line);
        frame.push('\n');
    }
    frame.push('\n');
    frame
}

/// Paces a feed: the first tick is immediate, later ticks wait on the stop flag
struct Ticker {
    stop: StopFlag,
    interval: Duration,
    started: bool,
}

impl Ticker {
    fn new(stop: StopFlag, interval: Duration) -> Self {
        Self {
            stop,
            interval,
            started: false,
        }
    }

    /// `false` once the feed should end
    async fn tick(&mut self) -> bool {
        if !self.started {
            self.started = true;
            return !self.stop.is_stopped();
        }
        !self.stop.wait_timeout(self.interval).await
    }
}

/// Current progress of `key` as JSON, once per interval
pub fn progress_feed(
    tracker: Arc<ProgressTracker>,
    key: String,
    stop: StopFlag,
    interval: Duration,
) -> impl Stream<Item = String> {
    let ticker = Ticker::new(stop, interval);
    stream::unfold(
        (ticker, tracker, key),
        |(mut ticker, tracker, key)| async move {
            if !ticker.tick().await {
                debug!(key = %key, "Progress feed stopped");
                return None;
            }
            let payload = serde_json::to_string(&tracker.get(&key))
                .unwrap_or_else(|_| "{}".to_string());
            Some((sse_frame(&payload), (ticker, tracker, key)))
        },
    )
}

/// Oldest pending message for `role` as JSON, or an empty frame when there is none
pub fn message_feed(
    messages: Arc<MessageQueue>,
    role: Role,
    stop: StopFlag,
    interval: Duration,
) -> impl Stream<Item = String> {
    let ticker = Ticker::new(stop, interval);
    stream::unfold((ticker, messages), move |(mut ticker, messages)| async move {
        if !ticker.tick().await {
            debug!("Message feed stopped");
            return None;
        }
        let payload = messages
            .get(role)
            .and_then(|message| serde_json::to_string(&message).ok())
            .unwrap_or_default();
        Some((sse_frame(&payload), (ticker, messages)))
    })
}

/// Follows a log file: the last lines first, then whatever is appended
struct LogTail {
    path: PathBuf,
    tail: usize,
    offset: Option<u64>,
}

impl LogTail {
    async fn poll(&mut self) -> Vec<String> {
        let mut file = match tokio::fs::File::open(&self.path).await {
            Ok(file) => file,
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "Log file not readable");
                return Vec::new();
            }
        };
        let len = match file.metadata().await {
            Ok(meta) => meta.len(),
            Err(_) => return Vec::new(),
        };

        let Some(offset) = self.offset else {
            let mut content = Vec::new();
            if file.read_to_end(&mut content).await.is_err() {
                return Vec::new();
            }
            let consumed = complete_prefix(&content);
            self.offset = Some(consumed as u64);
            let text = String::from_utf8_lossy(&content[..consumed]);
            let lines: Vec<&str> = text.lines().collect();
            let skip = lines.len().saturating_sub(self.tail);
            return lines[skip..].iter().map(|line| line.to_string()).collect();
        };

        // Truncated or rotated: start over from the beginning
        let offset = if len < offset { 0 } else { offset };
        if len == offset {
            self.offset = Some(offset);
            return Vec::new();
        }

        let mut chunk = Vec::new();
        if file.seek(SeekFrom::Start(offset)).await.is_err()
            || file.read_to_end(&mut chunk).await.is_err()
        {
            return Vec::new();
        }
        let consumed = complete_prefix(&chunk);
        self.offset = Some(offset + consumed as u64);
        String::from_utf8_lossy(&chunk[..consumed])
            .lines()
            .map(str::to_string)
            .collect()
    }
}

/// Length of the prefix ending with the last newline; partial lines wait for the next poll
fn complete_prefix(bytes: &[u8]) -> usize {
    bytes
        .iter()
        .rposition(|byte| *byte == b'\n')
        .map(|pos| pos + 1)
        .unwrap_or(0)
}

/// Log lines as SSE frames: first the last `max(length, 50)` lines, then appended lines
pub fn log_feed(
    path: PathBuf,
    length: usize,
    stop: StopFlag,
    interval: Duration,
) -> impl Stream<Item = String> {
    let tail = LogTail {
        path,
        tail: length.max(MIN_LOG_TAIL),
        offset: None,
    };
    let ticker = Ticker::new(stop, interval);
    stream::unfold((ticker, tail), |(mut ticker, mut tail)| async move {
        loop {
            if !ticker.tick().await {
                debug!(path = %tail.path.display(), "Log feed stopped");
                return None;
            }
            let lines = tail.poll().await;
            if !lines.is_empty() {
                let frames: String = lines.iter().map(|line| sse_frame(line)).collect();
                return Some((frames, (ticker, tail)));
            }
        }
    })
}
