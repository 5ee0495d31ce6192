//! # Player Messages
//!
//! Asynchronous notifications from the pipeline threads to the host.
//!
//! Internal threads only ever `put` into the [`MessageQueue`]; the host
//! drains it from its own thread with [`MessageQueue::get`] or
//! [`MessageQueue::get_timeout`]. No host code is called from a player
//! thread.

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Notification delivered to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum PlayerMessage {
    /// Source opened and streams selected.
    Prepared,
    /// Playback stalled waiting for data.
    BufferingStart,
    /// Enough data buffered; playback resumes.
    BufferingEnd,
    /// Periodic buffering progress.
    BufferingUpdate { buffered_ms: i64, percent: i32 },
    /// A seek finished; `code` is 0 on success.
    SeekComplete { position_ms: i64, code: i32 },
    VideoSizeChanged { width: u32, height: u32 },
    SarChanged { num: i32, den: i32 },
    /// First video frame left the decoder.
    VideoDecodedFirstFrame,
    /// First video frame was presented.
    VideoRenderingStart,
    /// First audio frame was handed to the audio sink.
    AudioRenderingStart,
    Progress { position_ms: i64, duration_ms: i64 },
    /// Playback reached the end of the media.
    Completed,
    /// Fatal error; see [`PlaybackError::code`](crate::PlaybackError::code).
    Error { code: i32 },
    /// Re-opening the source after a switch failed.
    ConnectFailed { code: i32 },
    /// No decodable audio or video stream.
    UnsupportedFormat,
    /// A live read failed; the source is being re-opened.
    WarnReconnect,
    /// The reconnect budget is exhausted.
    NetDisconnect,
    /// A source switch completed.
    SourceChanged,
    /// The reader thread left its loop.
    ExitReadThread,
    /// The player asks the host to call `start()` (auto-start after prepare).
    StartRequested,
}

/// Message discriminant, used for filtering and removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    Prepared,
    BufferingStart,
    BufferingEnd,
    BufferingUpdate,
    SeekComplete,
    VideoSizeChanged,
    SarChanged,
    VideoDecodedFirstFrame,
    VideoRenderingStart,
    AudioRenderingStart,
    Progress,
    Completed,
    Error,
    ConnectFailed,
    UnsupportedFormat,
    WarnReconnect,
    NetDisconnect,
    SourceChanged,
    ExitReadThread,
    StartRequested,
}

/// Severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MessageSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

impl PlayerMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            PlayerMessage::Prepared => MessageKind::Prepared,
            PlayerMessage::BufferingStart => MessageKind::BufferingStart,
            PlayerMessage::BufferingEnd => MessageKind::BufferingEnd,
            PlayerMessage::BufferingUpdate { .. } => MessageKind::BufferingUpdate,
            PlayerMessage::SeekComplete { .. } => MessageKind::SeekComplete,
            PlayerMessage::VideoSizeChanged { .. } => MessageKind::VideoSizeChanged,
            PlayerMessage::SarChanged { .. } => MessageKind::SarChanged,
            PlayerMessage::VideoDecodedFirstFrame => MessageKind::VideoDecodedFirstFrame,
            PlayerMessage::VideoRenderingStart => MessageKind::VideoRenderingStart,
            PlayerMessage::AudioRenderingStart => MessageKind::AudioRenderingStart,
            PlayerMessage::Progress { .. } => MessageKind::Progress,
            PlayerMessage::Completed => MessageKind::Completed,
            PlayerMessage::Error { .. } => MessageKind::Error,
            PlayerMessage::ConnectFailed { .. } => MessageKind::ConnectFailed,
            PlayerMessage::UnsupportedFormat => MessageKind::UnsupportedFormat,
            PlayerMessage::WarnReconnect => MessageKind::WarnReconnect,
            PlayerMessage::NetDisconnect => MessageKind::NetDisconnect,
            PlayerMessage::SourceChanged => MessageKind::SourceChanged,
            PlayerMessage::ExitReadThread => MessageKind::ExitReadThread,
            PlayerMessage::StartRequested => MessageKind::StartRequested,
        }
    }

    pub fn description(&self) -> &str {
        match self {
            PlayerMessage::Prepared => "Source prepared",
            PlayerMessage::BufferingStart => "Buffering started",
            PlayerMessage::BufferingEnd => "Buffering finished",
            PlayerMessage::BufferingUpdate { .. } => "Buffering progress",
            PlayerMessage::SeekComplete { .. } => "Seek completed",
            PlayerMessage::VideoSizeChanged { .. } => "Video size changed",
            PlayerMessage::SarChanged { .. } => "Sample aspect ratio changed",
            PlayerMessage::VideoDecodedFirstFrame => "First video frame decoded",
            PlayerMessage::VideoRenderingStart => "Video rendering started",
            PlayerMessage::AudioRenderingStart => "Audio rendering started",
            PlayerMessage::Progress { .. } => "Playback progress",
            PlayerMessage::Completed => "Playback completed",
            PlayerMessage::Error { .. } => "Playback error",
            PlayerMessage::ConnectFailed { .. } => "Source connection failed",
            PlayerMessage::UnsupportedFormat => "Unsupported media format",
            PlayerMessage::WarnReconnect => "Reconnecting to source",
            PlayerMessage::NetDisconnect => "Network disconnected",
            PlayerMessage::SourceChanged => "Source changed",
            PlayerMessage::ExitReadThread => "Reader thread exited",
            PlayerMessage::StartRequested => "Start requested",
        }
    }

    pub fn severity(&self) -> MessageSeverity {
        match self {
            PlayerMessage::Error { .. }
            | PlayerMessage::ConnectFailed { .. }
            | PlayerMessage::UnsupportedFormat
            | PlayerMessage::NetDisconnect => MessageSeverity::Error,
            PlayerMessage::WarnReconnect => MessageSeverity::Warning,
            PlayerMessage::SeekComplete { code, .. } if *code != 0 => MessageSeverity::Warning,
            PlayerMessage::BufferingUpdate { .. } | PlayerMessage::Progress { .. } => {
                MessageSeverity::Debug
            }
            _ => MessageSeverity::Info,
        }
    }
}

struct QueueState {
    messages: VecDeque<PlayerMessage>,
    abort: bool,
}

/// Ordered message channel drained by the host.
///
/// A fresh queue accepts messages. After [`abort`](Self::abort) puts are
/// rejected and blocked readers return `None`; [`start`](Self::start) reopens
/// it.
pub struct MessageQueue {
    state: Mutex<QueueState>,
    cond: Condvar,
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                messages: VecDeque::new(),
                abort: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Appends a message. Returns `false` when the queue is aborted.
    pub fn put(&self, message: PlayerMessage) -> bool {
        let mut state = self.state.lock();
        if state.abort {
            return false;
        }
        tracing::trace!(kind = ?message.kind(), "message queued");
        state.messages.push_back(message);
        self.cond.notify_one();
        true
    }

    /// Blocks until a message is available or the queue is aborted.
    pub fn get(&self) -> Option<PlayerMessage> {
        let mut state = self.state.lock();
        loop {
            if state.abort {
                return None;
            }
            if let Some(message) = state.messages.pop_front() {
                return Some(message);
            }
            self.cond.wait(&mut state);
        }
    }

    /// Like [`get`](Self::get) but gives up after `timeout`.
    pub fn get_timeout(&self, timeout: Duration) -> Option<PlayerMessage> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if state.abort {
                return None;
            }
            if let Some(message) = state.messages.pop_front() {
                return Some(message);
            }
            if self.cond.wait_until(&mut state, deadline).timed_out() {
                return state.messages.pop_front();
            }
        }
    }

    pub fn try_get(&self) -> Option<PlayerMessage> {
        let mut state = self.state.lock();
        if state.abort {
            return None;
        }
        state.messages.pop_front()
    }

    /// Drops every queued message of `kind`.
    pub fn remove(&self, kind: MessageKind) {
        self.state.lock().messages.retain(|m| m.kind() != kind);
    }

    pub fn flush(&self) {
        self.state.lock().messages.clear();
    }

    pub fn len(&self) -> usize {
        self.state.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn abort(&self) {
        self.state.lock().abort = true;
        self.cond.notify_all();
    }

    /// Clears the abort flag and pending messages.
    pub fn start(&self) {
        let mut state = self.state.lock();
        state.abort = false;
        state.messages.clear();
    }

    pub fn is_aborted(&self) -> bool {
        self.state.lock().abort
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let queue = MessageQueue::new();
        queue.put(PlayerMessage::Prepared);
        queue.put(PlayerMessage::BufferingStart);
        queue.put(PlayerMessage::BufferingEnd);

        assert_eq!(queue.try_get(), Some(PlayerMessage::Prepared));
        assert_eq!(queue.try_get(), Some(PlayerMessage::BufferingStart));
        assert_eq!(queue.try_get(), Some(PlayerMessage::BufferingEnd));
        assert_eq!(queue.try_get(), None);
    }

    #[test]
    fn test_remove_by_kind() {
        let queue = MessageQueue::new();
        queue.put(PlayerMessage::Progress {
            position_ms: 1,
            duration_ms: 10,
        });
        queue.put(PlayerMessage::Completed);
        queue.put(PlayerMessage::Progress {
            position_ms: 2,
            duration_ms: 10,
        });

        queue.remove(MessageKind::Progress);

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.try_get(), Some(PlayerMessage::Completed));
    }

    #[test]
    fn test_abort_rejects_and_wakes() {
        let queue = Arc::new(MessageQueue::new());
        let reader = {
            let queue = queue.clone();
            thread::spawn(move || queue.get())
        };

        thread::sleep(Duration::from_millis(20));
        queue.abort();

        assert_eq!(reader.join().unwrap(), None);
        assert!(!queue.put(PlayerMessage::Completed));

        queue.start();
        assert!(queue.put(PlayerMessage::Completed));
        assert_eq!(queue.get(), Some(PlayerMessage::Completed));
    }

    #[test]
    fn test_get_timeout_expires() {
        let queue = MessageQueue::new();
        let started = Instant::now();
        assert_eq!(queue.get_timeout(Duration::from_millis(30)), None);
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_severity_and_serialization() {
        assert_eq!(PlayerMessage::NetDisconnect.severity(), MessageSeverity::Error);
        assert_eq!(PlayerMessage::WarnReconnect.severity(), MessageSeverity::Warning);
        assert_eq!(
            PlayerMessage::SeekComplete {
                position_ms: 0,
                code: -9
            }
            .severity(),
            MessageSeverity::Warning
        );
        assert_eq!(PlayerMessage::Prepared.severity(), MessageSeverity::Info);

        let json = serde_json::to_string(&PlayerMessage::Error { code: -6 }).unwrap();
        assert_eq!(json, r#"{"type":"Error","payload":{"code":-6}}"#);

        let parsed: PlayerMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.kind(), MessageKind::Error);
    }
}
