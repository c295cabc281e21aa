use crate::protocol::SdpInfo;
use crate::queue::{DEFAULT_QUEUE_CAPACITY, Frame, FrameQueue};

use super::ClientConfig;
use super::state::FailureReason;

/// Receives session events from an [`RtspClient`](super::RtspClient).
///
/// Session events arrive on the thread running the client. Media units
/// arrive on one receiver thread per track, but calls never overlap: each
/// callback returns before the next one starts. Callbacks must return
/// quickly since a slow one delays packet reception on every track. Hand
/// frames to another thread (see [`QueueListener`]) rather than decoding
/// inline.
pub trait RtspListener: Send + Sync {
    /// The TCP connection is being opened.
    fn on_connecting(&self) {}

    /// PLAY succeeded. The priming frame follows immediately.
    fn on_connected(&self, _sdp: &SdpInfo) {}

    /// A complete video access unit in Annex B form. The first one after
    /// `on_connected` carries the out-of-band parameter sets, timestamp 0.
    fn on_video_unit(&self, _frame: Frame) {}

    /// One audio payload, passed through untouched.
    fn on_audio_unit(&self, _frame: Frame) {}

    /// The session was stopped and torn down.
    fn on_disconnected(&self) {}

    /// The session failed for a reason other than authentication.
    fn on_failed(&self, _reason: &FailureReason) {}

    /// The server rejected the credentials, or demanded some when none were
    /// configured.
    fn on_failed_unauthorized(&self) {}
}

/// Routes media units into a video and an audio [`FrameQueue`].
///
/// Both queues are cleared when a session connects, so frames from a
/// previous connection never reach the decoder, and again when it ends,
/// which also wakes a consumer blocked in `pop`.
#[derive(Debug, Clone)]
pub struct QueueListener {
    video: FrameQueue,
    audio: FrameQueue,
}

impl Default for QueueListener {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl QueueListener {
    pub fn new(capacity: usize) -> Self {
        Self::with_queues(FrameQueue::new(capacity), FrameQueue::new(capacity))
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.queue_capacity)
    }

    pub fn with_queues(video: FrameQueue, audio: FrameQueue) -> Self {
        Self { video, audio }
    }

    pub fn video_queue(&self) -> FrameQueue {
        self.video.clone()
    }

    pub fn audio_queue(&self) -> FrameQueue {
        self.audio.clone()
    }

    fn clear(&self) {
        self.video.clear();
        self.audio.clear();
    }
}

impl RtspListener for QueueListener {
    fn on_connected(&self, _sdp: &SdpInfo) {
        self.clear();
    }

    fn on_video_unit(&self, frame: Frame) {
        self.video.push(frame);
    }

    fn on_audio_unit(&self, frame: Frame) {
        self.audio.push(frame);
    }

    fn on_disconnected(&self) {
        self.clear();
    }

    fn on_failed(&self, _reason: &FailureReason) {
        self.clear();
    }

    fn on_failed_unauthorized(&self) {
        self.clear();
    }
}
