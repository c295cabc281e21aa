//! Bounded frame queue between the network reader and a decoder thread.
//!
//! A [`FrameQueue`] is a FIFO of [`Frame`]s with a fixed element count. The
//! producer never blocks: when the queue is full the oldest frame is evicted
//! (or, with [`OverflowPolicy::DropNewest`], the incoming one is discarded).
//! The consumer blocks in [`pop`](FrameQueue::pop) with a timeout.
//!
//! [`clear`](FrameQueue::clear) empties the queue and wakes every blocked
//! consumer. Each of them returns `None` once, which lets a decoder thread
//! notice a reconnect or shutdown without polling.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};

use crate::media::MediaKind;

/// Default capacity of the queues [`QueueListener`](crate::client::QueueListener) creates.
pub const DEFAULT_QUEUE_CAPACITY: usize = 60;

/// One timestamped media unit.
///
/// `payload` may be a shared buffer; only `offset..offset + length` belongs
/// to this frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    payload: Bytes,
    offset: usize,
    length: usize,
    timestamp_micros: i64,
    kind: MediaKind,
}

impl Frame {
    /// A frame spanning the whole of `payload`.
    pub fn new(payload: impl Into<Bytes>, timestamp_micros: i64, kind: MediaKind) -> Self {
        let payload = payload.into();
        let length = payload.len();
        Self {
            payload,
            offset: 0,
            length,
            timestamp_micros,
            kind,
        }
    }

    /// A frame over a sub-range of `payload`. Returns `None` if the range
    /// does not fit.
    pub fn with_range(
        payload: impl Into<Bytes>,
        offset: usize,
        length: usize,
        timestamp_micros: i64,
        kind: MediaKind,
    ) -> Option<Self> {
        let payload = payload.into();
        let end = offset.checked_add(length)?;
        if end > payload.len() {
            return None;
        }
        Some(Self {
            payload,
            offset,
            length,
            timestamp_micros,
            kind,
        })
    }

    /// The frame bytes.
    pub fn data(&self) -> &[u8] {
        &self.payload[self.offset..self.offset + self.length]
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn timestamp_micros(&self) -> i64 {
        self.timestamp_micros
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }
}

/// What [`FrameQueue::push`] does when the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Evict the oldest queued frame to make room.
    #[default]
    DropOldest,
    /// Discard the incoming frame.
    DropNewest,
}

/// Counters since the queue was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueStats {
    pub len: usize,
    pub pushed: u64,
    pub popped: u64,
    pub dropped: u64,
}

struct QueueState {
    frames: VecDeque<Frame>,
    /// Bumped by `clear`; a waiter that sees it change returns `None`.
    epoch: u64,
    closed: bool,
    pushed: u64,
    popped: u64,
    dropped: u64,
}

struct QueueInner {
    state: Mutex<QueueState>,
    not_empty: Condvar,
    capacity: usize,
    policy: OverflowPolicy,
}

/// Bounded multi-threaded FIFO of [`Frame`]s.
///
/// Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct FrameQueue {
    inner: Arc<QueueInner>,
}

impl std::fmt::Debug for FrameQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameQueue")
            .field("capacity", &self.inner.capacity)
            .field("policy", &self.inner.policy)
            .field("len", &self.len())
            .finish()
    }
}

impl FrameQueue {
    /// Create a drop-oldest queue. A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        Self::with_policy(capacity, OverflowPolicy::default())
    }

    pub fn with_policy(capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState {
                    frames: VecDeque::with_capacity(capacity.min(1024)),
                    epoch: 0,
                    closed: false,
                    pushed: 0,
                    popped: 0,
                    dropped: 0,
                }),
                not_empty: Condvar::new(),
                capacity,
                policy,
            }),
        }
    }

    /// Enqueue a frame. Never blocks.
    pub fn push(&self, frame: Frame) {
        let mut state = self.inner.state.lock();
        if state.closed {
            state.dropped += 1;
            return;
        }

        if state.frames.len() >= self.inner.capacity {
            state.dropped += 1;
            match self.inner.policy {
                OverflowPolicy::DropOldest => {
                    state.frames.pop_front();
                }
                OverflowPolicy::DropNewest => {
                    tracing::trace!(kind = %frame.kind, "queue full, dropping incoming frame");
                    return;
                }
            }
        }

        state.frames.push_back(frame);
        state.pushed += 1;
        drop(state);
        self.inner.not_empty.notify_one();
    }

    /// Dequeue the oldest frame, waiting up to `timeout` for one to arrive.
    ///
    /// Returns `None` on timeout, after [`clear`](Self::clear) interrupts the
    /// wait, or once the queue is closed.
    pub fn pop(&self, timeout: Duration) -> Option<Frame> {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        let epoch = state.epoch;

        loop {
            if state.closed || state.epoch != epoch {
                return None;
            }
            if let Some(frame) = state.frames.pop_front() {
                state.popped += 1;
                return Some(frame);
            }
            if self
                .inner
                .not_empty
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                if state.epoch != epoch {
                    return None;
                }
                let frame = state.frames.pop_front();
                if frame.is_some() {
                    state.popped += 1;
                }
                return frame;
            }
        }
    }

    /// Dequeue without waiting.
    pub fn try_pop(&self) -> Option<Frame> {
        let mut state = self.inner.state.lock();
        let frame = state.frames.pop_front();
        if frame.is_some() {
            state.popped += 1;
        }
        frame
    }

    /// Drop every pending frame and wake all blocked consumers.
    pub fn clear(&self) {
        let mut state = self.inner.state.lock();
        let discarded = state.frames.len();
        state.frames.clear();
        state.epoch = state.epoch.wrapping_add(1);
        drop(state);
        self.inner.not_empty.notify_all();
        if discarded > 0 {
            tracing::debug!(discarded, "frame queue cleared");
        }
    }

    /// Shut the queue down: pending frames are dropped, pops return `None`
    /// immediately and pushes are discarded.
    pub fn close(&self) {
        let mut state = self.inner.state.lock();
        state.closed = true;
        state.frames.clear();
        drop(state);
        self.inner.not_empty.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.inner.policy
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.inner.state.lock();
        QueueStats {
            len: state.frames.len(),
            pushed: state.pushed,
            popped: state.popped,
            dropped: state.dropped,
        }
    }
}
