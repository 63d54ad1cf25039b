//! Bounded outbound message queue.
//!
//! Real-time audio prefers fresh data over complete data: when the queue is
//! full, the oldest queued *audio* frame is evicted to make room. Control
//! messages are never dropped, whatever the queue level.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::protocol::{SequencedAudioFrame, WireMessage};

pub struct OutboundQueue {
    inner: Mutex<VecDeque<WireMessage>>,
    capacity: usize,
    notify: Notify,
    dropped_audio: AtomicUsize,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0);
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
            dropped_audio: AtomicUsize::new(0),
        }
    }

    /// Enqueue an audio frame, evicting the oldest queued audio frame if
    /// the queue is at capacity.
    pub fn push_audio(&self, frame: SequencedAudioFrame) {
        {
            let mut q = self.inner.lock();
            if q.len() >= self.capacity {
                if let Some(pos) = q.iter().position(|m| matches!(m, WireMessage::Audio(_))) {
                    q.remove(pos);
                    self.dropped_audio.fetch_add(1, Ordering::Relaxed);
                }
            }
            q.push_back(WireMessage::Audio(frame));
        }
        self.notify.notify_one();
    }

    /// Enqueue a control message unconditionally.
    pub fn push_control(&self, msg: crate::protocol::ControlMessage) {
        self.inner.lock().push_back(WireMessage::Control(msg));
        self.notify.notify_one();
    }

    /// Dequeue the next message, waiting until one is available.
    pub async fn pop(&self) -> WireMessage {
        loop {
            // Arm the notification before checking, so a push between the
            // check and the await cannot be lost.
            let notified = self.notify.notified();
            if let Some(msg) = self.inner.lock().pop_front() {
                return msg;
            }
            notified.await;
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Audio frames evicted due to overflow since creation.
    pub fn dropped_audio(&self) -> usize {
        self.dropped_audio.load(Ordering::Relaxed)
    }
}
