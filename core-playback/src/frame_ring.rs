//! # Decoded Frame Ring
//!
//! Bounded ring of decoded frames between a decode worker and the refresh
//! loop.
//!
//! With `keep_last` the frame most recently shown stays in the ring (as
//! [`FrameRing::peek_last`]) until a newer frame replaces it, so the display
//! never blanks while the next frame is pending. Blocking calls give up once
//! the upstream [`PacketQueue`] aborts.

use crate::packet_queue::PacketQueue;
use bridge_traits::{RawFrame, Rational};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::Arc;

use crate::config::FRAME_QUEUE_SIZE_MAX;

/// One ring slot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedFrame {
    /// Payload; `None` once released.
    pub frame: Option<RawFrame>,
    /// Presentation time in seconds, NaN when unknown.
    pub pts: f64,
    /// Estimated duration in seconds.
    pub duration: f64,
    /// Byte position in the source, `-1` when unknown.
    pub pos: i64,
    pub serial: i32,
    pub width: u32,
    pub height: u32,
    pub sar: Rational,
    /// Slot has held a frame of `width` x `height` before.
    pub allocated: bool,
}

impl DecodedFrame {
    pub fn new(frame: RawFrame, pts: f64, duration: f64, serial: i32) -> Self {
        Self {
            pos: frame.pos.unwrap_or(-1),
            width: frame.width,
            height: frame.height,
            sar: frame.sample_aspect_ratio,
            frame: Some(frame),
            pts,
            duration,
            serial,
            allocated: false,
        }
    }
}

struct RingState {
    slots: Vec<DecodedFrame>,
    rindex: usize,
    windex: usize,
    size: usize,
    rindex_shown: usize,
}

/// Decoded frame ring.
pub struct FrameRing {
    queue: Arc<PacketQueue>,
    state: Mutex<RingState>,
    cond: Condvar,
    max_size: usize,
    keep_last: bool,
}

/// Write slot returned by [`FrameRing::peek_writable`].
///
/// Holds the ring lock; call [`push`](Self::push) to publish the frame or
/// drop the slot to discard it.
pub struct WritableSlot<'a> {
    ring: &'a FrameRing,
    state: MutexGuard<'a, RingState>,
}

impl WritableSlot<'_> {
    /// Stores `frame` in the slot, reusing it in place when the dimensions
    /// match what it held before.
    pub fn write(&mut self, mut frame: DecodedFrame) -> bool {
        let index = self.state.windex;
        let slot = &mut self.state.slots[index];
        let reused = slot.allocated && slot.width == frame.width && slot.height == frame.height;
        frame.allocated = true;
        *slot = frame;
        reused
    }

    pub fn frame_mut(&mut self) -> &mut DecodedFrame {
        let index = self.state.windex;
        &mut self.state.slots[index]
    }

    pub fn push(mut self) {
        let max_size = self.ring.max_size;
        self.state.windex = (self.state.windex + 1) % max_size;
        self.state.size += 1;
        self.ring.cond.notify_one();
    }
}

impl FrameRing {
    /// Creates a ring of `max_size` slots (capped at 16) fed from `queue`.
    pub fn new(queue: Arc<PacketQueue>, max_size: usize, keep_last: bool) -> Self {
        let max_size = max_size.clamp(1, FRAME_QUEUE_SIZE_MAX);
        Self {
            queue,
            state: Mutex::new(RingState {
                slots: vec![DecodedFrame::default(); max_size],
                rindex: 0,
                windex: 0,
                size: 0,
                rindex_shown: 0,
            }),
            cond: Condvar::new(),
            max_size,
            keep_last,
        }
    }

    pub fn capacity(&self) -> usize {
        self.max_size
    }

    /// Wakes every waiter, typically after the upstream queue aborted.
    pub fn signal(&self) {
        let _state = self.state.lock();
        self.cond.notify_all();
    }

    /// Oldest frame not shown yet.
    pub fn peek(&self) -> Option<DecodedFrame> {
        let state = self.state.lock();
        if state.size <= state.rindex_shown {
            return None;
        }
        let index = (state.rindex + state.rindex_shown) % self.max_size;
        Some(state.slots[index].clone())
    }

    /// Frame after [`peek`](Self::peek).
    pub fn peek_next(&self) -> Option<DecodedFrame> {
        let state = self.state.lock();
        if state.size <= state.rindex_shown + 1 {
            return None;
        }
        let index = (state.rindex + state.rindex_shown + 1) % self.max_size;
        Some(state.slots[index].clone())
    }

    /// Frame at the read index: the last shown frame when `keep_last` is set
    /// and one has been shown.
    pub fn peek_last(&self) -> DecodedFrame {
        let state = self.state.lock();
        state.slots[state.rindex].clone()
    }

    /// Waits for a free slot. Returns `None` once the packet queue aborts.
    pub fn peek_writable(&self) -> Option<WritableSlot<'_>> {
        let mut state = self.state.lock();
        while state.size >= self.max_size && !self.queue.is_aborted() {
            self.cond.wait(&mut state);
        }

        if self.queue.is_aborted() {
            return None;
        }
        Some(WritableSlot { ring: self, state })
    }

    /// Waits for an unshown frame. Returns `None` once the packet queue
    /// aborts.
    pub fn peek_readable(&self) -> Option<DecodedFrame> {
        let mut state = self.state.lock();
        while state.size <= state.rindex_shown && !self.queue.is_aborted() {
            self.cond.wait(&mut state);
        }

        if self.queue.is_aborted() {
            return None;
        }
        let index = (state.rindex + state.rindex_shown) % self.max_size;
        Some(state.slots[index].clone())
    }

    /// Convenience for `peek_writable` + `write` + `push`.
    pub fn push_frame(&self, frame: DecodedFrame) -> bool {
        match self.peek_writable() {
            Some(mut slot) => {
                slot.write(frame);
                slot.push();
                true
            }
            None => false,
        }
    }

    /// Advances past the current frame.
    ///
    /// With `keep_last`, the first call after a frame becomes current only
    /// marks it shown; the payload is released on the following call.
    pub fn next(&self) {
        let mut state = self.state.lock();
        if state.size == 0 {
            return;
        }
        if self.keep_last && state.rindex_shown == 0 {
            state.rindex_shown = 1;
            return;
        }

        let rindex = state.rindex;
        state.slots[rindex].frame = None;
        state.rindex = (rindex + 1) % self.max_size;
        state.size -= 1;
        self.cond.notify_one();
    }

    /// Frames not yet shown.
    pub fn nb_remaining(&self) -> usize {
        let state = self.state.lock();
        state.size.saturating_sub(state.rindex_shown)
    }

    /// Whether the slot at the read index has been shown.
    pub fn rindex_shown(&self) -> bool {
        self.state.lock().rindex_shown != 0
    }

    /// Byte position of the last shown frame if it belongs to the current
    /// queue serial.
    pub fn last_pos(&self) -> Option<i64> {
        let state = self.state.lock();
        let slot = &state.slots[state.rindex];
        if state.rindex_shown != 0 && slot.serial == self.queue.serial() && slot.pos >= 0 {
            Some(slot.pos)
        } else {
            None
        }
    }

    /// Empties the ring without waiting and releases every payload.
    pub fn drain(&self) {
        let mut state = self.state.lock();
        for slot in state.slots.iter_mut() {
            slot.frame = None;
        }
        state.rindex = 0;
        state.windex = 0;
        state.size = 0;
        state.rindex_shown = 0;
        self.cond.notify_all();
    }
}

impl std::fmt::Debug for FrameRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("FrameRing")
            .field("queue", &self.queue.name())
            .field("max_size", &self.max_size)
            .field("size", &state.size)
            .field("rindex_shown", &state.rindex_shown)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn frame(pts: f64, serial: i32) -> DecodedFrame {
        let raw = RawFrame::video(16, 16, vec![0u8; 8]).with_pos(Some(100));
        DecodedFrame::new(raw, pts, 0.04, serial)
    }

    fn ring(size: usize, keep_last: bool) -> (Arc<PacketQueue>, FrameRing) {
        let queue = Arc::new(PacketQueue::new("video"));
        queue.start();
        let ring = FrameRing::new(queue.clone(), size, keep_last);
        (queue, ring)
    }

    #[test]
    fn test_push_and_peek() {
        let (_queue, ring) = ring(3, true);
        assert!(ring.push_frame(frame(0.0, 1)));
        assert!(ring.push_frame(frame(0.04, 1)));

        assert_eq!(ring.nb_remaining(), 2);
        assert_eq!(ring.peek().unwrap().pts, 0.0);
        assert_eq!(ring.peek_next().unwrap().pts, 0.04);
    }

    #[test]
    fn test_keep_last_marks_shown_without_freeing() {
        let (_queue, ring) = ring(3, true);
        ring.push_frame(frame(0.0, 1));
        ring.push_frame(frame(0.04, 1));

        ring.next();
        assert!(ring.rindex_shown());
        assert_eq!(ring.nb_remaining(), 1);
        assert_eq!(ring.peek_last().pts, 0.0);
        assert!(ring.peek_last().frame.is_some());
        assert_eq!(ring.peek().unwrap().pts, 0.04);

        ring.next();
        assert_eq!(ring.nb_remaining(), 0);
        assert_eq!(ring.peek_last().pts, 0.04);
        assert!(ring.peek().is_none());
    }

    #[test]
    fn test_next_on_empty_ring_is_noop() {
        let (_queue, ring) = ring(3, true);
        ring.next();
        assert!(!ring.rindex_shown());

        // The first pushed frame is still unseen
        ring.push_frame(frame(0.0, 1));
        assert_eq!(ring.nb_remaining(), 1);
        assert_eq!(ring.peek().unwrap().pts, 0.0);
    }

    #[test]
    fn test_without_keep_last_releases_head() {
        let (_queue, ring) = ring(3, false);
        ring.push_frame(frame(0.0, 1));
        ring.next();
        assert_eq!(ring.nb_remaining(), 0);
        assert!(!ring.rindex_shown());
    }

    #[test]
    fn test_peek_writable_blocks_when_full() {
        let (_queue, ring) = ring(2, false);
        let ring = Arc::new(ring);
        ring.push_frame(frame(0.0, 1));
        ring.push_frame(frame(0.04, 1));

        let writer = {
            let ring = ring.clone();
            thread::spawn(move || ring.push_frame(frame(0.08, 1)))
        };

        thread::sleep(Duration::from_millis(30));
        assert!(!writer.is_finished());
        assert_eq!(ring.nb_remaining(), 2);

        ring.next();
        assert!(writer.join().unwrap());
        assert_eq!(ring.nb_remaining(), 2);
        assert_eq!(ring.peek().unwrap().pts, 0.04);
    }

    #[test]
    fn test_abort_releases_waiters() {
        let (queue, ring) = ring(1, false);
        let ring = Arc::new(ring);
        ring.push_frame(frame(0.0, 1));

        let writer = {
            let ring = ring.clone();
            thread::spawn(move || ring.push_frame(frame(0.04, 1)))
        };

        thread::sleep(Duration::from_millis(20));
        queue.abort();
        ring.signal();

        assert!(!writer.join().unwrap());
        assert!(ring.peek_readable().is_none());
    }

    #[test]
    fn test_drain_resets() {
        let (_queue, ring) = ring(4, true);
        ring.push_frame(frame(0.0, 1));
        ring.push_frame(frame(0.04, 1));
        ring.next();

        ring.drain();

        assert_eq!(ring.nb_remaining(), 0);
        assert!(!ring.rindex_shown());
        assert!(ring.peek_last().frame.is_none());
    }

    #[test]
    fn test_slot_reuse_on_matching_dimensions() {
        let (_queue, ring) = ring(1, false);
        let mut slot = ring.peek_writable().unwrap();
        assert!(!slot.write(frame(0.0, 1)));
        slot.push();
        ring.next();

        let mut slot = ring.peek_writable().unwrap();
        assert!(slot.write(frame(0.04, 1)));
        assert_eq!(slot.frame_mut().pts, 0.04);
    }

    #[test]
    fn test_last_pos_tracks_serial() {
        let (queue, ring) = ring(3, true);
        ring.push_frame(frame(0.0, queue.serial()));
        assert_eq!(ring.last_pos(), None);

        ring.next();
        assert_eq!(ring.last_pos(), Some(100));

        queue.put_flush().unwrap();
        assert_eq!(ring.last_pos(), None);
    }
}
