//! # Compressed Sample Queue
//!
//! Thread-safe FIFO of compressed samples for one elementary stream.
//!
//! Every item carries the queue *serial* that was current when it was
//! inserted. Inserting a flush marker increments the serial, so a consumer can
//! tell samples queued before a seek or source switch from those queued
//! after it and drop the stale ones.

use bridge_traits::CompressedSample;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Bookkeeping bytes charged per queued item on top of its payload.
pub const PACKET_OVERHEAD: usize = std::mem::size_of::<QueuedPacket>();

/// The queue was aborted; the caller should wind down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("packet queue aborted")]
pub struct QueueAborted;

/// Item stored in a [`PacketQueue`].
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Sample(CompressedSample),
    /// Resets decoders; bumps the queue serial when inserted.
    Flush,
    /// No more samples for this serial; decoders drain their buffers.
    End { stream_index: usize },
}

impl Packet {
    fn payload_size(&self) -> usize {
        match self {
            Packet::Sample(sample) => sample.size(),
            _ => 0,
        }
    }

    fn duration(&self) -> i64 {
        match self {
            Packet::Sample(sample) => sample.duration,
            _ => 0,
        }
    }
}

/// A packet together with the serial it was queued under.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedPacket {
    pub packet: Packet,
    pub serial: i32,
}

struct QueueState {
    items: VecDeque<QueuedPacket>,
    size: usize,
    /// Sum of sample durations in stream time base units.
    duration: i64,
    abort: bool,
    serial: i32,
}

/// Compressed sample queue.
///
/// A new queue starts aborted; [`start`](Self::start) opens it.
pub struct PacketQueue {
    name: &'static str,
    state: Mutex<QueueState>,
    cond: Condvar,
    serial: Arc<AtomicI32>,
    aborted: AtomicBool,
    buffer_indicator: AtomicBool,
}

impl PacketQueue {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                size: 0,
                duration: 0,
                abort: true,
                serial: 0,
            }),
            cond: Condvar::new(),
            serial: Arc::new(AtomicI32::new(0)),
            aborted: AtomicBool::new(true),
            buffer_indicator: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn put_locked(&self, state: &mut QueueState, packet: Packet) -> Result<(), QueueAborted> {
        if state.abort {
            return Err(QueueAborted);
        }

        if matches!(packet, Packet::Flush) {
            state.serial = state.serial.wrapping_add(1);
            self.serial.store(state.serial, Ordering::Release);
        }

        state.size += packet.payload_size() + PACKET_OVERHEAD;
        state.duration += packet.duration();
        state.items.push_back(QueuedPacket {
            packet,
            serial: state.serial,
        });
        self.cond.notify_one();
        Ok(())
    }

    pub fn put(&self, packet: Packet) -> Result<(), QueueAborted> {
        let mut state = self.state.lock();
        self.put_locked(&mut state, packet)
    }

    pub fn put_sample(&self, sample: CompressedSample) -> Result<(), QueueAborted> {
        self.put(Packet::Sample(sample))
    }

    pub fn put_flush(&self) -> Result<(), QueueAborted> {
        self.put(Packet::Flush)
    }

    pub fn put_end(&self, stream_index: usize) -> Result<(), QueueAborted> {
        self.put(Packet::End { stream_index })
    }

    fn pop_locked(state: &mut QueueState) -> Option<QueuedPacket> {
        let item = state.items.pop_front()?;
        state.size -= item.packet.payload_size() + PACKET_OVERHEAD;
        state.duration -= item.packet.duration();
        Some(item)
    }

    /// Pops the head without waiting.
    pub fn try_get(&self) -> Result<Option<QueuedPacket>, QueueAborted> {
        let mut state = self.state.lock();
        if state.abort {
            return Err(QueueAborted);
        }
        Ok(Self::pop_locked(&mut state))
    }

    /// Pops the head, waiting until an item arrives or the queue aborts.
    pub fn get(&self) -> Result<QueuedPacket, QueueAborted> {
        let mut state = self.state.lock();
        loop {
            if state.abort {
                return Err(QueueAborted);
            }
            if let Some(item) = Self::pop_locked(&mut state) {
                return Ok(item);
            }
            self.cond.wait(&mut state);
        }
    }

    /// Decoder-side fetch that reports starvation.
    ///
    /// With packet buffering enabled, an empty buffer-indicator queue whose
    /// decoder is not finished calls `on_starve` before blocking, and packets
    /// queued under the serial the decoder already finished are skipped.
    pub fn get_or_buffering(
        &self,
        packet_buffering: bool,
        finished: i32,
        mut on_starve: impl FnMut(),
    ) -> Result<QueuedPacket, QueueAborted> {
        if !packet_buffering {
            return self.get();
        }

        loop {
            let item = match self.try_get()? {
                Some(item) => item,
                None => {
                    if self.is_buffer_indicator() && finished == 0 {
                        on_starve();
                    }
                    self.get()?
                }
            };

            if item.serial == finished {
                continue;
            }
            return Ok(item);
        }
    }

    /// Drops every queued item and zeroes the aggregates.
    ///
    /// The serial and abort state are untouched.
    pub fn flush(&self) {
        let mut state = self.state.lock();
        state.items.clear();
        state.size = 0;
        state.duration = 0;
    }

    /// Opens the queue and inserts a flush marker.
    pub fn start(&self) {
        let mut state = self.state.lock();
        state.abort = false;
        self.aborted.store(false, Ordering::Release);
        // Cannot fail: abort was just cleared under the same lock.
        let _ = self.put_locked(&mut state, Packet::Flush);
    }

    /// Rejects further puts and wakes every waiter. Idempotent.
    pub fn abort(&self) {
        let mut state = self.state.lock();
        state.abort = true;
        self.aborted.store(true, Ordering::Release);
        self.cond.notify_all();
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    pub fn serial(&self) -> i32 {
        self.serial.load(Ordering::Acquire)
    }

    /// Shared view of the serial, read by clocks without taking the lock.
    pub fn serial_handle(&self) -> Arc<AtomicI32> {
        Arc::clone(&self.serial)
    }

    pub fn nb_packets(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Payload bytes plus per-item overhead.
    pub fn size(&self) -> usize {
        self.state.lock().size
    }

    /// Summed sample duration in stream time base units.
    pub fn duration(&self) -> i64 {
        self.state.lock().duration
    }

    pub fn set_buffer_indicator(&self, indicator: bool) {
        self.buffer_indicator.store(indicator, Ordering::Release);
    }

    pub fn is_buffer_indicator(&self) -> bool {
        self.buffer_indicator.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for PacketQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("PacketQueue")
            .field("name", &self.name)
            .field("nb_packets", &state.items.len())
            .field("size", &state.size)
            .field("serial", &state.serial)
            .field("abort", &state.abort)
            .finish()
    }
}
