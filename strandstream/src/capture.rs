//! Client-side capture double-buffer: the capture thread (producer) hands
//! frames to the send loop (consumer) through a mutex-protected slot keyed
//! by a monotonic sequence number, mirroring the original's
//! `cam_mtx`/`cam_buf`/`cam_seq`/`last_sent_seq` fields.

use parking_lot::Mutex;

struct Slot {
    buf: Vec<u8>,
    seq: u64,
}

/// Shared between the capture thread and the send loop. Cloning an `Arc`
/// around this (not done here; left to the caller) lets both sides hold a
/// handle.
pub struct CaptureSlot {
    inner: Mutex<Slot>,
}

impl CaptureSlot {
    pub fn new() -> Self {
        CaptureSlot {
            inner: Mutex::new(Slot {
                buf: Vec::new(),
                seq: 0,
            }),
        }
    }

    /// Called by the capture thread when a new frame is ready.
    pub fn publish(&self, frame: Vec<u8>) {
        let mut slot = self.inner.lock();
        slot.buf = frame;
        slot.seq += 1;
    }

    /// Called by the send loop. Returns `Some((seq, frame))` if a frame with
    /// a sequence number newer than `last_sent_seq` is available, `None`
    /// otherwise (step 7, "capture drain": equal or empty means reschedule).
    pub fn drain_if_newer(&self, last_sent_seq: u64) -> Option<(u64, Vec<u8>)> {
        let slot = self.inner.lock();
        if slot.seq == last_sent_seq || slot.buf.is_empty() {
            return None;
        }
        Some((slot.seq, slot.buf.clone()))
    }
}

impl Default for CaptureSlot {
    fn default() -> Self {
        Self::new()
    }
}
