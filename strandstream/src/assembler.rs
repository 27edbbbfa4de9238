//! Stream-to-Frame Assembler (server side): parses a varint length prefix
//! followed by a JPEG payload from each QUIC stream, tolerating corrupted
//! prefixes via a JPEG-marker resync state, and bounding per-callback work
//! so one busy stream cannot starve the others.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::config::AssemblerLimits;
use crate::error::{Result, StrandError};
use crate::varint;
use crate::writer::SaveJob;

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Per-stream FSM phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    WantLen,
    WantPayload,
    ResyncJpeg,
}

/// Per-stream receive state. One instance lives in the assembler's stream
/// table for the lifetime of the stream.
#[derive(Debug)]
struct StreamState {
    phase: Phase,
    len_bytes: Vec<u8>,
    frame_size: u64,
    received: u64,
    buf: Vec<u8>,
    in_jpeg: bool,
    last_byte: Option<u8>,
}

impl StreamState {
    fn new() -> Self {
        StreamState {
            phase: Phase::WantLen,
            len_bytes: Vec::with_capacity(8),
            frame_size: 0,
            received: 0,
            buf: Vec::new(),
            in_jpeg: false,
            last_byte: None,
        }
    }

    fn clear_for_next_frame(&mut self) {
        self.phase = Phase::WantLen;
        self.len_bytes.clear();
        self.frame_size = 0;
        self.received = 0;
        self.buf.clear();
        self.in_jpeg = false;
    }
}

/// Why [`FrameAssembler::on_bytes`] stopped processing early, for
/// diagnostics/logging only; none of these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Exhausted,
    StepBudget,
    ByteBudget,
    FrameBudget,
    TimeBudget,
}

/// Outcome of a single `on_bytes` call.
#[derive(Debug)]
pub struct DrainResult {
    pub frames_emitted: u32,
    pub bytes_consumed: u64,
    pub stop_reason: StopReason,
}

/// Server-side assembler, owning a fixed-capacity stream table. Mirrors the
/// original's `g_bank` but as an explicit owned map rather than a file-static
/// array.
pub struct FrameAssembler {
    limits: AssemblerLimits,
    streams: HashMap<u64, StreamState>,
    drop_mode: bool,
}

impl FrameAssembler {
    pub fn new(limits: AssemblerLimits) -> Self {
        FrameAssembler {
            limits,
            streams: HashMap::new(),
            drop_mode: false,
        }
    }

    pub fn set_drop_mode(&mut self, on: bool) {
        self.drop_mode = on;
    }

    pub fn is_drop_mode(&self) -> bool {
        self.drop_mode || self.limits.force_drop_mode
    }

    /// Process as much of `data` on `stream_id` as the per-callback budgets
    /// allow, emitting completed frames as [`SaveJob`]s via `on_frame`.
    /// `on_frame`'s `bool` argument is `true` when the frame was recovered
    /// via JPEG resync rather than the normal varint-length path.
    ///
    /// Returns how many bytes of `data` were actually consumed; any
    /// remainder is left for the transport to redeliver (it owns stream
    /// flow control and will represent those bytes on the next callback).
    pub fn on_bytes(
        &mut self,
        stream_id: u64,
        data: &[u8],
        mut on_frame: impl FnMut(SaveJob, bool),
    ) -> Result<DrainResult> {
        if self.streams.len() >= AssemblerLimits::MAX_STREAMS && !self.streams.contains_key(&stream_id)
        {
            return Err(StrandError::StreamTableFull(stream_id));
        }

        if self.is_drop_mode() {
            self.streams.entry(stream_id).or_insert_with(StreamState::new);
            return Ok(DrainResult {
                frames_emitted: 0,
                bytes_consumed: data.len() as u64,
                stop_reason: StopReason::Exhausted,
            });
        }

        let limits = self.limits;
        let state = self
            .streams
            .entry(stream_id)
            .or_insert_with(StreamState::new);

        let deadline = Instant::now() + limits.max_time;
        let mut pos = 0usize;
        let mut steps = 0u32;
        let mut frames = 0u32;
        let mut bytes_copied = 0u64;
        let max_frame_size = AssemblerLimits::MAX_FRAME_SIZE;

        let stop_reason = loop {
            if pos >= data.len() {
                break StopReason::Exhausted;
            }
            if steps >= limits.max_rx_steps {
                break StopReason::StepBudget;
            }
            if bytes_copied >= limits.max_rx_bytes {
                break StopReason::ByteBudget;
            }
            if frames >= limits.max_frames_cb {
                break StopReason::FrameBudget;
            }
            if Instant::now() >= deadline {
                break StopReason::TimeBudget;
            }
            steps += 1;

            match state.phase {
                Phase::WantLen => {
                    state.len_bytes.push(data[pos]);
                    pos += 1;
                    bytes_copied += 1;

                    match varint::decode_prefix(&state.len_bytes) {
                        Ok(varint::Decoded::Incomplete { .. }) => continue,
                        Ok(varint::Decoded::Complete { value, consumed }) => {
                            let over = state.len_bytes.len() - consumed;
                            if over > 0 {
                                // Rewind unused trailing bytes for reprocessing.
                                pos -= over;
                                bytes_copied -= over as u64;
                            }
                            state.len_bytes.clear();

                            if value == 0 || value > max_frame_size {
                                state.clear_for_next_frame();
                                state.phase = Phase::ResyncJpeg;
                                continue;
                            }
                            state.buf = Vec::with_capacity(value as usize);
                            state.frame_size = value;
                            state.received = 0;
                            state.phase = Phase::WantPayload;
                        }
                        Err(StrandError::VarintNotMinimal) => {
                            state.clear_for_next_frame();
                            state.phase = Phase::ResyncJpeg;
                        }
                        Err(e) => return Err(e),
                    }
                }
                Phase::WantPayload => {
                    let remaining = (state.frame_size - state.received) as usize;
                    let available = data.len() - pos;
                    let take = remaining.min(available);
                    if take == 0 {
                        break StopReason::Exhausted;
                    }
                    state.buf.extend_from_slice(&data[pos..pos + take]);
                    state.received += take as u64;
                    pos += take;
                    bytes_copied += take as u64;

                    if state.received == state.frame_size {
                        let job = SaveJob {
                            payload: std::mem::take(&mut state.buf),
                        };
                        on_frame(job, false);
                        frames += 1;
                        state.clear_for_next_frame();
                    }
                }
                Phase::ResyncJpeg => {
                    let scan_end = (pos + AssemblerLimits::RESYNC_SCAN_CHUNK).min(data.len());
                    let mut found_soi = None;
                    let mut i = pos;
                    while i < scan_end {
                        let byte = data[i];
                        if !state.in_jpeg {
                            if state.last_byte == Some(SOI[0]) && byte == SOI[1] {
                                found_soi = Some(i);
                                break;
                            }
                        } else {
                            state.buf.push(byte);
                            if state.last_byte == Some(EOI[0]) && byte == EOI[1] {
                                let job = SaveJob {
                                    payload: std::mem::take(&mut state.buf),
                                };
                                on_frame(job, true);
                                frames += 1;
                                state.in_jpeg = false;
                                state.last_byte = None;
                                i += 1;
                                bytes_copied += (i - pos) as u64;
                                pos = i;
                                state.phase = Phase::WantLen;
                                break;
                            }
                        }
                        state.last_byte = Some(byte);
                        i += 1;
                    }
                    if let Some(soi_end) = found_soi {
                        state.buf.clear();
                        state.buf.extend_from_slice(&SOI);
                        state.in_jpeg = true;
                        state.last_byte = Some(SOI[1]);
                        pos = soi_end + 1;
                        bytes_copied += 1;
                    } else if state.phase == Phase::ResyncJpeg {
                        let consumed = i - pos;
                        bytes_copied += consumed as u64;
                        pos = i;
                        if pos >= data.len() {
                            break StopReason::Exhausted;
                        }
                    }
                }
            }
        };

        Ok(DrainResult {
            frames_emitted: frames,
            bytes_consumed: pos as u64,
            stop_reason,
        })
    }

    pub fn close_stream(&mut self, stream_id: u64) {
        self.streams.remove(&stream_id);
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }
}

/// Time-budget guard used by callers that want to interleave multiple
/// streams' `on_bytes` calls under one overall deadline (not used by
/// `on_bytes` itself, which has its own per-call deadline).
pub fn remaining_budget(started: Instant, budget: Duration) -> Duration {
    budget.saturating_sub(started.elapsed())
}
