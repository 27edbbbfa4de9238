//! Multipath Send Pipeline (client): the duty cycle that runs on every
//! transport wake-up, deciding which path carries the next frame and
//! keeping the inactive path warm. The logic here is a pure state
//! transformer over [`MultipathTransport`]; `strandcam`'s binary wraps it
//! in a `tokio::select!` loop that reacts to (next-wake deadline, new
//! capture frame, shutdown).

use std::net::SocketAddr;
use std::time::Duration;

use rand::Rng;
use tracing::{info, warn};

use crate::capture::CaptureSlot;
use crate::config::AssemblerLimits;
use crate::error::{Result, StrandError};
use crate::fsm::PrimarySelector;
use crate::metric::{PathMetricScorer, PathTelemetry};
use crate::path::{PathId, PathTable};
use crate::transport::{MultipathTransport, KEEPALIVE_BYTE, WARMUP_BYTE};
use crate::varint;

/// Lower/upper bound, in microseconds, of the randomized delay after
/// handshake completion before alternate-path probing begins.
pub const PROBE_DELAY_MIN_US: u64 = 200_000;
pub const PROBE_DELAY_MAX_US: u64 = 500_000;
/// Minimum interval between Wi-Fi liveness re-probes.
pub const WIFI_REPROBE_INTERVAL_US: u64 = 2_000_000;
/// Keep-alive cadence.
pub const KEEPALIVE_INTERVAL_US: u64 = 1_000_000;
/// Reschedule window for the next wake-up.
pub const RESCHEDULE_MIN_US: u64 = 10_000;
pub const RESCHEDULE_MAX_US: u64 = 20_000;
/// Backoff applied by the outer supervisor after an abnormal loop exit.
pub const RECONNECT_BACKOFF: Duration = Duration::from_secs(2);

/// Outcome of a single [`SendLoop::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing new to send; reschedule.
    Idle,
    /// A frame was sent on `path`.
    Sent { path: PathId },
    /// All candidates rejected the send; reschedule.
    SendFailed,
    /// The loop should terminate (connection closing/disconnected).
    Terminate,
}

struct ProbeState {
    peer_addr: SocketAddr,
    wifi_local: SocketAddr,
    cell_local: Option<SocketAddr>,
    handshake_done_at_us: Option<u64>,
    probe_delay_us: u64,
    did_probe_wifi_alt: bool,
    did_probe_cell_alt: bool,
    last_wifi_probe_attempt_us: u64,
}

/// Owns all per-connection state the duty cycle needs across ticks:
/// the path table, metric scorer, FSM, probe bookkeeping, and the last
/// frame sequence number sent.
pub struct SendLoop {
    paths: PathTable,
    scorer: PathMetricScorer,
    fsm: PrimarySelector,
    probe: ProbeState,
    last_sent_seq: u64,
    last_keepalive_us: u64,
    last_affinity_path: Option<PathId>,
}

impl SendLoop {
    pub fn new(peer_addr: SocketAddr, wifi_local: SocketAddr, cell_local: Option<SocketAddr>) -> Self {
        let probe_delay_us =
            rand::rng().random_range(PROBE_DELAY_MIN_US..=PROBE_DELAY_MAX_US);
        SendLoop {
            paths: PathTable::new(),
            scorer: PathMetricScorer::new(),
            fsm: PrimarySelector::new(),
            probe: ProbeState {
                peer_addr,
                wifi_local,
                cell_local,
                handshake_done_at_us: None,
                probe_delay_us,
                did_probe_wifi_alt: false,
                did_probe_cell_alt: false,
                last_wifi_probe_attempt_us: 0,
            },
            last_sent_seq: 0,
            last_keepalive_us: 0,
            last_affinity_path: None,
        }
    }

    pub fn paths(&self) -> &PathTable {
        &self.paths
    }

    /// Drive one duty-cycle iteration. `capture` holds the latest frame
    /// from the capture thread; `telemetry` maps each known path id to its
    /// current raw transport telemetry (step 2's "unverified-path
    /// isolation" happens naturally since [`PathMetricScorer::score`]
    /// already special-cases `verified == false`).
    pub fn tick(
        &mut self,
        transport: &mut dyn MultipathTransport,
        capture: &CaptureSlot,
        telemetry: &dyn Fn(PathId) -> PathTelemetry,
    ) -> Result<TickOutcome> {
        // 1. Abort conditions.
        if transport.is_closing() {
            return Ok(TickOutcome::Terminate);
        }
        let now_us = transport.now_us();

        if transport.is_ready() && self.probe.handshake_done_at_us.is_none() {
            self.probe.handshake_done_at_us = Some(now_us);
        }

        // 3. Path 0 liveness.
        self.paths.ensure_path0_alive();

        // 4. Alternate path probing.
        if let Some(done_at) = self.probe.handshake_done_at_us {
            if now_us.saturating_sub(done_at) >= self.probe.probe_delay_us {
                if !self.probe.did_probe_wifi_alt {
                    transport.probe_path(self.probe.wifi_local, self.probe.peer_addr);
                    self.probe.did_probe_wifi_alt = true;
                }
                if !self.probe.did_probe_cell_alt {
                    if let Some(cell_local) = self.probe.cell_local {
                        transport.probe_path(cell_local, self.probe.peer_addr);
                        self.probe.did_probe_cell_alt = true;
                    }
                }
            }
        }

        // 5. Wi-Fi liveness re-probe.
        let wifi_in_use = self
            .paths
            .iter()
            .any(|(_, p)| p.is_verified_and_live() && p.local_addr == self.probe.wifi_local.ip());
        if !wifi_in_use
            && now_us.saturating_sub(self.probe.last_wifi_probe_attempt_us) >= WIFI_REPROBE_INTERVAL_US
        {
            match self.paths.find_by_local_addr(self.probe.wifi_local.ip()) {
                Some(existing) => transport.reprobe_path(existing),
                None => {
                    transport.probe_path(self.probe.wifi_local, self.probe.peer_addr);
                }
            }
            self.probe.last_wifi_probe_attempt_us = now_us;
        }

        // 6. Keep-alive.
        if now_us.saturating_sub(self.last_keepalive_us) >= KEEPALIVE_INTERVAL_US {
            for (id, path) in self.paths.iter() {
                if path.is_verified_and_live() {
                    let _ = transport.send_on_path(id, path_stream_zero(), &[KEEPALIVE_BYTE]);
                }
            }
            self.last_keepalive_us = now_us;
        }

        // 7. Capture drain.
        let Some((seq, frame)) = capture.drain_if_newer(self.last_sent_seq) else {
            return Ok(TickOutcome::Idle);
        };

        // 8. Primary selection.
        let verified: Vec<PathId> = self.unique_verified_paths();
        let wifi_id = self.find_by_addr(self.probe.wifi_local);
        let cell_id = self.probe.cell_local.and_then(|a| self.find_by_addr(a));

        let primary = match (wifi_id, cell_id) {
            (Some(w), Some(c)) => {
                let mw = self.scorer.score(w, &telemetry(w));
                let mc = self.scorer.score(c, &telemetry(c));
                Some(self.fsm.select(mw, mc, w, c, now_us))
            }
            _ => verified.first().copied(),
        };

        let primary = match primary {
            Some(p) if self.paths.get(p).is_some_and(|pp| pp.is_verified_and_live()) => p,
            _ => verified.first().copied().unwrap_or(0),
        };

        // 9. Ordered send with fallback.
        let mut candidates = vec![primary];
        candidates.extend(verified.iter().filter(|&&p| p != primary));

        let mut sent_on = None;
        for candidate in candidates {
            let Some(path) = self.paths.get(candidate) else {
                continue;
            };
            if !path.is_sane_for_send() {
                continue;
            }
            let stream_id = path.stream_id;
            let header = varint::encode_to_vec(frame.len() as u64);
            let mut wire = header;
            wire.extend_from_slice(&frame);

            if self.last_affinity_path != Some(candidate) {
                info!(from = ?self.last_affinity_path, to = candidate, "path affinity changed");
                self.last_affinity_path = Some(candidate);
            }

            match transport.send_on_path(candidate, stream_id, &wire) {
                Ok(()) => {
                    sent_on = Some(candidate);
                    break;
                }
                Err(reason) => {
                    warn!(path = candidate, reason, "send rejected, trying next candidate");
                }
            }
        }

        let Some(sent_path) = sent_on else {
            return Ok(TickOutcome::SendFailed);
        };
        self.last_sent_seq = seq;

        // 10. Warm-up.
        for &p in verified.iter().filter(|&&p| p != sent_path) {
            if let Some(path) = self.paths.get(p) {
                if path.is_verified_and_live() {
                    let stream_id = path.stream_id;
                    let _ = transport.send_on_path(p, stream_id, &[WARMUP_BYTE]);
                }
            }
        }

        info!(path = sent_path, seq, "frame sent");
        Ok(TickOutcome::Sent { path: sent_path })
    }

    /// Random jitter for the next wake-up, per step 11.
    pub fn next_wake_delay() -> Duration {
        Duration::from_micros(rand::rng().random_range(RESCHEDULE_MIN_US..=RESCHEDULE_MAX_US))
    }

    fn unique_verified_paths(&self) -> Vec<PathId> {
        let mut seen = std::collections::HashSet::new();
        self.paths
            .verified_paths()
            .into_iter()
            .filter(|&id| {
                let addr = self.paths.get(id).map(|p| p.local_addr);
                addr.is_some_and(|a| seen.insert(a))
            })
            .collect()
    }

    fn find_by_addr(&self, addr: SocketAddr) -> Option<PathId> {
        self.paths.find_by_local_addr(addr.ip())
    }

    pub fn path_table_mut(&mut self) -> &mut PathTable {
        &mut self.paths
    }
}

/// The send loop always directs keep-alive bytes at stream 0, the control
/// stream the transport reserves regardless of which path carries it.
fn path_stream_zero() -> u64 {
    0
}

/// Resets the per-connection fields the original zeroes on reconnect
/// (`didB`, `didC`, stream-id table, bind table, `last_primary_id = -1`).
pub fn reset_for_reconnect(send_loop: &mut SendLoop) {
    *send_loop = SendLoop::new(
        send_loop.probe.peer_addr,
        send_loop.probe.wifi_local,
        send_loop.probe.cell_local,
    );
}

pub fn assert_frame_within_limits(frame: &[u8]) -> Result<()> {
    if frame.is_empty() {
        return Err(StrandError::FrameEmpty);
    }
    if frame.len() as u64 > AssemblerLimits::MAX_FRAME_SIZE {
        return Err(StrandError::FrameTooLarge {
            len: frame.len() as u64,
            max: AssemblerLimits::MAX_FRAME_SIZE,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::fake::FakeTransport;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr(o: u8, port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 168, 1, o)), port)
    }

    fn always_good(_: PathId) -> PathTelemetry {
        PathTelemetry {
            verified: true,
            silence: Some(Duration::from_millis(10)),
            smoothed_rtt: Duration::from_millis(30),
            total_bytes_lost: 0,
            delivered_bytes: 1000,
        }
    }

    #[test]
    fn idle_when_no_new_frame() {
        let mut sl = SendLoop::new(addr(1, 5000), addr(2, 0), Some(addr(3, 0)));
        let mut t = FakeTransport {
            ready: true,
            clock_us: 1,
            ..Default::default()
        };
        let capture = CaptureSlot::new();
        let outcome = sl.tick(&mut t, &capture, &always_good).unwrap();
        assert_eq!(outcome, TickOutcome::Idle);
    }

    #[test]
    fn terminates_when_closing() {
        let mut sl = SendLoop::new(addr(1, 5000), addr(2, 0), None);
        let mut t = FakeTransport {
            closing: true,
            ..Default::default()
        };
        let capture = CaptureSlot::new();
        let outcome = sl.tick(&mut t, &capture, &always_good).unwrap();
        assert_eq!(outcome, TickOutcome::Terminate);
    }

    #[test]
    fn sends_on_verified_path_when_frame_available() {
        let mut sl = SendLoop::new(addr(1, 5000), addr(2, 0), Some(addr(3, 0)));
        let wifi_id = sl.path_table_mut().insert(addr(2, 0).ip()).unwrap();
        {
            let p = sl.path_table_mut().get_mut(wifi_id).unwrap();
            p.verified = true;
            p.has_1rtt_keys = true;
            p.last_packet_received_us = Some(1);
        }
        let mut t = FakeTransport {
            ready: true,
            clock_us: 10_000_000,
            ..Default::default()
        };
        let capture = CaptureSlot::new();
        capture.publish(vec![1, 2, 3, 4]);

        let outcome = sl.tick(&mut t, &capture, &always_good).unwrap();
        assert_eq!(outcome, TickOutcome::Sent { path: wifi_id });
        assert_eq!(t.sent.len(), 1);
    }

    #[test]
    fn send_failure_falls_through_to_next_candidate() {
        let mut sl = SendLoop::new(addr(1, 5000), addr(2, 0), Some(addr(3, 0)));
        let wifi_id = sl.path_table_mut().insert(addr(2, 0).ip()).unwrap();
        let cell_id = sl.path_table_mut().insert(addr(3, 0).ip()).unwrap();
        for id in [wifi_id, cell_id] {
            let p = sl.path_table_mut().get_mut(id).unwrap();
            p.verified = true;
            p.has_1rtt_keys = true;
            p.last_packet_received_us = Some(1);
        }
        let mut t = FakeTransport {
            ready: true,
            clock_us: 10_000_000,
            ..Default::default()
        };
        t.reject_paths.insert(wifi_id, "congested");
        let capture = CaptureSlot::new();
        capture.publish(vec![9, 9, 9]);

        let outcome = sl.tick(&mut t, &capture, &always_good).unwrap();
        match outcome {
            TickOutcome::Sent { path } => assert_eq!(path, cell_id),
            other => panic!("expected Sent, got {other:?}"),
        }
    }

    #[test]
    fn frame_size_guards_reject_empty_and_oversized() {
        assert!(matches!(
            assert_frame_within_limits(&[]),
            Err(StrandError::FrameEmpty)
        ));
        let huge = vec![0u8; (AssemblerLimits::MAX_FRAME_SIZE + 1) as usize];
        assert!(matches!(
            assert_frame_within_limits(&huge),
            Err(StrandError::FrameTooLarge { .. })
        ));
    }
}
