//! Path Metric Scorer: maps a path's raw transport telemetry to a coarse
//! `{Good, Warn, Bad}` grade plus smoothed RTT and loss figures, per a
//! per-path EWMA history. This is the input the primary-path FSM
//! ([`crate::fsm`]) chooses between.

use std::collections::HashMap;
use std::time::Duration;

use crate::path::PathId;

/// Coarse usability grade for a path. Ordered worst-to-best is NOT the
/// derive order here; comparisons in the FSM are written explicitly against
/// named variants rather than relying on `Ord`, since "equal or better" reads
/// more clearly that way at call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grade {
    Good,
    Warn,
    Bad,
}

impl Grade {
    pub fn is_bad(self) -> bool {
        matches!(self, Grade::Bad)
    }

    pub fn at_most_warn(self) -> bool {
        !matches!(self, Grade::Bad)
    }
}

/// Raw, unsmoothed telemetry a path reports; the input to [`PathMetricScorer::score`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PathTelemetry {
    pub verified: bool,
    /// Microseconds since the last packet was received on this path, or
    /// `None` if nothing has ever been received.
    pub silence: Option<Duration>,
    pub smoothed_rtt: Duration,
    pub total_bytes_lost: u64,
    pub delivered_bytes: u64,
}

/// Derived, smoothed metric for a path at a point in time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathMetric {
    pub grade: Grade,
    pub rtt_ms: f64,
    pub loss_pct: f64,
}

const UNVERIFIED_SILENCE_LIMIT: Duration = Duration::from_secs(2);
const UNVERIFIED_RTT_SENTINEL_MS: f64 = 200.0;
const DEFAULT_RTT_MS: f64 = 50.0;
const EWMA_ALPHA: f64 = 0.2;

const GOOD_RTT_MS: f64 = 120.0;
const GOOD_LOSS_PCT: f64 = 3.0;
const BAD_RTT_MS: f64 = 250.0;
const BAD_LOSS_PCT: f64 = 10.0;
const LOSS_CAP_PCT: f64 = 50.0;

/// Owns the per-path EWMA RTT history. Intentionally a plain struct holding
/// a `HashMap`, not a file-static table: the caller (send loop or test)
/// decides its lifetime.
#[derive(Debug, Default)]
pub struct PathMetricScorer {
    ewma_rtt_ms: HashMap<PathId, f64>,
}

impl PathMetricScorer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Score `telemetry` for `path_id`, updating this scorer's EWMA history
    /// as a side effect.
    pub fn score(&mut self, path_id: PathId, telemetry: &PathTelemetry) -> PathMetric {
        if !telemetry.verified {
            let grade = match telemetry.silence {
                Some(s) if s > UNVERIFIED_SILENCE_LIMIT => Grade::Bad,
                _ => Grade::Warn,
            };
            return PathMetric {
                grade,
                rtt_ms: UNVERIFIED_RTT_SENTINEL_MS,
                loss_pct: 0.0,
            };
        }

        let sample_ms = if telemetry.smoothed_rtt.is_zero() {
            DEFAULT_RTT_MS
        } else {
            telemetry.smoothed_rtt.as_secs_f64() * 1000.0
        };
        let rtt_ms = *self
            .ewma_rtt_ms
            .entry(path_id)
            .and_modify(|ewma| *ewma = EWMA_ALPHA * sample_ms + (1.0 - EWMA_ALPHA) * *ewma)
            .or_insert(sample_ms);

        let loss_pct = loss_rate_pct(telemetry.total_bytes_lost, telemetry.delivered_bytes);

        let grade = if rtt_ms <= GOOD_RTT_MS && loss_pct <= GOOD_LOSS_PCT {
            Grade::Good
        } else if rtt_ms > BAD_RTT_MS || loss_pct > BAD_LOSS_PCT {
            Grade::Bad
        } else {
            Grade::Warn
        };

        PathMetric {
            grade,
            rtt_ms,
            loss_pct,
        }
    }

    pub fn forget(&mut self, path_id: PathId) {
        self.ewma_rtt_ms.remove(&path_id);
    }
}

fn loss_rate_pct(lost: u64, delivered: u64) -> f64 {
    if lost > 0 && lost >= delivered {
        return LOSS_CAP_PCT;
    }
    100.0 * lost as f64 / delivered.max(1) as f64
}
