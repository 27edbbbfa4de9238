//! Primary-Path FSM: picks which path (Wi-Fi or cellular) currently carries
//! uplink traffic, with dwell timers to damp flapping and an RTT margin to
//! avoid switching on noise.

use crate::metric::{Grade, PathMetric};
use crate::path::PathId;

/// Minimum time on Wi-Fi before a failover to cellular is allowed.
pub const DWELL_FAILOVER: u64 = 200_000;
/// Minimum time on cellular before a failback to Wi-Fi is allowed.
pub const DWELL_FAILBACK: u64 = 400_000;
/// RTT advantage (ms) required to switch when both paths grade equally.
pub const RTT_MARGIN_MS: f64 = 20.0;
/// Extra margin (ms) required specifically for a failback on equal grade.
const FAILBACK_EXTRA_MARGIN_MS: f64 = 10.0;

/// Persistent FSM state, carried across `select` calls for the lifetime of
/// the connection.
#[derive(Debug, Clone, Copy)]
pub struct PrimarySelector {
    last_primary_id: Option<PathId>,
    last_switch_time_us: u64,
}

impl PrimarySelector {
    pub fn new() -> Self {
        PrimarySelector {
            last_primary_id: None,
            last_switch_time_us: 0,
        }
    }

    pub fn current_primary(&self) -> Option<PathId> {
        self.last_primary_id
    }

    /// Decide which path should carry uplink traffic right now.
    ///
    /// `now_us` is a monotonic microsecond clock. Returns the chosen path id,
    /// updating `self.last_primary_id`/`self.last_switch_time_us` only when
    /// the choice differs from the previous one.
    pub fn select(
        &mut self,
        metric_wifi: PathMetric,
        metric_cell: PathMetric,
        wifi_id: PathId,
        cell_id: PathId,
        now_us: u64,
    ) -> PathId {
        let chosen = match self.last_primary_id {
            None => {
                // Initial: prefer Wi-Fi when present.
                wifi_id
            }
            Some(last) if last == wifi_id => {
                self.decide_on_wifi(metric_wifi, metric_cell, wifi_id, cell_id, now_us)
            }
            Some(last) if last == cell_id => {
                self.decide_on_cellular(metric_wifi, metric_cell, wifi_id, cell_id, now_us)
            }
            Some(last) => last,
        };

        if self.last_primary_id != Some(chosen) {
            self.last_primary_id = Some(chosen);
            self.last_switch_time_us = now_us;
        }
        chosen
    }

    fn decide_on_wifi(
        &self,
        metric_wifi: PathMetric,
        metric_cell: PathMetric,
        wifi_id: PathId,
        cell_id: PathId,
        now_us: u64,
    ) -> PathId {
        if now_us.saturating_sub(self.last_switch_time_us) < DWELL_FAILOVER {
            return wifi_id;
        }
        if metric_wifi.grade.is_bad() && metric_cell.grade.is_bad() {
            return wifi_id;
        }

        let failover = (metric_wifi.grade.is_bad() && !metric_cell.grade.is_bad())
            || (metric_wifi.grade == Grade::Warn && metric_cell.grade == Grade::Good)
            || (metric_wifi.grade == metric_cell.grade
                && metric_wifi.rtt_ms - metric_cell.rtt_ms > RTT_MARGIN_MS);

        if failover {
            cell_id
        } else {
            wifi_id
        }
    }

    fn decide_on_cellular(
        &self,
        metric_wifi: PathMetric,
        metric_cell: PathMetric,
        wifi_id: PathId,
        cell_id: PathId,
        now_us: u64,
    ) -> PathId {
        if now_us.saturating_sub(self.last_switch_time_us) < DWELL_FAILBACK {
            return cell_id;
        }

        // Wi-Fi usable again (GOOD or WARN): return to it unconditionally,
        // regardless of cellular's RTT. Only when Wi-Fi is still BAD does
        // the symmetric-margin check below get a say.
        if metric_wifi.grade.at_most_warn() {
            return wifi_id;
        }

        let failback = metric_wifi.grade == metric_cell.grade
            && metric_cell.rtt_ms - metric_wifi.rtt_ms > RTT_MARGIN_MS + FAILBACK_EXTRA_MARGIN_MS;

        if failback {
            wifi_id
        } else {
            cell_id
        }
    }
}

impl Default for PrimarySelector {
    fn default() -> Self {
        Self::new()
    }
}
