//! Tunables read once from the environment, replacing the original's
//! file-static `fa_tunables_init_once()` with an explicit, owned struct.

use std::env;
use std::time::Duration;

/// Per-callback budgets for [`crate::assembler::FrameAssembler::on_bytes`],
/// overridable via environment variables so operators can tune a running
/// server without a rebuild.
#[derive(Debug, Clone, Copy)]
pub struct AssemblerLimits {
    /// `FA_MAX_RX_STEPS`: max FSM iterations per callback.
    pub max_rx_steps: u32,
    /// `FA_MAX_RX_BYTES`: max bytes copied per callback.
    pub max_rx_bytes: u64,
    /// `FA_MAX_FRAMES_CB`: max frames emitted per callback.
    pub max_frames_cb: u32,
    /// `FA_MAX_TIME_US`: max wall time per callback.
    pub max_time: Duration,
    /// `SVR_DROP_MODE`: force drop mode regardless of backlog.
    pub force_drop_mode: bool,
}

impl AssemblerLimits {
    pub const MAX_FRAME_SIZE: u64 = 10 * 1024 * 1024;
    pub const MAX_STREAMS: usize = 128;
    pub const RESYNC_SCAN_CHUNK: usize = 4096;

    pub fn defaults() -> Self {
        AssemblerLimits {
            max_rx_steps: 65_536,
            max_rx_bytes: 4 * 1024 * 1024,
            max_frames_cb: 16,
            max_time: Duration::from_micros(20_000),
            force_drop_mode: false,
        }
    }

    /// Read overrides from the environment, falling back to
    /// [`Self::defaults`] for anything unset or unparsable.
    pub fn from_env() -> Self {
        let d = Self::defaults();
        AssemblerLimits {
            max_rx_steps: env_u32("FA_MAX_RX_STEPS", d.max_rx_steps),
            max_rx_bytes: env_u64("FA_MAX_RX_BYTES", d.max_rx_bytes),
            max_frames_cb: env_u32("FA_MAX_FRAMES_CB", d.max_frames_cb),
            max_time: Duration::from_micros(env_u64(
                "FA_MAX_TIME_US",
                d.max_time.as_micros() as u64,
            )),
            force_drop_mode: env::var("SVR_DROP_MODE")
                .map(|v| v != "0" && !v.is_empty())
                .unwrap_or(d.force_drop_mode),
        }
    }
}

impl Default for AssemblerLimits {
    fn default() -> Self {
        Self::defaults()
    }
}

/// Soft cap on total buffered-but-not-yet-assembled bytes before the
/// assembler's caller enters drop mode (spec default, not env-overridden).
pub const BACKPRESSURE_SOFT_CAP_BYTES: u64 = 8 * 1024 * 1024;

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_constants() {
        let d = AssemblerLimits::defaults();
        assert_eq!(d.max_rx_steps, 65_536);
        assert_eq!(d.max_rx_bytes, 4 * 1024 * 1024);
        assert_eq!(d.max_frames_cb, 16);
        assert_eq!(d.max_time, Duration::from_millis(20));
        assert!(!d.force_drop_mode);
    }
}
