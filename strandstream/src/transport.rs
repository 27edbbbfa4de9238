//! Abstraction over the external multipath-QUIC transport library. The real
//! transport (connection setup, path validation, congestion control, TLS)
//! is an out-of-scope collaborator; this trait models only the primitives
//! [`crate::send_loop`] needs to drive it, the way a real QUIC library's C
//! API exposes callback/polling hooks rather than async functions.

use std::net::SocketAddr;

use crate::path::PathId;

/// A single byte written to stream 0 as a keep-alive probe.
pub const KEEPALIVE_BYTE: u8 = 0x00;
/// A single byte written to a non-primary verified path to keep its
/// congestion estimate warm.
pub const WARMUP_BYTE: u8 = 0xEE;

/// Everything the send loop needs from the transport each wake-up. Kept
/// synchronous and object-safe, matching the callback/polling shape a real
/// QUIC implementation exposes; the async task in `send_loop` calls these
/// from inside `tokio::task::spawn_blocking` or a plain sync context as
/// appropriate for the underlying library.
pub trait MultipathTransport: Send {
    /// True once the handshake has completed and `ready` has fired.
    fn is_ready(&self) -> bool;
    /// True if the connection is disconnecting or has been flagged closing.
    fn is_closing(&self) -> bool;

    /// Issue a path validation probe from `local` toward `peer`, returning
    /// the path id it will validate into (creating one if none exists yet).
    fn probe_path(&mut self, local: SocketAddr, peer: SocketAddr) -> PathId;

    /// Re-send a path challenge on an already-allocated, still-unverified
    /// path (reuses the slot rather than allocating a new path id).
    fn reprobe_path(&mut self, path: PathId);

    /// Open (if needed) and write `payload` to `stream_id` on `path`,
    /// reasserting path affinity first only if `path` differs from the
    /// last path affinity was asserted on. Returns `Ok(())` on full
    /// acceptance.
    fn send_on_path(&mut self, path: PathId, stream_id: u64, payload: &[u8]) -> Result<(), &'static str>;

    /// Monotonic microsecond clock as seen by the transport.
    fn now_us(&self) -> u64;
}

#[cfg(test)]
pub mod fake {
    //! An in-memory fake transport used by `send_loop` tests.
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    pub struct FakeTransport {
        pub ready: bool,
        pub closing: bool,
        pub clock_us: u64,
        pub next_path_id: PathId,
        pub sent: Vec<(PathId, u64, Vec<u8>)>,
        pub reject_paths: HashMap<PathId, &'static str>,
    }

    impl MultipathTransport for FakeTransport {
        fn is_ready(&self) -> bool {
            self.ready
        }

        fn is_closing(&self) -> bool {
            self.closing
        }

        fn probe_path(&mut self, _local: SocketAddr, _peer: SocketAddr) -> PathId {
            let id = self.next_path_id;
            self.next_path_id += 1;
            id
        }

        fn reprobe_path(&mut self, _path: PathId) {}

        fn send_on_path(
            &mut self,
            path: PathId,
            stream_id: u64,
            payload: &[u8],
        ) -> Result<(), &'static str> {
            if let Some(reason) = self.reject_paths.get(&path) {
                return Err(reason);
            }
            self.sent.push((path, stream_id, payload.to_vec()));
            Ok(())
        }

        fn now_us(&self) -> u64 {
            self.clock_us
        }
    }
}
