//! Client-side path data model: a fixed-capacity table of candidate network
//! paths (Wi-Fi, cellular/hotspot, and any others the transport discovers),
//! their verification state, and the bookkeeping needed to pick path 0 as a
//! live default when the caller hasn't chosen a primary yet.

use std::net::IpAddr;

use crate::error::{Result, StrandError};

/// Maximum number of concurrent paths a client tracks.
pub const MAX_PATHS: usize = 16;

/// Opaque handle into a [`PathTable`]. Stable for the lifetime of the path
/// (indices are not reused while the path is live).
pub type PathId = usize;

/// A single network path as seen by the client.
#[derive(Debug, Clone)]
pub struct Path {
    /// Local address bound for this path (used for de-duplication).
    pub local_addr: IpAddr,
    /// Stream id this path's uplink data is carried on (`2 + 4*index`).
    pub stream_id: u64,
    /// Whether the transport has completed path validation (received a
    /// PATH_RESPONSE matching our PATH_CHALLENGE).
    pub verified: bool,
    /// Whether the transport has flagged this path demoted (soft failure:
    /// still usable but deprioritized) or abandoned (hard failure).
    pub demoted: bool,
    pub abandoned: bool,
    /// True once the handshake/1-RTT keys are available on this path.
    pub has_1rtt_keys: bool,
    /// Microsecond timestamp of the last packet received on this path, used
    /// by liveness checks. `None` if nothing has been received yet.
    pub last_packet_received_us: Option<u64>,
    in_use: bool,
}

impl Path {
    fn new(local_addr: IpAddr, stream_id: u64) -> Self {
        Path {
            local_addr,
            stream_id,
            verified: false,
            demoted: false,
            abandoned: false,
            has_1rtt_keys: false,
            last_packet_received_us: None,
            in_use: true,
        }
    }

    /// Mirrors the original client's `path_verified_idx`: a path is usable
    /// for affinity selection once it has been validated, has received at
    /// least one packet, and carries live 1-RTT keys, and has not been
    /// demoted or abandoned.
    pub fn is_verified_and_live(&self) -> bool {
        self.in_use
            && self.verified
            && self.has_1rtt_keys
            && self.last_packet_received_us.is_some()
            && !self.demoted
            && !self.abandoned
    }

    /// Mirrors `path_sane_for_send`: looser than [`Self::is_verified_and_live`],
    /// this only requires the path still be open and not abandoned — used as
    /// a fallback when no path is fully verified yet.
    pub fn is_sane_for_send(&self) -> bool {
        self.in_use && !self.abandoned
    }
}

/// Fixed-capacity table of up to [`MAX_PATHS`] candidate paths, indexed by
/// [`PathId`] (a plain array index, matching the original's `tx_t::b[MAX_PATHS]`).
#[derive(Debug, Default)]
pub struct PathTable {
    slots: Vec<Option<Path>>,
}

impl PathTable {
    pub fn new() -> Self {
        PathTable {
            slots: (0..MAX_PATHS).map(|_| None).collect(),
        }
    }

    /// Insert a new path bound to `local_addr`, de-duplicating by local IP
    /// (an accepted limitation carried over unchanged from the original:
    /// a NIC that rebinds to the same address reuses the existing slot
    /// rather than opening a second path).
    pub fn insert(&mut self, local_addr: IpAddr) -> Result<PathId> {
        if let Some(existing) = self.find_by_local_addr(local_addr) {
            return Ok(existing);
        }
        let index = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(StrandError::PathTableFull)?;
        let stream_id = make_client_uni_stream_id(index);
        self.slots[index] = Some(Path::new(local_addr, stream_id));
        Ok(index)
    }

    pub fn find_by_local_addr(&self, local_addr: IpAddr) -> Option<PathId> {
        self.slots.iter().enumerate().find_map(|(i, p)| {
            p.as_ref()
                .filter(|p| p.in_use && p.local_addr == local_addr)
                .map(|_| i)
        })
    }

    pub fn get(&self, id: PathId) -> Option<&Path> {
        self.slots.get(id).and_then(|s| s.as_ref())
    }

    pub fn get_mut(&mut self, id: PathId) -> Option<&mut Path> {
        self.slots.get_mut(id).and_then(|s| s.as_mut())
    }

    pub fn remove(&mut self, id: PathId) {
        if let Some(slot) = self.slots.get_mut(id) {
            *slot = None;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (PathId, &Path)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.as_ref().map(|p| (i, p)))
    }

    /// All paths fully verified and live, in slot order — the candidate set
    /// the FSM and scorer choose from.
    pub fn verified_paths(&self) -> Vec<PathId> {
        self.iter()
            .filter(|(_, p)| p.is_verified_and_live())
            .map(|(i, _)| i)
            .collect()
    }

    /// Mirrors `choose_verified_or_fallback`: prefer a fully verified path,
    /// but fall back to any path that is merely sane-for-send rather than
    /// refusing to send at all.
    pub fn choose_verified_or_fallback(&self) -> Option<PathId> {
        self.verified_paths().into_iter().next().or_else(|| {
            self.iter()
                .find(|(_, p)| p.is_sane_for_send())
                .map(|(i, _)| i)
        })
    }

    /// Mirrors `ensure_path0_alive`: if slot 0 is dead (not sane for send)
    /// but a higher-index slot is usable, swap their contents so slot 0 —
    /// the one callbacks default to when no explicit primary has been
    /// chosen yet — stays a workable path.
    pub fn ensure_path0_alive(&mut self) {
        let slot0_alive = self
            .slots
            .first()
            .and_then(|s| s.as_ref())
            .is_some_and(Path::is_sane_for_send);
        if slot0_alive {
            return;
        }
        let Some(replacement) = self
            .slots
            .iter()
            .skip(1)
            .position(|s| s.as_ref().is_some_and(Path::is_sane_for_send))
            .map(|offset| offset + 1)
        else {
            return;
        };
        self.slots.swap(0, replacement);
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Client-initiated unidirectional stream id for the `index`-th path:
/// `2 + 4*index`, per the QUIC stream-id space convention the original
/// client reuses as a deterministic per-path mapping.
pub fn make_client_uni_stream_id(index: usize) -> u64 {
    2 + 4 * index as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ip(o: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 168, 1, o))
    }

    #[test]
    fn stream_id_matches_formula() {
        assert_eq!(make_client_uni_stream_id(0), 2);
        assert_eq!(make_client_uni_stream_id(1), 6);
        assert_eq!(make_client_uni_stream_id(3), 14);
    }

    #[test]
    fn insert_dedups_by_local_addr() {
        let mut t = PathTable::new();
        let a = t.insert(ip(1)).unwrap();
        let b = t.insert(ip(1)).unwrap();
        assert_eq!(a, b);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn insert_fails_when_full() {
        let mut t = PathTable::new();
        for i in 0..MAX_PATHS as u8 {
            t.insert(ip(i)).unwrap();
        }
        assert!(matches!(
            t.insert(ip(200)),
            Err(StrandError::PathTableFull)
        ));
    }

    #[test]
    fn verified_and_live_requires_all_flags() {
        let mut t = PathTable::new();
        let id = t.insert(ip(1)).unwrap();
        assert!(!t.get(id).unwrap().is_verified_and_live());

        let p = t.get_mut(id).unwrap();
        p.verified = true;
        p.has_1rtt_keys = true;
        p.last_packet_received_us = Some(1_000);
        assert!(t.get(id).unwrap().is_verified_and_live());

        t.get_mut(id).unwrap().demoted = true;
        assert!(!t.get(id).unwrap().is_verified_and_live());
    }

    #[test]
    fn ensure_path0_alive_swaps_in_a_live_path() {
        let mut t = PathTable::new();
        let p0 = t.insert(ip(1)).unwrap();
        let p1 = t.insert(ip(2)).unwrap();
        t.get_mut(p0).unwrap().abandoned = true;
        t.get_mut(p1).unwrap().verified = true;

        t.ensure_path0_alive();

        assert!(t.get(0).unwrap().is_sane_for_send());
        assert_eq!(t.get(0).unwrap().local_addr, ip(2));
    }

    #[test]
    fn choose_verified_or_fallback_prefers_verified() {
        let mut t = PathTable::new();
        let p0 = t.insert(ip(1)).unwrap();
        let p1 = t.insert(ip(2)).unwrap();
        // Neither verified yet: falls back to the first sane path.
        assert_eq!(t.choose_verified_or_fallback(), Some(p0));

        let p1_ref = t.get_mut(p1).unwrap();
        p1_ref.verified = true;
        p1_ref.has_1rtt_keys = true;
        p1_ref.last_packet_received_us = Some(1);
        assert_eq!(t.choose_verified_or_fallback(), Some(p1));
    }
}
