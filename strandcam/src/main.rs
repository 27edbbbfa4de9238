//! Edge-device client binary: captures JPEG frames and streams them to
//! `strandhub` over two simultaneous local interfaces (Wi-Fi primary,
//! cellular/hotspot secondary), failing over transparently between them.
//!
//! The real multipath-QUIC transport (handshake, path validation, crypto,
//! congestion control) is an out-of-scope collaborator per the pipeline's
//! design; [`DatagramTransport`] below is a minimal UDP-backed stand-in
//! that implements [`strandstream::transport::MultipathTransport`] so the
//! send loop has something concrete to drive. A production deployment
//! plugs in a real multipath-QUIC library behind the same trait.

use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use rand::RngCore;
use tracing::{error, info, warn};

use strandstream::capture::CaptureSlot;
use strandstream::nic;
use strandstream::path::PathId;
use strandstream::send_loop::{self, SendLoop};
use strandstream::transport::MultipathTransport;

/// Edge-device client: streams captured JPEG frames over Wi-Fi with
/// cellular failover.
#[derive(Parser, Debug)]
#[command(name = "strandcam")]
struct Args {
    /// Server address to connect to.
    server_ip: IpAddr,
    /// Alternate (cellular/hotspot) local address, if a second uplink is
    /// available.
    alt_local_ip: Option<IpAddr>,
    /// Server port.
    #[arg(default_value_t = 4433)]
    port: u16,
    /// Wi-Fi/primary local address to bind.
    usb_local_ip: Option<IpAddr>,
}

struct PathLink {
    socket: UdpSocket,
    verified: bool,
}

/// Minimal UDP-backed transport standing in for a real multipath-QUIC
/// implementation. Paths are considered verified as soon as their socket
/// connects; there is no handshake, congestion control, or retransmission
/// here — those remain the real transport's job.
struct DatagramTransport {
    peer: SocketAddr,
    links: Vec<PathLink>,
    closing: Arc<AtomicBool>,
    started_at: Instant,
}

impl DatagramTransport {
    fn new(peer: SocketAddr, locals: &[SocketAddr], closing: Arc<AtomicBool>) -> std::io::Result<Self> {
        let mut links = Vec::with_capacity(locals.len());
        for &local in locals {
            let socket = UdpSocket::bind(local)?;
            socket.connect(peer)?;
            socket.set_nonblocking(true)?;
            links.push(PathLink {
                socket,
                verified: true,
            });
        }
        Ok(DatagramTransport {
            peer,
            links,
            closing,
            started_at: Instant::now(),
        })
    }
}

impl MultipathTransport for DatagramTransport {
    fn is_ready(&self) -> bool {
        !self.links.is_empty()
    }

    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Relaxed)
    }

    fn probe_path(&mut self, local: SocketAddr, peer: SocketAddr) -> PathId {
        if let Some((i, _)) = self
            .links
            .iter()
            .enumerate()
            .find(|(_, l)| l.socket.local_addr().map(|a| a == local).unwrap_or(false))
        {
            return i;
        }
        match UdpSocket::bind(local).and_then(|s| {
            s.connect(peer)?;
            s.set_nonblocking(true)?;
            Ok(s)
        }) {
            Ok(socket) => {
                self.links.push(PathLink {
                    socket,
                    verified: true,
                });
                self.links.len() - 1
            }
            Err(e) => {
                warn!(error = %e, "probe failed to bind local address");
                0
            }
        }
    }

    fn reprobe_path(&mut self, path: PathId) {
        if let Some(link) = self.links.get_mut(path) {
            link.verified = true;
        }
    }

    fn send_on_path(
        &mut self,
        path: PathId,
        stream_id: u64,
        payload: &[u8],
    ) -> Result<(), &'static str> {
        let link = self.links.get(path).ok_or("unknown path")?;
        let mut wire = Vec::with_capacity(8 + payload.len());
        wire.extend_from_slice(&stream_id.to_be_bytes());
        wire.extend_from_slice(payload);
        link.socket.send(&wire).map_err(|_| "send failed").map(|_| ())
    }

    fn now_us(&self) -> u64 {
        self.started_at.elapsed().as_micros() as u64
    }
}

/// Stands in for the blocking camera-capture API: produces a JPEG-looking
/// payload on a fixed cadence. Real capture hardware and encoding are an
/// out-of-scope collaborator; this keeps the pipeline runnable end to end.
fn spawn_capture_thread(slot: Arc<CaptureSlot>, stop: Arc<AtomicBool>) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let mut counter: u64 = 0;
        while !stop.load(Ordering::Relaxed) {
            counter += 1;
            let mut frame = vec![0xFF, 0xD8];
            let mut body = vec![0u8; 4096];
            rand::rng().fill_bytes(&mut body);
            frame.extend_from_slice(&body);
            frame.extend_from_slice(&[0xFF, 0xD9]);
            slot.publish(frame);
            std::thread::sleep(Duration::from_millis(33));
        }
        let _ = counter;
    })
}

async fn run(args: Args) -> std::io::Result<()> {
    let port = args.port;
    let wifi_local = SocketAddr::new(
        args.usb_local_ip.unwrap_or(IpAddr::from([0, 0, 0, 0])),
        0,
    );
    let cell_local = args.alt_local_ip.map(|ip| SocketAddr::new(ip, 0));
    let peer = SocketAddr::new(args.server_ip, port);

    let _nic = nic::default_nic();

    let mut locals = vec![wifi_local];
    if let Some(cl) = cell_local {
        locals.push(cl);
    }

    let closing = Arc::new(AtomicBool::new(false));
    let mut transport = DatagramTransport::new(peer, &locals, closing.clone())?;

    let capture = Arc::new(CaptureSlot::new());
    let cam_stop = Arc::new(AtomicBool::new(false));
    let cam_thread = spawn_capture_thread(capture.clone(), cam_stop.clone());

    let mut send_loop = SendLoop::new(peer, wifi_local, cell_local);
    {
        let table = send_loop.path_table_mut();
        let wifi_id = table.insert(wifi_local.ip()).expect("path table has room");
        if let Some(p) = table.get_mut(wifi_id) {
            p.verified = true;
            p.has_1rtt_keys = true;
            p.last_packet_received_us = Some(0);
        }
        if let Some(cl) = cell_local {
            let cell_id = table.insert(cl.ip()).expect("path table has room");
            if let Some(p) = table.get_mut(cell_id) {
                p.verified = true;
                p.has_1rtt_keys = true;
                p.last_packet_received_us = Some(0);
            }
        }
    }

    let sent_frames = AtomicU64::new(0);
    let telemetry = |_id: PathId| strandstream::metric::PathTelemetry {
        verified: true,
        silence: Some(Duration::from_millis(10)),
        smoothed_rtt: Duration::from_millis(40),
        total_bytes_lost: 0,
        delivered_bytes: 10_000,
    };

    // Cooperative task: reacts to (next-wake deadline, shutdown) instead of
    // the original's transport callback invocation. Capture frames are
    // picked up opportunistically each wake, since the capture thread
    // publishes independently of this task's schedule.
    loop {
        tokio::select! {
            _ = tokio::time::sleep(SendLoop::next_wake_delay()) => {
                if closing.load(Ordering::Relaxed) {
                    break;
                }
                match send_loop.tick(&mut transport, &capture, &telemetry) {
                    Ok(send_loop::TickOutcome::Terminate) => break,
                    Ok(send_loop::TickOutcome::Sent { path }) => {
                        let n = sent_frames.fetch_add(1, Ordering::Relaxed) + 1;
                        info!(path, frames_sent = n, "uplink frame sent");
                    }
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "send loop tick failed"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                closing.store(true, Ordering::Relaxed);
                break;
            }
        }
    }

    cam_stop.store(true, Ordering::Relaxed);
    let _ = cam_thread.join();
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::from(0),
        Err(e) => {
            error!(error = %e, "initialization failure");
            ExitCode::from(255) // -1 in the original's convention
        }
    }
}
