//! Server binary: receives framed JPEG uploads over UDP from one or more
//! client paths, reassembles them with [`strandstream::assembler`], and
//! persists them durably via [`strandstream::writer`].
//!
//! Socket handling here stands in for the real multipath-QUIC server
//! (handshake, path validation, stream multiplexing over a single
//! connection) — out of scope per the pipeline's design. Each inbound UDP
//! datagram is treated as `{u64 BE stream_id, payload}`, matching the wire
//! shape `strandcam`'s stand-in transport produces.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use clap::Parser;
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tracing::{error, info, warn};

use strandstream::assembler::FrameAssembler;
use strandstream::config::{AssemblerLimits, BACKPRESSURE_SOFT_CAP_BYTES};
use strandstream::qlog::QlogWriter;
use strandstream::writer::{FileFrameWriter, FrameSink, SegmentFrameWriter, WriterHandle};

#[derive(Parser, Debug)]
#[command(name = "strandhub")]
struct Args {
    #[arg(long, default_value_t = 4433)]
    port: u16,
    /// TLS certificate path. Carried through for the real transport's
    /// handshake; unused by this stand-in, which does no TLS.
    #[arg(long)]
    cert: Option<PathBuf>,
    #[arg(long)]
    key: Option<PathBuf>,
    #[arg(long, default_value = "./frames")]
    out: PathBuf,
    /// Stop accepting new frames after this many have been committed.
    /// Absent means unbounded.
    #[arg(long)]
    max_frames: Option<u64>,
    /// Emit a qlog-style newline-delimited JSON event log alongside the
    /// frame output.
    #[arg(long)]
    qlog: bool,
    /// Use segmented binary-log output instead of per-frame files.
    #[arg(long)]
    binlog: bool,
    #[arg(long)]
    segment_dir: Option<PathBuf>,
}

fn build_sink(args: &Args) -> std::io::Result<Box<dyn FrameSink>> {
    if args.binlog {
        let dir = args.segment_dir.clone().unwrap_or_else(|| args.out.clone());
        Ok(Box::new(SegmentFrameWriter::new(dir)?))
    } else {
        Ok(Box::new(FileFrameWriter::new(&args.out)?))
    }
}

async fn run(args: Args) -> std::io::Result<()> {
    if args.cert.is_some() != args.key.is_some() {
        warn!("--cert and --key should be provided together for a real transport handshake");
    }

    let sink = build_sink(&args)?;
    let (queue, writer_handle) = WriterHandle::spawn(sink);

    let limits = AssemblerLimits::from_env();
    let assembler = Arc::new(Mutex::new(FrameAssembler::new(limits)));

    let qlog = if args.qlog {
        Some(Arc::new(Mutex::new(QlogWriter::create(args.out.join("events.qlog"))?)))
    } else {
        None
    };

    let addr = SocketAddr::new([0, 0, 0, 0].into(), args.port);
    let socket = UdpSocket::bind(addr).await?;
    info!(%addr, "strandhub listening");

    let frames_committed = Arc::new(AtomicU64::new(0));
    let max_frames = args.max_frames;

    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let (n, peer) = tokio::select! {
            res = socket.recv_from(&mut buf) => res?,
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested, draining writer");
                break;
            }
        };
        if n < 8 {
            continue;
        }
        let stream_id = u64::from_be_bytes(buf[0..8].try_into().unwrap());
        let payload = buf[8..n].to_vec();

        if let Some(limit) = max_frames {
            if frames_committed.load(Ordering::Relaxed) >= limit {
                continue;
            }
        }

        let mut asm = assembler.lock();
        asm.set_drop_mode(queue.pending_bytes() > BACKPRESSURE_SOFT_CAP_BYTES);

        let queue_ref = queue.clone();
        let committed_ref = frames_committed.clone();
        let qlog_ref = qlog.clone();
        let result = asm.on_bytes(stream_id, &payload, |job, via_resync| {
            queue_ref.push(job);
            committed_ref.fetch_add(1, Ordering::Relaxed);
            if via_resync {
                if let Some(q) = &qlog_ref {
                    let _ = q.lock().log_frame_resync(0, stream_id);
                }
            }
        });
        drop(asm);

        match result {
            Ok(_) => {}
            Err(e) => error!(error = %e, %peer, stream_id, "assembler rejected stream bytes"),
        }
    }

    writer_handle.join();
    Ok(())
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => std::process::ExitCode::from(0),
        Err(e) => {
            error!(error = %e, "server initialization failure");
            std::process::ExitCode::from(255)
        }
    }
}
