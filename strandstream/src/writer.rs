//! Async Frame Writer: a bounded save queue drained by a single dedicated
//! thread that commits frames to disk, either as atomically-renamed
//! per-frame files or as length-prefixed records in a rolling segment file.

use std::collections::VecDeque;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::error::Result;

/// Bound on the save queue depth. Beyond this, the oldest pending job's
/// buffer is dropped in favor of the incoming one.
pub const SAVEQ_MAX: usize = 4096;
/// Max jobs popped from the queue per worker wake-up.
pub const SAVE_POP_BATCH: usize = 128;
/// Segment rotation size for [`SegmentFrameWriter`].
pub const SEGMENT_ROTATE_BYTES: u64 = 1024 * 1024 * 1024;

/// A frame handed from the assembler to the writer, by ownership transfer.
#[derive(Debug)]
pub struct SaveJob {
    pub payload: Vec<u8>,
}

/// A sink capable of durably committing a frame. The only variation point
/// in the writer: file-per-frame vs. segmented, modeled as two
/// implementations of one capability.
pub trait FrameSink: Send {
    fn accept(&mut self, job: SaveJob) -> std::io::Result<()>;
}

/// Writes each frame to `<dir>/frame_NNNNNN.part`, then renames it to
/// `<dir>/frame_NNNNNN.jpg` on a full-length write — atomic on POSIX-like
/// filesystems within a directory, so readers never observe partial frames.
pub struct FileFrameWriter {
    dir: PathBuf,
    next_index: u64,
}

impl FileFrameWriter {
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(FileFrameWriter { dir, next_index: 1 })
    }
}

impl FrameSink for FileFrameWriter {
    fn accept(&mut self, job: SaveJob) -> std::io::Result<()> {
        let index = self.next_index;
        self.next_index += 1;
        let part_path = self.dir.join(format!("frame_{index:06}.part"));
        let final_path = self.dir.join(format!("frame_{index:06}.jpg"));

        let mut f = fs::File::create(&part_path)?;
        f.write_all(&job.payload)?;
        drop(f);
        fs::rename(&part_path, &final_path)?;
        Ok(())
    }
}

/// Appends `{u32 big-endian length, payload}` records to a rolling segment
/// file, opening a new one every [`SEGMENT_ROTATE_BYTES`].
pub struct SegmentFrameWriter {
    dir: PathBuf,
    current: Option<fs::File>,
    current_size: u64,
}

impl SegmentFrameWriter {
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(SegmentFrameWriter {
            dir,
            current: None,
            current_size: 0,
        })
    }

    fn open_new_segment(&mut self) -> std::io::Result<()> {
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        let name = format!("frames_{stamp}.seg");
        let path = self.dir.join(name);
        self.current = Some(fs::File::create(path)?);
        self.current_size = 0;
        Ok(())
    }
}

impl FrameSink for SegmentFrameWriter {
    fn accept(&mut self, job: SaveJob) -> std::io::Result<()> {
        if self.current.is_none() || self.current_size >= SEGMENT_ROTATE_BYTES {
            self.open_new_segment()?;
        }

        let len = job.payload.len() as u32;
        let mut record = Vec::with_capacity(4 + job.payload.len());
        record.extend_from_slice(&len.to_be_bytes());
        record.extend_from_slice(&job.payload);

        let file = self.current.as_mut().expect("segment opened above");
        file.write_all(&record)?;
        self.current_size += record.len() as u64;
        Ok(())
    }
}

struct QueueInner {
    jobs: VecDeque<SaveJob>,
    dropped: u64,
    closed: bool,
}

/// Bounded, mutex-and-condvar-protected queue shared between the assembler
/// (producer) and the writer thread (consumer).
pub struct SaveQueue {
    inner: Mutex<QueueInner>,
    not_empty: Condvar,
    dropped_bytes: AtomicU64,
}

impl SaveQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(SaveQueue {
            inner: Mutex::new(QueueInner {
                jobs: VecDeque::with_capacity(SAVEQ_MAX),
                dropped: 0,
                closed: false,
            }),
            not_empty: Condvar::new(),
            dropped_bytes: AtomicU64::new(0),
        })
    }

    /// Push `job`, dropping the oldest queued job if the queue is already at
    /// [`SAVEQ_MAX`].
    pub fn push(&self, job: SaveJob) {
        let mut inner = self.inner.lock();
        if inner.jobs.len() >= SAVEQ_MAX {
            if let Some(dropped) = inner.jobs.pop_front() {
                self.dropped_bytes
                    .fetch_add(dropped.payload.len() as u64, Ordering::Relaxed);
                inner.dropped += 1;
                warn!(dropped_total = inner.dropped, "save queue full, dropping oldest frame");
            }
        }
        inner.jobs.push_back(job);
        self.not_empty.notify_one();
    }

    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        self.not_empty.notify_all();
    }

    pub fn dropped_bytes(&self) -> u64 {
        self.dropped_bytes.load(Ordering::Relaxed)
    }

    /// Block until at least one job is available or the queue is closed,
    /// then drain up to [`SAVE_POP_BATCH`] jobs.
    fn pop_batch(&self) -> Vec<SaveJob> {
        let mut inner = self.inner.lock();
        loop {
            if !inner.jobs.is_empty() || inner.closed {
                break;
            }
            self.not_empty.wait(&mut inner);
        }
        let n = inner.jobs.len().min(SAVE_POP_BATCH);
        inner.jobs.drain(..n).collect()
    }

    fn is_closed_and_empty(&self) -> bool {
        let inner = self.inner.lock();
        inner.closed && inner.jobs.is_empty()
    }

    /// Total bytes currently queued but not yet committed by the writer
    /// thread, used by the server to decide when to enter drop mode.
    pub fn pending_bytes(&self) -> u64 {
        let inner = self.inner.lock();
        inner.jobs.iter().map(|j| j.payload.len() as u64).sum()
    }
}

/// Owns the writer thread. Dropping this joins the thread after closing the
/// queue, so all pending frames are flushed before teardown completes
/// (unless the caller calls [`Self::force_stop`] instead).
pub struct WriterHandle {
    queue: Arc<SaveQueue>,
    thread: Option<JoinHandle<()>>,
}

impl WriterHandle {
    /// Spawn the single dedicated writer thread, committing jobs to `sink`.
    pub fn spawn(mut sink: Box<dyn FrameSink>) -> (Arc<SaveQueue>, Self) {
        let queue = SaveQueue::new();
        let worker_queue = queue.clone();
        let thread = std::thread::spawn(move || {
            loop {
                let batch = worker_queue.pop_batch();
                if batch.is_empty() {
                    if worker_queue.is_closed_and_empty() {
                        break;
                    }
                    continue;
                }
                for job in batch {
                    if let Err(e) = sink.accept(job) {
                        warn!(error = %e, "frame write failed");
                    } else {
                        debug!("frame committed");
                    }
                }
            }
        });
        (
            queue.clone(),
            WriterHandle {
                queue,
                thread: Some(thread),
            },
        )
    }

    /// Close the queue and block until the writer thread drains it.
    pub fn join(mut self) {
        self.queue.close();
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}

impl Drop for WriterHandle {
    fn drop(&mut self) {
        self.queue.close();
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}

/// Ensures `path`'s parent directory exists; used by callers constructing a
/// sink outside of [`FileFrameWriter::new`]/[`SegmentFrameWriter::new`].
pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_writer_commits_atomically() {
        let dir = tempdir().unwrap();
        let mut sink = FileFrameWriter::new(dir.path()).unwrap();
        sink.accept(SaveJob {
            payload: vec![1, 2, 3],
        })
        .unwrap();
        let final_path = dir.path().join("frame_000001.jpg");
        assert!(final_path.exists());
        assert!(!dir.path().join("frame_000001.part").exists());
        assert_eq!(fs::read(final_path).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn file_writer_indexes_sequentially() {
        let dir = tempdir().unwrap();
        let mut sink = FileFrameWriter::new(dir.path()).unwrap();
        for i in 0..3 {
            sink.accept(SaveJob {
                payload: vec![i as u8],
            })
            .unwrap();
        }
        assert!(dir.path().join("frame_000001.jpg").exists());
        assert!(dir.path().join("frame_000002.jpg").exists());
        assert!(dir.path().join("frame_000003.jpg").exists());
    }

    #[test]
    fn segment_writer_appends_length_prefixed_records() {
        let dir = tempdir().unwrap();
        let mut sink = SegmentFrameWriter::new(dir.path()).unwrap();
        sink.accept(SaveJob {
            payload: vec![0xAA; 10],
        })
        .unwrap();
        sink.accept(SaveJob {
            payload: vec![0xBB; 5],
        })
        .unwrap();

        let files: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
        let data = fs::read(files[0].as_ref().unwrap().path()).unwrap();
        assert_eq!(&data[0..4], &10u32.to_be_bytes());
        assert_eq!(&data[4..14], &[0xAA; 10]);
        assert_eq!(&data[14..18], &5u32.to_be_bytes());
        assert_eq!(&data[18..23], &[0xBB; 5]);
    }

    #[test]
    fn queue_drops_oldest_when_full() {
        let queue = SaveQueue::new();
        for i in 0..SAVEQ_MAX + 5 {
            queue.push(SaveJob {
                payload: vec![i as u8],
            });
        }
        assert!(queue.dropped_bytes() > 0);
    }

    #[test]
    fn writer_thread_drains_on_join() {
        let dir = tempdir().unwrap();
        let sink = Box::new(FileFrameWriter::new(dir.path()).unwrap());
        let (queue, handle) = WriterHandle::spawn(sink);
        for i in 0..10 {
            queue.push(SaveJob {
                payload: vec![i as u8; 4],
            });
        }
        handle.join();
        assert!(dir.path().join("frame_000010.jpg").exists());
    }
}
