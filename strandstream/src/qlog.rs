//! Optional newline-delimited JSON event log for path and FSM transitions,
//! in the style of the qlog event-stream format: one self-contained JSON
//! object per line, each carrying its own timestamp and category.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;
use serde_json::Value;

use crate::error::Result;
use crate::metric::Grade;
use crate::path::PathId;

#[derive(Debug, Serialize)]
#[serde(tag = "category")]
enum Event {
    #[serde(rename = "path_grade")]
    PathGrade {
        time_us: u64,
        path: PathId,
        grade: &'static str,
        rtt_ms: f64,
        loss_pct: f64,
    },
    #[serde(rename = "primary_switch")]
    PrimarySwitch {
        time_us: u64,
        from: Option<PathId>,
        to: PathId,
    },
    #[serde(rename = "frame_resync")]
    FrameResync { time_us: u64, stream_id: u64 },
    #[serde(rename = "writer_drop")]
    WriterDrop { time_us: u64, dropped_bytes: u64 },
}

fn grade_name(g: Grade) -> &'static str {
    match g {
        Grade::Good => "good",
        Grade::Warn => "warn",
        Grade::Bad => "bad",
    }
}

/// A qlog-style writer. Each `log_*` call appends exactly one JSON line and
/// flushes, so a crash never leaves a half-written record.
pub struct QlogWriter {
    out: BufWriter<File>,
}

impl QlogWriter {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::create(path)?;
        Ok(QlogWriter {
            out: BufWriter::new(file),
        })
    }

    fn write_event(&mut self, event: Event) -> Result<()> {
        let mut line = serde_json::to_string(&event)?;
        line.push('\n');
        self.out.write_all(line.as_bytes())?;
        self.out.flush()?;
        Ok(())
    }

    pub fn log_path_grade(
        &mut self,
        time_us: u64,
        path: PathId,
        grade: Grade,
        rtt_ms: f64,
        loss_pct: f64,
    ) -> Result<()> {
        self.write_event(Event::PathGrade {
            time_us,
            path,
            grade: grade_name(grade),
            rtt_ms,
            loss_pct,
        })
    }

    pub fn log_primary_switch(&mut self, time_us: u64, from: Option<PathId>, to: PathId) -> Result<()> {
        self.write_event(Event::PrimarySwitch { time_us, from, to })
    }

    pub fn log_frame_resync(&mut self, time_us: u64, stream_id: u64) -> Result<()> {
        self.write_event(Event::FrameResync { time_us, stream_id })
    }

    pub fn log_writer_drop(&mut self, time_us: u64, dropped_bytes: u64) -> Result<()> {
        self.write_event(Event::WriterDrop {
            time_us,
            dropped_bytes,
        })
    }
}

/// Parse one previously-written qlog line back into a generic [`Value`],
/// used by tests to assert on emitted events without round-tripping through
/// the `Event` enum's exact shape.
pub fn parse_line(line: &str) -> Result<Value> {
    Ok(serde_json::from_str(line)?)
}
