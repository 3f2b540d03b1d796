//! Historical logging of snapshots to files.

use crate::format::{format_bytes_short, format_throughput};
use crate::snapshot::Snapshot;
use anyhow::{Context, Result};
use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

fn create(path: &Path, what: &str) -> Result<BufWriter<File>> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .with_context(|| format!("Failed to create {} at {}", what, path.display()))?;
    Ok(BufWriter::new(file))
}

/// Writes one JSON object per snapshot.
pub struct JsonLinesLogger {
    writer: BufWriter<File>,
    snapshots_written: u64,
}

impl JsonLinesLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self {
            writer: create(path.as_ref(), "JSON log")?,
            snapshots_written: 0,
        })
    }

    pub fn log(&mut self, snapshot: &Snapshot) -> Result<()> {
        let json = serde_json::to_string(snapshot).context("Failed to serialize snapshot")?;
        writeln!(self.writer, "{}", json)?;
        self.snapshots_written += 1;

        // Flush every 10 snapshots
        if self.snapshots_written % 10 == 0 {
            self.writer.flush()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn snapshots_written(&self) -> u64 {
        self.snapshots_written
    }
}

impl Drop for JsonLinesLogger {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

/// Reads back a file produced by [`JsonLinesLogger`]. Blank lines are ignored.
pub fn read_json_lines<P: AsRef<Path>>(path: P) -> Result<Vec<Snapshot>> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;

    let mut snapshots = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let snapshot = serde_json::from_str(&line)
            .with_context(|| format!("Invalid snapshot on line {}", index + 1))?;
        snapshots.push(snapshot);
    }
    Ok(snapshots)
}

/// Fixed-width, human-readable log with one row per snapshot.
pub struct TextLogger {
    writer: BufWriter<File>,
    rows_written: u64,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut logger = Self {
            writer: create(path.as_ref(), "text log")?,
            rows_written: 0,
        };
        logger.write_header()?;
        Ok(logger)
    }

    fn write_header(&mut self) -> Result<()> {
        let w = &mut self.writer;
        writeln!(w, "# ltop log")?;
        writeln!(w, "# Started: {}", Utc::now().format("%Y-%m-%d %H:%M:%S UTC"))?;
        writeln!(w, "#")?;
        writeln!(w, "# Column Definitions:")?;
        writeln!(w, "#   Time     - Snapshot timestamp (HH:MM:SS UTC)")?;
        writeln!(w, "#   CPU%     - Total CPU utilization")?;
        writeln!(w, "#   Load1    - One minute load average")?;
        writeln!(w, "#   Mem%     - Memory used")?;
        writeln!(w, "#   Swap%    - Swap used")?;
        writeln!(w, "#   Procs    - Total processes")?;
        writeln!(w, "#   Run/Zmb  - Running and zombie processes")?;
        writeln!(w, "#   DiskRd   - Disk read throughput")?;
        writeln!(w, "#   DiskWr   - Disk write throughput")?;
        writeln!(w, "#   NetRx    - Network receive throughput")?;
        writeln!(w, "#   NetTx    - Network transmit throughput")?;
        writeln!(w, "#   Cache    - Page cache size")?;
        writeln!(w, "#   Err/Wrn  - Recent error and warning log entries")?;
        writeln!(w, "#")?;
        writeln!(
            w,
            "{:<8} {:>5} {:>6} {:>5} {:>5} {:>6} {:>7} {:>12} {:>12} {:>12} {:>12} {:>6} {:>7}",
            "Time", "CPU%", "Load1", "Mem%", "Swap%", "Procs", "Run/Zmb", "DiskRd", "DiskWr",
            "NetRx", "NetTx", "Cache", "Err/Wrn"
        )?;
        writeln!(w, "{}", "-".repeat(113))?;
        Ok(())
    }

    pub fn log(&mut self, snapshot: &Snapshot) -> Result<()> {
        let procs = &snapshot.processes;
        writeln!(
            self.writer,
            "{:<8} {:>5.1} {:>6.2} {:>5.1} {:>5.1} {:>6} {:>7} {:>12} {:>12} {:>12} {:>12} {:>6} {:>7}",
            snapshot.timestamp.format("%H:%M:%S"),
            snapshot.cpu.total_utilization,
            snapshot.cpu.load_avg.one,
            snapshot.memory.used_percent,
            snapshot.memory.swap.used_percent,
            procs.total,
            format!("{}/{}", procs.running, procs.zombie),
            format_throughput(snapshot.storage.total_read_bytes_per_sec),
            format_throughput(snapshot.storage.total_write_bytes_per_sec),
            format_throughput(snapshot.network.total_rx_bytes_per_sec),
            format_throughput(snapshot.network.total_tx_bytes_per_sec),
            format_bytes_short(snapshot.memory.cached),
            format!("{}/{}", snapshot.logs.error_count, snapshot.logs.warn_count),
        )?;
        self.rows_written += 1;

        // Flush every row for real-time tailing
        self.writer.flush()?;
        Ok(())
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }
}

impl Drop for TextLogger {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}
