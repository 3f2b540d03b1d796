//! Storage metrics: mounted filesystem capacity, disk I/O from
//! /proc/diskstats and block devices under /sys/block.

use super::{clamp_percent, per_second};
use crate::access::{FileSystem, PseudoFs};
use crate::error::CollectError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Instant;
use tracing::debug;

/// /proc/diskstats always counts 512-byte sectors, whatever the device's
/// logical block size.
const SECTOR_SIZE: u64 = 512;

const EXCLUDED_FSTYPES: &[&str] = &[
    "tmpfs",
    "devtmpfs",
    "sysfs",
    "proc",
    "devpts",
    "cgroup",
    "cgroup2",
    "pstore",
    "bpf",
    "tracefs",
    "securityfs",
    "debugfs",
    "configfs",
    "fusectl",
    "mqueue",
    "hugetlbfs",
    "autofs",
    "squashfs",
    "overlay",
    "nsfs",
];

const PSEUDO_MOUNT_ROOTS: &[&str] = &["/proc", "/sys", "/dev", "/run"];

/// Capacity of one mounted filesystem
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilesystemStats {
    pub device: String,
    pub mountpoint: String,
    pub fstype: String,
    pub total: u64,
    pub free: u64,
    pub used: u64,
    pub used_percent: f64,
}

/// Per-disk I/O statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiskIoStats {
    /// Device name (e.g., "sda", "nvme0n1")
    pub device: String,
    pub read_bytes_per_sec: f64,
    pub write_bytes_per_sec: f64,
    pub read_iops: f64,
    pub write_iops: f64,
    /// Average read latency in milliseconds
    pub read_latency_ms: f64,
    /// Average write latency in milliseconds
    pub write_latency_ms: f64,
    /// Share of wall time the device had I/O in flight
    pub iowait_percent: f64,
    pub ios_in_progress: u64,
    /// Total reads completed
    pub reads_completed: u64,
    /// Total writes completed
    pub writes_completed: u64,
    /// Total bytes read
    pub bytes_read: u64,
    /// Total bytes written
    pub bytes_written: u64,
}

/// A whole-disk block device from /sys/block
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlockDevice {
    pub device: String,
    pub size_bytes: Option<u64>,
    pub removable: Option<bool>,
    pub read_only: Option<bool>,
}

/// Raw disk statistics from /proc/diskstats
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawDiskStats {
    pub reads_completed: u64,
    pub reads_merged: u64,
    pub sectors_read: u64,
    pub time_reading_ms: u64,
    pub writes_completed: u64,
    pub writes_merged: u64,
    pub sectors_written: u64,
    pub time_writing_ms: u64,
    pub ios_in_progress: u64,
    pub time_doing_ios_ms: u64,
    pub weighted_time_ms: u64,
}

/// Aggregated storage metrics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageMetrics {
    pub filesystems: Vec<FilesystemStats>,
    pub disks: Vec<DiskIoStats>,
    pub block_devices: Vec<BlockDevice>,
    /// Total read throughput across all disks (bytes/sec)
    pub total_read_bytes_per_sec: f64,
    /// Total write throughput across all disks (bytes/sec)
    pub total_write_bytes_per_sec: f64,
    pub total_read_iops: f64,
    pub total_write_iops: f64,
}

/// Storage metrics collector with state for rate calculations
pub struct StorageCollector<F: FileSystem> {
    fs: PseudoFs<F>,
    prev_stats: HashMap<String, RawDiskStats>,
    prev_time: Option<Instant>,
}

impl<F: FileSystem> StorageCollector<F> {
    pub fn new(fs: PseudoFs<F>) -> Self {
        Self {
            fs,
            prev_stats: HashMap::new(),
            prev_time: None,
        }
    }

    /// Collect current storage metrics
    pub fn collect(&mut self) -> Result<StorageMetrics, CollectError> {
        self.collect_at(Instant::now())
    }

    /// Collect as if sampled at `now`.
    pub fn collect_at(&mut self, now: Instant) -> Result<StorageMetrics, CollectError> {
        let filesystems = self.collect_filesystems()?;
        let disks = self.collect_disk_io(now)?;
        let block_devices = self.collect_block_devices();

        Ok(StorageMetrics {
            total_read_bytes_per_sec: disks.iter().map(|d| d.read_bytes_per_sec).sum(),
            total_write_bytes_per_sec: disks.iter().map(|d| d.write_bytes_per_sec).sum(),
            total_read_iops: disks.iter().map(|d| d.read_iops).sum(),
            total_write_iops: disks.iter().map(|d| d.write_iops).sum(),
            filesystems,
            disks,
            block_devices,
        })
    }

    fn collect_filesystems(&self) -> Result<Vec<FilesystemStats>, CollectError> {
        let mounts = self.fs.read_lines(&self.fs.proc_path("mounts"))?;

        let mut seen: HashSet<String> = HashSet::new();
        let mut filesystems = Vec::new();

        for line in &mounts {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let [device, mountpoint, fstype, ..] = fields.as_slice() else {
                continue;
            };
            let device = unescape_mount_field(device);
            let mountpoint = unescape_mount_field(mountpoint);

            if seen.contains(&mountpoint) || !should_include_filesystem(&device, &mountpoint, fstype)
            {
                continue;
            }

            let usage = match self.fs.disk_usage(Path::new(&mountpoint)) {
                Ok(usage) => usage,
                Err(e) => {
                    debug!(mountpoint = %mountpoint, error = %e, "skipping unqueryable filesystem");
                    continue;
                }
            };

            seen.insert(mountpoint.clone());
            filesystems.push(FilesystemStats {
                device,
                mountpoint,
                fstype: fstype.to_string(),
                total: usage.total,
                free: usage.free,
                used: usage.used,
                used_percent: if usage.total > 0 {
                    clamp_percent(100.0 * usage.used as f64 / usage.total as f64)
                } else {
                    0.0
                },
            });
        }

        Ok(filesystems)
    }

    fn collect_disk_io(&mut self, now: Instant) -> Result<Vec<DiskIoStats>, CollectError> {
        let diskstats = self.fs.read_lines(&self.fs.proc_path("diskstats"))?;

        let elapsed = self
            .prev_time
            .map(|prev| now.saturating_duration_since(prev).as_secs_f64())
            .unwrap_or(0.0);

        let mut current_stats: HashMap<String, RawDiskStats> = HashMap::new();
        let mut disks = Vec::new();

        for line in &diskstats {
            let Some((device, stats)) = parse_diskstats_line(line) else {
                continue;
            };
            if !is_whole_disk(&device) {
                continue;
            }

            let mut entry = DiskIoStats {
                device: device.clone(),
                ios_in_progress: stats.ios_in_progress,
                reads_completed: stats.reads_completed,
                writes_completed: stats.writes_completed,
                bytes_read: stats.sectors_read.saturating_mul(SECTOR_SIZE),
                bytes_written: stats.sectors_written.saturating_mul(SECTOR_SIZE),
                ..Default::default()
            };

            if let Some(prev) = self.prev_stats.get(&device) {
                fill_rates(&mut entry, prev, &stats, elapsed);
            }

            current_stats.insert(device, stats);
            disks.push(entry);
        }

        disks.sort_by(|a, b| a.device.cmp(&b.device));

        self.prev_stats = current_stats;
        self.prev_time = Some(now);

        Ok(disks)
    }

    fn collect_block_devices(&self) -> Vec<BlockDevice> {
        let block = self.fs.sys_path("block");
        let names = match self.fs.list_dir(&block) {
            Ok(names) => names,
            Err(e) => {
                debug!(error = %e, "block device enumeration unavailable");
                return Vec::new();
            }
        };

        let mut devices: Vec<BlockDevice> = names
            .into_iter()
            .filter(|name| is_whole_disk(name))
            .map(|name| {
                let base = block.join(&name);
                let attr = |attr: &str| self.fs.read_trimmed(&base.join(attr)).ok();
                let flag = |attr_name: &str| attr(attr_name).map(|v| v == "1");
                BlockDevice {
                    size_bytes: attr("size")
                        .and_then(|s| s.parse::<u64>().ok())
                        .map(|sectors| sectors.saturating_mul(SECTOR_SIZE)),
                    removable: flag("removable"),
                    read_only: flag("ro"),
                    device: name,
                }
            })
            .collect();

        devices.sort_by(|a, b| a.device.cmp(&b.device));
        devices
    }
}

fn fill_rates(entry: &mut DiskIoStats, prev: &RawDiskStats, curr: &RawDiskStats, elapsed: f64) {
    let reads_delta = curr.reads_completed.saturating_sub(prev.reads_completed);
    let writes_delta = curr.writes_completed.saturating_sub(prev.writes_completed);
    let sectors_read_delta = curr.sectors_read.saturating_sub(prev.sectors_read);
    let sectors_written_delta = curr.sectors_written.saturating_sub(prev.sectors_written);
    let time_reading_delta = curr.time_reading_ms.saturating_sub(prev.time_reading_ms);
    let time_writing_delta = curr.time_writing_ms.saturating_sub(prev.time_writing_ms);
    let time_ios_delta = curr.time_doing_ios_ms.saturating_sub(prev.time_doing_ios_ms);

    entry.read_bytes_per_sec = per_second(sectors_read_delta.saturating_mul(SECTOR_SIZE), elapsed);
    entry.write_bytes_per_sec =
        per_second(sectors_written_delta.saturating_mul(SECTOR_SIZE), elapsed);
    entry.read_iops = per_second(reads_delta, elapsed);
    entry.write_iops = per_second(writes_delta, elapsed);

    if reads_delta > 0 {
        entry.read_latency_ms = time_reading_delta as f64 / reads_delta as f64;
    }
    if writes_delta > 0 {
        entry.write_latency_ms = time_writing_delta as f64 / writes_delta as f64;
    }

    if elapsed > 0.0 {
        entry.iowait_percent = clamp_percent(time_ios_delta as f64 / (elapsed * 1000.0) * 100.0);
    }
}

fn should_include_filesystem(device: &str, mountpoint: &str, fstype: &str) -> bool {
    if device.starts_with("/dev/loop") {
        return false;
    }
    let pseudo = PSEUDO_MOUNT_ROOTS
        .iter()
        .any(|root| Path::new(mountpoint).starts_with(root));
    !pseudo && !EXCLUDED_FSTYPES.contains(&fstype)
}

/// Decodes the octal escapes (`\040` for space, `\011`, `\012`, `\134`)
/// the kernel writes into /proc/mounts fields.
pub fn unescape_mount_field(field: &str) -> String {
    if !field.contains('\\') {
        return field.to_string();
    }

    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|d| (b'0'..=b'7').contains(d)) {
                let value = digits
                    .iter()
                    .fold(0u32, |acc, d| acc * 8 + u32::from(d - b'0'));
                if let Ok(byte) = u8::try_from(value) {
                    out.push(byte);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Whole disks only: no partitions, loop devices, ram disks or device-mapper.
pub fn is_whole_disk(device: &str) -> bool {
    if device.len() < 2
        || device.starts_with("loop")
        || device.starts_with("ram")
        || device.starts_with("dm-")
    {
        return false;
    }

    // nvme0n1 and mmcblk0 are disks; nvme0n1p2 and mmcblk0p1 are partitions
    if device.starts_with("nvme") || device.starts_with("mmcblk") {
        let digits = device.trim_end_matches(|c: char| c.is_ascii_digit());
        let has_digit_suffix = digits.len() < device.len();
        return !(has_digit_suffix && digits.ends_with('p'));
    }

    !device.ends_with(|c: char| c.is_ascii_digit())
}

/// Parses one diskstats line (major, minor, name, then at least 11 counters).
pub fn parse_diskstats_line(line: &str) -> Option<(String, RawDiskStats)> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 14 {
        return None;
    }
    let counters: Vec<u64> = parts[3..14]
        .iter()
        .map(|s| s.parse::<u64>())
        .collect::<Result<_, _>>()
        .ok()?;

    Some((
        parts[2].to_string(),
        RawDiskStats {
            reads_completed: counters[0],
            reads_merged: counters[1],
            sectors_read: counters[2],
            time_reading_ms: counters[3],
            writes_completed: counters[4],
            writes_merged: counters[5],
            sectors_written: counters[6],
            time_writing_ms: counters[7],
            ios_in_progress: counters[8],
            time_doing_ios_ms: counters[9],
            weighted_time_ms: counters[10],
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{DiskUsage, MockFs};
    use std::sync::Arc;
    use std::time::Duration;

    const MOUNTS: &str = "\
/dev/sda1 / ext4 rw,relatime 0 0
proc /proc proc rw 0 0
sysfs /sys sysfs rw 0 0
tmpfs /run tmpfs rw 0 0
/dev/loop0 /snap/core/1 squashfs ro 0 0
/dev/sda2 /home ext4 rw 0 0
/dev/sda2 /home ext4 rw 0 0
overlay /var/lib/docker/overlay2/x/merged overlay rw 0 0
/dev/sdb1 /mnt/broken ext4 rw 0 0
/dev/sdc1 /mnt/empty ext4 rw 0 0
";

    fn diskstats(sda: (u64, u64, u64, u64, u64)) -> String {
        let (reads, sectors_read, writes, sectors_written, io_ticks) = sda;
        format!(
            "   8       0 sda {} 0 {} 10 {} 0 {} 20 0 {} 30\n   8       1 sda1 5 0 5 0 5 0 5 0 0 5 5\n   7       0 loop0 1 0 1 0 1 0 1 0 0 1 1\n 259       0 nvme0n1 1 0 8 0 1 0 8 0 0 1 1\n 259       1 nvme0n1p1 1 0 8 0 1 0 8 0 0 1 1\n 253       0 dm-0 1 0 8 0 1 0 8 0 0 1 1\n",
            reads, sectors_read, writes, sectors_written, io_ticks
        )
    }

    fn setup() -> (Arc<MockFs>, StorageCollector<Arc<MockFs>>) {
        let mock = Arc::new(MockFs::new());
        mock.add_file("/proc/mounts", MOUNTS);
        mock.add_file("/proc/diskstats", diskstats((100, 1000, 50, 500, 0)));
        let usage = DiskUsage {
            total: 1000,
            free: 250,
            used: 750,
        };
        mock.set_disk_usage("/", usage);
        mock.set_disk_usage("/home", usage);
        mock.set_disk_usage("/mnt/empty", DiskUsage::default());
        let collector = StorageCollector::new(PseudoFs::new(Arc::clone(&mock)));
        (mock, collector)
    }

    #[test]
    fn filesystems_are_filtered_and_deduped() {
        let (_mock, mut collector) = setup();
        let metrics = collector.collect().unwrap();
        let mounts: Vec<&str> = metrics
            .filesystems
            .iter()
            .map(|f| f.mountpoint.as_str())
            .collect();
        assert_eq!(mounts, vec!["/", "/home", "/mnt/empty"]);
        assert!((metrics.filesystems[0].used_percent - 75.0).abs() < 1e-9);
        assert_eq!(metrics.filesystems[2].used_percent, 0.0);
    }

    #[test]
    fn first_observation_includes_zero_rates() {
        let (_mock, mut collector) = setup();
        let metrics = collector.collect().unwrap();
        let devices: Vec<&str> = metrics.disks.iter().map(|d| d.device.as_str()).collect();
        assert_eq!(devices, vec!["nvme0n1", "sda"]);
        assert!(metrics.disks.iter().all(|d| d.read_iops == 0.0));
        assert_eq!(metrics.disks[1].bytes_read, 1000 * 512);
    }

    #[test]
    fn rates_from_sector_deltas() {
        let (mock, mut collector) = setup();
        let start = Instant::now();
        collector.collect_at(start).unwrap();

        mock.add_file("/proc/diskstats", diskstats((300, 3000, 150, 1500, 500)));
        let metrics = collector
            .collect_at(start + Duration::from_secs(2))
            .unwrap();

        let sda = metrics.disks.iter().find(|d| d.device == "sda").unwrap();
        assert!((sda.read_bytes_per_sec - 2000.0 * 512.0 / 2.0).abs() < 1e-6);
        assert!((sda.write_bytes_per_sec - 1000.0 * 512.0 / 2.0).abs() < 1e-6);
        assert!((sda.read_iops - 100.0).abs() < 1e-9);
        assert!((sda.write_iops - 50.0).abs() < 1e-9);
        assert!((sda.iowait_percent - 25.0).abs() < 1e-9);
        assert!((metrics.total_read_iops - 100.0).abs() < 1e-9);
    }

    #[test]
    fn zero_deltas_yield_zero_rates() {
        let (_mock, mut collector) = setup();
        let start = Instant::now();
        collector.collect_at(start).unwrap();
        let metrics = collector
            .collect_at(start + Duration::from_secs(1))
            .unwrap();
        for disk in &metrics.disks {
            assert_eq!(disk.read_iops, 0.0);
            assert_eq!(disk.write_bytes_per_sec, 0.0);
            assert_eq!(disk.iowait_percent, 0.0);
        }

        let again = collector.collect_at(start + Duration::from_secs(1)).unwrap();
        assert!(again.disks.iter().all(|d| d.read_bytes_per_sec == 0.0));
    }

    #[test]
    fn block_devices_best_effort() {
        let (mock, mut collector) = setup();
        mock.add_file("/sys/block/sda/size", "1953525168\n");
        mock.add_file("/sys/block/sda/removable", "0\n");
        mock.add_file("/sys/block/sda/ro", "0\n");
        mock.add_dir("/sys/block/loop0");
        mock.add_dir("/sys/block/sr0");
        mock.add_file("/sys/block/mmcblk0/removable", "1\n");

        let metrics = collector.collect().unwrap();
        let names: Vec<&str> = metrics
            .block_devices
            .iter()
            .map(|b| b.device.as_str())
            .collect();
        assert_eq!(names, vec!["mmcblk0", "sda"]);
        assert_eq!(metrics.block_devices[1].size_bytes, Some(1953525168 * 512));
        assert_eq!(metrics.block_devices[1].read_only, Some(false));
        assert_eq!(metrics.block_devices[0].removable, Some(true));
        assert_eq!(metrics.block_devices[0].size_bytes, None);
    }

    #[test]
    fn missing_diskstats_is_fatal() {
        let (mock, mut collector) = setup();
        mock.remove_file("/proc/diskstats");
        assert!(collector.collect().is_err());
    }

    #[test]
    fn whole_disk_rule() {
        assert!(is_whole_disk("sda"));
        assert!(is_whole_disk("vdb"));
        assert!(is_whole_disk("nvme0n1"));
        assert!(is_whole_disk("mmcblk0"));
        assert!(!is_whole_disk("sda1"));
        assert!(!is_whole_disk("nvme0n1p2"));
        assert!(!is_whole_disk("mmcblk0p1"));
        assert!(!is_whole_disk("loop3"));
        assert!(!is_whole_disk("ram0"));
        assert!(!is_whole_disk("dm-1"));
    }

    #[test]
    fn escaped_mountpoints_are_decoded() {
        let (mock, mut collector) = setup();
        mock.add_file(
            "/proc/mounts",
            "/dev/sdb1 /media/My\\040Disk ext4 rw 0 0\n/dev/sdb1 /media/My\\040Disk ext4 rw 0 0\n",
        );
        mock.set_disk_usage(
            "/media/My Disk",
            DiskUsage {
                total: 200,
                free: 50,
                used: 150,
            },
        );

        let metrics = collector.collect().unwrap();
        assert_eq!(metrics.filesystems.len(), 1);
        assert_eq!(metrics.filesystems[0].mountpoint, "/media/My Disk");
        assert!((metrics.filesystems[0].used_percent - 75.0).abs() < 1e-9);
    }

    #[test]
    fn unescape_rules() {
        assert_eq!(unescape_mount_field("/plain"), "/plain");
        assert_eq!(unescape_mount_field("/a\\011b\\012c"), "/a\tb\nc");
        assert_eq!(unescape_mount_field("/back\\134slash"), "/back\\slash");
        // Not a full escape, kept verbatim
        assert_eq!(unescape_mount_field("/odd\\04"), "/odd\\04");
        assert_eq!(unescape_mount_field("/odd\\089"), "/odd\\089");
    }
}
