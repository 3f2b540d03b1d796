use ltop::access::{DiskUsage, MockFs, PseudoFs};
use ltop::metrics::logs::{JournalSource, LogCollector};
use ltop::metrics::LogLevel;
use ltop::monitor::{self, Monitor};
use ltop::process::SystemConstants;
use ltop::snapshot::Section;
use std::io;
use std::sync::Arc;
use std::time::Duration;

const NETDEV_HEADER: &str = "Inter-|   Receive                                                |  Transmit\n face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed\n";

fn stat_line(pid: u32, comm: &str, state: char, utime: u64, starttime: u64) -> String {
    let mut fields: Vec<String> = vec![state.to_string(), "1".into()];
    fields.extend(["0"; 9].iter().map(|s| s.to_string()));
    fields.push(utime.to_string()); // utime
    fields.push("0".into()); // stime
    fields.extend(["0", "0", "20", "0", "1", "0"].iter().map(|s| s.to_string()));
    fields.push(starttime.to_string());
    fields.push("4096000".into()); // vsize
    fields.push("256".into()); // rss pages
    while fields.len() < 50 {
        fields.push("0".into());
    }
    format!("{} ({}) {}", pid, comm, fields.join(" "))
}

struct NoJournal;

impl JournalSource for NoJournal {
    fn recent(&self, _limit: usize) -> io::Result<String> {
        Err(io::Error::new(io::ErrorKind::NotFound, "journalctl not installed"))
    }
}

fn system() -> Arc<MockFs> {
    let fs = Arc::new(MockFs::new());
    fs.add_file(
        "/proc/stat",
        "cpu  1000 100 500 8000 400 0 0 0 0 0\ncpu0 1000 100 500 8000 400 0 0 0 0 0\nctxt 5000\nintr 700\n",
    );
    fs.add_file("/proc/loadavg", "0.50 0.40 0.30 1/120 4242\n");
    fs.add_file("/proc/uptime", "5000.00 9000.00\n");
    fs.add_file("/proc/sys/kernel/hostname", "testbox\n");
    fs.add_file("/proc/cpuinfo", "processor\t: 0\nmodel name\t: Test CPU\n");
    fs.add_file(
        "/proc/meminfo",
        "MemTotal: 8000000 kB\nMemFree: 1000000 kB\nMemAvailable: 4000000 kB\nBuffers: 100000 kB\nCached: 2000000 kB\nSwapTotal: 1000000 kB\nSwapFree: 1000000 kB\n",
    );
    fs.add_process(10, &stat_line(10, "busy", 'R', 100, 50), "", "busy\0--fast\0");
    fs.add_process(20, &stat_line(20, "idle", 'S', 10, 60), "", "");
    fs.add_file("/proc/mounts", "/dev/sda1 / ext4 rw 0 0\nproc /proc proc rw 0 0\n");
    fs.set_disk_usage(
        "/",
        DiskUsage {
            total: 4000,
            free: 1000,
            used: 3000,
        },
    );
    fs.add_file(
        "/proc/diskstats",
        "   8       0 sda 100 0 1000 10 50 0 500 20 0 30 30\n",
    );
    fs.add_file(
        "/proc/net/dev",
        format!("{}  eth0: 5000 10 0 0 0 0 0 0 3000 8 0 0 0 0 0 0\n    lo: 1 1 0 0 0 0 0 0 1 1 0 0 0 0 0 0\n", NETDEV_HEADER),
    );
    fs.add_file(
        "/var/log/app.log",
        "2026-01-01T10:00:00Z web sshd[123]: Failed password for root\n\
         not a log line\n\
         2026-01-01T10:00:05Z web cron[5]: job started\n",
    );
    fs
}

fn monitor(fs: &Arc<MockFs>) -> Monitor<Arc<MockFs>> {
    let pseudo = PseudoFs::new(Arc::clone(fs));
    let sources = vec!["/var/log/app.log".to_string(), "journal".to_string()];
    let logs = LogCollector::with_journal(pseudo.clone(), &sources, 50, Box::new(NoJournal));
    Monitor::new(pseudo, SystemConstants::default(), &sources, 50).with_log_collector(logs)
}

#[test]
fn first_cycle_populates_every_section() {
    let fs = system();
    let snapshot = monitor(&fs).collect();

    assert!(snapshot.errors.is_empty(), "{:?}", snapshot.errors);
    assert_eq!(snapshot.overview.hostname, "testbox");
    assert_eq!(snapshot.overview.cpu_cores, 1);

    // No previous sample yet
    assert_eq!(snapshot.cpu.total_utilization, 0.0);
    assert_eq!(snapshot.cpu.load_avg.one, 0.5);
    assert!((snapshot.memory.used_percent - 50.0).abs() < 1e-9);

    assert_eq!(snapshot.processes.total, 2);
    assert_eq!(snapshot.processes.running, 1);
    assert!(snapshot.processes.processes.iter().all(|p| p.cpu_percent == 0.0));
    let busy = &snapshot.processes.processes[0];
    assert_eq!(busy.pid, 10);
    assert_eq!(busy.command, "busy --fast");
    assert!(busy.memory_percent > 0.0);

    assert_eq!(snapshot.storage.filesystems.len(), 1);
    assert!((snapshot.storage.filesystems[0].used_percent - 75.0).abs() < 1e-9);
    assert_eq!(snapshot.storage.total_read_bytes_per_sec, 0.0);

    let names: Vec<&str> = snapshot
        .network
        .interfaces
        .iter()
        .map(|i| i.interface.as_str())
        .collect();
    assert_eq!(names, vec!["eth0"]);

    assert_eq!(snapshot.logs.entries.len(), 2);
    assert_eq!(snapshot.logs.entries[0].service, "cron");
    assert_eq!(snapshot.logs.entries[1].level, LogLevel::Err);
    assert_eq!(snapshot.logs.error_count, 1);
}

#[test]
fn second_cycle_derives_rates() {
    let fs = system();
    let mut monitor = monitor(&fs);
    monitor.collect();

    fs.add_file(
        "/proc/stat",
        "cpu  1100 100 600 8200 500 0 0 0 0 0\ncpu0 1100 100 600 8200 500 0 0 0 0 0\nctxt 5100\nintr 800\n",
    );
    fs.add_file("/proc/10/stat", stat_line(10, "busy", 'R', 175, 50));
    fs.add_file(
        "/proc/diskstats",
        "   8       0 sda 200 0 3000 10 50 0 500 20 0 30 30\n",
    );

    let snapshot = monitor.collect();
    assert!((snapshot.cpu.total_utilization - 40.0).abs() < 1e-9);

    let busy = &snapshot.processes.processes[0];
    assert_eq!(busy.pid, 10);
    assert!((busy.cpu_percent - 15.0).abs() < 1e-9);

    let sda = &snapshot.storage.disks[0];
    assert!(sda.read_bytes_per_sec.is_finite() && sda.read_bytes_per_sec >= 0.0);
    assert!(sda.iowait_percent >= 0.0 && sda.iowait_percent <= 100.0);
    assert!(snapshot.network.total_rx_bytes_per_sec.is_finite());
}

#[test]
fn failing_section_does_not_block_others() {
    let fs = system();
    fs.remove_file("/proc/net/dev");

    let snapshot = monitor(&fs).collect();
    assert!(snapshot.is_degraded(Section::Network));
    assert_eq!(snapshot.errors.len(), 1);
    assert!(snapshot.network.interfaces.is_empty());
    assert_eq!(snapshot.processes.total, 2);
}

#[tokio::test]
async fn worker_publishes_until_shutdown() {
    let fs = system();
    let (handle, task) = monitor::spawn(monitor(&fs), Duration::from_millis(10));
    let mut updates = handle.subscribe();

    for _ in 0..2 {
        tokio::time::timeout(Duration::from_secs(5), updates.changed())
            .await
            .expect("no snapshot published")
            .unwrap();
    }
    let latest = handle.latest().expect("latest snapshot");
    assert_eq!(latest.overview.hostname, "testbox");

    handle.pause();
    assert!(handle.is_paused());
    handle.resume();
    assert!(!handle.is_paused());

    handle.shutdown();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("worker did not stop")
        .unwrap();
}

#[tokio::test]
async fn paused_worker_stops_publishing() {
    let fs = system();
    let (handle, task) = monitor::spawn(monitor(&fs), Duration::from_millis(10));
    let mut updates = handle.subscribe();

    tokio::time::timeout(Duration::from_secs(5), updates.changed())
        .await
        .expect("no snapshot published")
        .unwrap();

    handle.pause();
    // Let any in-flight cycle land, then drain the notification
    tokio::time::sleep(Duration::from_millis(100)).await;
    let _ = updates.borrow_and_update();

    let quiet = tokio::time::timeout(Duration::from_millis(100), updates.changed()).await;
    assert!(quiet.is_err(), "snapshot published while paused");

    handle.shutdown();
    task.await.unwrap();
}
