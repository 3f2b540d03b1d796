//! Network I/O metrics collection from /proc/net/dev and /sys/class/net.

use super::per_second;
use crate::access::{FileSystem, PseudoFs};
use crate::error::CollectError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;
use tracing::debug;

/// Virtual interfaces created by container runtimes and hypervisors.
const EXCLUDED_PREFIXES: &[&str] = &["docker", "br-", "veth", "virbr", "tap", "tun"];

/// Per-interface network statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InterfaceStats {
    /// Interface name (e.g., "eth0", "ens5")
    pub interface: String,
    pub rx_bytes_per_sec: f64,
    pub tx_bytes_per_sec: f64,
    pub rx_packets_per_sec: f64,
    pub tx_packets_per_sec: f64,
    pub rx_errors: u64,
    pub tx_errors: u64,
    pub rx_drops: u64,
    pub tx_drops: u64,
    /// Total bytes received
    pub rx_bytes_total: u64,
    /// Total bytes transmitted
    pub tx_bytes_total: u64,
    pub rx_packets_total: u64,
    pub tx_packets_total: u64,
    /// Operational state ("up", "down", ...)
    pub operstate: Option<String>,
    /// Link speed in bits per second
    pub speed_bps: Option<u64>,
    pub mtu: Option<u32>,
    pub duplex: Option<String>,
}

/// Raw interface counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawInterfaceStats {
    pub rx_bytes: u64,
    pub rx_packets: u64,
    pub rx_errors: u64,
    pub rx_drops: u64,
    pub tx_bytes: u64,
    pub tx_packets: u64,
    pub tx_errors: u64,
    pub tx_drops: u64,
}

/// TCP statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TcpStats {
    /// Number of established connections (IPv4 and IPv6)
    pub connections_established: u64,
    /// Cumulative retransmitted segments
    pub retransmits: u64,
    pub retransmits_delta: Option<u64>,
}

/// Aggregated network metrics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkMetrics {
    pub interfaces: Vec<InterfaceStats>,
    /// Total receive throughput (bytes/sec)
    pub total_rx_bytes_per_sec: f64,
    /// Total transmit throughput (bytes/sec)
    pub total_tx_bytes_per_sec: f64,
    pub total_rx_bytes: u64,
    pub total_tx_bytes: u64,
    pub tcp: TcpStats,
}

/// Network metrics collector with state for rate calculations
pub struct NetworkCollector<F: FileSystem> {
    fs: PseudoFs<F>,
    prev_stats: HashMap<String, RawInterfaceStats>,
    prev_time: Option<Instant>,
    prev_retransmits: Option<u64>,
}

impl<F: FileSystem> NetworkCollector<F> {
    pub fn new(fs: PseudoFs<F>) -> Self {
        Self {
            fs,
            prev_stats: HashMap::new(),
            prev_time: None,
            prev_retransmits: None,
        }
    }

    /// Collect current network metrics
    pub fn collect(&mut self) -> Result<NetworkMetrics, CollectError> {
        self.collect_at(Instant::now())
    }

    /// Collect as if sampled at `now`.
    pub fn collect_at(&mut self, now: Instant) -> Result<NetworkMetrics, CollectError> {
        let lines = self.fs.read_lines(&self.fs.proc_path("net/dev"))?;

        let elapsed = self
            .prev_time
            .map(|prev| now.saturating_duration_since(prev).as_secs_f64())
            .unwrap_or(0.0);

        let mut current_stats: HashMap<String, RawInterfaceStats> = HashMap::new();
        let mut interfaces = Vec::new();

        // Skip header lines
        for line in lines.iter().skip(2) {
            let Some((interface, stats)) = parse_netdev_line(line) else {
                debug!(line = %line, "skipping malformed net/dev line");
                continue;
            };

            if is_excluded(&interface) {
                continue;
            }

            let mut entry = InterfaceStats {
                interface: interface.clone(),
                rx_errors: stats.rx_errors,
                tx_errors: stats.tx_errors,
                rx_drops: stats.rx_drops,
                tx_drops: stats.tx_drops,
                rx_bytes_total: stats.rx_bytes,
                tx_bytes_total: stats.tx_bytes,
                rx_packets_total: stats.rx_packets,
                tx_packets_total: stats.tx_packets,
                ..Default::default()
            };

            if let Some(prev) = self.prev_stats.get(&interface) {
                entry.rx_bytes_per_sec =
                    per_second(stats.rx_bytes.saturating_sub(prev.rx_bytes), elapsed);
                entry.tx_bytes_per_sec =
                    per_second(stats.tx_bytes.saturating_sub(prev.tx_bytes), elapsed);
                entry.rx_packets_per_sec =
                    per_second(stats.rx_packets.saturating_sub(prev.rx_packets), elapsed);
                entry.tx_packets_per_sec =
                    per_second(stats.tx_packets.saturating_sub(prev.tx_packets), elapsed);
            }

            self.read_link_attributes(&mut entry);
            current_stats.insert(interface, stats);
            interfaces.push(entry);
        }

        interfaces.sort_by(|a, b| a.interface.cmp(&b.interface));

        let tcp = self.collect_tcp_stats();

        self.prev_stats = current_stats;
        self.prev_time = Some(now);

        Ok(NetworkMetrics {
            total_rx_bytes_per_sec: interfaces.iter().map(|i| i.rx_bytes_per_sec).sum(),
            total_tx_bytes_per_sec: interfaces.iter().map(|i| i.tx_bytes_per_sec).sum(),
            total_rx_bytes: interfaces.iter().map(|i| i.rx_bytes_total).sum(),
            total_tx_bytes: interfaces.iter().map(|i| i.tx_bytes_total).sum(),
            interfaces,
            tcp,
        })
    }

    fn read_link_attributes(&self, entry: &mut InterfaceStats) {
        let base = self.fs.sys_path("class/net").join(&entry.interface);
        let attr = |name: &str| self.fs.read_trimmed(&base.join(name)).ok();

        entry.operstate = attr("operstate");
        // Reads as -1 (or EINVAL) when the link is down
        entry.speed_bps = attr("speed")
            .and_then(|s| s.parse::<i64>().ok())
            .filter(|mbps| *mbps > 0)
            .and_then(|mbps| (mbps as u64).checked_mul(1_000_000));
        entry.mtu = attr("mtu").and_then(|s| s.parse().ok());
        entry.duplex = attr("duplex");
    }

    fn collect_tcp_stats(&mut self) -> TcpStats {
        let mut established: u64 = 0;
        for table in ["net/tcp", "net/tcp6"] {
            let Ok(lines) = self.fs.read_lines(&self.fs.proc_path(table)) else {
                continue;
            };
            // State is in hex, 01 = ESTABLISHED
            established += lines
                .iter()
                .skip(1)
                .filter(|line| line.split_whitespace().nth(3) == Some("01"))
                .count() as u64;
        }

        let retransmits = self
            .fs
            .read_lines(&self.fs.proc_path("net/snmp"))
            .ok()
            .and_then(|lines| parse_retransmits(&lines))
            .unwrap_or(0);

        let retransmits_delta = self
            .prev_retransmits
            .map(|prev| retransmits.saturating_sub(prev));
        self.prev_retransmits = Some(retransmits);

        TcpStats {
            connections_established: established,
            retransmits,
            retransmits_delta,
        }
    }
}

fn is_excluded(interface: &str) -> bool {
    interface == "lo" || EXCLUDED_PREFIXES.iter().any(|p| interface.starts_with(p))
}

/// Parses one `name: <16 counters>` line of net/dev.
pub fn parse_netdev_line(line: &str) -> Option<(String, RawInterfaceStats)> {
    let (name, counters) = line.split_once(':')?;
    let parts: Vec<u64> = counters
        .split_whitespace()
        .map(|s| s.parse::<u64>())
        .collect::<Result<_, _>>()
        .ok()?;
    if parts.len() < 16 {
        return None;
    }

    Some((
        name.trim().to_string(),
        RawInterfaceStats {
            rx_bytes: parts[0],
            rx_packets: parts[1],
            rx_errors: parts[2],
            rx_drops: parts[3],
            tx_bytes: parts[8],
            tx_packets: parts[9],
            tx_errors: parts[10],
            tx_drops: parts[11],
        },
    ))
}

/// RetransSegs from the second `Tcp:` line, located by the header row.
fn parse_retransmits(lines: &[String]) -> Option<u64> {
    let mut tcp = lines.iter().filter(|l| l.starts_with("Tcp:"));
    let header = tcp.next()?;
    let values = tcp.next()?;
    let index = header
        .split_whitespace()
        .position(|field| field == "RetransSegs")?;
    values.split_whitespace().nth(index)?.parse().ok()
}
