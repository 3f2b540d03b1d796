//! Collection cycle orchestration.
//!
//! [`Monitor`] runs every collector once and assembles a [`Snapshot`].
//! [`spawn`] drives it on a fixed interval from a tokio task and publishes
//! each finished snapshot through a watch channel.

use crate::access::{FileSystem, PseudoFs};
use crate::error::CollectError;
use crate::metrics::{
    CpuCollector, LogCollector, MemoryCollector, NetworkCollector, OverviewProbe,
    StorageCollector,
};
use crate::process::{ProcessCollector, SystemConstants};
use crate::snapshot::{Section, SectionError, Snapshot};
use chrono::Utc;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Owns every collector and its previous-sample state.
pub struct Monitor<F: FileSystem> {
    overview: OverviewProbe<F>,
    cpu: CpuCollector<F>,
    memory: MemoryCollector<F>,
    processes: ProcessCollector<F>,
    storage: StorageCollector<F>,
    network: NetworkCollector<F>,
    logs: LogCollector<F>,
    cycles: u64,
}

impl<F: FileSystem> Monitor<F> {
    pub fn new(
        fs: PseudoFs<F>,
        constants: SystemConstants,
        log_sources: &[String],
        max_log_entries: usize,
    ) -> Self {
        Self {
            overview: OverviewProbe::new(fs.clone()),
            cpu: CpuCollector::new(fs.clone()),
            memory: MemoryCollector::new(fs.clone()),
            processes: ProcessCollector::new(fs.clone(), constants),
            storage: StorageCollector::new(fs.clone()),
            network: NetworkCollector::new(fs.clone()),
            logs: LogCollector::new(fs, log_sources, max_log_entries),
            cycles: 0,
        }
    }

    /// Replaces the log collector, e.g. to supply a different journal source.
    pub fn with_log_collector(mut self, logs: LogCollector<F>) -> Self {
        self.logs = logs;
        self
    }

    /// Number of completed [`collect`](Self::collect) calls.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Runs one full cycle. Never fails: a collector error leaves its
    /// section at the default value and is recorded in `errors`.
    pub fn collect(&mut self) -> Snapshot {
        let mut errors = Vec::new();

        let overview = self.overview.collect();
        let cpu = section(Section::Cpu, self.cpu.collect(), &mut errors);
        let memory = section(Section::Memory, self.memory.collect(), &mut errors);
        let mut processes = section(Section::Processes, self.processes.collect(), &mut errors);
        let storage = section(Section::Storage, self.storage.collect(), &mut errors);
        let network = section(Section::Network, self.network.collect(), &mut errors);
        let logs = self.logs.collect();

        processes.apply_memory_total(memory.total);
        self.cycles += 1;
        debug!(cycle = self.cycles, failed = errors.len(), "collection cycle finished");

        Snapshot {
            timestamp: Utc::now(),
            overview,
            cpu,
            memory,
            processes,
            storage,
            network,
            logs,
            errors,
        }
    }
}

fn section<T: Default>(
    section: Section,
    result: Result<T, CollectError>,
    errors: &mut Vec<SectionError>,
) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            warn!(section = %section, error = %e, "collector failed");
            errors.push(SectionError {
                section,
                message: e.to_string(),
            });
            T::default()
        }
    }
}

/// Control surface of a running monitor task.
pub struct MonitorHandle {
    latest: watch::Receiver<Option<Arc<Snapshot>>>,
    paused: Arc<AtomicBool>,
    shutdown: oneshot::Sender<()>,
}

impl MonitorHandle {
    /// Most recent completed snapshot, if any cycle has finished.
    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.latest.borrow().clone()
    }

    /// A receiver notified after every completed cycle.
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<Snapshot>>> {
        self.latest.clone()
    }

    /// Stops starting new cycles. A cycle already running completes.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Asks the worker to exit once any in-flight cycle has finished.
    /// Dropping the handle has the same effect.
    pub fn shutdown(self) {
        let _ = self.shutdown.send(());
    }
}

/// Starts the periodic worker. The first cycle runs immediately.
pub fn spawn<F>(monitor: Monitor<F>, interval: Duration) -> (MonitorHandle, JoinHandle<()>)
where
    F: FileSystem + 'static,
{
    let (tx, rx) = watch::channel(None);
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let paused = Arc::new(AtomicBool::new(false));

    let task = tokio::spawn(run(
        monitor,
        interval.max(Duration::from_millis(1)),
        tx,
        Arc::clone(&paused),
        shutdown_rx,
    ));

    let handle = MonitorHandle {
        latest: rx,
        paused,
        shutdown: shutdown_tx,
    };
    (handle, task)
}

/// Waits for the next published snapshot. Returns `None` once `stop`
/// completes or the worker has exited. `stop` is polled first, so it wins
/// over a snapshot that is already waiting.
pub async fn next_snapshot<S: Future>(
    updates: &mut watch::Receiver<Option<Arc<Snapshot>>>,
    stop: Pin<&mut S>,
) -> Option<Arc<Snapshot>> {
    tokio::select! {
        biased;
        _ = stop => None,
        changed = updates.changed() => {
            changed.ok()?;
            updates.borrow_and_update().clone()
        }
    }
}

async fn run<F>(
    mut monitor: Monitor<F>,
    interval: Duration,
    tx: watch::Sender<Option<Arc<Snapshot>>>,
    paused: Arc<AtomicBool>,
    mut shutdown: oneshot::Receiver<()>,
) where
    F: FileSystem + 'static,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(interval_ms = interval.as_millis() as u64, "monitor started");

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            _ = ticker.tick() => {}
        }

        if paused.load(Ordering::SeqCst) {
            continue;
        }

        // Collectors do blocking file reads and may spawn journalctl
        let cycle = tokio::task::spawn_blocking(move || {
            let snapshot = monitor.collect();
            (monitor, snapshot)
        })
        .await;

        match cycle {
            Ok((returned, snapshot)) => {
                monitor = returned;
                tx.send_replace(Some(Arc::new(snapshot)));
            }
            Err(e) => {
                error!(error = %e, "collection task failed");
                break;
            }
        }
    }

    info!("monitor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::MockFs;

    fn empty_monitor() -> Monitor<MockFs> {
        Monitor::new(PseudoFs::new(MockFs::new()), SystemConstants::default(), &[], 10)
    }

    #[test]
    fn missing_sources_degrade_every_section() {
        let mut monitor = empty_monitor();
        let snapshot = monitor.collect();

        let failed: Vec<Section> = snapshot.errors.iter().map(|e| e.section).collect();
        assert_eq!(
            failed,
            vec![
                Section::Cpu,
                Section::Memory,
                Section::Processes,
                Section::Storage,
                Section::Network
            ]
        );
        assert_eq!(snapshot.cpu.total_utilization, 0.0);
        assert!(snapshot.processes.processes.is_empty());
        assert!(snapshot.logs.entries.is_empty());
        assert_eq!(monitor.cycles(), 1);
    }

    #[test]
    fn timestamps_increase_between_cycles() {
        let mut monitor = empty_monitor();
        let first = monitor.collect();
        let second = monitor.collect();
        assert!(second.timestamp >= first.timestamp);
        assert_eq!(monitor.cycles(), 2);
    }

    #[tokio::test]
    async fn stop_fired_between_waits_is_not_lost() {
        let (tx, mut rx) = watch::channel(None);
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        tokio::pin!(stop_rx);

        tx.send_replace(Some(Arc::new(Snapshot::default())));
        assert!(next_snapshot(&mut rx, stop_rx.as_mut()).await.is_some());

        // Stop arrives while the caller is busy, then another snapshot lands
        stop_tx.send(()).unwrap();
        tx.send_replace(Some(Arc::new(Snapshot::default())));
        assert!(next_snapshot(&mut rx, stop_rx.as_mut()).await.is_none());
    }

    #[tokio::test]
    async fn worker_exit_ends_the_wait() {
        let (tx, mut rx) = watch::channel::<Option<Arc<Snapshot>>>(None);
        let stop = std::future::pending::<()>();
        tokio::pin!(stop);

        drop(tx);
        assert!(next_snapshot(&mut rx, stop.as_mut()).await.is_none());
    }
}
