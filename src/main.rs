//! ltop - Linux system monitor CLI.
//!
//! Prints periodic snapshots of CPU, memory, process, storage, network and
//! log activity, optionally logging them to files, and exposes process
//! control as subcommands.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ltop::access::{PseudoFs, RealFs};
use ltop::config::AppConfig;
use ltop::control;
use ltop::format::{
    format_bytes, format_count, format_duration, format_throughput, truncate,
};
use ltop::logging::{JsonLinesLogger, TextLogger};
use ltop::monitor::{self, Monitor};
use ltop::process::SystemConstants;
use ltop::Snapshot;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Linux system monitor reading /proc and /sys
#[derive(Parser, Debug)]
#[command(name = "ltop")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Sampling interval in seconds (overrides the config file)
    #[arg(short = 'i', long)]
    interval: Option<f64>,

    /// Run for the given number of seconds, then exit
    #[arg(short, long)]
    duration: Option<u64>,

    /// Print each snapshot as one JSON line instead of a text block
    #[arg(long)]
    json: bool,

    /// Append snapshots to a JSON Lines file
    #[arg(short, long)]
    log: Option<PathBuf>,

    /// Append a fixed-width summary row per snapshot to a text file
    #[arg(short = 'o', long)]
    text_log: Option<PathBuf>,

    /// Log source, a file path or "journal" (repeatable, replaces the configured list)
    #[arg(long = "log-source")]
    log_sources: Vec<String>,

    /// Maximum number of log entries kept per snapshot
    #[arg(long)]
    max_log_entries: Option<usize>,

    /// Number of processes shown in text output
    #[arg(long, default_value = "5")]
    top: usize,

    #[command(subcommand)]
    command: Option<Command>,
}

/// Process control
#[derive(Subcommand, Debug)]
enum Command {
    /// Send SIGTERM
    Terminate { pid: u32 },
    /// Send SIGKILL
    Kill { pid: u32 },
    /// Send SIGSTOP
    Stop { pid: u32 },
    /// Send SIGCONT
    Resume { pid: u32 },
    /// Print the nice value
    Priority { pid: u32 },
    /// Set the nice value (-20..=19)
    Renice {
        pid: u32,
        #[arg(allow_negative_numbers = true)]
        value: i32,
    },
}

fn run_command(command: &Command) -> Result<()> {
    match *command {
        Command::Terminate { pid } => control::terminate(pid)?,
        Command::Kill { pid } => control::force_kill(pid)?,
        Command::Stop { pid } => control::stop(pid)?,
        Command::Resume { pid } => control::resume(pid)?,
        Command::Priority { pid } => println!("{}", control::get_priority(pid)?),
        Command::Renice { pid, value } => control::set_priority(pid, value)?,
    }
    Ok(())
}

fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };

    if let Some(secs) = args.interval {
        // Negative and NaN saturate to 0 and fail validation
        config.monitor.interval_ms = (secs * 1000.0).round() as u64;
    }
    if !args.log_sources.is_empty() {
        config.logs.sources = args.log_sources.clone();
    }
    if let Some(max) = args.max_log_entries {
        config.logs.max_entries = max;
    }

    config.validate().context("invalid command line options")?;
    Ok(config)
}

fn print_snapshot(snapshot: &Snapshot, sample: u64, top: usize) {
    let overview = &snapshot.overview;
    if sample == 1 {
        println!(
            "{} ({}) {} {} | {} x {} | {}",
            overview.hostname,
            overview.current_user,
            overview.platform.as_deref().unwrap_or(&overview.os),
            overview.kernel,
            overview.cpu_cores,
            overview.cpu_model,
            overview.architecture,
        );
    }

    println!(
        "\n--- Sample {} at {} (up {}) ---",
        sample,
        snapshot.timestamp.format("%H:%M:%S"),
        format_duration(overview.uptime_secs as u64)
    );

    let cpu = &snapshot.cpu;
    println!(
        "CPU: {:.1}% (user:{:.1}% sys:{:.1}% iowait:{:.1}%) Load: {:.2} {:.2} {:.2}",
        cpu.total_utilization,
        cpu.user_percent,
        cpu.system_percent,
        cpu.iowait_percent,
        cpu.load_avg.one,
        cpu.load_avg.five,
        cpu.load_avg.fifteen
    );

    let mem = &snapshot.memory;
    println!(
        "Memory: {} / {} ({:.1}%) Swap: {} / {}",
        format_bytes(mem.used),
        format_bytes(mem.total),
        mem.used_percent,
        format_bytes(mem.swap.used),
        format_bytes(mem.swap.total)
    );

    let storage = &snapshot.storage;
    println!(
        "Disk: R {} W {} ({:.0}/{:.0} IOPS)",
        format_throughput(storage.total_read_bytes_per_sec),
        format_throughput(storage.total_write_bytes_per_sec),
        storage.total_read_iops,
        storage.total_write_iops
    );
    for fs in &storage.filesystems {
        println!(
            "  {:<20} {:>10} / {:>10} ({:.1}%)",
            truncate(&fs.mountpoint, 20),
            format_bytes(fs.used),
            format_bytes(fs.total),
            fs.used_percent
        );
    }

    let net = &snapshot.network;
    println!(
        "Network: RX {} TX {} (TCP established: {})",
        format_throughput(net.total_rx_bytes_per_sec),
        format_throughput(net.total_tx_bytes_per_sec),
        format_count(net.tcp.connections_established)
    );

    let procs = &snapshot.processes;
    println!(
        "Processes: {} total, {} running, {} sleeping, {} stopped, {} zombie",
        format_count(procs.total as u64),
        procs.running,
        procs.sleeping,
        procs.stopped,
        procs.zombie
    );
    for p in procs.processes.iter().take(top) {
        println!(
            "  {:>7} {:<16} {:>5.1}% {:>10} {:<8} {}",
            p.pid,
            truncate(&p.name, 16),
            p.cpu_percent,
            format_bytes(p.rss_bytes),
            p.user.as_deref().unwrap_or("-"),
            p.state
        );
    }

    let logs = &snapshot.logs;
    println!(
        "Logs: {} errors, {} warnings, {} other",
        logs.error_count, logs.warn_count, logs.info_count
    );
    for entry in logs.entries.iter().filter(|e| e.level.is_error()).take(3) {
        println!(
            "  {} {:<6} {}: {}",
            entry.timestamp.format("%H:%M:%S"),
            entry.level,
            entry.service,
            truncate(&entry.message, 80)
        );
    }

    for error in &snapshot.errors {
        println!("! {} unavailable: {}", error.section, error.message);
    }
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn run_monitor(args: &Args, config: AppConfig) -> Result<()> {
    let fs = PseudoFs::with_roots(
        RealFs::new(),
        &config.paths.proc_root,
        &config.paths.sys_root,
    );
    let monitor = Monitor::new(
        fs,
        SystemConstants::from_sysconf(),
        &config.logs.sources,
        config.logs.max_entries,
    );

    let mut json_logger = args.log.as_ref().map(JsonLinesLogger::new).transpose()?;
    let mut text_logger = args.text_log.as_ref().map(TextLogger::new).transpose()?;

    let (handle, task) = monitor::spawn(monitor, config.interval());
    let mut updates = handle.subscribe();
    let deadline = args
        .duration
        .map(|secs| Instant::now() + Duration::from_secs(secs));
    let mut samples = 0u64;

    // Created once so a Ctrl-C during printing is still seen
    let stop = async {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = until(deadline) => {}
        }
    };
    tokio::pin!(stop);

    while let Some(snapshot) = monitor::next_snapshot(&mut updates, stop.as_mut()).await {
        samples += 1;

        if args.json {
            println!("{}", serde_json::to_string(&*snapshot)?);
        } else {
            print_snapshot(&snapshot, samples, args.top);
        }

        if let Some(logger) = json_logger.as_mut() {
            if let Err(e) = logger.log(&snapshot) {
                warn!(error = %e, "failed to write JSON log");
            }
        }
        if let Some(logger) = text_logger.as_mut() {
            if let Err(e) = logger.log(&snapshot) {
                warn!(error = %e, "failed to write text log");
            }
        }
    }

    handle.shutdown();
    task.await.context("monitor task panicked")?;

    info!(samples, "monitoring finished");
    if let Some(path) = &args.log {
        info!(path = %path.display(), "snapshots logged");
    }
    if let Some(path) = &args.text_log {
        info!(path = %path.display(), "text summary logged");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if let Some(command) = &args.command {
        return run_command(command);
    }

    let config = load_config(&args)?;
    run_monitor(&args, config).await
}
