//! Signal delivery and scheduling priority for a single PID.
//!
//! Every operation first checks the target with `kill(pid, 0)` so callers get
//! a precise [`ControlError`] instead of a bare errno.

use std::io;
use thiserror::Error;
use tracing::info;

/// Lowest (most favourable) nice value.
pub const MIN_PRIORITY: i32 = -20;
/// Highest (least favourable) nice value.
pub const MAX_PRIORITY: i32 = 19;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("process {0} not found")]
    NotFound(u32),

    #[error("permission denied for process {0}")]
    PermissionDenied(u32),

    /// PID 0 and values beyond `pid_t` would address process groups.
    #[error("invalid pid {0}")]
    InvalidPid(u32),

    #[error("priority {0} is outside -20..=19")]
    InvalidPriority(i32),

    #[error("operation on process {pid} failed: {source}")]
    Os {
        pid: u32,
        #[source]
        source: io::Error,
    },
}

impl ControlError {
    fn from_errno(pid: u32, err: io::Error) -> Self {
        match err.raw_os_error() {
            Some(libc::ESRCH) => ControlError::NotFound(pid),
            Some(libc::EPERM) | Some(libc::EACCES) => ControlError::PermissionDenied(pid),
            _ => ControlError::Os { pid, source: err },
        }
    }
}

/// Signals this module sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Terminate,
    Kill,
    Stop,
    Continue,
}

impl Signal {
    fn as_raw(self) -> libc::c_int {
        match self {
            Signal::Terminate => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
            Signal::Stop => libc::SIGSTOP,
            Signal::Continue => libc::SIGCONT,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Signal::Terminate => "SIGTERM",
            Signal::Kill => "SIGKILL",
            Signal::Stop => "SIGSTOP",
            Signal::Continue => "SIGCONT",
        }
    }
}

fn to_pid_t(pid: u32) -> Result<libc::pid_t, ControlError> {
    if pid == 0 {
        return Err(ControlError::InvalidPid(pid));
    }
    libc::pid_t::try_from(pid).map_err(|_| ControlError::InvalidPid(pid))
}

fn raw_kill(pid: libc::pid_t, signal: libc::c_int) -> io::Result<()> {
    if unsafe { libc::kill(pid, signal) } == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Confirms `pid` exists and can be signalled by this process.
pub fn check(pid: u32) -> Result<(), ControlError> {
    let raw = to_pid_t(pid)?;
    raw_kill(raw, 0).map_err(|e| ControlError::from_errno(pid, e))
}

/// Whether `pid` exists, even if owned by another user.
pub fn is_running(pid: u32) -> bool {
    match check(pid) {
        Ok(()) | Err(ControlError::PermissionDenied(_)) => true,
        Err(_) => false,
    }
}

/// Sends `signal` to `pid` after checking it can be signalled.
pub fn send_signal(pid: u32, signal: Signal) -> Result<(), ControlError> {
    check(pid)?;
    let raw = to_pid_t(pid)?;
    raw_kill(raw, signal.as_raw()).map_err(|e| ControlError::from_errno(pid, e))?;
    info!(pid, signal = signal.name(), "signal sent");
    Ok(())
}

/// SIGTERM
pub fn terminate(pid: u32) -> Result<(), ControlError> {
    send_signal(pid, Signal::Terminate)
}

/// SIGKILL
pub fn force_kill(pid: u32) -> Result<(), ControlError> {
    send_signal(pid, Signal::Kill)
}

/// SIGSTOP
pub fn stop(pid: u32) -> Result<(), ControlError> {
    send_signal(pid, Signal::Stop)
}

/// SIGCONT
pub fn resume(pid: u32) -> Result<(), ControlError> {
    send_signal(pid, Signal::Continue)
}

/// Current nice value of `pid`.
pub fn get_priority(pid: u32) -> Result<i32, ControlError> {
    check(pid)?;
    let raw = to_pid_t(pid)?;

    // -1 is a legitimate nice value, so errno must be cleared and checked
    let value = unsafe {
        *libc::__errno_location() = 0;
        libc::getpriority(libc::PRIO_PROCESS, raw as libc::id_t)
    };
    if value == -1 {
        let err = io::Error::last_os_error();
        if err.raw_os_error().unwrap_or(0) != 0 {
            return Err(ControlError::from_errno(pid, err));
        }
    }
    Ok(value)
}

/// Sets the nice value of `pid`. Lowering it below the current value
/// usually requires `CAP_SYS_NICE`.
pub fn set_priority(pid: u32, value: i32) -> Result<(), ControlError> {
    if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&value) {
        return Err(ControlError::InvalidPriority(value));
    }
    check(pid)?;
    let raw = to_pid_t(pid)?;

    let result = unsafe { libc::setpriority(libc::PRIO_PROCESS, raw as libc::id_t, value) };
    if result != 0 {
        return Err(ControlError::from_errno(pid, io::Error::last_os_error()));
    }
    info!(pid, priority = value, "priority changed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::{Child, Command};
    use std::time::Duration;

    fn spawn_sleeper() -> Child {
        Command::new("sleep").arg("30").spawn().unwrap()
    }

    fn proc_state(pid: u32) -> char {
        let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid)).unwrap();
        let close = stat.rfind(')').unwrap();
        stat[close + 2..].chars().next().unwrap()
    }

    fn wait_for_state(pid: u32, wanted: &[char]) -> char {
        for _ in 0..50 {
            let state = proc_state(pid);
            if wanted.contains(&state) {
                return state;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        proc_state(pid)
    }

    #[test]
    fn rejects_group_addressing_pids() {
        assert!(matches!(terminate(0), Err(ControlError::InvalidPid(0))));
        let too_big = i32::MAX as u32 + 1;
        assert!(matches!(
            force_kill(too_big),
            Err(ControlError::InvalidPid(p)) if p == too_big
        ));
    }

    #[test]
    fn missing_process_is_not_found() {
        let pid = i32::MAX as u32;
        assert!(matches!(check(pid), Err(ControlError::NotFound(_))));
        assert!(matches!(get_priority(pid), Err(ControlError::NotFound(_))));
        assert!(!is_running(pid));
    }

    #[test]
    fn priority_range_is_validated_first() {
        assert!(matches!(
            set_priority(std::process::id(), 20),
            Err(ControlError::InvalidPriority(20))
        ));
        assert!(matches!(
            set_priority(std::process::id(), -21),
            Err(ControlError::InvalidPriority(-21))
        ));
    }

    #[test]
    fn stop_resume_and_kill_child() {
        let mut child = spawn_sleeper();
        let pid = child.id();
        assert!(is_running(pid));

        stop(pid).unwrap();
        assert_eq!(wait_for_state(pid, &['T', 't']), 'T');

        resume(pid).unwrap();
        assert!(matches!(wait_for_state(pid, &['S', 'R']), 'S' | 'R'));

        force_kill(pid).unwrap();
        child.wait().unwrap();
    }

    #[test]
    fn terminate_child() {
        let mut child = spawn_sleeper();
        terminate(child.id()).unwrap();
        let status = child.wait().unwrap();
        assert!(!status.success());
    }

    #[test]
    fn renice_child() {
        let mut child = spawn_sleeper();
        let pid = child.id();
        let before = get_priority(pid).unwrap();

        // Raising the nice value never needs privileges
        let target = (before + 5).min(MAX_PRIORITY);
        set_priority(pid, target).unwrap();
        assert_eq!(get_priority(pid).unwrap(), target);

        force_kill(pid).unwrap();
        child.wait().unwrap();
    }
}
