/// Lifecycle of the monitored process: attach to an existing pid or spawn and
/// own a child, then poll it for liveness once per tick.
use nix::sys::signal::{kill, Signal};
use nix::unistd::{sysconf, Pid, SysconfVar};
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus};
use std::time::{Duration, Instant};

/// Clock ticks per second assumed when `sysconf(_SC_CLK_TCK)` is unavailable.
const FALLBACK_CLK_TCK: f64 = 100.0;

/// Whether the handle owns the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Attached,
    Spawned,
}

/// How a spawned child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetStatus {
    Code(i32),
    /// Raw signal number, realtime signals included.
    Signal(i32),
    Unknown,
}

impl From<ExitStatus> for TargetStatus {
    fn from(status: ExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(code), _) => TargetStatus::Code(code),
            (None, Some(sig)) => TargetStatus::Signal(sig),
            (None, None) => TargetStatus::Unknown,
        }
    }
}

impl std::fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetStatus::Code(code) => write!(f, "exit code {code}"),
            TargetStatus::Signal(sig) => write!(f, "signal {sig}"),
            TargetStatus::Unknown => write!(f, "unknown return code"),
        }
    }
}

/// Result of a liveness poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Poll {
    Running,
    /// The target is gone. `None` when it was not ours to reap.
    Exited(Option<TargetStatus>),
}

/// Handle on the monitored process.
#[derive(Debug)]
pub enum ProcessHandle {
    Attached {
        pid: Pid,
        start_baseline: Instant,
    },
    Spawned {
        child: Child,
        start_baseline: Instant,
        status: Option<TargetStatus>,
    },
}

impl ProcessHandle {
    /// Attach to a process we do not own.
    ///
    /// The start baseline is moved back by the difference between our own
    /// launch time and the target's, so elapsed times reflect the target's age.
    pub fn attach(pid: i32) -> Result<ProcessHandle, ProcessError> {
        let own = start_seconds(std::process::id() as i32)?;
        let target = start_seconds(pid)?;
        let start_baseline = shift_baseline(Instant::now(), own - target);

        tracing::info!(pid, age_secs = own - target, "attached to process");
        Ok(ProcessHandle::Attached {
            pid: Pid::from_raw(pid),
            start_baseline,
        })
    }

    /// Launch `argv` as a child process owned by the monitor.
    pub fn spawn(argv: &[String]) -> Result<ProcessHandle, ProcessError> {
        let command = argv.join(" ");
        let (program, args) = argv.split_first().ok_or_else(|| ProcessError::Spawn {
            command: command.clone(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command line"),
        })?;

        let start_baseline = Instant::now();
        let child = Command::new(program)
            .args(args)
            .spawn()
            .map_err(|e| ProcessError::Spawn {
                command: command.clone(),
                source: e,
            })?;

        tracing::info!(pid = child.id(), command = %command, "spawned child process");
        Ok(ProcessHandle::Spawned {
            child,
            start_baseline,
            status: None,
        })
    }

    pub fn pid(&self) -> i32 {
        match self {
            ProcessHandle::Attached { pid, .. } => pid.as_raw(),
            ProcessHandle::Spawned { child, .. } => child.id() as i32,
        }
    }

    pub fn mode(&self) -> Mode {
        match self {
            ProcessHandle::Attached { .. } => Mode::Attached,
            ProcessHandle::Spawned { .. } => Mode::Spawned,
        }
    }

    /// The instant, in the monitor's clock, at which the target started.
    pub fn start_baseline(&self) -> Instant {
        match self {
            ProcessHandle::Attached { start_baseline, .. }
            | ProcessHandle::Spawned { start_baseline, .. } => *start_baseline,
        }
    }

    /// Recorded exit status of a spawned child, once it has ended.
    #[allow(dead_code)]
    pub fn exit_status(&self) -> Option<TargetStatus> {
        match self {
            ProcessHandle::Attached { .. } => None,
            ProcessHandle::Spawned { status, .. } => *status,
        }
    }

    /// Check whether the target is still running.
    ///
    /// Attached targets are checked with signal 0; any failure means gone.
    /// Spawned children are reaped with a non-blocking wait, and once a status
    /// is recorded later polls return it without asking the OS again.
    pub fn poll(&mut self) -> Poll {
        match self {
            ProcessHandle::Attached { pid, .. } => match kill(*pid, None::<Signal>) {
                Ok(()) => Poll::Running,
                Err(errno) => {
                    tracing::debug!(pid = pid.as_raw(), %errno, "attached process unreachable");
                    Poll::Exited(None)
                }
            },
            ProcessHandle::Spawned { child, status, .. } => {
                if let Some(recorded) = status {
                    return Poll::Exited(Some(*recorded));
                }
                let outcome = match child.try_wait() {
                    Ok(None) => return Poll::Running,
                    Ok(Some(exit)) => TargetStatus::from(exit),
                    Err(e) => {
                        tracing::warn!(pid = child.id(), error = %e, "failed to reap child");
                        TargetStatus::Unknown
                    }
                };
                tracing::info!(pid = child.id(), status = %outcome, "child process ended");
                *status = Some(outcome);
                Poll::Exited(Some(outcome))
            }
        }
    }
}

/// Move `now` back by `age_secs` (or forward, if the target is younger than we are).
fn shift_baseline(now: Instant, age_secs: f64) -> Instant {
    if !age_secs.is_finite() {
        return now;
    }
    if age_secs >= 0.0 {
        now.checked_sub(Duration::from_secs_f64(age_secs))
            .unwrap_or(now)
    } else {
        now + Duration::from_secs_f64(-age_secs)
    }
}

/// Seconds since boot at which `pid` started, from `/proc/<pid>/stat`.
fn start_seconds(pid: i32) -> Result<f64, ProcessError> {
    let path = PathBuf::from(format!("/proc/{pid}/stat"));
    let stat = std::fs::read_to_string(&path).map_err(|e| ProcessError::StartTime {
        pid,
        source: Some(e),
    })?;
    let ticks = parse_start_ticks(&stat).ok_or(ProcessError::StartTime { pid, source: None })?;
    Ok(ticks as f64 / clock_ticks_per_second())
}

/// Extract `starttime` (field 22) from a stat record. The command name in
/// field 2 may itself contain spaces and parentheses, so split after the last `)`.
fn parse_start_ticks(stat: &str) -> Option<u64> {
    let (_, rest) = stat.rsplit_once(')')?;
    rest.split_whitespace().nth(19)?.parse().ok()
}

fn clock_ticks_per_second() -> f64 {
    match sysconf(SysconfVar::CLK_TCK) {
        Ok(Some(hz)) if hz > 0 => hz as f64,
        _ => FALLBACK_CLK_TCK,
    }
}

/// Errors that prevent a process handle from being created.
#[derive(Debug)]
pub enum ProcessError {
    /// The command could not be launched.
    Spawn {
        command: String,
        source: std::io::Error,
    },
    /// The start time of an attached process could not be read.
    StartTime {
        pid: i32,
        source: Option<std::io::Error>,
    },
}

impl ProcessError {
    /// Exit code the monitor terminates with when construction fails.
    pub fn exit_code(&self) -> u8 {
        match self {
            ProcessError::Spawn { .. } => 99,
            ProcessError::StartTime { .. } => 1,
        }
    }
}

impl std::fmt::Display for ProcessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessError::Spawn { command, source } => {
                write!(f, "Cannot launch {}: {}", command, source)
            }
            ProcessError::StartTime {
                pid,
                source: Some(source),
            } => write!(f, "cannot read start time of process {}: {}", pid, source),
            ProcessError::StartTime { pid, source: None } => {
                write!(f, "malformed stat record for process {}", pid)
            }
        }
    }
}

impl std::error::Error for ProcessError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProcessError::Spawn { source, .. } => Some(source),
            ProcessError::StartTime { source, .. } => source
                .as_ref()
                .map(|e| e as &(dyn std::error::Error + 'static)),
        }
    }
}
