use crate::render::Redraw;
use nix::fcntl::{fcntl, FcntlArg};
use regex::Regex;
use serde::Deserialize;
use std::fs::File;
use std::io::{self, IsTerminal, Write};
use std::os::fd::BorrowedFd;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

/// Settings file picked up from the working directory when `--config` is not given.
pub const DEFAULT_SETTINGS_FILE: &str = "fdprogress.toml";

static PID_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*\d+\s*$").unwrap());

/// Top-level settings loaded from fdprogress.toml.
#[derive(Debug, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Settings {
    pub monitor: MonitorSettings,
    pub display: DisplaySettings,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    pub interval_ms: u64,
    pub forget_closed: bool,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DisplaySettings {
    pub output: String,
    pub redraw: RedrawSetting,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            interval_ms: 500,
            forget_closed: false,
        }
    }
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            output: "stderr".to_string(),
            redraw: RedrawSetting::Auto,
        }
    }
}

impl Settings {
    /// Load settings from `path`, or from `fdprogress.toml` in the working
    /// directory when no path is given. A missing default file yields defaults;
    /// a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Settings, ConfigError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let fallback = PathBuf::from(DEFAULT_SETTINGS_FILE);
                if !fallback.exists() {
                    return Ok(Settings::default());
                }
                fallback
            }
        };

        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Read {
            path: path.clone(),
            source: e,
        })?;
        toml::from_str(&text).map_err(|e| ConfigError::Parse { path, source: e })
    }
}

/// How the redraw protocol is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum RedrawSetting {
    /// In-place on a terminal, full repaint otherwise.
    Auto,
    InPlace,
    Repaint,
}

impl RedrawSetting {
    pub fn resolve(self, is_terminal: bool) -> Redraw {
        match self {
            RedrawSetting::Auto if is_terminal => Redraw::InPlace,
            RedrawSetting::Auto => Redraw::Repaint,
            RedrawSetting::InPlace => Redraw::InPlace,
            RedrawSetting::Repaint => Redraw::Repaint,
        }
    }
}

/// Stream the progress table is written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputTarget {
    Stdout,
    Stderr,
    /// A descriptor inherited from the caller, e.g. `3` in `fdprogress -o 3 ... 3>log`.
    Fd(i32),
}

impl FromStr for OutputTarget {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "stdout" => Ok(OutputTarget::Stdout),
            "stderr" => Ok(OutputTarget::Stderr),
            other => match other.parse::<i32>() {
                Ok(0) => Err(ConfigError::Invalid(
                    "output descriptor 0 is standard input".to_string(),
                )),
                Ok(1) => Ok(OutputTarget::Stdout),
                Ok(2) => Ok(OutputTarget::Stderr),
                Ok(fd) if fd > 2 => Ok(OutputTarget::Fd(fd)),
                _ => Err(ConfigError::Invalid(format!(
                    "output must be stdout, stderr or a descriptor number, got '{other}'"
                ))),
            },
        }
    }
}

impl OutputTarget {
    /// Open the stream for writing. Inherited descriptors are duplicated, so
    /// rows land at the caller's current offset and honour its `O_APPEND`.
    pub fn open(self) -> Result<OutputStream, ConfigError> {
        match self {
            OutputTarget::Stdout => Ok(OutputStream::Stdout(io::stdout())),
            OutputTarget::Stderr => Ok(OutputStream::Stderr(io::stderr())),
            OutputTarget::Fd(fd) => {
                fcntl(fd, FcntlArg::F_GETFD).map_err(|errno| ConfigError::Output {
                    fd,
                    source: errno.into(),
                })?;
                // SAFETY: F_GETFD just confirmed `fd` is open, and the borrow
                // ends once the duplicate exists.
                let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
                borrowed
                    .try_clone_to_owned()
                    .map(|owned| OutputStream::File(File::from(owned)))
                    .map_err(|e| ConfigError::Output { fd, source: e })
            }
        }
    }
}

/// An opened output stream.
#[derive(Debug)]
pub enum OutputStream {
    Stdout(io::Stdout),
    Stderr(io::Stderr),
    File(File),
}

impl OutputStream {
    pub fn is_terminal(&self) -> bool {
        match self {
            OutputStream::Stdout(s) => s.is_terminal(),
            OutputStream::Stderr(s) => s.is_terminal(),
            OutputStream::File(f) => f.is_terminal(),
        }
    }
}

impl Write for OutputStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            OutputStream::Stdout(s) => s.write(buf),
            OutputStream::Stderr(s) => s.write(buf),
            OutputStream::File(f) => f.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            OutputStream::Stdout(s) => s.flush(),
            OutputStream::Stderr(s) => s.flush(),
            OutputStream::File(f) => f.flush(),
        }
    }
}

/// How CMD should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetMode {
    /// A lone number is a pid, anything else a command line.
    Detect,
    Pid,
    Command,
}

/// The process to monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Attach(i32),
    Spawn(Vec<String>),
}

/// Resolve CMD words into an unambiguous target.
pub fn resolve_target(words: &[String], mode: TargetMode) -> Result<Target, ConfigError> {
    let first = words
        .first()
        .ok_or_else(|| ConfigError::Target("no process id or command given".to_string()))?;

    let as_pid = match mode {
        TargetMode::Pid => true,
        TargetMode::Command => false,
        TargetMode::Detect => PID_PATTERN.is_match(first),
    };

    if !as_pid {
        return Ok(Target::Spawn(words.to_vec()));
    }

    if words.len() > 1 {
        return Err(ConfigError::Target(
            "cannot accept any arguments after process id".to_string(),
        ));
    }
    match first.trim().parse::<i32>() {
        Ok(pid) if pid > 0 => Ok(Target::Attach(pid)),
        _ => Err(ConfigError::Target(format!("invalid process id '{first}'"))),
    }
}

/// Command-line values that take precedence over the settings file.
#[derive(Debug, Default)]
pub struct Overrides {
    pub interval_ms: Option<u64>,
    pub output: Option<String>,
    pub redraw: Option<RedrawSetting>,
    pub forget_closed: bool,
}

/// Fully resolved, immutable configuration handed to the monitor.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub target: Target,
    pub interval: Duration,
    pub output: OutputTarget,
    pub redraw: RedrawSetting,
    pub forget_closed: bool,
}

impl MonitorConfig {
    /// Merge settings and overrides for the given target.
    pub fn resolve(
        settings: Settings,
        overrides: Overrides,
        target: Target,
    ) -> Result<MonitorConfig, ConfigError> {
        let interval_ms = overrides
            .interval_ms
            .unwrap_or(settings.monitor.interval_ms);
        if interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "interval must be greater than 0".to_string(),
            ));
        }

        let output = overrides
            .output
            .as_deref()
            .unwrap_or(settings.display.output.as_str())
            .parse()?;

        Ok(MonitorConfig {
            target,
            interval: Duration::from_millis(interval_ms),
            output,
            redraw: overrides.redraw.unwrap_or(settings.display.redraw),
            forget_closed: overrides.forget_closed || settings.monitor.forget_closed,
        })
    }
}

/// Errors raised while resolving configuration.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    Target(String),
    Invalid(String),
    Output {
        fd: i32,
        source: std::io::Error,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to open {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse {}: {}", path.display(), source)
            }
            ConfigError::Target(msg) => write!(f, "{msg}"),
            ConfigError::Invalid(msg) => write!(f, "invalid configuration: {msg}"),
            ConfigError::Output { fd, source } => {
                write!(f, "cannot write to output descriptor {fd}: {source}")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Output { source, .. } => Some(source),
            ConfigError::Target(_) | ConfigError::Invalid(_) => None,
        }
    }
}
