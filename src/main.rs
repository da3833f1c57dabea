mod config;
mod monitor;
mod process;
mod render;
mod scanner;
mod tracker;

use clap::Parser;
use config::{
    resolve_target, ConfigError, MonitorConfig, Overrides, RedrawSetting, Settings, Target,
    TargetMode,
};
use monitor::Monitor;
use process::ProcessHandle;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Show progress on the open file descriptors of a program: percentage read
/// or written and estimated time left, for every regular file and block device
/// it has open, refreshed until the program ends.
#[derive(Parser, Debug)]
#[command(name = "fdprogress", version, about)]
pub struct Cli {
    /// Interpret CMD as a process id
    #[arg(short, long, conflicts_with = "command")]
    pid: bool,

    /// Do not interpret CMD as a process id
    #[arg(short, long)]
    command: bool,

    /// Where to draw the table: stdout, stderr or an open descriptor number
    #[arg(short, long)]
    output: Option<String>,

    /// Refresh interval in milliseconds (default: 500)
    #[arg(short, long, value_name = "MS")]
    interval: Option<u64>,

    /// Settings file path (default: ./fdprogress.toml if present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Redraw protocol (default: in-place on a terminal, repaint otherwise)
    #[arg(long, value_enum)]
    redraw: Option<RedrawSetting>,

    /// Forget descriptors once they close, so a reused number starts a new estimate
    #[arg(long)]
    forget_closed: bool,

    /// Extra logging (spawn/attach, per-tick row counts)
    #[arg(short, long)]
    verbose: bool,

    /// Process id, or command and its arguments
    #[arg(
        value_name = "CMD",
        required = true,
        num_args = 1..,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    cmd: Vec<String>,
}

impl Cli {
    fn target_mode(&self) -> TargetMode {
        match (self.pid, self.command) {
            (true, _) => TargetMode::Pid,
            (_, true) => TargetMode::Command,
            _ => TargetMode::Detect,
        }
    }

    /// Resolve arguments and settings into the monitor's configuration.
    fn resolve(&self) -> Result<MonitorConfig, ConfigError> {
        let target = resolve_target(&self.cmd, self.target_mode())?;
        let settings = Settings::load(self.config.as_deref())?;
        let overrides = Overrides {
            interval_ms: self.interval,
            output: self.output.clone(),
            redraw: self.redraw,
            forget_closed: self.forget_closed,
        };
        MonitorConfig::resolve(settings, overrides, target)
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    tracing::debug!(?cli, "parsed CLI arguments");

    let config = match cli.resolve() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("fdprogress: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Open the output before launching anything, so a bad descriptor does not
    // leave an orphaned child behind.
    let output = match config.output.open() {
        Ok(output) => output,
        Err(e) => {
            eprintln!("fdprogress: {e}");
            return ExitCode::FAILURE;
        }
    };
    let redraw = config.redraw.resolve(output.is_terminal());

    let handle = match &config.target {
        Target::Attach(pid) => ProcessHandle::attach(*pid),
        Target::Spawn(argv) => ProcessHandle::spawn(argv),
    };
    let handle = match handle {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(e.exit_code());
        }
    };

    let outcome = Monitor::new(handle, &config, redraw, output).run().await;
    let code = outcome.report();
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}
