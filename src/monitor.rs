/// Fixed-interval monitor loop: scan, annotate, draw, sleep, poll, until the
/// target process is gone. Produces the monitor's own exit code.
use crate::config::MonitorConfig;
use crate::process::{Mode, Poll, ProcessHandle, TargetStatus};
use crate::render::{Redraw, TableRenderer};
use crate::scanner::FdScanner;
use crate::tracker::ProgressTracker;
use std::io::Write;
use std::time::{Duration, Instant};

/// Exit code used when the target ended abnormally.
pub const GENERIC_FAILURE: i32 = 1;

/// How monitoring ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Attached target disappeared; no status is available.
    Vanished,
    /// Spawned child was reaped.
    Exited(TargetStatus),
}

impl Outcome {
    /// The monitor's own exit code.
    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Vanished => 0,
            Outcome::Exited(TargetStatus::Code(code)) => *code,
            Outcome::Exited(TargetStatus::Signal(_) | TargetStatus::Unknown) => GENERIC_FAILURE,
        }
    }

    /// Message to print when the target did not exit with a code.
    pub fn diagnostic(&self) -> Option<String> {
        match self {
            Outcome::Exited(status @ (TargetStatus::Signal(_) | TargetStatus::Unknown)) => {
                Some(format!("Program terminated abnormally ({status})"))
            }
            _ => None,
        }
    }

    /// Print the diagnostic, if any, and return the exit code.
    pub fn report(&self) -> i32 {
        if let Some(message) = self.diagnostic() {
            tracing::warn!(outcome = ?self, "target terminated abnormally");
            eprintln!("{message}");
        }
        self.exit_code()
    }
}

pub struct Monitor<W: Write> {
    handle: ProcessHandle,
    scanner: FdScanner,
    tracker: ProgressTracker,
    renderer: TableRenderer,
    interval: Duration,
    out: W,
}

impl<W: Write> Monitor<W> {
    pub fn new(handle: ProcessHandle, config: &MonitorConfig, redraw: Redraw, out: W) -> Self {
        let scanner = FdScanner::new(handle.pid());
        Self::with_scanner(handle, scanner, config, redraw, out)
    }

    /// Monitor reading descriptors through a custom scanner.
    pub fn with_scanner(
        handle: ProcessHandle,
        scanner: FdScanner,
        config: &MonitorConfig,
        redraw: Redraw,
        out: W,
    ) -> Self {
        let tracker = ProgressTracker::new(handle.start_baseline(), config.interval)
            .forget_closed(config.forget_closed);
        Self {
            handle,
            scanner,
            tracker,
            renderer: TableRenderer::new(redraw),
            interval: config.interval,
            out,
        }
    }

    /// Run until the target ends.
    pub async fn run(&mut self) -> Outcome {
        tracing::debug!(
            pid = self.handle.pid(),
            interval_ms = self.interval.as_millis() as u64,
            "monitor started"
        );
        // Give a fresh child time to open its files.
        if self.handle.mode() == Mode::Spawned {
            tokio::time::sleep(self.interval).await;
        }

        loop {
            match self.handle.poll() {
                Poll::Running => {}
                Poll::Exited(None) => return Outcome::Vanished,
                Poll::Exited(Some(status)) => return Outcome::Exited(status),
            }
            self.tick();
            tokio::time::sleep(self.interval).await;
        }
    }

    fn tick(&mut self) {
        let now = Instant::now();
        let snapshots = self.scanner.scan();
        let rows = self.tracker.annotate(&snapshots, now);
        tracing::debug!(rows = rows.len(), tracked = self.tracker.tracked(), "tick");

        if let Err(e) = self.renderer.draw(&rows, &mut self.out) {
            tracing::warn!(error = %e, "failed to draw progress table");
        }
    }
}
