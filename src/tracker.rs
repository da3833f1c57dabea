//! Rate and ETA estimation per descriptor.
//!
//! Every descriptor id gets a baseline the first time it is seen: on the first
//! tick that is the target's own start, afterwards `now - interval` (it opened
//! somewhere within the last interval). Progress is then assumed linear from
//! that baseline: `total = elapsed * size / position`.

use crate::render::Row;
use crate::scanner::FdSnapshot;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

/// Placeholder for figures that cannot be computed.
const UNAVAILABLE: &str = "-";

/// Completion estimate for one descriptor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Estimate {
    /// Position and size known, position > 0.
    Known {
        percent: f64,
        remaining_secs: f64,
        total_secs: f64,
    },
    /// Nothing read yet.
    NotStarted,
    /// Size unknown (or zero), so no ratio can be formed.
    Unresolved,
}

impl Estimate {
    /// Estimate from a position, a size and the time elapsed since the baseline.
    pub fn compute(position: Option<u64>, size: Option<u64>, elapsed: Duration) -> Estimate {
        match (position, size) {
            (Some(0), _) => Estimate::NotStarted,
            (Some(pos), Some(size)) if size > 0 => {
                let duration = elapsed.as_secs_f64();
                let total_secs = duration * size as f64 / pos as f64;
                Estimate::Known {
                    percent: pos as f64 * 100.0 / size as f64,
                    remaining_secs: total_secs - duration,
                    total_secs,
                }
            }
            _ => Estimate::Unresolved,
        }
    }

    /// Percentage cell, five characters wide plus `%`.
    pub fn percent_cell(&self) -> String {
        match self {
            Estimate::Known { percent, .. } => format!("{:5.1}%", percent),
            Estimate::NotStarted => format!("{:5.1}%", 0.0),
            Estimate::Unresolved => " --.-%".to_string(),
        }
    }

    /// The four ETA cells: `in <remaining> of <total>`.
    fn eta_cells(&self) -> [String; 4] {
        match self {
            Estimate::Known {
                remaining_secs,
                total_secs,
                ..
            } => [
                "in".to_string(),
                format_duration(*remaining_secs),
                "of".to_string(),
                format_duration(*total_secs),
            ],
            Estimate::NotStarted | Estimate::Unresolved => [
                String::new(),
                UNAVAILABLE.to_string(),
                String::new(),
                UNAVAILABLE.to_string(),
            ],
        }
    }
}

/// Owns descriptor baselines and turns snapshots into table rows.
#[derive(Debug)]
pub struct ProgressTracker {
    baselines: HashMap<String, Instant>,
    start_baseline: Instant,
    interval: Duration,
    first_tick: bool,
    forget_closed: bool,
}

impl ProgressTracker {
    pub fn new(start_baseline: Instant, interval: Duration) -> Self {
        Self {
            baselines: HashMap::new(),
            start_baseline,
            interval,
            first_tick: true,
            forget_closed: false,
        }
    }

    /// Drop baselines of descriptors missing from the latest scan, so a
    /// reused descriptor number starts afresh. Off by default.
    pub fn forget_closed(mut self, forget: bool) -> Self {
        self.forget_closed = forget;
        self
    }

    /// Baseline recorded for a descriptor id.
    #[allow(dead_code)]
    pub fn baseline(&self, id: &str) -> Option<Instant> {
        self.baselines.get(id).copied()
    }

    /// Number of descriptor ids with a baseline.
    pub fn tracked(&self) -> usize {
        self.baselines.len()
    }

    /// Seed missing baselines and build one row per snapshot, in input order.
    pub fn annotate(&mut self, snapshots: &[FdSnapshot], now: Instant) -> Vec<Row> {
        let seed = if self.first_tick {
            self.start_baseline
        } else {
            now.checked_sub(self.interval).unwrap_or(now)
        };
        self.first_tick = false;

        let rows = snapshots
            .iter()
            .map(|snap| {
                let baseline = *self.baselines.entry(snap.id.clone()).or_insert(seed);
                let elapsed = now.saturating_duration_since(baseline);
                build_row(snap, &Estimate::compute(snap.position, snap.size, elapsed))
            })
            .collect();

        if self.forget_closed {
            let seen: HashSet<&str> = snapshots.iter().map(|s| s.id.as_str()).collect();
            self.baselines.retain(|id, _| seen.contains(id.as_str()));
        }

        rows
    }
}

/// Lay out the 13 cells of a row.
fn build_row(snap: &FdSnapshot, estimate: &Estimate) -> Row {
    let [eta_in, remaining, eta_of, total] = estimate.eta_cells();
    let optional = |v: Option<u64>| v.map_or_else(|| UNAVAILABLE.to_string(), |n| n.to_string());

    [
        estimate.percent_cell(),
        "|".to_string(),
        optional(snap.position),
        "of".to_string(),
        optional(snap.size),
        "|".to_string(),
        eta_in,
        remaining,
        eta_of,
        total,
        snap.id.clone(),
        "|".to_string(),
        snap.path.clone(),
    ]
}

/// Format seconds as a human-readable duration string.
///
/// Above a minute the value is padded before truncation (59.99s in the hour
/// range, 0.99s in the minute range), so the shown bucket never undershoots.
pub fn format_duration(secs: f64) -> String {
    if secs >= 3600.0 {
        let t = secs + 59.99;
        format!("{}h {}m", (t / 3600.0) as u64, ((t % 3600.0) / 60.0) as u64)
    } else if secs >= 60.0 {
        let t = secs + 0.99;
        format!("{}m {}s", (t / 60.0) as u64, (t % 60.0) as u64)
    } else {
        format!("{:.1}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::FdKind;

    const INTERVAL: Duration = Duration::from_millis(500);

    fn snap(id: &str, position: Option<u64>, size: Option<u64>) -> FdSnapshot {
        FdSnapshot {
            id: id.to_string(),
            kind: FdKind::Regular,
            position,
            size,
            path: format!("/data/{id}.bin"),
            flags: 0o100000,
        }
    }

    // ── format_duration ──

    #[test]
    fn format_duration_seconds() {
        assert_eq!(format_duration(45.3), "45.3s");
        assert_eq!(format_duration(0.0), "0.0s");
        assert_eq!(format_duration(59.94), "59.9s");
    }

    #[test]
    fn format_duration_minutes() {
        assert_eq!(format_duration(65.0), "1m 5s");
        assert_eq!(format_duration(60.0), "1m 0s");
    }

    #[test]
    fn format_duration_minutes_round_up() {
        // 119.2 + 0.99 crosses into the next minute.
        assert_eq!(format_duration(119.2), "2m 0s");
        assert_eq!(format_duration(90.5), "1m 31s");
    }

    #[test]
    fn format_duration_exact_hour() {
        assert_eq!(format_duration(3600.0), "1h 0m");
    }

    #[test]
    fn format_duration_hours_round_up() {
        // Padding adds nearly a minute before bucketing.
        assert_eq!(format_duration(3661.0), "1h 2m");
        assert_eq!(format_duration(3659.0), "1h 1m");
        assert_eq!(format_duration(7199.0), "2h 0m");
    }

    // ── Estimate ──

    #[test]
    fn estimate_linear_projection() {
        let est = Estimate::compute(Some(250), Some(1000), Duration::from_secs(10));
        match est {
            Estimate::Known {
                percent,
                remaining_secs,
                total_secs,
            } => {
                assert!((percent - 25.0).abs() < 1e-9);
                assert!((total_secs - 40.0).abs() < 1e-9);
                assert!((remaining_secs - 30.0).abs() < 1e-9);
            }
            other => panic!("expected Known, got {other:?}"),
        }
    }

    #[test]
    fn estimate_percent_cell_one_decimal() {
        let cases = [(1, 3, " 33.3%"), (2, 3, " 66.7%"), (1000, 1000, "100.0%"), (5, 1000, "  0.5%")];
        for (pos, size, expected) in cases {
            let est = Estimate::compute(Some(pos), Some(size), Duration::from_secs(1));
            assert_eq!(est.percent_cell(), expected, "pos={pos} size={size}");
        }
    }

    #[test]
    fn estimate_zero_position_is_not_started() {
        let est = Estimate::compute(Some(0), Some(1000), Duration::from_secs(3));
        assert_eq!(est, Estimate::NotStarted);
        assert_eq!(est.percent_cell().trim(), "0.0%");
    }

    #[test]
    fn estimate_unknown_size_is_unresolved() {
        let est = Estimate::compute(Some(10), None, Duration::from_secs(3));
        assert_eq!(est, Estimate::Unresolved);
        assert_eq!(est.percent_cell(), " --.-%");
        assert_ne!(est.percent_cell().trim(), "0.0%");
    }

    #[test]
    fn estimate_empty_file_with_offset_is_unresolved() {
        assert_eq!(
            Estimate::compute(Some(10), Some(0), Duration::from_secs(1)),
            Estimate::Unresolved
        );
    }

    // ── ProgressTracker ──

    #[test]
    fn first_tick_seeds_with_process_start() {
        let start = Instant::now();
        let now = start + Duration::from_secs(20);
        let mut tracker = ProgressTracker::new(start, INTERVAL);

        let rows = tracker.annotate(&[snap("3", Some(500), Some(1000))], now);

        assert_eq!(tracker.baseline("3"), Some(start));
        assert_eq!(rows[0][0], " 50.0%");
        assert_eq!(rows[0][7], "20.0s");
        assert_eq!(rows[0][9], "40.0s");
    }

    #[test]
    fn later_descriptor_seeded_one_interval_back() {
        let start = Instant::now();
        let mut tracker = ProgressTracker::new(start, INTERVAL);
        tracker.annotate(&[], start + Duration::from_secs(1));

        let now = start + Duration::from_secs(2);
        let rows = tracker.annotate(&[snap("4", Some(100), Some(400))], now);

        assert_eq!(tracker.baseline("4"), Some(now - INTERVAL));
        // Elapsed is exactly one interval, never zero.
        assert_eq!(rows[0][7], "1.5s");
        assert_eq!(rows[0][9], "2.0s");
    }

    #[test]
    fn baseline_is_never_updated() {
        let start = Instant::now();
        let mut tracker = ProgressTracker::new(start, INTERVAL);
        let snaps = [snap("3", Some(10), Some(100))];

        tracker.annotate(&snaps, start + Duration::from_secs(1));
        tracker.annotate(&snaps, start + Duration::from_secs(2));
        tracker.annotate(&snaps, start + Duration::from_secs(3));

        assert_eq!(tracker.baseline("3"), Some(start));
    }

    #[test]
    fn closed_descriptors_keep_baseline_by_default() {
        let start = Instant::now();
        let mut tracker = ProgressTracker::new(start, INTERVAL);

        tracker.annotate(&[snap("3", Some(1), Some(2))], start + Duration::from_secs(1));
        tracker.annotate(&[], start + Duration::from_secs(2));
        assert_eq!(tracker.tracked(), 1);

        tracker.annotate(&[snap("3", Some(1), Some(2))], start + Duration::from_secs(3));
        assert_eq!(tracker.baseline("3"), Some(start));
    }

    #[test]
    fn forget_closed_reseeds_reused_descriptor() {
        let start = Instant::now();
        let mut tracker = ProgressTracker::new(start, INTERVAL).forget_closed(true);

        tracker.annotate(&[snap("3", Some(1), Some(2))], start + Duration::from_secs(1));
        tracker.annotate(&[], start + Duration::from_secs(2));
        assert_eq!(tracker.tracked(), 0);

        let now = start + Duration::from_secs(3);
        tracker.annotate(&[snap("3", Some(1), Some(2))], now);
        assert_eq!(tracker.baseline("3"), Some(now - INTERVAL));
    }

    #[test]
    fn rows_follow_snapshot_order_and_layout() {
        let start = Instant::now();
        let mut tracker = ProgressTracker::new(start, INTERVAL);
        let rows = tracker.annotate(
            &[snap("7", Some(0), Some(10)), snap("3", Some(5), None)],
            start + Duration::from_secs(1),
        );

        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows[0],
            ["  0.0%", "|", "0", "of", "10", "|", "", "-", "", "-", "7", "|", "/data/7.bin"]
                .map(String::from)
        );
        assert_eq!(
            rows[1],
            [" --.-%", "|", "5", "of", "-", "|", "", "-", "", "-", "3", "|", "/data/3.bin"]
                .map(String::from)
        );
    }

    #[test]
    fn percent_matches_ratio_for_all_positions() {
        let start = Instant::now();
        let mut tracker = ProgressTracker::new(start, INTERVAL);
        let size = 37u64;
        let snaps: Vec<FdSnapshot> = (1..=size)
            .map(|pos| snap(&pos.to_string(), Some(pos), Some(size)))
            .collect();

        let rows = tracker.annotate(&snaps, start + Duration::from_secs(1));
        for (pos, row) in (1..=size).zip(rows) {
            let expected = format!("{:.1}%", pos as f64 * 100.0 / size as f64);
            assert_eq!(row[0].trim(), expected);
        }
    }
}
