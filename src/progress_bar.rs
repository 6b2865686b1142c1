//! Progress reporting for batch set-point searches (feature `progress`).
//!
//! [`batch_progress_bar`] draws one tick per rate scan. [`ScanTimer`] measures the time spent on
//! each scan and the curve rows it covered, so the bar message can show the last scan time, a
//! smoothed average and the row throughput of the batch.
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};

const TEMPLATE: &str = "{bar:40.cyan/blue} {pos}/{len} scans ({percent:>3}%) | ETA {eta_precise} | {msg}";

/// Progress bar for `len` rate scans, ticking every 200 ms.
pub fn batch_progress_bar(len: usize) -> ProgressBar {
    let pb = ProgressBar::new((len as u64).max(1));
    pb.set_style(
        ProgressStyle::with_template(TEMPLATE).unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    pb.enable_steady_tick(Duration::from_millis(200));
    pb
}

/// Per-scan timing of a batch.
///
/// The average scan time is an exponential moving average with weight `alpha` on the newest
/// scan; the row throughput is taken over the whole batch.
#[derive(Debug)]
pub struct ScanTimer {
    started: Instant,
    last: Instant,
    alpha: f64,
    avg_secs: Option<f64>,
    scans: u64,
    rows: usize,
}

impl ScanTimer {
    /// `alpha ∈ (0, 1]`; 1 keeps only the last scan.
    pub fn new(alpha: f64) -> Self {
        let now = Instant::now();
        ScanTimer {
            started: now,
            last: now,
            alpha: alpha.clamp(f64::MIN_POSITIVE, 1.0),
            avg_secs: None,
            scans: 0,
            rows: 0,
        }
    }

    /// Close the current scan, which covered `rows` curve rows, and return its duration.
    pub fn tick(&mut self, rows: usize) -> Duration {
        let now = Instant::now();
        let dt = now.duration_since(self.last);
        self.last = now;
        self.scans += 1;
        self.rows += rows;

        let secs = dt.as_secs_f64();
        self.avg_secs = Some(match self.avg_secs {
            None => secs,
            Some(avg) => self.alpha * secs + (1.0 - self.alpha) * avg,
        });
        dt
    }

    /// Smoothed time per scan, zero before the first tick.
    pub fn avg(&self) -> Duration {
        self.avg_secs.map_or(Duration::ZERO, Duration::from_secs_f64)
    }

    pub fn scans(&self) -> u64 {
        self.scans
    }

    /// Curve rows handled per second since the timer was created.
    pub fn rows_per_sec(&self) -> f64 {
        let elapsed = self.last.duration_since(self.started).as_secs_f64();
        if elapsed > 0.0 {
            self.rows as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Bar message after a scan that took `last`.
    pub fn message(&self, last: Duration) -> String {
        format!(
            "last: {}, avg: {}, {:.0} rows/s",
            fmt_dur(last),
            fmt_dur(self.avg()),
            self.rows_per_sec()
        )
    }
}

/// Short duration: `"253µs"`, `"42ms"`, `"3.14s"` or `"2m05s"`.
pub fn fmt_dur(d: Duration) -> String {
    let us = d.as_micros();
    if us < 1_000 {
        format!("{us}µs")
    } else if us < 1_000_000 {
        format!("{}ms", d.as_millis())
    } else if d.as_secs() < 60 {
        format!("{:.2}s", d.as_secs_f64())
    } else {
        format!("{}m{:02}s", d.as_secs() / 60, d.as_secs() % 60)
    }
}
