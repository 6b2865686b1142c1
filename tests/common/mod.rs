#![allow(dead_code)]

use std::f64::consts::E;

use ratescan::{
    metadata::{RunMetadata, RunMetadataTable},
    models::{nsb_contribution, power_law, ratescan_func},
    SampleTable,
};

pub const ONTIME: f64 = 160.0;
pub const SATURATION: f64 = 5000.0;
pub const NIGHT: i64 = 20150901;

/// Shower `(m, a, b)` and NSB `(m_0, t_0)` parameters of the synthetic scans.
pub const SHOWER: [f64; 3] = [5.5e10, -3.0, 0.0];
pub const NSB: [f64; 2] = [-0.0219, 695.0];

/// Rate of the synthetic scan, saturated by the readout at low thresholds.
pub fn true_rate(t: f64) -> f64 {
    ratescan_func(t, SHOWER[0], SHOWER[1], SHOWER[2], NSB[0], NSB[1]).min(SATURATION)
}

/// Counts of one run over thresholds `0..1000`, as recorded during `ONTIME` seconds.
pub fn synthetic_counts() -> Vec<(f64, u64)> {
    (0..1000)
        .map(|t| {
            let t = t as f64;
            (t, (true_rate(t) * ONTIME).round() as u64)
        })
        .collect()
}

/// Sample table of several runs.
///
/// The counts of every threshold are split over `n_events` events. One extra event fires a
/// single primitive at every threshold up to `marker_threshold`, which makes it the max
/// possible threshold to keep of the run.
pub fn synthetic_table(runs: &[i64], n_events: u64, marker_threshold: f64) -> SampleTable {
    let mut rows = Vec::new();
    for &run in runs {
        for (t, total) in synthetic_counts() {
            for event in 0..n_events {
                let share = total / n_events + u64::from(event < total % n_events);
                rows.push((NIGHT, run, event as i64, t, share));
            }
            if t <= marker_threshold {
                rows.push((NIGHT, run, n_events as i64, t, 1));
            }
        }
    }
    SampleTable::from_rows(&rows)
}

pub fn run_db(runs: &[i64]) -> RunMetadataTable {
    RunMetadataTable::new(
        runs.iter()
            .map(|&run| RunMetadata::with_ontime(NIGHT, run, ONTIME))
            .collect(),
    )
}

/// Crossing of `power_law / (e · scale)` and `nsb_contribution` for the true parameters,
/// by bisection on `[lo, hi]`.
pub fn analytic_set_threshold(scale: f64, mut lo: f64, mut hi: f64) -> f64 {
    let f = |t: f64| {
        power_law(t, SHOWER[0], SHOWER[1], SHOWER[2]) / (E * scale)
            - nsb_contribution(t, NSB[0], NSB[1])
    };
    assert!(f(lo) * f(hi) < 0.0, "no sign change on the bracket");
    for _ in 0..200 {
        let mid = 0.5 * (lo + hi);
        if f(lo) * f(mid) <= 0.0 {
            hi = mid;
        } else {
            lo = mid;
        }
    }
    0.5 * (lo + hi)
}
