//! Metric computations over a chronologically ordered event stream.
//!
//! Every function here is pure: same events and config, same output.

use crate::config::StatsConfig;
use crate::core::event::KeystrokeEvent;
use crate::stats::snapshot::{Burst, IntervalDistribution, Percentiles, Summary, WpmPoint};
use statrs::statistics::{Data, Median, Statistics};
use std::time::Duration;

/// Characters per word in WPM.
pub const CHARS_PER_WORD: f64 = 5.0;

/// WPM for consecutive windows, each anchored at its first event.
///
/// Windows holding no events are not emitted. Backspaces do not count.
pub fn wpm_series(events: &[KeystrokeEvent], window: Duration) -> Vec<WpmPoint> {
    let window_ms = (window.as_millis() as i64).max(1);
    let window_span = chrono::Duration::milliseconds(window_ms);
    let minutes = window_ms as f64 / 60_000.0;

    let mut points = Vec::new();
    let mut i = 0;
    while i < events.len() {
        let window_start = events[i].timestamp;
        let window_end = window_start + window_span;

        let mut typed = 0usize;
        while i < events.len() && events[i].timestamp < window_end {
            if !events[i].is_backspace {
                typed += 1;
            }
            i += 1;
        }

        points.push(WpmPoint {
            window_start,
            wpm: round_to(typed as f64 / CHARS_PER_WORD / minutes, 1),
        });
    }
    points
}

/// Intervals that measure a real gap between two keystrokes.
///
/// Session-start sentinels and gaps longer than the idle threshold are
/// excluded.
pub fn active_intervals(events: &[KeystrokeEvent], idle_threshold_ms: u64) -> Vec<u64> {
    events
        .iter()
        .filter_map(|e| e.interval_ms)
        .filter(|&ms| ms <= idle_threshold_ms)
        .collect()
}

/// Labels for the buckets delimited by ascending `edges`.
///
/// `[50, 100]` gives `<50`, `50-100`, `100+`.
pub fn bucket_labels(edges: &[u64]) -> Vec<String> {
    let Some((&first, _)) = edges.split_first() else {
        return vec!["0+".to_string()];
    };

    let mut labels = Vec::with_capacity(edges.len() + 1);
    labels.push(format!("<{first}"));
    for pair in edges.windows(2) {
        labels.push(format!("{}-{}", pair[0], pair[1]));
    }
    if let Some(last) = edges.last() {
        labels.push(format!("{last}+"));
    }
    labels
}

/// Histogram and moments of `intervals`.
pub fn interval_distribution(intervals: &[u64], edges: &[u64]) -> IntervalDistribution {
    let mut edges = edges.to_vec();
    edges.sort_unstable();
    edges.dedup();

    let mut counts = vec![0u64; edges.len() + 1];
    for &ms in intervals {
        // Index of the first edge above `ms`; values equal to an edge go up.
        let bucket = edges.partition_point(|&edge| edge <= ms);
        counts[bucket] += 1;
    }
    let buckets = bucket_labels(&edges).into_iter().zip(counts).collect();

    if intervals.is_empty() {
        return IntervalDistribution {
            buckets,
            ..Default::default()
        };
    }

    let mut values: Vec<f64> = intervals.iter().map(|&ms| ms as f64).collect();
    values.sort_by(f64::total_cmp);
    let data = Data::new(values.clone());

    IntervalDistribution {
        buckets,
        mean: round_to(values.iter().mean(), 1),
        median: round_to(data.median(), 1),
        std_dev: round_to(values.iter().population_std_dev(), 1),
        percentiles: Percentiles {
            p25: round_to(percentile(&values, 25.0), 1),
            p50: round_to(percentile(&values, 50.0), 1),
            p75: round_to(percentile(&values, 75.0), 1),
            p95: round_to(percentile(&values, 95.0), 1),
        },
    }
}

/// Percentile of sorted values, interpolating linearly between the two
/// closest ranks (R-7, as spreadsheets compute it).
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let Some(&first) = sorted.first() else {
        return 0.0;
    };
    let rank = (sorted.len() - 1) as f64 * p / 100.0;
    let lower = rank.floor() as usize;
    let fraction = rank - lower as f64;
    match (sorted.get(lower), sorted.get(lower + 1)) {
        (Some(&low), Some(&high)) => low + fraction * (high - low),
        (Some(&low), None) => low,
        _ => first,
    }
}

/// Segment the stream into bursts of fast typing.
///
/// A burst starts at the event before the first fast interval and grows
/// while intervals stay below the threshold. It ends at a slow interval, a
/// session-start sentinel, or once consecutive backspaces exceed
/// `max_backspace_run`.
pub fn detect_bursts(events: &[KeystrokeEvent], config: &StatsConfig) -> Vec<Burst> {
    let mut bursts = Vec::new();
    // (index of first event, index of last event)
    let mut open: Option<(usize, usize)> = None;
    let mut backspace_run = 0usize;

    for (i, event) in events.iter().enumerate() {
        backspace_run = if event.is_backspace {
            backspace_run + 1
        } else {
            0
        };

        let fast = event
            .interval_ms
            .is_some_and(|ms| ms < config.burst_threshold_ms);
        let runaway_correction = backspace_run > config.max_backspace_run;

        if fast && !runaway_correction {
            match open.as_mut() {
                Some((_, last)) => *last = i,
                None => open = Some((i.saturating_sub(1), i)),
            }
        } else if let Some((first, last)) = open.take() {
            close_burst(events, first, last, config, &mut bursts);
        }
    }

    if let Some((first, last)) = open {
        close_burst(events, first, last, config, &mut bursts);
    }
    bursts
}

fn close_burst(
    events: &[KeystrokeEvent],
    first: usize,
    last: usize,
    config: &StatsConfig,
    bursts: &mut Vec<Burst>,
) {
    let event_count = last - first + 1;
    if event_count < config.min_burst_events {
        return;
    }
    let start = events[first].timestamp;
    let end = events[last].timestamp;
    bursts.push(Burst {
        start,
        end,
        event_count,
        duration_ms: (end - start).num_milliseconds().max(0) as u64,
    });
}

/// Number of sessions: one, plus one per idle gap. Zero without events.
pub fn count_sessions(events: &[KeystrokeEvent], idle_threshold_ms: u64) -> usize {
    if events.is_empty() {
        return 0;
    }
    let gaps = events
        .windows(2)
        .filter(|pair| {
            let gap = (pair[1].timestamp - pair[0].timestamp).num_milliseconds();
            gap > idle_threshold_ms as i64
        })
        .count();
    1 + gaps
}

/// Headline counters over the full data set.
pub fn summarize(
    events: &[KeystrokeEvent],
    intervals: &[u64],
    wpm: &[WpmPoint],
    bursts: &[Burst],
    config: &StatsConfig,
) -> Summary {
    let total_events = events.len();
    let backspaces = events.iter().filter(|e| e.is_backspace).count();

    let (avg_interval_ms, median_interval_ms) = if intervals.is_empty() {
        (0.0, 0.0)
    } else {
        let values: Vec<f64> = intervals.iter().map(|&ms| ms as f64).collect();
        let median = Data::new(values.clone()).median();
        (round_to(values.iter().mean(), 1), round_to(median, 1))
    };

    Summary {
        total_events,
        total_sessions: count_sessions(events, config.idle_threshold_ms()),
        avg_interval_ms,
        median_interval_ms,
        backspace_ratio: ratio(backspaces, total_events, 3),
        avg_wpm: mean_or_zero(wpm.iter().map(|p| p.wpm)),
        total_bursts: bursts.len(),
        avg_burst_length: mean_or_zero(bursts.iter().map(|b| b.event_count as f64)),
        skipped_rows: 0,
        files_read: 0,
    }
}

fn mean_or_zero(values: impl Iterator<Item = f64>) -> f64 {
    let values: Vec<f64> = values.collect();
    if values.is_empty() {
        0.0
    } else {
        round_to(values.iter().mean(), 1)
    }
}

fn ratio(part: usize, whole: usize, places: i32) -> f64 {
    if whole == 0 {
        0.0
    } else {
        round_to(part as f64 / whole as f64, places)
    }
}

fn round_to(value: f64, places: i32) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
