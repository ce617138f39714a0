//! Activity reporter: per-function aggregation and daily trends.
//!
//! Reads the JSONL function log and provides the numbers behind
//! `vitalwatch activity`.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::activity::logger::FunctionLogEntry;

// ---------------------------------------------------------------------------
// Aggregated stats
// ---------------------------------------------------------------------------

/// Summary statistics for `vitalwatch activity`.
#[derive(Debug, Default, Serialize)]
pub struct ActivityStats {
    pub total_invocations: usize,
    pub failures: usize,
    pub abnormal_reports: usize,
    pub avg_latency_ms: f64,
    pub functions: Vec<FunctionStat>,
    pub daily: Vec<DailyEntry>,
}

impl ActivityStats {
    /// Share of invocations that returned a 2xx status, in percent.
    pub fn success_pct(&self) -> f64 {
        if self.total_invocations == 0 {
            0.0
        } else {
            let ok = self.total_invocations - self.failures;
            (ok as f64 / self.total_invocations as f64) * 100.0
        }
    }
}

/// Per-function aggregated statistics.
#[derive(Debug, Clone, Serialize)]
pub struct FunctionStat {
    pub function: String,
    pub count: usize,
    pub failures: usize,
    pub avg_latency_ms: f64,
    /// Most frequent non-success status, if any.
    pub top_error_status: Option<u16>,
}

/// One day's invocation count.
#[derive(Debug, Clone, Serialize)]
pub struct DailyEntry {
    pub date: String,
    pub invocations: usize,
    pub failures: usize,
}

// ---------------------------------------------------------------------------
// Computation
// ---------------------------------------------------------------------------

pub fn build_stats(entries: &[FunctionLogEntry]) -> ActivityStats {
    if entries.is_empty() {
        return ActivityStats::default();
    }

    let total_invocations = entries.len();
    let failures = entries.iter().filter(|e| !e.succeeded()).count();
    let abnormal_reports = entries.iter().filter(|e| e.abnormal == Some(true)).count();

    ActivityStats {
        total_invocations,
        failures,
        abnormal_reports,
        avg_latency_ms: avg_latency(entries.iter()),
        functions: compute_function_stats(entries),
        daily: compute_daily(entries),
    }
}

fn avg_latency<'a>(entries: impl Iterator<Item = &'a FunctionLogEntry>) -> f64 {
    let (sum, n) = entries.fold((0u64, 0usize), |(sum, n), e| (sum + e.latency_ms, n + 1));
    if n == 0 { 0.0 } else { sum as f64 / n as f64 }
}

/// Group entries by function name. Sorted by invocation count, busiest first.
fn compute_function_stats(entries: &[FunctionLogEntry]) -> Vec<FunctionStat> {
    let mut groups: HashMap<&str, Vec<&FunctionLogEntry>> = HashMap::new();
    for entry in entries {
        groups.entry(&entry.function).or_default().push(entry);
    }

    let mut stats: Vec<FunctionStat> = groups
        .into_iter()
        .map(|(function, group)| {
            let mut status_counts: HashMap<u16, usize> = HashMap::new();
            for e in group.iter().filter(|e| !e.succeeded()) {
                *status_counts.entry(e.status).or_default() += 1;
            }
            let failures = status_counts.values().sum();
            let top_error_status = status_counts
                .into_iter()
                .max_by_key(|&(status, c)| (c, std::cmp::Reverse(status)))
                .map(|(status, _)| status);

            FunctionStat {
                function: function.to_string(),
                count: group.len(),
                failures,
                avg_latency_ms: avg_latency(group.iter().copied()),
                top_error_status,
            }
        })
        .collect();

    stats.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.function.cmp(&b.function)));
    stats
}

/// Daily counts, ascending by date.
fn compute_daily(entries: &[FunctionLogEntry]) -> Vec<DailyEntry> {
    let mut daily: BTreeMap<String, (usize, usize)> = BTreeMap::new();
    for entry in entries {
        let date = entry.timestamp.format("%Y-%m-%d").to_string();
        let slot = daily.entry(date).or_default();
        slot.0 += 1;
        if !entry.succeeded() {
            slot.1 += 1;
        }
    }

    daily
        .into_iter()
        .map(|(date, (invocations, failures))| DailyEntry {
            date,
            invocations,
            failures,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
