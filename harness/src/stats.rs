// harness/src/stats.rs
// Reductions over operation outcomes and resource samples

use crate::sampler::ResourceSample;
use crate::workload::OperationOutcome;
use serde::Serialize;

/// Samples required before p95 is reported
pub const P95_MIN_SAMPLES: usize = 20;
/// Samples required before p99 is reported
pub const P99_MIN_SAMPLES: usize = 100;
/// Memory snapshots required before a trend is classified
pub const TREND_MIN_SAMPLES: usize = 10;
/// Slope, in MB per sample, beyond which memory counts as moving
pub const TREND_SLOPE_THRESHOLD: f64 = 0.1;

/// Latency figures for one batch of outcomes
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LatencySummary {
    pub count: usize,
    pub successful: usize,
    pub success_rate: f64,
    pub avg_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

/// Reduce outcomes to counts, success rate and latency percentiles.
///
/// Latencies come from successful outcomes only. Percentiles below their
/// sample threshold are reported as 0 rather than interpolated.
pub fn reduce_latencies(outcomes: &[OperationOutcome]) -> LatencySummary {
    let count = outcomes.len();
    let mut latencies: Vec<f64> = outcomes
        .iter()
        .filter(|o| o.success)
        .map(|o| o.duration.as_nanos() as f64 / 1_000_000.0)
        .collect();
    latencies.sort_by(|a, b| a.total_cmp(b));

    let successful = latencies.len();
    let avg_ms = if successful > 0 {
        latencies.iter().sum::<f64>() / successful as f64
    } else {
        0.0
    };

    LatencySummary {
        count,
        successful,
        success_rate: success_rate(successful, count),
        avg_ms,
        p95_ms: percentile(&latencies, 0.95, P95_MIN_SAMPLES),
        p99_ms: percentile(&latencies, 0.99, P99_MIN_SAMPLES),
    }
}

/// Value at index `floor(q * (n - 1))` of an ascending slice, or 0 when the
/// slice holds fewer than `min_samples` values.
pub fn percentile(sorted: &[f64], q: f64, min_samples: usize) -> f64 {
    let n = sorted.len();
    if n == 0 || n < min_samples {
        return 0.0;
    }
    let index = (q * (n - 1) as f64).floor() as usize;
    sorted[index.min(n - 1)]
}

/// `successful / total`, 0 for an empty batch
pub fn success_rate(successful: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        successful as f64 / total as f64
    }
}

/// Operations per second, 0 for a non-positive duration
pub fn throughput(count: usize, duration_secs: f64) -> f64 {
    if duration_secs <= 0.0 {
        0.0
    } else {
        count as f64 / duration_secs
    }
}

/// Aggregate and peak resource figures over a sample window
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResourceSummary {
    pub avg_cpu_percent: f64,
    pub max_cpu_percent: f64,
    pub avg_memory_mb: f64,
    pub max_memory_mb: f64,
    pub avg_open_files: f64,
    pub max_open_files: u64,
    pub avg_threads: f64,
    pub max_threads: u64,
    pub sample_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResourceUsage {
    Measured(ResourceSummary),
    /// The window contained no samples
    NoData,
}

impl ResourceUsage {
    pub fn summary(&self) -> Option<&ResourceSummary> {
        match self {
            ResourceUsage::Measured(summary) => Some(summary),
            ResourceUsage::NoData => None,
        }
    }
}

pub fn summarize_resources<I>(samples: I) -> ResourceUsage
where
    I: IntoIterator<Item = ResourceSample>,
{
    let mut n = 0usize;
    let (mut cpu_sum, mut cpu_max) = (0.0f64, f64::MIN);
    let (mut mem_sum, mut mem_max) = (0.0f64, f64::MIN);
    let (mut files_sum, mut files_max) = (0u64, 0u64);
    let (mut threads_sum, mut threads_max) = (0u64, 0u64);

    for sample in samples {
        n += 1;
        cpu_sum += sample.cpu_percent;
        cpu_max = cpu_max.max(sample.cpu_percent);
        let mb = sample.memory_mb();
        mem_sum += mb;
        mem_max = mem_max.max(mb);
        files_sum += sample.open_file_count;
        files_max = files_max.max(sample.open_file_count);
        threads_sum += sample.thread_count;
        threads_max = threads_max.max(sample.thread_count);
    }

    if n == 0 {
        return ResourceUsage::NoData;
    }

    let count = n as f64;
    ResourceUsage::Measured(ResourceSummary {
        avg_cpu_percent: cpu_sum / count,
        max_cpu_percent: cpu_max,
        avg_memory_mb: mem_sum / count,
        max_memory_mb: mem_max,
        avg_open_files: files_sum as f64 / count,
        max_open_files: files_max,
        avg_threads: threads_sum as f64 / count,
        max_threads: threads_max,
        sample_count: n,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
    InsufficientData,
}

/// Leak signal over ordered memory snapshots. Advisory only.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MemoryTrend {
    pub trend: TrendDirection,
    /// OLS slope in MB per sample
    pub slope: f64,
    pub initial_mb: f64,
    pub final_mb: f64,
    pub peak_mb: f64,
    pub growth_mb: f64,
    pub samples: usize,
}

pub fn detect_memory_trend(memory_mb: &[f64]) -> MemoryTrend {
    let n = memory_mb.len();
    let initial_mb = memory_mb.first().copied().unwrap_or(0.0);
    let final_mb = memory_mb.last().copied().unwrap_or(0.0);
    let peak_mb = memory_mb.iter().copied().fold(0.0, f64::max);

    let mut trend = MemoryTrend {
        trend: TrendDirection::InsufficientData,
        slope: 0.0,
        initial_mb,
        final_mb,
        peak_mb,
        growth_mb: final_mb - initial_mb,
        samples: n,
    };

    if n < TREND_MIN_SAMPLES {
        return trend;
    }

    // Least squares against the sample index
    let count = n as f64;
    let x_mean = (count - 1.0) / 2.0;
    let y_mean = memory_mb.iter().sum::<f64>() / count;
    let (mut num, mut den) = (0.0, 0.0);
    for (i, y) in memory_mb.iter().enumerate() {
        let dx = i as f64 - x_mean;
        num += dx * (y - y_mean);
        den += dx * dx;
    }
    let slope = if den > 0.0 { num / den } else { 0.0 };

    trend.slope = slope;
    trend.trend = if slope > TREND_SLOPE_THRESHOLD {
        TrendDirection::Increasing
    } else if slope < -TREND_SLOPE_THRESHOLD {
        TrendDirection::Decreasing
    } else {
        TrendDirection::Stable
    };
    trend
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
}

impl Grade {
    /// Grade from average success rate and average throughput of the load scenarios
    pub fn from_averages(avg_success_rate: f64, avg_throughput: f64) -> Self {
        if avg_success_rate >= 0.99 && avg_throughput >= 100.0 {
            Grade::A
        } else if avg_success_rate >= 0.95 && avg_throughput >= 50.0 {
            Grade::B
        } else if avg_success_rate >= 0.90 && avg_throughput >= 25.0 {
            Grade::C
        } else {
            Grade::D
        }
    }
}

impl std::fmt::Display for Grade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let letter = match self {
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
        };
        f.write_str(letter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;
    use std::time::Duration;

    fn outcome(ms: u64, success: bool) -> OperationOutcome {
        OperationOutcome {
            started_at: Utc::now(),
            duration: Duration::from_millis(ms),
            success,
            error: (!success).then(|| "failed".to_string()),
        }
    }

    fn sample(cpu: f64, memory_mb: u64, files: u64, threads: u64) -> ResourceSample {
        ResourceSample {
            timestamp: Utc::now(),
            cpu_percent: cpu,
            memory_resident_bytes: memory_mb * 1024 * 1024,
            memory_percent: 1.0,
            open_file_count: files,
            thread_count: threads,
            connection_count: 0,
        }
    }

    #[test]
    fn test_empty_batch() {
        let summary = reduce_latencies(&[]);
        assert_eq!(summary.count, 0);
        assert_eq!(summary.success_rate, 0.0);
        assert_eq!(summary.avg_ms, 0.0);
        assert_eq!(summary.p95_ms, 0.0);
    }

    #[test]
    fn test_percentile_thresholds() {
        // 1..=19 ms: below the p95 threshold
        let small: Vec<_> = (1..=19).map(|ms| outcome(ms, true)).collect();
        assert_eq!(reduce_latencies(&small).p95_ms, 0.0);

        // 1..=20 ms: index floor(0.95 * 19) = 18
        let twenty: Vec<_> = (1..=20).map(|ms| outcome(ms, true)).collect();
        let summary = reduce_latencies(&twenty);
        assert_eq!(summary.p95_ms, 19.0);
        assert_eq!(summary.p99_ms, 0.0);
        assert_eq!(summary.avg_ms, 10.5);

        // 1..=100 ms: p99 index floor(0.99 * 99) = 98
        let hundred: Vec<_> = (1..=100).rev().map(|ms| outcome(ms, true)).collect();
        let summary = reduce_latencies(&hundred);
        assert_eq!(summary.p95_ms, 95.0);
        assert_eq!(summary.p99_ms, 99.0);
    }

    #[test]
    fn test_failures_count_but_do_not_contribute_latency() {
        let mut outcomes: Vec<_> = (0..9).map(|_| outcome(10, true)).collect();
        outcomes.push(outcome(5000, false));

        let summary = reduce_latencies(&outcomes);
        assert_eq!(summary.count, 10);
        assert_eq!(summary.successful, 9);
        assert!((summary.success_rate - 0.9).abs() < 1e-12);
        assert_eq!(summary.avg_ms, 10.0);
    }

    #[test]
    fn test_throughput() {
        assert_eq!(throughput(100, 4.0), 25.0);
        assert_eq!(throughput(100, 0.0), 0.0);
        assert_eq!(throughput(100, -1.0), 0.0);
    }

    #[test]
    fn test_resource_summary() {
        let usage = summarize_resources(vec![sample(10.0, 100, 8, 4), sample(30.0, 200, 12, 6)]);
        let summary = usage.summary().copied().unwrap();

        assert_eq!(summary.sample_count, 2);
        assert_eq!(summary.avg_cpu_percent, 20.0);
        assert_eq!(summary.max_cpu_percent, 30.0);
        assert_eq!(summary.avg_memory_mb, 150.0);
        assert_eq!(summary.max_memory_mb, 200.0);
        assert_eq!(summary.avg_open_files, 10.0);
        assert_eq!(summary.max_threads, 6);
    }

    #[test]
    fn test_empty_window_is_no_data() {
        let usage = summarize_resources(Vec::new());
        assert_eq!(usage, ResourceUsage::NoData);
        assert_eq!(
            serde_json::to_value(usage).unwrap(),
            serde_json::json!({"status": "no_data"})
        );
    }

    #[test]
    fn test_increasing_memory_trend() {
        let memory: Vec<f64> = (100..120).map(f64::from).collect();
        let trend = detect_memory_trend(&memory);

        assert_eq!(trend.trend, TrendDirection::Increasing);
        assert!((trend.slope - 1.0).abs() < 1e-9);
        assert_eq!(trend.initial_mb, 100.0);
        assert_eq!(trend.final_mb, 119.0);
        assert_eq!(trend.peak_mb, 119.0);
        assert_eq!(trend.growth_mb, 19.0);
    }

    #[test]
    fn test_constant_memory_is_stable() {
        let trend = detect_memory_trend(&[64.0; 20]);
        assert_eq!(trend.trend, TrendDirection::Stable);
        assert_eq!(trend.slope, 0.0);
        assert_eq!(trend.growth_mb, 0.0);
    }

    #[test]
    fn test_decreasing_and_insufficient() {
        let falling: Vec<f64> = (0..12).map(|i| 200.0 - i as f64).collect();
        assert_eq!(detect_memory_trend(&falling).trend, TrendDirection::Decreasing);

        let short = detect_memory_trend(&[1.0, 2.0, 3.0]);
        assert_eq!(short.trend, TrendDirection::InsufficientData);
        assert_eq!(short.peak_mb, 3.0);
    }

    #[test]
    fn test_grades() {
        assert_eq!(Grade::from_averages(0.995, 150.0), Grade::A);
        assert_eq!(Grade::from_averages(0.995, 60.0), Grade::B);
        assert_eq!(Grade::from_averages(0.92, 400.0), Grade::C);
        assert_eq!(Grade::from_averages(0.80, 400.0), Grade::D);
        assert_eq!(Grade::B.to_string(), "B");
    }

    proptest! {
        #[test]
        fn prop_success_rate_bounded(flags in proptest::collection::vec(any::<bool>(), 0..200)) {
            let outcomes: Vec<_> = flags.iter().map(|s| outcome(1, *s)).collect();
            let summary = reduce_latencies(&outcomes);
            prop_assert!((0.0..=1.0).contains(&summary.success_rate));
            if outcomes.is_empty() {
                prop_assert_eq!(summary.success_rate, 0.0);
            }
        }

        #[test]
        fn prop_p95_follows_index_rule(mut latencies in proptest::collection::vec(0u64..10_000, 0..300)) {
            let outcomes: Vec<_> = latencies.iter().map(|ms| outcome(*ms, true)).collect();
            let summary = reduce_latencies(&outcomes);
            latencies.sort_unstable();

            let n = latencies.len();
            if n < P95_MIN_SAMPLES {
                prop_assert_eq!(summary.p95_ms, 0.0);
            } else {
                let expected = latencies[(0.95 * (n - 1) as f64).floor() as usize] as f64;
                prop_assert_eq!(summary.p95_ms, expected);
            }
        }
    }
}
