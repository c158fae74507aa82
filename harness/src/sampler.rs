// harness/src/sampler.rs
// Background resource sampling into an append-only, time-ordered history

use crate::probe::ProcessProbe;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// One resource reading of the supervised process
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResourceSample {
    pub timestamp: DateTime<Utc>,
    pub cpu_percent: f64,
    pub memory_resident_bytes: u64,
    pub memory_percent: f64,
    pub open_file_count: u64,
    pub thread_count: u64,
    pub connection_count: u64,
}

impl ResourceSample {
    pub fn memory_mb(&self) -> f64 {
        self.memory_resident_bytes as f64 / 1024.0 / 1024.0
    }
}

/// Append-only sample history. One writer (the sampler loop), any number of readers.
#[derive(Debug, Default)]
pub struct SampleLog {
    samples: RwLock<Vec<ResourceSample>>,
}

impl SampleLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sample. Returns false, leaving the log untouched, when the
    /// timestamp is not strictly after the last one.
    pub fn append(&self, sample: ResourceSample) -> bool {
        let mut samples = self.samples.write();
        if let Some(last) = samples.last() {
            if sample.timestamp <= last.timestamp {
                warn!(
                    "Rejecting out-of-order sample at {} (last {})",
                    sample.timestamp, last.timestamp
                );
                return false;
            }
        }
        samples.push(sample);
        true
    }

    pub fn len(&self) -> usize {
        self.samples.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn latest(&self) -> Option<ResourceSample> {
        self.samples.read().last().copied()
    }

    pub fn snapshot(&self) -> Vec<ResourceSample> {
        self.samples.read().clone()
    }

    /// Read-only view of the samples with `start <= timestamp <= end`.
    pub fn window(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> SampleWindow<'_> {
        SampleWindow {
            log: self,
            start,
            end,
        }
    }

    /// Samples whose timestamp is at or after `since`.
    pub fn count_since(&self, since: DateTime<Utc>) -> usize {
        let samples = self.samples.read();
        samples.len() - samples.partition_point(|s| s.timestamp < since)
    }

    fn bounds(samples: &[ResourceSample], start: DateTime<Utc>, end: DateTime<Utc>) -> (usize, usize) {
        let lo = samples.partition_point(|s| s.timestamp < start);
        let hi = samples.partition_point(|s| s.timestamp <= end);
        (lo, hi.max(lo))
    }
}

/// Lazy window over a [`SampleLog`]. Each call to `iter` starts over and sees
/// every sample appended inside the window up to that moment.
#[derive(Debug, Clone, Copy)]
pub struct SampleWindow<'a> {
    log: &'a SampleLog,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl<'a> SampleWindow<'a> {
    pub fn iter(&self) -> SampleWindowIter<'a> {
        let samples = self.log.samples.read();
        let (next, stop) = SampleLog::bounds(&samples, self.start, self.end);
        SampleWindowIter {
            log: self.log,
            next,
            stop,
        }
    }

    pub fn len(&self) -> usize {
        let samples = self.log.samples.read();
        let (lo, hi) = SampleLog::bounds(&samples, self.start, self.end);
        hi - lo
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_vec(&self) -> Vec<ResourceSample> {
        let samples = self.log.samples.read();
        let (lo, hi) = SampleLog::bounds(&samples, self.start, self.end);
        samples[lo..hi].to_vec()
    }
}

impl<'a> IntoIterator for &SampleWindow<'a> {
    type Item = ResourceSample;
    type IntoIter = SampleWindowIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Walks a fixed index range, taking the read lock per element so the writer
/// is never held off for the length of a reduction.
pub struct SampleWindowIter<'a> {
    log: &'a SampleLog,
    next: usize,
    stop: usize,
}

impl Iterator for SampleWindowIter<'_> {
    type Item = ResourceSample;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.stop {
            return None;
        }
        let sample = self.log.samples.read().get(self.next).copied();
        self.next += 1;
        sample
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.stop.saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

/// Periodic reader of one process's counters.
///
/// The sampler only knows the pid; it never touches the process lifecycle.
pub struct Sampler {
    log: Arc<SampleLog>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Sampler {
    pub fn new(log: Arc<SampleLog>) -> Self {
        Self {
            log,
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    /// Start the sampling loop for `pid`. A loop that is already running is
    /// stopped first.
    #[instrument(skip(self))]
    pub async fn start(&mut self, pid: u32, interval: Duration) {
        self.stop().await;

        let cancel = CancellationToken::new();
        self.cancel = cancel.clone();
        let log = Arc::clone(&self.log);

        info!("📈 Sampling pid {} every {:?}", pid, interval);
        self.task = Some(tokio::spawn(sample_loop(pid, interval, log, cancel)));
    }

    /// Stop the loop. Returns after any in-flight tick has been appended.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Sampler task ended abnormally: {}", e);
            }
            debug!("Sampler stopped with {} samples recorded", self.log.len());
        }
    }

    /// Whether the loop is still producing samples.
    pub fn is_active(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn sample_loop(pid: u32, interval: Duration, log: Arc<SampleLog>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut probe = Some(ProcessProbe::new());

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let Some(mut current) = probe.take() else { break };
                let read = tokio::task::spawn_blocking(move || {
                    let sample = current.read(pid);
                    (current, sample)
                })
                .await;

                match read {
                    Ok((returned, Ok(sample))) => {
                        probe = Some(returned);
                        log.append(sample);
                    }
                    Ok((_, Err(e))) => {
                        // The process may be gone on purpose during failure scenarios
                        debug!("Sampling of pid {} ended: {}", pid, e);
                        break;
                    }
                    Err(e) => {
                        warn!("Probe task failed for pid {}: {}", pid, e);
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn sample_at(timestamp: DateTime<Utc>, memory_mb: u64) -> ResourceSample {
        ResourceSample {
            timestamp,
            cpu_percent: 1.0,
            memory_resident_bytes: memory_mb * 1024 * 1024,
            memory_percent: 0.5,
            open_file_count: 4,
            thread_count: 2,
            connection_count: 0,
        }
    }

    #[test]
    fn test_append_rejects_out_of_order() {
        let log = SampleLog::new();
        let t0 = Utc::now();

        assert!(log.append(sample_at(t0, 10)));
        assert!(!log.append(sample_at(t0, 11)));
        assert!(!log.append(sample_at(t0 - ChronoDuration::seconds(1), 12)));
        assert!(log.append(sample_at(t0 + ChronoDuration::seconds(1), 13)));

        assert_eq!(log.len(), 2);
        assert_eq!(log.latest().map(|s| s.memory_mb()), Some(13.0));
    }

    #[test]
    fn test_window_bounds_are_inclusive() {
        let log = SampleLog::new();
        let t0 = Utc::now();
        for i in 0..10 {
            log.append(sample_at(t0 + ChronoDuration::seconds(i), i as u64));
        }

        let window = log.window(t0 + ChronoDuration::seconds(2), t0 + ChronoDuration::seconds(5));
        let mbs: Vec<f64> = window.iter().map(|s| s.memory_mb()).collect();
        assert_eq!(mbs, vec![2.0, 3.0, 4.0, 5.0]);
        assert_eq!(window.len(), 4);

        // Restartable
        assert_eq!(window.iter().count(), 4);
        assert_eq!(window.to_vec().len(), 4);

        let empty = log.window(t0 + ChronoDuration::seconds(20), t0 + ChronoDuration::seconds(30));
        assert!(empty.is_empty());
        assert_eq!(empty.iter().next(), None);
    }

    #[test]
    fn test_window_sees_later_appends() {
        let log = SampleLog::new();
        let t0 = Utc::now();
        log.append(sample_at(t0, 1));

        let window = log.window(t0, t0 + ChronoDuration::seconds(60));
        assert_eq!(window.iter().count(), 1);

        log.append(sample_at(t0 + ChronoDuration::seconds(1), 2));
        assert_eq!(window.iter().count(), 2);
        assert_eq!(log.count_since(t0 + ChronoDuration::milliseconds(500)), 1);
    }

    #[tokio::test]
    async fn test_sampler_reads_own_process() {
        let log = Arc::new(SampleLog::new());
        let mut sampler = Sampler::new(Arc::clone(&log));

        sampler.start(std::process::id(), Duration::from_millis(20)).await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(sampler.is_active());
        sampler.stop().await;
        assert!(!sampler.is_active());

        let recorded = log.len();
        assert!(recorded >= 2, "only {} samples", recorded);

        let history = log.snapshot();
        assert!(history.windows(2).all(|w| w[0].timestamp < w[1].timestamp));

        // Nothing is appended once stop has returned
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(log.len(), recorded);
    }

    #[tokio::test]
    async fn test_sampler_ends_silently_for_missing_pid() {
        let log = Arc::new(SampleLog::new());
        let mut sampler = Sampler::new(Arc::clone(&log));

        sampler.start(4_194_304 + 17, Duration::from_millis(10)).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(!sampler.is_active());
        assert!(log.is_empty());
        sampler.stop().await;
    }
}
