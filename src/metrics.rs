//! C10 Metrics / Logger (spec §4.10).
//!
//! Lightweight atomic counters plus the URL-fingerprinting helper used
//! everywhere a log line needs to name a URL without leaking it: raw URLs
//! are never emitted at `info` level or above.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use sha2::{Digest, Sha256};

/// First 16 hex characters of `sha256(url)` — enough to correlate log
/// lines across a single request without recording the URL itself.
pub fn url_fingerprint(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    let digest = hasher.finalize();
    digest.iter().take(8).map(|b| format!("{b:02x}")).collect()
}

/// Lock-free min/max/sum/count duration recorder — the "histogram" named
/// alongside counters in spec §4.10/§8. No external metrics crate is
/// pulled in for this (nothing in this pack exports one for a library-only
/// crate); summary statistics are cheap enough as four atomics.
#[derive(Debug, Default)]
pub struct DurationHistogram {
    count: AtomicU64,
    sum_micros: AtomicU64,
    min_micros: AtomicU64,
    max_micros: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DurationSummary {
    pub count: u64,
    pub mean: Duration,
    pub min: Duration,
    pub max: Duration,
}

impl DurationHistogram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, d: Duration) {
        let micros = d.as_micros().min(u64::MAX as u128) as u64;
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_micros.fetch_add(micros, Ordering::Relaxed);
        self.min_micros.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cur| {
            Some(if cur == 0 { micros } else { cur.min(micros) })
        }).ok();
        self.max_micros.fetch_max(micros, Ordering::Relaxed);
    }

    pub fn summary(&self) -> DurationSummary {
        let count = self.count.load(Ordering::Relaxed);
        let sum = self.sum_micros.load(Ordering::Relaxed);
        let mean_micros = if count > 0 { sum / count } else { 0 };
        DurationSummary {
            count,
            mean: Duration::from_micros(mean_micros),
            min: Duration::from_micros(self.min_micros.load(Ordering::Relaxed)),
            max: Duration::from_micros(self.max_micros.load(Ordering::Relaxed)),
        }
    }
}

#[derive(Debug, Default)]
pub struct PipelineMetrics {
    pub urls_in: AtomicU64,
    pub validated: AtomicU64,
    pub rejected: AtomicU64,
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub downloaded: AtomicU64,
    pub download_failed: AtomicU64,
    pub decoded: AtomicU64,
    pub decode_failed: AtomicU64,
    pub selected: AtomicU64,
    pub normalize_failed: AtomicU64,
    pub bytes_downloaded: AtomicU64,
    pub download_duration: DurationHistogram,
    pub batch_duration: DurationHistogram,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, amount: u64) {
        counter.fetch_add(amount, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> crate::types::PipelineStats {
        crate::types::PipelineStats {
            urls_in: self.urls_in.load(Ordering::Relaxed),
            validated: self.validated.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            downloaded: self.downloaded.load(Ordering::Relaxed),
            decoded: self.decoded.load(Ordering::Relaxed),
            candidates: self.decoded.load(Ordering::Relaxed),
            selected: self.selected.load(Ordering::Relaxed),
            failed: self.rejected.load(Ordering::Relaxed)
                + self.download_failed.load(Ordering::Relaxed)
                + self.decode_failed.load(Ordering::Relaxed)
                + self.normalize_failed.load(Ordering::Relaxed),
            bytes_downloaded: self.bytes_downloaded.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic_and_short() {
        let a = url_fingerprint("https://cdn.example.com/a.jpg?token=secret");
        let b = url_fingerprint("https://cdn.example.com/a.jpg?token=secret");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn fingerprint_differs_for_different_urls() {
        let a = url_fingerprint("https://cdn.example.com/a.jpg");
        let b = url_fingerprint("https://cdn.example.com/b.jpg");
        assert_ne!(a, b);
    }

    #[test]
    fn duration_histogram_tracks_min_max_mean() {
        let hist = DurationHistogram::new();
        hist.record(Duration::from_millis(10));
        hist.record(Duration::from_millis(30));
        hist.record(Duration::from_millis(20));

        let summary = hist.summary();
        assert_eq!(summary.count, 3);
        assert_eq!(summary.min, Duration::from_millis(10));
        assert_eq!(summary.max, Duration::from_millis(30));
        assert_eq!(summary.mean, Duration::from_millis(20));
    }

    #[test]
    fn empty_histogram_summary_is_zeroed() {
        let hist = DurationHistogram::new();
        let summary = hist.summary();
        assert_eq!(summary.count, 0);
        assert_eq!(summary.mean, Duration::ZERO);
    }

    #[test]
    fn metrics_snapshot_reflects_increments() {
        let metrics = PipelineMetrics::new();
        PipelineMetrics::incr(&metrics.urls_in);
        PipelineMetrics::incr(&metrics.urls_in);
        PipelineMetrics::add(&metrics.bytes_downloaded, 4096);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.urls_in, 2);
        assert_eq!(snapshot.bytes_downloaded, 4096);
    }
}
