use moonrace_engine::SettlementReport;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const LATENCY_BUCKET_COUNT: usize = 12;
const LATENCY_BUCKETS_MS: [u64; LATENCY_BUCKET_COUNT] =
    [1, 2, 5, 10, 25, 50, 100, 250, 500, 1000, 2500, 5000];

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencySnapshot {
    pub buckets_ms: Vec<u64>,
    pub counts: Vec<u64>,
    pub overflow: u64,
    pub count: u64,
    pub avg_ms: f64,
    pub max_ms: u64,
}

#[derive(Default)]
struct LatencyMetrics {
    buckets: [AtomicU64; LATENCY_BUCKET_COUNT],
    overflow: AtomicU64,
    count: AtomicU64,
    total_ms: AtomicU64,
    max_ms: AtomicU64,
}

impl LatencyMetrics {
    fn record(&self, duration: Duration) {
        let ms = duration.as_millis() as u64;
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_ms.fetch_add(ms, Ordering::Relaxed);
        self.update_max(ms);

        if let Some((idx, _)) = LATENCY_BUCKETS_MS
            .iter()
            .enumerate()
            .find(|(_, bucket)| ms <= **bucket)
        {
            self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        } else {
            self.overflow.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn snapshot(&self) -> LatencySnapshot {
        let count = self.count.load(Ordering::Relaxed);
        let total_ms = self.total_ms.load(Ordering::Relaxed);
        let avg_ms = if count > 0 {
            total_ms as f64 / count as f64
        } else {
            0.0
        };
        let counts = self
            .buckets
            .iter()
            .map(|bucket| bucket.load(Ordering::Relaxed))
            .collect::<Vec<_>>();

        LatencySnapshot {
            buckets_ms: LATENCY_BUCKETS_MS.to_vec(),
            counts,
            overflow: self.overflow.load(Ordering::Relaxed),
            count,
            avg_ms,
            max_ms: self.max_ms.load(Ordering::Relaxed),
        }
    }

    fn update_max(&self, value: u64) {
        let mut current = self.max_ms.load(Ordering::Relaxed);
        while value > current {
            match self.max_ms.compare_exchange_weak(
                current,
                value,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(next) => current = next,
            }
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpMetricsSnapshot {
    pub create_game: LatencySnapshot,
    pub join_game: LatencySnapshot,
    pub lookup: LatencySnapshot,
    pub preview: LatencySnapshot,
    pub prices: LatencySnapshot,
    pub rejected_unauthorized: u64,
}

/// Per-endpoint-family latency histograms plus an auth rejection counter.
#[derive(Default)]
pub struct HttpMetrics {
    create_game: LatencyMetrics,
    join_game: LatencyMetrics,
    lookup: LatencyMetrics,
    preview: LatencyMetrics,
    prices: LatencyMetrics,
    rejected_unauthorized: AtomicU64,
}

impl HttpMetrics {
    pub fn record_create_game(&self, duration: Duration) {
        self.create_game.record(duration);
    }

    pub fn record_join_game(&self, duration: Duration) {
        self.join_game.record(duration);
    }

    pub fn record_lookup(&self, duration: Duration) {
        self.lookup.record(duration);
    }

    pub fn record_preview(&self, duration: Duration) {
        self.preview.record(duration);
    }

    pub fn record_prices(&self, duration: Duration) {
        self.prices.record(duration);
    }

    pub fn inc_rejected_unauthorized(&self) {
        self.rejected_unauthorized.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HttpMetricsSnapshot {
        HttpMetricsSnapshot {
            create_game: self.create_game.snapshot(),
            join_game: self.join_game.snapshot(),
            lookup: self.lookup.snapshot(),
            preview: self.preview.snapshot(),
            prices: self.prices.snapshot(),
            rejected_unauthorized: self.rejected_unauthorized.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementMetricsSnapshot {
    pub runs: u64,
    pub skipped: u64,
    pub failures: u64,
    pub games_completed: u64,
    pub last_run_ms: u64,
}

/// Lifetime counters for the settlement loop. `runs` counts passes that held
/// the lock and finished; `skipped` counts passes that found it taken.
#[derive(Default)]
pub struct SettlementMetrics {
    runs: AtomicU64,
    skipped: AtomicU64,
    failures: AtomicU64,
    games_completed: AtomicU64,
    last_run_ms: AtomicU64,
}

impl SettlementMetrics {
    pub fn record_report(&self, report: &SettlementReport, now_ms: u64) {
        if report.skipped {
            self.skipped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.runs.fetch_add(1, Ordering::Relaxed);
        self.games_completed
            .fetch_add(report.games_completed as u64, Ordering::Relaxed);
        self.last_run_ms.store(now_ms, Ordering::Relaxed);
    }

    pub fn inc_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SettlementMetricsSnapshot {
        SettlementMetricsSnapshot {
            runs: self.runs.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            games_completed: self.games_completed.load(Ordering::Relaxed),
            last_run_ms: self.last_run_ms.load(Ordering::Relaxed),
        }
    }
}
