//! Throughput accounting for a load run.

use std::{
    fmt::Display,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::{task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::BatchStats;

/// Append-only counters the workers add to after every processed batch
#[derive(Debug, Default)]
pub(crate) struct LoadCounters {
    metrics: AtomicU64,
    rows: AtomicU64,
}

impl LoadCounters {
    pub(crate) fn add(&self, stats: BatchStats) {
        self.metrics.fetch_add(stats.metrics, Ordering::Relaxed);
        self.rows.fetch_add(stats.rows, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> BatchStats {
        BatchStats {
            metrics: self.metrics.load(Ordering::Relaxed),
            rows: self.rows.load(Ordering::Relaxed),
        }
    }
}

/// Logs period and overall rates at a fixed period until cancelled
#[derive(Debug)]
pub(crate) struct ProgressReporter {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ProgressReporter {
    pub(crate) fn spawn(counters: Arc<LoadCounters>, period: Duration, start: Instant) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(start + period, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut prev = BatchStats::default();
            let mut prev_time = start;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    now = interval.tick() => {
                        let current = counters.snapshot();
                        let period_secs = (now - prev_time).as_secs_f64();
                        let total_secs = (now - start).as_secs_f64();
                        info!(
                            elapsed_secs = format!("{total_secs:.0}"),
                            period_metric_rate = format!("{:.2}", rate(current.metrics - prev.metrics, period_secs)),
                            metric_total = current.metrics,
                            overall_metric_rate = format!("{:.2}", rate(current.metrics, total_secs)),
                            period_row_rate = format!("{:.2}", rate(current.rows - prev.rows, period_secs)),
                            row_total = current.rows,
                            overall_row_rate = format!("{:.2}", rate(current.rows, total_secs)),
                            "load progress"
                        );
                        prev = current;
                        prev_time = now;
                    }
                }
            }
        });
        Self { cancel, handle }
    }

    pub(crate) async fn stop(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}

fn rate(count: u64, secs: f64) -> f64 {
    if secs > 0.0 { count as f64 / secs } else { 0.0 }
}

/// Final outcome of a load run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadSummary {
    pub metrics: u64,
    pub rows: u64,
    pub elapsed: Duration,
    pub workers: usize,
}

impl LoadSummary {
    pub fn metric_rate(&self) -> f64 {
        rate(self.metrics, self.elapsed.as_secs_f64())
    }

    pub fn row_rate(&self) -> f64 {
        rate(self.rows, self.elapsed.as_secs_f64())
    }
}

impl Display for LoadSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let secs = self.elapsed.as_secs_f64();
        writeln!(
            f,
            "loaded {} metrics in {secs:.3}sec with {} workers (mean rate {:.2} metrics/sec)",
            self.metrics,
            self.workers,
            self.metric_rate()
        )?;
        write!(
            f,
            "loaded {} rows in {secs:.3}sec with {} workers (mean rate {:.2} rows/sec)",
            self.rows,
            self.workers,
            self.row_rate()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let counters = LoadCounters::default();
        counters.add(BatchStats {
            metrics: 10,
            rows: 1,
        });
        counters.add(BatchStats {
            metrics: 5,
            rows: 2,
        });
        assert_eq!(
            BatchStats {
                metrics: 15,
                rows: 3
            },
            counters.snapshot()
        );
    }

    #[test]
    fn summary_display() {
        let summary = LoadSummary {
            metrics: 2000,
            rows: 200,
            elapsed: Duration::from_secs(2),
            workers: 4,
        };
        let expected = "\
loaded 2000 metrics in 2.000sec with 4 workers (mean rate 1000.00 metrics/sec)
loaded 200 rows in 2.000sec with 4 workers (mean rate 100.00 rows/sec)";
        assert_eq!(expected, summary.to_string());
    }

    #[test]
    fn summary_zero_elapsed_has_zero_rate() {
        let summary = LoadSummary {
            metrics: 1,
            rows: 1,
            elapsed: Duration::ZERO,
            workers: 1,
        };
        assert_eq!(0.0, summary.metric_rate());
    }

    /// Collects formatted log output of the current thread
    #[derive(Clone, Default)]
    struct Capture(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl std::io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Capture {
        fn progress_lines(&self) -> Vec<String> {
            String::from_utf8_lossy(&self.0.lock())
                .lines()
                .filter(|line| line.contains("load progress"))
                .map(str::to_string)
                .collect()
        }
    }

    #[tokio::test]
    async fn reporter_stops_on_cancel() {
        let capture = Capture::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer({
                let capture = capture.clone();
                move || capture.clone()
            })
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let counters = Arc::new(LoadCounters::default());
        let reporter = ProgressReporter::spawn(
            Arc::clone(&counters),
            Duration::from_millis(10),
            Instant::now(),
        );
        counters.add(BatchStats {
            metrics: 3,
            rows: 1,
        });
        tokio::time::sleep(Duration::from_millis(35)).await;
        reporter.stop().await;

        let reported = capture.progress_lines();
        assert!(!reported.is_empty());
        assert!(reported.iter().all(|line| line.contains("metric_total=3")), "{reported:?}");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(reported, capture.progress_lines());
    }
}
