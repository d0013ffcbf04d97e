//! Latency statistics grouped by query label.

use std::{
    collections::{BTreeMap, btree_map::Entry},
    fmt::Display,
    sync::Arc,
    time::Duration,
};

use hdrhistogram::Histogram;

use crate::Result;

/// Label of the group every successful query is also counted in
pub const ALL_QUERIES: &str = "all queries";

const SIGNIFICANT_FIGURES: u8 = 3;

/// Latencies above one hour are counted as one hour in the percentiles
const MAX_TRACKABLE_NANOS: u64 = 3_600_000_000_000;

/// Latency of one executed query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stat {
    pub label: Arc<str>,
    pub latency: Duration,
}

impl Stat {
    pub fn new(label: impl Into<Arc<str>>, latency: Duration) -> Self {
        Self {
            label: label.into(),
            latency,
        }
    }
}

/// Aggregated latencies of all queries sharing a label
///
/// Percentiles come from an HDR histogram with three significant figures; count, sum, min, max,
/// mean and standard deviation are exact.
#[derive(Debug, Clone)]
pub struct StatGroup {
    histogram: Histogram<u64>,
    count: u64,
    failures: u64,
    sum_nanos: u128,
    min_nanos: u64,
    max_nanos: u64,
    mean: f64,
    m2: f64,
}

impl StatGroup {
    pub fn new() -> Result<Self> {
        Ok(Self {
            histogram: Histogram::new_with_bounds(1, MAX_TRACKABLE_NANOS, SIGNIFICANT_FIGURES)?,
            count: 0,
            failures: 0,
            sum_nanos: 0,
            min_nanos: u64::MAX,
            max_nanos: 0,
            mean: 0.0,
            m2: 0.0,
        })
    }

    pub fn record(&mut self, latency: Duration) {
        let nanos = u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX);
        self.histogram.saturating_record(nanos.max(1));
        self.count += 1;
        self.sum_nanos += u128::from(nanos);
        self.min_nanos = self.min_nanos.min(nanos);
        self.max_nanos = self.max_nanos.max(nanos);

        // Welford's online variance
        let value = nanos as f64;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    pub fn record_failure(&mut self) {
        self.failures += 1;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    pub fn sum(&self) -> Duration {
        Duration::from_nanos(u64::try_from(self.sum_nanos).unwrap_or(u64::MAX))
    }

    pub fn min(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(self.min_nanos)
        }
    }

    pub fn max(&self) -> Duration {
        Duration::from_nanos(self.max_nanos)
    }

    pub fn mean(&self) -> Duration {
        Duration::from_nanos(self.mean as u64)
    }

    /// Population standard deviation
    pub fn stddev(&self) -> Duration {
        if self.count == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos((self.m2 / self.count as f64).sqrt() as u64)
    }

    pub fn quantile(&self, q: f64) -> Duration {
        if self.count == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(self.histogram.value_at_quantile(q))
    }

    pub fn median(&self) -> Duration {
        self.quantile(0.5)
    }

    pub fn p95(&self) -> Duration {
        self.quantile(0.95)
    }

    pub fn p99(&self) -> Duration {
        self.quantile(0.99)
    }
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

impl Display for StatGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "min: {:8.2}ms, med: {:8.2}ms, mean: {:8.2}ms, p95: {:8.2}ms, p99: {:8.2}ms, \
             max: {:7.2}ms, stddev: {:8.2}ms, sum: {:5.1}sec, count: {}, failures: {}",
            millis(self.min()),
            millis(self.median()),
            millis(self.mean()),
            millis(self.p95()),
            millis(self.p99()),
            millis(self.max()),
            millis(self.stddev()),
            self.sum().as_secs_f64(),
            self.count,
            self.failures,
        )
    }
}

/// Stat groups keyed by label, in label order
///
/// The first `burn_in` outcomes are discarded. Aggregation is commutative, so outcomes may arrive
/// from the workers in any order.
#[derive(Debug, Clone)]
pub struct StatsCollector {
    groups: BTreeMap<Arc<str>, StatGroup>,
    all: StatGroup,
    burn_in: u64,
    seen: u64,
}

impl StatsCollector {
    pub fn new(burn_in: u64) -> Result<Self> {
        Ok(Self {
            groups: BTreeMap::new(),
            all: StatGroup::new()?,
            burn_in,
            seen: 0,
        })
    }

    /// Whether the burn-in period is over
    pub fn warmed_up(&self) -> bool {
        self.seen > self.burn_in
    }

    /// Record the stats of one successful query
    pub fn record(&mut self, stats: &[Stat]) -> Result<()> {
        if !self.admit() {
            return Ok(());
        }
        for stat in stats {
            self.group(&stat.label)?.record(stat.latency);
            self.all.record(stat.latency);
        }
        Ok(())
    }

    /// Record one failed query
    pub fn record_failure(&mut self, label: &str) -> Result<()> {
        if !self.admit() {
            return Ok(());
        }
        self.group(label)?.record_failure();
        self.all.record_failure();
        Ok(())
    }

    fn admit(&mut self) -> bool {
        self.seen += 1;
        self.seen > self.burn_in
    }

    fn group(&mut self, label: &str) -> Result<&mut StatGroup> {
        Ok(match self.groups.entry(Arc::from(label)) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => e.insert(StatGroup::new()?),
        })
    }

    pub fn get(&self, label: &str) -> Option<&StatGroup> {
        self.groups.get(label)
    }

    pub fn all(&self) -> &StatGroup {
        &self.all
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(|label| label.as_ref())
    }

    pub fn failures(&self) -> u64 {
        self.all.failures()
    }
}

impl Display for StatsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (label, group) in &self.groups {
            writeln!(f, "{label}:")?;
            writeln!(f, "{group}")?;
        }
        writeln!(f, "{ALL_QUERIES}:")?;
        write!(f, "{}", self.all)
    }
}
