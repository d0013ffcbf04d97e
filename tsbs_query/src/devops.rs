//! The devops query workload: cpu metrics of a fleet of `host_<i>` machines.
//!
//! [`DevopsCore`] owns the only random number stream used while generating a corpus. Backends
//! implement [`Devops`] on top of it to render each query shape in their own query language.

use std::{fmt::Display, str::FromStr, time::Duration};

use rand::{SeedableRng, seq::index};
use rand_chacha::ChaCha8Rng;

use crate::{Error, QuerySpec, Result, TimeInterval};

/// All metrics of the `cpu` measurement, in the order they are rendered
pub const CPU_METRICS: [&str; 10] = [
    "usage_user",
    "usage_system",
    "usage_idle",
    "usage_nice",
    "usage_iowait",
    "usage_irq",
    "usage_softirq",
    "usage_steal",
    "usage_guest",
    "usage_guest_nice",
];

pub const DOUBLE_GROUP_BY_DURATION: Duration = Duration::from_secs(12 * 3600);
pub const HIGH_CPU_DURATION: Duration = Duration::from_secs(12 * 3600);
pub const MAX_ALL_DURATION: Duration = Duration::from_secs(8 * 3600);

const HOUR: Duration = Duration::from_secs(3600);

/// Shared state of a devops query generator
#[derive(Debug, Clone)]
pub struct DevopsCore {
    interval: TimeInterval,
    scale: usize,
    rng: ChaCha8Rng,
}

impl DevopsCore {
    /// Create a generator over `scale` hosts whose queries fall inside `interval`
    pub fn new(interval: TimeInterval, scale: usize, seed: u64) -> Result<Self> {
        if scale == 0 {
            return Err(Error::Config("scale must be at least 1".into()));
        }
        Ok(Self {
            interval,
            scale,
            rng: ChaCha8Rng::seed_from_u64(seed),
        })
    }

    pub fn interval(&self) -> &TimeInterval {
        &self.interval
    }

    pub fn scale(&self) -> usize {
        self.scale
    }

    /// Sample a window of `window` inside the generator's interval
    pub fn rand_window(&mut self, window: Duration) -> Result<TimeInterval> {
        self.interval.rand_window(window, &mut self.rng)
    }

    /// Pick `n` distinct host names uniformly at random
    pub fn random_hosts(&mut self, n: usize) -> Result<Vec<String>> {
        if n > self.scale {
            return Err(Error::TooManyHosts {
                requested: n,
                scale: self.scale,
            });
        }
        Ok(index::sample(&mut self.rng, self.scale, n)
            .into_iter()
            .map(|i| format!("host_{i}"))
            .collect())
    }

    /// Pick a random subset of `n` cpu metrics, returned in [`CPU_METRICS`] order
    pub fn cpu_metrics(&mut self, n: usize) -> Result<Vec<&'static str>> {
        if n == 0 || n > CPU_METRICS.len() {
            return Err(Error::InvalidMetricCount {
                requested: n,
                max: CPU_METRICS.len(),
            });
        }
        let mut picked = index::sample(&mut self.rng, CPU_METRICS.len(), n).into_vec();
        picked.sort_unstable();
        Ok(picked.into_iter().map(|i| CPU_METRICS[i]).collect())
    }
}

/// Renders the devops query shapes for one backend
pub trait Devops {
    type Request;

    /// Maximum of `metrics` cpu metrics per minute for `hosts` hosts over a random `range`
    fn group_by_time(
        &mut self,
        hosts: usize,
        metrics: usize,
        range: Duration,
    ) -> Result<QuerySpec<Self::Request>>;

    /// Maximum cpu usage over the last five minutes of a random hour
    fn group_by_order_by_limit(&mut self) -> Result<QuerySpec<Self::Request>>;

    /// Mean of `metrics` cpu metrics per host per hour over a random 12 hours
    fn group_by_time_and_primary_tag(&mut self, metrics: usize)
    -> Result<QuerySpec<Self::Request>>;

    /// Maximum of every cpu metric per hour for `hosts` hosts over a random 8 hours
    fn max_all_cpu(&mut self, hosts: usize) -> Result<QuerySpec<Self::Request>>;

    /// Most recent point of every host
    fn last_point_per_host(&mut self) -> Result<QuerySpec<Self::Request>>;

    /// Points where cpu usage is above 90% for `hosts` hosts, or all hosts when zero
    fn high_cpu_for_hosts(&mut self, hosts: usize) -> Result<QuerySpec<Self::Request>>;
}

pub fn group_by_time_label(db: &str, metrics: usize, hosts: usize, range: Duration) -> String {
    format!(
        "{db} {metrics} cpu metric(s), random {hosts:>4} hosts, random {} by 1m",
        go_duration(range)
    )
}

pub fn double_group_by_label(db: &str, metrics: usize) -> String {
    format!(
        "{db} mean of {metrics} metrics, all hosts, random {} by 1h",
        go_duration(DOUBLE_GROUP_BY_DURATION)
    )
}

pub fn max_all_label(db: &str, hosts: usize) -> String {
    format!(
        "{db} max of all CPU metrics, random {hosts:>4} hosts, random {} by 1h",
        go_duration(MAX_ALL_DURATION)
    )
}

pub fn high_cpu_label(db: &str, hosts: usize) -> String {
    if hosts == 0 {
        format!("{db} CPU over threshold, all hosts")
    } else {
        format!("{db} CPU over threshold, {hosts} host(s)")
    }
}

/// The description of a query: its label followed by the start of its window
pub fn human_description(label: &str, interval: &TimeInterval) -> String {
    format!("{label}: {}", interval.start_string())
}

/// Formats whole-second durations as `12h0m0s`, the form used in query labels
fn go_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let (h, m, s) = (secs / 3600, secs % 3600 / 60, secs % 60);
    match (h, m) {
        (0, 0) => format!("{s}s"),
        (0, _) => format!("{m}m{s}s"),
        _ => format!("{h}h{m}m{s}s"),
    }
}

/// The devops query types a corpus can be generated for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    SingleGroupBy {
        metrics: usize,
        hosts: usize,
        hours: u32,
    },
    MaxAllCpu {
        hosts: usize,
    },
    DoubleGroupBy {
        metrics: usize,
    },
    HighCpu {
        hosts: usize,
    },
    LastPoint,
    GroupByOrderByLimit,
}

const REGISTRY: [(&str, QueryType); 15] = [
    ("single-groupby-1-1-1", single_group_by(1, 1, 1)),
    ("single-groupby-1-1-12", single_group_by(1, 1, 12)),
    ("single-groupby-1-8-1", single_group_by(1, 8, 1)),
    ("single-groupby-5-1-1", single_group_by(5, 1, 1)),
    ("single-groupby-5-1-12", single_group_by(5, 1, 12)),
    ("single-groupby-5-8-1", single_group_by(5, 8, 1)),
    ("cpu-max-all-1", QueryType::MaxAllCpu { hosts: 1 }),
    ("cpu-max-all-8", QueryType::MaxAllCpu { hosts: 8 }),
    ("double-groupby-1", QueryType::DoubleGroupBy { metrics: 1 }),
    ("double-groupby-5", QueryType::DoubleGroupBy { metrics: 5 }),
    (
        "double-groupby-all",
        QueryType::DoubleGroupBy {
            metrics: CPU_METRICS.len(),
        },
    ),
    ("high-cpu-all", QueryType::HighCpu { hosts: 0 }),
    ("high-cpu-1", QueryType::HighCpu { hosts: 1 }),
    ("lastpoint", QueryType::LastPoint),
    ("groupby-orderby-limit", QueryType::GroupByOrderByLimit),
];

const fn single_group_by(metrics: usize, hosts: usize, hours: u32) -> QueryType {
    QueryType::SingleGroupBy {
        metrics,
        hosts,
        hours,
    }
}

impl QueryType {
    /// Names of every registered query type
    pub fn names() -> impl Iterator<Item = &'static str> {
        REGISTRY.iter().map(|(name, _)| *name)
    }

    /// Generate one query of this type
    pub fn generate<D: Devops + ?Sized>(&self, devops: &mut D) -> Result<QuerySpec<D::Request>> {
        match *self {
            Self::SingleGroupBy {
                metrics,
                hosts,
                hours,
            } => devops.group_by_time(hosts, metrics, HOUR * hours),
            Self::MaxAllCpu { hosts } => devops.max_all_cpu(hosts),
            Self::DoubleGroupBy { metrics } => devops.group_by_time_and_primary_tag(metrics),
            Self::HighCpu { hosts } => devops.high_cpu_for_hosts(hosts),
            Self::LastPoint => devops.last_point_per_host(),
            Self::GroupByOrderByLimit => devops.group_by_order_by_limit(),
        }
    }
}

impl FromStr for QueryType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        REGISTRY
            .iter()
            .find(|(name, _)| *name == s)
            .map(|(_, query_type)| *query_type)
            .ok_or_else(|| Error::UnknownQueryType(s.to_string()))
    }
}

impl Display for QueryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match REGISTRY.iter().find(|(_, query_type)| query_type == self) {
            Some((name, _)) => f.write_str(name),
            None => write!(f, "{self:?}"),
        }
    }
}
