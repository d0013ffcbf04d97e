//! The devops queries rendered as PromQL over the Prometheus HTTP API.

use std::time::Duration;

use tsbs_query::{
    HttpQuery, QuerySpec, Result, TimeInterval,
    devops::{self, Devops, DevopsCore},
};
use url::form_urlencoded;

use crate::BACKEND_NAME;

const HOUR: Duration = Duration::from_secs(3600);
const LAST_INTERVALS: i64 = 5 * 60 * 1000;
const MINUTE_STEP: u64 = 60;
const HOUR_STEP: u64 = 3600;

/// Matcher value for one label: equality for a single value, an anchored alternation otherwise
pub fn predicate(values: &[impl AsRef<str>]) -> String {
    match values {
        [one] => format!("=\"{}\"", one.as_ref()),
        _ => {
            let joined: Vec<&str> = values.iter().map(AsRef::as_ref).collect();
            format!("=~\"^({})$\"", joined.join("|"))
        }
    }
}

/// `cpu{...}` with the non-empty matchers; an empty matcher list selects the bare series
pub fn cpu_selector<'a>(matchers: impl IntoIterator<Item = &'a str>) -> String {
    let matchers: Vec<&str> = matchers.into_iter().filter(|m| !m.is_empty()).collect();
    if matchers.is_empty() {
        "cpu".to_string()
    } else {
        format!("cpu{{{}}}", matchers.join(", "))
    }
}

fn host_matcher(hosts: &[String]) -> String {
    if hosts.is_empty() {
        String::new()
    } else {
        format!("hostname{}", predicate(hosts))
    }
}

fn metric_matcher(metrics: &[&str]) -> String {
    format!("__metric__{}", predicate(metrics))
}

/// Seconds since the epoch with millisecond precision
fn api_time(millis: i64) -> String {
    format!("{:.3}", millis as f64 / 1000.0)
}

fn range_query(promql: &str, start_ms: i64, end_ms: i64, step: u64) -> HttpQuery {
    let params = form_urlencoded::Serializer::new(String::new())
        .append_pair("end", &api_time(end_ms))
        .append_pair("query", promql)
        .append_pair("start", &api_time(start_ms))
        .append_pair("step", &step.to_string())
        .finish();
    HttpQuery::get(format!("/api/v1/query_range?{params}"))
}

fn instant_query(promql: &str, time_ms: i64) -> HttpQuery {
    let params = form_urlencoded::Serializer::new(String::new())
        .append_pair("query", promql)
        .append_pair("time", &api_time(time_ms))
        .finish();
    HttpQuery::get(format!("/api/v1/query?{params}"))
}

fn windowed(
    label: String,
    window: &TimeInterval,
    promql: &str,
    step: u64,
) -> QuerySpec<HttpQuery> {
    let description = devops::human_description(&label, window);
    QuerySpec::new(
        label,
        description,
        range_query(
            promql,
            window.start_unix_millis(),
            window.end_unix_millis(),
            step,
        ),
    )
}

/// Generates Prometheus queries from a seeded [`DevopsCore`]
#[derive(Debug, Clone)]
pub struct PrometheusDevops {
    core: DevopsCore,
}

impl PrometheusDevops {
    pub fn new(core: DevopsCore) -> Self {
        Self { core }
    }
}

impl Devops for PrometheusDevops {
    type Request = HttpQuery;

    fn group_by_time(
        &mut self,
        hosts: usize,
        metrics: usize,
        range: Duration,
    ) -> Result<QuerySpec<HttpQuery>> {
        let window = self.core.rand_window(range)?;
        let metrics = self.core.cpu_metrics(metrics)?;
        let hosts = self.core.random_hosts(hosts)?;

        let selector = cpu_selector([
            host_matcher(&hosts).as_str(),
            metric_matcher(&metrics).as_str(),
        ]);
        let promql = format!("max(max_over_time({selector}[1m])) by (__metric__)");
        let label = devops::group_by_time_label(BACKEND_NAME, metrics.len(), hosts.len(), range);
        Ok(windowed(label, &window, &promql, MINUTE_STEP))
    }

    fn group_by_order_by_limit(&mut self) -> Result<QuerySpec<HttpQuery>> {
        let window = self.core.rand_window(HOUR)?;

        let label = format!("{BACKEND_NAME} max cpu over last 5 min-intervals (random end)");
        let description = devops::human_description(&label, &window);
        let promql = format!(
            "max(max_over_time({}[1m]))",
            cpu_selector([metric_matcher(&["usage_user"]).as_str()])
        );
        let end = window.end_unix_millis();
        Ok(QuerySpec::new(
            label,
            description,
            range_query(&promql, end - LAST_INTERVALS, end, MINUTE_STEP),
        ))
    }

    fn group_by_time_and_primary_tag(&mut self, metrics: usize) -> Result<QuerySpec<HttpQuery>> {
        let metrics = self.core.cpu_metrics(metrics)?;
        let window = self.core.rand_window(devops::DOUBLE_GROUP_BY_DURATION)?;

        let selector = cpu_selector([metric_matcher(&metrics).as_str()]);
        let promql = format!("avg(avg_over_time({selector}[1h])) by (__metric__, hostname)");
        let label = devops::double_group_by_label(BACKEND_NAME, metrics.len());
        Ok(windowed(label, &window, &promql, HOUR_STEP))
    }

    fn max_all_cpu(&mut self, hosts: usize) -> Result<QuerySpec<HttpQuery>> {
        let window = self.core.rand_window(devops::MAX_ALL_DURATION)?;
        let hosts = self.core.random_hosts(hosts)?;

        let selector = cpu_selector([host_matcher(&hosts).as_str()]);
        let promql = format!("max(max_over_time({selector}[1h])) by (__metric__)");
        let label = devops::max_all_label(BACKEND_NAME, hosts.len());
        Ok(windowed(label, &window, &promql, HOUR_STEP))
    }

    fn last_point_per_host(&mut self) -> Result<QuerySpec<HttpQuery>> {
        let label = format!("{BACKEND_NAME} last row per host");
        let description = format!("{label}: cpu");
        let time = self.core.interval().end_unix_millis();
        Ok(QuerySpec::new(
            label,
            description,
            instant_query("cpu", time),
        ))
    }

    fn high_cpu_for_hosts(&mut self, hosts: usize) -> Result<QuerySpec<HttpQuery>> {
        let window = self.core.rand_window(devops::HIGH_CPU_DURATION)?;
        let hosts = if hosts > 0 {
            self.core.random_hosts(hosts)?
        } else {
            Vec::new()
        };

        let selector = cpu_selector([
            metric_matcher(&["usage_user"]).as_str(),
            host_matcher(&hosts).as_str(),
        ]);
        let promql = format!("{selector} > 90.0");
        let label = devops::high_cpu_label(BACKEND_NAME, hosts.len());
        Ok(windowed(label, &window, &promql, MINUTE_STEP))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use tsbs_query::devops::QueryType;

    use super::*;

    fn devops(scale: usize, seed: u64) -> PrometheusDevops {
        let interval = TimeInterval::new(
            Utc.with_ymd_and_hms(2016, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2016, 1, 2, 6, 0, 0).unwrap(),
        )
        .unwrap();
        PrometheusDevops::new(DevopsCore::new(interval, scale, seed).unwrap())
    }

    /// The decoded `(key, value)` pairs of a query path
    fn params(query: &HttpQuery) -> Vec<(String, String)> {
        let (_, qs) = query.path.split_once('?').unwrap();
        form_urlencoded::parse(qs.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    fn promql(query: &HttpQuery) -> String {
        params(query)
            .into_iter()
            .find(|(k, _)| k == "query")
            .map(|(_, v)| v)
            .unwrap()
    }

    #[test]
    fn predicates() {
        assert_eq!("=\"host_3\"", predicate(&["host_3"]));
        assert_eq!(
            "=~\"^(host_0|host_7|host_9)$\"",
            predicate(&["host_0", "host_7", "host_9"])
        );
    }

    #[test]
    fn selectors() {
        assert_eq!("cpu", cpu_selector([""]));
        assert_eq!(
            "cpu{__metric__=\"usage_user\"}",
            cpu_selector(["", "__metric__=\"usage_user\""])
        );
        assert_eq!(
            "cpu{hostname=\"h\", __metric__=\"m\"}",
            cpu_selector(["hostname=\"h\"", "__metric__=\"m\""])
        );
    }

    #[test]
    fn no_hosts_means_no_host_matcher() {
        let query = devops(10, 1).high_cpu_for_hosts(0).unwrap();
        assert_eq!(
            "cpu{__metric__=\"usage_user\"} > 90.0",
            promql(&query.request)
        );
        assert_eq!("Prometheus CPU over threshold, all hosts", query.human_label);
    }

    #[test]
    fn three_hosts_give_three_alternatives() {
        let query = devops(100, 5).max_all_cpu(3).unwrap();
        let promql = promql(&query.request);
        let alternatives = promql
            .split_once("hostname=~\"^(")
            .and_then(|(_, rest)| rest.split_once(")$\""))
            .map(|(alts, _)| alts)
            .unwrap();
        let hosts: Vec<&str> = alternatives.split('|').collect();
        assert_eq!(3, hosts.len());
        let mut unique = hosts.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(3, unique.len(), "{promql}");
        assert!(promql.starts_with("max(max_over_time(cpu{hostname=~"));
        assert!(promql.ends_with("}[1h])) by (__metric__)"));
    }

    #[test]
    fn range_query_shape() {
        let query = devops(10, 3).group_by_time(1, 1, HOUR).unwrap();
        let params = params(&query.request);
        let keys: Vec<&str> = params.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(vec!["end", "query", "start", "step"], keys);
        assert!(query.request.path.starts_with("/api/v1/query_range?"));
        assert_eq!("GET", query.request.method);

        let start: f64 = params[2].1.parse().unwrap();
        let end: f64 = params[0].1.parse().unwrap();
        assert_eq!(3600.0, (end - start).round());
        assert_eq!("60", params[3].1);
        assert!(
            query
                .human_description
                .starts_with("Prometheus 1 cpu metric(s), random    1 hosts, random 1h0m0s by 1m: 2016-01-")
        );

        let promql = &params[1].1;
        assert!(promql.starts_with("max(max_over_time(cpu{hostname=\"host_"), "{promql}");
        assert!(promql.contains(", __metric__=\"usage_"), "{promql}");
    }

    #[test]
    fn last_point_is_an_instant_query_at_the_end() {
        let query = devops(10, 0).last_point_per_host().unwrap();
        assert_eq!(
            "/api/v1/query?query=cpu&time=1451714400.000",
            query.request.path
        );
        assert_eq!("Prometheus last row per host: cpu", query.human_description);
    }

    #[test]
    fn group_by_order_by_limit_covers_five_minutes() {
        let query = devops(10, 9).group_by_order_by_limit().unwrap();
        let params = params(&query.request);
        let end: f64 = params[0].1.parse().unwrap();
        let start: f64 = params[2].1.parse().unwrap();
        assert_eq!(300.0, (end - start).round());
        assert_eq!(
            "max(max_over_time(cpu{__metric__=\"usage_user\"}[1m]))",
            params[1].1
        );
    }

    #[test]
    fn double_group_by_all_metrics() {
        let query = devops(10, 2).group_by_time_and_primary_tag(10).unwrap();
        assert_eq!(
            "avg(avg_over_time(cpu{__metric__=~\"^(usage_user|usage_system|usage_idle|usage_nice|usage_iowait|usage_irq|usage_softirq|usage_steal|usage_guest|usage_guest_nice)$\"}[1h])) by (__metric__, hostname)",
            promql(&query.request)
        );
        assert_eq!(
            "Prometheus mean of 10 metrics, all hosts, random 12h0m0s by 1h",
            query.human_label
        );
    }

    #[test]
    fn every_registered_type_renders() {
        for name in QueryType::names() {
            let query_type: QueryType = name.parse().unwrap();
            let mut devops = devops(8, 11);
            let query = query_type.generate(&mut devops).unwrap();
            assert!(query.request.path.starts_with("/api/v1/query"), "{name}");
            assert!(query.human_label.starts_with(BACKEND_NAME), "{name}");
        }
    }
}
