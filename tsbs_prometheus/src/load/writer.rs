//! Conversion of line points into remote-write series.

use std::{sync::Arc, time::Duration};

use tokio::time::Instant;

use super::{
    decoder::LinePoint,
    prompb::{Label, Sample, TimeSeries, WriteRequest},
    storage::{PromStorage, StorageError},
};

/// Label holding the measurement, or the field name for points without one
pub const NAME_LABEL: &str = "__name__";
/// Label holding the field name
pub const METRIC_LABEL: &str = "__metric__";

const NANOS_PER_MILLI: i64 = 1_000_000;

#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("invalid tag '{tag}' in '{tags}'")]
    Tag { tag: String, tags: String },

    #[error("invalid value '{value}' for field '{field}'")]
    Value { field: String, value: String },

    #[error("invalid timestamp '{0}'")]
    Timestamp(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Writes batches of points through one storage handle
#[derive(Debug, Clone)]
pub struct DbWriter {
    storage: Arc<PromStorage>,
}

impl DbWriter {
    pub fn new(storage: Arc<PromStorage>) -> Self {
        Self { storage }
    }

    /// Write `points` in a single request, returning how long the request took
    pub async fn write(&self, points: &[LinePoint]) -> Result<Duration, WriteError> {
        let start = Instant::now();
        let request = to_write_request(points)?;
        self.storage.remote_write(&request).await?;
        Ok(start.elapsed())
    }
}

/// Build the remote-write request for `points`, one series per metric field
pub fn to_write_request(points: &[LinePoint]) -> Result<WriteRequest, WriteError> {
    let mut timeseries = Vec::new();
    for point in points {
        let (measurement, tags) = parse_tags(point.tags())?;
        let timestamp = parse_timestamp(point.timestamp())?;

        for metric in point.metrics().split(',') {
            let Some((field, raw)) = metric.split_once('=') else {
                return Err(WriteError::Value {
                    field: metric.to_string(),
                    value: String::new(),
                });
            };
            let value = parse_value(raw).ok_or_else(|| WriteError::Value {
                field: field.to_string(),
                value: raw.to_string(),
            })?;

            let mut labels = Vec::with_capacity(tags.len() + 2);
            labels.extend(tags.iter().map(|(k, v)| Label::new(*k, *v)));
            labels.push(Label::new(NAME_LABEL, measurement.unwrap_or(field)));
            labels.push(Label::new(METRIC_LABEL, field));
            labels.sort_by(|a, b| a.name.cmp(&b.name));

            timeseries.push(TimeSeries {
                labels,
                samples: vec![Sample { value, timestamp }],
            });
        }
    }
    Ok(WriteRequest { timeseries })
}

/// Split a tag set into its optional leading measurement and its `key=value` pairs
fn parse_tags(tags: &str) -> Result<(Option<&str>, Vec<(&str, &str)>), WriteError> {
    let mut parts = tags.split(',').peekable();
    let measurement = match parts.peek() {
        Some(first) if !first.contains('=') => parts.next(),
        _ => None,
    };

    let pairs = parts
        .map(|tag| match tag.split_once('=') {
            Some((k, v)) if !k.is_empty() => Ok((k, v)),
            _ => Err(WriteError::Tag {
                tag: tag.to_string(),
                tags: tags.to_string(),
            }),
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok((measurement.filter(|m| !m.is_empty()), pairs))
}

/// Nanosecond timestamp to milliseconds
fn parse_timestamp(raw: &str) -> Result<i64, WriteError> {
    raw.parse::<i64>()
        .map(|ns| ns / NANOS_PER_MILLI)
        .map_err(|_| WriteError::Timestamp(raw.to_string()))
}

/// Integers carry an `i` or `u` suffix; booleans are `t`, `true`, `f` or `false` in any case
fn parse_value(raw: &str) -> Option<f64> {
    if let Some(int) = raw.strip_suffix('i') {
        return int.parse::<i64>().ok().map(|v| v as f64);
    }
    if let Some(uint) = raw.strip_suffix('u') {
        return uint.parse::<u64>().ok().map(|v| v as f64);
    }
    match raw.to_ascii_lowercase().as_str() {
        "t" | "true" => return Some(1.0),
        "f" | "false" => return Some(0.0),
        _ => {}
    }
    raw.parse::<f64>().ok().filter(|v| v.is_finite())
}
