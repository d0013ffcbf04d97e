//! Decoding of `"<tags> <metrics> <timestamp>"` lines.

use async_trait::async_trait;
use tokio::io::AsyncBufReadExt;
use tsbs_load::{DecodeError, InputReader, PartitionKey, PointDecoder};

/// One input line, validated to have three fields and a well formed metric set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinePoint {
    line: String,
    tags_end: usize,
    metrics_end: usize,
    metric_count: u64,
}

impl LinePoint {
    /// Validate `line`, the `line_no`th line of the input
    pub fn parse(line: String, line_no: u64) -> Result<Self, DecodeError> {
        let fields: Vec<&str> = line.split(' ').collect();
        if fields.len() != 3 {
            return Err(DecodeError::Arity {
                line: line_no,
                found: fields.len(),
            });
        }

        let metrics = fields[1];
        let mut metric_count = 0;
        for metric in metrics.split(',') {
            match metric.split_once('=') {
                Some((name, _)) if !name.is_empty() => metric_count += 1,
                _ => {
                    return Err(DecodeError::Malformed {
                        line: line_no,
                        reason: format!("metric '{metric}' is not a name=value pair"),
                    });
                }
            }
        }

        let tags_end = fields[0].len();
        let metrics_end = tags_end + 1 + metrics.len();
        Ok(Self {
            line,
            tags_end,
            metrics_end,
            metric_count,
        })
    }

    /// Comma separated tag set, optionally led by the measurement name
    pub fn tags(&self) -> &str {
        &self.line[..self.tags_end]
    }

    /// Comma separated `name=value` metric fields
    pub fn metrics(&self) -> &str {
        &self.line[self.tags_end + 1..self.metrics_end]
    }

    /// Timestamp field, nanoseconds since the epoch
    pub fn timestamp(&self) -> &str {
        &self.line[self.metrics_end + 1..]
    }

    pub fn metric_count(&self) -> u64 {
        self.metric_count
    }

    pub fn as_str(&self) -> &str {
        &self.line
    }
}

impl PartitionKey for LinePoint {
    fn partition_key(&self) -> &[u8] {
        self.tags().as_bytes()
    }
}

/// Reads one [`LinePoint`] per input line
pub struct LineDecoder {
    input: InputReader,
    line_no: u64,
}

impl std::fmt::Debug for LineDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineDecoder")
            .field("line_no", &self.line_no)
            .finish_non_exhaustive()
    }
}

impl LineDecoder {
    pub fn new(input: InputReader) -> Self {
        Self { input, line_no: 0 }
    }
}

#[async_trait]
impl PointDecoder for LineDecoder {
    type Point = LinePoint;

    async fn decode(&mut self) -> Result<Option<LinePoint>, DecodeError> {
        let mut line = String::new();
        if self.input.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        self.line_no += 1;
        if line.ends_with('\n') {
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
        }
        LinePoint::parse(line, self.line_no).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use pretty_assertions::assert_eq;

    use super::*;

    fn decoder(text: &str) -> LineDecoder {
        LineDecoder::new(Box::new(Cursor::new(text.as_bytes().to_vec())))
    }

    #[test]
    fn fields() {
        let point = LinePoint::parse(
            "cpu,hostname=host_0 usage_user=12.3,usage_system=4.5 1500000000000000000".into(),
            1,
        )
        .unwrap();
        assert_eq!("cpu,hostname=host_0", point.tags());
        assert_eq!("usage_user=12.3,usage_system=4.5", point.metrics());
        assert_eq!("1500000000000000000", point.timestamp());
        assert_eq!(2, point.metric_count());
        assert_eq!(b"cpu,hostname=host_0", point.partition_key());
    }

    #[test]
    fn wrong_arity() {
        for (line, found) in [("a b", 2), ("a b c d", 4), ("", 1), ("a  b c", 4)] {
            match LinePoint::parse(line.into(), 9) {
                Err(DecodeError::Arity { line: 9, found: f }) => assert_eq!(found, f, "{line:?}"),
                other => panic!("unexpected result for {line:?}: {other:?}"),
            }
        }
        let err = LinePoint::parse("a b".into(), 3).unwrap_err();
        assert_eq!(
            "parse error on line 3: line does not have 3 tuples, has 2",
            err.to_string()
        );
    }

    #[test]
    fn malformed_metrics() {
        for metrics in ["usage", "=1", "usage_user=1,", "a=1,,b=2"] {
            let line = format!("cpu,hostname=h {metrics} 1");
            assert!(
                matches!(
                    LinePoint::parse(line, 1),
                    Err(DecodeError::Malformed { line: 1, .. })
                ),
                "{metrics}"
            );
        }
    }

    #[tokio::test]
    async fn decodes_until_end_of_input() {
        let mut d = decoder(
            "cpu,hostname=host_0 usage_user=1 10\r\ncpu,hostname=host_1 usage_user=2,usage_idle=3 20",
        );
        let first = d.decode().await.unwrap().unwrap();
        assert_eq!("10", first.timestamp());
        let second = d.decode().await.unwrap().unwrap();
        assert_eq!("20", second.timestamp());
        assert_eq!(2, second.metric_count());
        assert!(d.decode().await.unwrap().is_none());
        assert!(d.decode().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn malformed_line_fails_once_with_its_line_number() {
        let mut d = decoder("cpu,hostname=a v=1 1\ncpu,hostname=a v=1\ncpu,hostname=a v=1 3\n");
        assert!(d.decode().await.unwrap().is_some());
        let err = d.decode().await.unwrap_err();
        assert!(matches!(err, DecodeError::Arity { line: 2, found: 2 }));
        assert!(d.decode().await.unwrap().is_some());
    }
}
