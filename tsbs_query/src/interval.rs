//! Half-open time ranges and random window sampling.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rand::Rng;

use crate::{Error, Result};

const NANOS_PER_MILLI: i64 = 1_000_000;

/// The half-open time range `[start, end)` with nanosecond precision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeInterval {
    start: i64,
    end: i64,
}

impl TimeInterval {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        let nanos = |t: DateTime<Utc>| {
            t.timestamp_nanos_opt()
                .ok_or_else(|| Error::TimestampOutOfRange(t.to_rfc3339()))
        };
        let (start_ns, end_ns) = (nanos(start)?, nanos(end)?);
        if start_ns >= end_ns {
            return Err(Error::InvalidTimeRange {
                start: start.to_rfc3339(),
                end: end.to_rfc3339(),
            });
        }
        Ok(Self {
            start: start_ns,
            end: end_ns,
        })
    }

    pub fn start(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_nanos(self.start)
    }

    pub fn end(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_nanos(self.end)
    }

    pub fn duration(&self) -> Duration {
        Duration::from_nanos(self.end.abs_diff(self.start))
    }

    pub fn start_unix_nanos(&self) -> i64 {
        self.start
    }

    pub fn end_unix_nanos(&self) -> i64 {
        self.end
    }

    pub fn start_unix_millis(&self) -> i64 {
        self.start.div_euclid(NANOS_PER_MILLI)
    }

    pub fn end_unix_millis(&self) -> i64 {
        self.end.div_euclid(NANOS_PER_MILLI)
    }

    /// Start of the interval formatted as RFC 3339 with second precision
    pub fn start_string(&self) -> String {
        self.start().to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    /// Sample a window of exactly `window` that lies inside this interval
    ///
    /// The start is drawn uniformly from `[start, end - window)`, so the window never reaches past
    /// the end of this interval. A window at least as long as the interval is an error.
    pub fn rand_window<R: Rng>(&self, window: Duration, rng: &mut R) -> Result<Self> {
        let impossible = || Error::ImpossibleRandomWindow {
            window,
            range: self.duration(),
        };
        let window_ns = i64::try_from(window.as_nanos()).map_err(|_| impossible())?;
        let upper = self.end.checked_sub(window_ns).ok_or_else(impossible)?;
        if upper <= self.start {
            return Err(impossible());
        }

        let start = rng.gen_range(self.start..upper);
        Ok(Self {
            start,
            end: start + window_ns,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    fn day() -> TimeInterval {
        TimeInterval::new(
            Utc.with_ymd_and_hms(2016, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2016, 1, 2, 0, 0, 0).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn rejects_empty_or_inverted_range() {
        let t = Utc.with_ymd_and_hms(2016, 1, 1, 0, 0, 0).unwrap();
        assert!(matches!(
            TimeInterval::new(t, t),
            Err(Error::InvalidTimeRange { .. })
        ));
        assert!(matches!(
            TimeInterval::new(t + chrono::Duration::hours(1), t),
            Err(Error::InvalidTimeRange { .. })
        ));
    }

    #[test]
    fn millis_and_strings() {
        let interval = day();
        assert_eq!(1_451_606_400_000, interval.start_unix_millis());
        assert_eq!(1_451_692_800_000, interval.end_unix_millis());
        assert_eq!("2016-01-01T00:00:00Z", interval.start_string());
        assert_eq!(Duration::from_secs(86_400), interval.duration());
    }

    #[test]
    fn window_covering_the_range_is_impossible() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let interval = day();
        for window in [Duration::from_secs(86_400), Duration::from_secs(86_401)] {
            assert!(matches!(
                interval.rand_window(window, &mut rng),
                Err(Error::ImpossibleRandomWindow { .. })
            ));
        }
        assert!(
            interval
                .rand_window(Duration::from_secs(86_399), &mut rng)
                .is_ok()
        );
    }

    #[test]
    fn seeded_window_is_reproducible() {
        let sample = || {
            let mut rng = ChaCha8Rng::seed_from_u64(42);
            day().rand_window(HOUR, &mut rng).unwrap()
        };
        let first = sample();
        for _ in 0..10 {
            let again = sample();
            assert_eq!(first.start_unix_millis(), again.start_unix_millis());
            assert_eq!(first.end_unix_millis(), again.end_unix_millis());
        }
        assert_eq!(1_451_662_861_004, first.start_unix_millis());
        assert_eq!(1_451_666_461_004, first.end_unix_millis());
    }

    #[test]
    fn consecutive_windows_advance_the_stream() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let windows: Vec<_> = (0..8)
            .map(|_| day().rand_window(HOUR, &mut rng).unwrap())
            .collect();
        // a fresh draw for every call rather than a re-seeded stream
        assert!(windows.iter().any(|w| *w != windows[0]));
    }

    proptest! {
        #[test]
        fn windows_stay_inside_range(
            seed in any::<u64>(),
            window_secs in 1u64..86_400,
        ) {
            let range = day();
            let window = Duration::from_secs(window_secs);
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            for _ in 0..16 {
                let w = range.rand_window(window, &mut rng).unwrap();
                prop_assert!(w.start_unix_nanos() >= range.start_unix_nanos());
                prop_assert!(w.end_unix_nanos() <= range.end_unix_nanos());
                prop_assert_eq!(window, w.duration());
            }
        }
    }
}
