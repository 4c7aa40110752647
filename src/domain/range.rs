// Time ranges and query resolutions
use chrono::{DateTime, Duration, Utc};

/// The window a chart asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeRange {
    Day,
    Week,
    Month,
    Year,
    Custom {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

impl TimeRange {
    /// Parse the UI's range label. `custom` needs both bounds, in order.
    pub fn parse(
        label: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Option<Self> {
        match label {
            "24h" => Some(TimeRange::Day),
            "7d" => Some(TimeRange::Week),
            "30d" => Some(TimeRange::Month),
            "365d" => Some(TimeRange::Year),
            "custom" => match (start, end) {
                (Some(start), Some(end)) if start < end => Some(TimeRange::Custom { start, end }),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TimeRange::Day => "24h",
            TimeRange::Week => "7d",
            TimeRange::Month => "30d",
            TimeRange::Year => "365d",
            TimeRange::Custom { .. } => "custom",
        }
    }

    pub fn span(&self) -> Duration {
        match self {
            TimeRange::Day => Duration::hours(24),
            TimeRange::Week => Duration::days(7),
            TimeRange::Month => Duration::days(30),
            TimeRange::Year => Duration::days(365),
            TimeRange::Custom { start, end } => *end - *start,
        }
    }

    /// Absolute `[start, end]` of the range, relative ranges ending at `now`.
    pub fn window(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        match self {
            TimeRange::Custom { start, end } => (*start, *end),
            relative => (now - relative.span(), now),
        }
    }

    /// Pre-render point budget used by range-adaptive sampling.
    pub fn target_points(&self) -> usize {
        match self {
            TimeRange::Day => 288,
            TimeRange::Week => 168,
            TimeRange::Month | TimeRange::Year => 120,
            TimeRange::Custom { .. } => {
                let span = self.span();
                let resolution = Resolution::for_span(span);
                resolution.points_in(span).clamp(60, 500)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Resolution {
    /// Raw points, no server-side grouping.
    Auto,
    ThirtySeconds,
    TwoMinutes,
    FiveMinutes,
    FifteenMinutes,
    ThirtyMinutes,
    Hourly,
    SixHours,
    TwelveHours,
    Daily,
    Weekly,
}

impl Resolution {
    /// Grouping interval for an arbitrary span, keeping point counts roughly bounded.
    pub fn for_span(span: Duration) -> Self {
        if span > Duration::days(365) {
            Resolution::TwelveHours
        } else if span > Duration::days(30) {
            Resolution::SixHours
        } else if span > Duration::days(7) {
            Resolution::Hourly
        } else if span > Duration::days(1) {
            Resolution::ThirtyMinutes
        } else if span > Duration::hours(12) {
            Resolution::FifteenMinutes
        } else if span > Duration::hours(6) {
            Resolution::FiveMinutes
        } else if span > Duration::hours(1) {
            Resolution::TwoMinutes
        } else {
            Resolution::ThirtySeconds
        }
    }

    pub fn interval(&self) -> Option<Duration> {
        let interval = match self {
            Resolution::Auto => return None,
            Resolution::ThirtySeconds => Duration::seconds(30),
            Resolution::TwoMinutes => Duration::minutes(2),
            Resolution::FiveMinutes => Duration::minutes(5),
            Resolution::FifteenMinutes => Duration::minutes(15),
            Resolution::ThirtyMinutes => Duration::minutes(30),
            Resolution::Hourly => Duration::hours(1),
            Resolution::SixHours => Duration::hours(6),
            Resolution::TwelveHours => Duration::hours(12),
            Resolution::Daily => Duration::days(1),
            Resolution::Weekly => Duration::weeks(1),
        };
        Some(interval)
    }

    /// InfluxQL `GROUP BY time(..)` literal.
    pub fn as_influx(&self) -> Option<&'static str> {
        match self {
            Resolution::Auto => None,
            Resolution::ThirtySeconds => Some("30s"),
            Resolution::TwoMinutes => Some("2m"),
            Resolution::FiveMinutes => Some("5m"),
            Resolution::FifteenMinutes => Some("15m"),
            Resolution::ThirtyMinutes => Some("30m"),
            Resolution::Hourly => Some("1h"),
            Resolution::SixHours => Some("6h"),
            Resolution::TwelveHours => Some("12h"),
            Resolution::Daily => Some("1d"),
            Resolution::Weekly => Some("1w"),
        }
    }

    pub fn label(&self) -> &'static str {
        self.as_influx().unwrap_or("auto")
    }

    /// Next step down in detail; weekly is the floor.
    pub fn coarser(&self) -> Self {
        match self {
            Resolution::Auto => Resolution::ThirtyMinutes,
            Resolution::ThirtySeconds => Resolution::TwoMinutes,
            Resolution::TwoMinutes => Resolution::FiveMinutes,
            Resolution::FiveMinutes => Resolution::FifteenMinutes,
            Resolution::FifteenMinutes => Resolution::ThirtyMinutes,
            Resolution::ThirtyMinutes => Resolution::Hourly,
            Resolution::Hourly => Resolution::SixHours,
            Resolution::SixHours => Resolution::TwelveHours,
            Resolution::TwelveHours => Resolution::Daily,
            Resolution::Daily | Resolution::Weekly => Resolution::Weekly,
        }
    }

    /// Number of grid slots this resolution produces over `span`.
    pub fn points_in(&self, span: Duration) -> usize {
        match self.interval() {
            Some(interval) if interval.num_milliseconds() > 0 => {
                (span.num_milliseconds() / interval.num_milliseconds()).max(1) as usize
            }
            _ => 1,
        }
    }
}
