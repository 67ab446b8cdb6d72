use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};

/// Business-local wall clock (fixed UTC offset).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusinessClock {
    offset: FixedOffset,
}

impl BusinessClock {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    pub fn from_offset_minutes(minutes: i32) -> Option<Self> {
        FixedOffset::east_opt(minutes * 60).map(Self::new)
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.offset)
    }

    pub fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }

    /// A remote timestamp as business-local wall time.
    pub fn localize(&self, at: &DateTime<FixedOffset>) -> NaiveDateTime {
        at.with_timezone(&self.offset).naive_local()
    }

    /// Business-local wall time as an offset-aware timestamp.
    pub fn at(&self, local: NaiveDateTime) -> DateTime<FixedOffset> {
        let utc = local - Duration::seconds(i64::from(self.offset.local_minus_utc()));
        DateTime::from_naive_utc_and_offset(utc, self.offset)
    }
}

/// Format a time of day as `HH:MM`.
pub fn format_hhmm(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}

/// Parse `HH:MM` or `HH:MM:SS` (seconds ignored).
pub fn parse_hhmm(value: &str) -> Option<NaiveTime> {
    let head = value.get(..5)?;
    NaiveTime::parse_from_str(head, "%H:%M").ok()
}

/// Minutes since midnight for `HH:MM[:SS]`.
pub fn minutes_of_day(value: &str) -> Option<u32> {
    let parts: Vec<&str> = value.split(':').collect();
    if parts.len() < 2 {
        return None;
    }
    let hour: u32 = parts[0].parse().ok()?;
    let min: u32 = parts[1].parse().ok()?;
    if hour > 24 || min > 59 {
        return None;
    }
    Some(hour * 60 + min)
}
