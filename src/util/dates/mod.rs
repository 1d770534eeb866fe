use chrono::{DateTime, Local, Utc};

pub(crate) trait DateTimeExt {
    fn format_local_millis(&self) -> String;

    /// Milliseconds since the Unix epoch, the unit used by every stored date field.
    fn as_mts(&self) -> i64;
}

impl DateTimeExt for DateTime<Utc> {
    fn format_local_millis(&self) -> String {
        let local_time = self.with_timezone(&Local);
        local_time.format("%Y-%m-%d %H:%M:%S.%3f (%Z)").to_string()
    }

    fn as_mts(&self) -> i64 {
        self.timestamp_millis()
    }
}

pub(crate) trait MtsExt {
    /// Converts milliseconds since the Unix epoch into a UTC datetime, saturating at the
    /// representable bounds.
    fn to_datetime(&self) -> DateTime<Utc>;

    fn format_mts(&self) -> String;
}

impl MtsExt for i64 {
    fn to_datetime(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(*self).unwrap_or(if *self < 0 {
            DateTime::<Utc>::MIN_UTC
        } else {
            DateTime::<Utc>::MAX_UTC
        })
    }

    fn format_mts(&self) -> String {
        format!("{} ({})", self, self.to_datetime().format_local_millis())
    }
}

pub(crate) fn now_mts() -> i64 {
    Utc::now().as_mts()
}

#[cfg(test)]
mod tests;
