use std::{fmt, str::FromStr};

use chrono::Duration;

pub mod error;

use error::TimeframeParseError;

/// Candle timeframes accepted by the exchange candles endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Timeframe {
    OneMinute,
    FiveMinutes,
    FifteenMinutes,
    ThirtyMinutes,
    OneHour,
    ThreeHours,
    SixHours,
    TwelveHours,
    OneDay,
    OneWeek,
    FourteenDays,
    OneMonth,
}

impl Timeframe {
    /// Returns the timeframe duration in minutes. A month is approximated as 30 days.
    pub const fn as_minutes(&self) -> u32 {
        match self {
            Self::OneMinute => 1,
            Self::FiveMinutes => 5,
            Self::FifteenMinutes => 15,
            Self::ThirtyMinutes => 30,
            Self::OneHour => 60,
            Self::ThreeHours => 180,
            Self::SixHours => 360,
            Self::TwelveHours => 720,
            Self::OneDay => 1_440,
            Self::OneWeek => 10_080,
            Self::FourteenDays => 20_160,
            Self::OneMonth => 43_200,
        }
    }

    pub const fn as_millis(&self) -> i64 {
        self.as_minutes() as i64 * 60_000
    }

    pub fn as_duration(&self) -> Duration {
        Duration::minutes(self.as_minutes() as i64)
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OneMinute => "1m",
            Self::FiveMinutes => "5m",
            Self::FifteenMinutes => "15m",
            Self::ThirtyMinutes => "30m",
            Self::OneHour => "1h",
            Self::ThreeHours => "3h",
            Self::SixHours => "6h",
            Self::TwelveHours => "12h",
            Self::OneDay => "1D",
            Self::OneWeek => "1W",
            Self::FourteenDays => "14D",
            Self::OneMonth => "1M",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = TimeframeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let timeframe = match s {
            "1m" => Self::OneMinute,
            "5m" => Self::FiveMinutes,
            "15m" => Self::FifteenMinutes,
            "30m" => Self::ThirtyMinutes,
            "1h" => Self::OneHour,
            "3h" => Self::ThreeHours,
            "6h" => Self::SixHours,
            "12h" => Self::TwelveHours,
            "1D" => Self::OneDay,
            "1W" => Self::OneWeek,
            "14D" => Self::FourteenDays,
            "1M" => Self::OneMonth,
            other => return Err(TimeframeParseError::Unknown(other.to_string())),
        };

        Ok(timeframe)
    }
}

/// Builds the trading pair symbol used to price `currency` in `target`, e.g. `tBTCUSD`.
///
/// Currencies longer than three characters use the colon-separated form, e.g. `tTESTBTC:USD`.
pub fn pair_symbol(currency: &str, target: &str) -> String {
    if currency.len() > 3 || target.len() > 3 {
        format!("t{currency}:{target}")
    } else {
        format!("t{currency}{target}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeframe_parses_its_own_display() {
        for timeframe in [
            Timeframe::OneMinute,
            Timeframe::ThirtyMinutes,
            Timeframe::TwelveHours,
            Timeframe::OneDay,
            Timeframe::FourteenDays,
            Timeframe::OneMonth,
        ] {
            assert_eq!(timeframe.to_string().parse::<Timeframe>().unwrap(), timeframe);
        }
    }

    #[test]
    fn unknown_timeframe_is_rejected() {
        assert!(matches!(
            "2D".parse::<Timeframe>(),
            Err(TimeframeParseError::Unknown(s)) if s == "2D"
        ));
    }

    #[test]
    fn pair_symbol_uses_colon_for_long_currencies() {
        assert_eq!(pair_symbol("BTC", "USD"), "tBTCUSD");
        assert_eq!(pair_symbol("USDT", "USD"), "tUSDT:USD");
    }
}
