//! Clock port - 時刻の抽象化
//!
//! 行の value は「いまの時刻」の文字列なので、テストでは FixedClock に差し替える。

use chrono::{Local, NaiveDate, NaiveDateTime};

/// Display format of row values, e.g. `10:15:00 AM`.
pub const TIME_FORMAT: &str = "%-I:%M:%S %p";

pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;

    /// Current time rendered the way rows store it.
    fn time_text(&self) -> String {
        self.now().format(TIME_FORMAT).to_string()
    }
}

/// Wall clock in the local timezone.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Always reports the same instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    at: NaiveDateTime,
}

impl FixedClock {
    pub fn new(at: NaiveDateTime) -> Self {
        Self { at }
    }

    /// Fixed time of day on an arbitrary date. Out-of-range parts fall back to midnight.
    pub fn at_hms(hour: u32, min: u32, sec: u32) -> Self {
        let at = NaiveDate::default()
            .and_hms_opt(hour, min, sec)
            .unwrap_or_default();
        Self { at }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(10, 15, 0, "10:15:00 AM")]
    #[case(10, 15, 3, "10:15:03 AM")]
    #[case(0, 5, 9, "12:05:09 AM")]
    #[case(23, 59, 59, "11:59:59 PM")]
    fn fixed_clock_formats_like_rows(
        #[case] h: u32,
        #[case] m: u32,
        #[case] s: u32,
        #[case] expected: &str,
    ) {
        assert_eq!(FixedClock::at_hms(h, m, s).time_text(), expected);
    }

    #[test]
    fn system_clock_text_ends_with_meridiem() {
        let text = SystemClock.time_text();
        assert!(text.ends_with("AM") || text.ends_with("PM"), "{text}");
    }
}
