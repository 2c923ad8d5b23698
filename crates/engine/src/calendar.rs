use std::collections::BTreeSet;

use time::{Date, OffsetDateTime, Weekday};

/// Business-day arithmetic for automation delays.
///
/// Saturdays, Sundays and the configured holidays are not business days.
/// Adding business days keeps the time of day of the starting instant.
#[derive(Debug, Clone, Default)]
pub struct BusinessCalendar {
    holidays: BTreeSet<Date>,
}

impl BusinessCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_holidays(holidays: impl IntoIterator<Item = Date>) -> Self {
        BusinessCalendar {
            holidays: holidays.into_iter().collect(),
        }
    }

    pub fn holidays(&self) -> impl Iterator<Item = &Date> {
        self.holidays.iter()
    }

    pub fn is_business_day(&self, date: Date) -> bool {
        !matches!(date.weekday(), Weekday::Saturday | Weekday::Sunday)
            && !self.holidays.contains(&date)
    }

    /// The instant `days` business days after `start`.
    ///
    /// Zero days returns `start` unchanged, even on a weekend.
    pub fn add_business_days(&self, start: OffsetDateTime, days: u32) -> OffsetDateTime {
        let mut date = start.date();
        let mut remaining = days;
        while remaining > 0 {
            date = match date.next_day() {
                Some(d) => d,
                None => return start.replace_date(Date::MAX),
            };
            if self.is_business_day(date) {
                remaining -= 1;
            }
        }
        start.replace_date(date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{date, datetime};

    #[test]
    fn weekdays_count_one_each() {
        let cal = BusinessCalendar::new();
        // Monday + 3 -> Thursday
        assert_eq!(
            cal.add_business_days(datetime!(2026-03-02 14:30 UTC), 3),
            datetime!(2026-03-05 14:30 UTC)
        );
    }

    #[test]
    fn weekend_is_skipped() {
        let cal = BusinessCalendar::new();
        // Thursday + 3 -> Tuesday
        assert_eq!(
            cal.add_business_days(datetime!(2026-03-05 09:00 UTC), 3),
            datetime!(2026-03-10 09:00 UTC)
        );
        // Saturday + 1 -> Monday
        assert_eq!(
            cal.add_business_days(datetime!(2026-03-07 09:00 UTC), 1),
            datetime!(2026-03-09 09:00 UTC)
        );
    }

    #[test]
    fn holidays_are_skipped() {
        let cal = BusinessCalendar::with_holidays([date!(2026-03-03)]);
        assert!(!cal.is_business_day(date!(2026-03-03)));
        assert_eq!(
            cal.add_business_days(datetime!(2026-03-02 09:00 UTC), 2),
            datetime!(2026-03-05 09:00 UTC)
        );
    }

    #[test]
    fn zero_days_is_identity() {
        let cal = BusinessCalendar::new();
        let sunday = datetime!(2026-03-08 18:00 UTC);
        assert_eq!(cal.add_business_days(sunday, 0), sunday);
    }
}
