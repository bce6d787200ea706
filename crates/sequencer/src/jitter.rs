//! Humanized scheduling: randomized follow-up delays, a per-prospect send
//! window, and alignment of candidate send times into that window.

use std::collections::HashSet;

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, Offset, TimeZone, Timelike, Utc, Weekday,
};
use rand::Rng;
use tracing::warn;

use outreach_core::config::SendWindowConfig;
use outreach_core::types::SendWindow;

/// Upper bound on days searched for the next sendable day.
const MAX_LOOKAHEAD_DAYS: usize = 370;

#[derive(Debug, Clone)]
pub struct JitterGenerator {
    offset: FixedOffset,
    start_hour: u32,
    end_hour: u32,
    spread_hours: u32,
    weekdays_only: bool,
    holidays: HashSet<NaiveDate>,
}

impl JitterGenerator {
    pub fn new(config: &SendWindowConfig) -> Self {
        let offset = FixedOffset::east_opt(config.utc_offset_minutes * 60).unwrap_or_else(|| {
            warn!(
                utc_offset_minutes = config.utc_offset_minutes,
                "Invalid send window offset, using UTC"
            );
            Utc.fix()
        });

        let (start_hour, end_hour) = if config.start_hour < config.end_hour && config.end_hour <= 24 {
            (config.start_hour, config.end_hour)
        } else {
            warn!(
                start_hour = config.start_hour,
                end_hour = config.end_hour,
                "Invalid send window hours, allowing the whole day"
            );
            (0, 24)
        };

        Self {
            offset,
            start_hour,
            end_hour,
            spread_hours: config.spread_hours,
            weekdays_only: config.weekdays_only,
            holidays: config.holidays.iter().copied().collect(),
        }
    }

    /// Any hour, any day, UTC.
    pub fn unrestricted() -> Self {
        Self {
            offset: Utc.fix(),
            start_hour: 0,
            end_hour: 24,
            spread_hours: 0,
            weekdays_only: false,
            holidays: HashSet::new(),
        }
    }

    /// A random delay of a whole number of hours in `[min_hours, max_hours]`
    /// plus 1..=59 minutes and 1..=59 seconds, so no two schedules land on
    /// the same round boundary.
    pub fn jitter(&self, min_hours: u32, max_hours: u32) -> Duration {
        self.jitter_with(&mut rand::thread_rng(), min_hours, max_hours)
    }

    pub fn jitter_with<R: Rng + ?Sized>(&self, rng: &mut R, min_hours: u32, max_hours: u32) -> Duration {
        let (lo, hi) = if min_hours <= max_hours {
            (min_hours, max_hours)
        } else {
            (max_hours, min_hours)
        };
        let hours = rng.gen_range(lo..=hi);
        let minutes = rng.gen_range(1..=59);
        let seconds = rng.gen_range(1..=59);
        Duration::hours(i64::from(hours)) + Duration::minutes(minutes) + Duration::seconds(seconds)
    }

    /// Picks a prospect's window: the configured hours narrowed by up to
    /// `spread_hours` on each side.
    pub fn preferred_send_window(&self) -> SendWindow {
        self.preferred_send_window_with(&mut rand::thread_rng())
    }

    pub fn preferred_send_window_with<R: Rng + ?Sized>(&self, rng: &mut R) -> SendWindow {
        let start = self.start_hour + rng.gen_range(0..=self.spread_hours);
        let end = self
            .end_hour
            .saturating_sub(rng.gen_range(0..=self.spread_hours));
        let (start_hour, end_hour) = if start < end {
            (start, end)
        } else {
            (self.start_hour, self.end_hour)
        };
        SendWindow {
            start_hour,
            end_hour,
            weekdays_only: self.weekdays_only,
        }
    }

    /// Returns `candidate` unchanged when it falls inside `window` on a
    /// sendable day; otherwise the start of the next window opening plus a
    /// few minutes of noise.
    pub fn next_window_aligned(&self, candidate: DateTime<Utc>, window: &SendWindow) -> DateTime<Utc> {
        self.next_window_aligned_with(&mut rand::thread_rng(), candidate, window)
    }

    pub fn next_window_aligned_with<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        candidate: DateTime<Utc>,
        window: &SendWindow,
    ) -> DateTime<Utc> {
        let local = candidate.with_timezone(&self.offset);
        let today = local.date_naive();
        let sendable_today = self.is_sendable_day(today, window);

        if sendable_today && window.contains_hour(local.hour()) {
            return candidate;
        }

        let mut date = if sendable_today && local.hour() < window.start_hour {
            today
        } else {
            match today.succ_opt() {
                Some(next) => next,
                None => return candidate,
            }
        };
        for _ in 0..MAX_LOOKAHEAD_DAYS {
            if self.is_sendable_day(date, window) {
                break;
            }
            match date.succ_opt() {
                Some(next) => date = next,
                None => return candidate,
            }
        }

        let minute = rng.gen_range(3..=27);
        let second = rng.gen_range(1..=59);
        date.and_hms_opt(window.start_hour, minute, second)
            .and_then(|naive| self.offset.from_local_datetime(&naive).single())
            .map(|local| local.with_timezone(&Utc))
            .unwrap_or(candidate)
    }

    pub fn is_sendable_day(&self, date: NaiveDate, window: &SendWindow) -> bool {
        let weekend = matches!(date.weekday(), Weekday::Sat | Weekday::Sun);
        !(window.weekdays_only && weekend) && !self.holidays.contains(&date)
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Local midnight following `ts`.
    pub fn start_of_next_day(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let today = ts.with_timezone(&self.offset).date_naive();
        today
            .succ_opt()
            .map_or(ts, |date| self.local_midnight(date, ts))
    }

    /// Local midnight of the Monday after `ts`.
    pub fn start_of_next_week(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let today = ts.with_timezone(&self.offset).date_naive();
        let days = 7 - i64::from(today.weekday().num_days_from_monday());
        today
            .checked_add_signed(Duration::days(days))
            .map_or(ts, |date| self.local_midnight(date, ts))
    }

    fn local_midnight(&self, date: NaiveDate, fallback: DateTime<Utc>) -> DateTime<Utc> {
        date.and_hms_opt(0, 0, 0)
            .and_then(|naive| self.offset.from_local_datetime(&naive).single())
            .map(|local| local.with_timezone(&Utc))
            .unwrap_or(fallback)
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    fn pacific(holidays: Vec<NaiveDate>) -> JitterGenerator {
        JitterGenerator::new(&SendWindowConfig {
            utc_offset_minutes: -480,
            start_hour: 5,
            end_hour: 18,
            spread_hours: 2,
            weekdays_only: true,
            holidays,
        })
    }

    fn local(sched: &JitterGenerator, y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        sched.offset()
            .with_ymd_and_hms(y, m, d, h, 0, 0)
            .single()
            .unwrap()
            .with_timezone(&Utc)
    }

    fn business_hours() -> SendWindow {
        SendWindow {
            start_hour: 6,
            end_hour: 17,
            weekdays_only: true,
        }
    }

    #[test]
    fn test_jitter_stays_in_range_and_is_never_round() {
        let sched = JitterGenerator::unrestricted();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let delay = sched.jitter_with(&mut rng, 48, 72);
            assert!(delay > Duration::hours(48));
            assert!(delay < Duration::hours(73));
            assert_ne!(delay.num_seconds() % 60, 0);
            assert_ne!(delay.num_minutes() % 60, 0);
        }
    }

    #[test]
    fn test_jitter_varies() {
        let sched = JitterGenerator::unrestricted();
        let mut rng = StdRng::seed_from_u64(11);
        let draws: HashSet<i64> = (0..50)
            .map(|_| sched.jitter_with(&mut rng, 48, 72).num_seconds())
            .collect();
        assert!(draws.len() > 40);
    }

    #[test]
    fn test_preferred_window_within_spread() {
        let sched = pacific(vec![]);
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..200 {
            let w = sched.preferred_send_window_with(&mut rng);
            assert!((5..=7).contains(&w.start_hour));
            assert!((16..=18).contains(&w.end_hour));
            assert!(w.weekdays_only);
        }
    }

    #[test]
    fn test_candidate_inside_window_is_unchanged() {
        let sched = pacific(vec![]);
        // Tuesday 10:00 local
        let candidate = local(&sched, 2024, 6, 4, 10) + Duration::minutes(17);
        assert_eq!(sched.next_window_aligned(candidate, &business_hours()), candidate);
    }

    #[test]
    fn test_early_morning_moves_to_same_day_start() {
        let sched = pacific(vec![]);
        let mut rng = StdRng::seed_from_u64(1);
        // Tuesday 03:00 local
        let candidate = local(&sched, 2024, 6, 4, 3);
        let aligned = sched.next_window_aligned_with(&mut rng, candidate, &business_hours());
        let aligned_local = aligned.with_timezone(&sched.offset());
        assert_eq!(aligned_local.date_naive(), NaiveDate::from_ymd_opt(2024, 6, 4).unwrap());
        assert_eq!(aligned_local.hour(), 6);
        assert!(aligned_local.minute() >= 3);
    }

    #[test]
    fn test_weekend_moves_to_monday() {
        let sched = pacific(vec![]);
        let monday = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();
        for candidate in [
            local(&sched, 2024, 5, 31, 20), // Friday evening
            local(&sched, 2024, 6, 1, 12),  // Saturday noon
            local(&sched, 2024, 6, 2, 23),  // Sunday night
        ] {
            let aligned = sched.next_window_aligned(candidate, &business_hours());
            let aligned_local = aligned.with_timezone(&sched.offset());
            assert_eq!(aligned_local.date_naive(), monday);
            assert!(business_hours().contains_hour(aligned_local.hour()));
            assert!(aligned > candidate);
        }
    }

    #[test]
    fn test_holidays_are_skipped() {
        let monday = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();
        let sched = pacific(vec![monday]);
        let aligned = sched.next_window_aligned(local(&sched, 2024, 6, 1, 12), &business_hours());
        assert_eq!(
            aligned.with_timezone(&sched.offset()).date_naive(),
            NaiveDate::from_ymd_opt(2024, 6, 4).unwrap()
        );

        // in-hours on the holiday itself still moves
        let on_holiday = local(&sched, 2024, 6, 3, 10);
        assert!(sched.next_window_aligned(on_holiday, &business_hours()) > on_holiday);
    }

    #[test]
    fn test_weekends_allowed_when_window_permits() {
        let sched = pacific(vec![]);
        let window = SendWindow {
            weekdays_only: false,
            ..business_hours()
        };
        let saturday_noon = local(&sched, 2024, 6, 1, 12);
        assert_eq!(sched.next_window_aligned(saturday_noon, &window), saturday_noon);
    }

    #[test]
    fn test_local_day_and_week_boundaries() {
        let sched = pacific(vec![]);
        // Friday 23:30 local is already Saturday in UTC
        let friday_late = local(&sched, 2024, 6, 7, 23) + Duration::minutes(30);
        assert_eq!(sched.start_of_next_day(friday_late), local(&sched, 2024, 6, 8, 0));
        assert_eq!(sched.start_of_next_week(friday_late), local(&sched, 2024, 6, 10, 0));

        // a Monday rolls over to the following Monday
        let monday = local(&sched, 2024, 6, 3, 9);
        assert_eq!(sched.start_of_next_week(monday), local(&sched, 2024, 6, 10, 0));
        let sunday = local(&sched, 2024, 6, 9, 12);
        assert_eq!(sched.start_of_next_week(sunday), local(&sched, 2024, 6, 10, 0));
    }

    #[test]
    fn test_invalid_hours_fall_back_to_whole_day() {
        let sched = JitterGenerator::new(&SendWindowConfig {
            utc_offset_minutes: 0,
            start_hour: 18,
            end_hour: 5,
            spread_hours: 0,
            weekdays_only: false,
            holidays: vec![],
        });
        assert_eq!(sched.preferred_send_window(), SendWindow::always());
    }
}
