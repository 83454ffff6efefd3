use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// 日历排除规则
///
/// 触发器引用日历后，命中排除范围的候选触发时间会被跳过，调度顺延到
/// 下一个未被排除的时间点。所有判断均基于 UTC。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CalendarSpec {
    /// 排除指定日期（整天）
    #[serde(rename = "HOLIDAY")]
    Holiday { excluded_dates: Vec<NaiveDate> },
    /// 排除每周的某几天，0 = 周一 … 6 = 周日
    #[serde(rename = "WEEKLY")]
    Weekly { excluded_days: Vec<u32> },
    /// 排除每天的一段时间窗口，单位为当天第几分钟，区间为 [start, end)
    #[serde(rename = "DAILY")]
    Daily {
        range_start_minutes: u32,
        range_end_minutes: u32,
    },
}

impl CalendarSpec {
    /// 判断时间点是否允许触发
    pub fn is_time_included(&self, time: DateTime<Utc>) -> bool {
        match self {
            CalendarSpec::Holiday { excluded_dates } => {
                !excluded_dates.contains(&time.date_naive())
            }
            CalendarSpec::Weekly { excluded_days } => {
                !excluded_days.contains(&time.weekday().num_days_from_monday())
            }
            CalendarSpec::Daily {
                range_start_minutes,
                range_end_minutes,
            } => {
                let minute_of_day = time.hour() * 60 + time.minute();
                !(minute_of_day >= *range_start_minutes && minute_of_day < *range_end_minutes)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_holiday_calendar() {
        let cal = CalendarSpec::Holiday {
            excluded_dates: vec![NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()],
        };
        let new_year = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        let work_day = Utc.with_ymd_and_hms(2024, 1, 2, 9, 0, 0).unwrap();
        assert!(!cal.is_time_included(new_year));
        assert!(cal.is_time_included(work_day));
    }

    #[test]
    fn test_weekly_calendar_excludes_weekend() {
        let cal = CalendarSpec::Weekly {
            excluded_days: vec![5, 6],
        };
        // 2024-01-06 是周六
        let saturday = Utc.with_ymd_and_hms(2024, 1, 6, 12, 0, 0).unwrap();
        let monday = Utc.with_ymd_and_hms(2024, 1, 8, 12, 0, 0).unwrap();
        assert!(!cal.is_time_included(saturday));
        assert!(cal.is_time_included(monday));
    }

    #[test]
    fn test_daily_calendar_window() {
        // 排除每天 02:00 - 04:00 的维护窗口
        let cal = CalendarSpec::Daily {
            range_start_minutes: 120,
            range_end_minutes: 240,
        };
        let in_window = Utc.with_ymd_and_hms(2024, 5, 1, 3, 0, 0).unwrap();
        let at_end = Utc.with_ymd_and_hms(2024, 5, 1, 4, 0, 0).unwrap();
        let outside = Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap();
        assert!(!cal.is_time_included(in_window));
        assert!(cal.is_time_included(at_end));
        assert!(cal.is_time_included(outside));
    }
}
