use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use serde::{Deserialize, Serialize};
use tempus_errors::{SchedulerError, SchedulerResult};

/// 简单调度的重复次数取该值时表示无限重复
pub const REPEAT_FOREVER: i32 = -1;

/// 错失触发（misfire）处理指令
///
/// `Smart` 是默认值，由触发器类型根据自身参数解析为具体策略，
/// 各类型的解析映射见 `Trigger::resolved_misfire_instruction`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MisfireInstruction {
    #[serde(rename = "SMART_POLICY")]
    Smart,
    #[serde(rename = "IGNORE_MISFIRE")]
    Ignore,
    #[serde(rename = "FIRE_NOW")]
    FireNow,
    #[serde(rename = "RESCHEDULE_NOW_WITH_EXISTING_REPEAT_COUNT")]
    RescheduleNowWithExistingCount,
    #[serde(rename = "RESCHEDULE_NOW_WITH_REMAINING_REPEAT_COUNT")]
    RescheduleNowWithRemainingCount,
    #[serde(rename = "RESCHEDULE_NEXT_WITH_EXISTING_COUNT")]
    RescheduleNextWithExistingCount,
    #[serde(rename = "RESCHEDULE_NEXT_WITH_REMAINING_COUNT")]
    RescheduleNextWithRemainingCount,
    #[serde(rename = "DO_NOTHING")]
    DoNothing,
}

impl MisfireInstruction {
    pub fn as_str(&self) -> &'static str {
        match self {
            MisfireInstruction::Smart => "SMART_POLICY",
            MisfireInstruction::Ignore => "IGNORE_MISFIRE",
            MisfireInstruction::FireNow => "FIRE_NOW",
            MisfireInstruction::RescheduleNowWithExistingCount => {
                "RESCHEDULE_NOW_WITH_EXISTING_REPEAT_COUNT"
            }
            MisfireInstruction::RescheduleNowWithRemainingCount => {
                "RESCHEDULE_NOW_WITH_REMAINING_REPEAT_COUNT"
            }
            MisfireInstruction::RescheduleNextWithExistingCount => {
                "RESCHEDULE_NEXT_WITH_EXISTING_COUNT"
            }
            MisfireInstruction::RescheduleNextWithRemainingCount => {
                "RESCHEDULE_NEXT_WITH_REMAINING_COUNT"
            }
            MisfireInstruction::DoNothing => "DO_NOTHING",
        }
    }

    pub fn parse(s: &str) -> SchedulerResult<Self> {
        match s {
            "SMART_POLICY" => Ok(MisfireInstruction::Smart),
            "IGNORE_MISFIRE" => Ok(MisfireInstruction::Ignore),
            "FIRE_NOW" => Ok(MisfireInstruction::FireNow),
            "RESCHEDULE_NOW_WITH_EXISTING_REPEAT_COUNT" => {
                Ok(MisfireInstruction::RescheduleNowWithExistingCount)
            }
            "RESCHEDULE_NOW_WITH_REMAINING_REPEAT_COUNT" => {
                Ok(MisfireInstruction::RescheduleNowWithRemainingCount)
            }
            "RESCHEDULE_NEXT_WITH_EXISTING_COUNT" => {
                Ok(MisfireInstruction::RescheduleNextWithExistingCount)
            }
            "RESCHEDULE_NEXT_WITH_REMAINING_COUNT" => {
                Ok(MisfireInstruction::RescheduleNextWithRemainingCount)
            }
            "DO_NOTHING" => Ok(MisfireInstruction::DoNothing),
            other => Err(SchedulerError::internal(format!(
                "非法的 misfire 指令: {other}"
            ))),
        }
    }
}

/// 固定间隔调度
///
/// 从触发器的 `start_time` 起每隔 `repeat_interval_ms` 触发一次，
/// 共触发 `repeat_count + 1` 次；`repeat_count = REPEAT_FOREVER` 表示无限。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleSchedule {
    pub repeat_interval_ms: i64,
    pub repeat_count: i32,
    pub times_triggered: i32,
}

impl SimpleSchedule {
    /// 只在 `start_time` 触发一次
    pub fn one_shot() -> Self {
        Self {
            repeat_interval_ms: 0,
            repeat_count: 0,
            times_triggered: 0,
        }
    }

    /// 每隔 `interval_ms` 毫秒无限重复
    pub fn repeat_forever(interval_ms: i64) -> Self {
        Self {
            repeat_interval_ms: interval_ms,
            repeat_count: REPEAT_FOREVER,
            times_triggered: 0,
        }
    }

    /// 重复 `count` 次（总计触发 `count + 1` 次）
    pub fn repeat(interval_ms: i64, count: i32) -> Self {
        Self {
            repeat_interval_ms: interval_ms,
            repeat_count: count,
            times_triggered: 0,
        }
    }

    fn fire_time_after(
        &self,
        after: DateTime<Utc>,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        if self.repeat_count != REPEAT_FOREVER && self.times_triggered > self.repeat_count {
            return None;
        }
        if let Some(end) = end {
            if after >= end {
                return None;
            }
        }
        if after < start {
            return Some(start);
        }
        if self.repeat_count == 0 || self.repeat_interval_ms <= 0 {
            return None;
        }

        let elapsed_ms = (after - start).num_milliseconds();
        let n = elapsed_ms / self.repeat_interval_ms + 1;
        if self.repeat_count != REPEAT_FOREVER && n > self.repeat_count as i64 {
            return None;
        }
        let candidate = start + Duration::milliseconds(n * self.repeat_interval_ms);
        if let Some(end) = end {
            if candidate > end {
                return None;
            }
        }
        Some(candidate)
    }

    /// 计算某个时间点对应第几次触发（0 为首次）
    fn fire_index_of(&self, time: DateTime<Utc>, start: DateTime<Utc>) -> i64 {
        if self.repeat_interval_ms <= 0 || time <= start {
            0
        } else {
            (time - start).num_milliseconds() / self.repeat_interval_ms
        }
    }
}

/// CRON 表达式调度
///
/// 表达式按 `cron` crate 的语法解析（含秒字段）。时区为 IANA 标识，
/// 缺省按 UTC 计算；未知时区标识在校验时报错。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CronSchedule {
    pub expression: String,
    pub timezone: Option<String>,
}

impl CronSchedule {
    pub fn new<E: Into<String>>(expression: E) -> Self {
        Self {
            expression: expression.into(),
            timezone: None,
        }
    }

    pub fn in_timezone<Z: Into<String>>(mut self, timezone: Z) -> Self {
        self.timezone = Some(timezone.into());
        self
    }

    fn parse(&self) -> SchedulerResult<Schedule> {
        Schedule::from_str(&self.expression).map_err(|e| SchedulerError::InvalidCron {
            expr: self.expression.clone(),
            message: e.to_string(),
        })
    }

    fn resolve_timezone(&self) -> SchedulerResult<Option<Tz>> {
        match &self.timezone {
            None => Ok(None),
            Some(id) => Tz::from_str(id)
                .map(Some)
                .map_err(|_| SchedulerError::UnknownTimeZone(id.clone())),
        }
    }

    fn fire_time_after(
        &self,
        after: DateTime<Utc>,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> SchedulerResult<Option<DateTime<Utc>>> {
        let schedule = self.parse()?;
        // 触发时间必须严格晚于 after 且不早于 start
        let from = if after < start {
            start - Duration::milliseconds(1)
        } else {
            after
        };
        let candidate = match self.resolve_timezone()? {
            Some(tz) => schedule
                .after(&from.with_timezone(&tz))
                .next()
                .map(|t| t.with_timezone(&Utc)),
            None => schedule.after(&from).next(),
        };
        match (candidate, end) {
            (Some(t), Some(end)) if t > end => Ok(None),
            (c, _) => Ok(c),
        }
    }
}

/// 触发器的调度规则
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ScheduleSpec {
    #[serde(rename = "SIMPLE")]
    Simple(SimpleSchedule),
    #[serde(rename = "CRON")]
    Cron(CronSchedule),
}

impl ScheduleSpec {
    /// 校验调度参数本身是否合法
    pub fn validate(&self) -> SchedulerResult<()> {
        match self {
            ScheduleSpec::Simple(s) => {
                if s.repeat_count < REPEAT_FOREVER {
                    return Err(SchedulerError::InvalidTrigger(format!(
                        "非法的重复次数: {}",
                        s.repeat_count
                    )));
                }
                if s.repeat_count != 0 && s.repeat_interval_ms <= 0 {
                    return Err(SchedulerError::InvalidTrigger(
                        "重复触发时间隔必须大于 0".to_string(),
                    ));
                }
                Ok(())
            }
            ScheduleSpec::Cron(c) => {
                c.parse()?;
                c.resolve_timezone()?;
                Ok(())
            }
        }
    }

    /// 计算严格晚于 `after` 的下一次触发时间，不考虑日历排除
    pub fn fire_time_after(
        &self,
        after: DateTime<Utc>,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> SchedulerResult<Option<DateTime<Utc>>> {
        match self {
            ScheduleSpec::Simple(s) => Ok(s.fire_time_after(after, start, end)),
            ScheduleSpec::Cron(c) => c.fire_time_after(after, start, end),
        }
    }

    /// 记账一次触发
    pub fn advance(&mut self) {
        if let ScheduleSpec::Simple(s) = self {
            s.times_triggered += 1;
        }
    }

    /// misfire 处理后把已错过的触发计入已触发次数
    pub(crate) fn consume_fires_up_to(&mut self, time: DateTime<Utc>, start: DateTime<Utc>) {
        if let ScheduleSpec::Simple(s) = self {
            s.times_triggered = s.fire_index_of(time, start) as i32;
        }
    }

    /// misfire 处理时把剩余次数压缩掉已错过的部分
    pub(crate) fn shrink_to_remaining(&mut self, missed: i64) {
        if let ScheduleSpec::Simple(s) = self {
            if s.repeat_count != REPEAT_FOREVER && s.repeat_count != 0 {
                s.repeat_count = (s.repeat_count as i64 - s.times_triggered as i64 - missed)
                    .max(0) as i32;
                s.times_triggered = 0;
            }
        }
    }

    pub(crate) fn reset_times_triggered(&mut self) {
        if let ScheduleSpec::Simple(s) = self {
            if s.repeat_count != REPEAT_FOREVER && s.repeat_count != 0 {
                s.repeat_count = (s.repeat_count - s.times_triggered).max(0);
            }
            s.times_triggered = 0;
        }
    }

    /// 两个调度时刻之间（左开右闭）包含多少次触发
    pub(crate) fn fires_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        start: DateTime<Utc>,
    ) -> i64 {
        match self {
            ScheduleSpec::Simple(s) => {
                if to <= from {
                    0
                } else {
                    s.fire_index_of(to, start) - s.fire_index_of(from, start)
                }
            }
            ScheduleSpec::Cron(_) => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_one_shot_fires_only_at_start() {
        let s = SimpleSchedule::one_shot();
        let start = t(100);
        assert_eq!(s.fire_time_after(t(0), start, None), Some(start));
        assert_eq!(s.fire_time_after(start, start, None), None);
    }

    #[test]
    fn test_repeat_interval_progression() {
        let s = SimpleSchedule::repeat(10_000, 2);
        let start = t(0);
        // 共触发 3 次: t(0), t(10), t(20)
        assert_eq!(s.fire_time_after(t(-5), start, None), Some(t(0)));
        assert_eq!(s.fire_time_after(t(0), start, None), Some(t(10)));
        assert_eq!(s.fire_time_after(t(15), start, None), Some(t(20)));
        assert_eq!(s.fire_time_after(t(20), start, None), None);
    }

    #[test]
    fn test_end_time_cuts_off() {
        let s = SimpleSchedule::repeat_forever(10_000);
        let start = t(0);
        assert_eq!(s.fire_time_after(t(5), start, Some(t(30))), Some(t(10)));
        assert_eq!(s.fire_time_after(t(25), start, Some(t(30))), Some(t(30)));
        assert_eq!(s.fire_time_after(t(30), start, Some(t(30))), None);
    }

    #[test]
    fn test_times_triggered_exhaustion() {
        let mut s = SimpleSchedule::one_shot();
        s.times_triggered = 1;
        assert_eq!(s.fire_time_after(t(-10), t(0), None), None);
    }

    #[test]
    fn test_cron_schedule_utc() {
        // 每分钟第 0 秒触发
        let c = CronSchedule::new("0 * * * * *");
        let after = Utc.with_ymd_and_hms(2024, 3, 1, 10, 30, 15).unwrap();
        let next = c.fire_time_after(after, after - Duration::hours(1), None).unwrap();
        assert_eq!(next, Some(Utc.with_ymd_and_hms(2024, 3, 1, 10, 31, 0).unwrap()));
    }

    #[test]
    fn test_cron_unknown_timezone() {
        let c = CronSchedule::new("0 0 9 * * *").in_timezone("Mars/Olympus");
        let spec = ScheduleSpec::Cron(c);
        match spec.validate() {
            Err(SchedulerError::UnknownTimeZone(id)) => assert_eq!(id, "Mars/Olympus"),
            other => panic!("期望 UnknownTimeZone 错误，实际: {other:?}"),
        }
    }

    #[test]
    fn test_cron_timezone_resolution() {
        // 上海时间每天 09:00 == UTC 01:00
        let c = CronSchedule::new("0 0 9 * * *").in_timezone("Asia/Shanghai");
        let after = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let next = c.fire_time_after(after, after, None).unwrap();
        assert_eq!(next, Some(Utc.with_ymd_and_hms(2024, 3, 1, 1, 0, 0).unwrap()));
    }

    #[test]
    fn test_invalid_cron_expression() {
        let spec = ScheduleSpec::Cron(CronSchedule::new("not a cron"));
        assert!(matches!(
            spec.validate(),
            Err(SchedulerError::InvalidCron { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_zero_interval_repeat() {
        let spec = ScheduleSpec::Simple(SimpleSchedule {
            repeat_interval_ms: 0,
            repeat_count: 5,
            times_triggered: 0,
        });
        assert!(matches!(
            spec.validate(),
            Err(SchedulerError::InvalidTrigger(_))
        ));
    }
}
