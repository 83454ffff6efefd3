use std::cmp::Ordering;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tempus_errors::{SchedulerError, SchedulerResult};

use crate::calendar::CalendarSpec;
use crate::data_map::JobDataMap;
use crate::job::JobDetail;
use crate::keys::{JobKey, TriggerKey};
use crate::schedule::{MisfireInstruction, ScheduleSpec, REPEAT_FOREVER};

/// 触发器默认优先级，数值越大在同一触发时间上越先被获取
pub const DEFAULT_PRIORITY: i32 = 5;

/// 在日历排除范围内顺延候选触发时间的最大迭代次数
const MAX_CALENDAR_SKIPS: usize = 100_000;

/// 恢复触发器数据映射中记录原触发器名称的键
pub const KEY_RECOVERING_TRIGGER_NAME: &str = "recovering_trigger_name";
/// 恢复触发器数据映射中记录原触发器分组的键
pub const KEY_RECOVERING_TRIGGER_GROUP: &str = "recovering_trigger_group";
/// 恢复触发器数据映射中记录原实际触发时间（毫秒时间戳字符串）的键
pub const KEY_RECOVERING_ORIG_FIRE_TIME: &str = "recovering_orig_fire_time";
/// 恢复触发器数据映射中记录原计划触发时间（毫秒时间戳字符串）的键
pub const KEY_RECOVERING_ORIG_SCHEDULED_FIRE_TIME: &str = "recovering_orig_scheduled_fire_time";

// ============================================================================
// 触发器状态机
// ============================================================================

/// 触发器状态
///
/// `Deleted` 不会被持久化，仅作为触发器已不存在时的终态返回值。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriggerState {
    #[serde(rename = "WAITING")]
    Waiting,
    #[serde(rename = "ACQUIRED")]
    Acquired,
    #[serde(rename = "EXECUTING")]
    Executing,
    #[serde(rename = "COMPLETE")]
    Complete,
    #[serde(rename = "PAUSED")]
    Paused,
    #[serde(rename = "BLOCKED")]
    Blocked,
    #[serde(rename = "PAUSED_BLOCKED")]
    PausedBlocked,
    #[serde(rename = "ERROR")]
    Error,
    #[serde(rename = "DELETED")]
    Deleted,
}

impl TriggerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerState::Waiting => "WAITING",
            TriggerState::Acquired => "ACQUIRED",
            TriggerState::Executing => "EXECUTING",
            TriggerState::Complete => "COMPLETE",
            TriggerState::Paused => "PAUSED",
            TriggerState::Blocked => "BLOCKED",
            TriggerState::PausedBlocked => "PAUSED_BLOCKED",
            TriggerState::Error => "ERROR",
            TriggerState::Deleted => "DELETED",
        }
    }

    pub fn parse(s: &str) -> SchedulerResult<Self> {
        match s {
            "WAITING" => Ok(TriggerState::Waiting),
            "ACQUIRED" => Ok(TriggerState::Acquired),
            "EXECUTING" => Ok(TriggerState::Executing),
            "COMPLETE" => Ok(TriggerState::Complete),
            "PAUSED" => Ok(TriggerState::Paused),
            "BLOCKED" => Ok(TriggerState::Blocked),
            "PAUSED_BLOCKED" => Ok(TriggerState::PausedBlocked),
            "ERROR" => Ok(TriggerState::Error),
            "DELETED" => Ok(TriggerState::Deleted),
            other => Err(SchedulerError::internal(format!(
                "非法的触发器状态: {other}"
            ))),
        }
    }

    /// 状态机允许的迁移
    pub fn can_transition_to(self, to: TriggerState) -> bool {
        use TriggerState::*;
        if self == to || to == Deleted {
            return true;
        }
        match self {
            Waiting => matches!(to, Acquired | Paused | Complete | Error),
            Acquired => matches!(to, Executing | Waiting | Paused),
            Executing => matches!(to, Waiting | Blocked | Complete | Error),
            Blocked => matches!(to, Waiting | PausedBlocked | Complete | Error),
            Paused => matches!(to, Waiting | Complete | Error),
            PausedBlocked => matches!(to, Blocked | Paused | Waiting | Complete | Error),
            Complete => false,
            Error => matches!(to, Waiting),
            Deleted => false,
        }
    }

    pub fn is_paused_variant(self) -> bool {
        matches!(self, TriggerState::Paused | TriggerState::PausedBlocked)
    }

    pub fn is_blocked_variant(self) -> bool {
        matches!(self, TriggerState::Blocked | TriggerState::PausedBlocked)
    }
}

impl sqlx::Type<sqlx::Postgres> for TriggerState {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for TriggerState {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        TriggerState::parse(s).map_err(|e| e.to_string().into())
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for TriggerState {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str(), buf)
    }
}

// ============================================================================
// 触发器实体
// ============================================================================

/// 触发器
///
/// 一个触发器恰好引用一个作业定义，并携带自身的调度规则、优先级与
/// misfire 指令。`data_map` 在触发时覆盖作业侧的同名键。
///
/// 不变式: 当三者都存在时 `start_time <= next_fire_time <= end_time`；
/// `next_fire_time` 为空的触发器处于 COMPLETE 或 ERROR 状态。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub key: TriggerKey,
    pub job_key: JobKey,
    pub description: Option<String>,
    pub calendar_name: Option<String>,
    pub priority: i32,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub previous_fire_time: Option<DateTime<Utc>>,
    pub next_fire_time: Option<DateTime<Utc>>,
    pub misfire_instruction: MisfireInstruction,
    pub schedule: ScheduleSpec,
    pub data_map: JobDataMap,
    /// 本次触发的标识，获取（acquire）时由存储填入
    pub fire_instance_id: Option<String>,
}

impl Trigger {
    pub fn new(
        key: TriggerKey,
        job_key: JobKey,
        start_time: DateTime<Utc>,
        schedule: ScheduleSpec,
    ) -> Self {
        Self {
            key,
            job_key,
            description: None,
            calendar_name: None,
            priority: DEFAULT_PRIORITY,
            start_time,
            end_time: None,
            previous_fire_time: None,
            next_fire_time: None,
            misfire_instruction: MisfireInstruction::Smart,
            schedule,
            data_map: JobDataMap::new(),
            fire_instance_id: None,
        }
    }

    pub fn with_description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_calendar<S: Into<String>>(mut self, calendar_name: S) -> Self {
        self.calendar_name = Some(calendar_name.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_end_time(mut self, end_time: DateTime<Utc>) -> Self {
        self.end_time = Some(end_time);
        self
    }

    pub fn with_misfire_instruction(mut self, instruction: MisfireInstruction) -> Self {
        self.misfire_instruction = instruction;
        self
    }

    pub fn with_data_map(mut self, data_map: JobDataMap) -> Self {
        self.data_map = data_map;
        self
    }

    /// 校验触发器定义是否合法
    pub fn validate(&self) -> SchedulerResult<()> {
        self.schedule.validate()?;
        if let Some(end) = self.end_time {
            if end < self.start_time {
                return Err(SchedulerError::InvalidTrigger(format!(
                    "结束时间 {} 早于开始时间 {}",
                    end, self.start_time
                )));
            }
        }
        Ok(())
    }

    /// 是否还有后续触发
    pub fn may_fire_again(&self) -> bool {
        self.next_fire_time.is_some()
    }

    /// 计算首次触发时间并写入 `next_fire_time`
    pub fn compute_first_fire_time(
        &mut self,
        calendar: Option<&CalendarSpec>,
    ) -> SchedulerResult<Option<DateTime<Utc>>> {
        let probe = self.start_time - Duration::milliseconds(1);
        let first = self.next_fire_after_with_calendar(probe, calendar)?;
        self.next_fire_time = first;
        Ok(first)
    }

    /// 计算严格晚于 `after` 的下一次触发时间，跳过日历排除的时间点
    pub fn next_fire_after_with_calendar(
        &self,
        after: DateTime<Utc>,
        calendar: Option<&CalendarSpec>,
    ) -> SchedulerResult<Option<DateTime<Utc>>> {
        let mut candidate = self
            .schedule
            .fire_time_after(after, self.start_time, self.end_time)?;
        let Some(cal) = calendar else {
            return Ok(candidate);
        };
        let mut skips = 0usize;
        while let Some(t) = candidate {
            if cal.is_time_included(t) {
                return Ok(Some(t));
            }
            skips += 1;
            if skips > MAX_CALENDAR_SKIPS {
                return Err(SchedulerError::InvalidTrigger(format!(
                    "触发器 {} 在日历限制内找不到可触发时间",
                    self.key
                )));
            }
            candidate = self
                .schedule
                .fire_time_after(t, self.start_time, self.end_time)?;
        }
        Ok(None)
    }

    /// 记账一次触发：推进 previous/next 触发时间
    pub fn triggered(&mut self, calendar: Option<&CalendarSpec>) -> SchedulerResult<()> {
        self.schedule.advance();
        let prev = self.next_fire_time;
        let next = match prev {
            Some(p) => self.next_fire_after_with_calendar(p, calendar)?,
            None => None,
        };
        self.previous_fire_time = prev;
        self.next_fire_time = next;
        Ok(())
    }

    /// 解析 SMART_POLICY 为该触发器类型的具体 misfire 策略
    ///
    /// 映射关系按类型固定：
    /// - 简单调度且不重复 → FIRE_NOW
    /// - 简单调度且无限重复 → RESCHEDULE_NEXT_WITH_REMAINING_COUNT
    /// - 简单调度且有限重复 → RESCHEDULE_NOW_WITH_EXISTING_REPEAT_COUNT
    /// - CRON 调度 → FIRE_NOW（即 fire-once-now）
    pub fn resolved_misfire_instruction(&self) -> MisfireInstruction {
        if self.misfire_instruction != MisfireInstruction::Smart {
            return self.misfire_instruction;
        }
        match &self.schedule {
            ScheduleSpec::Simple(s) => {
                if s.repeat_count == 0 {
                    MisfireInstruction::FireNow
                } else if s.repeat_count == REPEAT_FOREVER {
                    MisfireInstruction::RescheduleNextWithRemainingCount
                } else {
                    MisfireInstruction::RescheduleNowWithExistingCount
                }
            }
            ScheduleSpec::Cron(_) => MisfireInstruction::FireNow,
        }
    }

    /// 按解析后的 misfire 策略更新触发时间
    ///
    /// 返回更新后的 `next_fire_time`；为空表示触发器已无后续触发，
    /// 应当迁移到 COMPLETE。
    pub fn update_after_misfire(
        &mut self,
        calendar: Option<&CalendarSpec>,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Option<DateTime<Utc>>> {
        let probe = now - Duration::milliseconds(1);
        match self.resolved_misfire_instruction() {
            MisfireInstruction::Smart => unreachable!("SMART_POLICY 已在解析阶段消除"),
            MisfireInstruction::Ignore => {}
            MisfireInstruction::FireNow => {
                self.next_fire_time = Some(now);
            }
            MisfireInstruction::RescheduleNowWithExistingCount => {
                self.schedule.reset_times_triggered();
                self.start_time = now;
                self.next_fire_time = Some(now);
            }
            MisfireInstruction::RescheduleNowWithRemainingCount => {
                let missed = match self.next_fire_time {
                    Some(old_next) => self.schedule.fires_between(old_next, now, self.start_time),
                    None => 0,
                };
                self.schedule.shrink_to_remaining(missed);
                self.start_time = now;
                self.next_fire_time = Some(now);
            }
            MisfireInstruction::RescheduleNextWithExistingCount
            | MisfireInstruction::DoNothing => {
                self.next_fire_time = self.next_fire_after_with_calendar(probe, calendar)?;
            }
            MisfireInstruction::RescheduleNextWithRemainingCount => {
                let next = self.next_fire_after_with_calendar(probe, calendar)?;
                if let Some(t) = next {
                    let start = self.start_time;
                    self.schedule.consume_fires_up_to(t, start);
                }
                self.next_fire_time = next;
            }
        }
        // 顺延后仍需避开日历排除范围
        if let (Some(t), Some(cal)) = (self.next_fire_time, calendar) {
            if !cal.is_time_included(t) {
                self.next_fire_time = self.next_fire_after_with_calendar(t, Some(cal))?;
            }
        }
        Ok(self.next_fire_time)
    }

    /// 日历被替换后重新计算下一次触发时间
    ///
    /// 只负责避开新日历的排除范围；已经落在过去的触发时间交给
    /// misfire 清扫处理。
    pub fn update_with_new_calendar(
        &mut self,
        calendar: &CalendarSpec,
    ) -> SchedulerResult<Option<DateTime<Utc>>> {
        let Some(next) = self.next_fire_time else {
            return Ok(None);
        };
        if !calendar.is_time_included(next) {
            self.next_fire_time = self.next_fire_after_with_calendar(next, Some(calendar))?;
        }
        Ok(self.next_fire_time)
    }

    /// 批量获取时的排序规则: (next_fire_time asc, priority desc, name asc)
    pub fn acquisition_order(a: &Trigger, b: &Trigger) -> Ordering {
        let a_next = a.next_fire_time;
        let b_next = b.next_fire_time;
        a_next
            .cmp(&b_next)
            .then_with(|| b.priority.cmp(&a.priority))
            .then_with(|| a.key.name.cmp(&b.key.name))
    }
}

// ============================================================================
// 已触发记录与集群状态
// ============================================================================

/// 已触发记录的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FiredTriggerState {
    #[serde(rename = "ACQUIRED")]
    Acquired,
    #[serde(rename = "EXECUTING")]
    Executing,
}

impl FiredTriggerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FiredTriggerState::Acquired => "ACQUIRED",
            FiredTriggerState::Executing => "EXECUTING",
        }
    }

    pub fn parse(s: &str) -> SchedulerResult<Self> {
        match s {
            "ACQUIRED" => Ok(FiredTriggerState::Acquired),
            "EXECUTING" => Ok(FiredTriggerState::Executing),
            other => Err(SchedulerError::internal(format!(
                "非法的已触发记录状态: {other}"
            ))),
        }
    }
}

impl sqlx::Type<sqlx::Postgres> for FiredTriggerState {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for FiredTriggerState {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        FiredTriggerState::parse(s).map_err(|e| e.to_string().into())
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for FiredTriggerState {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str(), buf)
    }
}

/// 已触发记录
///
/// 触发器被获取后立即写入的持久化记录，节点崩溃后其他节点依据该记录
/// 执行故障恢复。执行完成（无论成败）后删除。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiredTrigger {
    pub entry_id: String,
    pub trigger_key: TriggerKey,
    pub job_key: JobKey,
    pub instance_id: String,
    pub state: FiredTriggerState,
    pub fired_at: DateTime<Utc>,
    pub scheduled_at: DateTime<Utc>,
    pub priority: i32,
    pub non_concurrent: bool,
    pub requests_recovery: bool,
}

impl FiredTrigger {
    /// 获取触发器时创建记录，作业相关标志从作业定义拷贝
    pub fn acquired(
        trigger: &Trigger,
        job: &JobDetail,
        instance_id: &str,
        now: DateTime<Utc>,
        scheduled_at: DateTime<Utc>,
    ) -> Self {
        Self {
            entry_id: Uuid::new_v4().simple().to_string(),
            trigger_key: trigger.key.clone(),
            job_key: job.key.clone(),
            instance_id: instance_id.to_string(),
            state: FiredTriggerState::Acquired,
            fired_at: now,
            scheduled_at,
            priority: trigger.priority,
            non_concurrent: job.concurrent_execution_disallowed,
            requests_recovery: job.requests_recovery,
        }
    }
}

/// 集群节点的存活记录
///
/// 节点每隔 `check_in_interval_ms` 更新一次自身记录；超过
/// 间隔加容忍偏移仍未更新的节点被视为故障节点。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerStateRecord {
    pub instance_id: String,
    pub last_check_in: DateTime<Utc>,
    pub check_in_interval_ms: i64,
}

impl SchedulerStateRecord {
    pub fn is_failed(&self, now: DateTime<Utc>, tolerance_ms: i64) -> bool {
        (now - self.last_check_in).num_milliseconds() > self.check_in_interval_ms + tolerance_ms
    }
}

// ============================================================================
// 触发结果
// ============================================================================

/// `triggers_fired` 为每个成功点火的触发器返回的数据包
#[derive(Debug, Clone)]
pub struct TriggerFiredBundle {
    /// 推进过 previous/next 之后的触发器
    pub trigger: Trigger,
    pub job: JobDetail,
    pub calendar: Option<CalendarSpec>,
    pub fire_instance_id: String,
    pub fired_at: DateTime<Utc>,
    pub scheduled_fire_time: DateTime<Utc>,
    pub previous_fire_time: Option<DateTime<Utc>>,
    pub next_fire_time: Option<DateTime<Utc>>,
    pub recovering: bool,
}

impl TriggerFiredBundle {
    /// 作业侧与触发器侧数据映射合并后的执行数据
    pub fn merged_data_map(&self) -> JobDataMap {
        self.job.data_map.merged_with(&self.trigger.data_map)
    }
}

/// `triggers_fired` 逐项返回的结果
#[derive(Debug, Clone)]
pub enum TriggerFiredResult {
    Fired(Box<TriggerFiredBundle>),
    /// 触发器在获取与点火之间被删除或状态被抢占
    Rejected(TriggerKey),
}

/// 作业执行完成后交给存储的处理指令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletedExecutionInstruction {
    NoInstruction,
    ReExecuteJob,
    SetTriggerComplete,
    DeleteTrigger,
    SetAllJobTriggersComplete,
    SetTriggerError,
    SetAllJobTriggersError,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::{CronSchedule, SimpleSchedule};
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn simple_trigger(schedule: SimpleSchedule) -> Trigger {
        Trigger::new(
            TriggerKey::with_default_group("t1"),
            JobKey::with_default_group("j1"),
            t(0),
            ScheduleSpec::Simple(schedule),
        )
    }

    #[test]
    fn test_state_machine_legal_transitions() {
        use TriggerState::*;
        assert!(Waiting.can_transition_to(Acquired));
        assert!(Waiting.can_transition_to(Paused));
        assert!(Waiting.can_transition_to(Complete));
        assert!(Acquired.can_transition_to(Executing));
        assert!(Acquired.can_transition_to(Waiting));
        assert!(Executing.can_transition_to(Waiting));
        assert!(Executing.can_transition_to(Blocked));
        assert!(Executing.can_transition_to(Complete));
        assert!(Executing.can_transition_to(Error));
        assert!(Blocked.can_transition_to(Waiting));
        assert!(Blocked.can_transition_to(PausedBlocked));
        assert!(Paused.can_transition_to(Waiting));
        assert!(PausedBlocked.can_transition_to(Blocked));
        // 任何状态都可以删除
        assert!(Complete.can_transition_to(Deleted));
        assert!(Executing.can_transition_to(Deleted));
    }

    #[test]
    fn test_state_machine_illegal_transitions() {
        use TriggerState::*;
        assert!(!Waiting.can_transition_to(Executing));
        assert!(!Waiting.can_transition_to(Blocked));
        assert!(!Paused.can_transition_to(Acquired));
        assert!(!Complete.can_transition_to(Waiting));
        assert!(!Deleted.can_transition_to(Waiting));
    }

    #[test]
    fn test_compute_first_fire_time() {
        let mut trigger = simple_trigger(SimpleSchedule::one_shot());
        let first = trigger.compute_first_fire_time(None).unwrap();
        assert_eq!(first, Some(t(0)));
        assert_eq!(trigger.next_fire_time, Some(t(0)));
    }

    #[test]
    fn test_triggered_advances_schedule() {
        let mut trigger = simple_trigger(SimpleSchedule::repeat(10_000, 2));
        trigger.compute_first_fire_time(None).unwrap();

        trigger.triggered(None).unwrap();
        assert_eq!(trigger.previous_fire_time, Some(t(0)));
        assert_eq!(trigger.next_fire_time, Some(t(10)));

        trigger.triggered(None).unwrap();
        trigger.triggered(None).unwrap();
        assert_eq!(trigger.previous_fire_time, Some(t(20)));
        assert_eq!(trigger.next_fire_time, None);
        assert!(!trigger.may_fire_again());
    }

    #[test]
    fn test_triggered_skips_calendar_excluded() {
        let cal = CalendarSpec::Daily {
            range_start_minutes: 0,
            range_end_minutes: 1,
        };
        let mut trigger2 = Trigger::new(
            TriggerKey::with_default_group("t-cal2"),
            JobKey::with_default_group("j1"),
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            ScheduleSpec::Simple(SimpleSchedule::repeat_forever(30_000)),
        );
        let first = trigger2.compute_first_fire_time(Some(&cal)).unwrap();
        // 00:00:00 和 00:00:30 都在排除窗口内，顺延到 00:01:00
        assert_eq!(
            first,
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 0, 1, 0).unwrap())
        );
    }

    #[test]
    fn test_smart_policy_resolution_one_shot() {
        let trigger = simple_trigger(SimpleSchedule::one_shot());
        assert_eq!(
            trigger.resolved_misfire_instruction(),
            MisfireInstruction::FireNow
        );
    }

    #[test]
    fn test_smart_policy_resolution_repeat_forever() {
        let trigger = simple_trigger(SimpleSchedule::repeat_forever(1000));
        assert_eq!(
            trigger.resolved_misfire_instruction(),
            MisfireInstruction::RescheduleNextWithRemainingCount
        );
    }

    #[test]
    fn test_smart_policy_resolution_finite_repeat() {
        let trigger = simple_trigger(SimpleSchedule::repeat(1000, 5));
        assert_eq!(
            trigger.resolved_misfire_instruction(),
            MisfireInstruction::RescheduleNowWithExistingCount
        );
    }

    #[test]
    fn test_smart_policy_resolution_cron() {
        let trigger = Trigger::new(
            TriggerKey::with_default_group("t-cron"),
            JobKey::with_default_group("j1"),
            t(0),
            ScheduleSpec::Cron(CronSchedule::new("0 * * * * *")),
        );
        assert_eq!(
            trigger.resolved_misfire_instruction(),
            MisfireInstruction::FireNow
        );
    }

    #[test]
    fn test_explicit_instruction_not_overridden() {
        let trigger = simple_trigger(SimpleSchedule::one_shot())
            .with_misfire_instruction(MisfireInstruction::Ignore);
        assert_eq!(
            trigger.resolved_misfire_instruction(),
            MisfireInstruction::Ignore
        );
    }

    #[test]
    fn test_update_after_misfire_fire_now() {
        let mut trigger = simple_trigger(SimpleSchedule::one_shot());
        trigger.compute_first_fire_time(None).unwrap();
        let now = t(120);
        let next = trigger.update_after_misfire(None, now).unwrap();
        assert_eq!(next, Some(now));
    }

    #[test]
    fn test_update_after_misfire_ignore_keeps_time() {
        let mut trigger = simple_trigger(SimpleSchedule::one_shot())
            .with_misfire_instruction(MisfireInstruction::Ignore);
        trigger.compute_first_fire_time(None).unwrap();
        let next = trigger.update_after_misfire(None, t(120)).unwrap();
        assert_eq!(next, Some(t(0)));
    }

    #[test]
    fn test_update_after_misfire_next_with_remaining() {
        let mut trigger = simple_trigger(SimpleSchedule::repeat_forever(10_000));
        trigger.compute_first_fire_time(None).unwrap();
        // 错过了 t(0)..t(30)，顺延到 now 之后的调度点
        let next = trigger.update_after_misfire(None, t(35)).unwrap();
        assert_eq!(next, Some(t(40)));
    }

    #[test]
    fn test_update_after_misfire_do_nothing_cron() {
        let mut trigger = Trigger::new(
            TriggerKey::with_default_group("t-cron"),
            JobKey::with_default_group("j1"),
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            ScheduleSpec::Cron(CronSchedule::new("0 0 * * * *")),
        )
        .with_misfire_instruction(MisfireInstruction::DoNothing);
        trigger.compute_first_fire_time(None).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 5, 30, 0).unwrap();
        let next = trigger.update_after_misfire(None, now).unwrap();
        assert_eq!(
            next,
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 6, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_acquisition_order() {
        let mut a = simple_trigger(SimpleSchedule::one_shot());
        a.key = TriggerKey::with_default_group("a");
        a.next_fire_time = Some(t(10));
        let mut b = a.clone();
        b.key = TriggerKey::with_default_group("b");
        let mut c = a.clone();
        c.key = TriggerKey::with_default_group("c");
        c.priority = 10;
        let mut d = a.clone();
        d.key = TriggerKey::with_default_group("d");
        d.next_fire_time = Some(t(5));

        let mut list = vec![a.clone(), b.clone(), c.clone(), d.clone()];
        list.sort_by(Trigger::acquisition_order);
        let names: Vec<&str> = list.iter().map(|x| x.key.name.as_str()).collect();
        // d 时间最早；同一时间上 c 优先级更高；a/b 按名称
        assert_eq!(names, vec!["d", "c", "a", "b"]);
    }

    #[test]
    fn test_scheduler_state_failure_detection() {
        let record = SchedulerStateRecord {
            instance_id: "node-a".to_string(),
            last_check_in: t(0),
            check_in_interval_ms: 15_000,
        };
        // 间隔 + 容忍度以内不算故障
        assert!(!record.is_failed(t(20), 15_000));
        assert!(record.is_failed(t(31), 15_000));
    }

    #[test]
    fn test_fired_trigger_copies_job_flags() {
        let job = JobDetail::new(JobKey::with_default_group("j1"), "shell")
            .concurrent_execution_disallowed(true)
            .requests_recovery(true);
        let mut trigger = simple_trigger(SimpleSchedule::one_shot());
        trigger.compute_first_fire_time(None).unwrap();
        let fired = FiredTrigger::acquired(&trigger, &job, "node-a", t(1), t(0));
        assert!(fired.non_concurrent);
        assert!(fired.requests_recovery);
        assert_eq!(fired.state, FiredTriggerState::Acquired);
        assert_eq!(fired.scheduled_at, t(0));
        assert!(!fired.entry_id.is_empty());
    }
}
