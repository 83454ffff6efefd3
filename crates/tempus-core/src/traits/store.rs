use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use tempus_domain::{
    CalendarSpec, CompletedExecutionInstruction, GroupMatcher, JobDetail, JobKey,
    SchedulerStateRecord, Trigger, TriggerFiredResult, TriggerKey, TriggerState,
};
use tempus_errors::SchedulerResult;

/// misfire 清扫的结果
#[derive(Debug, Clone, Default)]
pub struct MisfireSweepResult {
    /// 本轮处理的触发器数量
    pub processed: usize,
    /// 达到批量上限，还有未处理的 misfire，应立即再扫一轮
    pub has_more: bool,
    /// 处理后得到的最早新触发时间，用于提示调度循环提前醒来
    pub earliest_new_fire_time: Option<DateTime<Utc>>,
    /// 被按策略重新安排的触发器
    pub misfired: Vec<TriggerKey>,
    /// 处理后不再有后续触发、已迁移到 COMPLETE 的触发器
    pub completed: Vec<TriggerKey>,
}

/// 故障实例恢复的结果
#[derive(Debug, Clone)]
pub struct InstanceRecoveryReport {
    pub instance_id: String,
    /// 被删除的在途触发记录数
    pub fired_rows_deleted: usize,
    /// 合成的恢复触发器
    pub recovery_triggers: Vec<TriggerKey>,
    /// 被还原回合理状态的原触发器
    pub restored_triggers: Vec<TriggerKey>,
}

/// 作业存储契约
///
/// 每个操作要么整体提交，要么保持状态不变。集群存储以
/// `TRIGGER_ACCESS` / `STATE_ACCESS` 两把命名锁保护（加锁顺序固定为
/// STATE 在前），内存存储以一把粗粒度互斥锁保护。满足契约的实现可以
/// 互换接入，调度引擎不感知差异。
#[async_trait]
pub trait JobStore: Send + Sync {
    /// 初始化存储（建表、锁行、连接检查等）
    async fn initialize(&self) -> SchedulerResult<()>;

    /// 关闭存储
    async fn shutdown(&self) -> SchedulerResult<()>;

    // ------------------------------------------------------------------
    // 注册表编辑
    // ------------------------------------------------------------------

    async fn store_job(&self, job: &JobDetail, replace: bool) -> SchedulerResult<()>;

    /// 插入触发器；所属分组被记为暂停时以 PAUSED 状态入库
    async fn store_trigger(&self, trigger: &Trigger, replace: bool) -> SchedulerResult<()>;

    async fn store_job_and_trigger(
        &self,
        job: &JobDetail,
        trigger: &Trigger,
        replace: bool,
    ) -> SchedulerResult<()>;

    /// 删除作业及其全部触发器；返回作业是否存在
    async fn remove_job(&self, key: &JobKey) -> SchedulerResult<bool>;

    /// 删除触发器；非持久作业失去最后一个触发器时一并删除。
    /// 返回触发器是否存在
    async fn remove_trigger(&self, key: &TriggerKey) -> SchedulerResult<bool>;

    /// 以新触发器替换旧触发器（必须引用同一作业）；返回旧触发器是否存在
    async fn replace_trigger(&self, key: &TriggerKey, new_trigger: &Trigger)
        -> SchedulerResult<bool>;

    async fn retrieve_job(&self, key: &JobKey) -> SchedulerResult<Option<JobDetail>>;

    async fn retrieve_trigger(&self, key: &TriggerKey) -> SchedulerResult<Option<Trigger>>;

    async fn get_triggers_for_job(&self, key: &JobKey) -> SchedulerResult<Vec<Trigger>>;

    /// 触发器不存在时返回 `TriggerState::Deleted`
    async fn get_trigger_state(&self, key: &TriggerKey) -> SchedulerResult<TriggerState>;

    async fn store_calendar(
        &self,
        name: &str,
        calendar: &CalendarSpec,
        replace: bool,
        update_triggers: bool,
    ) -> SchedulerResult<()>;

    async fn retrieve_calendar(&self, name: &str) -> SchedulerResult<Option<CalendarSpec>>;

    // ------------------------------------------------------------------
    // 获取-点火-完成流水线
    // ------------------------------------------------------------------

    /// 获取下一批到期触发器
    ///
    /// 返回 WAITING 且 `next_fire_time <= no_later_than + time_window`
    /// 的触发器，按 (next_fire_time asc, priority desc, name asc) 排序，
    /// 至多 `max_count` 个。每个返回的触发器已原子地迁移到 ACQUIRED
    /// 并写入 ACQUIRED 状态的已触发记录；竞争失败的触发器被静默跳过。
    async fn acquire_next_triggers(
        &self,
        no_later_than: DateTime<Utc>,
        max_count: usize,
        time_window: Duration,
    ) -> SchedulerResult<Vec<Trigger>>;

    /// 把已获取但未点火的触发器放回 WAITING 并删除其已触发记录
    async fn release_acquired_trigger(&self, trigger: &Trigger) -> SchedulerResult<()>;

    /// 点火：推进调度、决定后继状态、把已触发记录迁移到 EXECUTING
    async fn triggers_fired(&self, triggers: &[Trigger])
        -> SchedulerResult<Vec<TriggerFiredResult>>;

    /// 执行完成：应用处理指令、删除已触发记录、释放被阻塞的同作业触发器
    async fn triggered_job_complete(
        &self,
        trigger: &Trigger,
        job: &JobDetail,
        instruction: CompletedExecutionInstruction,
    ) -> SchedulerResult<()>;

    // ------------------------------------------------------------------
    // misfire
    // ------------------------------------------------------------------

    /// 列出 WAITING 且 `next_fire_time` 早于 `cutoff` 的触发器
    /// （misfire 指令为 IGNORE 的除外）
    async fn get_misfired_triggers(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> SchedulerResult<Vec<TriggerKey>>;

    /// 清扫一批 misfire 并按各自策略更新触发时间
    async fn recover_misfires(
        &self,
        threshold: Duration,
        max_count: usize,
    ) -> SchedulerResult<MisfireSweepResult>;

    // ------------------------------------------------------------------
    // 集群
    // ------------------------------------------------------------------

    /// 更新本节点的存活记录并返回更新后的记录
    async fn check_in(&self) -> SchedulerResult<SchedulerStateRecord>;

    /// 找出超过 `check_in_interval + 容忍偏移` 未签到的其他节点
    async fn find_failed_instances(&self) -> SchedulerResult<Vec<SchedulerStateRecord>>;

    /// 回收指定实例的在途触发：为 `requests_recovery` 的作业合成恢复
    /// 触发器、还原原触发器状态、删除其已触发记录与存活记录
    async fn recover_jobs(&self, instance_id: &str) -> SchedulerResult<InstanceRecoveryReport>;

    // ------------------------------------------------------------------
    // 暂停 / 恢复
    // ------------------------------------------------------------------

    async fn pause_trigger(&self, key: &TriggerKey) -> SchedulerResult<()>;

    /// 恢复触发器；错过 misfire 阈值的立即按策略处理
    async fn resume_trigger(&self, key: &TriggerKey) -> SchedulerResult<()>;

    /// 暂停匹配分组中的触发器并记住匹配器；返回受影响的分组
    async fn pause_triggers(&self, matcher: &GroupMatcher) -> SchedulerResult<Vec<String>>;

    async fn resume_triggers(&self, matcher: &GroupMatcher) -> SchedulerResult<Vec<String>>;

    async fn pause_job(&self, key: &JobKey) -> SchedulerResult<()>;

    async fn resume_job(&self, key: &JobKey) -> SchedulerResult<()>;

    async fn pause_jobs(&self, matcher: &GroupMatcher) -> SchedulerResult<Vec<String>>;

    async fn resume_jobs(&self, matcher: &GroupMatcher) -> SchedulerResult<Vec<String>>;

    async fn pause_all(&self) -> SchedulerResult<()>;

    async fn resume_all(&self) -> SchedulerResult<()>;

    async fn get_paused_trigger_groups(&self) -> SchedulerResult<Vec<String>>;

    // ------------------------------------------------------------------
    // 其它
    // ------------------------------------------------------------------

    /// 清空全部调度数据（作业、触发器、日历、暂停分组记录），
    /// 保留节点存活记录
    async fn clear_all_scheduling_data(&self) -> SchedulerResult<()>;
}
