use chrono::{DateTime, Utc};

use tempus_domain::{JobKey, TriggerKey};

/// 调度变更信号器
///
/// 调度数据发生可能影响下一次触发时间的变化时，通过该接口唤醒调度
/// 循环。`signal_scheduling_change` 是唯一要求低延迟的操作，其余
/// `notify_*` 仅向事件通道投递通知。
pub trait SchedulerSignaler: Send + Sync {
    /// 唤醒调度循环；`candidate_earliest` 提示新候选触发时间可能多早
    fn signal_scheduling_change(&self, candidate_earliest: Option<DateTime<Utc>>);

    fn notify_misfired(&self, trigger: &TriggerKey);

    fn notify_finalized(&self, trigger: &TriggerKey);

    fn notify_job_deleted(&self, job: &JobKey);

    fn notify_error(&self, message: &str);
}
