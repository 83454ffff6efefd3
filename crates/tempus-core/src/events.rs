use chrono::{DateTime, Utc};

use tempus_domain::{JobKey, TriggerKey};

/// 调度器对外发布的事件
///
/// 监听器体系被抽象为一条事件通道，核心只负责投递，订阅方自行消费。
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerEvent {
    /// 调度器进入运行状态
    SchedulerStarted,
    /// 调度器进入待机状态
    SchedulerInStandby,
    /// 调度器已关闭
    SchedulerShutdown,
    /// 触发器错失触发并已按策略处理
    TriggerMisfired(TriggerKey),
    /// 触发器不再有后续触发
    TriggerFinalized(TriggerKey),
    /// 作业随最后一个触发器一起被删除
    JobDeleted(JobKey),
    /// 一次作业执行结束
    JobExecuted {
        job_key: JobKey,
        trigger_key: TriggerKey,
        fire_instance_id: String,
        fired_at: DateTime<Utc>,
        success: bool,
    },
    /// 故障节点的在途触发已被回收
    InstanceRecovered {
        instance_id: String,
        recovery_triggers: usize,
    },
    /// 调度数据被整体清空
    SchedulingDataCleared,
    /// 调度器内部错误（循环不中断，仅通知）
    SchedulerError { message: String },
}
