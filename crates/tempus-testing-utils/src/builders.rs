//! Builders for creating test entities with sensible defaults

use chrono::{DateTime, Utc};

use tempus_domain::{
    JobDetail, JobKey, ScheduleSpec, SimpleSchedule, Trigger, TriggerKey,
};

/// 默认分组下的测试作业定义
pub fn job_detail(name: &str) -> JobDetail {
    JobDetail::new(JobKey::with_default_group(name), "test")
}

/// 指向 `job` 的一次性触发器，首次触发时间已计算好
pub fn one_shot_trigger(name: &str, job: &JobKey, start: DateTime<Utc>) -> Trigger {
    let mut trigger = Trigger::new(
        TriggerKey::with_default_group(name),
        job.clone(),
        start,
        ScheduleSpec::Simple(SimpleSchedule::one_shot()),
    );
    trigger
        .compute_first_fire_time(None)
        .expect("一次性触发器必定有首次触发时间");
    trigger
}

/// 指向 `job` 的固定间隔触发器，`count = REPEAT_FOREVER` 表示无限重复
pub fn repeating_trigger(
    name: &str,
    job: &JobKey,
    start: DateTime<Utc>,
    interval_ms: i64,
    count: i32,
) -> Trigger {
    let mut trigger = Trigger::new(
        TriggerKey::with_default_group(name),
        job.clone(),
        start,
        ScheduleSpec::Simple(SimpleSchedule::repeat(interval_ms, count)),
    );
    trigger
        .compute_first_fire_time(None)
        .expect("重复触发器必定有首次触发时间");
    trigger
}
