//! Domain Entities
//!
//! 调度引擎的核心领域模型：作业定义、触发器及其状态机、已触发记录、
//! 集群节点状态、日历与调度规则。这些实体不依赖任何具体存储实现。

pub mod calendar;
pub mod data_map;
pub mod job;
pub mod keys;
pub mod schedule;
pub mod trigger;

pub use calendar::CalendarSpec;
pub use data_map::JobDataMap;
pub use job::JobDetail;
pub use keys::{GroupMatcher, JobKey, TriggerKey, DEFAULT_GROUP, MANUAL_TRIGGERS_GROUP, RECOVERING_JOBS_GROUP};
pub use schedule::{CronSchedule, MisfireInstruction, ScheduleSpec, SimpleSchedule, REPEAT_FOREVER};
pub use trigger::{
    CompletedExecutionInstruction, FiredTrigger, FiredTriggerState, SchedulerStateRecord, Trigger,
    TriggerFiredBundle, TriggerFiredResult, TriggerState, DEFAULT_PRIORITY,
    KEY_RECOVERING_ORIG_FIRE_TIME, KEY_RECOVERING_ORIG_SCHEDULED_FIRE_TIME,
    KEY_RECOVERING_TRIGGER_GROUP, KEY_RECOVERING_TRIGGER_NAME,
};
