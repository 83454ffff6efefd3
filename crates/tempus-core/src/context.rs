use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde_json::Value;

use tempus_domain::{
    JobDataMap, JobDetail, Trigger, TriggerFiredBundle, TriggerKey,
    KEY_RECOVERING_TRIGGER_GROUP, KEY_RECOVERING_TRIGGER_NAME,
};

/// 作业执行上下文
///
/// 每次触发为作业实例准备的只读调度信息加上可变的执行数据。内部以
/// `Arc` 共享，克隆后仍指向同一次执行；取消请求通过中断标志传递，
/// 作业自行决定如何配合。
#[derive(Debug, Clone)]
pub struct JobExecutionContext {
    inner: Arc<ContextInner>,
}

#[derive(Debug)]
struct ContextInner {
    scheduler_name: String,
    instance_id: String,
    fire_instance_id: String,
    job_detail: JobDetail,
    trigger: Trigger,
    recovering: bool,
    scheduled_fire_time: DateTime<Utc>,
    fire_time: DateTime<Utc>,
    previous_fire_time: Option<DateTime<Utc>>,
    next_fire_time: Option<DateTime<Utc>>,
    refire_count: AtomicU32,
    merged_data: Mutex<JobDataMap>,
    result: Mutex<Option<Value>>,
    interrupted: AtomicBool,
}

impl JobExecutionContext {
    pub fn new(scheduler_name: &str, instance_id: &str, bundle: &TriggerFiredBundle) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                scheduler_name: scheduler_name.to_string(),
                instance_id: instance_id.to_string(),
                fire_instance_id: bundle.fire_instance_id.clone(),
                job_detail: bundle.job.clone(),
                trigger: bundle.trigger.clone(),
                recovering: bundle.recovering,
                scheduled_fire_time: bundle.scheduled_fire_time,
                fire_time: bundle.fired_at,
                previous_fire_time: bundle.previous_fire_time,
                next_fire_time: bundle.next_fire_time,
                refire_count: AtomicU32::new(0),
                merged_data: Mutex::new(bundle.merged_data_map()),
                result: Mutex::new(None),
                interrupted: AtomicBool::new(false),
            }),
        }
    }

    pub fn scheduler_name(&self) -> &str {
        &self.inner.scheduler_name
    }

    pub fn instance_id(&self) -> &str {
        &self.inner.instance_id
    }

    pub fn fire_instance_id(&self) -> &str {
        &self.inner.fire_instance_id
    }

    pub fn job_detail(&self) -> &JobDetail {
        &self.inner.job_detail
    }

    pub fn trigger(&self) -> &Trigger {
        &self.inner.trigger
    }

    /// 计划触发时间；恢复触发时为原始的计划时间
    pub fn scheduled_fire_time(&self) -> DateTime<Utc> {
        self.inner.scheduled_fire_time
    }

    /// 实际触发时间
    pub fn fire_time(&self) -> DateTime<Utc> {
        self.inner.fire_time
    }

    pub fn previous_fire_time(&self) -> Option<DateTime<Utc>> {
        self.inner.previous_fire_time
    }

    pub fn next_fire_time(&self) -> Option<DateTime<Utc>> {
        self.inner.next_fire_time
    }

    /// 本次执行是否由故障恢复流程补触发
    pub fn recovering(&self) -> bool {
        self.inner.recovering
    }

    /// 恢复触发时返回原触发器的标识
    pub fn recovering_trigger_key(&self) -> Option<TriggerKey> {
        if !self.inner.recovering {
            return None;
        }
        let data = self.inner.merged_data.lock().expect("数据映射锁已中毒");
        let name = data.get_string(KEY_RECOVERING_TRIGGER_NAME)?;
        let group = data.get_string(KEY_RECOVERING_TRIGGER_GROUP)?;
        Some(TriggerKey::new(name, group))
    }

    pub fn refire_count(&self) -> u32 {
        self.inner.refire_count.load(Ordering::Relaxed)
    }

    pub fn increment_refire_count(&self) {
        self.inner.refire_count.fetch_add(1, Ordering::Relaxed);
    }

    /// 合并后的执行数据快照（作业侧与触发器侧合并，触发器侧优先）
    pub fn merged_data(&self) -> JobDataMap {
        self.inner.merged_data.lock().expect("数据映射锁已中毒").clone()
    }

    /// 向执行数据写入一个键值，作业需要回写数据时使用
    pub fn put_data<K: Into<String>, V: Into<Value>>(&self, key: K, value: V) {
        self.inner
            .merged_data
            .lock()
            .expect("数据映射锁已中毒")
            .insert(key, value);
    }

    pub fn set_result(&self, result: Value) {
        *self.inner.result.lock().expect("结果锁已中毒") = Some(result);
    }

    pub fn result(&self) -> Option<Value> {
        self.inner.result.lock().expect("结果锁已中毒").clone()
    }

    /// 请求取消本次执行，作业通过轮询 `is_interrupt_requested` 配合
    pub fn request_interrupt(&self) {
        self.inner.interrupted.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupt_requested(&self) -> bool {
        self.inner.interrupted.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempus_domain::{JobKey, ScheduleSpec, SimpleSchedule};

    fn bundle() -> TriggerFiredBundle {
        let job_key = JobKey::with_default_group("j1");
        let mut job = JobDetail::new(job_key.clone(), "noop");
        job.data_map.insert("region", "cn-north");
        let mut trigger = Trigger::new(
            TriggerKey::with_default_group("t1"),
            job_key,
            Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            ScheduleSpec::Simple(SimpleSchedule::one_shot()),
        );
        trigger.data_map.insert("region", "cn-south");
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        TriggerFiredBundle {
            trigger,
            job,
            calendar: None,
            fire_instance_id: "fire-1".to_string(),
            fired_at: at,
            scheduled_fire_time: at,
            previous_fire_time: None,
            next_fire_time: None,
            recovering: false,
        }
    }

    #[test]
    fn test_merged_data_trigger_overrides_job() {
        let ctx = JobExecutionContext::new("sched", "node-1", &bundle());
        assert_eq!(ctx.merged_data().get_string("region").as_deref(), Some("cn-south"));
    }

    #[test]
    fn test_interrupt_flag_shared_between_clones() {
        let ctx = JobExecutionContext::new("sched", "node-1", &bundle());
        let other = ctx.clone();
        assert!(!other.is_interrupt_requested());
        ctx.request_interrupt();
        assert!(other.is_interrupt_requested());
    }

    #[test]
    fn test_refire_count() {
        let ctx = JobExecutionContext::new("sched", "node-1", &bundle());
        assert_eq!(ctx.refire_count(), 0);
        ctx.increment_refire_count();
        ctx.increment_refire_count();
        assert_eq!(ctx.refire_count(), 2);
    }
}
