use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use tempus_core::{
    Clock, InstanceRecoveryReport, JobStore, MisfireSweepResult, SchedulerError, SchedulerResult,
};
use tempus_domain::{
    CalendarSpec, CompletedExecutionInstruction, FiredTrigger, FiredTriggerState, GroupMatcher,
    JobDetail, JobKey, MisfireInstruction, SchedulerStateRecord, ScheduleSpec, SimpleSchedule,
    Trigger, TriggerFiredBundle, TriggerFiredResult, TriggerKey, TriggerState,
    KEY_RECOVERING_ORIG_FIRE_TIME, KEY_RECOVERING_ORIG_SCHEDULED_FIRE_TIME,
    KEY_RECOVERING_TRIGGER_GROUP, KEY_RECOVERING_TRIGGER_NAME, RECOVERING_JOBS_GROUP,
};

#[derive(Debug, Clone)]
struct TriggerRecord {
    trigger: Trigger,
    state: TriggerState,
}

#[derive(Debug, Default)]
struct MemoryStoreInner {
    jobs: HashMap<JobKey, JobDetail>,
    triggers: HashMap<TriggerKey, TriggerRecord>,
    /// entry_id -> 在途触发记录
    fired: HashMap<String, FiredTrigger>,
    calendars: HashMap<String, CalendarSpec>,
    paused_trigger_matchers: Vec<GroupMatcher>,
    paused_job_matchers: Vec<GroupMatcher>,
    scheduler_states: HashMap<String, SchedulerStateRecord>,
    recovery_seq: u64,
}

/// 内存作业存储
///
/// 全部状态由一把互斥锁保护，每个操作在锁内整体完成，等价于
/// 单机事务。多调度器实例共享同一个 `MemoryJobStore`（通过 `Arc`）
/// 时，获取竞争语义与集群存储一致。
pub struct MemoryJobStore {
    inner: Mutex<MemoryStoreInner>,
    instance_id: String,
    check_in_interval: Duration,
    misfire_threshold: Duration,
    clock: Arc<dyn Clock>,
}

impl MemoryJobStore {
    pub fn new(
        instance_id: String,
        check_in_interval: Duration,
        misfire_threshold: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Mutex::new(MemoryStoreInner::default()),
            instance_id,
            check_in_interval,
            misfire_threshold,
            clock,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// 当前在途触发记录快照，用于监控与测试断言
    pub async fn fired_rows(&self) -> Vec<FiredTrigger> {
        self.inner.lock().await.fired.values().cloned().collect()
    }

    /// 当前节点存活记录快照
    pub async fn scheduler_states(&self) -> Vec<SchedulerStateRecord> {
        self.inner
            .lock()
            .await
            .scheduler_states
            .values()
            .cloned()
            .collect()
    }

    #[cfg(test)]
    pub(crate) async fn insert_scheduler_state_for_test(&self, record: SchedulerStateRecord) {
        self.inner
            .lock()
            .await
            .scheduler_states
            .insert(record.instance_id.clone(), record);
    }
}

// ----------------------------------------------------------------------------
// 锁内辅助函数
// ----------------------------------------------------------------------------

fn set_state(rec: &mut TriggerRecord, to: TriggerState) {
    if !rec.state.can_transition_to(to) {
        warn!(
            "触发器 {} 非法状态迁移: {} -> {}",
            rec.trigger.key,
            rec.state.as_str(),
            to.as_str()
        );
    }
    rec.state = to;
}

fn is_group_paused(matchers: &[GroupMatcher], group: &str) -> bool {
    matchers.iter().any(|m| m.matches(group))
}

fn initial_trigger_state(inner: &MemoryStoreInner, trigger: &Trigger) -> TriggerState {
    if is_group_paused(&inner.paused_trigger_matchers, &trigger.key.group)
        || is_group_paused(&inner.paused_job_matchers, &trigger.job_key.group)
    {
        TriggerState::Paused
    } else {
        TriggerState::Waiting
    }
}

fn store_job_in(inner: &mut MemoryStoreInner, job: &JobDetail, replace: bool) -> SchedulerResult<()> {
    if !replace && inner.jobs.contains_key(&job.key) {
        return Err(SchedulerError::object_already_exists(job.key.to_string()));
    }
    inner.jobs.insert(job.key.clone(), job.clone());
    Ok(())
}

fn store_trigger_in(
    inner: &mut MemoryStoreInner,
    trigger: &Trigger,
    replace: bool,
) -> SchedulerResult<()> {
    if !replace && inner.triggers.contains_key(&trigger.key) {
        return Err(SchedulerError::object_already_exists(trigger.key.to_string()));
    }
    if !inner.jobs.contains_key(&trigger.job_key) {
        return Err(SchedulerError::job_not_found(trigger.job_key.to_string()));
    }
    let state = initial_trigger_state(inner, trigger);
    inner.triggers.insert(
        trigger.key.clone(),
        TriggerRecord {
            trigger: trigger.clone(),
            state,
        },
    );
    Ok(())
}

/// 删除触发器，非持久作业失去最后一个触发器时一并删除。
/// 返回 (触发器是否存在, 作业是否被一并删除)
fn remove_trigger_in(inner: &mut MemoryStoreInner, key: &TriggerKey) -> (bool, bool) {
    let Some(removed) = inner.triggers.remove(key) else {
        return (false, false);
    };
    let job_key = removed.trigger.job_key;
    let still_referenced = inner
        .triggers
        .values()
        .any(|rec| rec.trigger.job_key == job_key);
    if !still_referenced {
        if let Some(job) = inner.jobs.get(&job_key) {
            if !job.durable {
                inner.jobs.remove(&job_key);
                return (true, true);
            }
        }
    }
    (true, false)
}

/// 作业的在途执行是否全部结束
fn job_has_running_fires(inner: &MemoryStoreInner, job_key: &JobKey) -> bool {
    inner.fired.values().any(|f| &f.job_key == job_key)
}

/// 释放某作业被阻塞的触发器
fn unblock_job_triggers(inner: &mut MemoryStoreInner, job_key: &JobKey) {
    for rec in inner.triggers.values_mut() {
        if &rec.trigger.job_key != job_key {
            continue;
        }
        match rec.state {
            TriggerState::Blocked => {
                let to = if rec.trigger.next_fire_time.is_some() {
                    TriggerState::Waiting
                } else {
                    TriggerState::Complete
                };
                set_state(rec, to);
            }
            TriggerState::PausedBlocked => set_state(rec, TriggerState::Paused),
            _ => {}
        }
    }
}

/// 阻塞某作业的全部触发器（非并发作业开始执行时）
fn block_job_triggers(inner: &mut MemoryStoreInner, job_key: &JobKey, except: &TriggerKey) {
    for rec in inner.triggers.values_mut() {
        if &rec.trigger.job_key != job_key || &rec.trigger.key == except {
            continue;
        }
        match rec.state {
            TriggerState::Waiting | TriggerState::Acquired => set_state(rec, TriggerState::Blocked),
            TriggerState::Paused => set_state(rec, TriggerState::PausedBlocked),
            _ => {}
        }
    }
}

/// 对单个触发器应用 misfire 策略
///
/// 返回处理后的下一次触发时间；`None` 表示触发器已迁移到 COMPLETE。
fn apply_misfire_in(
    inner: &mut MemoryStoreInner,
    key: &TriggerKey,
    now: DateTime<Utc>,
) -> SchedulerResult<Option<DateTime<Utc>>> {
    let calendar = {
        let Some(rec) = inner.triggers.get(key) else {
            return Ok(None);
        };
        match &rec.trigger.calendar_name {
            Some(name) => inner.calendars.get(name).cloned(),
            None => None,
        }
    };
    let rec = inner
        .triggers
        .get_mut(key)
        .expect("上一步已确认触发器存在");
    let next = rec.trigger.update_after_misfire(calendar.as_ref(), now)?;
    if next.is_none() {
        set_state(rec, TriggerState::Complete);
    }
    Ok(next)
}

/// 列出已 misfire 的 WAITING 触发器（IGNORE 策略除外），按获取顺序排序
fn misfired_keys_in(
    inner: &MemoryStoreInner,
    cutoff: DateTime<Utc>,
    limit: usize,
) -> Vec<TriggerKey> {
    let mut stale: Vec<&TriggerRecord> = inner
        .triggers
        .values()
        .filter(|rec| {
            rec.state == TriggerState::Waiting
                && rec
                    .trigger
                    .next_fire_time
                    .map(|t| t < cutoff)
                    .unwrap_or(false)
                && rec.trigger.resolved_misfire_instruction() != MisfireInstruction::Ignore
        })
        .collect();
    stale.sort_by(|a, b| Trigger::acquisition_order(&a.trigger, &b.trigger));
    stale
        .into_iter()
        .take(limit)
        .map(|rec| rec.trigger.key.clone())
        .collect()
}

fn pause_trigger_in(inner: &mut MemoryStoreInner, key: &TriggerKey) {
    if let Some(rec) = inner.triggers.get_mut(key) {
        match rec.state {
            TriggerState::Complete | TriggerState::Deleted | TriggerState::Error => {}
            TriggerState::Blocked => set_state(rec, TriggerState::PausedBlocked),
            TriggerState::PausedBlocked | TriggerState::Paused => {}
            _ => set_state(rec, TriggerState::Paused),
        }
    }
}

fn resume_trigger_in(
    inner: &mut MemoryStoreInner,
    key: &TriggerKey,
    now: DateTime<Utc>,
    misfire_threshold: Duration,
) -> SchedulerResult<()> {
    let Some(rec) = inner.triggers.get(key) else {
        return Ok(());
    };
    if !rec.state.is_paused_variant() {
        return Ok(());
    }
    let job_key = rec.trigger.job_key.clone();
    let non_concurrent = inner
        .jobs
        .get(&job_key)
        .map(|j| j.concurrent_execution_disallowed)
        .unwrap_or(false);
    let still_blocked = non_concurrent && job_has_running_fires(inner, &job_key);

    let rec = inner.triggers.get_mut(key).expect("触发器已确认存在");
    if still_blocked {
        set_state(rec, TriggerState::Blocked);
        return Ok(());
    }
    set_state(rec, TriggerState::Waiting);
    let stale = rec
        .trigger
        .next_fire_time
        .map(|t| t < now - misfire_threshold)
        .unwrap_or(false);
    if stale {
        debug!("触发器 {} 恢复时已错过触发，立即按 misfire 策略处理", key);
        apply_misfire_in(inner, key, now)?;
    }
    Ok(())
}

// ----------------------------------------------------------------------------
// JobStore 实现
// ----------------------------------------------------------------------------

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn initialize(&self) -> SchedulerResult<()> {
        Ok(())
    }

    async fn shutdown(&self) -> SchedulerResult<()> {
        Ok(())
    }

    async fn store_job(&self, job: &JobDetail, replace: bool) -> SchedulerResult<()> {
        let mut guard = self.inner.lock().await;
        store_job_in(&mut guard, job, replace)
    }

    async fn store_trigger(&self, trigger: &Trigger, replace: bool) -> SchedulerResult<()> {
        let mut guard = self.inner.lock().await;
        store_trigger_in(&mut guard, trigger, replace)
    }

    async fn store_job_and_trigger(
        &self,
        job: &JobDetail,
        trigger: &Trigger,
        replace: bool,
    ) -> SchedulerResult<()> {
        let mut guard = self.inner.lock().await;
        store_job_in(&mut guard, job, replace)?;
        store_trigger_in(&mut guard, trigger, replace)
    }

    async fn remove_job(&self, key: &JobKey) -> SchedulerResult<bool> {
        let mut guard = self.inner.lock().await;
        let trigger_keys: Vec<TriggerKey> = guard
            .triggers
            .values()
            .filter(|rec| &rec.trigger.job_key == key)
            .map(|rec| rec.trigger.key.clone())
            .collect();
        for tk in trigger_keys {
            guard.triggers.remove(&tk);
        }
        Ok(guard.jobs.remove(key).is_some())
    }

    async fn remove_trigger(&self, key: &TriggerKey) -> SchedulerResult<bool> {
        let mut guard = self.inner.lock().await;
        let (existed, _job_deleted) = remove_trigger_in(&mut guard, key);
        Ok(existed)
    }

    async fn replace_trigger(
        &self,
        key: &TriggerKey,
        new_trigger: &Trigger,
    ) -> SchedulerResult<bool> {
        let mut guard = self.inner.lock().await;
        let Some(old) = guard.triggers.get(key) else {
            return Ok(false);
        };
        if old.trigger.job_key != new_trigger.job_key {
            return Err(SchedulerError::InvalidTrigger(
                "替换触发器必须引用同一作业".to_string(),
            ));
        }
        guard.triggers.remove(key);
        store_trigger_in(&mut guard, new_trigger, true)?;
        Ok(true)
    }

    async fn retrieve_job(&self, key: &JobKey) -> SchedulerResult<Option<JobDetail>> {
        Ok(self.inner.lock().await.jobs.get(key).cloned())
    }

    async fn retrieve_trigger(&self, key: &TriggerKey) -> SchedulerResult<Option<Trigger>> {
        Ok(self
            .inner
            .lock()
            .await
            .triggers
            .get(key)
            .map(|rec| rec.trigger.clone()))
    }

    async fn get_triggers_for_job(&self, key: &JobKey) -> SchedulerResult<Vec<Trigger>> {
        Ok(self
            .inner
            .lock()
            .await
            .triggers
            .values()
            .filter(|rec| &rec.trigger.job_key == key)
            .map(|rec| rec.trigger.clone())
            .collect())
    }

    async fn get_trigger_state(&self, key: &TriggerKey) -> SchedulerResult<TriggerState> {
        Ok(self
            .inner
            .lock()
            .await
            .triggers
            .get(key)
            .map(|rec| rec.state)
            .unwrap_or(TriggerState::Deleted))
    }

    async fn store_calendar(
        &self,
        name: &str,
        calendar: &CalendarSpec,
        replace: bool,
        update_triggers: bool,
    ) -> SchedulerResult<()> {
        let mut guard = self.inner.lock().await;
        if !replace && guard.calendars.contains_key(name) {
            return Err(SchedulerError::object_already_exists(name));
        }
        guard.calendars.insert(name.to_string(), calendar.clone());
        if update_triggers {
            let keys: Vec<TriggerKey> = guard
                .triggers
                .values()
                .filter(|rec| rec.trigger.calendar_name.as_deref() == Some(name))
                .map(|rec| rec.trigger.key.clone())
                .collect();
            for key in keys {
                let rec = guard.triggers.get_mut(&key).expect("触发器已确认存在");
                let next = rec.trigger.update_with_new_calendar(calendar)?;
                if next.is_none() && rec.state == TriggerState::Waiting {
                    set_state(rec, TriggerState::Complete);
                }
            }
        }
        Ok(())
    }

    async fn retrieve_calendar(&self, name: &str) -> SchedulerResult<Option<CalendarSpec>> {
        Ok(self.inner.lock().await.calendars.get(name).cloned())
    }

    async fn acquire_next_triggers(
        &self,
        no_later_than: DateTime<Utc>,
        max_count: usize,
        time_window: Duration,
    ) -> SchedulerResult<Vec<Trigger>> {
        let mut guard = self.inner.lock().await;
        let now = self.clock.now();

        // 获取前先处理已过期的 misfire，让策略决定它们是否仍参与本批
        let misfire_cutoff = now - self.misfire_threshold;
        for key in misfired_keys_in(&guard, misfire_cutoff, usize::MAX) {
            apply_misfire_in(&mut guard, &key, now)?;
        }

        let max_time = no_later_than + time_window;
        let mut candidates: Vec<Trigger> = guard
            .triggers
            .values()
            .filter(|rec| {
                rec.state == TriggerState::Waiting
                    && rec
                        .trigger
                        .next_fire_time
                        .map(|t| t <= max_time)
                        .unwrap_or(false)
            })
            .map(|rec| rec.trigger.clone())
            .collect();
        candidates.sort_by(Trigger::acquisition_order);

        let mut acquired = Vec::new();
        let mut batch_job_keys: HashSet<JobKey> = HashSet::new();
        for candidate in candidates {
            if acquired.len() >= max_count {
                break;
            }
            let Some(job) = guard.jobs.get(&candidate.job_key).cloned() else {
                warn!("触发器 {} 引用的作业不存在，置为 ERROR", candidate.key);
                if let Some(rec) = guard.triggers.get_mut(&candidate.key) {
                    set_state(rec, TriggerState::Error);
                }
                continue;
            };
            // 非并发作业在同一批内只获取一个触发器
            if job.concurrent_execution_disallowed && !batch_job_keys.insert(job.key.clone()) {
                continue;
            }
            let (fired, snapshot) = {
                let Some(rec) = guard.triggers.get_mut(&candidate.key) else {
                    continue;
                };
                if rec.state != TriggerState::Waiting {
                    // 竞争失败，静默跳过
                    continue;
                }
                let Some(scheduled_at) = rec.trigger.next_fire_time else {
                    continue;
                };
                set_state(rec, TriggerState::Acquired);
                let fired =
                    FiredTrigger::acquired(&rec.trigger, &job, &self.instance_id, now, scheduled_at);
                rec.trigger.fire_instance_id = Some(fired.entry_id.clone());
                (fired, rec.trigger.clone())
            };
            guard.fired.insert(fired.entry_id.clone(), fired);
            acquired.push(snapshot);
        }
        Ok(acquired)
    }

    async fn release_acquired_trigger(&self, trigger: &Trigger) -> SchedulerResult<()> {
        let mut guard = self.inner.lock().await;
        if let Some(entry_id) = &trigger.fire_instance_id {
            guard.fired.remove(entry_id);
        }
        if let Some(rec) = guard.triggers.get_mut(&trigger.key) {
            if rec.state == TriggerState::Acquired {
                set_state(rec, TriggerState::Waiting);
            }
            rec.trigger.fire_instance_id = None;
        }
        Ok(())
    }

    async fn triggers_fired(
        &self,
        triggers: &[Trigger],
    ) -> SchedulerResult<Vec<TriggerFiredResult>> {
        let mut guard = self.inner.lock().await;
        let now = self.clock.now();
        let mut results = Vec::with_capacity(triggers.len());

        for t in triggers {
            // 触发器必须仍处于 ACQUIRED 且属于同一次获取
            let valid = guard
                .triggers
                .get(&t.key)
                .map(|rec| {
                    rec.state == TriggerState::Acquired
                        && rec.trigger.fire_instance_id == t.fire_instance_id
                })
                .unwrap_or(false);
            if !valid {
                // 本次获取对应的在途记录已无意义，一并清理
                if let Some(entry_id) = &t.fire_instance_id {
                    guard.fired.remove(entry_id);
                }
                results.push(TriggerFiredResult::Rejected(t.key.clone()));
                continue;
            }

            let (job_key, calendar_name) = {
                let rec = guard.triggers.get(&t.key).expect("触发器已确认存在");
                (rec.trigger.job_key.clone(), rec.trigger.calendar_name.clone())
            };
            let calendar = match &calendar_name {
                Some(name) => match guard.calendars.get(name).cloned() {
                    Some(cal) => Some(cal),
                    None => {
                        warn!("触发器 {} 引用的日历 {} 不存在，放弃点火", t.key, name);
                        if let Some(entry_id) = &t.fire_instance_id {
                            guard.fired.remove(entry_id);
                        }
                        if let Some(rec) = guard.triggers.get_mut(&t.key) {
                            set_state(rec, TriggerState::Waiting);
                            rec.trigger.fire_instance_id = None;
                        }
                        results.push(TriggerFiredResult::Rejected(t.key.clone()));
                        continue;
                    }
                },
                None => None,
            };
            let Some(job) = guard.jobs.get(&job_key).cloned() else {
                if let Some(rec) = guard.triggers.get_mut(&t.key) {
                    set_state(rec, TriggerState::Error);
                }
                results.push(TriggerFiredResult::Rejected(t.key.clone()));
                continue;
            };

            // 推进调度
            let (bundle_trigger, scheduled_at, prev_before, entry_id) = {
                let rec = guard.triggers.get_mut(&t.key).expect("触发器已确认存在");
                let scheduled_at = rec
                    .trigger
                    .next_fire_time
                    .expect("ACQUIRED 触发器必有触发时间");
                let prev_before = rec.trigger.previous_fire_time;
                rec.trigger.triggered(calendar.as_ref())?;
                let entry_id = rec
                    .trigger
                    .fire_instance_id
                    .clone()
                    .expect("ACQUIRED 触发器必有触发标识");

                let next = rec.trigger.next_fire_time;
                let to = if next.is_none() {
                    TriggerState::Complete
                } else if job.concurrent_execution_disallowed {
                    TriggerState::Blocked
                } else {
                    TriggerState::Waiting
                };
                set_state(rec, to);
                (rec.trigger.clone(), scheduled_at, prev_before, entry_id)
            };

            // 已触发记录迁移到 EXECUTING
            if let Some(row) = guard.fired.get_mut(&entry_id) {
                row.state = FiredTriggerState::Executing;
                row.fired_at = now;
            }

            // 非并发作业阻塞其余触发器
            if job.concurrent_execution_disallowed {
                block_job_triggers(&mut guard, &job.key, &t.key);
            }

            let recovering = bundle_trigger.key.group == RECOVERING_JOBS_GROUP;
            results.push(TriggerFiredResult::Fired(Box::new(TriggerFiredBundle {
                next_fire_time: bundle_trigger.next_fire_time,
                previous_fire_time: prev_before,
                trigger: bundle_trigger,
                job,
                calendar,
                fire_instance_id: entry_id,
                fired_at: now,
                scheduled_fire_time: scheduled_at,
                recovering,
            })));
        }
        Ok(results)
    }

    async fn triggered_job_complete(
        &self,
        trigger: &Trigger,
        job: &JobDetail,
        instruction: CompletedExecutionInstruction,
    ) -> SchedulerResult<()> {
        let mut guard = self.inner.lock().await;

        if job.persist_data_after_execution {
            if let Some(stored) = guard.jobs.get_mut(&job.key) {
                stored.data_map = job.data_map.clone();
            }
        }

        if let Some(entry_id) = &trigger.fire_instance_id {
            guard.fired.remove(entry_id);
        }

        if job.concurrent_execution_disallowed && !job_has_running_fires(&guard, &job.key) {
            unblock_job_triggers(&mut guard, &job.key);
        }

        match instruction {
            CompletedExecutionInstruction::NoInstruction
            | CompletedExecutionInstruction::ReExecuteJob => {}
            CompletedExecutionInstruction::SetTriggerComplete => {
                if let Some(rec) = guard.triggers.get_mut(&trigger.key) {
                    set_state(rec, TriggerState::Complete);
                }
            }
            CompletedExecutionInstruction::DeleteTrigger => {
                remove_trigger_in(&mut guard, &trigger.key);
            }
            CompletedExecutionInstruction::SetAllJobTriggersComplete => {
                for rec in guard.triggers.values_mut() {
                    if rec.trigger.job_key == job.key {
                        set_state(rec, TriggerState::Complete);
                    }
                }
            }
            CompletedExecutionInstruction::SetTriggerError => {
                if let Some(rec) = guard.triggers.get_mut(&trigger.key) {
                    set_state(rec, TriggerState::Error);
                }
            }
            CompletedExecutionInstruction::SetAllJobTriggersError => {
                for rec in guard.triggers.values_mut() {
                    if rec.trigger.job_key == job.key {
                        set_state(rec, TriggerState::Error);
                    }
                }
            }
        }

        // 不再有后续触发的触发器随完成一起移除
        let completed = guard
            .triggers
            .get(&trigger.key)
            .map(|rec| rec.state == TriggerState::Complete && rec.trigger.next_fire_time.is_none())
            .unwrap_or(false);
        if completed {
            remove_trigger_in(&mut guard, &trigger.key);
        }
        Ok(())
    }

    async fn get_misfired_triggers(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> SchedulerResult<Vec<TriggerKey>> {
        let guard = self.inner.lock().await;
        Ok(misfired_keys_in(&guard, cutoff, limit))
    }

    async fn recover_misfires(
        &self,
        threshold: Duration,
        max_count: usize,
    ) -> SchedulerResult<MisfireSweepResult> {
        let mut guard = self.inner.lock().await;
        let now = self.clock.now();
        let cutoff = now - threshold;

        let mut keys = misfired_keys_in(&guard, cutoff, max_count + 1);
        let has_more = keys.len() > max_count;
        keys.truncate(max_count);

        let mut result = MisfireSweepResult {
            has_more,
            ..Default::default()
        };
        for key in keys {
            let next = apply_misfire_in(&mut guard, &key, now)?;
            result.processed += 1;
            match next {
                None => result.completed.push(key),
                Some(t) => {
                    result.misfired.push(key);
                    result.earliest_new_fire_time = Some(
                        result
                            .earliest_new_fire_time
                            .map_or(t, |earliest| earliest.min(t)),
                    );
                }
            }
        }
        Ok(result)
    }

    async fn check_in(&self) -> SchedulerResult<SchedulerStateRecord> {
        let mut guard = self.inner.lock().await;
        let record = SchedulerStateRecord {
            instance_id: self.instance_id.clone(),
            last_check_in: self.clock.now(),
            check_in_interval_ms: self.check_in_interval.num_milliseconds(),
        };
        guard
            .scheduler_states
            .insert(record.instance_id.clone(), record.clone());
        Ok(record)
    }

    async fn find_failed_instances(&self) -> SchedulerResult<Vec<SchedulerStateRecord>> {
        let guard = self.inner.lock().await;
        let now = self.clock.now();
        let tolerance = self.check_in_interval.num_milliseconds();
        Ok(guard
            .scheduler_states
            .values()
            .filter(|rec| rec.instance_id != self.instance_id && rec.is_failed(now, tolerance))
            .cloned()
            .collect())
    }

    async fn recover_jobs(&self, instance_id: &str) -> SchedulerResult<InstanceRecoveryReport> {
        let mut guard = self.inner.lock().await;
        let rows: Vec<FiredTrigger> = guard
            .fired
            .values()
            .filter(|f| f.instance_id == instance_id)
            .cloned()
            .collect();

        let mut report = InstanceRecoveryReport {
            instance_id: instance_id.to_string(),
            fired_rows_deleted: 0,
            recovery_triggers: Vec::new(),
            restored_triggers: Vec::new(),
        };
        let mut jobs_to_unblock: Vec<JobKey> = Vec::new();

        for row in &rows {
            // 为要求恢复的作业合成一次性恢复触发器
            if row.requests_recovery {
                if let Some(job) = guard.jobs.get(&row.job_key).cloned() {
                    guard.recovery_seq += 1;
                    let seq = guard.recovery_seq;
                    let key = TriggerKey::new(
                        format!("recover_{instance_id}_{seq}"),
                        RECOVERING_JOBS_GROUP,
                    );
                    let mut data = job.data_map.clone();
                    data.insert(KEY_RECOVERING_TRIGGER_NAME, row.trigger_key.name.clone());
                    data.insert(KEY_RECOVERING_TRIGGER_GROUP, row.trigger_key.group.clone());
                    data.insert(
                        KEY_RECOVERING_ORIG_FIRE_TIME,
                        row.fired_at.timestamp_millis().to_string(),
                    );
                    data.insert(
                        KEY_RECOVERING_ORIG_SCHEDULED_FIRE_TIME,
                        row.scheduled_at.timestamp_millis().to_string(),
                    );
                    let mut recovery = Trigger::new(
                        key.clone(),
                        job.key.clone(),
                        row.scheduled_at,
                        ScheduleSpec::Simple(SimpleSchedule::one_shot()),
                    )
                    .with_priority(row.priority)
                    .with_misfire_instruction(MisfireInstruction::Ignore)
                    .with_data_map(data);
                    recovery.compute_first_fire_time(None)?;
                    store_trigger_in(&mut guard, &recovery, false)?;
                    report.recovery_triggers.push(key);
                } else {
                    warn!(
                        "实例 {} 的在途触发 {} 引用的作业 {} 已不存在，无法恢复",
                        instance_id, row.entry_id, row.job_key
                    );
                }
            }

            // 把原触发器还原到合理状态
            if let Some(rec) = guard.triggers.get_mut(&row.trigger_key) {
                match row.state {
                    FiredTriggerState::Acquired => {
                        if rec.state == TriggerState::Acquired {
                            set_state(rec, TriggerState::Waiting);
                        }
                    }
                    FiredTriggerState::Executing => {
                        if row.non_concurrent {
                            jobs_to_unblock.push(row.job_key.clone());
                        }
                        if rec.state == TriggerState::Blocked {
                            let to = if rec.trigger.next_fire_time.is_some() {
                                TriggerState::Waiting
                            } else {
                                TriggerState::Complete
                            };
                            set_state(rec, to);
                        }
                    }
                }
                rec.trigger.fire_instance_id = None;
                report.restored_triggers.push(row.trigger_key.clone());
            }

            guard.fired.remove(&row.entry_id);
            report.fired_rows_deleted += 1;
        }

        for job_key in jobs_to_unblock {
            if !job_has_running_fires(&guard, &job_key) {
                unblock_job_triggers(&mut guard, &job_key);
            }
        }

        guard.scheduler_states.remove(instance_id);
        Ok(report)
    }

    async fn pause_trigger(&self, key: &TriggerKey) -> SchedulerResult<()> {
        let mut guard = self.inner.lock().await;
        pause_trigger_in(&mut guard, key);
        Ok(())
    }

    async fn resume_trigger(&self, key: &TriggerKey) -> SchedulerResult<()> {
        let mut guard = self.inner.lock().await;
        resume_trigger_in(&mut guard, key, self.clock.now(), self.misfire_threshold)
    }

    async fn pause_triggers(&self, matcher: &GroupMatcher) -> SchedulerResult<Vec<String>> {
        let mut guard = self.inner.lock().await;
        if !guard.paused_trigger_matchers.contains(matcher) {
            guard.paused_trigger_matchers.push(matcher.clone());
        }
        let keys: Vec<TriggerKey> = guard
            .triggers
            .values()
            .filter(|rec| matcher.matches(&rec.trigger.key.group))
            .map(|rec| rec.trigger.key.clone())
            .collect();
        let mut groups: HashSet<String> = keys.iter().map(|k| k.group.clone()).collect();
        if let GroupMatcher::Equals(g) = matcher {
            groups.insert(g.clone());
        }
        for key in keys {
            pause_trigger_in(&mut guard, &key);
        }
        Ok(groups.into_iter().collect())
    }

    async fn resume_triggers(&self, matcher: &GroupMatcher) -> SchedulerResult<Vec<String>> {
        let mut guard = self.inner.lock().await;
        guard.paused_trigger_matchers.retain(|m| {
            let covered = m == matcher
                || matches!(m, GroupMatcher::Equals(g) if matcher.matches(g));
            !covered
        });
        let keys: Vec<TriggerKey> = guard
            .triggers
            .values()
            .filter(|rec| {
                matcher.matches(&rec.trigger.key.group) && rec.state.is_paused_variant()
            })
            .map(|rec| rec.trigger.key.clone())
            .collect();
        let groups: HashSet<String> = keys.iter().map(|k| k.group.clone()).collect();
        let now = self.clock.now();
        for key in keys {
            resume_trigger_in(&mut guard, &key, now, self.misfire_threshold)?;
        }
        Ok(groups.into_iter().collect())
    }

    async fn pause_job(&self, key: &JobKey) -> SchedulerResult<()> {
        let mut guard = self.inner.lock().await;
        let keys: Vec<TriggerKey> = guard
            .triggers
            .values()
            .filter(|rec| &rec.trigger.job_key == key)
            .map(|rec| rec.trigger.key.clone())
            .collect();
        for tk in keys {
            pause_trigger_in(&mut guard, &tk);
        }
        Ok(())
    }

    async fn resume_job(&self, key: &JobKey) -> SchedulerResult<()> {
        let mut guard = self.inner.lock().await;
        let keys: Vec<TriggerKey> = guard
            .triggers
            .values()
            .filter(|rec| &rec.trigger.job_key == key)
            .map(|rec| rec.trigger.key.clone())
            .collect();
        let now = self.clock.now();
        for tk in keys {
            resume_trigger_in(&mut guard, &tk, now, self.misfire_threshold)?;
        }
        Ok(())
    }

    async fn pause_jobs(&self, matcher: &GroupMatcher) -> SchedulerResult<Vec<String>> {
        let mut guard = self.inner.lock().await;
        if !guard.paused_job_matchers.contains(matcher) {
            guard.paused_job_matchers.push(matcher.clone());
        }
        let keys: Vec<(TriggerKey, String)> = guard
            .triggers
            .values()
            .filter(|rec| matcher.matches(&rec.trigger.job_key.group))
            .map(|rec| (rec.trigger.key.clone(), rec.trigger.job_key.group.clone()))
            .collect();
        let mut groups: HashSet<String> = keys.iter().map(|(_, g)| g.clone()).collect();
        if let GroupMatcher::Equals(g) = matcher {
            groups.insert(g.clone());
        }
        for (key, _) in keys {
            pause_trigger_in(&mut guard, &key);
        }
        Ok(groups.into_iter().collect())
    }

    async fn resume_jobs(&self, matcher: &GroupMatcher) -> SchedulerResult<Vec<String>> {
        let mut guard = self.inner.lock().await;
        guard.paused_job_matchers.retain(|m| {
            let covered = m == matcher
                || matches!(m, GroupMatcher::Equals(g) if matcher.matches(g));
            !covered
        });
        let keys: Vec<(TriggerKey, String)> = guard
            .triggers
            .values()
            .filter(|rec| {
                matcher.matches(&rec.trigger.job_key.group) && rec.state.is_paused_variant()
            })
            .map(|rec| (rec.trigger.key.clone(), rec.trigger.job_key.group.clone()))
            .collect();
        let groups: HashSet<String> = keys.iter().map(|(_, g)| g.clone()).collect();
        let now = self.clock.now();
        for (key, _) in keys {
            resume_trigger_in(&mut guard, &key, now, self.misfire_threshold)?;
        }
        Ok(groups.into_iter().collect())
    }

    async fn pause_all(&self) -> SchedulerResult<()> {
        self.pause_triggers(&GroupMatcher::Any).await?;
        Ok(())
    }

    async fn resume_all(&self) -> SchedulerResult<()> {
        let mut guard = self.inner.lock().await;
        guard.paused_trigger_matchers.clear();
        guard.paused_job_matchers.clear();
        let keys: Vec<TriggerKey> = guard
            .triggers
            .values()
            .filter(|rec| rec.state.is_paused_variant())
            .map(|rec| rec.trigger.key.clone())
            .collect();
        let now = self.clock.now();
        for key in keys {
            resume_trigger_in(&mut guard, &key, now, self.misfire_threshold)?;
        }
        Ok(())
    }

    async fn get_paused_trigger_groups(&self) -> SchedulerResult<Vec<String>> {
        Ok(self
            .inner
            .lock()
            .await
            .paused_trigger_matchers
            .iter()
            .map(GroupMatcher::describe)
            .collect())
    }

    async fn clear_all_scheduling_data(&self) -> SchedulerResult<()> {
        let mut guard = self.inner.lock().await;
        guard.jobs.clear();
        guard.triggers.clear();
        guard.fired.clear();
        guard.calendars.clear();
        guard.paused_trigger_matchers.clear();
        guard.paused_job_matchers.clear();
        Ok(())
    }
}
