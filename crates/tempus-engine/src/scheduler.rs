use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use tempus_config::SchedulerConfig;
use tempus_core::{
    Clock, JobFactory, JobStore, SchedulerError, SchedulerEvent, SchedulerResult, SchedulerSignaler,
};
use tempus_domain::{
    CalendarSpec, GroupMatcher, JobDataMap, JobDetail, JobKey, MisfireInstruction, ScheduleSpec,
    SimpleSchedule, Trigger, TriggerKey, TriggerState, MANUAL_TRIGGERS_GROUP,
};

use crate::cluster::ClusterManager;
use crate::context::EngineContext;
use crate::misfire::MisfireHandler;
use crate::runner::JobRunnerPool;
use crate::scheduler_loop::SchedulerLoop;
use crate::signaler::SchedulingSignaler;

/// 调度器生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerLifecycle {
    /// 待机：不获取新工作，执行中的作业继续
    StandBy,
    /// 运行：正常获取并触发
    Running,
    /// 已关闭：终态
    Shutdown,
}

/// 调度器门面
///
/// 持有引擎全部组件并暴露管理操作。构造后处于待机状态，`start`
/// 之后调度循环才开始获取工作；`shutdown` 是终态，之后任何调度
/// 操作都返回生命周期错误。
pub struct Scheduler {
    ctx: Arc<EngineContext>,
    pool: Arc<JobRunnerPool>,
    lifecycle_tx: watch::Sender<SchedulerLifecycle>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    events: Mutex<Option<mpsc::UnboundedReceiver<SchedulerEvent>>>,
}

impl Scheduler {
    /// 构造调度器并启动后台任务（此时处于待机状态）
    ///
    /// `config.instance_id` 必须已解析为与 `store` 配置一致的实际标识。
    pub async fn new(
        config: SchedulerConfig,
        store: Arc<dyn JobStore>,
        job_factory: Arc<dyn JobFactory>,
        clock: Arc<dyn Clock>,
    ) -> SchedulerResult<Self> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let signaler = Arc::new(SchedulingSignaler::new(event_tx));
        let ctx = Arc::new(EngineContext {
            scheduler_name: config.scheduler_name.clone(),
            instance_id: config.instance_id.clone(),
            store: store.clone(),
            job_factory,
            clock,
            signaler,
            config,
        });

        store.initialize().await?;

        // 回收本实例上次崩溃遗留的在途触发
        let report = store.recover_jobs(&ctx.instance_id).await?;
        if report.fired_rows_deleted > 0 {
            info!(
                "启动恢复：清理上次运行遗留的在途触发 {} 条，合成恢复触发器 {} 个",
                report.fired_rows_deleted,
                report.recovery_triggers.len()
            );
        }

        let (lifecycle_tx, lifecycle_rx) = watch::channel(SchedulerLifecycle::StandBy);
        let pool = Arc::new(JobRunnerPool::new(ctx.clone()));

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(
            SchedulerLoop {
                ctx: ctx.clone(),
                pool: pool.clone(),
                lifecycle: lifecycle_rx.clone(),
            }
            .run(),
        ));
        tasks.push(tokio::spawn(
            MisfireHandler {
                ctx: ctx.clone(),
                lifecycle: lifecycle_rx.clone(),
            }
            .run(),
        ));
        if ctx.config.cluster.clustered {
            tasks.push(tokio::spawn(
                ClusterManager {
                    ctx: ctx.clone(),
                    lifecycle: lifecycle_rx,
                }
                .run(),
            ));
        }

        info!(
            "调度器 {} 已构建 (实例 {}，执行槽 {})",
            ctx.scheduler_name, ctx.instance_id, ctx.config.engine.thread_count
        );
        Ok(Self {
            ctx,
            pool,
            lifecycle_tx,
            tasks: Mutex::new(tasks),
            events: Mutex::new(Some(event_rx)),
        })
    }

    pub fn scheduler_name(&self) -> &str {
        &self.ctx.scheduler_name
    }

    pub fn instance_id(&self) -> &str {
        &self.ctx.instance_id
    }

    /// 取走事件接收端（只能取一次）
    pub fn take_event_receiver(&self) -> Option<mpsc::UnboundedReceiver<SchedulerEvent>> {
        self.events.lock().expect("事件接收端锁已中毒").take()
    }

    pub fn lifecycle(&self) -> SchedulerLifecycle {
        *self.lifecycle_tx.borrow()
    }

    fn ensure_not_shutdown(&self) -> SchedulerResult<()> {
        if self.lifecycle() == SchedulerLifecycle::Shutdown {
            return Err(SchedulerError::Lifecycle(
                "调度器已关闭，不再接受操作".to_string(),
            ));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // 生命周期
    // ------------------------------------------------------------------

    /// 待机 → 运行，开启触发器获取
    pub fn start(&self) -> SchedulerResult<()> {
        self.ensure_not_shutdown()?;
        let _ = self.lifecycle_tx.send(SchedulerLifecycle::Running);
        self.ctx.signaler.signal_scheduling_change(None);
        self.ctx.signaler.post(SchedulerEvent::SchedulerStarted);
        info!("调度器 {} 开始运行", self.ctx.scheduler_name);
        Ok(())
    }

    /// 暂停获取新工作，执行中的作业继续
    pub fn standby(&self) -> SchedulerResult<()> {
        self.ensure_not_shutdown()?;
        let _ = self.lifecycle_tx.send(SchedulerLifecycle::StandBy);
        self.ctx.signaler.post(SchedulerEvent::SchedulerInStandby);
        info!("调度器 {} 进入待机", self.ctx.scheduler_name);
        Ok(())
    }

    /// 终态关闭
    ///
    /// `wait_for_jobs_to_complete = true` 时等全部执行槽排空；否则向
    /// 执行中的作业传播取消请求后立即返回，作业是否配合由其自行决定。
    pub async fn shutdown(&self, wait_for_jobs_to_complete: bool) -> SchedulerResult<()> {
        if self.lifecycle() == SchedulerLifecycle::Shutdown {
            return Ok(());
        }
        info!(
            "调度器 {} 关闭中 (等待作业完成: {})",
            self.ctx.scheduler_name, wait_for_jobs_to_complete
        );
        let _ = self.lifecycle_tx.send(SchedulerLifecycle::Shutdown);
        // 唤醒可能在空转等待中的调度循环
        self.ctx.signaler.signal_scheduling_change(None);

        if !wait_for_jobs_to_complete {
            self.pool.interrupt_all();
        }

        // 先等后台循环退出，调度循环不再与排空竞争执行槽
        let tasks = std::mem::take(&mut *self.tasks.lock().expect("任务句柄锁已中毒"));
        for task in tasks {
            if let Err(e) = task.await {
                warn!("后台任务退出异常: {}", e);
            }
        }

        if wait_for_jobs_to_complete {
            self.pool.drain().await;
        }

        self.ctx.store.shutdown().await?;
        self.ctx.signaler.post(SchedulerEvent::SchedulerShutdown);
        info!("调度器 {} 已关闭", self.ctx.scheduler_name);
        Ok(())
    }

    // ------------------------------------------------------------------
    // 调度编辑
    // ------------------------------------------------------------------

    async fn resolve_calendar(&self, trigger: &Trigger) -> SchedulerResult<Option<CalendarSpec>> {
        match &trigger.calendar_name {
            None => Ok(None),
            Some(name) => match self.ctx.store.retrieve_calendar(name).await? {
                Some(cal) => Ok(Some(cal)),
                None => Err(SchedulerError::calendar_not_found(name)),
            },
        }
    }

    /// 注册作业与触发器，返回首次触发时间
    pub async fn schedule_job(
        &self,
        job: JobDetail,
        mut trigger: Trigger,
    ) -> SchedulerResult<DateTime<Utc>> {
        self.ensure_not_shutdown()?;
        if trigger.job_key != job.key {
            return Err(SchedulerError::InvalidTrigger(format!(
                "触发器 {} 引用的作业 {} 与给定作业 {} 不一致",
                trigger.key, trigger.job_key, job.key
            )));
        }
        trigger.validate()?;
        let calendar = self.resolve_calendar(&trigger).await?;
        let first = trigger
            .compute_first_fire_time(calendar.as_ref())?
            .ok_or_else(|| {
                SchedulerError::InvalidTrigger(format!("触发器 {} 永远不会触发", trigger.key))
            })?;
        self.ctx
            .store
            .store_job_and_trigger(&job, &trigger, false)
            .await?;
        self.ctx.signaler.signal_scheduling_change(Some(first));
        info!("已注册作业 {}，首次触发 {}", job.key, first);
        Ok(first)
    }

    /// 为已存在的作业追加触发器
    pub async fn schedule_trigger(&self, mut trigger: Trigger) -> SchedulerResult<DateTime<Utc>> {
        self.ensure_not_shutdown()?;
        trigger.validate()?;
        let calendar = self.resolve_calendar(&trigger).await?;
        let first = trigger
            .compute_first_fire_time(calendar.as_ref())?
            .ok_or_else(|| {
                SchedulerError::InvalidTrigger(format!("触发器 {} 永远不会触发", trigger.key))
            })?;
        self.ctx.store.store_trigger(&trigger, false).await?;
        self.ctx.signaler.signal_scheduling_change(Some(first));
        Ok(first)
    }

    /// 注册无触发器的持久作业
    pub async fn add_job(&self, job: JobDetail, replace: bool) -> SchedulerResult<()> {
        self.ensure_not_shutdown()?;
        if !job.durable {
            return Err(SchedulerError::Configuration(format!(
                "没有触发器的作业 {} 必须声明为持久作业",
                job.key
            )));
        }
        self.ctx.store.store_job(&job, replace).await
    }

    /// 删除触发器；非持久作业失去最后一个触发器时一并删除
    pub async fn unschedule_job(&self, trigger_key: &TriggerKey) -> SchedulerResult<bool> {
        self.ensure_not_shutdown()?;
        let trigger = self.ctx.store.retrieve_trigger(trigger_key).await?;
        let existed = self.ctx.store.remove_trigger(trigger_key).await?;
        if existed {
            if let Some(trigger) = trigger {
                if self
                    .ctx
                    .store
                    .retrieve_job(&trigger.job_key)
                    .await?
                    .is_none()
                {
                    self.ctx.signaler.notify_job_deleted(&trigger.job_key);
                }
            }
            self.ctx.signaler.signal_scheduling_change(None);
        }
        Ok(existed)
    }

    /// 以新触发器替换旧触发器；旧触发器不存在时返回 None
    pub async fn reschedule_job(
        &self,
        trigger_key: &TriggerKey,
        mut new_trigger: Trigger,
    ) -> SchedulerResult<Option<DateTime<Utc>>> {
        self.ensure_not_shutdown()?;
        new_trigger.validate()?;
        let calendar = self.resolve_calendar(&new_trigger).await?;
        let first = new_trigger
            .compute_first_fire_time(calendar.as_ref())?
            .ok_or_else(|| {
                SchedulerError::InvalidTrigger(format!(
                    "触发器 {} 永远不会触发",
                    new_trigger.key
                ))
            })?;
        if !self
            .ctx
            .store
            .replace_trigger(trigger_key, &new_trigger)
            .await?
        {
            return Ok(None);
        }
        self.ctx.signaler.signal_scheduling_change(Some(first));
        Ok(Some(first))
    }

    /// 删除作业及其全部触发器
    pub async fn delete_job(&self, job_key: &JobKey) -> SchedulerResult<bool> {
        self.ensure_not_shutdown()?;
        let existed = self.ctx.store.remove_job(job_key).await?;
        if existed {
            self.ctx.signaler.notify_job_deleted(job_key);
            self.ctx.signaler.signal_scheduling_change(None);
        }
        Ok(existed)
    }

    /// 立刻手工触发一次作业
    pub async fn trigger_job(
        &self,
        job_key: &JobKey,
        data: Option<JobDataMap>,
    ) -> SchedulerResult<()> {
        self.ensure_not_shutdown()?;
        if self.ctx.store.retrieve_job(job_key).await?.is_none() {
            return Err(SchedulerError::job_not_found(job_key.to_string()));
        }
        let now = self.ctx.clock.now();
        let key = TriggerKey::new(
            format!("MT_{}", Uuid::new_v4().simple()),
            MANUAL_TRIGGERS_GROUP,
        );
        let mut trigger = Trigger::new(
            key,
            job_key.clone(),
            now,
            ScheduleSpec::Simple(SimpleSchedule::one_shot()),
        )
        .with_misfire_instruction(MisfireInstruction::Ignore);
        if let Some(data) = data {
            trigger.data_map = data;
        }
        trigger.compute_first_fire_time(None)?;
        self.ctx.store.store_trigger(&trigger, false).await?;
        self.ctx.signaler.signal_scheduling_change(Some(now));
        Ok(())
    }

    /// 注册日历
    pub async fn add_calendar(
        &self,
        name: &str,
        calendar: CalendarSpec,
        replace: bool,
        update_triggers: bool,
    ) -> SchedulerResult<()> {
        self.ensure_not_shutdown()?;
        self.ctx
            .store
            .store_calendar(name, &calendar, replace, update_triggers)
            .await?;
        if update_triggers {
            self.ctx.signaler.signal_scheduling_change(None);
        }
        Ok(())
    }

    /// 清空全部调度数据（保留节点存活记录）
    pub async fn clear(&self) -> SchedulerResult<()> {
        self.ensure_not_shutdown()?;
        self.ctx.store.clear_all_scheduling_data().await?;
        self.ctx.signaler.post(SchedulerEvent::SchedulingDataCleared);
        Ok(())
    }

    // ------------------------------------------------------------------
    // 暂停 / 恢复
    // ------------------------------------------------------------------

    pub async fn pause_trigger(&self, key: &TriggerKey) -> SchedulerResult<()> {
        self.ensure_not_shutdown()?;
        self.ctx.store.pause_trigger(key).await
    }

    pub async fn resume_trigger(&self, key: &TriggerKey) -> SchedulerResult<()> {
        self.ensure_not_shutdown()?;
        self.ctx.store.resume_trigger(key).await?;
        self.ctx.signaler.signal_scheduling_change(None);
        Ok(())
    }

    pub async fn pause_triggers(&self, matcher: &GroupMatcher) -> SchedulerResult<Vec<String>> {
        self.ensure_not_shutdown()?;
        self.ctx.store.pause_triggers(matcher).await
    }

    pub async fn resume_triggers(&self, matcher: &GroupMatcher) -> SchedulerResult<Vec<String>> {
        self.ensure_not_shutdown()?;
        let groups = self.ctx.store.resume_triggers(matcher).await?;
        self.ctx.signaler.signal_scheduling_change(None);
        Ok(groups)
    }

    pub async fn pause_job(&self, key: &JobKey) -> SchedulerResult<()> {
        self.ensure_not_shutdown()?;
        self.ctx.store.pause_job(key).await
    }

    pub async fn resume_job(&self, key: &JobKey) -> SchedulerResult<()> {
        self.ensure_not_shutdown()?;
        self.ctx.store.resume_job(key).await?;
        self.ctx.signaler.signal_scheduling_change(None);
        Ok(())
    }

    pub async fn pause_jobs(&self, matcher: &GroupMatcher) -> SchedulerResult<Vec<String>> {
        self.ensure_not_shutdown()?;
        self.ctx.store.pause_jobs(matcher).await
    }

    pub async fn resume_jobs(&self, matcher: &GroupMatcher) -> SchedulerResult<Vec<String>> {
        self.ensure_not_shutdown()?;
        let groups = self.ctx.store.resume_jobs(matcher).await?;
        self.ctx.signaler.signal_scheduling_change(None);
        Ok(groups)
    }

    pub async fn pause_all(&self) -> SchedulerResult<()> {
        self.ensure_not_shutdown()?;
        self.ctx.store.pause_all().await
    }

    pub async fn resume_all(&self) -> SchedulerResult<()> {
        self.ensure_not_shutdown()?;
        self.ctx.store.resume_all().await?;
        self.ctx.signaler.signal_scheduling_change(None);
        Ok(())
    }

    // ------------------------------------------------------------------
    // 查询与取消
    // ------------------------------------------------------------------

    pub async fn get_job(&self, key: &JobKey) -> SchedulerResult<Option<JobDetail>> {
        self.ctx.store.retrieve_job(key).await
    }

    pub async fn get_trigger(&self, key: &TriggerKey) -> SchedulerResult<Option<Trigger>> {
        self.ctx.store.retrieve_trigger(key).await
    }

    pub async fn get_trigger_state(&self, key: &TriggerKey) -> SchedulerResult<TriggerState> {
        self.ctx.store.get_trigger_state(key).await
    }

    pub async fn get_triggers_of_job(&self, key: &JobKey) -> SchedulerResult<Vec<Trigger>> {
        self.ctx.store.get_triggers_for_job(key).await
    }

    pub async fn get_paused_trigger_groups(&self) -> SchedulerResult<Vec<String>> {
        self.ctx.store.get_paused_trigger_groups().await
    }

    /// 请求取消某作业的全部执行中实例，命中时返回 true
    pub fn interrupt_job(&self, key: &JobKey) -> bool {
        self.pool.interrupt_job(key)
    }

    /// 按触发标识请求取消单次执行
    pub fn interrupt_fire(&self, fire_instance_id: &str) -> bool {
        self.pool.interrupt_fire(fire_instance_id)
    }

    /// 当前执行中的作业数量
    pub fn currently_executing_count(&self) -> usize {
        self.pool.running_count()
    }
}
