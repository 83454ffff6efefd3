use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use tempus_core::{SchedulerResult, SchedulerSignaler};
use tempus_domain::{Trigger, TriggerFiredResult};

use crate::context::EngineContext;
use crate::runner::JobRunnerPool;
use crate::scheduler::SchedulerLifecycle;

/// 获取失败时的最大即时重试次数
const ACQUIRE_RETRY_MAX: u32 = 3;
/// 候选触发时间至少比当前批次早这么多才值得放弃重来
const RELEASE_THRESHOLD_MS: i64 = 50;

/// 调度循环
///
/// 每个调度器实例一个长驻任务：占执行槽、按地平线批量获取到期触发器、
/// 等到触发时刻点火、把数据包交给执行槽池。信号器的唤醒只打断空转
/// 等待与到期等待，从不打断执行中的作业。
pub struct SchedulerLoop {
    pub(crate) ctx: Arc<EngineContext>,
    pub(crate) pool: Arc<JobRunnerPool>,
    pub(crate) lifecycle: watch::Receiver<SchedulerLifecycle>,
}

impl SchedulerLoop {
    pub async fn run(mut self) {
        info!("调度循环启动 (实例 {})", self.ctx.instance_id);
        let idle_wait = Duration::milliseconds(self.ctx.config.engine.idle_wait_time_ms as i64);
        let idle_wait_std = StdDuration::from_millis(self.ctx.config.engine.idle_wait_time_ms);
        let time_window = Duration::milliseconds(self.ctx.config.engine.batch_time_window_ms as i64);

        'main: loop {
            // 等待进入运行状态
            loop {
                match *self.lifecycle.borrow() {
                    SchedulerLifecycle::Running => break,
                    SchedulerLifecycle::Shutdown => break 'main,
                    SchedulerLifecycle::StandBy => {}
                }
                if self.lifecycle.changed().await.is_err() {
                    break 'main;
                }
            }

            // 先占到一个执行槽，再去获取工作
            let permit = tokio::select! {
                permit = self.pool.acquire_slot() => permit,
                _ = self.lifecycle.changed() => continue 'main,
            };
            if *self.lifecycle.borrow() != SchedulerLifecycle::Running {
                continue 'main;
            }

            let now = self.ctx.clock.now();
            let no_later_than = now + idle_wait;
            let batch_limit = self
                .ctx
                .config
                .engine
                .max_batch_size
                .min(1 + self.pool.available_slots())
                .max(1);

            let batch = match self
                .acquire_with_retry(no_later_than, batch_limit, time_window)
                .await
            {
                Ok(batch) => batch,
                Err(e) => {
                    drop(permit);
                    self.handle_store_failure(&e).await;
                    continue 'main;
                }
            };

            if batch.is_empty() {
                drop(permit);
                // 空转等待，直到有新的调度变化或超时
                if self.ctx.signaler.wait_for_signal(idle_wait_std).await {
                    let _ = self.ctx.signaler.take_candidate();
                    debug!("空转等待被调度变化唤醒");
                }
                continue 'main;
            }

            // 等到最早的触发时刻；期间出现更早的候选则放弃本批
            if !self.wait_until_due(&batch).await {
                self.release_batch(&batch).await;
                drop(permit);
                continue 'main;
            }

            let results = match self.ctx.store.triggers_fired(&batch).await {
                Ok(results) => results,
                Err(e) => {
                    self.release_batch(&batch).await;
                    drop(permit);
                    self.handle_store_failure(&e).await;
                    continue 'main;
                }
            };

            let mut permit = Some(permit);
            for result in results {
                match result {
                    TriggerFiredResult::Fired(bundle) => {
                        let slot = match permit.take() {
                            Some(p) => p,
                            None => self.pool.acquire_slot().await,
                        };
                        self.pool.spawn(*bundle, slot);
                    }
                    TriggerFiredResult::Rejected(key) => {
                        debug!("触发器 {} 点火被拒绝（已被删除或状态被抢占）", key);
                    }
                }
            }
        }
        info!("调度循环退出 (实例 {})", self.ctx.instance_id);
    }

    async fn acquire_with_retry(
        &self,
        no_later_than: chrono::DateTime<chrono::Utc>,
        max_count: usize,
        time_window: Duration,
    ) -> SchedulerResult<Vec<Trigger>> {
        let mut attempt: u32 = 0;
        loop {
            match self
                .ctx
                .store
                .acquire_next_triggers(no_later_than, max_count, time_window)
                .await
            {
                Ok(batch) => return Ok(batch),
                Err(e) if e.is_retryable() && attempt < ACQUIRE_RETRY_MAX => {
                    attempt += 1;
                    warn!("获取到期触发器失败（第 {attempt} 次重试）: {e}");
                    tokio::time::sleep(StdDuration::from_millis(100 * attempt as u64)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// 等到批次中最早的触发时刻
    ///
    /// 返回 false 表示本批应当放回（出现更早的候选或离开运行状态）。
    async fn wait_until_due(&mut self, batch: &[Trigger]) -> bool {
        let Some(earliest) = batch.iter().filter_map(|t| t.next_fire_time).min() else {
            return true;
        };
        loop {
            let now = self.ctx.clock.now();
            if earliest <= now {
                return true;
            }
            let remaining = (earliest - now).to_std().unwrap_or(StdDuration::ZERO);
            tokio::select! {
                signaled = self.ctx.signaler.wait_for_signal(remaining) => {
                    if !signaled {
                        return true;
                    }
                    if let Some(candidate) = self.ctx.signaler.take_candidate() {
                        let worth_restart = candidate
                            + Duration::milliseconds(RELEASE_THRESHOLD_MS)
                            < earliest;
                        if worth_restart {
                            debug!(
                                "出现更早的候选触发时间 {}，放弃当前批次",
                                candidate
                            );
                            return false;
                        }
                    }
                }
                _ = self.lifecycle.changed() => {
                    if *self.lifecycle.borrow() != SchedulerLifecycle::Running {
                        return false;
                    }
                }
            }
        }
    }

    async fn release_batch(&self, batch: &[Trigger]) {
        for trigger in batch {
            if let Err(e) = self.ctx.store.release_acquired_trigger(trigger).await {
                warn!("放回触发器 {} 失败: {}", trigger.key, e);
            }
        }
    }

    async fn handle_store_failure(&self, error: &tempus_core::SchedulerError) {
        error!("存储操作失败，调度循环暂停后重试: {}", error);
        self.ctx
            .signaler
            .notify_error(&format!("存储操作失败: {error}"));
        let pause =
            StdDuration::from_millis(self.ctx.config.engine.db_failure_retry_interval_ms);
        tokio::time::sleep(pause).await;
    }
}
