use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use tokio::sync::watch;
use tracing::{error, info};

use tempus_core::SchedulerSignaler;

use crate::context::EngineContext;
use crate::scheduler::SchedulerLifecycle;

/// misfire 清扫器
///
/// 单任务定时清扫：把错过触发超过阈值的 WAITING 触发器交给其类型的
/// misfire 策略重新安排。一轮处理满批量上限说明还有积压，立即再扫；
/// 否则休眠 `min(阈值, 60s)`。待机状态下照常清扫，只有关闭才停止。
pub struct MisfireHandler {
    pub(crate) ctx: Arc<EngineContext>,
    pub(crate) lifecycle: watch::Receiver<SchedulerLifecycle>,
}

impl MisfireHandler {
    pub async fn run(mut self) {
        let threshold =
            Duration::milliseconds(self.ctx.config.misfire.misfire_threshold_ms as i64);
        let max_count = self.ctx.config.misfire.max_misfires_per_sweep;
        let sleep_for = StdDuration::from_millis(
            self.ctx.config.misfire.misfire_threshold_ms.min(60_000),
        );
        info!(
            "misfire 清扫启动，阈值 {}ms，单轮上限 {}",
            self.ctx.config.misfire.misfire_threshold_ms, max_count
        );

        loop {
            if *self.lifecycle.borrow() == SchedulerLifecycle::Shutdown {
                break;
            }

            match self.ctx.store.recover_misfires(threshold, max_count).await {
                Ok(result) => {
                    for key in &result.misfired {
                        self.ctx.signaler.notify_misfired(key);
                    }
                    for key in &result.completed {
                        self.ctx.signaler.notify_finalized(key);
                    }
                    if let Some(earliest) = result.earliest_new_fire_time {
                        self.ctx.signaler.signal_scheduling_change(Some(earliest));
                    }
                    if result.processed > 0 {
                        info!(
                            "本轮处理了 {} 个 misfire 触发器（重排 {}，完成 {}）",
                            result.processed,
                            result.misfired.len(),
                            result.completed.len()
                        );
                    }
                    if result.has_more {
                        // 积压未清完，立即再扫一轮
                        continue;
                    }
                }
                Err(e) => {
                    error!("misfire 清扫失败: {}", e);
                    self.ctx
                        .signaler
                        .notify_error(&format!("misfire 清扫失败: {e}"));
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = self.lifecycle.changed() => {}
            }
        }
        info!("misfire 清扫退出");
    }
}
