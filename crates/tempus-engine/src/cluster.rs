use std::sync::Arc;
use std::time::Duration as StdDuration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use tempus_core::{SchedulerEvent, SchedulerSignaler};

use crate::context::EngineContext;
use crate::scheduler::SchedulerLifecycle;

/// 集群管理器
///
/// 每个节点一个定时任务：按签到间隔更新自身存活记录（STATE_ACCESS
/// 锁内），检出超时未签到的故障节点，并逐个回收其在途触发
/// （TRIGGER_ACCESS 锁内）。待机状态不影响签到，只有关闭才停止。
pub struct ClusterManager {
    pub(crate) ctx: Arc<EngineContext>,
    pub(crate) lifecycle: watch::Receiver<SchedulerLifecycle>,
}

impl ClusterManager {
    pub async fn run(mut self) {
        let interval =
            StdDuration::from_millis(self.ctx.config.cluster.check_in_interval_ms);
        info!(
            "集群管理启动 (实例 {}，签到间隔 {}ms)",
            self.ctx.instance_id, self.ctx.config.cluster.check_in_interval_ms
        );

        loop {
            if *self.lifecycle.borrow() == SchedulerLifecycle::Shutdown {
                break;
            }

            self.check_in_cycle().await;

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = self.lifecycle.changed() => {}
            }
        }
        info!("集群管理退出 (实例 {})", self.ctx.instance_id);
    }

    async fn check_in_cycle(&self) {
        if let Err(e) = self.ctx.store.check_in().await {
            error!("集群签到失败: {}", e);
            self.ctx.signaler.notify_error(&format!("集群签到失败: {e}"));
            return;
        }

        let failed = match self.ctx.store.find_failed_instances().await {
            Ok(failed) => failed,
            Err(e) => {
                error!("检测故障节点失败: {}", e);
                self.ctx
                    .signaler
                    .notify_error(&format!("检测故障节点失败: {e}"));
                return;
            }
        };

        for record in failed {
            warn!(
                "检测到故障节点 {} (上次签到 {})，开始回收其在途触发",
                record.instance_id, record.last_check_in
            );
            match self.ctx.store.recover_jobs(&record.instance_id).await {
                Ok(report) => {
                    info!(
                        "故障节点 {} 回收完成：删除在途记录 {} 条，合成恢复触发器 {} 个",
                        report.instance_id,
                        report.fired_rows_deleted,
                        report.recovery_triggers.len()
                    );
                    self.ctx.signaler.post(SchedulerEvent::InstanceRecovered {
                        instance_id: report.instance_id.clone(),
                        recovery_triggers: report.recovery_triggers.len(),
                    });
                    if !report.recovery_triggers.is_empty()
                        || !report.restored_triggers.is_empty()
                    {
                        self.ctx.signaler.signal_scheduling_change(None);
                    }
                }
                Err(e) => {
                    error!("回收故障节点 {} 失败: {}", record.instance_id, e);
                    self.ctx
                        .signaler
                        .notify_error(&format!("回收故障节点 {} 失败: {e}", record.instance_id));
                }
            }
        }
    }
}
