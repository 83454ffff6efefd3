use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use tempus_core::{JobExecutionContext, SchedulerEvent, SchedulerSignaler};
use tempus_domain::{CompletedExecutionInstruction, JobKey, TriggerFiredBundle, TriggerKey};
use tempus_errors::JobExecutionError;

use crate::context::EngineContext;

/// 执行完成落库失败时的最大即时重试次数
const COMPLETE_RETRY_MAX: u32 = 3;

struct RunningExecution {
    job_key: JobKey,
    trigger_key: TriggerKey,
    context: JobExecutionContext,
}

/// 作业执行槽池
///
/// 固定数量的执行槽，调度循环先占到槽再去获取触发器。槽在
/// `triggered_job_complete` 落库之前释放，调度循环因此可以与完成
/// 落库并行地获取下一批工作。并发规则由存储通过 BLOCKED 状态执行，
/// 槽池自身不对执行做任何串行化。
pub struct JobRunnerPool {
    ctx: Arc<EngineContext>,
    semaphore: Arc<Semaphore>,
    running: Arc<RwLock<HashMap<String, RunningExecution>>>,
}

impl JobRunnerPool {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        let slots = ctx.config.engine.thread_count;
        Self {
            ctx,
            semaphore: Arc::new(Semaphore::new(slots)),
            running: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// 阻塞等待一个空闲执行槽
    pub async fn acquire_slot(&self) -> OwnedSemaphorePermit {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("执行槽信号量不会被关闭")
    }

    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn running_count(&self) -> usize {
        self.running.read().expect("执行登记锁已中毒").len()
    }

    /// 等待全部执行槽空闲（即所有作业执行完毕）
    pub async fn drain(&self) {
        let slots = self.ctx.config.engine.thread_count as u32;
        let _all = self
            .semaphore
            .clone()
            .acquire_many_owned(slots)
            .await
            .expect("执行槽信号量不会被关闭");
    }

    /// 按作业标识请求取消，命中至少一个执行中实例时返回 true
    pub fn interrupt_job(&self, key: &JobKey) -> bool {
        let running = self.running.read().expect("执行登记锁已中毒");
        let mut matched = false;
        for exec in running.values() {
            if &exec.job_key == key {
                debug!("请求取消作业 {} 的执行 (触发器 {})", key, exec.trigger_key);
                exec.context.request_interrupt();
                matched = true;
            }
        }
        matched
    }

    /// 按触发标识请求取消
    pub fn interrupt_fire(&self, fire_instance_id: &str) -> bool {
        let running = self.running.read().expect("执行登记锁已中毒");
        match running.get(fire_instance_id) {
            Some(exec) => {
                exec.context.request_interrupt();
                true
            }
            None => false,
        }
    }

    /// 请求取消全部执行中的作业
    pub fn interrupt_all(&self) {
        let running = self.running.read().expect("执行登记锁已中毒");
        for exec in running.values() {
            exec.context.request_interrupt();
        }
    }

    /// 把一个点火数据包交给执行槽
    ///
    /// 调用方必须已经持有一个执行槽许可。
    pub fn spawn(&self, bundle: TriggerFiredBundle, permit: OwnedSemaphorePermit) -> JoinHandle<()> {
        let ctx = self.ctx.clone();
        let running = self.running.clone();
        tokio::spawn(async move {
            run_job(ctx, running, bundle, permit).await;
        })
    }
}

/// 由作业执行结果推导完成指令
fn instruction_for(outcome: &Result<(), JobExecutionError>) -> CompletedExecutionInstruction {
    match outcome {
        Ok(()) => CompletedExecutionInstruction::NoInstruction,
        Err(e) if e.refire_immediately => CompletedExecutionInstruction::ReExecuteJob,
        Err(e) if e.unschedule_firing_trigger => CompletedExecutionInstruction::SetTriggerComplete,
        Err(e) if e.unschedule_all_triggers => {
            CompletedExecutionInstruction::SetAllJobTriggersComplete
        }
        Err(_) => CompletedExecutionInstruction::NoInstruction,
    }
}

async fn run_job(
    ctx: Arc<EngineContext>,
    running: Arc<RwLock<HashMap<String, RunningExecution>>>,
    bundle: TriggerFiredBundle,
    permit: OwnedSemaphorePermit,
) {
    let exec_ctx = JobExecutionContext::new(&ctx.scheduler_name, &ctx.instance_id, &bundle);
    running.write().expect("执行登记锁已中毒").insert(
        bundle.fire_instance_id.clone(),
        RunningExecution {
            job_key: bundle.job.key.clone(),
            trigger_key: bundle.trigger.key.clone(),
            context: exec_ctx.clone(),
        },
    );
    debug!(
        "开始执行作业 {} (触发器 {}, 触发标识 {})",
        bundle.job.key, bundle.trigger.key, bundle.fire_instance_id
    );

    let mut success = false;
    let mut instruction;
    loop {
        let job = match ctx.job_factory.create(&bundle.job.job_type) {
            Ok(job) => job,
            Err(e) => {
                error!("无法实例化作业 {} ({}): {}", bundle.job.key, bundle.job.job_type, e);
                ctx.signaler
                    .notify_error(&format!("无法实例化作业 {}: {e}", bundle.job.key));
                instruction = CompletedExecutionInstruction::SetAllJobTriggersError;
                break;
            }
        };

        // 独立任务里执行，panic 不会波及执行槽
        let job_ctx = exec_ctx.clone();
        let joined = tokio::spawn(async move { job.execute(job_ctx).await }).await;
        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(join_err) => {
                error!("作业 {} 执行 panic: {}", bundle.job.key, join_err);
                Err(JobExecutionError::new(format!("作业执行 panic: {join_err}")))
            }
        };

        if let Err(e) = &outcome {
            warn!("作业 {} 执行失败: {}", bundle.job.key, e);
        }
        instruction = instruction_for(&outcome);
        if instruction == CompletedExecutionInstruction::ReExecuteJob {
            exec_ctx.increment_refire_count();
            info!(
                "作业 {} 请求立即重新执行（第 {} 次重触发）",
                bundle.job.key,
                exec_ctx.refire_count()
            );
            continue;
        }
        success = outcome.is_ok();
        break;
    }

    running
        .write()
        .expect("执行登记锁已中毒")
        .remove(&bundle.fire_instance_id);

    // 完成落库之前先归还执行槽，调度循环可以并行获取新工作
    drop(permit);

    let mut job_detail = bundle.job.clone();
    if job_detail.persist_data_after_execution {
        job_detail.data_map = exec_ctx.merged_data();
    }

    let mut attempt: u32 = 0;
    loop {
        match ctx
            .store
            .triggered_job_complete(&bundle.trigger, &job_detail, instruction)
            .await
        {
            Ok(()) => break,
            Err(e) if e.is_retryable() && attempt < COMPLETE_RETRY_MAX => {
                attempt += 1;
                warn!(
                    "作业 {} 完成落库失败（第 {attempt} 次重试）: {e}",
                    bundle.job.key
                );
                tokio::time::sleep(Duration::from_millis(100 * attempt as u64)).await;
            }
            Err(e) => {
                error!("作业 {} 完成落库失败: {}", bundle.job.key, e);
                ctx.signaler
                    .notify_error(&format!("作业 {} 完成落库失败: {e}", bundle.job.key));
                break;
            }
        }
    }

    ctx.signaler.post(SchedulerEvent::JobExecuted {
        job_key: bundle.job.key.clone(),
        trigger_key: bundle.trigger.key.clone(),
        fire_instance_id: bundle.fire_instance_id.clone(),
        fired_at: bundle.fired_at,
        success,
    });
    if bundle.next_fire_time.is_none() {
        ctx.signaler.notify_finalized(&bundle.trigger.key);
    }
    // 非并发作业完成可能释放被阻塞的触发器
    if bundle.job.concurrent_execution_disallowed {
        ctx.signaler.signal_scheduling_change(bundle.next_fire_time);
    }
}
