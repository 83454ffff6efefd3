use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use tempus_core::{Job, JobExecutionContext};
use tempus_errors::JobExecutionError;

/// 一次执行的记录
#[derive(Debug, Clone)]
pub struct FireRecord {
    pub fire_instance_id: String,
    pub scheduled_fire_time: DateTime<Utc>,
    pub actual_fire_time: DateTime<Utc>,
    pub recovering: bool,
}

/// 记录每次触发的探针作业
#[derive(Default)]
pub struct CountingJob {
    fires: Mutex<Vec<FireRecord>>,
}

impl CountingJob {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fire_count(&self) -> usize {
        self.fires.lock().expect("记录锁已中毒").len()
    }

    pub fn fires(&self) -> Vec<FireRecord> {
        self.fires.lock().expect("记录锁已中毒").clone()
    }
}

#[async_trait]
impl Job for CountingJob {
    async fn execute(&self, context: JobExecutionContext) -> Result<(), JobExecutionError> {
        self.fires.lock().expect("记录锁已中毒").push(FireRecord {
            fire_instance_id: context.fire_instance_id().to_string(),
            scheduled_fire_time: context.scheduled_fire_time(),
            actual_fire_time: Utc::now(),
            recovering: context.recovering(),
        });
        Ok(())
    }
}

/// 执行期间休眠固定时长的作业，并记录并发度
///
/// `max_concurrency` 用于断言非并发作业从未重叠执行。
pub struct BlockingJob {
    run_for: Duration,
    executions: AtomicUsize,
    in_flight: AtomicUsize,
    max_concurrency: AtomicUsize,
}

impl BlockingJob {
    pub fn new(run_for: Duration) -> Arc<Self> {
        Arc::new(Self {
            run_for,
            executions: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_concurrency: AtomicUsize::new(0),
        })
    }

    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Job for BlockingJob {
    async fn execute(&self, _context: JobExecutionContext) -> Result<(), JobExecutionError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrency.fetch_max(current, Ordering::SeqCst);
        tokio::time::sleep(self.run_for).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.executions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// 总是失败的作业，失败标志位可配置
pub struct FailingJob {
    pub error: JobExecutionError,
    executions: AtomicUsize,
}

impl FailingJob {
    pub fn new(error: JobExecutionError) -> Arc<Self> {
        Arc::new(Self {
            error,
            executions: AtomicUsize::new(0),
        })
    }

    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Job for FailingJob {
    async fn execute(&self, _context: JobExecutionContext) -> Result<(), JobExecutionError> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        Err(self.error.clone())
    }
}

/// 循环等待直到收到中断请求的作业
#[derive(Default)]
pub struct InterruptibleJob {
    interrupted_runs: AtomicUsize,
}

impl InterruptibleJob {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn interrupted_runs(&self) -> usize {
        self.interrupted_runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Job for InterruptibleJob {
    async fn execute(&self, context: JobExecutionContext) -> Result<(), JobExecutionError> {
        while !context.is_interrupt_requested() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.interrupted_runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
