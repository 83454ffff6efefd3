//! tempus - 可嵌入的分布式作业调度引擎
//!
//! 一个库形态的调度引擎：进程内维护作业与触发器注册表，计算每个
//! 触发器的触发时间并在到期时分发执行。多个节点共享同一个持久化
//! 存储即构成集群，触发在集群范围内恰好发生一次，节点崩溃后在途
//! 工作由存活节点回收。
//!
//! # 快速上手
//!
//! ```no_run
//! use std::sync::Arc;
//! use tempus::{SchedulerBuilder, JobDetail, JobKey, Trigger, TriggerKey};
//! use tempus::{ScheduleSpec, SimpleSchedule};
//!
//! # use async_trait::async_trait;
//! # use tempus::{Job, JobExecutionContext, JobExecutionError};
//! # struct ReportJob;
//! # #[async_trait]
//! # impl Job for ReportJob {
//! #     async fn execute(&self, _ctx: JobExecutionContext) -> Result<(), JobExecutionError> {
//! #         Ok(())
//! #     }
//! # }
//! # async fn demo() -> anyhow::Result<()> {
//! let scheduler = SchedulerBuilder::embedded()
//!     .register_job("report", Arc::new(ReportJob))
//!     .build()
//!     .await?;
//!
//! let job = JobDetail::new(JobKey::with_default_group("nightly-report"), "report");
//! let trigger = Trigger::new(
//!     TriggerKey::with_default_group("nightly"),
//!     job.key.clone(),
//!     chrono::Utc::now(),
//!     ScheduleSpec::Simple(SimpleSchedule::repeat_forever(60_000)),
//! );
//! scheduler.schedule_job(job, trigger).await?;
//! scheduler.start()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use chrono::Duration;
use tracing::info;

pub use tempus_config::{SchedulerConfig, StoreType};
pub use tempus_core::{
    Clock, Job, JobExecutionContext, JobFactory, JobRegistry, JobStore, SchedulerEvent,
    SchedulerSignaler, SystemClock,
};
pub use tempus_domain::{
    CalendarSpec, CronSchedule, GroupMatcher, JobDataMap, JobDetail, JobKey, MisfireInstruction,
    ScheduleSpec, SimpleSchedule, Trigger, TriggerKey, TriggerState, DEFAULT_GROUP,
    RECOVERING_JOBS_GROUP, REPEAT_FOREVER,
};
pub use tempus_engine::{Scheduler, SchedulerLifecycle};
pub use tempus_errors::{JobExecutionError, SchedulerError, SchedulerResult};
pub use tempus_infrastructure::{MemoryJobStore, PostgresJobStore};

/// 初始化 tracing 日志输出，`RUST_LOG` 可覆盖级别
pub fn init_logging(default_level: &str) {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// 嵌入式调度器构建器
///
/// 零配置即可得到内存存储的单节点调度器；配置了 Postgres 存储时
/// 自动建池并执行结构迁移。
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    registry: JobRegistry,
    clock: Arc<dyn Clock>,
    store_override: Option<Arc<dyn JobStore>>,
}

impl SchedulerBuilder {
    /// 嵌入式默认配置（内存存储、单节点）
    pub fn embedded() -> Self {
        Self::with_config(SchedulerConfig::embedded_default())
    }

    pub fn with_config(config: SchedulerConfig) -> Self {
        Self {
            config,
            registry: JobRegistry::new(),
            clock: Arc::new(SystemClock),
            store_override: None,
        }
    }

    /// 登记一个作业实现
    pub fn register_job<T: Into<String>>(self, job_type: T, job: Arc<dyn Job>) -> Self {
        self.registry.register(job_type, job);
        self
    }

    /// 注入测试时钟
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// 使用外部构造的存储（多个调度器共享同一存储时使用）
    pub fn with_store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store_override = Some(store);
        self
    }

    pub async fn build(self) -> SchedulerResult<Scheduler> {
        let mut config = self.config;
        config
            .validate()
            .map_err(|e| SchedulerError::Configuration(e.to_string()))?;
        config.instance_id = config.resolve_instance_id();

        let check_in_interval =
            Duration::milliseconds(config.cluster.check_in_interval_ms as i64);
        let misfire_threshold =
            Duration::milliseconds(config.misfire.misfire_threshold_ms as i64);

        let store: Arc<dyn JobStore> = match self.store_override {
            Some(store) => store,
            None => match config.store.r#type {
                StoreType::Memory => Arc::new(MemoryJobStore::new(
                    config.instance_id.clone(),
                    check_in_interval,
                    misfire_threshold,
                    self.clock.clone(),
                )),
                StoreType::Postgres => Arc::new(
                    PostgresJobStore::connect(
                        &config.store.url,
                        config.store.max_connections,
                        std::time::Duration::from_secs(config.store.connection_timeout_seconds),
                        config.instance_id.clone(),
                        check_in_interval,
                        misfire_threshold,
                        self.clock.clone(),
                    )
                    .await?,
                ),
            },
        };

        info!(
            "构建调度器 {} (实例 {})",
            config.scheduler_name, config.instance_id
        );
        Scheduler::new(config, store, Arc::new(self.registry), self.clock).await
    }
}
