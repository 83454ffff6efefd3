//! 调度引擎
//!
//! 每个调度器实例运行一个调度循环任务、一个 misfire 清扫任务、
//! （集群模式下）一个集群管理任务，以及 N 个作业执行槽。全部组件
//! 并发地工作在同一个作业存储之上。

pub mod cluster;
pub mod context;
pub mod misfire;
pub mod runner;
pub mod scheduler;
pub mod scheduler_loop;
pub mod signaler;

pub use context::EngineContext;
pub use scheduler::{Scheduler, SchedulerLifecycle};
pub use signaler::SchedulingSignaler;
