use std::sync::Arc;

use async_trait::async_trait;

use tempus_errors::{JobExecutionError, SchedulerResult};

use crate::context::JobExecutionContext;

/// 作业实现接口
///
/// 执行失败时返回 `JobExecutionError`，其标志位决定后续处理指令；
/// 其它类型的失败（panic）由执行槽捕获并按普通执行失败处理。
#[async_trait]
pub trait Job: Send + Sync {
    async fn execute(&self, context: JobExecutionContext) -> Result<(), JobExecutionError>;
}

/// 作业工厂
///
/// 按作业定义中的类型标识解析出具体实现。
pub trait JobFactory: Send + Sync {
    fn create(&self, job_type: &str) -> SchedulerResult<Arc<dyn Job>>;
}
