use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tempus_errors::{SchedulerError, SchedulerResult};

use crate::traits::job::{Job, JobFactory};

/// 作业注册表
///
/// 以类型标识登记作业实现，是作业工厂的默认实现。嵌入式部署时在
/// 构建调度器前完成登记即可。
#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, Arc<dyn Job>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Into<String>>(&self, job_type: T, job: Arc<dyn Job>) {
        self.jobs
            .write()
            .expect("作业注册表锁已中毒")
            .insert(job_type.into(), job);
    }

    pub fn registered_types(&self) -> Vec<String> {
        self.jobs
            .read()
            .expect("作业注册表锁已中毒")
            .keys()
            .cloned()
            .collect()
    }
}

impl JobFactory for JobRegistry {
    fn create(&self, job_type: &str) -> SchedulerResult<Arc<dyn Job>> {
        self.jobs
            .read()
            .expect("作业注册表锁已中毒")
            .get(job_type)
            .cloned()
            .ok_or_else(|| {
                SchedulerError::Configuration(format!("未注册的作业类型: {job_type}"))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tempus_errors::JobExecutionError;

    use crate::context::JobExecutionContext;

    struct NoopJob;

    #[async_trait]
    impl Job for NoopJob {
        async fn execute(&self, _context: JobExecutionContext) -> Result<(), JobExecutionError> {
            Ok(())
        }
    }

    #[test]
    fn test_registry_lookup() {
        let registry = JobRegistry::new();
        registry.register("noop", Arc::new(NoopJob));
        assert!(registry.create("noop").is_ok());
        assert!(matches!(
            registry.create("missing"),
            Err(SchedulerError::Configuration(_))
        ));
    }
}
