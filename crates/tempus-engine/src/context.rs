use std::sync::Arc;

use tempus_config::SchedulerConfig;
use tempus_core::{Clock, JobFactory, JobStore};

use crate::signaler::SchedulingSignaler;

/// 引擎各组件共享的资源
///
/// `config.instance_id` 在构造前已完成解析（不再是 "AUTO"），并与
/// 存储实例配置的节点标识一致。
pub struct EngineContext {
    pub scheduler_name: String,
    pub instance_id: String,
    pub store: Arc<dyn JobStore>,
    pub job_factory: Arc<dyn JobFactory>,
    pub clock: Arc<dyn Clock>,
    pub signaler: Arc<SchedulingSignaler>,
    pub config: SchedulerConfig,
}
