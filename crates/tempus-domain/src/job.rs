use serde::{Deserialize, Serialize};

use crate::data_map::JobDataMap;
use crate::keys::JobKey;

/// 作业定义
///
/// 表示一个可被触发执行的作业单元。`job_type` 是作业实现的类型标识，
/// 由作业工厂在触发时解析为具体实现。
///
/// # 字段说明
///
/// - `durable`: 为真时即使没有任何触发器引用也保留在存储中
/// - `persist_data_after_execution`: 每次执行结束后回写数据映射
/// - `concurrent_execution_disallowed`: 同一作业不允许并发执行
/// - `requests_recovery`: 节点崩溃后由集群恢复流程补触发一次
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDetail {
    pub key: JobKey,
    pub description: Option<String>,
    pub job_type: String,
    pub data_map: JobDataMap,
    pub durable: bool,
    pub persist_data_after_execution: bool,
    pub concurrent_execution_disallowed: bool,
    pub requests_recovery: bool,
}

impl JobDetail {
    pub fn new<T: Into<String>>(key: JobKey, job_type: T) -> Self {
        Self {
            key,
            description: None,
            job_type: job_type.into(),
            data_map: JobDataMap::new(),
            durable: false,
            persist_data_after_execution: false,
            concurrent_execution_disallowed: false,
            requests_recovery: false,
        }
    }

    pub fn with_description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_data_map(mut self, data_map: JobDataMap) -> Self {
        self.data_map = data_map;
        self
    }

    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    pub fn persist_data_after_execution(mut self, persist: bool) -> Self {
        self.persist_data_after_execution = persist;
        self
    }

    pub fn concurrent_execution_disallowed(mut self, disallowed: bool) -> Self {
        self.concurrent_execution_disallowed = disallowed;
        self
    }

    pub fn requests_recovery(mut self, requests: bool) -> Self {
        self.requests_recovery = requests;
        self
    }
}
