use thiserror::Error;

/// 作业执行失败的详细信息
///
/// 作业的 `execute` 返回该错误时，三个标志位决定执行完成后的处理指令：
/// 立即重新触发、仅完成本次触发器、或完成该作业的全部触发器。
#[derive(Debug, Clone, Error)]
#[error("作业执行失败: {message}")]
pub struct JobExecutionError {
    pub message: String,
    pub refire_immediately: bool,
    pub unschedule_firing_trigger: bool,
    pub unschedule_all_triggers: bool,
}

impl JobExecutionError {
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
            refire_immediately: false,
            unschedule_firing_trigger: false,
            unschedule_all_triggers: false,
        }
    }

    pub fn with_refire_immediately(mut self) -> Self {
        self.refire_immediately = true;
        self
    }

    pub fn with_unschedule_firing_trigger(mut self) -> Self {
        self.unschedule_firing_trigger = true;
        self
    }

    pub fn with_unschedule_all_triggers(mut self) -> Self {
        self.unschedule_all_triggers = true;
        self
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),
    #[error("持久化操作错误: {0}")]
    JobPersistence(String),
    #[error("对象已存在: {0}")]
    ObjectAlreadyExists(String),
    #[error("作业未找到: {key}")]
    JobNotFound { key: String },
    #[error("触发器未找到: {key}")]
    TriggerNotFound { key: String },
    #[error("日历未找到: {name}")]
    CalendarNotFound { name: String },
    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },
    #[error("未知的时区标识: {0}")]
    UnknownTimeZone(String),
    #[error("无效的触发器定义: {0}")]
    InvalidTrigger(String),
    #[error("作业执行错误: {0}")]
    JobExecution(#[from] JobExecutionError),
    #[error("调度器生命周期错误: {0}")]
    Lifecycle(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

impl SchedulerError {
    pub fn persistence<S: Into<String>>(msg: S) -> Self {
        Self::JobPersistence(msg.into())
    }

    pub fn object_already_exists<S: Into<String>>(key: S) -> Self {
        Self::ObjectAlreadyExists(key.into())
    }

    pub fn job_not_found<S: Into<String>>(key: S) -> Self {
        Self::JobNotFound { key: key.into() }
    }

    pub fn trigger_not_found<S: Into<String>>(key: S) -> Self {
        Self::TriggerNotFound { key: key.into() }
    }

    pub fn calendar_not_found<S: Into<String>>(name: S) -> Self {
        Self::CalendarNotFound { name: name.into() }
    }

    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// 该错误是否值得由调度循环退避后重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SchedulerError::Database(_) | SchedulerError::JobPersistence(_)
        )
    }

    /// 该错误是否为致命错误（只在初始化阶段允许向上传播终止进程）
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SchedulerError::Configuration(_) | SchedulerError::Internal(_)
        )
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for SchedulerError {
    fn from(err: anyhow::Error) -> Self {
        SchedulerError::Internal(err.to_string())
    }
}
