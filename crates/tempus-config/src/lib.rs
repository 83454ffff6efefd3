//! 调度器配置
//!
//! 配置来源优先级：TOML 配置文件 < `TEMPUS_` 前缀的环境变量
//! （分段用双下划线，如 `TEMPUS_ENGINE__THREAD_COUNT=20`）。

use std::path::Path;

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 存储类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreType {
    #[serde(rename = "memory")]
    Memory,
    #[serde(rename = "postgres")]
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub r#type: StoreType,
    /// Postgres 连接串，内存存储时忽略
    pub url: String,
    pub max_connections: u32,
    pub connection_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// 作业执行槽数量
    pub thread_count: usize,
    /// 没有到期触发器时的空转等待上限（毫秒）
    pub idle_wait_time_ms: u64,
    /// 批量获取时允许提前的时间窗口（毫秒），0 表示只取严格到期的
    pub batch_time_window_ms: u64,
    /// 单次获取的最大批量
    pub max_batch_size: usize,
    /// 存储持续不可用时调度循环的暂停间隔（毫秒）
    pub db_failure_retry_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub clustered: bool,
    /// 节点签到间隔（毫秒）
    pub check_in_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MisfireConfig {
    /// 超过该阈值（毫秒）未触发视为 misfire
    pub misfire_threshold_ms: u64,
    /// 每轮清扫处理的 misfire 上限
    pub max_misfires_per_sweep: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub scheduler_name: String,
    /// 节点标识；"AUTO" 表示构建时自动生成
    pub instance_id: String,
    pub store: StoreConfig,
    pub engine: EngineConfig,
    pub cluster: ClusterConfig,
    pub misfire: MisfireConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            scheduler_name: "TempusScheduler".to_string(),
            instance_id: "AUTO".to_string(),
            store: StoreConfig {
                r#type: StoreType::Postgres,
                url: "postgresql://localhost/tempus".to_string(),
                max_connections: 10,
                connection_timeout_seconds: 30,
            },
            engine: EngineConfig {
                thread_count: 10,
                idle_wait_time_ms: 30_000,
                batch_time_window_ms: 0,
                max_batch_size: 1,
                db_failure_retry_interval_ms: 15_000,
            },
            cluster: ClusterConfig {
                clustered: false,
                check_in_interval_ms: 15_000,
            },
            misfire: MisfireConfig {
                misfire_threshold_ms: 60_000,
                max_misfires_per_sweep: 20,
            },
        }
    }
}

impl SchedulerConfig {
    /// 嵌入式默认配置：内存存储、单节点
    pub fn embedded_default() -> Self {
        let mut config = Self::default();
        config.store.r#type = StoreType::Memory;
        config.store.url = String::new();
        config
    }

    /// 从配置文件与环境变量加载
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = ["config/tempus.toml", "tempus.toml"];
            for path in &default_paths {
                if Path::new(path).exists() {
                    builder = builder.add_source(File::new(path, FileFormat::Toml));
                    break;
                }
            }
        }

        builder = builder
            .set_default("scheduler_name", "TempusScheduler")?
            .set_default("instance_id", "AUTO")?
            .set_default("store.type", "postgres")?
            .set_default("store.url", "postgresql://localhost/tempus")?
            .set_default("store.max_connections", 10)?
            .set_default("store.connection_timeout_seconds", 30)?
            .set_default("engine.thread_count", 10)?
            .set_default("engine.idle_wait_time_ms", 30_000)?
            .set_default("engine.batch_time_window_ms", 0)?
            .set_default("engine.max_batch_size", 1)?
            .set_default("engine.db_failure_retry_interval_ms", 15_000)?
            .set_default("cluster.clustered", false)?
            .set_default("cluster.check_in_interval_ms", 15_000)?
            .set_default("misfire.misfire_threshold_ms", 60_000)?
            .set_default("misfire.max_misfires_per_sweep", 20)?;

        builder = builder.add_source(
            Environment::with_prefix("TEMPUS")
                .separator("__")
                .try_parsing(true),
        );

        let config: SchedulerConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("解析配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// 校验配置合法性
    pub fn validate(&self) -> Result<()> {
        if self.scheduler_name.is_empty() {
            anyhow::bail!("scheduler_name 不能为空");
        }
        if self.engine.thread_count == 0 {
            anyhow::bail!("engine.thread_count 必须大于 0");
        }
        if self.engine.max_batch_size == 0 {
            anyhow::bail!("engine.max_batch_size 必须大于 0");
        }
        if self.engine.idle_wait_time_ms == 0 {
            anyhow::bail!("engine.idle_wait_time_ms 必须大于 0");
        }
        if self.cluster.check_in_interval_ms == 0 {
            anyhow::bail!("cluster.check_in_interval_ms 必须大于 0");
        }
        if self.store.r#type == StoreType::Postgres && self.store.url.is_empty() {
            anyhow::bail!("postgres 存储必须配置 store.url");
        }
        Ok(())
    }

    /// 解析实例标识，"AUTO" 时生成随机标识
    pub fn resolve_instance_id(&self) -> String {
        if self.instance_id == "AUTO" {
            format!("tempus-{}", Uuid::new_v4().simple())
        } else {
            self.instance_id.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_embedded_defaults() {
        let config = SchedulerConfig::embedded_default();
        assert_eq!(config.scheduler_name, "TempusScheduler");
        assert_eq!(config.store.r#type, StoreType::Memory);
        assert_eq!(config.engine.thread_count, 10);
        assert_eq!(config.engine.idle_wait_time_ms, 30_000);
        assert_eq!(config.engine.batch_time_window_ms, 0);
        assert_eq!(config.engine.max_batch_size, 1);
        assert_eq!(config.cluster.check_in_interval_ms, 15_000);
        assert_eq!(config.misfire.misfire_threshold_ms, 60_000);
        assert!(!config.cluster.clustered);
        config.validate().unwrap();
    }

    #[test]
    fn test_auto_instance_id_is_unique() {
        let config = SchedulerConfig::embedded_default();
        let a = config.resolve_instance_id();
        let b = config.resolve_instance_id();
        assert_ne!(a, b);
        assert!(a.starts_with("tempus-"));
    }

    #[test]
    fn test_explicit_instance_id_kept() {
        let mut config = SchedulerConfig::embedded_default();
        config.instance_id = "node-7".to_string();
        assert_eq!(config.resolve_instance_id(), "node-7");
    }

    #[test]
    fn test_validation_rejects_zero_threads() {
        let mut config = SchedulerConfig::embedded_default();
        config.engine.thread_count = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
scheduler_name = "批处理调度器"
[store]
type = "memory"
url = ""
[engine]
thread_count = 4
"#
        )
        .unwrap();

        let config = SchedulerConfig::load(Some(file.path().to_str().unwrap())).unwrap();
        assert_eq!(config.scheduler_name, "批处理调度器");
        assert_eq!(config.store.r#type, StoreType::Memory);
        assert_eq!(config.engine.thread_count, 4);
        // 未覆盖的字段取默认值
        assert_eq!(config.engine.max_batch_size, 1);
    }

    #[test]
    fn test_missing_config_file_is_error() {
        assert!(SchedulerConfig::load(Some("/no/such/tempus.toml")).is_err());
    }
}
