use std::fmt;

use serde::{Deserialize, Serialize};

/// 未显式指定分组时使用的默认分组名
pub const DEFAULT_GROUP: &str = "DEFAULT";

/// 故障恢复时合成的一次性触发器所在的分组
pub const RECOVERING_JOBS_GROUP: &str = "RECOVERING_JOBS";

/// `trigger_job` 手工触发时合成的一次性触发器所在的分组
pub const MANUAL_TRIGGERS_GROUP: &str = "MANUAL_TRIGGERS";

/// 作业标识，由名称和分组共同唯一确定
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobKey {
    pub name: String,
    pub group: String,
}

impl JobKey {
    pub fn new<N: Into<String>, G: Into<String>>(name: N, group: G) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
        }
    }

    /// 使用默认分组创建作业标识
    pub fn with_default_group<N: Into<String>>(name: N) -> Self {
        Self::new(name, DEFAULT_GROUP)
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.group, self.name)
    }
}

/// 触发器标识，由名称和分组共同唯一确定
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TriggerKey {
    pub name: String,
    pub group: String,
}

impl TriggerKey {
    pub fn new<N: Into<String>, G: Into<String>>(name: N, group: G) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
        }
    }

    /// 使用默认分组创建触发器标识
    pub fn with_default_group<N: Into<String>>(name: N) -> Self {
        Self::new(name, DEFAULT_GROUP)
    }
}

impl fmt::Display for TriggerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.group, self.name)
    }
}

/// 分组匹配器
///
/// 用于批量暂停/恢复操作选中一组作业或触发器的分组。匹配器本身会被
/// 存储层记住，之后加入被记住分组的触发器会直接以 PAUSED 状态入库。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum GroupMatcher {
    #[serde(rename = "EQUALS")]
    Equals(String),
    #[serde(rename = "STARTS_WITH")]
    StartsWith(String),
    #[serde(rename = "ENDS_WITH")]
    EndsWith(String),
    #[serde(rename = "CONTAINS")]
    Contains(String),
    #[serde(rename = "ANY")]
    Any,
}

impl GroupMatcher {
    pub fn equals<S: Into<String>>(group: S) -> Self {
        Self::Equals(group.into())
    }

    pub fn starts_with<S: Into<String>>(prefix: S) -> Self {
        Self::StartsWith(prefix.into())
    }

    pub fn ends_with<S: Into<String>>(suffix: S) -> Self {
        Self::EndsWith(suffix.into())
    }

    pub fn contains<S: Into<String>>(fragment: S) -> Self {
        Self::Contains(fragment.into())
    }

    /// 判断指定分组是否被该匹配器选中
    pub fn matches(&self, group: &str) -> bool {
        match self {
            GroupMatcher::Equals(g) => group == g,
            GroupMatcher::StartsWith(p) => group.starts_with(p.as_str()),
            GroupMatcher::EndsWith(s) => group.ends_with(s.as_str()),
            GroupMatcher::Contains(f) => group.contains(f.as_str()),
            GroupMatcher::Any => true,
        }
    }

    /// 匹配器的可读描述，用于罗列已暂停的分组记录
    pub fn describe(&self) -> String {
        match self {
            GroupMatcher::Equals(g) => g.clone(),
            GroupMatcher::StartsWith(p) => format!("{p}*"),
            GroupMatcher::EndsWith(s) => format!("*{s}"),
            GroupMatcher::Contains(f) => format!("*{f}*"),
            GroupMatcher::Any => "*".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_display() {
        let key = JobKey::new("report", "billing");
        assert_eq!(key.to_string(), "billing.report");

        let key = TriggerKey::with_default_group("nightly");
        assert_eq!(key.to_string(), "DEFAULT.nightly");
    }

    #[test]
    fn test_group_matcher() {
        assert!(GroupMatcher::equals("g1").matches("g1"));
        assert!(!GroupMatcher::equals("g1").matches("g12"));
        assert!(GroupMatcher::starts_with("g").matches("gX"));
        assert!(GroupMatcher::ends_with("X").matches("gX"));
        assert!(GroupMatcher::contains("ill").matches("billing"));
        assert!(GroupMatcher::Any.matches("anything"));
    }

    #[test]
    fn test_group_matcher_describe() {
        assert_eq!(GroupMatcher::equals("g1").describe(), "g1");
        assert_eq!(GroupMatcher::starts_with("g").describe(), "g*");
        assert_eq!(GroupMatcher::Any.describe(), "*");
    }
}
