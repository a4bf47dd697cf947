use bon::Builder;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::backoff::BackoffPolicy;

/// 单个处理器的执行策略配置
///
/// - `max_attempts`：最多执行次数（含首次），0 视为 1；
/// - `backoff`：两次尝试之间的退避；
/// - `timeout`：单次尝试的超时，为空则不限时。
///
/// 未声明配置时等价于 `StrategyOptions::default()`：仅执行一次，不重试。
#[derive(Builder, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyOptions {
    #[builder(default = 1)]
    pub max_attempts: u32,
    #[builder(default)]
    pub backoff: BackoffPolicy,
    #[serde(rename = "timeout_ms", with = "option_millis")]
    pub timeout: Option<Duration>,
}

impl Default for StrategyOptions {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff: BackoffPolicy::default(),
            timeout: None,
        }
    }
}

impl StrategyOptions {
    /// 实际允许的尝试次数
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

// 配置文件中的时长统一以毫秒表示
pub(crate) mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

pub(crate) mod option_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => {
                serializer.serialize_some(&u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}
