//! 重试退避策略（BackoffPolicy）
//!
//! 第 `n` 次重试前的等待时长为 `first × factor^n`，并以 `max` 封顶；
//! 计算结果非有限值（溢出）时同样取 `max`。
//!
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::options::millis;

/// 重试退避策略
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    /// 首次重试前的等待
    #[serde(rename = "first_ms", with = "millis")]
    pub first: Duration,
    /// 等待上限
    #[serde(rename = "max_ms", with = "millis")]
    pub max: Duration,
    /// 增长因子（1.0 为固定间隔）
    pub factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            first: Duration::from_millis(100),
            max: Duration::from_secs(30),
            factor: 1.0,
        }
    }
}

impl BackoffPolicy {
    /// 固定间隔
    pub fn fixed(delay: Duration) -> Self {
        Self {
            first: delay,
            max: delay,
            factor: 1.0,
        }
    }

    /// 指数增长，以 `max` 封顶
    pub fn exponential(first: Duration, max: Duration, factor: f64) -> Self {
        Self { first, max, factor }
    }

    /// 计算第 `retry` 次重试（从 0 开始）前的等待时长
    pub fn next(&self, retry: u32) -> Duration {
        let exp = retry.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);

        // 浮点结果可能超出 Duration 的表示范围，先做受检转换再与上限比较
        Duration::try_from_secs_f64(secs).map_or(self.max, |delay| delay.min(self.max))
    }
}
