use ddd_dispatcher::{DispatcherConfig, StrategyOptions};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

pub const CONFIG_ENV: &str = "DISPATCH_CONFIG";

const DEFAULT_CONFIG: &str = r#"{
    "dispatcher": {
        "fallback_options": { "max_attempts": 1, "timeout_ms": 2000 }
    },
    "handlers": {
        "Charge": {
            "max_attempts": 3,
            "backoff": { "first_ms": 50, "max_ms": 400, "factor": 2.0 },
            "timeout_ms": 500
        },
        "Unreserve": { "max_attempts": 2 }
    }
}"#;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// 演示程序配置：分发器兜底策略 + 按处理器名称声明的执行策略
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    pub dispatcher: DispatcherConfig,
    pub handlers: HashMap<String, StrategyOptions>,
}

impl DemoConfig {
    /// `DISPATCH_CONFIG` 指向的 JSON 文件；未设置时使用内置配置
    pub fn load() -> Result<Self, ConfigError> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::from_path(Path::new(&path)),
            Err(_) => Ok(serde_json::from_str(DEFAULT_CONFIG)?),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn options_for(&self, handler: &str) -> Option<StrategyOptions> {
        self.handlers.get(handler).cloned()
    }
}
