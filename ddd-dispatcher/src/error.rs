//! 分发层统一错误定义
//!
//! 覆盖路由（未注册/误投递）、处理器与补偿器执行、关系网络构建以及执行策略
//! （取消/超时）几类最小必要集合。失败等级由注册时声明，不根据错误类型推断。
//!
use crate::handler::FailureLevel;
use std::time::Duration;
use thiserror::Error;

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum DispatchError {
    // --- 路由 ---
    #[error(
        "no handler registered: event={event_type}, check that the handler is registered before build"
    )]
    NoHandlerRegistered { event_type: &'static str },
    #[error(
        "misrouted event: event={event_type} is an out-of-process event, publish it through the integration event bus"
    )]
    MisroutedEvent { event_type: &'static str },

    // --- 执行 ---
    #[error("handler execution failed: event={event_type}, handler={handler}, level={level:?}: {source}")]
    HandlerExecution {
        event_type: &'static str,
        handler: String,
        level: FailureLevel,
        #[source]
        source: anyhow::Error,
    },
    #[error(
        "compensation failed: event={event_type}, compensator={compensator}, level={level:?}: {source}"
    )]
    CompensationExecution {
        event_type: &'static str,
        compensator: String,
        level: FailureLevel,
        #[source]
        source: anyhow::Error,
    },
    #[error("handler not resolved: handler={handler}, instance_type={instance_type}")]
    HandlerNotResolved {
        handler: String,
        instance_type: &'static str,
    },
    #[error("type mismatch: expected={expected}")]
    TypeMismatch { expected: &'static str },

    // --- 关系网络 ---
    #[error("handler already registered: event={event_type}, handler={handler}")]
    DuplicateHandler {
        event_type: &'static str,
        handler: String,
    },

    // --- 执行策略 ---
    #[error("execution cancelled")]
    Cancelled,
    #[error("execution timed out after {timeout:?}")]
    Timeout { timeout: Duration },
}

/// 统一 Result 类型别名
pub type DispatchResult<T> = Result<T, DispatchError>;
