//! 执行策略（ExecutionStrategy）
//!
//! 以可配置的韧性策略（重试次数、退避、超时）包裹单次处理器调用：
//! - 成功时返回 `Flow::Continue`；
//! - 耗尽重试后不自行决定链路后果，而是把 `FailureSignal` 交给调用方提供的
//!   失败续体，等待其返回 `Flow`。
//!
//! 前向处理器与补偿器复用同一策略，区别只在于调用方传入的失败续体。
//!
mod backoff;
mod options;

pub use backoff::BackoffPolicy;
pub use options::StrategyOptions;

use crate::error::DispatchError;
use crate::handler::FailureLevel;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// 耗尽重试后交给失败续体的信息
#[derive(Debug)]
pub struct FailureSignal {
    /// 最后一次尝试的错误
    pub error: anyhow::Error,
    /// 注册时声明的失败等级
    pub level: FailureLevel,
    /// 实际执行的尝试次数（取消发生在首次尝试前时为 0）
    pub attempts: u32,
}

/// 单条绑定执行后的链路走向
#[derive(Debug)]
pub enum Flow {
    /// 成功，或失败被忽略：继续下一条绑定
    Continue,
    /// 不可忽略的失败，补偿已执行完毕：中止链路并上抛原始错误
    Abort { error: DispatchError },
    /// 不可忽略的失败且无补偿器，或补偿器不可忽略地失败：中止链路并上抛原始错误
    Escalate {
        error: DispatchError,
        compensation_error: Option<DispatchError>,
    },
}

impl Flow {
    pub fn is_continue(&self) -> bool {
        matches!(self, Flow::Continue)
    }
}

/// 执行策略
///
/// 该 trait 带有泛型方法，通常以具体实现类型注入使用。
#[async_trait]
pub trait ExecutionStrategy: Send + Sync {
    /// 在 `options` 声明的策略下执行 `action`
    ///
    /// - `level`：注册时声明的失败等级，原样写入 `FailureSignal`；
    /// - `cancel`：每次尝试前以及退避等待期间检查；
    /// - `on_failure`：耗尽重试后的失败续体，其返回值即本次执行的结果。
    async fn execute<'a, A, F>(
        &'a self,
        options: &'a StrategyOptions,
        level: FailureLevel,
        cancel: &'a CancellationToken,
        action: A,
        on_failure: F,
    ) -> Flow
    where
        A: FnMut() -> BoxFuture<'a, anyhow::Result<()>> + Send + 'a,
        F: FnOnce(FailureSignal) -> BoxFuture<'a, Flow> + Send + 'a;
}

/// 默认执行策略：按次数重试、按退避等待、按单次超时限时
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultExecutionStrategy;

#[async_trait]
impl ExecutionStrategy for DefaultExecutionStrategy {
    async fn execute<'a, A, F>(
        &'a self,
        options: &'a StrategyOptions,
        level: FailureLevel,
        cancel: &'a CancellationToken,
        mut action: A,
        on_failure: F,
    ) -> Flow
    where
        A: FnMut() -> BoxFuture<'a, anyhow::Result<()>> + Send + 'a,
        F: FnOnce(FailureSignal) -> BoxFuture<'a, Flow> + Send + 'a,
    {
        let max_attempts = options.attempts();
        let mut attempts = 0;

        let error = loop {
            if cancel.is_cancelled() {
                break anyhow::Error::from(DispatchError::Cancelled);
            }

            attempts += 1;
            let result = match options.timeout {
                Some(timeout) => match time::timeout(timeout, action()).await {
                    Ok(result) => result,
                    Err(_) => Err(DispatchError::Timeout { timeout }.into()),
                },
                None => action().await,
            };

            let err = match result {
                Ok(()) => return Flow::Continue,
                Err(err) => err,
            };
            if attempts >= max_attempts {
                break err;
            }

            let delay = options.backoff.next(attempts - 1);
            warn!(attempt = attempts, max_attempts, ?delay, error = %err, "attempt failed, retrying");

            tokio::select! {
                _ = cancel.cancelled() => {
                    warn!(attempt = attempts, error = %err, "retry abandoned, execution cancelled");
                    break DispatchError::Cancelled.into();
                }
                _ = time::sleep(delay) => {}
            }
        };

        on_failure(FailureSignal {
            error,
            level,
            attempts,
        })
        .await
    }
}
