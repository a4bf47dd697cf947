//! 进程内事件分发器（Dispatcher）
//!
//! 对一次发布的事件编排“查找 → 顺序执行 → 失败补偿”：
//! - 按注册顺序逐条执行绑定，单次发布内严格串行；
//! - 失败等级为 `Ignore` 时记录日志并继续；
//! - 其它等级中止链路，仅执行失败绑定自身的补偿器，随后上抛原始错误；
//! - 失败点之前已成功的绑定不会回滚，之后的绑定不再执行。
//!
use crate::context::{DispatchContext, ServiceProvider};
use crate::error::{DispatchError, DispatchResult};
use crate::event::{Event, EventType};
use crate::handler::{HandlerBinding, HandlerDescriptor};
use crate::relation::RelationNetwork;
use crate::strategy::{DefaultExecutionStrategy, ExecutionStrategy, Flow, StrategyOptions};
use bon::Builder;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// 分发器配置
#[derive(Builder, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// 处理器未声明执行策略时采用的配置（默认仅执行一次）
    #[builder(default)]
    pub fallback_options: StrategyOptions,
}

/// 一次发布的终态
#[derive(Debug)]
pub enum DispatchOutcome {
    /// 所有绑定均已执行（失败均为可忽略级别）
    Completed { ignored_failures: usize },
    /// 不可忽略的失败中止了链路，失败绑定的补偿器已全部执行
    Aborted { error: DispatchError },
    /// 不可忽略的失败中止了链路，且无补偿器或补偿器不可忽略地失败
    Escalated {
        error: DispatchError,
        compensation_error: Option<DispatchError>,
    },
}

impl DispatchOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, DispatchOutcome::Completed { .. })
    }

    /// 中止或升级时返回触发中止的原始错误
    pub fn into_result(self) -> DispatchResult<()> {
        match self {
            DispatchOutcome::Completed { .. } => Ok(()),
            DispatchOutcome::Aborted { error } | DispatchOutcome::Escalated { error, .. } => {
                Err(error)
            }
        }
    }
}

/// 进程内事件分发器
///
/// - 关系网络以 `Arc` 句柄共享，默认使用进程级共享网络；
/// - 执行策略以具体类型注入（`ExecutionStrategy` 带有泛型方法）。
pub struct Dispatcher<S = DefaultExecutionStrategy> {
    network: Arc<RelationNetwork>,
    strategy: S,
    config: DispatcherConfig,
}

impl Dispatcher<DefaultExecutionStrategy> {
    pub fn new(network: Arc<RelationNetwork>) -> Self {
        Self::with_strategy(network, DefaultExecutionStrategy)
    }

    /// 基于进程级共享关系网络的分发器
    pub fn shared() -> Self {
        Self::new(RelationNetwork::shared())
    }
}

impl<S> Dispatcher<S>
where
    S: ExecutionStrategy,
{
    pub fn with_strategy(network: Arc<RelationNetwork>, strategy: S) -> Self {
        Self {
            network,
            strategy,
            config: DispatcherConfig::default(),
        }
    }

    pub fn with_config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    pub fn network(&self) -> &Arc<RelationNetwork> {
        &self.network
    }

    /// 服务提供者中缺失的处理器实例类型
    pub fn unresolved_handler_types(&self, services: &ServiceProvider) -> Vec<&'static str> {
        self.network
            .handler_instance_types()
            .into_iter()
            .filter(|t| !services.contains(t.id))
            .map(|t| t.name)
            .collect()
    }

    /// 发布事件：完成时返回 `Ok(())`，中止时返回触发中止的原始错误
    pub async fn publish<E: Event>(
        &self,
        ctx: &DispatchContext,
        event: &E,
        cancel: &CancellationToken,
    ) -> DispatchResult<()> {
        self.dispatch(ctx, event, cancel).await?.into_result()
    }

    /// 发布事件并返回完整终态；路由失败（未注册/误投递）以 `Err` 返回
    pub async fn dispatch<E: Event>(
        &self,
        ctx: &DispatchContext,
        event: &E,
        cancel: &CancellationToken,
    ) -> DispatchResult<DispatchOutcome> {
        let event_type = EventType::of::<E>();
        let bindings = self.bindings_for(ctx, event_type, event)?;
        let ignored = AtomicUsize::new(0);

        debug!(
            event_type = %event_type,
            event_id = event.event_id(),
            correlation_id = ctx.correlation_id(),
            actor_type = ctx.biz.actor_type(),
            actor_id = ctx.biz.actor_id(),
            bindings = bindings.len(),
            "publishing event"
        );

        for binding in bindings.iter() {
            let outcome = match self
                .run_binding(ctx, event_type, event, binding, cancel, &ignored)
                .await
            {
                Flow::Continue => continue,
                Flow::Abort { error } => DispatchOutcome::Aborted { error },
                Flow::Escalate {
                    error,
                    compensation_error,
                } => DispatchOutcome::Escalated {
                    error,
                    compensation_error,
                },
            };

            warn!(
                event_type = %event_type,
                event_id = event.event_id(),
                correlation_id = ctx.correlation_id(),
                handler = binding.handler().name(),
                "event dispatch aborted, remaining handlers skipped"
            );
            return Ok(outcome);
        }

        Ok(DispatchOutcome::Completed {
            ignored_failures: ignored.into_inner(),
        })
    }

    fn bindings_for<E: Event>(
        &self,
        ctx: &DispatchContext,
        event_type: EventType,
        event: &E,
    ) -> DispatchResult<Arc<[HandlerBinding]>> {
        if let Some(bindings) = self.network.lookup(&event_type) {
            return Ok(bindings);
        }

        if event.is_integration_event() {
            error!(
                event_type = %event_type,
                event_id = event.event_id(),
                correlation_id = ctx.correlation_id(),
                "out-of-process event published on the in-process dispatcher"
            );
            return Err(DispatchError::MisroutedEvent {
                event_type: event_type.name(),
            });
        }

        error!(
            event_type = %event_type,
            event_id = event.event_id(),
            correlation_id = ctx.correlation_id(),
            "no handler registered for event"
        );
        Err(DispatchError::NoHandlerRegistered {
            event_type: event_type.name(),
        })
    }

    fn options_for<'a>(&'a self, descriptor: &'a HandlerDescriptor) -> &'a StrategyOptions {
        descriptor
            .options()
            .unwrap_or(&self.config.fallback_options)
    }

    async fn run_binding<E: Event>(
        &self,
        ctx: &DispatchContext,
        event_type: EventType,
        event: &E,
        binding: &HandlerBinding,
        cancel: &CancellationToken,
        ignored: &AtomicUsize,
    ) -> Flow {
        let handler = binding.handler();
        let payload: &(dyn Any + Send + Sync) = event;

        debug!(
            event_type = %event_type,
            event_id = event.event_id(),
            correlation_id = ctx.correlation_id(),
            handler = handler.name(),
            "executing handler"
        );

        self.strategy
            .execute(
                self.options_for(handler),
                handler.failure_level(),
                cancel,
                || handler.invoke(ctx, payload, cancel.clone()),
                |signal| {
                    async move {
                        let error = DispatchError::HandlerExecution {
                            event_type: event_type.name(),
                            handler: handler.name().to_string(),
                            level: signal.level,
                            source: signal.error,
                        };

                        if signal.level.is_ignorable() {
                            error!(
                                event_type = %event_type,
                                event_id = event.event_id(),
                                correlation_id = ctx.correlation_id(),
                                attempts = signal.attempts,
                                error = %error,
                                "handler error ignored, rollback skipped"
                            );
                            ignored.fetch_add(1, Ordering::Relaxed);
                            return Flow::Continue;
                        }

                        if binding.compensators().is_empty() {
                            return Flow::Escalate {
                                error,
                                compensation_error: None,
                            };
                        }

                        match self
                            .compensate(ctx, event_type, event, binding.compensators(), cancel)
                            .await
                        {
                            None => Flow::Abort { error },
                            Some(compensation_error) => Flow::Escalate {
                                error,
                                compensation_error: Some(compensation_error),
                            },
                        }
                    }
                    .boxed()
                },
            )
            .await
    }

    // 返回首个不可忽略的补偿失败；此后的补偿器不再执行
    async fn compensate<E: Event>(
        &self,
        ctx: &DispatchContext,
        event_type: EventType,
        event: &E,
        compensators: &[HandlerDescriptor],
        cancel: &CancellationToken,
    ) -> Option<DispatchError> {
        let payload: &(dyn Any + Send + Sync) = event;

        for compensator in compensators {
            debug!(
                event_type = %event_type,
                event_id = event.event_id(),
                correlation_id = ctx.correlation_id(),
                compensator = compensator.name(),
                "rollback start"
            );

            let flow = self
                .strategy
                .execute(
                    self.options_for(compensator),
                    compensator.failure_level(),
                    cancel,
                    || compensator.invoke(ctx, payload, cancel.clone()),
                    |signal| {
                        async move {
                            let error = DispatchError::CompensationExecution {
                                event_type: event_type.name(),
                                compensator: compensator.name().to_string(),
                                level: signal.level,
                                source: signal.error,
                            };

                            if signal.level.is_ignorable() {
                                error!(
                                    event_type = %event_type,
                                    event_id = event.event_id(),
                                    correlation_id = ctx.correlation_id(),
                                    error = %error,
                                    "rollback error ignored"
                                );
                                return Flow::Continue;
                            }

                            error!(
                                event_type = %event_type,
                                event_id = event.event_id(),
                                correlation_id = ctx.correlation_id(),
                                error = %error,
                                "rollback failed, remaining compensators skipped"
                            );
                            Flow::Escalate {
                                error,
                                compensation_error: None,
                            }
                        }
                        .boxed()
                    },
                )
                .await;

            match flow {
                Flow::Continue => {}
                Flow::Abort { error } | Flow::Escalate { error, .. } => return Some(error),
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{EventHandler, FailureLevel, SagaEventHandler};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Debug)]
    struct Pinged {
        id: String,
    }
    impl Event for Pinged {
        fn event_id(&self) -> &str {
            &self.id
        }
    }

    #[derive(Debug)]
    struct Exported;
    impl Event for Exported {
        fn event_id(&self) -> &str {
            "exported-1"
        }
        fn is_integration_event(&self) -> bool {
            true
        }
    }

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }
    impl Recorder {
        fn push(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    struct Pong {
        recorder: Arc<Recorder>,
        fail: bool,
    }

    #[async_trait]
    impl EventHandler<Pinged> for Pong {
        async fn handle(
            &self,
            _ctx: &DispatchContext,
            event: &Pinged,
            _cancel: &CancellationToken,
        ) -> anyhow::Result<()> {
            self.recorder.push(format!("pong:{}", event.id));
            anyhow::ensure!(!self.fail, "pong failed");
            Ok(())
        }
    }

    #[async_trait]
    impl SagaEventHandler<Pinged> for Pong {
        async fn cancel(
            &self,
            _ctx: &DispatchContext,
            event: &Pinged,
            _cancel: &CancellationToken,
        ) -> anyhow::Result<()> {
            self.recorder.push(format!("unpong:{}", event.id));
            Ok(())
        }
    }

    fn ping(id: &str) -> Pinged {
        Pinged { id: id.to_string() }
    }

    fn setup(fail: bool) -> (Dispatcher, DispatchContext, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let services = ServiceProvider::new().with(Arc::new(Pong {
            recorder: recorder.clone(),
            fail,
        }));
        let network = Arc::new(RelationNetwork::new());
        network.add(
            EventType::of::<Pinged>(),
            HandlerBinding::saga::<Pinged, Pong>("pong"),
        );
        network.build().unwrap();

        (
            Dispatcher::new(network),
            DispatchContext::new(Arc::new(services)),
            recorder,
        )
    }

    #[tokio::test]
    async fn publishes_to_resolved_handler() {
        let (dispatcher, ctx, recorder) = setup(false);

        dispatcher
            .publish(&ctx, &ping("1"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(recorder.calls(), ["pong:1"]);
    }

    #[tokio::test]
    async fn failed_saga_handler_runs_its_cancel_and_surfaces_error() {
        let (dispatcher, ctx, recorder) = setup(true);

        let outcome = dispatcher
            .dispatch(&ctx, &ping("2"), &CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(outcome, DispatchOutcome::Aborted { .. }));
        assert_eq!(recorder.calls(), ["pong:2", "unpong:2"]);
        match outcome.into_result() {
            Err(DispatchError::HandlerExecution { handler, level, .. }) => {
                assert_eq!(handler, "pong");
                assert_eq!(level, FailureLevel::Throw);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unregistered_event_is_rejected() {
        let dispatcher = Dispatcher::new(Arc::new(RelationNetwork::new()));
        let err = dispatcher
            .publish(&DispatchContext::default(), &ping("3"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::NoHandlerRegistered { .. }));
    }

    #[tokio::test]
    async fn integration_event_is_misrouted() {
        let dispatcher = Dispatcher::new(Arc::new(RelationNetwork::new()));
        let err = dispatcher
            .publish(&DispatchContext::default(), &Exported, &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            DispatchError::MisroutedEvent { event_type } => assert!(event_type.ends_with("Exported")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_service_fails_the_handler() {
        let network = Arc::new(RelationNetwork::new());
        network.add(
            EventType::of::<Pinged>(),
            HandlerBinding::new(HandlerDescriptor::handler::<Pinged, Pong>("pong")),
        );
        network.build().unwrap();
        let dispatcher = Dispatcher::new(network);
        let services = ServiceProvider::new();

        assert_eq!(dispatcher.unresolved_handler_types(&services).len(), 1);

        let outcome = dispatcher
            .dispatch(
                &DispatchContext::new(Arc::new(services)),
                &ping("4"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        match outcome {
            DispatchOutcome::Escalated {
                error: DispatchError::HandlerExecution { source, .. },
                compensation_error: None,
            } => assert!(matches!(
                source.downcast_ref::<DispatchError>(),
                Some(DispatchError::HandlerNotResolved { .. })
            )),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn fallback_options_default_to_single_attempt() {
        let config = DispatcherConfig::builder().build();
        assert_eq!(config.fallback_options.attempts(), 1);
        assert_eq!(config, DispatcherConfig::default());
    }
}
