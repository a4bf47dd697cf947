//! 事件处理器（EventHandler）与注册描述
//!
//! - `EventHandler` / `SagaEventHandler`：面向业务的处理与补偿协议；
//! - `HandlerDescriptor`：注册期的处理器描述（名称、实例类型、顺序、执行策略配置、失败等级），
//!   内部以类型擦除的方式保存调用入口；
//! - `HandlerBinding`：某一事件类型上的一条绑定，即“前向处理器 + 有序补偿器”。
//!
use crate::context::DispatchContext;
use crate::error::DispatchError;
use crate::event::Event;
use crate::strategy::StrategyOptions;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId, type_name};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// 失败等级：注册时声明，决定失败后链路是继续还是中止
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureLevel {
    /// 中止链路并抛出（若声明了补偿器则先执行补偿）
    #[default]
    Throw,
    /// 中止链路、执行补偿后抛出
    ThrowAndCancel,
    /// 记录日志后继续执行后续处理器，不触发补偿
    Ignore,
}

impl FailureLevel {
    pub fn is_ignorable(self) -> bool {
        matches!(self, FailureLevel::Ignore)
    }
}

/// 事件处理器：处理某一类型的事件
#[async_trait]
pub trait EventHandler<E>: Send + Sync
where
    E: Event,
{
    async fn handle(
        &self,
        ctx: &DispatchContext,
        event: &E,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()>;
}

/// Saga 处理器：在 `handle` 之外提供失败时的补偿入口
#[async_trait]
pub trait SagaEventHandler<E>: EventHandler<E>
where
    E: Event,
{
    async fn cancel(
        &self,
        ctx: &DispatchContext,
        event: &E,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()>;
}

pub type HandlerFuture<'a> = BoxFuture<'a, anyhow::Result<()>>;

type HandlerFn = Arc<
    dyn for<'a> Fn(
            &'a DispatchContext,
            &'a (dyn Any + Send + Sync),
            CancellationToken,
        ) -> HandlerFuture<'a>
        + Send
        + Sync,
>;

/// 处理器所属的实例类型（用于从服务提供者解析与启动期校验）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct InstanceType {
    pub id: TypeId,
    pub name: &'static str,
}

impl InstanceType {
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }
}

/// 处理器描述符
///
/// 注册期创建，构建关系网络后不可变。`options` 为空时由分发器的兜底配置决定
/// （默认仅执行一次、不重试）。
#[derive(Clone)]
pub struct HandlerDescriptor {
    name: String,
    instance_type: Option<InstanceType>,
    order: i32,
    options: Option<StrategyOptions>,
    failure_level: FailureLevel,
    invoke: HandlerFn,
}

impl HandlerDescriptor {
    /// 以 `EventHandler::handle` 为入口，调用时从上下文的服务提供者解析 `H`
    pub fn handler<E, H>(name: impl Into<String>) -> Self
    where
        E: Event,
        H: EventHandler<E> + 'static,
    {
        let name = name.into();
        let handler_name = name.clone();

        let invoke = handler_fn(move |ctx, event, cancel| {
            let handler_name = handler_name.clone();

            Box::pin(async move {
                let event = downcast_event::<E>(event)?;
                let handler = resolve::<H>(ctx, handler_name)?;
                handler.handle(ctx, event, &cancel).await
            })
        });

        Self::with_invoke(name, Some(InstanceType::of::<H>()), invoke)
    }

    /// 以 `SagaEventHandler::cancel` 为入口的补偿器
    pub fn compensator<E, H>(name: impl Into<String>) -> Self
    where
        E: Event,
        H: SagaEventHandler<E> + 'static,
    {
        let name = name.into();
        let handler_name = name.clone();

        let invoke = handler_fn(move |ctx, event, cancel| {
            let handler_name = handler_name.clone();

            Box::pin(async move {
                let event = downcast_event::<E>(event)?;
                let handler = resolve::<H>(ctx, handler_name)?;
                handler.cancel(ctx, event, &cancel).await
            })
        });

        Self::with_invoke(name, Some(InstanceType::of::<H>()), invoke)
    }

    /// 无状态闭包处理器，不经服务提供者解析
    pub fn from_fn<E, F>(name: impl Into<String>, f: F) -> Self
    where
        E: Event,
        F: for<'a> Fn(&'a DispatchContext, &'a E, CancellationToken) -> HandlerFuture<'a>
            + Send
            + Sync
            + 'static,
    {
        let f = Arc::new(f);

        let invoke = handler_fn(move |ctx, event, cancel| {
            let f = f.clone();

            Box::pin(async move {
                let event = downcast_event::<E>(event)?;
                f(ctx, event, cancel).await
            })
        });

        Self::with_invoke(name.into(), None, invoke)
    }

    fn with_invoke(name: String, instance_type: Option<InstanceType>, invoke: HandlerFn) -> Self {
        Self {
            name,
            instance_type,
            order: 0,
            options: None,
            failure_level: FailureLevel::default(),
            invoke,
        }
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    pub fn with_options(mut self, options: StrategyOptions) -> Self {
        self.options = Some(options);
        self
    }

    pub fn with_failure_level(mut self, level: FailureLevel) -> Self {
        self.failure_level = level;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instance_type(&self) -> Option<InstanceType> {
        self.instance_type
    }

    pub fn order(&self) -> i32 {
        self.order
    }

    pub fn options(&self) -> Option<&StrategyOptions> {
        self.options.as_ref()
    }

    pub fn failure_level(&self) -> FailureLevel {
        self.failure_level
    }

    /// 调用处理器；事件以 `Any` 传入，内部还原为具体类型
    pub fn invoke<'a>(
        &self,
        ctx: &'a DispatchContext,
        event: &'a (dyn Any + Send + Sync),
        cancel: CancellationToken,
    ) -> HandlerFuture<'a> {
        (self.invoke)(ctx, event, cancel)
    }
}

impl fmt::Debug for HandlerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("name", &self.name)
            .field("instance_type", &self.instance_type.map(|t| t.name))
            .field("order", &self.order)
            .field("options", &self.options)
            .field("failure_level", &self.failure_level)
            .finish()
    }
}

// 通过高阶生命周期约束推导闭包签名，使返回的 Future 可借用入参
fn handler_fn<F>(f: F) -> HandlerFn
where
    F: for<'a> Fn(
            &'a DispatchContext,
            &'a (dyn Any + Send + Sync),
            CancellationToken,
        ) -> HandlerFuture<'a>
        + Send
        + Sync
        + 'static,
{
    Arc::new(f)
}

fn downcast_event<E: Event>(event: &(dyn Any + Send + Sync)) -> Result<&E, DispatchError> {
    event.downcast_ref::<E>().ok_or(DispatchError::TypeMismatch {
        expected: type_name::<E>(),
    })
}

fn resolve<H>(ctx: &DispatchContext, handler: String) -> Result<Arc<H>, DispatchError>
where
    H: Send + Sync + 'static,
{
    ctx.resolve::<H>()
        .map_err(|instance_type| DispatchError::HandlerNotResolved {
            handler,
            instance_type,
        })
}

/// 事件类型上的一条绑定：前向处理器 + 仅在其失败时执行的有序补偿器
#[derive(Clone, Debug)]
pub struct HandlerBinding {
    handler: HandlerDescriptor,
    compensators: Vec<HandlerDescriptor>,
}

impl HandlerBinding {
    pub fn new(handler: HandlerDescriptor) -> Self {
        Self {
            handler,
            compensators: Vec::new(),
        }
    }

    /// 以同一 Saga 处理器的 `handle` 与 `cancel` 组成绑定
    pub fn saga<E, H>(name: impl Into<String>) -> Self
    where
        E: Event,
        H: SagaEventHandler<E> + 'static,
    {
        let name = name.into();
        let compensator = HandlerDescriptor::compensator::<E, H>(format!("{name}.cancel"));
        Self::new(HandlerDescriptor::handler::<E, H>(name)).with_compensator(compensator)
    }

    pub fn with_compensator(mut self, compensator: HandlerDescriptor) -> Self {
        self.compensators.push(compensator);
        self
    }

    /// 调整前向处理器的声明（顺序、策略配置、失败等级）
    pub fn map_handler(mut self, f: impl FnOnce(HandlerDescriptor) -> HandlerDescriptor) -> Self {
        self.handler = f(self.handler);
        self
    }

    pub fn handler(&self) -> &HandlerDescriptor {
        &self.handler
    }

    pub fn compensators(&self) -> &[HandlerDescriptor] {
        &self.compensators
    }

    pub fn order(&self) -> i32 {
        self.handler.order
    }
}
