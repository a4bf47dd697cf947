//! 进程内事件分发（ddd-dispatcher）
//!
//! 将一次发布的事件按注册顺序交给已绑定的处理器执行：
//! - 关系网络（`relation`）：事件类型 → 有序绑定，构建一次、此后只读；
//! - 执行策略（`strategy`）：单个处理器的重试/退避/超时，并把失败交给调用方决策；
//! - 分发器（`dispatcher`）：顺序执行、可忽略失败继续、不可忽略失败时执行
//!   失败绑定自身的补偿器并上抛原始错误。
//!
//! 处理器发现（扫描/反射）、依赖注入容器与跨进程事件传输均不在本 crate 范围内：
//! 启动代码通过 `RelationNetwork::add` 注册绑定，通过 `ServiceProvider` 提供实例。
//!
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod handler;
pub mod relation;
pub mod strategy;

pub use context::{BusinessContext, DispatchContext, ServiceProvider};
pub use dispatcher::{DispatchOutcome, Dispatcher, DispatcherConfig};
pub use error::{DispatchError, DispatchResult};
pub use event::{Event, EventType};
pub use handler::{
    EventHandler, FailureLevel, HandlerBinding, HandlerDescriptor, InstanceType, SagaEventHandler,
};
pub use relation::RelationNetwork;
pub use strategy::{
    BackoffPolicy, DefaultExecutionStrategy, ExecutionStrategy, FailureSignal, Flow,
    StrategyOptions,
};
