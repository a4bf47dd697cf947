use bon::Builder;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId, type_name};
use std::sync::Arc;

/// 发布方的业务语境，只用于日志关联与审计
///
/// 分发过程不读取其中的业务含义：`correlation_id` 写入每条分发日志，
/// 主体信息在发布日志中标明由谁触发。
#[derive(Builder, Default, Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusinessContext {
    correlation_id: Option<String>,
    /// 主体类型，如 `user`、`system`
    actor_type: Option<String>,
    actor_id: Option<String>,
}

impl BusinessContext {
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn actor_type(&self) -> Option<&str> {
        self.actor_type.as_deref()
    }

    pub fn actor_id(&self) -> Option<&str> {
        self.actor_id.as_deref()
    }
}

/// 服务提供者
///
/// - 通过 TypeId 注册处理器实例，调用时按描述符的实例类型取回；
/// - 依赖注入本身在外部完成，这里只承担“根据类型给出活实例”的职责。
#[derive(Default)]
pub struct ServiceProvider {
    services: DashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl ServiceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册（或替换）某一类型的实例
    pub fn insert<T>(&self, service: Arc<T>)
    where
        T: Send + Sync + 'static,
    {
        self.services.insert(TypeId::of::<T>(), service);
    }

    /// 链式注册，便于启动阶段组装
    pub fn with<T>(self, service: Arc<T>) -> Self
    where
        T: Send + Sync + 'static,
    {
        self.insert(service);
        self
    }

    pub fn get<T>(&self) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        let service = self.services.get(&TypeId::of::<T>())?.value().clone();
        // 键与值同源于泛型 T，正常情况下 downcast 不会失败
        service.downcast::<T>().ok()
    }

    pub fn contains(&self, id: TypeId) -> bool {
        self.services.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl std::fmt::Debug for ServiceProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceProvider")
            .field("services", &self.services.len())
            .finish()
    }
}

/// 一次分发调用的上下文
///
/// 承载分发所需的横切信息：
/// - 业务语境（`BusinessContext`）：关联追踪 `correlation_id`、因果链等，写入审计日志；
/// - 服务提供者（`ServiceProvider`）：处理器实例的解析来源。
#[derive(Clone, Debug, Default)]
pub struct DispatchContext {
    /// 业务语境（链路追踪、审计主体、操作因果）
    pub biz: BusinessContext,
    /// 处理器实例的解析来源
    pub services: Arc<ServiceProvider>,
}

impl DispatchContext {
    pub fn new(services: Arc<ServiceProvider>) -> Self {
        Self {
            biz: BusinessContext::default(),
            services,
        }
    }

    pub fn with_business(mut self, biz: BusinessContext) -> Self {
        self.biz = biz;
        self
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.biz.correlation_id()
    }

    /// 解析处理器实例，失败时返回实例类型名称以便报错
    pub fn resolve<T>(&self) -> Result<Arc<T>, &'static str>
    where
        T: Send + Sync + 'static,
    {
        self.services.get::<T>().ok_or(type_name::<T>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Inventory(u32);
    #[derive(Debug)]
    struct Billing;

    #[test]
    fn provider_resolves_registered_instances_by_type() {
        let services = ServiceProvider::new().with(Arc::new(Inventory(7)));

        assert_eq!(services.get::<Inventory>().map(|i| i.0), Some(7));
        assert!(services.get::<Billing>().is_none());
        assert!(services.contains(TypeId::of::<Inventory>()));
        assert_eq!(services.len(), 1);
    }

    #[test]
    fn insert_replaces_previous_instance() {
        let services = ServiceProvider::new();
        services.insert(Arc::new(Inventory(1)));
        services.insert(Arc::new(Inventory(2)));

        assert_eq!(services.get::<Inventory>().map(|i| i.0), Some(2));
        assert_eq!(services.len(), 1);
    }

    #[test]
    fn context_resolve_reports_missing_type_name() {
        let ctx = DispatchContext::new(Arc::new(ServiceProvider::new())).with_business(
            BusinessContext::builder()
                .correlation_id("cor-1".to_string())
                .build(),
        );

        let missing = ctx.resolve::<Billing>().unwrap_err();
        assert!(missing.ends_with("Billing"));
        assert_eq!(ctx.correlation_id(), Some("cor-1"));
    }

    #[test]
    fn missing_instance_reports_type_without_panicking() {
        let ctx = DispatchContext::default();

        match ctx.resolve::<Billing>() {
            Err(instance_type) => assert_eq!(instance_type, type_name::<Billing>()),
            Ok(billing) => panic!("unexpected instance: {billing:?}"),
        }
    }

    #[test]
    fn business_context_reads_partial_json() {
        let biz: BusinessContext =
            serde_json::from_str(r#"{ "correlation_id": "cor-9", "actor_type": "system" }"#)
                .unwrap();

        assert_eq!(biz.correlation_id(), Some("cor-9"));
        assert_eq!(biz.actor_type(), Some("system"));
        assert_eq!(biz.actor_id(), None);
    }
}
