//! 分发关系网络（RelationNetwork）
//!
//! 事件类型 → 有序绑定列表的索引，生命周期分为两段：
//! - 注册期：`add` 追加绑定（不要求与 `lookup` 并发安全）；
//! - 构建后：`build` 生成不可变快照并原子替换，`lookup` 只读、无锁。
//!
//! 强制重建（`reset` + 重新注册 + `build`）整体替换快照，而不是原地修改；
//! 已经开始的分发持有旧快照的 `Arc`，不会看到中间状态。
//!
use crate::error::{DispatchError, DispatchResult};
use crate::event::EventType;
use crate::handler::{HandlerBinding, InstanceType};
use arc_swap::ArcSwap;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};
use tracing::debug;

static SHARED: OnceLock<Arc<RelationNetwork>> = OnceLock::new();

#[derive(Default)]
struct RelationSnapshot {
    by_type: HashMap<EventType, Arc<[HandlerBinding]>>,
}

pub struct RelationNetwork {
    relations: DashMap<EventType, Vec<HandlerBinding>>,
    snapshot: ArcSwap<RelationSnapshot>,
}

impl Default for RelationNetwork {
    fn default() -> Self {
        Self {
            relations: DashMap::new(),
            snapshot: ArcSwap::from_pointee(RelationSnapshot::default()),
        }
    }
}

impl RelationNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// 进程级共享网络，首次访问时惰性创建
    pub fn shared() -> Arc<RelationNetwork> {
        SHARED
            .get_or_init(|| Arc::new(RelationNetwork::new()))
            .clone()
    }

    /// 追加一条绑定；同一事件类型的绑定按追加顺序执行（`order` 相同时）
    pub fn add(&self, event_type: EventType, binding: HandlerBinding) {
        self.relations.entry(event_type).or_default().push(binding);
    }

    /// 构建不可变快照并原子发布
    ///
    /// - 每个事件类型的绑定按 `order` 稳定排序；
    /// - 同一事件类型下处理器名称重复视为冲突；
    /// - 未经 `add` 的重复构建得到等价的查询结果。
    pub fn build(&self) -> DispatchResult<()> {
        let mut by_type: HashMap<EventType, Arc<[HandlerBinding]>> =
            HashMap::with_capacity(self.relations.len());

        for entry in self.relations.iter() {
            let event_type = *entry.key();
            let mut bindings = entry.value().clone();
            bindings.sort_by_key(HandlerBinding::order);
            ensure_unique(event_type, &bindings)?;

            by_type.insert(event_type, Arc::from(bindings));
        }

        let event_types = by_type.len();
        let handlers: usize = by_type.values().map(|b| b.len()).sum();
        self.snapshot.store(Arc::new(RelationSnapshot { by_type }));
        debug!(event_types, handlers, "relation network built");

        Ok(())
    }

    /// 查询事件类型的有序绑定；未注册（或尚未构建）返回 `None`
    pub fn lookup(&self, event_type: &EventType) -> Option<Arc<[HandlerBinding]>> {
        self.snapshot.load().by_type.get(event_type).cloned()
    }

    /// 强制重新初始化：清空注册并发布空快照
    pub fn reset(&self) {
        self.relations.clear();
        self.snapshot.store(Arc::new(RelationSnapshot::default()));
        debug!("relation network reset");
    }

    /// 所有经服务提供者解析的处理器/补偿器实例类型（去重，按名称排序）
    ///
    /// 启动期据此校验服务注册是否完整；闭包处理器不在其中。
    pub fn handler_instance_types(&self) -> Vec<InstanceType> {
        let mut seen = HashSet::new();
        let mut types: Vec<InstanceType> = self
            .relations
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .iter()
                    .flat_map(|b| std::iter::once(b.handler()).chain(b.compensators()))
                    .filter_map(|d| d.instance_type())
                    .collect::<Vec<_>>()
            })
            .filter(|t| seen.insert(*t))
            .collect();

        types.sort_by_key(|t| t.name);
        types
    }

    /// 已注册的事件类型数量（注册视图）
    pub fn len(&self) -> usize {
        self.relations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }
}

fn ensure_unique(event_type: EventType, bindings: &[HandlerBinding]) -> DispatchResult<()> {
    let mut names = HashSet::with_capacity(bindings.len());
    for binding in bindings {
        if !names.insert(binding.handler().name()) {
            return Err(DispatchError::DuplicateHandler {
                event_type: event_type.name(),
                handler: binding.handler().name().to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DispatchContext;
    use crate::event::Event;
    use crate::handler::{EventHandler, HandlerDescriptor, SagaEventHandler};
    use async_trait::async_trait;
    use futures_util::FutureExt;
    use tokio_util::sync::CancellationToken;

    #[derive(Debug)]
    struct Placed;
    impl Event for Placed {
        fn event_id(&self) -> &str {
            "placed-1"
        }
    }

    #[derive(Debug)]
    struct Paid;
    impl Event for Paid {
        fn event_id(&self) -> &str {
            "paid-1"
        }
    }

    struct Ledger;

    #[async_trait]
    impl EventHandler<Placed> for Ledger {
        async fn handle(
            &self,
            _ctx: &DispatchContext,
            _event: &Placed,
            _cancel: &CancellationToken,
        ) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl SagaEventHandler<Placed> for Ledger {
        async fn cancel(
            &self,
            _ctx: &DispatchContext,
            _event: &Placed,
            _cancel: &CancellationToken,
        ) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn noop(name: &str) -> HandlerBinding {
        HandlerBinding::new(HandlerDescriptor::from_fn::<Placed, _>(
            name,
            |_ctx, _event, _cancel| async { anyhow::Ok(()) }.boxed(),
        ))
    }

    fn names(bindings: &[HandlerBinding]) -> Vec<String> {
        bindings
            .iter()
            .map(|b| b.handler().name().to_string())
            .collect()
    }

    #[test]
    fn lookup_before_build_is_not_found() {
        let network = RelationNetwork::new();
        network.add(EventType::of::<Placed>(), noop("a"));

        assert!(network.lookup(&EventType::of::<Placed>()).is_none());
        network.build().unwrap();
        assert!(network.lookup(&EventType::of::<Placed>()).is_some());
        assert!(network.lookup(&EventType::of::<Paid>()).is_none());
    }

    #[test]
    fn insertion_order_is_execution_order() {
        let network = RelationNetwork::new();
        for name in ["reserve", "charge", "notify"] {
            network.add(EventType::of::<Placed>(), noop(name));
        }
        network.build().unwrap();

        let bindings = network.lookup(&EventType::of::<Placed>()).unwrap();
        assert_eq!(names(&bindings), ["reserve", "charge", "notify"]);
    }

    #[test]
    fn order_sorts_stably() {
        let network = RelationNetwork::new();
        let ty = EventType::of::<Placed>();
        network.add(ty, noop("late").map_handler(|h| h.with_order(10)));
        network.add(ty, noop("first"));
        network.add(ty, noop("early").map_handler(|h| h.with_order(-1)));
        network.add(ty, noop("second"));
        network.build().unwrap();

        let bindings = network.lookup(&ty).unwrap();
        assert_eq!(names(&bindings), ["early", "first", "second", "late"]);
    }

    #[test]
    fn build_is_idempotent() {
        let network = RelationNetwork::new();
        let ty = EventType::of::<Placed>();
        network.add(ty, noop("a"));
        network.add(ty, noop("b"));

        network.build().unwrap();
        let first = names(&network.lookup(&ty).unwrap());
        network.build().unwrap();
        let second = names(&network.lookup(&ty).unwrap());

        assert_eq!(first, second);
        assert_eq!(network.len(), 1);
    }

    #[test]
    fn duplicate_handler_names_are_rejected() {
        let network = RelationNetwork::new();
        let ty = EventType::of::<Placed>();
        network.add(ty, noop("same"));
        network.add(ty, noop("same"));

        match network.build() {
            Err(DispatchError::DuplicateHandler { handler, .. }) => assert_eq!(handler, "same"),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(network.lookup(&ty).is_none());
    }

    #[test]
    fn reset_replaces_snapshot_without_touching_loaded_views() {
        let network = RelationNetwork::new();
        let ty = EventType::of::<Placed>();
        network.add(ty, noop("old"));
        network.build().unwrap();
        let in_flight = network.lookup(&ty).unwrap();

        network.reset();
        assert!(network.lookup(&ty).is_none());
        assert!(network.is_empty());

        network.add(ty, noop("new"));
        network.build().unwrap();

        assert_eq!(names(&in_flight), ["old"]);
        assert_eq!(names(&network.lookup(&ty).unwrap()), ["new"]);
    }

    #[test]
    fn instance_types_are_distinct_and_skip_closures() {
        let network = RelationNetwork::new();
        let ty = EventType::of::<Placed>();
        network.add(ty, HandlerBinding::saga::<Placed, Ledger>("ledger"));
        network.add(
            ty,
            HandlerBinding::new(HandlerDescriptor::handler::<Placed, Ledger>("ledger.audit")),
        );
        network.add(ty, noop("closure"));

        assert_eq!(
            network.handler_instance_types(),
            vec![InstanceType::of::<Ledger>()]
        );
    }

    #[test]
    fn shared_network_is_a_single_instance() {
        assert!(Arc::ptr_eq(
            &RelationNetwork::shared(),
            &RelationNetwork::shared()
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_lookups_see_the_same_bindings() {
        let network = Arc::new(RelationNetwork::new());
        let ty = EventType::of::<Placed>();
        network.add(ty, noop("a"));
        network.add(ty, noop("b"));
        network.build().unwrap();

        let mut set = tokio::task::JoinSet::new();
        for _ in 0..64 {
            let network = network.clone();
            set.spawn(async move { names(&network.lookup(&ty).unwrap()) });
        }
        while let Some(res) = set.join_next().await {
            assert_eq!(res.unwrap(), ["a", "b"]);
        }
    }
}
