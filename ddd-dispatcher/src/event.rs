use std::any::{TypeId, type_name};
use std::fmt;
use std::hash::{Hash, Hasher};

/// 可在进程内分发的事件
///
/// - `event_id`：消息标识，用于审计日志；
/// - `is_integration_event`：跨进程（集成）事件应走集成事件总线，
///   若在进程内分发且未注册处理器，将以 `MisroutedEvent` 拒绝。
pub trait Event: fmt::Debug + Send + Sync + 'static {
    /// 事件唯一标识
    fn event_id(&self) -> &str;

    /// 是否为跨进程（集成）事件
    fn is_integration_event(&self) -> bool {
        false
    }
}

/// 事件类型标签：以 `TypeId` 判等与哈希，名称仅用于日志与错误信息
#[derive(Clone, Copy)]
pub struct EventType {
    id: TypeId,
    name: &'static str,
}

impl EventType {
    pub fn of<E: Event>() -> Self {
        Self {
            id: TypeId::of::<E>(),
            name: type_name::<E>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for EventType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for EventType {}

impl Hash for EventType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}
