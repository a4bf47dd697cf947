use async_trait::async_trait;
use ddd_dispatcher::{DispatchContext, Event, EventHandler, SagaEventHandler};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Clone)]
pub struct OrderPlaced {
    pub id: String,
    pub sku: String,
    pub quantity: u32,
    pub amount: u64,
}

impl Event for OrderPlaced {
    fn event_id(&self) -> &str {
        &self.id
    }
}

/// 跨进程事件：误投递到进程内分发器时被拒绝
#[derive(Debug)]
pub struct OrderShipped {
    pub id: String,
}

impl Event for OrderShipped {
    fn event_id(&self) -> &str {
        &self.id
    }

    fn is_integration_event(&self) -> bool {
        true
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("payment gateway unavailable")]
    GatewayUnavailable,
    #[error("card declined: amount={amount}, limit={limit}")]
    Declined { amount: u64, limit: u64 },
}

#[derive(Debug, thiserror::Error)]
#[error("mail relay rejected message for order {order_id}")]
pub struct MailError {
    pub order_id: String,
}

/// 库存：预留与释放（Saga 处理器）
#[derive(Default)]
pub struct Inventory {
    reserved: Mutex<HashMap<String, u32>>,
}

impl Inventory {
    pub fn reserved(&self, sku: &str) -> u32 {
        self.reserved
            .lock()
            .map(|m| m.get(sku).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    fn adjust(&self, sku: &str, delta: i64) -> anyhow::Result<u32> {
        let mut reserved = self
            .reserved
            .lock()
            .map_err(|_| anyhow::anyhow!("inventory lock poisoned"))?;
        let entry = reserved.entry(sku.to_string()).or_default();
        *entry = u32::try_from(i64::from(*entry) + delta)?;
        Ok(*entry)
    }
}

#[async_trait]
impl EventHandler<OrderPlaced> for Inventory {
    async fn handle(
        &self,
        _ctx: &DispatchContext,
        event: &OrderPlaced,
        _cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        let total = self.adjust(&event.sku, i64::from(event.quantity))?;
        info!(order = %event.id, sku = %event.sku, total, "stock reserved");
        Ok(())
    }
}

#[async_trait]
impl SagaEventHandler<OrderPlaced> for Inventory {
    async fn cancel(
        &self,
        _ctx: &DispatchContext,
        event: &OrderPlaced,
        _cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        let total = self.adjust(&event.sku, -i64::from(event.quantity))?;
        info!(order = %event.id, sku = %event.sku, total, "stock released");
        Ok(())
    }
}

/// 支付：网关首次调用不可用，重试后恢复；超过额度直接拒绝
pub struct Payments {
    limit: u64,
    calls: AtomicU32,
}

impl Payments {
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl EventHandler<OrderPlaced> for Payments {
    async fn handle(
        &self,
        _ctx: &DispatchContext,
        event: &OrderPlaced,
        _cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(PaymentError::GatewayUnavailable.into());
        }
        if event.amount > self.limit {
            return Err(PaymentError::Declined {
                amount: event.amount,
                limit: self.limit,
            }
            .into());
        }
        info!(order = %event.id, amount = event.amount, "payment captured");
        Ok(())
    }
}

/// 通知：邮件服务对大额订单拒收，失败可忽略
pub struct Mailer;

#[async_trait]
impl EventHandler<OrderPlaced> for Mailer {
    async fn handle(
        &self,
        _ctx: &DispatchContext,
        event: &OrderPlaced,
        _cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        if event.quantity > 10 {
            return Err(MailError {
                order_id: event.id.clone(),
            }
            .into());
        }
        info!(order = %event.id, "confirmation sent");
        Ok(())
    }
}
