use async_trait::async_trait;
use ddd_dispatcher::{
    BusinessContext, DispatchContext, DispatchOutcome, Dispatcher, Event, EventHandler, EventType,
    FailureLevel, HandlerBinding, HandlerDescriptor, RelationNetwork, SagaEventHandler,
    ServiceProvider,
};
use futures_util::FutureExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct OrderPlaced {
    id: String,
    amount: u64,
}

impl Event for OrderPlaced {
    fn event_id(&self) -> &str {
        &self.id
    }
}

struct Inventory;

#[async_trait]
impl EventHandler<OrderPlaced> for Inventory {
    async fn handle(
        &self,
        _ctx: &DispatchContext,
        event: &OrderPlaced,
        _cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        println!("Reserve: order={}", event.id);
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
        println!("Unreserve: order={}", event.id);
        Ok(())
    }
}

struct Payments {
    limit: u64,
}

#[async_trait]
impl EventHandler<OrderPlaced> for Payments {
    async fn handle(
        &self,
        _ctx: &DispatchContext,
        event: &OrderPlaced,
        _cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        println!("Charge: order={}, amount={}", event.id, event.amount);
        anyhow::ensure!(event.amount <= self.limit, "amount {} over limit", event.amount);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let ty = EventType::of::<OrderPlaced>();
    let network = RelationNetwork::shared();

    network.add(
        ty,
        HandlerBinding::new(HandlerDescriptor::handler::<OrderPlaced, Inventory>("Reserve")),
    );
    network.add(
        ty,
        HandlerBinding::new(HandlerDescriptor::handler::<OrderPlaced, Payments>("Charge"))
            .with_compensator(HandlerDescriptor::compensator::<OrderPlaced, Inventory>(
                "Unreserve",
            )),
    );
    network.add(
        ty,
        HandlerBinding::new(
            HandlerDescriptor::from_fn::<OrderPlaced, _>("Notify", |_ctx, event, _cancel| {
                async move {
                    println!("Notify: order={}", event.id);
                    anyhow::Ok(())
                }
                .boxed()
            })
            .with_failure_level(FailureLevel::Ignore),
        ),
    );
    network.build()?;

    let services = ServiceProvider::new()
        .with(Arc::new(Inventory))
        .with(Arc::new(Payments { limit: 100 }));
    let dispatcher = Dispatcher::shared();
    assert!(dispatcher.unresolved_handler_types(&services).is_empty());

    let ctx = DispatchContext::new(Arc::new(services)).with_business(
        BusinessContext::builder()
            .correlation_id("cor-1".into())
            .actor_type("user".into())
            .actor_id("u-1".into())
            .build(),
    );
    let cancel = CancellationToken::new();

    for (id, amount) in [("order-1", 40), ("order-2", 400)] {
        let event = OrderPlaced {
            id: id.into(),
            amount,
        };
        match dispatcher.dispatch(&ctx, &event, &cancel).await? {
            DispatchOutcome::Completed { ignored_failures } => {
                println!("{id}: completed, ignored_failures={ignored_failures}")
            }
            DispatchOutcome::Aborted { error } => println!("{id}: compensated, error={error}"),
            DispatchOutcome::Escalated {
                error,
                compensation_error,
            } => println!("{id}: escalated, error={error}, compensation={compensation_error:?}"),
        }
    }

    Ok(())
}
