mod config;
mod handlers;

use config::DemoConfig;
use ddd_dispatcher::{
    BusinessContext, DispatchContext, DispatchOutcome, Dispatcher, EventType, FailureLevel,
    HandlerBinding, HandlerDescriptor, RelationNetwork, ServiceProvider,
};
use handlers::{Inventory, Mailer, OrderPlaced, OrderShipped, Payments};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn register(network: &RelationNetwork, config: &DemoConfig) {
    let configure = |descriptor: HandlerDescriptor| match config.options_for(descriptor.name()) {
        Some(options) => descriptor.with_options(options),
        None => descriptor,
    };
    let ty = EventType::of::<OrderPlaced>();

    network.add(
        ty,
        HandlerBinding::new(configure(HandlerDescriptor::handler::<OrderPlaced, Inventory>(
            "Reserve",
        ))),
    );
    network.add(
        ty,
        HandlerBinding::new(configure(HandlerDescriptor::handler::<OrderPlaced, Payments>(
            "Charge",
        )))
        .with_compensator(configure(
            HandlerDescriptor::compensator::<OrderPlaced, Inventory>("Unreserve"),
        )),
    );
    network.add(
        ty,
        HandlerBinding::new(configure(
            HandlerDescriptor::handler::<OrderPlaced, Mailer>("Notify")
                .with_failure_level(FailureLevel::Ignore),
        )),
    );
    // 审计先于所有业务处理器执行
    network.add(
        ty,
        HandlerBinding::new(
            HandlerDescriptor::from_fn::<OrderPlaced, _>("Audit", |ctx, event, _cancel| {
                Box::pin(async move {
                    info!(
                        order = %event.id,
                        actor = ctx.biz.actor_id().unwrap_or("-"),
                        "order placed"
                    );
                    anyhow::Ok(())
                })
            })
            .with_order(-10)
            .with_failure_level(FailureLevel::Ignore),
        ),
    );
}

fn report(id: &str, outcome: DispatchOutcome) {
    match outcome {
        DispatchOutcome::Completed { ignored_failures } => {
            info!(order = id, ignored_failures, "dispatch completed")
        }
        DispatchOutcome::Aborted { error } => {
            warn!(order = id, error = %error, "dispatch aborted, compensation completed")
        }
        DispatchOutcome::Escalated {
            error,
            compensation_error,
        } => error!(
            order = id,
            error = %error,
            compensation_error = ?compensation_error.map(|e| e.to_string()),
            "dispatch escalated"
        ),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,ddd_dispatcher=debug")),
        )
        .init();

    let config = DemoConfig::load()?;
    let network = RelationNetwork::shared();
    register(&network, &config);
    network.build()?;

    let inventory = Arc::new(Inventory::default());
    let services = ServiceProvider::new()
        .with(inventory.clone())
        .with(Arc::new(Payments::new(100)))
        .with(Arc::new(Mailer));

    let dispatcher = Dispatcher::shared().with_config(config.dispatcher.clone());
    let unresolved = dispatcher.unresolved_handler_types(&services);
    anyhow::ensure!(unresolved.is_empty(), "unresolved handlers: {unresolved:?}");

    let ctx = DispatchContext::new(Arc::new(services)).with_business(
        BusinessContext::builder()
            .correlation_id("cor-demo".into())
            .actor_type("user".into())
            .actor_id("u-1".into())
            .build(),
    );
    let cancel = CancellationToken::new();

    let orders = [
        // 网关首次不可用，重试后成功
        ("order-1", 2, 40),
        // 邮件失败被忽略，链路完成
        ("order-2", 20, 60),
        // 超过额度，释放库存后上抛
        ("order-3", 1, 400),
    ];
    for (id, quantity, amount) in orders {
        let event = OrderPlaced {
            id: id.to_string(),
            sku: "sku-1".to_string(),
            quantity,
            amount,
        };
        report(id, dispatcher.dispatch(&ctx, &event, &cancel).await?);
    }
    info!(sku = "sku-1", reserved = inventory.reserved("sku-1"), "inventory");

    let shipped = OrderShipped {
        id: "order-1".to_string(),
    };
    if let Err(err) = dispatcher.publish(&ctx, &shipped, &cancel).await {
        warn!(error = %err, "integration event rejected");
    }

    cancel.cancel();
    let late = OrderPlaced {
        id: "order-4".to_string(),
        sku: "sku-1".to_string(),
        quantity: 1,
        amount: 10,
    };
    report("order-4", dispatcher.dispatch(&ctx, &late, &cancel).await?);

    Ok(())
}
