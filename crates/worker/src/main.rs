//! Worker entry point: wires the in-memory topology and runs the saga
//! services against it.

use std::time::Duration;

use event_bus::{EventBus, InMemoryEventBus, QueueBroker, SubscriptionFilter, bind_queue};
use fulfillment::events::{
    INVENTORY_RESERVATION_FAILED, INVENTORY_RESERVED, ORDER_CANCELLED, ORDER_PLACED,
    PAYMENT_SUCCEEDED, PaymentOutcomeEvent,
};
use fulfillment::{
    ChargeRequest, InventoryReservationEngine, MockPaymentGateway, PaymentProcessor,
    RefundCompensator, ShippingOrchestrator,
};
use store::{
    InMemoryInventoryStore, InMemoryPaymentStore, InMemoryRefundStore, InMemoryShipmentStore,
    InMemoryTransitionSchedule, InventoryRecord, InventoryStore,
};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use worker::{QueueWorker, WorkerConfig};

const PROGRESSION_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

async fn seed_inventory(inventory: &InMemoryInventoryStore) {
    for (sku, quantity) in [("sku-1001", 100), ("sku-1002", 50), ("sku-1003", 10)] {
        inventory
            .put(InventoryRecord::new(sku, quantity))
            .await
            .expect("seeding inventory");
    }
    tracing::info!("seeded demo inventory");
}

#[tokio::main]
async fn main() {
    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = WorkerConfig::from_env();

    // 2. Topology: bus, broker, and the order queue bound to order.placed
    let bus = InMemoryEventBus::new();
    let broker = QueueBroker::new();
    let order_queue = broker.create_queue(&config.queue_name);
    bind_queue(
        &bus,
        order_queue,
        SubscriptionFilter::detail_types([ORDER_PLACED]),
    );

    // 3. Stores and the gateway capability, injected into every handler
    let inventory = InMemoryInventoryStore::new();
    let payments = InMemoryPaymentStore::new();
    let refunds = InMemoryRefundStore::new();
    let shipments = InMemoryShipmentStore::new();
    let schedule = InMemoryTransitionSchedule::new();
    let gateway = MockPaymentGateway::new();

    seed_inventory(&inventory).await;

    // 4. Downstream consumers, each on its own subscription
    {
        let processor = PaymentProcessor::new(payments.clone(), gateway.clone(), bus.clone());
        let mut subscription = bus.subscribe(SubscriptionFilter::detail_types([INVENTORY_RESERVED]));
        tokio::spawn(async move {
            while let Some(envelope) = subscription.recv().await {
                match ChargeRequest::from_envelope(&envelope) {
                    Ok(request) => {
                        if let Err(error) = processor.handle_charge(&request).await {
                            tracing::error!(%error, "payment handler failed");
                        }
                    }
                    Err(error) => tracing::warn!(%error, "dropping malformed payment trigger"),
                }
            }
        });
    }

    {
        let compensator =
            RefundCompensator::new(payments.clone(), refunds.clone(), gateway.clone(), bus.clone());
        let mut subscription = bus.subscribe(SubscriptionFilter::detail_types([
            INVENTORY_RESERVATION_FAILED,
            ORDER_CANCELLED,
        ]));
        tokio::spawn(async move {
            while let Some(envelope) = subscription.recv().await {
                if let Err(error) = compensator.handle_failure_event(&envelope).await {
                    tracing::error!(%error, "refund handler failed");
                }
            }
        });
    }

    {
        let orchestrator =
            ShippingOrchestrator::new(shipments.clone(), schedule.clone(), bus.clone());
        let mut subscription =
            bus.subscribe(SubscriptionFilter::detail_types([PAYMENT_SUCCEEDED]));
        tokio::spawn(async move {
            while let Some(envelope) = subscription.recv().await {
                match envelope.detail_as::<PaymentOutcomeEvent>() {
                    Ok(payment) => {
                        if let Err(error) = orchestrator
                            .handle_payment_succeeded(&payment, chrono::Utc::now())
                            .await
                        {
                            tracing::error!(%error, "shipping handler failed");
                        }
                    }
                    Err(error) => tracing::warn!(%error, "dropping malformed shipping trigger"),
                }
            }
        });
    }

    // 5. Carrier-progress driver over the durable schedule
    {
        let orchestrator = ShippingOrchestrator::new(shipments, schedule, bus.clone());
        tokio::spawn(async move {
            orchestrator.run_progression(PROGRESSION_POLL_INTERVAL).await;
        });
    }

    // 6. The queue worker feeding the inventory engine
    let engine = InventoryReservationEngine::new(inventory, bus);
    let queue_worker = QueueWorker::new(broker, config, engine);
    tokio::spawn(async move {
        queue_worker.run().await;
    });

    shutdown_signal().await;
    tracing::info!("worker shut down gracefully");
}
