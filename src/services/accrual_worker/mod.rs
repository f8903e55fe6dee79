//! Accrual reconciliation worker.
//!
//! Polls the accrual service for every order that is not yet resolved and
//! feeds the answers into [`LoyaltyService::process_order`].
//!
//! ## Tick
//!
//! 1. Read the PROCESSING batch (orders claimed on an earlier tick).
//! 2. Read the NEW batch. Each NEW order is moved to PROCESSING by its task
//!    before the accrual service is asked about it.
//! 3. Spawn one task per order and wait for all of them.
//!
//! Reading PROCESSING first means an order claimed during this tick cannot
//! show up in both batches. An order whose reconciliation is still running
//! (for example a concurrent `run_once`) is skipped.
//!
//! A failed task leaves its order as it was; the next tick retries it.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use backon::Retryable;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::interfaces::AccrualClient;
use crate::model::{Order, OrderStatus};
use crate::services::loyalty::{LoyaltyService, ServiceError};
use crate::utils::retry::store_backoff;

/// Counters for one tick.
///
/// `picked_up` counts spawned tasks; each ends up in exactly one of
/// `resolved`, `unchanged` or `failed`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickSummary {
    pub picked_up: usize,
    pub resolved: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Result of reconciling one order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    /// Order reached a terminal status.
    Resolved,
    /// No update from the accrual service yet.
    Unchanged,
    Failed,
}

type InFlight = Arc<Mutex<HashSet<Uuid>>>;

/// Marks an order as being reconciled until dropped.
struct InFlightGuard {
    in_flight: InFlight,
    order_id: Uuid,
}

impl InFlightGuard {
    fn acquire(in_flight: &InFlight, order_id: Uuid) -> Option<Self> {
        let inserted = in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(order_id);
        inserted.then(|| Self {
            in_flight: in_flight.clone(),
            order_id,
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.order_id);
    }
}

/// Periodic order-accrual reconciler.
pub struct AccrualWorker {
    service: LoyaltyService,
    client: Arc<dyn AccrualClient>,
    poll_interval: Duration,
    in_flight: InFlight,
}

impl AccrualWorker {
    pub fn new(
        service: LoyaltyService,
        client: Arc<dyn AccrualClient>,
        config: &WorkerConfig,
    ) -> Self {
        Self {
            service,
            client,
            poll_interval: config.poll_interval(),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Run exactly one tick and wait for all of its tasks.
    pub async fn run_once(&self) -> TickSummary {
        let mut summary = TickSummary::default();

        let processing = self.load_batch(OrderStatus::Processing).await;
        let new_orders = self.load_batch(OrderStatus::New).await;

        let mut tasks = JoinSet::new();
        for order in new_orders.into_iter().chain(processing) {
            let Some(guard) = InFlightGuard::acquire(&self.in_flight, order.id) else {
                debug!(order = %order.number, "Order already in flight, skipping");
                summary.skipped += 1;
                continue;
            };

            summary.picked_up += 1;
            let service = self.service.clone();
            let client = self.client.clone();
            tasks.spawn(async move {
                let _guard = guard;
                reconcile(service, client, order).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Outcome::Resolved) => summary.resolved += 1,
                Ok(Outcome::Unchanged) => summary.unchanged += 1,
                Ok(Outcome::Failed) => summary.failed += 1,
                Err(e) => {
                    error!(error = %e, "Reconciliation task panicked");
                    summary.failed += 1;
                }
            }
        }

        summary
    }

    async fn load_batch(&self, status: OrderStatus) -> Vec<Order> {
        match self.service.orders_with_status(status).await {
            Ok(orders) => orders,
            Err(e) => {
                error!(status = %status, error = %e, "Failed to load orders");
                Vec::new()
            }
        }
    }

    /// Start ticking in the background until the handle is stopped.
    ///
    /// The first tick runs immediately.
    pub fn spawn(self: Arc<Self>) -> AccrualWorkerHandle {
        let (cancel_tx, mut cancel_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            info!(
                poll_interval = ?self.poll_interval,
                "Accrual worker started"
            );

            let mut ticker = interval(self.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                // Stop wins over a due tick.
                tokio::select! {
                    biased;

                    changed = cancel_rx.changed() => {
                        if changed.is_err() || *cancel_rx.borrow() {
                            info!("Accrual worker stopped");
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if *cancel_rx.borrow() {
                            info!("Accrual worker stopped");
                            break;
                        }
                        let summary = self.run_once().await;
                        if summary.picked_up > 0 || summary.skipped > 0 {
                            info!(
                                picked_up = summary.picked_up,
                                resolved = summary.resolved,
                                unchanged = summary.unchanged,
                                failed = summary.failed,
                                skipped = summary.skipped,
                                "Accrual tick complete"
                            );
                        } else {
                            debug!("Accrual tick found no pending orders");
                        }
                    }
                }
            }
        });

        AccrualWorkerHandle {
            cancel: cancel_tx,
            task,
        }
    }
}

/// Handle for a spawned [`AccrualWorker`].
pub struct AccrualWorkerHandle {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl AccrualWorkerHandle {
    /// Signal the worker to stop. A tick already running still completes.
    pub fn stop(&self) {
        let _ = self.cancel.send(true);
    }

    /// Stop the worker and wait for it to exit.
    pub async fn shutdown(self) {
        self.stop();
        if let Err(e) = self.task.await {
            error!(error = %e, "Accrual worker task failed");
        }
    }
}

/// Bring one order up to date with the accrual service.
async fn reconcile(service: LoyaltyService, client: Arc<dyn AccrualClient>, order: Order) -> Outcome {
    if order.status == OrderStatus::New {
        let claimed = (|| async { service.start_processing(&order).await })
            .retry(store_backoff())
            .when(ServiceError::is_transient)
            .await;
        if let Err(e) = claimed {
            warn!(order = %order.number, error = %e, "Failed to mark order as processing");
            return Outcome::Failed;
        }
    }

    let response = match client.fetch_order(&order.number).await {
        Ok(Some(response)) => response,
        Ok(None) => {
            debug!(order = %order.number, "No accrual data yet");
            return Outcome::Unchanged;
        }
        Err(e) => {
            warn!(order = %order.number, error = %e, "Accrual lookup failed");
            return Outcome::Failed;
        }
    };

    if response.status.is_pending() {
        debug!(order = %order.number, status = %response.status, "Order still pending upstream");
        return Outcome::Unchanged;
    }

    let accrual = response.accrual.unwrap_or(0.0);
    let applied = (|| async {
        service
            .process_order(order.id, response.status, accrual)
            .await
    })
    .retry(store_backoff())
    .when(ServiceError::is_transient)
    .await;

    match applied {
        Ok(updated) => {
            debug!(order = %updated.number, status = %updated.status, "Order reconciled");
            Outcome::Resolved
        }
        Err(e) => {
            error!(order = %order.number, error = %e, "Failed to record accrual result");
            Outcome::Failed
        }
    }
}
