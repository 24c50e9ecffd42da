use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::models::assignment::AssignmentNotice;
use crate::models::order::Order;
use crate::observability::metrics::Metrics;
use crate::registry::SendError;
use crate::store::DroneStore;

const WORKER_POOL_SIZE: usize = 4;
const ATTEMPT_DEADLINE: Duration = Duration::from_secs(5);

/// Delivers an assignment notice to a drone. Implemented by the WebSocket
/// layer; the dispatcher stays ignorant of the wire format.
#[async_trait]
pub trait AssignmentNotifier: Send + Sync {
    async fn notify(&self, notice: AssignmentNotice) -> Result<(), SendError>;
}

/// Best-effort background assignment. Attempts run on a bounded worker pool
/// and are dropped when the pool is full; an unassigned order stays pending
/// and is retried by the next trigger.
pub struct AssignmentDispatcher {
    drones: DroneStore,
    notifier: Arc<dyn AssignmentNotifier>,
    permits: Arc<Semaphore>,
    metrics: Metrics,
}

impl AssignmentDispatcher {
    pub fn new(drones: DroneStore, notifier: Arc<dyn AssignmentNotifier>, metrics: Metrics) -> Self {
        Self {
            drones,
            notifier,
            permits: Arc::new(Semaphore::new(WORKER_POOL_SIZE)),
            metrics,
        }
    }

    /// Fire-and-forget. The attempt runs on its own task with its own
    /// deadline, detached from the caller's request lifetime.
    pub fn schedule(&self, order: Order) {
        let permit = match self.permits.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!(order_id = order.id, "assignment pool full; dropping attempt");
                self.metrics
                    .assignments_total
                    .with_label_values(&["dropped"])
                    .inc();
                return;
            }
        };

        let drones = self.drones.clone();
        let notifier = self.notifier.clone();
        let metrics = self.metrics.clone();

        tokio::spawn(async move {
            let _permit = permit;
            let start = Instant::now();

            let outcome = match timeout(
                ATTEMPT_DEADLINE,
                attempt(&drones, notifier.as_ref(), &order),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(order_id = order.id, "assignment attempt timed out");
                    "timeout"
                }
            };

            let elapsed = start.elapsed().as_secs_f64();
            metrics
                .assignment_latency_seconds
                .with_label_values(&[outcome])
                .observe(elapsed);
            metrics
                .assignments_total
                .with_label_values(&[outcome])
                .inc();
        });
    }

    pub fn schedule_if_pending(&self, order: &Order) {
        if order.status.needs_assignment() {
            self.schedule(order.clone());
        }
    }
}

async fn attempt(
    drones: &DroneStore,
    notifier: &dyn AssignmentNotifier,
    order: &Order,
) -> &'static str {
    let drone = match drones
        .find_nearest_idle(order.pickup_lat, order.pickup_lng)
        .await
    {
        Ok(Some(drone)) => drone,
        Ok(None) => {
            info!(order_id = order.id, "no idle drone available");
            return "no_drone";
        }
        Err(err) => {
            warn!(order_id = order.id, error = %err, "idle drone lookup failed");
            return "error";
        }
    };

    let notice = AssignmentNotice::new(order, &drone);
    match notifier.notify(notice).await {
        Ok(()) => {
            info!(
                order_id = order.id,
                drone_id = drone.id,
                "assignment notice sent"
            );
            "success"
        }
        Err(SendError::NotConnected) => {
            info!(
                order_id = order.id,
                drone_id = drone.id,
                "nearest idle drone not connected"
            );
            "not_connected"
        }
        Err(err) => {
            warn!(
                order_id = order.id,
                drone_id = drone.id,
                error = %err,
                "assignment notice failed"
            );
            "error"
        }
    }
}
