use std::sync::Arc;

use tracing::warn;

use crate::engine::assignment::AssignmentDispatcher;
use crate::error::AppError;
use crate::geo;
use crate::models::drone::Drone;
use crate::models::order::{
    CreateOrderRequest, Order, OrderDetails, OrderListFilters, UpdateRouteRequest,
};
use crate::models::pagination::Pagination;
use crate::store::{DroneStore, OrderStore};

/// Owns the order lifecycle. Every multi-step operation runs in one
/// transaction; when both rows are involved the order row is locked before
/// the drone row. Side effects (assignment scheduling) happen after commit.
#[derive(Clone)]
pub struct OrderService {
    orders: OrderStore,
    drones: DroneStore,
    dispatcher: Arc<AssignmentDispatcher>,
}

impl OrderService {
    pub fn new(
        orders: OrderStore,
        drones: DroneStore,
        dispatcher: Arc<AssignmentDispatcher>,
    ) -> Self {
        Self {
            orders,
            drones,
            dispatcher,
        }
    }

    pub async fn create(&self, req: CreateOrderRequest) -> Result<Order, AppError> {
        let order = Order::new(req);
        let created = self.orders.insert(&order).await?;

        self.dispatcher.schedule(created.clone());

        Ok(created)
    }

    pub async fn cancel(&self, user_id: i64, order_id: i64) -> Result<Order, AppError> {
        let mut tx = self.orders.begin().await?;

        let mut order = self.orders.get_for_update(&mut tx, order_id).await?;
        order.belongs_to(user_id)?;
        order.cancel()?;

        let updated = self.orders.update(&mut tx, &order).await?;
        tx.commit().await?;

        self.dispatcher.schedule_if_pending(&updated);

        Ok(updated)
    }

    /// Snapshot read. A failure reading the assigned drone degrades to "no
    /// drone info" instead of failing the whole request.
    pub async fn get(&self, user_id: i64, order_id: i64) -> Result<OrderDetails, AppError> {
        let order = self.orders.get(order_id).await?;
        order.belongs_to(user_id)?;

        let drone = match order.assigned_drone_id {
            Some(drone_id) => match self.drones.get(drone_id).await {
                Ok(drone) => Some(drone),
                Err(err) => {
                    warn!(
                        order_id,
                        drone_id,
                        error = %err,
                        "failed to read assigned drone"
                    );
                    None
                }
            },
            None => None,
        };

        Ok(OrderDetails {
            drone_location: drone.as_ref().map(Drone::position),
            eta_minutes: drone.as_ref().map(|d| geo::eta_minutes(d, &order)),
            order,
        })
    }

    /// The committing act of assignment: both rows flip together or not at
    /// all.
    pub async fn reserve(&self, drone_id: i64, order_id: i64) -> Result<Order, AppError> {
        let mut tx = self.orders.begin().await?;

        let mut order = self.orders.get_for_update(&mut tx, order_id).await?;
        let mut drone = self.drones.get_for_update(&mut tx, drone_id).await?;

        order.reserve(drone_id)?;
        drone.reserve(order_id)?;

        let updated = self.orders.update(&mut tx, &order).await?;
        self.drones.update(&mut tx, &drone).await?;
        tx.commit().await?;

        Ok(updated)
    }

    pub async fn pickup(&self, drone_id: i64, order_id: i64) -> Result<Order, AppError> {
        let mut tx = self.orders.begin().await?;

        let mut order = self.orders.get_for_update(&mut tx, order_id).await?;
        order.is_assigned_to(drone_id)?;
        let mut drone = self.drones.get_for_update(&mut tx, drone_id).await?;

        order.mark_picked_up()?;
        drone.start_delivery()?;

        let updated = self.orders.update(&mut tx, &order).await?;
        self.drones.update(&mut tx, &drone).await?;
        tx.commit().await?;

        Ok(updated)
    }

    pub async fn deliver(&self, drone_id: i64, order_id: i64) -> Result<Order, AppError> {
        let mut tx = self.orders.begin().await?;

        let mut order = self.orders.get_for_update(&mut tx, order_id).await?;
        order.is_assigned_to(drone_id)?;
        let mut drone = self.drones.get_for_update(&mut tx, drone_id).await?;

        order.deliver()?;
        drone.complete_delivery()?;

        let updated = self.orders.update(&mut tx, &order).await?;
        self.drones.update(&mut tx, &drone).await?;
        tx.commit().await?;

        Ok(updated)
    }

    /// Terminal: the order is not re-assigned afterwards.
    pub async fn fail(&self, drone_id: i64, order_id: i64) -> Result<Order, AppError> {
        let mut tx = self.orders.begin().await?;

        let mut order = self.orders.get_for_update(&mut tx, order_id).await?;
        order.is_assigned_to(drone_id)?;
        let mut drone = self.drones.get_for_update(&mut tx, drone_id).await?;

        order.fail()?;
        drone.fail_delivery()?;

        let updated = self.orders.update(&mut tx, &order).await?;
        self.drones.update(&mut tx, &drone).await?;
        tx.commit().await?;

        Ok(updated)
    }

    pub async fn update_route(
        &self,
        order_id: i64,
        req: UpdateRouteRequest,
    ) -> Result<Order, AppError> {
        let mut tx = self.orders.begin().await?;

        let mut order = self.orders.get_for_update(&mut tx, order_id).await?;
        order.update_route(req)?;

        let updated = self.orders.update(&mut tx, &order).await?;
        tx.commit().await?;

        Ok(updated)
    }

    pub async fn list(
        &self,
        filters: OrderListFilters,
        page: i64,
        page_size: i64,
    ) -> Result<(Vec<Order>, Pagination), AppError> {
        let pagination = Pagination::normalized(page, page_size);
        let orders = self
            .orders
            .list(&filters, pagination.page_size, pagination.offset())
            .await?;

        Ok((orders, pagination))
    }
}
