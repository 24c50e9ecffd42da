use std::sync::Arc;

use chrono::Utc;

use crate::engine::assignment::AssignmentDispatcher;
use crate::error::AppError;
use crate::geo::GeoPoint;
use crate::models::drone::Drone;
use crate::models::order::Order;
use crate::models::pagination::Pagination;
use crate::models::user::Role;
use crate::store::{DroneStore, OrderStore};

/// Drone-facing operations: heartbeats, breakage reports, fleet listing.
#[derive(Clone)]
pub struct DroneService {
    drones: DroneStore,
    orders: OrderStore,
    dispatcher: Arc<AssignmentDispatcher>,
}

impl DroneService {
    pub fn new(
        drones: DroneStore,
        orders: OrderStore,
        dispatcher: Arc<AssignmentDispatcher>,
    ) -> Self {
        Self {
            drones,
            orders,
            dispatcher,
        }
    }

    /// A drone may only act on itself; admins may act on any drone.
    fn authorize(actor_id: i64, actor_role: Role, drone_id: i64) -> Result<(), AppError> {
        if actor_role.is_drone() && actor_id != drone_id {
            return Err(AppError::DroneActionNotAllowed);
        }
        Ok(())
    }

    pub async fn heartbeat(&self, drone_id: i64, position: GeoPoint) -> Result<Drone, AppError> {
        let mut tx = self.drones.begin().await?;

        let mut drone = self.drones.get_for_update(&mut tx, drone_id).await?;
        drone.apply_heartbeat(position, Utc::now());

        let updated = self.drones.update(&mut tx, &drone).await?;
        tx.commit().await?;

        Ok(updated)
    }

    /// Marks the drone broken and, if it was carrying an order, hands the
    /// order back to the assignable pool in the same commit. The drone row
    /// is locked first here: its current order is only known from that row.
    pub async fn report_broken(
        &self,
        actor_id: i64,
        actor_role: Role,
        drone_id: i64,
        position: GeoPoint,
    ) -> Result<(Drone, Option<Order>), AppError> {
        Self::authorize(actor_id, actor_role, drone_id)?;

        let mut tx = self.drones.begin().await?;

        let mut drone = self.drones.get_for_update(&mut tx, drone_id).await?;
        let previous_order_id = drone.current_order_id;
        drone.report_broken(position)?;

        let mut updated_order = None;
        if let Some(order_id) = previous_order_id {
            let mut order = self.orders.get_for_update(&mut tx, order_id).await?;
            order.is_assigned_to(drone_id)?;

            if order.handoff(drone.lat, drone.lng) {
                updated_order = Some(self.orders.update(&mut tx, &order).await?);
            }
        }

        let updated_drone = self.drones.update(&mut tx, &drone).await?;
        tx.commit().await?;

        if let Some(order) = &updated_order {
            self.dispatcher.schedule(order.clone());
        }

        Ok((updated_drone, updated_order))
    }

    pub async fn report_fixed(
        &self,
        actor_id: i64,
        actor_role: Role,
        drone_id: i64,
        position: GeoPoint,
    ) -> Result<Drone, AppError> {
        Self::authorize(actor_id, actor_role, drone_id)?;

        let mut tx = self.drones.begin().await?;

        let mut drone = self.drones.get_for_update(&mut tx, drone_id).await?;
        drone.report_fixed(position)?;

        let updated = self.drones.update(&mut tx, &drone).await?;
        tx.commit().await?;

        Ok(updated)
    }

    pub async fn list(
        &self,
        page: i64,
        page_size: i64,
    ) -> Result<(Vec<Drone>, Pagination), AppError> {
        let pagination = Pagination::normalized(page, page_size);
        let drones = self
            .drones
            .list(pagination.page_size, pagination.offset())
            .await?;

        Ok((drones, pagination))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drone_may_only_act_on_itself() {
        assert!(matches!(
            DroneService::authorize(1, Role::Drone, 2),
            Err(AppError::DroneActionNotAllowed)
        ));
        assert!(DroneService::authorize(1, Role::Drone, 1).is_ok());
    }

    #[test]
    fn admin_may_act_on_any_drone() {
        assert!(DroneService::authorize(99, Role::Admin, 2).is_ok());
    }
}
