use serde::Serialize;

use crate::models::drone::Drone;
use crate::models::order::{Order, OrderStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentDescription {
    NewOrder,
    Handoff,
}

/// A transient push message inviting a drone to reserve an order. Never
/// persisted; the drone commits by calling reserve.
#[derive(Debug, Clone)]
pub struct AssignmentNotice {
    pub order_id: i64,
    pub drone_id: i64,
    pub pickup_lat: f64,
    pub pickup_lng: f64,
    pub dropoff_lat: f64,
    pub dropoff_lng: f64,
    pub enduser_id: i64,
    pub order_status: OrderStatus,
    pub description: AssignmentDescription,
}

impl AssignmentNotice {
    pub fn new(order: &Order, drone: &Drone) -> Self {
        let description = if order.status == OrderStatus::HandoffPending {
            AssignmentDescription::Handoff
        } else {
            AssignmentDescription::NewOrder
        };

        Self {
            order_id: order.id,
            drone_id: drone.id,
            pickup_lat: order.pickup_lat,
            pickup_lng: order.pickup_lng,
            dropoff_lat: order.dropoff_lat,
            dropoff_lng: order.dropoff_lng,
            enduser_id: order.enduser_id,
            order_status: order.status,
            description,
        }
    }
}
