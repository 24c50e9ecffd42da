use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::geo::GeoPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Reserved,
    PickedUp,
    HandoffPending,
    Delivered,
    Failed,
    Canceled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Reserved => "reserved",
            OrderStatus::PickedUp => "picked_up",
            OrderStatus::HandoffPending => "handoff_pending",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Failed => "failed",
            OrderStatus::Canceled => "canceled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(OrderStatus::Pending),
            "reserved" => Some(OrderStatus::Reserved),
            "picked_up" => Some(OrderStatus::PickedUp),
            "handoff_pending" => Some(OrderStatus::HandoffPending),
            "delivered" => Some(OrderStatus::Delivered),
            "failed" => Some(OrderStatus::Failed),
            "canceled" => Some(OrderStatus::Canceled),
            _ => None,
        }
    }

    pub fn needs_assignment(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::HandoffPending)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn allowed_transitions(status: OrderStatus) -> &'static [OrderStatus] {
    match status {
        OrderStatus::Pending => &[OrderStatus::Reserved, OrderStatus::Canceled],
        OrderStatus::Reserved => &[
            OrderStatus::PickedUp,
            OrderStatus::HandoffPending,
            OrderStatus::Failed,
        ],
        OrderStatus::PickedUp => &[
            OrderStatus::HandoffPending,
            OrderStatus::Delivered,
            OrderStatus::Failed,
        ],
        OrderStatus::HandoffPending => &[OrderStatus::Reserved, OrderStatus::Failed],
        OrderStatus::Delivered | OrderStatus::Failed | OrderStatus::Canceled => &[],
    }
}

#[derive(Debug, Clone)]
pub struct CreateOrderRequest {
    pub enduser_id: i64,
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateRouteRequest {
    pub pickup: Option<GeoPoint>,
    pub dropoff: Option<GeoPoint>,
}

#[derive(Debug, Clone)]
pub struct Order {
    pub id: i64,
    pub enduser_id: i64,
    pub assigned_drone_id: Option<i64>,
    pub pickup_lat: f64,
    pub pickup_lng: f64,
    pub dropoff_lat: f64,
    pub dropoff_lng: f64,
    pub handoff_lat: Option<f64>,
    pub handoff_lng: Option<f64>,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub canceled_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn new(req: CreateOrderRequest) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            enduser_id: req.enduser_id,
            assigned_drone_id: None,
            pickup_lat: req.pickup.lat,
            pickup_lng: req.pickup.lng,
            dropoff_lat: req.dropoff.lat,
            dropoff_lng: req.dropoff.lng,
            handoff_lat: None,
            handoff_lng: None,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
            canceled_at: None,
        }
    }

    pub fn pickup(&self) -> GeoPoint {
        GeoPoint {
            lat: self.pickup_lat,
            lng: self.pickup_lng,
        }
    }

    pub fn dropoff(&self) -> GeoPoint {
        GeoPoint {
            lat: self.dropoff_lat,
            lng: self.dropoff_lng,
        }
    }

    pub fn is_transition_allowed(&self, next: OrderStatus) -> bool {
        allowed_transitions(self.status).contains(&next)
    }

    /// The single gate through which the status field changes.
    pub fn update_status(&mut self, next: OrderStatus) -> Result<(), AppError> {
        if !self.is_transition_allowed(next) {
            return Err(AppError::OrderTransitionNotAllowed {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn belongs_to(&self, user_id: i64) -> Result<(), AppError> {
        if self.enduser_id != user_id {
            return Err(AppError::OrderNotOwned);
        }
        Ok(())
    }

    pub fn is_assigned_to(&self, drone_id: i64) -> Result<(), AppError> {
        if self.assigned_drone_id != Some(drone_id) {
            return Err(AppError::OrderNotAssignedToDrone);
        }
        Ok(())
    }

    pub fn reserve(&mut self, drone_id: i64) -> Result<(), AppError> {
        self.update_status(OrderStatus::Reserved)?;
        self.assigned_drone_id = Some(drone_id);
        Ok(())
    }

    pub fn mark_picked_up(&mut self) -> Result<(), AppError> {
        self.update_status(OrderStatus::PickedUp)
    }

    pub fn deliver(&mut self) -> Result<(), AppError> {
        self.update_status(OrderStatus::Delivered)
    }

    /// A failed order releases its drone reference.
    pub fn fail(&mut self) -> Result<(), AppError> {
        self.update_status(OrderStatus::Failed)?;
        self.assigned_drone_id = None;
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), AppError> {
        self.update_status(OrderStatus::Canceled)?;
        self.canceled_at = Some(Utc::now());
        Ok(())
    }

    /// Transfers custody away from a broken drone: records where the package
    /// currently sits and moves the order back into the assignable pool.
    /// Returns true iff a transition occurred.
    pub fn handoff(&mut self, lat: f64, lng: f64) -> bool {
        if self.update_status(OrderStatus::HandoffPending).is_err() {
            return false;
        }
        self.handoff_lat = Some(lat);
        self.handoff_lng = Some(lng);
        true
    }

    /// Route changes are admin-only and legal only before the package is in
    /// flight.
    pub fn update_route(&mut self, req: UpdateRouteRequest) -> Result<(), AppError> {
        if !matches!(
            self.status,
            OrderStatus::Pending | OrderStatus::Reserved | OrderStatus::HandoffPending
        ) {
            return Err(AppError::OrderTransitionNotAllowed {
                from: self.status,
                to: self.status,
            });
        }

        if let Some(pickup) = req.pickup {
            self.pickup_lat = pickup.lat;
            self.pickup_lng = pickup.lng;
        }
        if let Some(dropoff) = req.dropoff {
            self.dropoff_lat = dropoff.lat;
            self.dropoff_lng = dropoff.lng;
        }
        Ok(())
    }
}

/// An order snapshot enriched with the assigned drone's live position.
#[derive(Debug, Clone)]
pub struct OrderDetails {
    pub order: Order,
    pub drone_location: Option<GeoPoint>,
    pub eta_minutes: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct OrderListFilters {
    pub status: Option<OrderStatus>,
    pub enduser_id: Option<i64>,
    pub assigned_drone_id: Option<i64>,
}
