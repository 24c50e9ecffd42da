use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::geo::GeoPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DroneStatus {
    Idle,
    Reserved,
    Delivering,
    Broken,
}

impl DroneStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DroneStatus::Idle => "idle",
            DroneStatus::Reserved => "reserved",
            DroneStatus::Delivering => "delivering",
            DroneStatus::Broken => "broken",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "idle" => Some(DroneStatus::Idle),
            "reserved" => Some(DroneStatus::Reserved),
            "delivering" => Some(DroneStatus::Delivering),
            "broken" => Some(DroneStatus::Broken),
            _ => None,
        }
    }
}

impl std::fmt::Display for DroneStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn allowed_transitions(status: DroneStatus) -> &'static [DroneStatus] {
    match status {
        DroneStatus::Idle => &[DroneStatus::Reserved, DroneStatus::Broken],
        DroneStatus::Reserved => &[
            DroneStatus::Delivering,
            DroneStatus::Idle,
            DroneStatus::Broken,
        ],
        DroneStatus::Delivering => &[DroneStatus::Idle, DroneStatus::Broken],
        DroneStatus::Broken => &[DroneStatus::Idle],
    }
}

#[derive(Debug, Clone)]
pub struct Drone {
    pub id: i64,
    pub status: DroneStatus,
    pub current_order_id: Option<i64>,
    pub lat: f64,
    pub lng: f64,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Drone {
    pub fn position(&self) -> GeoPoint {
        GeoPoint {
            lat: self.lat,
            lng: self.lng,
        }
    }

    pub fn is_transition_allowed(&self, next: DroneStatus) -> bool {
        allowed_transitions(self.status).contains(&next)
    }

    pub fn update_status(&mut self, next: DroneStatus) -> Result<(), AppError> {
        if !self.is_transition_allowed(next) {
            return Err(AppError::DroneTransitionNotAllowed {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn reserve(&mut self, order_id: i64) -> Result<(), AppError> {
        self.update_status(DroneStatus::Reserved)?;
        self.current_order_id = Some(order_id);
        Ok(())
    }

    pub fn start_delivery(&mut self) -> Result<(), AppError> {
        self.update_status(DroneStatus::Delivering)
    }

    pub fn complete_delivery(&mut self) -> Result<(), AppError> {
        self.update_status(DroneStatus::Idle)?;
        self.current_order_id = None;
        Ok(())
    }

    pub fn fail_delivery(&mut self) -> Result<(), AppError> {
        self.update_status(DroneStatus::Idle)?;
        self.current_order_id = None;
        Ok(())
    }

    /// A broken drone drops its current work and records where it stopped.
    pub fn report_broken(&mut self, position: GeoPoint) -> Result<(), AppError> {
        self.update_status(DroneStatus::Broken)?;
        self.current_order_id = None;
        self.lat = position.lat;
        self.lng = position.lng;
        Ok(())
    }

    /// Repairing an already-idle drone only refreshes its position.
    pub fn report_fixed(&mut self, position: GeoPoint) -> Result<(), AppError> {
        if self.status != DroneStatus::Idle {
            self.update_status(DroneStatus::Idle)?;
        }
        self.current_order_id = None;
        self.lat = position.lat;
        self.lng = position.lng;
        Ok(())
    }

    pub fn apply_heartbeat(&mut self, position: GeoPoint, now: DateTime<Utc>) {
        self.lat = position.lat;
        self.lng = position.lng;
        self.last_heartbeat_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drone(status: DroneStatus) -> Drone {
        let now = Utc::now();
        Drone {
            id: 3,
            status,
            current_order_id: None,
            lat: 0.0,
            lng: 0.0,
            last_heartbeat_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn reserve_sets_current_order() {
        let mut d = drone(DroneStatus::Idle);
        d.reserve(42).unwrap();
        assert_eq!(d.status, DroneStatus::Reserved);
        assert_eq!(d.current_order_id, Some(42));
    }

    #[test]
    fn reserve_rejected_while_delivering() {
        let mut d = drone(DroneStatus::Delivering);
        d.current_order_id = Some(1);
        assert!(d.reserve(42).is_err());
        assert_eq!(d.current_order_id, Some(1));
    }

    #[test]
    fn delivery_cycle_returns_to_idle() {
        let mut d = drone(DroneStatus::Idle);
        d.reserve(42).unwrap();
        d.start_delivery().unwrap();
        d.complete_delivery().unwrap();
        assert_eq!(d.status, DroneStatus::Idle);
        assert!(d.current_order_id.is_none());
    }

    #[test]
    fn broken_allowed_from_every_active_status() {
        for status in [
            DroneStatus::Idle,
            DroneStatus::Reserved,
            DroneStatus::Delivering,
        ] {
            let mut d = drone(status);
            d.current_order_id = Some(42);
            d.report_broken(GeoPoint { lat: 5.0, lng: 5.0 }).unwrap();
            assert_eq!(d.status, DroneStatus::Broken);
            assert!(d.current_order_id.is_none());
            assert_eq!(d.lat, 5.0);
        }
    }

    #[test]
    fn broken_twice_is_rejected() {
        let mut d = drone(DroneStatus::Broken);
        let err = d
            .report_broken(GeoPoint { lat: 1.0, lng: 1.0 })
            .unwrap_err();
        assert!(matches!(err, AppError::DroneTransitionNotAllowed { .. }));
    }

    #[test]
    fn fixed_restores_idle_from_broken() {
        let mut d = drone(DroneStatus::Broken);
        d.report_fixed(GeoPoint { lat: 2.0, lng: 3.0 }).unwrap();
        assert_eq!(d.status, DroneStatus::Idle);
        assert_eq!((d.lat, d.lng), (2.0, 3.0));
    }

    #[test]
    fn fixed_on_idle_drone_only_refreshes_position() {
        let mut d = drone(DroneStatus::Idle);
        d.report_fixed(GeoPoint { lat: 2.0, lng: 3.0 }).unwrap();
        assert_eq!(d.status, DroneStatus::Idle);
        assert_eq!((d.lat, d.lng), (2.0, 3.0));
    }

    #[test]
    fn heartbeat_moves_drone_without_touching_status() {
        let mut d = drone(DroneStatus::Delivering);
        let now = Utc::now();
        d.apply_heartbeat(GeoPoint { lat: 7.0, lng: 8.0 }, now);
        assert_eq!(d.status, DroneStatus::Delivering);
        assert_eq!((d.lat, d.lng), (7.0, 8.0));
        assert_eq!(d.last_heartbeat_at, Some(now));
    }
}
