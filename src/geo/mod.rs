use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::drone::Drone;
use crate::models::order::{Order, OrderStatus};

const EARTH_RADIUS_KM: f64 = 6_371.0;
const DRONE_SPEED_MPS: f64 = 10.0;
const METERS_PER_KILOMETER: f64 = 1_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn validated(lat: f64, lng: f64) -> Result<Self, AppError> {
        if !(-90.0..=90.0).contains(&lat) {
            return Err(AppError::InvalidLatitude(lat));
        }
        if !(-180.0..=180.0).contains(&lng) {
            return Err(AppError::InvalidLongitude(lng));
        }
        Ok(Self { lat, lng })
    }
}

pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    let haversine = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng;
    let central_angle = 2.0 * haversine.sqrt().asin();

    EARTH_RADIUS_KM * central_angle
}

/// Straight-line ETA in whole minutes, never below 1. Before pickup the drone
/// still has both legs ahead of it; afterwards only the run to the dropoff.
pub fn eta_minutes(drone: &Drone, order: &Order) -> i64 {
    let distance_km = match order.status {
        OrderStatus::Pending | OrderStatus::Reserved => {
            haversine_km(drone.position(), order.pickup())
                + haversine_km(order.pickup(), order.dropoff())
        }
        _ => haversine_km(drone.position(), order.dropoff()),
    };

    let seconds = distance_km * METERS_PER_KILOMETER / DRONE_SPEED_MPS;
    let minutes = (seconds / 60.0).ceil() as i64;
    minutes.max(1)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::models::drone::DroneStatus;
    use crate::models::order::CreateOrderRequest;

    #[test]
    fn zero_distance_for_same_point() {
        let p = GeoPoint {
            lat: 53.5511,
            lng: 9.9937,
        };
        let distance = haversine_km(p, p);
        assert!(distance < 1e-9);
    }

    #[test]
    fn london_to_paris_is_around_343_km() {
        let london = GeoPoint {
            lat: 51.5074,
            lng: -0.1278,
        };
        let paris = GeoPoint {
            lat: 48.8566,
            lng: 2.3522,
        };
        let distance = haversine_km(london, paris);
        assert!((distance - 343.0).abs() < 5.0);
    }

    #[test]
    fn out_of_range_coordinates_are_rejected() {
        assert!(matches!(
            GeoPoint::validated(90.1, 0.0),
            Err(AppError::InvalidLatitude(_))
        ));
        assert!(matches!(
            GeoPoint::validated(0.0, -180.5),
            Err(AppError::InvalidLongitude(_))
        ));
        assert!(GeoPoint::validated(90.0, -180.0).is_ok());
    }

    fn fixtures(status: OrderStatus) -> (Drone, Order) {
        let now = Utc::now();
        let drone = Drone {
            id: 1,
            status: DroneStatus::Idle,
            current_order_id: None,
            lat: 0.0,
            lng: 0.0,
            last_heartbeat_at: None,
            created_at: now,
            updated_at: now,
        };
        let mut order = Order::new(CreateOrderRequest {
            enduser_id: 7,
            pickup: GeoPoint { lat: 1.0, lng: 1.0 },
            dropoff: GeoPoint { lat: 2.0, lng: 2.0 },
        });
        order.status = status;
        (drone, order)
    }

    #[test]
    fn eta_before_pickup_covers_both_legs() {
        let (drone, order) = fixtures(OrderStatus::Reserved);
        let both_legs = eta_minutes(&drone, &order);

        let (drone, order) = fixtures(OrderStatus::PickedUp);
        let final_leg = eta_minutes(&drone, &order);

        assert!(both_legs > final_leg);
    }

    #[test]
    fn eta_never_drops_below_one_minute() {
        let (mut drone, mut order) = fixtures(OrderStatus::PickedUp);
        drone.lat = 2.0;
        drone.lng = 2.0;
        order.dropoff_lat = 2.0;
        order.dropoff_lng = 2.0;
        assert_eq!(eta_minutes(&drone, &order), 1);
    }
}
