use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::FromRow;

use crate::error::AppError;
use crate::geo::{haversine_km, GeoPoint};
use crate::models::drone::{Drone, DroneStatus};
use crate::store::{map_not_found, Tx};

const GET_DRONE: &str = "
    SELECT drone_id, status, current_order_id, lat, lng,
           last_heartbeat_at, created_at, updated_at
    FROM drones
    WHERE drone_id = $1
";

const GET_DRONE_FOR_UPDATE: &str = "
    SELECT drone_id, status, current_order_id, lat, lng,
           last_heartbeat_at, created_at, updated_at
    FROM drones
    WHERE drone_id = $1
    FOR UPDATE
";

const UPDATE_DRONE: &str = "
    UPDATE drones
    SET status = $1,
        current_order_id = $2,
        lat = $3,
        lng = $4,
        last_heartbeat_at = $5,
        updated_at = NOW()
    WHERE drone_id = $6
    RETURNING drone_id, status, current_order_id, lat, lng,
              last_heartbeat_at, created_at, updated_at
";

const LIST_DRONES: &str = "
    SELECT drone_id, status, current_order_id, lat, lng,
           last_heartbeat_at, created_at, updated_at
    FROM drones
    ORDER BY drone_id
    LIMIT $1 OFFSET $2
";

const LIST_IDLE_DRONES: &str = "
    SELECT drone_id, status, current_order_id, lat, lng,
           last_heartbeat_at, created_at, updated_at
    FROM drones
    WHERE status = 'idle'
";

#[derive(Debug, FromRow)]
struct DroneRow {
    drone_id: i64,
    status: String,
    current_order_id: Option<i64>,
    lat: f64,
    lng: f64,
    last_heartbeat_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl DroneRow {
    fn into_drone(self) -> Result<Drone, AppError> {
        let status = DroneStatus::parse(&self.status).ok_or_else(|| {
            AppError::Infrastructure(format!("unknown drone status in row: {}", self.status))
        })?;

        Ok(Drone {
            id: self.drone_id,
            status,
            current_order_id: self.current_order_id,
            lat: self.lat,
            lng: self.lng,
            last_heartbeat_at: self.last_heartbeat_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Clone)]
pub struct DroneStore {
    pool: PgPool,
}

impl DroneStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn begin(&self) -> Result<Tx, AppError> {
        Ok(self.pool.begin().await?)
    }

    pub async fn get(&self, id: i64) -> Result<Drone, AppError> {
        let row = sqlx::query_as::<_, DroneRow>(GET_DRONE)
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(|err| map_not_found(err, AppError::DroneNotFound))?;

        row.into_drone()
    }

    pub async fn get_for_update(&self, tx: &mut Tx, id: i64) -> Result<Drone, AppError> {
        let row = sqlx::query_as::<_, DroneRow>(GET_DRONE_FOR_UPDATE)
            .bind(id)
            .fetch_one(&mut **tx)
            .await
            .map_err(|err| map_not_found(err, AppError::DroneNotFound))?;

        row.into_drone()
    }

    pub async fn update(&self, tx: &mut Tx, drone: &Drone) -> Result<Drone, AppError> {
        let row = sqlx::query_as::<_, DroneRow>(UPDATE_DRONE)
            .bind(drone.status.as_str())
            .bind(drone.current_order_id)
            .bind(drone.lat)
            .bind(drone.lng)
            .bind(drone.last_heartbeat_at)
            .bind(drone.id)
            .fetch_one(&mut **tx)
            .await
            .map_err(|err| map_not_found(err, AppError::DroneNotFound))?;

        row.into_drone()
    }

    pub async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Drone>, AppError> {
        let rows: Vec<DroneRow> = sqlx::query_as(LIST_DRONES)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(DroneRow::into_drone).collect()
    }

    /// The idle drone closest to the given point, ties broken by id.
    pub async fn find_nearest_idle(&self, lat: f64, lng: f64) -> Result<Option<Drone>, AppError> {
        let rows: Vec<DroneRow> = sqlx::query_as(LIST_IDLE_DRONES)
            .fetch_all(&self.pool)
            .await?;

        let target = GeoPoint { lat, lng };
        let nearest = rows
            .into_iter()
            .map(DroneRow::into_drone)
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|drone| (haversine_km(drone.position(), target), drone))
            .min_by(|(da, a), (db, b)| da.total_cmp(db).then(a.id.cmp(&b.id)))
            .map(|(_, drone)| drone);

        Ok(nearest)
    }
}
