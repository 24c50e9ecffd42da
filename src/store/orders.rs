use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::{FromRow, Postgres, QueryBuilder};

use crate::error::AppError;
use crate::models::order::{Order, OrderListFilters, OrderStatus};
use crate::store::{is_foreign_key_violation, map_not_found, Tx};

const INSERT_ORDER: &str = "
    INSERT INTO orders (enduser_id, pickup_lat, pickup_lng, dropoff_lat, dropoff_lng, status)
    VALUES ($1, $2, $3, $4, $5, $6)
    RETURNING id, enduser_id, assigned_drone_id, pickup_lat, pickup_lng,
              dropoff_lat, dropoff_lng, handoff_lat, handoff_lng, status,
              created_at, updated_at, canceled_at
";

const GET_ORDER: &str = "
    SELECT id, enduser_id, assigned_drone_id, pickup_lat, pickup_lng,
           dropoff_lat, dropoff_lng, handoff_lat, handoff_lng, status,
           created_at, updated_at, canceled_at
    FROM orders
    WHERE id = $1
";

const GET_ORDER_FOR_UPDATE: &str = "
    SELECT id, enduser_id, assigned_drone_id, pickup_lat, pickup_lng,
           dropoff_lat, dropoff_lng, handoff_lat, handoff_lng, status,
           created_at, updated_at, canceled_at
    FROM orders
    WHERE id = $1
    FOR UPDATE
";

const UPDATE_ORDER: &str = "
    UPDATE orders
    SET status = $1,
        assigned_drone_id = $2,
        pickup_lat = $3,
        pickup_lng = $4,
        dropoff_lat = $5,
        dropoff_lng = $6,
        handoff_lat = $7,
        handoff_lng = $8,
        canceled_at = $9,
        updated_at = NOW()
    WHERE id = $10
    RETURNING id, enduser_id, assigned_drone_id, pickup_lat, pickup_lng,
              dropoff_lat, dropoff_lng, handoff_lat, handoff_lng, status,
              created_at, updated_at, canceled_at
";

const LIST_ORDERS_BASE: &str = "
    SELECT id, enduser_id, assigned_drone_id, pickup_lat, pickup_lng,
           dropoff_lat, dropoff_lng, handoff_lat, handoff_lng, status,
           created_at, updated_at, canceled_at
    FROM orders
    WHERE 1=1
";

#[derive(Debug, FromRow)]
struct OrderRow {
    id: i64,
    enduser_id: i64,
    assigned_drone_id: Option<i64>,
    pickup_lat: f64,
    pickup_lng: f64,
    dropoff_lat: f64,
    dropoff_lng: f64,
    handoff_lat: Option<f64>,
    handoff_lng: Option<f64>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    canceled_at: Option<DateTime<Utc>>,
}

impl OrderRow {
    fn into_order(self) -> Result<Order, AppError> {
        let status = OrderStatus::parse(&self.status).ok_or_else(|| {
            AppError::Infrastructure(format!("unknown order status in row: {}", self.status))
        })?;

        Ok(Order {
            id: self.id,
            enduser_id: self.enduser_id,
            assigned_drone_id: self.assigned_drone_id,
            pickup_lat: self.pickup_lat,
            pickup_lng: self.pickup_lng,
            dropoff_lat: self.dropoff_lat,
            dropoff_lng: self.dropoff_lng,
            handoff_lat: self.handoff_lat,
            handoff_lng: self.handoff_lng,
            status,
            created_at: self.created_at,
            updated_at: self.updated_at,
            canceled_at: self.canceled_at,
        })
    }
}

#[derive(Clone)]
pub struct OrderStore {
    pool: PgPool,
}

impl OrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn begin(&self) -> Result<Tx, AppError> {
        Ok(self.pool.begin().await?)
    }

    pub async fn insert(&self, order: &Order) -> Result<Order, AppError> {
        let row = sqlx::query_as::<_, OrderRow>(INSERT_ORDER)
            .bind(order.enduser_id)
            .bind(order.pickup_lat)
            .bind(order.pickup_lng)
            .bind(order.dropoff_lat)
            .bind(order.dropoff_lng)
            .bind(order.status.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|err| {
                if is_foreign_key_violation(&err) {
                    AppError::InvalidEnduserId
                } else {
                    err.into()
                }
            })?;

        row.into_order()
    }

    pub async fn get(&self, id: i64) -> Result<Order, AppError> {
        let row = sqlx::query_as::<_, OrderRow>(GET_ORDER)
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(|err| map_not_found(err, AppError::OrderNotFound))?;

        row.into_order()
    }

    /// Locks the row for the remainder of the transaction.
    pub async fn get_for_update(&self, tx: &mut Tx, id: i64) -> Result<Order, AppError> {
        let row = sqlx::query_as::<_, OrderRow>(GET_ORDER_FOR_UPDATE)
            .bind(id)
            .fetch_one(&mut **tx)
            .await
            .map_err(|err| map_not_found(err, AppError::OrderNotFound))?;

        row.into_order()
    }

    /// Writes the full row, nullable fields included.
    pub async fn update(&self, tx: &mut Tx, order: &Order) -> Result<Order, AppError> {
        let row = sqlx::query_as::<_, OrderRow>(UPDATE_ORDER)
            .bind(order.status.as_str())
            .bind(order.assigned_drone_id)
            .bind(order.pickup_lat)
            .bind(order.pickup_lng)
            .bind(order.dropoff_lat)
            .bind(order.dropoff_lng)
            .bind(order.handoff_lat)
            .bind(order.handoff_lng)
            .bind(order.canceled_at)
            .bind(order.id)
            .fetch_one(&mut **tx)
            .await
            .map_err(|err| map_not_found(err, AppError::OrderNotFound))?;

        row.into_order()
    }

    pub async fn list(
        &self,
        filters: &OrderListFilters,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Order>, AppError> {
        let mut query = QueryBuilder::<Postgres>::new(LIST_ORDERS_BASE);

        if let Some(status) = filters.status {
            query.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(enduser_id) = filters.enduser_id {
            query.push(" AND enduser_id = ").push_bind(enduser_id);
        }
        if let Some(drone_id) = filters.assigned_drone_id {
            query.push(" AND assigned_drone_id = ").push_bind(drone_id);
        }

        query
            .push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let rows: Vec<OrderRow> = query.build_query_as().fetch_all(&self.pool).await?;

        rows.into_iter().map(OrderRow::into_order).collect()
    }
}
