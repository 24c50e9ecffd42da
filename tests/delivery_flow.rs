//! End-to-end lifecycle tests against a real Postgres instance.
//!
//! Run with a scratch database:
//!
//! ```sh
//! DATABASE_URL=postgres://postgres@localhost/drone_dispatch_test \
//!     cargo test --test delivery_flow -- --ignored
//! ```

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHasher};
use async_trait::async_trait;
use drone_dispatch::config::JwtConfig;
use drone_dispatch::engine::assignment::{AssignmentDispatcher, AssignmentNotifier};
use drone_dispatch::error::AppError;
use drone_dispatch::geo::GeoPoint;
use drone_dispatch::models::assignment::{AssignmentDescription, AssignmentNotice};
use drone_dispatch::models::drone::DroneStatus;
use drone_dispatch::models::order::{CreateOrderRequest, OrderStatus, UpdateRouteRequest};
use drone_dispatch::models::user::{Login, Role};
use drone_dispatch::observability::metrics::Metrics;
use drone_dispatch::registry::SendError;
use drone_dispatch::service::{AuthService, DroneService, OrderService};
use drone_dispatch::store::{self, DroneStore, OrderStore, UserStore};
use sqlx::postgres::PgPool;
use tokio::sync::{Mutex, OwnedMutexGuard};

const PASSWORD: &str = "flight-test";

static DB_LOCK: LazyLock<Arc<Mutex<()>>> = LazyLock::new(|| Arc::new(Mutex::new(())));

#[derive(Default)]
struct CapturingNotifier {
    notices: Mutex<Vec<AssignmentNotice>>,
}

#[async_trait]
impl AssignmentNotifier for CapturingNotifier {
    async fn notify(&self, notice: AssignmentNotice) -> Result<(), SendError> {
        self.notices.lock().await.push(notice);
        Ok(())
    }
}

struct Harness {
    _guard: OwnedMutexGuard<()>,
    pool: PgPool,
    orders: OrderService,
    drones: DroneService,
    order_store: OrderStore,
    drone_store: DroneStore,
    notifier: Arc<CapturingNotifier>,
}

async fn harness() -> Harness {
    let guard = DB_LOCK.clone().lock_owned().await;

    let url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must point at a scratch Postgres database");
    let pool = PgPool::connect(&url).await.expect("connect to database");
    store::migrate(&pool).await.expect("run migrations");

    sqlx::query("TRUNCATE orders, drones, users RESTART IDENTITY CASCADE")
        .execute(&pool)
        .await
        .expect("reset tables");

    let order_store = OrderStore::new(pool.clone());
    let drone_store = DroneStore::new(pool.clone());
    let notifier = Arc::new(CapturingNotifier::default());
    let dispatcher = Arc::new(AssignmentDispatcher::new(
        drone_store.clone(),
        notifier.clone(),
        Metrics::new(),
    ));

    let orders = OrderService::new(order_store.clone(), drone_store.clone(), dispatcher.clone());
    let drones = DroneService::new(drone_store.clone(), order_store.clone(), dispatcher);

    Harness {
        _guard: guard,
        pool,
        orders,
        drones,
        order_store,
        drone_store,
        notifier,
    }
}

fn password_hash() -> String {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(PASSWORD.as_bytes(), &salt)
        .unwrap()
        .to_string()
}

async fn seed_user(pool: &PgPool, name: &str, role: &str) -> i64 {
    sqlx::query_scalar::<_, i64>(
        "INSERT INTO users (name, password_hash, role) VALUES ($1, $2, $3) RETURNING id",
    )
    .bind(name)
    .bind(password_hash())
    .bind(role)
    .fetch_one(pool)
    .await
    .unwrap()
}

async fn seed_drone(pool: &PgPool, name: &str, lat: f64, lng: f64) -> i64 {
    let id = seed_user(pool, name, "drone").await;
    sqlx::query("INSERT INTO drones (drone_id, lat, lng) VALUES ($1, $2, $3)")
        .bind(id)
        .bind(lat)
        .bind(lng)
        .execute(pool)
        .await
        .unwrap();
    id
}

fn order_request(enduser_id: i64) -> CreateOrderRequest {
    CreateOrderRequest {
        enduser_id,
        pickup: GeoPoint { lat: 1.0, lng: 1.0 },
        dropoff: GeoPoint { lat: 2.0, lng: 2.0 },
    }
}

async fn wait_for_notice<F>(notifier: &CapturingNotifier, matches: F) -> AssignmentNotice
where
    F: Fn(&AssignmentNotice) -> bool,
{
    for _ in 0..200 {
        let found = notifier
            .notices
            .lock()
            .await
            .iter()
            .rev()
            .find(|notice| matches(notice))
            .cloned();
        if let Some(notice) = found {
            return notice;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("no matching assignment notice arrived");
}

#[tokio::test]
#[ignore = "requires a Postgres instance at DATABASE_URL"]
async fn full_delivery_round_trip() {
    let h = harness().await;
    let enduser = seed_user(&h.pool, "ada", "enduser").await;
    let drone = seed_drone(&h.pool, "drone-a", 0.0, 0.0).await;

    let order = h.orders.create(order_request(enduser)).await.unwrap();
    assert_eq!(order.status, OrderStatus::Pending);

    let notice = wait_for_notice(&h.notifier, |n| n.order_id == order.id).await;
    assert_eq!(notice.drone_id, drone);
    assert_eq!(notice.description, AssignmentDescription::NewOrder);

    let reserved = h.orders.reserve(drone, order.id).await.unwrap();
    assert_eq!(reserved.status, OrderStatus::Reserved);
    assert_eq!(reserved.assigned_drone_id, Some(drone));

    // Mutual reference holds while the order is active.
    let d = h.drone_store.get(drone).await.unwrap();
    assert_eq!(d.status, DroneStatus::Reserved);
    assert_eq!(d.current_order_id, Some(order.id));

    let picked = h.orders.pickup(drone, order.id).await.unwrap();
    assert_eq!(picked.status, OrderStatus::PickedUp);
    let d = h.drone_store.get(drone).await.unwrap();
    assert_eq!(d.status, DroneStatus::Delivering);

    let delivered = h.orders.deliver(drone, order.id).await.unwrap();
    assert_eq!(delivered.status, OrderStatus::Delivered);
    assert_eq!(delivered.assigned_drone_id, Some(drone));

    let d = h.drone_store.get(drone).await.unwrap();
    assert_eq!(d.status, DroneStatus::Idle);
    assert_eq!(d.current_order_id, None);
}

#[tokio::test]
#[ignore = "requires a Postgres instance at DATABASE_URL"]
async fn broken_drone_hands_off_its_order() {
    let h = harness().await;
    let enduser = seed_user(&h.pool, "ada", "enduser").await;
    let drone_a = seed_drone(&h.pool, "drone-a", 5.0, 5.0).await;

    let order = h.orders.create(order_request(enduser)).await.unwrap();
    h.orders.reserve(drone_a, order.id).await.unwrap();

    // A second idle drone becomes the handoff candidate.
    let drone_b = seed_drone(&h.pool, "drone-b", 1.0, 1.0).await;

    let (broken, released) = h
        .drones
        .report_broken(drone_a, Role::Drone, drone_a, GeoPoint { lat: 5.0, lng: 5.0 })
        .await
        .unwrap();

    assert_eq!(broken.status, DroneStatus::Broken);
    assert_eq!(broken.current_order_id, None);

    let released = released.expect("order released by broken drone");
    assert_eq!(released.status, OrderStatus::HandoffPending);
    assert_eq!(released.handoff_lat, Some(5.0));
    assert_eq!(released.handoff_lng, Some(5.0));

    let notice =
        wait_for_notice(&h.notifier, |n| n.description == AssignmentDescription::Handoff).await;
    assert_eq!(notice.order_id, order.id);
    assert_eq!(notice.drone_id, drone_b);

    let reassigned = h.orders.reserve(drone_b, order.id).await.unwrap();
    assert_eq!(reassigned.status, OrderStatus::Reserved);
    assert_eq!(reassigned.assigned_drone_id, Some(drone_b));
}

#[tokio::test]
#[ignore = "requires a Postgres instance at DATABASE_URL"]
async fn order_stays_pending_without_idle_drones() {
    let h = harness().await;
    let enduser = seed_user(&h.pool, "ada", "enduser").await;

    let order = h.orders.create(order_request(enduser)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(h.notifier.notices.lock().await.is_empty());
    let fresh = h.order_store.get(order.id).await.unwrap();
    assert_eq!(fresh.status, OrderStatus::Pending);
}

#[tokio::test]
#[ignore = "requires a Postgres instance at DATABASE_URL"]
async fn concurrent_cancels_commit_exactly_once() {
    let h = harness().await;
    let enduser = seed_user(&h.pool, "ada", "enduser").await;
    let order = h.orders.create(order_request(enduser)).await.unwrap();

    let (first, second) = tokio::join!(
        h.orders.cancel(enduser, order.id),
        h.orders.cancel(enduser, order.id),
    );

    let outcomes = [first, second];
    let ok = outcomes.iter().filter(|r| r.is_ok()).count();
    assert_eq!(ok, 1);
    assert!(outcomes.iter().any(|r| matches!(
        r,
        Err(AppError::OrderTransitionNotAllowed { .. })
    )));

    let fresh = h.order_store.get(order.id).await.unwrap();
    assert_eq!(fresh.status, OrderStatus::Canceled);
    assert!(fresh.canceled_at.is_some());
}

#[tokio::test]
#[ignore = "requires a Postgres instance at DATABASE_URL"]
async fn concurrent_reserves_have_a_single_winner() {
    let h = harness().await;
    let enduser = seed_user(&h.pool, "ada", "enduser").await;
    let drone_a = seed_drone(&h.pool, "drone-a", 0.0, 0.0).await;
    let drone_b = seed_drone(&h.pool, "drone-b", 0.5, 0.5).await;

    let order = h.orders.create(order_request(enduser)).await.unwrap();

    let (first, second) = tokio::join!(
        h.orders.reserve(drone_a, order.id),
        h.orders.reserve(drone_b, order.id),
    );

    let outcomes = [first, second];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(outcomes.iter().any(|r| matches!(
        r,
        Err(AppError::OrderTransitionNotAllowed { .. })
    )));

    // At most one drone references the order.
    let a = h.drone_store.get(drone_a).await.unwrap();
    let b = h.drone_store.get(drone_b).await.unwrap();
    let holders = [&a, &b]
        .iter()
        .filter(|d| d.current_order_id == Some(order.id))
        .count();
    assert_eq!(holders, 1);

    let fresh = h.order_store.get(order.id).await.unwrap();
    assert_eq!(fresh.status, OrderStatus::Reserved);
    let winner = if a.current_order_id == Some(order.id) { a.id } else { b.id };
    assert_eq!(fresh.assigned_drone_id, Some(winner));
}

#[tokio::test]
#[ignore = "requires a Postgres instance at DATABASE_URL"]
async fn failed_delivery_is_terminal() {
    let h = harness().await;
    let enduser = seed_user(&h.pool, "ada", "enduser").await;
    let drone = seed_drone(&h.pool, "drone-a", 0.0, 0.0).await;

    let order = h.orders.create(order_request(enduser)).await.unwrap();
    h.orders.reserve(drone, order.id).await.unwrap();
    h.orders.pickup(drone, order.id).await.unwrap();

    let failed = h.orders.fail(drone, order.id).await.unwrap();
    assert_eq!(failed.status, OrderStatus::Failed);
    assert_eq!(failed.assigned_drone_id, None);

    let d = h.drone_store.get(drone).await.unwrap();
    assert_eq!(d.status, DroneStatus::Idle);
    assert_eq!(d.current_order_id, None);

    // Terminal: no later transition may land.
    let err = h.orders.deliver(drone, order.id).await.unwrap_err();
    assert!(matches!(err, AppError::OrderNotAssignedToDrone));
}

#[tokio::test]
#[ignore = "requires a Postgres instance at DATABASE_URL"]
async fn route_updates_stop_once_picked_up() {
    let h = harness().await;
    let enduser = seed_user(&h.pool, "ada", "enduser").await;
    let drone = seed_drone(&h.pool, "drone-a", 0.0, 0.0).await;

    let order = h.orders.create(order_request(enduser)).await.unwrap();

    let rerouted = h
        .orders
        .update_route(
            order.id,
            UpdateRouteRequest {
                pickup: None,
                dropoff: Some(GeoPoint { lat: 3.0, lng: 3.0 }),
            },
        )
        .await
        .unwrap();
    assert_eq!(rerouted.dropoff_lat, 3.0);

    h.orders.reserve(drone, order.id).await.unwrap();
    h.orders.pickup(drone, order.id).await.unwrap();

    let err = h
        .orders
        .update_route(
            order.id,
            UpdateRouteRequest {
                pickup: None,
                dropoff: Some(GeoPoint { lat: 4.0, lng: 4.0 }),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::OrderTransitionNotAllowed { .. }));
}

#[tokio::test]
#[ignore = "requires a Postgres instance at DATABASE_URL"]
async fn cancel_enforces_ownership() {
    let h = harness().await;
    let owner = seed_user(&h.pool, "ada", "enduser").await;
    let other = seed_user(&h.pool, "bob", "enduser").await;

    let order = h.orders.create(order_request(owner)).await.unwrap();

    let err = h.orders.cancel(other, order.id).await.unwrap_err();
    assert!(matches!(err, AppError::OrderNotOwned));

    let fresh = h.order_store.get(order.id).await.unwrap();
    assert_eq!(fresh.status, OrderStatus::Pending);
}

#[tokio::test]
#[ignore = "requires a Postgres instance at DATABASE_URL"]
async fn nearest_idle_drone_wins_ties_by_id() {
    let h = harness().await;
    seed_user(&h.pool, "ada", "enduser").await;
    let near = seed_drone(&h.pool, "drone-near", 1.0, 1.0).await;
    seed_drone(&h.pool, "drone-far", 50.0, 50.0).await;
    let twin = seed_drone(&h.pool, "drone-twin", 1.0, 1.0).await;
    assert!(near < twin);

    let found = h.drone_store.find_nearest_idle(1.0, 1.0).await.unwrap();
    assert_eq!(found.unwrap().id, near);
}

#[tokio::test]
#[ignore = "requires a Postgres instance at DATABASE_URL"]
async fn login_masks_unknown_users() {
    let h = harness().await;
    seed_user(&h.pool, "ada", "enduser").await;

    let auth = AuthService::new(
        UserStore::new(h.pool.clone()),
        JwtConfig {
            secret: "e2e-secret".to_string(),
            ttl_seconds: 900,
            issuer: None,
            audience: None,
        },
    );

    let bundle = auth
        .issue_token(&Login {
            name: "ada".to_string(),
            password: PASSWORD.to_string(),
        })
        .await
        .unwrap();
    assert!(auth.verify_token(&bundle.token).is_ok());

    let err = auth
        .issue_token(&Login {
            name: "ada".to_string(),
            password: "wrong".to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidCredentials));

    let err = auth
        .issue_token(&Login {
            name: "nobody".to_string(),
            password: PASSWORD.to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidCredentials));
}
