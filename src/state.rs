use std::sync::Arc;

use sqlx::postgres::PgPool;

use crate::api::rest::ws::WsNotifier;
use crate::config::Config;
use crate::engine::assignment::AssignmentDispatcher;
use crate::observability::metrics::Metrics;
use crate::registry::ConnectionRegistry;
use crate::service::{AuthService, DroneService, OrderService};
use crate::store::{DroneStore, OrderStore, UserStore};

pub struct AppState {
    pub auth: AuthService,
    pub orders: OrderService,
    pub drones: DroneService,
    pub registry: Arc<ConnectionRegistry>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(config: &Config, pool: PgPool) -> Self {
        let metrics = Metrics::new();
        let registry = Arc::new(ConnectionRegistry::new());

        let order_store = OrderStore::new(pool.clone());
        let drone_store = DroneStore::new(pool.clone());
        let user_store = UserStore::new(pool);

        let notifier = Arc::new(WsNotifier::new(registry.clone()));
        let dispatcher = Arc::new(AssignmentDispatcher::new(
            drone_store.clone(),
            notifier,
            metrics.clone(),
        ));

        let orders = OrderService::new(order_store.clone(), drone_store.clone(), dispatcher.clone());
        let drones = DroneService::new(drone_store, order_store, dispatcher);
        let auth = AuthService::new(user_store, config.jwt.clone());

        Self {
            auth,
            orders,
            drones,
            registry,
            metrics,
        }
    }
}
