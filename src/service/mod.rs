pub mod auth;
pub mod drones;
pub mod orders;

pub use auth::AuthService;
pub use drones::DroneService;
pub use orders::OrderService;
