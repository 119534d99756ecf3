//! Phone number pool — model, lease state machine, REST routes.

pub mod leasing;
pub mod model;
pub mod routes;

pub use leasing::NumberPool;
pub use model::{NumberStatus, PhoneNumber};
