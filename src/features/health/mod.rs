pub mod handler;

pub use handler::{create_health_router, create_metrics_router};
