pub mod feed;
pub mod handler;
pub mod models;
pub mod workers;

pub use feed::{Heartbeat, RegistryFeed};
pub use handler::{create_feed_router, create_registry_router};
pub use models::{ModelDescriptor, ModelFamily, ModelRegistry};
pub use workers::{WorkerLoadSnapshot, WorkerRegistry};
