pub mod health;
pub mod invoker;
pub mod postprocess;
pub mod registry;
pub mod render;
pub mod safety;
