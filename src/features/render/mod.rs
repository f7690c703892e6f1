pub mod cache;
pub mod handler;
pub mod job;
pub mod orchestrator;

pub use cache::ArtifactCache;
pub use handler::{create_prompt_router, create_render_router};
pub use job::{RenderJob, RenderParams};
pub use orchestrator::{FinalArtifact, Orchestrator, RenderStage};
