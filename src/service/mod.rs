pub mod cache;
pub mod inflight;
pub mod orchestrator;
pub mod pool;

pub use cache::ResultCache;
pub use inflight::SolvePhase;
pub use orchestrator::{Orchestrator, OrchestratorConfig, OrchestratorStats, SolveTicket};
