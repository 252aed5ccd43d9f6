pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod models;
pub mod service;

pub use config::ServiceConfig;
pub use domain::result::{SolveResult, SolveStatus};
pub use error::SolveError;
pub use service::{Orchestrator, OrchestratorConfig};
