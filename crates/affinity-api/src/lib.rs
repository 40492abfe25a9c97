pub mod characters;
pub mod context;
pub mod conversation;
pub mod convert;
pub mod error;
pub mod evaluator;
pub mod extract;
pub mod orchestrator;
pub mod personas;
pub mod prompt;
pub mod routes;
pub mod scheduler;
pub mod state;

pub use error::ApiError;
pub use orchestrator::{EngineConfig, Orchestrator};
pub use routes::router;
pub use state::{AppState, AppStateInner};
