use std::sync::Arc;

use tracing::error;

use affinity_db::Database;

use crate::error::ApiError;
use crate::orchestrator::Orchestrator;
use crate::scheduler::FavorScheduler;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub scheduler: Arc<FavorScheduler>,
    pub orchestrator: Orchestrator,
}

/// Runs a blocking store operation off the async runtime.
pub async fn run_db<F, T>(db: &Arc<Database>, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Store(e.to_string())
        })?
        .map_err(ApiError::from)
}
