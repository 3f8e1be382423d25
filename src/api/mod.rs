pub mod auth;
pub mod events;

use std::sync::Arc;

use anyhow::Context;

use crate::error::AppError;
use crate::state::AppState;

/// Run store and access-file work on the blocking pool. It does file I/O
/// under file locks and may wait on the policy mutex.
pub async fn blocking<T, F>(state: &Arc<AppState>, work: F) -> Result<T, AppError>
where
    F: FnOnce(&AppState) -> Result<T, AppError> + Send + 'static,
    T: Send + 'static,
{
    let state = Arc::clone(state);
    tokio::task::spawn_blocking(move || work(&state))
        .await
        .context("blocking task did not complete")?
}
