use axum::extract::State;
use axum::response::Html;

use crate::{AppState, ProxyError};

/// Serve the chat frontend's `index.html`.
pub async fn index(State(state): State<AppState>) -> Result<Html<String>, ProxyError> {
    let page = state.frontend_dir.join("index.html");
    match tokio::fs::read_to_string(&page).await {
        Ok(html) => Ok(Html(html)),
        Err(e) => {
            tracing::warn!("Frontend not available at {}: {}", page.display(), e);
            Err(ProxyError::FrontendMissing)
        }
    }
}
