//! Asset host: serves the firmware image and media tracks under /files, with byte ranges.

use std::path::PathBuf;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::FILES_PREFIX;

/// Read-only file routes rooted at `root`. Directories and anything outside
/// `FILES_PREFIX` are 404; ServeDir handles ranges, HEAD and `..` rejection.
pub fn router(root: PathBuf) -> Router {
    let files = ServeDir::new(root).append_index_html_on_directories(false);
    Router::new()
        .nest_service(FILES_PREFIX, files)
        .layer(TraceLayer::new_for_http())
}

/// Bind and serve `root` until the server fails.
pub async fn run_asset_host(bind: &str, root: PathBuf) -> std::io::Result<()> {
    let listener = TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, root = %root.display(), "asset host started");
    serve(listener, root).await
}

/// Serve on an already bound listener.
pub async fn serve(listener: TcpListener, root: PathBuf) -> std::io::Result<()> {
    axum::serve(listener, router(root)).await
}
