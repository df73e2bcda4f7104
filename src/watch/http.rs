use std::net::SocketAddr;

use axum::Router;
use camino::Utf8PathBuf;
use console::style;
use tower_http::services::ServeDir;
use tracing::info;

/// Serve `dir` over HTTP on localhost until the process ends.
pub(crate) async fn serve(dir: Utf8PathBuf, port: u16) -> anyhow::Result<()> {
    let address = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(address).await?;

    info!(url = %style(format!("http://localhost:{port}/")).yellow(), "serving {dir}");

    let router = Router::new()
        // path to the output directory with the built site
        .fallback_service(ServeDir::new(dir.as_std_path()));

    axum::serve(listener, router).await?;

    Ok(())
}
