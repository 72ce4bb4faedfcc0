//! Harness UI server - web view of a harness run's overlay and reports.

mod routes;
mod sse;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;

use axum::Router;
use axum::response::Redirect;
use axum::routing::get;
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::info;

use crate::state::AppState;

#[derive(Parser)]
#[command(name = "harness-ui")]
#[command(about = "Web view of the harness overlay and exported readiness reports")]
struct Args {
    /// Address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on
    #[arg(long, default_value = "3001")]
    port: u16,

    /// Harness state directory (status.json, reports/, cancel marker)
    #[arg(long, default_value = ".harness")]
    harness_dir: PathBuf,

    /// Directory containing static UI files; without it `/` shows the overlay
    #[arg(long)]
    ui_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("harness_ui=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let harness_dir = args.harness_dir.canonicalize().unwrap_or(args.harness_dir);
    info!(harness_dir = %harness_dir.display(), "starting harness-ui");

    let state = AppState::new(harness_dir);
    sse::start_file_watcher(state.clone());

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut app = Router::new()
        .nest("/api", routes::api_router())
        .route("/events", get(sse::events_handler))
        .layer(cors)
        .with_state(state);

    match args.ui_dir.filter(|dir| dir.exists()) {
        Some(ui_dir) => {
            info!(ui_dir = %ui_dir.display(), "serving static UI files");
            app = app.fallback_service(ServeDir::new(ui_dir).append_index_html_on_directories(true));
        }
        None => {
            info!("no UI directory, serving the overlay at /");
            app = app.route("/", get(|| async { Redirect::temporary("/api/overlay") }));
        }
    }

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
