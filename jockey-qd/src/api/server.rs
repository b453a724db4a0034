//! HTTP server setup and routing

use crate::blacklist::Blacklist;
use crate::engine::PlaybackEngine;
use crate::error::Result;
use crate::stats::BotStats;
use axum::{
    routing::{delete, get, post},
    Router,
};
use jockey_common::EventBus;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared application context passed to all handlers.
#[derive(Clone)]
pub struct AppContext {
    pub engine: Arc<PlaybackEngine>,
    pub blacklist: Arc<Blacklist>,
    pub stats: Arc<BotStats>,
    pub events: Arc<EventBus>,
    pub port: u16,
}

/// Build the full router.
pub fn create_router(ctx: AppContext) -> Router {
    Router::new()
        .route("/health", get(super::handlers::health))
        .route("/stats", get(super::handlers::get_stats))
        // Playback commands, one guild per URL
        .route("/guilds/:guild_id/play", post(super::handlers::play))
        .route("/guilds/:guild_id/pause", post(super::handlers::pause))
        .route("/guilds/:guild_id/resume", post(super::handlers::resume))
        .route("/guilds/:guild_id/skip", post(super::handlers::skip))
        .route("/guilds/:guild_id/stop", post(super::handlers::stop))
        .route("/guilds/:guild_id/queue", get(super::handlers::get_queue))
        .route("/guilds/:guild_id/queue/clear", post(super::handlers::clear_queue))
        .route("/guilds/:guild_id/queue/shuffle", post(super::handlers::shuffle_queue))
        .route("/guilds/:guild_id/queue/skip-to", post(super::handlers::skip_to))
        .route("/guilds/:guild_id/queue/:position", delete(super::handlers::remove_track))
        .route("/guilds/:guild_id/now-playing", get(super::handlers::now_playing))
        .route("/guilds/:guild_id/volume", post(super::handlers::set_volume))
        .route("/guilds/:guild_id/bass-boost", post(super::handlers::set_bass_boost))
        .route("/guilds/:guild_id/loop", post(super::handlers::toggle_loop))
        // Declared commands without an implementation yet
        .route("/guilds/:guild_id/seek", post(super::handlers::seek))
        .route("/guilds/:guild_id/previous", post(super::handlers::previous))
        .route("/guilds/:guild_id/lyrics", get(super::handlers::lyrics))
        // Owner administration
        .route("/blacklist/:kind", get(super::handlers::list_blacklist))
        .route("/blacklist/:kind", post(super::handlers::add_to_blacklist))
        .route("/blacklist/:kind/:id", delete(super::handlers::remove_from_blacklist))
        // SSE event stream
        .route("/events", get(super::sse::event_stream))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

/// Bind and serve until a shutdown signal arrives.
pub async fn run(ctx: AppContext) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], ctx.port));
    let app = create_router(ctx);

    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
