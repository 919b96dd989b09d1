//! Tune Rush backend entrypoint wiring the HTTP, WebSocket, and engine layers.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::{net::TcpListener, sync::mpsc};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tune_rush_back::{
    catalog::TrackCatalog,
    config::GameRules,
    routes,
    services::engine::Engine,
    state::AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let rules = GameRules::load();
    let catalog = build_catalog();

    let (engine_tx, engine_rx) = mpsc::unbounded_channel();
    let state = AppState::new(engine_tx.clone());
    Engine::new(state.clone(), catalog, rules, engine_tx).spawn(engine_rx);

    let app = build_router(state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

#[cfg(feature = "deezer-catalog")]
fn build_catalog() -> Arc<dyn TrackCatalog> {
    Arc::new(tune_rush_back::catalog::deezer::DeezerCatalog::new())
}

#[cfg(not(feature = "deezer-catalog"))]
fn build_catalog() -> Arc<dyn TrackCatalog> {
    // No remote catalog compiled in; rooms can only be created from playlists
    // loaded into the static catalog by an embedding binary or test.
    Arc::new(tune_rush_back::catalog::StaticCatalog::new())
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: tune_rush_back::state::SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
