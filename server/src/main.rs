use std::time::Duration;

use anyhow::Context;
use server::{build_router, run_solver_loop, AppState, DEFAULT_ADDR, DEFAULT_STEP_MS};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("server=debug,tower_http=info,axum=info")),
        )
        .init();

    let addr = std::env::var("SERVER_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());
    let step_ms = match std::env::var("SERVER_STEP_MS") {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("SERVER_STEP_MS inválido ({}), usando {}", raw, DEFAULT_STEP_MS);
            DEFAULT_STEP_MS
        }),
        Err(_) => DEFAULT_STEP_MS,
    };

    let mut state = AppState::new(Duration::from_millis(step_ms));
    match std::env::var("SERVER_API_KEY") {
        Ok(key) if !key.trim().is_empty() => state = state.with_api_key(key.trim()),
        _ => warn!("SERVER_API_KEY sin definir: la API no pide credenciales"),
    }

    // router HTTP
    let app = build_router(state.clone());

    // solver emulado en segundo plano
    tokio::spawn(run_solver_loop(state));

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("no se pudo abrir {addr}"))?;
    info!(
        "servidor escuchando en {} (paso del solver {} ms)",
        listener.local_addr()?,
        step_ms
    );

    axum::serve(listener, app).await?;
    Ok(())
}
