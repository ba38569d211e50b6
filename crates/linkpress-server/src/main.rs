//! Linkpress publisher server.
//!
//! Wires the identity and credential subsystem to the platform write
//! client and serves the HTTP surface.

mod platform;
mod publish;
mod server;

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Load .env file if present, for local development.
    if let Err(e) = dotenvy::dotenv() {
        if !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
        {
            eprintln!("Warning: Failed to load .env file: {e}");
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let router = match server::build_router().await {
        Ok(router) => router,
        Err(e) => {
            eprintln!("Startup error: {e}");
            std::process::exit(2);
        }
    };

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("Failed to bind {bind_addr}: {e}");
            std::process::exit(2);
        }
    };

    tracing::info!(addr = %bind_addr, "Linkpress server listening");

    if let Err(e) = axum::serve(listener, router).await {
        eprintln!("Server error: {e}");
        std::process::exit(1);
    }
}
