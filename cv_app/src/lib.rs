use axum::http::header::{HeaderName, AUTHORIZATION};
use axum::Router;
use figment::{providers::Env, Figment};
use std::iter::once;
use std::net::SocketAddr;
use tower_http::compression::CompressionLayer;
use tower_http::propagate_header::PropagateHeaderLayer;
use tower_http::sensitive_headers::SetSensitiveRequestHeadersLayer;
use tower_http::trace::TraceLayer;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("{0} is not valid: {1}")]
    InvalidConfig(&'static str, String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Initialize the process-wide tracing subscriber: JSON lines, level taken
/// from `RUST_LOG`, span and target noise trimmed so journald/CloudWatch-style
/// collectors don't duplicate information.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_current_span(false)
        .with_ansi(false)
        .with_target(false)
        .init();
}

/// Extract a binary's `Config` struct from environment variables. A `.env`
/// file is folded in first when one exists next to the process.
pub fn load_config<C: serde::de::DeserializeOwned>() -> Result<C, AppError> {
    let _ = dotenvy::dotenv();

    let figment = Figment::new().merge(Env::raw());
    Ok(figment.extract()?)
}

/// Serve an axum router with the standard middleware stack, shutting down
/// gracefully on SIGINT/SIGTERM. Services provide their own routes,
/// including a health endpoint.
pub async fn serve<State>(
    state: State,
    host: &str,
    port: u16,
    add_routes: impl FnOnce(Router<State>) -> Router<State>,
) -> Result<(), AppError>
where
    State: Clone + Send + Sync + 'static,
{
    let ip: std::net::IpAddr = host
        .parse()
        .map_err(|e: std::net::AddrParseError| AppError::InvalidConfig("HOST", e.to_string()))?;
    let addr = SocketAddr::from((ip, port));

    let app = add_routes(Router::<State>::new())
        .with_state(state)
        // Mark the `Authorization` request header as sensitive so it doesn't show in logs
        .layer(SetSensitiveRequestHeadersLayer::new(once(AUTHORIZATION)))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        // Propagate `X-Request-Id`s from requests to responses
        .layer(PropagateHeaderLayer::new(HeaderName::from_static("x-request-id")));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Resolves when the process receives SIGINT or SIGTERM. Workers use this to
/// stop dequeuing; the HTTP server uses it for graceful shutdown.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::warn!("signal received, starting graceful shutdown");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_config_reads_env() {
        #[derive(serde::Deserialize)]
        struct Config {
            cv_app_test_value: String,
        }

        std::env::set_var("CV_APP_TEST_VALUE", "ok");
        let config: Config = load_config().unwrap();
        assert_eq!(config.cv_app_test_value, "ok");
    }
}
