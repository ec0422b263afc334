use anyhow::Result;
use clap::Parser;
use imagegen_relay::app::App;
use imagegen_relay::models::{Config, PublishMode};
use imagegen_relay::server::{build_router, AppState};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "imagegen-relay")]
#[command(about = "Serve prompt-to-image generation over HTTP")]
struct CliArgs {
    /// Listen port; overrides PORT.
    #[arg(long)]
    port: Option<u16>,

    /// Listen address.
    #[arg(long, default_value = "0.0.0.0")]
    host: std::net::IpAddr,
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "imagegen_relay=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting imagegen-relay");

    let args = CliArgs::parse();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let app = match App::new(&config) {
        Ok(app) => app,
        Err(e) => {
            error!("Failed to initialize application: {}", e);
            std::process::exit(1);
        }
    };

    let mut state = AppState::new(app);
    if config.publish_mode == PublishMode::Local {
        state = state.with_local_image_dir(config.local_image_dir.clone());
    }

    let addr = SocketAddr::new(args.host, args.port.unwrap_or(config.port));
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::CliArgs;
    use clap::Parser;

    #[test]
    fn test_cli_defaults() {
        let args = CliArgs::parse_from(["imagegen-relay"]);
        assert!(args.port.is_none());
        assert_eq!(args.host.to_string(), "0.0.0.0");
    }

    #[test]
    fn test_cli_port_override() {
        let args = CliArgs::parse_from(["imagegen-relay", "--port", "8080", "--host", "127.0.0.1"]);
        assert_eq!(args.port, Some(8080));
        assert_eq!(args.host.to_string(), "127.0.0.1");
    }
}
