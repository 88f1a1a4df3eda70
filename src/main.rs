//! OIDC Login - Main entry point
//!
//! Serves the login/callback surface for browser OpenID Connect sign-in.

use anyhow::Context;
use oidc_login::config::Config;
use oidc_login::oidc::{client::http_client, OidcClient, ProviderMetadata};
use oidc_login::server::{self, AppState, SessionRegistry};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const BANNER: &str = r#"
╔══════════════════════════════════════════════════════════════╗
║                         OIDC Login                           ║
║        Authorization code flow with verified ID tokens       ║
╚══════════════════════════════════════════════════════════════╝
"#;

fn setup_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{}", config.log_level())));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() {
    let config = Config::parse_args();

    setup_logging(&config);

    if !config.silent {
        eprintln!("{}", BANNER);
    }

    if let Err(e) = run(config).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let provider = config.provider_config().context("Configuration error")?;
    let options = config.client_options();
    let http = http_client(options.http_timeout)?;

    let metadata = if config.discover {
        info!("Discovering endpoints from {}", config.issuer);
        ProviderMetadata::discover(&http, &config.issuer).await?
    } else {
        config.static_metadata()
    };

    info!("Issuer: {}", metadata.issuer);
    info!("Client ID: {}", provider.client_id);
    info!("Scopes: {}", provider.scopes().join(" "));
    info!("Redirect URI: {}", provider.redirect_uri);

    let client = OidcClient::with_http_client(provider, metadata, options, http);
    let sessions = SessionRegistry::new(config.registry_options());
    let state = AppState::with_sessions(Arc::new(client), sessions);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
        result = server::serve(config.listen, state) => {
            result?;
            info!("Server stopped");
        }
    }

    Ok(())
}
