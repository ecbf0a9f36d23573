//! Tokengate demo service
//!
//! Serves `/public`, `/protected` and `/admin` behind bearer token
//! authentication against a Keycloak realm (or any provider described by a
//! config file).
//!
//! ```text
//! tokengate-demo -v                                   # realm "myrealm" on localhost:8080
//! tokengate-demo --config tokengate.toml --listen 0.0.0.0:8000
//! ```

mod routes;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::http::HeaderValue;
use clap::Parser;
use tokengate_auth::{AuthConfig, Authenticator};
use tower_http::cors::{AllowHeaders, AllowMethods, CorsLayer};
use tracing::{Level, info};
use tracing_subscriber::EnvFilter;

/// Bearer token protected demo API
#[derive(Parser, Debug)]
#[command(name = "tokengate-demo", version, about)]
struct Cli {
    /// Configuration file (TOML/JSON/YAML); TOKENGATE__* variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Keycloak base URL, used when no config file is given
    #[arg(long, env = "KEYCLOAK_URL", default_value = "http://localhost:8080")]
    keycloak_url: String,

    /// Keycloak realm, used when no config file is given
    #[arg(long, env = "KEYCLOAK_REALM", default_value = "myrealm")]
    realm: String,

    /// Client id expected in aud/azp, used when no config file is given
    #[arg(long, env = "KEYCLOAK_CLIENT_ID", default_value = "react-client")]
    client_id: String,

    /// Address to listen on
    #[arg(short, long, default_value = "127.0.0.1:8000")]
    listen: SocketAddr,

    /// Browser origins allowed by CORS
    #[arg(long = "allow-origin", default_value = "http://localhost:5173")]
    allow_origins: Vec<String>,

    /// Enable verbose logging (-v, -vv, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    /// RUST_LOG wins over -v
    fn init_tracing(&self) {
        let level = match self.verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        };
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }

    fn auth_config(&self) -> anyhow::Result<AuthConfig> {
        match &self.config {
            Some(path) => AuthConfig::load(Some(path.as_path()))
                .with_context(|| format!("loading {}", path.display())),
            None => {
                let config = AuthConfig::for_realm(&self.keycloak_url, &self.realm, self.client_id.clone());
                config.validate()?;
                Ok(config)
            }
        }
    }

    fn cors(&self) -> anyhow::Result<CorsLayer> {
        let origins = self
            .allow_origins
            .iter()
            .map(|origin| {
                origin
                    .parse::<HeaderValue>()
                    .with_context(|| format!("invalid CORS origin '{origin}'"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(CorsLayer::new()
            .allow_origin(origins)
            .allow_credentials(true)
            .allow_methods(AllowMethods::mirror_request())
            .allow_headers(AllowHeaders::mirror_request()))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    cli.init_tracing();

    let config = cli.auth_config()?;
    let cors = cli.cors()?;

    let authenticator = Authenticator::connect(&config)
        .await
        .context("connecting to identity provider")?;
    let refresh = authenticator.spawn_refresh_task();

    let app = routes::router(Arc::new(authenticator), cors);
    let listener = tokio::net::TcpListener::bind(cli.listen)
        .await
        .with_context(|| format!("binding {}", cli.listen))?;

    info!(listen = %cli.listen, issuer = %config.issuer, "Serving");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    refresh.abort();
    Ok(())
}
