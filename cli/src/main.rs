use std::sync::Arc;
use std::time::Duration;

use args::{Args, Command};
use clap::Parser;
use proxy::{AppState, Normaliser, build_router};
use secrecy::SecretString;
use upstream::{RateLimitSnapshot, UpstreamClient};

mod args;
mod logger;

const TOKEN_REFRESH_URL: &str = "https://auth.openai.com/oauth/token";
const FINGERPRINT_CACHE_CAPACITY: usize = 4096;
const STATE_STORE_CAPACITY: usize = 4096;
const STATE_STORE_TTL: Duration = Duration::from_secs(60 * 60);
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.command {
        Command::Login {
            id_token,
            access_token,
            refresh_token,
            account_id,
        } => {
            logger::init(false);
            login(id_token, access_token, refresh_token, account_id).await
        }
        Command::Serve(serve_args) => {
            logger::init(serve_args.verbose);
            serve(serve_args).await
        }
        Command::Info => {
            logger::init(false);
            info()
        }
    }
}

async fn login(id_token: String, access_token: String, refresh_token: String, account_id: String) -> anyhow::Result<()> {
    let store = auth::TokenStore::new(config::credentials_path(), TOKEN_REFRESH_URL);

    store
        .save(auth::Credentials {
            id_token: SecretString::from(id_token),
            access_token: SecretString::from(access_token),
            refresh_token: SecretString::from(refresh_token),
            account_id,
        })
        .await?;

    log::info!("credentials saved to {:?}", config::credentials_path());
    Ok(())
}

async fn serve(serve_args: config::ServeArgs) -> anyhow::Result<()> {
    let config: config::Config = serve_args.into();
    let host = config.host.clone();
    let port = config.port;

    let tokens = auth::TokenStore::new(config::credentials_path(), TOKEN_REFRESH_URL);
    let fingerprinter = Arc::new(session::SessionFingerprinter::new(FINGERPRINT_CACHE_CAPACITY));
    let state_store = Arc::new(state::StateStore::new(STATE_STORE_CAPACITY, STATE_STORE_TTL));
    let upstream = Arc::new(UpstreamClient::new(tokens, fingerprinter));
    let normaliser = Arc::new(Normaliser::new(state_store.clone(), config.clone()));

    let _sweeper = state::spawn_sweeper(state_store.clone(), SWEEP_INTERVAL);

    let app_state = AppState {
        normaliser,
        upstream,
        state_store,
        config,
    };

    let listener = tokio::net::TcpListener::bind((host.as_str(), port)).await?;
    log::info!("listening on {host}:{port}");

    axum::serve(listener, build_router(app_state)).await?;

    Ok(())
}

fn info() -> anyhow::Result<()> {
    match RateLimitSnapshot::load(&config::rate_limit_snapshot_path()) {
        Some(snapshot) => println!("{}", serde_json::to_string_pretty(&snapshot)?),
        None => println!("no data yet"),
    }
    Ok(())
}
