//! postbridge server binary
//!
//! Wires the session registry, router, broadcaster, and callback
//! correlator together and serves the Streamable HTTP endpoint. All
//! components are constructed here and passed by handle; there is no
//! global state.

use anyhow::Context;
use clap::Parser;
use log::info;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use postbridge::actions::{EchoPostAction, WebhookPostAction};
use postbridge::auth::{AuthContextStore, BearerResolver};
use postbridge::callback::{ActionRegistry, CallbackCorrelator, TAG_CREATE_POST};
use postbridge::notify::NotificationBroadcaster;
use postbridge::router::RequestRouter;
use postbridge::server::{build_router, AppState};
use postbridge::session::{InstanceFactory, SessionRegistry};

#[derive(Parser, Debug)]
#[command(name = "postbridge", version, about)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:8090")]
    bind: SocketAddr,

    /// Maximum concurrent sessions before LRU eviction kicks in
    #[arg(long, default_value_t = 32)]
    max_sessions: usize,

    /// Idle seconds before a session expires
    #[arg(long, default_value_t = 1800)]
    session_timeout_secs: u64,

    /// Webhook that receives published posts; generated drafts are only
    /// logged when unset
    #[arg(long)]
    webhook_url: Option<Url>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let auth_store = Arc::new(AuthContextStore::new());
    let broadcaster = Arc::new(NotificationBroadcaster::new());

    let action_registry = Arc::new(ActionRegistry::new());
    match &args.webhook_url {
        Some(url) => {
            info!("Publishing posts to {}", url);
            action_registry.register(
                TAG_CREATE_POST,
                Arc::new(WebhookPostAction::new(url.clone()).context("building webhook client")?),
            );
        }
        None => {
            info!("No webhook configured; drafts will be logged only");
            action_registry.register(TAG_CREATE_POST, Arc::new(EchoPostAction));
        }
    }

    let correlator = Arc::new(CallbackCorrelator::new(
        auth_store.clone(),
        broadcaster.clone(),
        action_registry,
    ));
    let factory = Arc::new(InstanceFactory::new(auth_store.clone(), correlator.clone()));
    let registry = SessionRegistry::new(
        auth_store,
        broadcaster.clone(),
        args.max_sessions,
        Duration::from_secs(args.session_timeout_secs),
    );
    let request_router = Arc::new(RequestRouter::new(
        registry.clone(),
        factory,
        correlator,
    ));

    let app = build_router(AppState {
        router: request_router,
        registry: registry.clone(),
        broadcaster,
        resolver: Arc::new(BearerResolver),
    });

    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("binding {}", args.bind))?;
    info!("Listening on {}", args.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await
        .context("server error")?;

    registry.sweep_all();
    Ok(())
}
