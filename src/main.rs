//! Dialogue engine
//!
//! An event-sourced conversational core: a tracker per conversation, an
//! ensemble of policies choosing the next action, local and remote action
//! execution, and form-driven slot filling, served over a REST webhook.

mod action;
mod agent;
mod api;
mod config;
mod domain;
mod error;
mod form;
mod interpreter;
mod policy;
mod tracker;

#[cfg(test)]
mod testing;

use action::{ActionClient, ActionExecutor, WebhookClient};
use agent::Agent;
use api::{create_router, AppState};
use config::EngineConfig;
use domain::Domain;
use interpreter::RegexInterpreter;
use policy::{PolicyConfig, PolicyEnsemble};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tracker::{InMemoryTrackerStore, SqliteTrackerStore, TrackerStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dialogue_engine=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = EngineConfig::from_env();

    // Domain and policies are fatal to get wrong; fail before serving
    tracing::info!(path = %config.domain_path.display(), "Loading domain");
    let domain = Arc::new(Domain::load(&config.domain_path)?);
    tracing::info!(
        actions = domain.action_names().len(),
        forms = domain.forms().len(),
        digest = %domain.digest(),
        "Domain loaded"
    );

    let policies = if config.policy_path.exists() {
        tracing::info!(path = %config.policy_path.display(), "Loading policies");
        PolicyConfig::load(&config.policy_path)?
    } else {
        tracing::warn!(
            path = %config.policy_path.display(),
            "Policy file not found, using default policies"
        );
        PolicyConfig::default()
    };
    let ensemble = PolicyEnsemble::from_config(&policies, &domain)?;
    if ensemble.is_empty() {
        tracing::warn!("No policies configured, every turn will fall back");
    }
    tracing::info!(
        policies = ensemble.len(),
        fallback = %ensemble.fallback_action(),
        "Policy ensemble ready"
    );

    let store: Arc<dyn TrackerStore> = match &config.db_path {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            tracing::info!(path = %path.display(), "Opening tracker store");
            Arc::new(SqliteTrackerStore::open(path)?)
        }
        None => {
            tracing::warn!("DIALOGUE_DB_PATH not set, conversations will not survive a restart");
            Arc::new(InMemoryTrackerStore::new())
        }
    };

    let client: Option<Arc<dyn ActionClient>> = config.action_endpoint.as_ref().map(|url| {
        tracing::info!(endpoint = %url, "Remote actions enabled");
        Arc::new(WebhookClient::new(
            url.clone(),
            config.action_token.clone(),
            config.action_timeout,
        )) as Arc<dyn ActionClient>
    });
    let executor =
        ActionExecutor::new(domain.clone(), client).with_timeout(config.action_timeout);

    let agent = Agent::new(
        domain,
        ensemble,
        executor,
        store,
        Arc::new(RegexInterpreter::new()),
    )
    .with_config(config.agent);
    let state = AppState::new(agent);

    // Create router
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Dialogue engine listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
