use anyhow::{Context, Result};
use broker_agent::config::{load_config, AgentConfig};
use broker_agent::subscription::{handler, transaction_handler};
use broker_agent::transport::HttpTransport;
use broker_agent::Agent;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "broker_agent=info".into()),
        )
        .init();

    info!("Broker agent starting...");

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("BROKER_AGENT_CONFIG").ok());
    let config = match config_path {
        Some(path) => load_config(&path)?,
        None => AgentConfig::default(),
    };

    info!(
        broker = %config.broker.url,
        entity_id = %config.broker.entity_id,
        interval_ms = config.poll.interval_ms,
        subscriptions = config.agent.subscriptions.len(),
        "Configuration loaded"
    );

    let transport = Arc::new(
        HttpTransport::new(&config.broker).context("Failed to initialize broker transport")?,
    );
    let agent = Agent::from_broker(config.poll.clone(), transport);

    agent.set_wildcard_handler(Some(handler(|payload| {
        warn!(
            message_id = ?payload.get("message_id"),
            sender = ?payload.get("sender_entity_id"),
            "Received message with no subscription"
        );
        Ok(())
    })));

    let entries = config.agent.subscriptions.iter().map(|name| {
        let message_name = name.clone();
        let h = handler(move |payload| {
            info!(
                message_name = %message_name,
                payload = %serde_json::Value::Object(payload),
                "Received message"
            );
            Ok(())
        });
        (name.clone(), h)
    });
    agent
        .subscribe(entries)
        .await
        .context("Failed to subscribe to configured messages")?;

    agent
        .register_transaction_callback(transaction_handler(|record| {
            info!(transaction = %record, "Received transaction");
            Ok(true)
        }))
        .await
        .context("Failed to register transaction callback")?;

    let outcome = agent.start().await?;
    info!(outcome = %outcome, clean = outcome.is_clean(), "Broker agent stopped");

    Ok(())
}
