use tracing_subscriber::EnvFilter;

use exchange_ledger::api;
use exchange_ledger::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("exchange_ledger=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env();
    tracing::info!(
        creation_cost = config.policy.creation_cost,
        completion_reward = config.policy.completion_reward,
        target_domain = %config.policy.target_domain,
        "Starting exchange ledger"
    );

    api::serve(config).await
}
