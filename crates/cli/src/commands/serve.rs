//! `kindred serve`: Start the HTTP API server.

use kindred_config::AppConfig;

pub async fn run(mut config: AppConfig, port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    println!("💬 Kindred Gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Provider:  {} ({})", config.default_provider, config.default_model);
    println!("   Storage:   {:?}", config.storage.backend);
    println!("   Free tier: {} messages", config.quota.free_message_limit);

    kindred_gateway::start(config).await?;

    Ok(())
}
