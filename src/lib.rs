pub mod auth;
pub mod cli;
pub mod llm;
pub mod models;
pub mod server;
pub mod service;
pub mod session;
pub mod store;

use cli::Args;
use llm::{ GenerationConfig, ProviderType };
use log::info;
use server::Server;
use service::ChatService;
use std::error::Error;
use std::sync::Arc;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    // Missing secrets are fatal at startup, not at first use.
    if args.generation_api_key.trim().is_empty() {
        return Err("GENERATION_API_KEY must be set".into());
    }
    if args.session_secret.trim().is_empty() {
        return Err("SESSION_SECRET must be set".into());
    }

    info!("--- Core Configuration ---");
    info!("Server Address: {}", args.server_addr);
    info!("Store Type: {}", args.store_type);
    info!("Store Host: {}", args.store_host);
    info!("Generation Provider: {}", args.generation_provider);
    info!(
        "Generation Model: {}",
        args.generation_model.as_deref().unwrap_or("adapter default")
    );
    info!("TLS Enabled: {}", args.enable_tls);
    info!("-------------------------");

    let provider = args.generation_provider.parse::<ProviderType>()?;
    let generation_config = GenerationConfig {
        provider,
        api_key: Some(args.generation_api_key.clone()).filter(|k| !k.is_empty()),
        model: args.generation_model.clone(),
        base_url: args.generation_base_url.clone(),
    };
    let generation = llm::new_client(&generation_config)?;
    let stores = store::initialize_store(&args)?;
    let service = Arc::new(ChatService::new(generation, stores, &args));

    let addr = args.server_addr.clone();
    info!("Starting server on: {}", addr);
    let server = Server::new(addr, service, args.clone());
    server.run().await?;

    Ok(())
}
