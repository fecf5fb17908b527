use std::{collections::HashMap, sync::Arc};

use ssb_core::{
    config::Config, menu::MenuRegistry, ports::CompletionClient, store::UserStore,
};
use ssb_openai::OpenAiClient;

mod health;

#[tokio::main]
async fn main() -> Result<(), ssb_core::Error> {
    ssb_core::logging::init("ssb");

    let cfg = Arc::new(Config::load()?);

    let store = Arc::new(UserStore::open(&cfg.db_path)?);

    let vars = HashMap::from([("channel".to_string(), cfg.channel_handle().to_string())]);
    let menus = Arc::new(MenuRegistry::load(cfg.menus_path.clone(), vars)?);

    let ai: Arc<dyn CompletionClient> = Arc::new(OpenAiClient::new(
        cfg.ai_endpoint.clone(),
        cfg.ai_api_key.clone(),
        cfg.ai_model.clone(),
        cfg.ai_timeout,
    )?);

    let health_port = cfg.health_port;
    let health_store = store.clone();
    tokio::spawn(async move {
        if let Err(e) = health::serve(health_port, health_store).await {
            tracing::error!("health server failed: {e}");
        }
    });

    ssb_telegram::router::run_polling(cfg, store, menus, ai)
        .await
        .map_err(|e| ssb_core::Error::Transport(format!("telegram bot failed: {e}")))?;

    Ok(())
}
