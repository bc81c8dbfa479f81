use anyhow::Result;
use mynews::core::cache::WizardCache;
use mynews::core::config::Config;
use mynews::core::io::NativeStorage;
use mynews::services::api::HttpPodcastApi;
use mynews::services::setup;
use mynews::services::wizard::Wizard;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            eprintln!("Please ensure 'config.yml' exists; an empty file uses the defaults.");
            return Err(e);
        }
    };

    config.ensure_directories()?;

    let storage = Arc::new(NativeStorage::new(&config.cache_folder));
    let api = HttpPodcastApi::from_config(&config)?;

    // Pick up wherever the last session left the wizard.
    let mut wizard = Wizard::from_config(&config, WizardCache::new(storage));
    wizard.hydrate().await?;

    setup::run(&mut wizard, &api).await
}
