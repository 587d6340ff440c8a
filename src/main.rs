use std::sync::Arc;
use teloxide::prelude::*;

mod compose;
mod config;
mod error;
mod filter;
mod handlers;
mod pipeline;
mod runner;
mod settings;
mod upload;

use crate::config::AppConfig;
use crate::handlers::{BotPipeline, Command};
use crate::pipeline::Pipeline;
use crate::runner::ProcessRunner;
use crate::settings::SettingsStore;

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    pretty_env_logger::init();
    log::info!("Starting watermark bot...");

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Invalid configuration: {}", e);
            return;
        }
    };

    for tool in runner::missing_tools(&config.tools) {
        log::warn!("{} not found in PATH; jobs that need it will fail", tool);
    }

    let store = match &config.settings_file {
        Some(path) => match SettingsStore::with_file(config.defaults.clone(), path.clone()).await {
            Ok(store) => store,
            Err(e) => {
                log::error!("Cannot load settings: {}", e);
                return;
            }
        },
        None => SettingsStore::new(config.defaults.clone()),
    };

    let runner = ProcessRunner::new().with_timeout(config.tool_timeout);
    let pipeline: BotPipeline = Arc::new(Pipeline::new(
        runner,
        config.tools.clone(),
        config.font_file.clone(),
        config.work_dir.clone(),
    ));
    let config = Arc::new(config);
    let client = reqwest::Client::new();

    let bot = Bot::from_env();

    let handler = dptree::entry()
        .branch(Update::filter_message().filter_command::<Command>().endpoint(handlers::handle_command))
        .branch(Update::filter_callback_query().endpoint(handlers::handle_callback_query))
        .branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![store, pipeline, config, client])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}
