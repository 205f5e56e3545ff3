// Appforge application generator
// Main entry point for the appforge binary

use appforge_engine::cli::{Cli, Command, ConfigAction};
use appforge_engine::config::Config;
use appforge_engine::db::HistoryCursor;
use appforge_engine::handlers::{
    handle_chat, handle_config_show, handle_create, handle_delete, handle_deploy,
    handle_download, handle_history, handle_list, handle_set_secret, OutputFormat,
};
use appforge_engine::telemetry::init_telemetry_with_level;
use appforge_engine::Engine;
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Determine output format
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    // Load configuration (or use custom path if provided)
    let config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };

    // --log wins over the configured level; RUST_LOG wins over both
    init_telemetry_with_level(cli.log.as_deref().unwrap_or(&config.core.log_level));
    tracing::debug!("Appforge v{}", env!("CARGO_PKG_VERSION"));

    // Commands that do not need the engine
    if let Command::Config { action } = &cli.command {
        return match action {
            ConfigAction::Show => handle_config_show(&config, format),
            ConfigAction::SetSecret { name, value } => handle_set_secret(name, value),
        };
    }

    let engine = Engine::bootstrap(config).await?;

    let result = match cli.command {
        Command::Create { prompt, user } => handle_create(&engine, &prompt, user, format).await,
        Command::Chat { app, message, user } => {
            handle_chat(&engine, app, &message, user, format).await
        }
        Command::Deploy { app, user } => handle_deploy(&engine, app, user, format).await,
        Command::History {
            app,
            user,
            limit,
            before,
            before_id,
        } => {
            let cursor = HistoryCursor::from_parts(before, before_id);
            handle_history(&engine, app, user, limit, cursor, format).await
        }
        Command::List { user } => handle_list(&engine, user, format).await,
        Command::Download { app, user, output } => {
            handle_download(&engine, app, user, output, format).await
        }
        Command::Delete { app, user } => handle_delete(&engine, app, user, format).await,
        Command::Config { .. } => Ok(()),
    };

    engine.shutdown().await?;
    result
}
