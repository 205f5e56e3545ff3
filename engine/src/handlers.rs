//! Command handlers for CLI operations
//!
//! This module implements the handlers for the CLI commands:
//! - create: Route a prompt and create an application
//! - chat: Stream one generation turn to stdout
//! - deploy: Build and publish an application
//! - history / list: Inspect stored state
//! - download / delete: Package or remove an application
//! - config: Show configuration, store secrets

use anyhow::{Context, Result};
use futures::StreamExt;
use serde_json::json;
use std::io::Write;
use std::path::PathBuf;

use crate::config::Config;
use crate::db::HistoryCursor;
use crate::secrets::SecretManager;
use crate::{has_api_key, Engine, SECRET_SERVICE};
use sdk::errors::EngineErrorExt;
use sdk::types::{AppId, UserId};

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Create an application from an initial prompt
pub async fn handle_create(
    engine: &Engine,
    prompt: &str,
    user: i64,
    format: OutputFormat,
) -> Result<()> {
    let app = engine.apps().create_app(UserId(user), prompt).await?;

    match format {
        OutputFormat::Text => {
            println!("✓ Created application {}", app.id);
            println!("  Name:     {}", app.name);
            println!("  Strategy: {}", app.strategy);
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&app)?),
    }

    Ok(())
}

/// Stream one chat turn to stdout
///
/// Text output prints fragments as they arrive. JSON output waits for the
/// whole reply.
pub async fn handle_chat(
    engine: &Engine,
    app: i64,
    message: &str,
    user: i64,
    format: OutputFormat,
) -> Result<()> {
    let mut stream = engine
        .pipeline()
        .execute(AppId(app), message, UserId(user))
        .await?;

    let mut reply = String::new();
    let mut stdout = std::io::stdout();
    let mut failure = None;

    while let Some(fragment) = stream.next().await {
        match fragment {
            Ok(text) => {
                if let OutputFormat::Text = format {
                    stdout.write_all(text.as_bytes())?;
                    stdout.flush()?;
                }
                reply.push_str(&text);
            }
            Err(e) => failure = Some(e),
        }
    }

    match format {
        OutputFormat::Text => {
            println!();
            if let Some(e) = &failure {
                eprintln!("✗ Generation failed: {}", e);
                eprintln!("  Hint: {}", e.user_hint());
            }
        }
        OutputFormat::Json => {
            let output = match &failure {
                None => json!({ "status": "completed", "appId": app, "reply": reply }),
                Some(e) => json!({
                    "status": "failed",
                    "appId": app,
                    "code": e.code(),
                    "message": e.to_string()
                }),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    match failure {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

/// Build (if needed) and publish an application
pub async fn handle_deploy(engine: &Engine, app: i64, user: i64, format: OutputFormat) -> Result<()> {
    let deployment = engine
        .deployer()
        .deploy_and_track(AppId(app), UserId(user))
        .await?;

    match format {
        OutputFormat::Text => {
            println!("✓ Deployed application {}", app);
            println!("  Key: {}", deployment.deploy_key);
            println!("  URL: {}", deployment.url);
        }
        OutputFormat::Json => {
            let output = json!({
                "appId": app,
                "deployKey": deployment.deploy_key,
                "url": deployment.url,
                "deployedAt": deployment.deployed_at
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    // The process is about to exit; give the cover a chance to land
    if let Some(screenshot) = deployment.screenshot {
        let _ = screenshot.await;
    }

    Ok(())
}

/// Show conversation history, newest first
pub async fn handle_history(
    engine: &Engine,
    app: i64,
    user: i64,
    limit: i64,
    before: Option<HistoryCursor>,
    format: OutputFormat,
) -> Result<()> {
    let turns = engine
        .apps()
        .list_history(AppId(app), UserId(user), limit, before)
        .await?;

    match format {
        OutputFormat::Text => {
            if turns.is_empty() {
                println!("No conversation history");
                return Ok(());
            }

            println!("Conversation History (application {}):", app);
            println!();

            for turn in &turns {
                println!("[{}] {}", format_millis(turn.created_at), turn.role.as_str());
                println!("{}", turn.message);
                println!();
            }

            if let Some(last) = turns.last() {
                println!("Older turns: --before {} --before-id {}", last.created_at, last.id);
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "turns": turns,
                "count": turns.len(),
                "nextCursor": turns.last().map(|t| json!({ "before": t.created_at, "beforeId": t.id }))
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// List a user's applications
pub async fn handle_list(engine: &Engine, user: i64, format: OutputFormat) -> Result<()> {
    let apps = engine.apps().list_apps(UserId(user)).await?;

    match format {
        OutputFormat::Text => {
            if apps.is_empty() {
                println!("No applications");
                return Ok(());
            }

            for app in &apps {
                println!("{:>6}  {:<12}  {:<10}  {}", app.id, app.strategy, app.deploy_key.as_deref().unwrap_or("-"), app.name);
            }
        }
        OutputFormat::Json => {
            let output = json!({ "apps": apps, "count": apps.len() });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Write the generated code archive to disk
pub async fn handle_download(
    engine: &Engine,
    app: i64,
    user: i64,
    output: Option<PathBuf>,
    format: OutputFormat,
) -> Result<()> {
    let (file_name, bytes) = engine
        .apps()
        .download_archive(AppId(app), UserId(user))
        .await?;

    let path = output.unwrap_or_else(|| PathBuf::from(&file_name));
    tokio::fs::write(&path, &bytes)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;

    match format {
        OutputFormat::Text => println!("✓ Wrote {} ({} bytes)", path.display(), bytes.len()),
        OutputFormat::Json => {
            let output = json!({ "path": path, "bytes": bytes.len() });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Delete an application and its history
pub async fn handle_delete(engine: &Engine, app: i64, user: i64, format: OutputFormat) -> Result<()> {
    engine.apps().delete_app(AppId(app), UserId(user)).await?;

    match format {
        OutputFormat::Text => println!("✓ Deleted application {}", app),
        OutputFormat::Json => println!("{}", json!({ "deleted": app })),
    }

    Ok(())
}

/// Print the effective configuration
pub fn handle_config_show(config: &Config, format: OutputFormat) -> Result<()> {
    let key_present = has_api_key(config);

    match format {
        OutputFormat::Text => {
            let rendered = toml::to_string_pretty(config).context("Failed to render configuration")?;
            println!("{}", rendered);
            println!(
                "# API key '{}': {}",
                config.llm.api_key_name,
                if key_present { "configured" } else { "missing" }
            );
        }
        OutputFormat::Json => {
            let output = json!({ "config": config, "apiKeyConfigured": key_present });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Store a secret in the OS keychain
pub fn handle_set_secret(name: &str, value: &str) -> Result<()> {
    SecretManager::new(SECRET_SERVICE).set_secret(name, value)?;
    println!("✓ Stored secret '{}'", name);
    println!(
        "  {} in the environment takes precedence",
        SecretManager::env_name(name)
    );
    Ok(())
}

fn format_millis(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "Unknown".to_string())
}
