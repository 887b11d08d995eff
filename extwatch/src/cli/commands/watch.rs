//! Watch command - run a watch session until Ctrl-C

use crate::cli::app::WatchArgs;
use anyhow::{Context, Result};
use extwatch_core::{AppRegistry, SessionCallbacks, WatchConfig, WatchSession, WatcherEvent};
use tracing::info;

pub async fn execute(args: WatchArgs, config: WatchConfig) -> Result<()> {
    let config = match args.debounce_ms {
        Some(debounce_ms) => config.with_debounce_ms(debounce_ms),
        None => config,
    };
    let registry = AppRegistry::load(&args.path, &config)
        .with_context(|| format!("failed to load project at {}", args.path.display()))?;

    let json = args.json;
    let root = registry.project.root.clone();
    let callbacks = SessionCallbacks::new(
        move |events: Vec<WatcherEvent>| {
            for event in &events {
                if json {
                    match serde_json::to_string(event) {
                        Ok(line) => println!("{}", line),
                        Err(e) => eprintln!("Failed to serialize event: {}", e),
                    }
                } else {
                    let relative = event.path.strip_prefix(&root).unwrap_or(&event.path);
                    println!("{:<26} {}", event.kind, relative.display());
                }
            }
        },
        |error| eprintln!("{}", error),
    );

    let mut session = WatchSession::start(&registry, &config, callbacks)
        .context("failed to start the file watcher")?;
    info!(
        "Watching {} extension(s) in {} (Ctrl-C to stop)",
        registry.extensions.len(),
        registry.project.root.display()
    );

    tokio::signal::ctrl_c().await.context("failed to listen for Ctrl-C")?;
    info!("Shutting down");
    session.cancel();
    session.closed().await;

    Ok(())
}
