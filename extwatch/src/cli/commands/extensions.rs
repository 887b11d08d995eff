//! Extensions command - show what a watch session would start from

use crate::cli::app::ExtensionsArgs;
use anyhow::{Context, Result};
use extwatch_core::{AppRegistry, WatchConfig};

pub fn execute(args: ExtensionsArgs, config: &WatchConfig) -> Result<()> {
    let registry = AppRegistry::load(&args.path, config)
        .with_context(|| format!("failed to load project at {}", args.path.display()))?;

    println!("Project: {}", registry.project.root.display());
    println!("App configuration: {}", registry.project.config_path.display());
    println!("\nExtension roots:");
    for root in &registry.project.extension_roots {
        let marker = if root.is_dir() { "" } else { " (missing)" };
        println!("  {}{}", root.display(), marker);
    }

    if registry.extensions.is_empty() {
        println!("\nNo extensions found");
        return Ok(());
    }

    println!("\nExtensions:");
    for extension in &registry.extensions {
        let relative = extension
            .directory
            .strip_prefix(&registry.project.root)
            .unwrap_or(&extension.directory);
        println!("  {}", relative.display());
        if let Some(patterns) = &extension.watch_paths {
            println!("    watch paths: {}", patterns.join(", "));
        }
    }

    Ok(())
}
