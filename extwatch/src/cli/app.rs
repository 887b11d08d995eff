use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "extwatch",
    version,
    about = "Extwatch - watch an app project and report extension-level changes",
    long_about = "Extwatch watches an app configuration file and its extension directories, and reports debounced, classified change events for dev tooling to act on."
)]
pub struct Cli {
    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Watch a project until interrupted
    #[command(about = "Watch a project and print change batches until Ctrl-C")]
    Watch(WatchArgs),

    /// List the extensions a watch session would start with
    #[command(about = "Show extension roots, extensions and their custom watch paths")]
    Extensions(ExtensionsArgs),
}

#[derive(Parser, Debug)]
pub struct WatchArgs {
    /// Project root containing the app configuration file
    #[arg(help = "Path to the app project", default_value = ".")]
    pub path: PathBuf,

    /// Override the debounce window
    #[arg(long, help = "Milliseconds of quiet before a batch is emitted")]
    pub debounce_ms: Option<u64>,

    /// Print one JSON object per event
    #[arg(long, help = "Emit events as JSON lines")]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct ExtensionsArgs {
    /// Project root containing the app configuration file
    #[arg(help = "Path to the app project", default_value = ".")]
    pub path: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_watch_flags() {
        let cli = Cli::parse_from(["extwatch", "-vv", "watch", "app", "--debounce-ms", "250", "--json"]);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Watch(args) => {
                assert_eq!(args.path, PathBuf::from("app"));
                assert_eq!(args.debounce_ms, Some(250));
                assert!(args.json);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_extensions_defaults_to_current_dir() {
        let cli = Cli::parse_from(["extwatch", "extensions"]);
        match cli.command {
            Commands::Extensions(args) => assert_eq!(args.path, PathBuf::from(".")),
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
