//! Core functionality for extwatch
//!
//! This crate watches an app project made of one configuration file and
//! any number of extension directories, and turns raw filesystem
//! notifications into debounced, deduplicated change events that dev
//! tooling can react to.

pub mod config;
pub mod error;
pub mod monitor;
pub mod registry;

pub use config::WatchConfig;
pub use error::{Result, WatchError};
pub use monitor::{
    ExtensionPath, SessionCallbacks, WatchSession, WatcherEvent, WatcherEventKind,
};
pub use registry::{AppRegistry, ExtensionEntry, WatchedProject};
