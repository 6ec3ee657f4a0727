//! Configuration for the Tessera tile streamer.
//!
//! Settings persist to disk as RON, can be overridden from the command line
//! via clap, and support hot-reload detection. Every section is
//! `#[serde(default)]` so older and newer files keep loading.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{
    Config, DebugConfig, FoveatedCurve, RequestConfig, StreamingConfig, ViewConfig,
};
pub use error::ConfigError;
