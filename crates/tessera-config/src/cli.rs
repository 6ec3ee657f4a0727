//! Command-line argument parsing for the `tessera` binary.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Tessera command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug)]
#[command(name = "tessera", about = "Stream a 3D tileset headlessly")]
pub struct CliArgs {
    /// Path or URL of the tileset JSON.
    pub tileset: String,

    /// Number of frames to simulate.
    #[arg(long, default_value_t = 120)]
    pub frames: u64,

    /// Maximum screen-space error in pixels.
    #[arg(long)]
    pub max_sse: Option<f64>,

    /// Cache budget in MiB.
    #[arg(long)]
    pub cache_mb: Option<u64>,

    /// Maximum concurrent requests.
    #[arg(long)]
    pub max_requests: Option<usize>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(sse) = args.max_sse {
            self.streaming.maximum_screen_space_error = sse;
        }
        if let Some(mb) = args.cache_mb {
            self.streaming.cache_bytes = mb * 1024 * 1024;
        }
        if let Some(n) = args.max_requests {
            self.requests.max_requests = n;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> CliArgs {
        let mut argv = vec!["tessera", "tileset.json"];
        argv.extend_from_slice(extra);
        CliArgs::parse_from(argv)
    }

    #[test]
    fn test_cli_override() {
        let mut config = Config::default();
        config.apply_cli_overrides(&args(&["--max-sse", "4", "--cache-mb", "64"]));
        assert_eq!(config.streaming.maximum_screen_space_error, 4.0);
        assert_eq!(config.streaming.cache_bytes, 64 * 1024 * 1024);
        // Non-overridden fields retain defaults
        assert_eq!(config.requests.max_requests, 50);
        assert_eq!(config.debug.log_level, "info");
    }

    #[test]
    fn test_cli_no_override() {
        let original = Config::default();
        let mut config = Config::default();
        let parsed = args(&[]);
        config.apply_cli_overrides(&parsed);
        assert_eq!(config, original);
        assert_eq!(parsed.frames, 120);
        assert_eq!(parsed.tileset, "tileset.json");
    }
}
