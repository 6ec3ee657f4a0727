//! The `tessera` binary: streams a tileset headlessly for a number of frames.

mod driver;
mod platform;

use std::time::Duration;

use clap::Parser;
use tessera_config::{CliArgs, Config};
use tessera_tiles::{TileError, Tileset, TilesetOptions, Timestamp};

use crate::driver::{Driver, FRAME_INTERVAL, open_source};
use crate::platform::PlatformDirs;

fn main() {
    let args = CliArgs::parse();

    let dirs = match args.config.clone() {
        Some(config_dir) => PlatformDirs::with_config_dir(config_dir),
        None => match PlatformDirs::resolve() {
            Ok(dirs) => dirs,
            Err(e) => {
                eprintln!("Failed to resolve platform directories: {e}");
                std::process::exit(1);
            }
        },
    };
    if let Err(e) = dirs.create_dirs() {
        eprintln!("Failed to create platform directories: {e}");
        std::process::exit(1);
    }

    let mut config = match Config::load_or_create(&dirs.config_dir) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config, using defaults: {e}");
            Config::default()
        }
    };
    config.apply_cli_overrides(&args);

    tessera_log::init_logging(Some(&dirs.log_dir), cfg!(debug_assertions), Some(&config));
    tracing::info!("Config directory: {}", dirs.config_dir.display());

    if let Err(e) = run(&args, &config) {
        tracing::error!("Failed to stream {}: {e}", args.tileset);
        std::process::exit(1);
    }
}

fn run(args: &CliArgs, config: &Config) -> Result<(), TileError> {
    let source = open_source(&args.tileset);
    let tileset = Tileset::load(&source.url, source.fetcher, TilesetOptions::from(config))?;
    let mut driver = Driver::new(tileset, &config.view);
    tracing::info!(
        "Orbiting {:.1} m from {} for {} frames",
        driver.orbit().radius,
        driver.orbit().center,
        args.frames
    );

    for _ in 0..args.frames {
        let report = driver.step(Timestamp::now());
        let stats = driver.tileset().statistics();
        tracing::info!(
            "visited {} selected {} requested {} loaded {} unloaded {} failed {} | pending {} processing {} ready {} bytes {}",
            report.visited,
            report.selected,
            report.requested,
            report.loaded,
            report.unloaded,
            report.failed,
            stats.number_of_pending_requests,
            stats.number_of_tiles_processing,
            stats.number_of_tiles_with_content_ready,
            stats.content_bytes,
        );
        std::thread::sleep(Duration::from_secs_f64(FRAME_INTERVAL));
    }

    let stats = driver.tileset().statistics();
    tracing::info!(
        "Done: {} tiles, {} loaded in total, {} failed, {} bytes in memory",
        driver.tileset().tile_count(),
        stats.number_of_loaded_tiles_total,
        stats.number_of_failed_tiles,
        driver.tileset().total_memory_usage_bytes()
    );
    Ok(())
}
