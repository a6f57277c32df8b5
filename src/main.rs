//! ThreatWatch Core - Main Entry Point
//!
//! Headless advisory-intelligence pipeline: boots the store and the
//! classifier service, then runs the ingest → score → drift → retrain
//! cycle until interrupted.

mod logic;
pub mod constants;

use logic::config::PipelineConfig;
use logic::pipeline::{self, Pipeline};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!(
        "Starting {} v{} (advisory intelligence pipeline)...",
        constants::APP_NAME,
        constants::APP_VERSION
    );

    let config = PipelineConfig::default();
    log::info!("  Database: {:?}", config.db_path);
    log::info!("  Data dir: {:?}", config.data_dir);
    log::info!("  Cycle interval: {}s", config.poll_interval_secs);

    let pipeline = match Pipeline::new(config) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            log::error!("Failed to initialize pipeline: {}", e);
            std::process::exit(1);
        }
    };

    // Ctrl-C watcher on its own runtime thread; the loop itself stays
    // synchronous and checks the flag between cycles.
    std::thread::spawn(|| {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("Failed to create tokio runtime for signal handling");

        rt.block_on(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                pipeline::request_shutdown();
            }
        });
    });

    pipeline.run_loop();
    log::info!("{} stopped.", constants::APP_NAME);
}
