use std::sync::Arc;

use crate::media::{pipe::FfmpegLauncher, types::TranscodeSettings};

mod api;
mod config;
mod control;
mod credential;
mod error;
mod handler;
mod manager;
mod media;
mod reconciler;
mod state;

fn init_logging() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let config = config::config();
    log::info!(
        "stream-reconciler: resource {}, validation {}, output {}, every {:?}",
        config.resource_path.display(),
        config.validation_path.display(),
        config.output_root.display(),
        config.interval
    );

    let launcher = Arc::new(FfmpegLauncher::new(TranscodeSettings::from(config)));
    let control = control::ControlLoop::initial_setup(config, launcher)
        .await
        .unwrap_or_else(|e| {
            log::error!("Initial setup failed: {:#}", e);
            std::process::exit(1);
        });

    let cancel = control.cancel_token();
    api::start_api_server(&config.api_addr, control.reconciler(), cancel.clone());
    let handle = control.run();

    tokio::select! {
        _ = cancel.cancelled() => {},
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                log::error!("Failed to listen for ctrl-c: {}", e);
            }
            log::info!("Shutting down");
        },
    }

    control.shutdown(handle).await;
    Ok(())
}
