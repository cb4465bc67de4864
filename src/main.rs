use anyhow::{Context, Result};
use std::io::BufRead;
use std::sync::Arc;
use std::thread;

use halo::config::{Config, ProviderKind};
use halo::provider::sidecar::SidecarProvider;
use halo::provider::MediaProvider;
use halo::render::{JsonLinesRenderer, RendererInput};
use halo::{Island, IslandHandle};

#[tokio::main]
async fn main() -> Result<()> {
    let (config, rejected) = Config::load().context("Failed to load configuration")?;
    halo::logging::init(&config);

    log::info!("Starting halo media pill");
    for message in rejected {
        log::warn!("{}", message);
    }

    let (provider, sidecar) = build_provider(&config);

    let island = Island::new(config, provider, JsonLinesRenderer::new(std::io::stdout()));
    let handle = island.handle();

    spawn_input_reader(handle.clone());

    // Setup signal handler for Ctrl+C (SIGINT) and SIGTERM
    let handle_for_signal = handle.clone();
    ctrlc::set_handler(move || {
        log::info!("Received SIGINT or SIGTERM, shutting down...");
        handle_for_signal.shutdown();
    })
    .context("Failed to set Ctrl+C handler")?;

    island.run().await;

    if let Some(sidecar) = sidecar {
        match sidecar.stop() {
            Ok(_) => log::info!("Sidecar stopped successfully"),
            Err(e) => log::error!("Error stopping sidecar on exit: {}", e),
        }
    }

    log::info!("Exiting");
    Ok(())
}

/// The provider, plus the sidecar handle when the provider owns a helper process.
fn build_provider(config: &Config) -> (Arc<dyn MediaProvider>, Option<SidecarProvider>) {
    match config.provider {
        #[cfg(windows)]
        ProviderKind::Windows => {
            log::info!("Using Windows media transport controls");
            (Arc::new(halo::provider::windows::WindowsProvider::new()), None)
        }
        #[cfg(not(windows))]
        ProviderKind::Windows => {
            log::warn!("Windows media provider is not available on this platform, using sidecar");
            sidecar_provider(config)
        }
        ProviderKind::Sidecar => sidecar_provider(config),
    }
}

fn sidecar_provider(config: &Config) -> (Arc<dyn MediaProvider>, Option<SidecarProvider>) {
    log::info!("Using sidecar helper {}", config.sidecar.program);
    let sidecar = SidecarProvider::new(config.sidecar.clone());
    (Arc::new(sidecar.clone()), Some(sidecar))
}

/// Read front-end input from stdin. EOF means the front end went away.
fn spawn_input_reader(handle: IslandHandle) {
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    log::error!("Error reading stdin: {}", e);
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            match RendererInput::parse(&line) {
                Ok(input) => {
                    if !handle.apply(input) {
                        return;
                    }
                }
                Err(e) => log::warn!("{:#}", e),
            }
        }

        log::info!("Input closed, shutting down");
        handle.shutdown();
    });
}
