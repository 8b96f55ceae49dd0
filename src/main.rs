use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use dockhand::cli::Args;
use dockhand::config::DockhandConfig;
use dockhand::engine::DockerEngine;
use dockhand::events::{EventMonitor, EventMonitorConfig};
use dockhand::image::{ImagePullService, RemoteImageCache, SkopeoInspector};
use dockhand::notify::BroadcastNotifier;
use dockhand::store::MirrorStore;
use dockhand::sync::{ContainerSyncService, PeriodicTask};

const NOTIFICATION_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    let args = Args::parse();
    match run(&args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = DockhandConfig::load(&args.config)?;

    let store = MirrorStore::open(Path::new(&config.store.path))?;
    let engine = Arc::new(DockerEngine::connect()?);

    let inspector = Arc::new(SkopeoInspector::new(
        config.registry_lookup_timeout(),
        config.registry.proxy_url.clone(),
    ));
    let cache = Arc::new(RemoteImageCache::new(
        inspector,
        config.registry_cache_ttl(),
    ));
    let puller = Arc::new(ImagePullService::new(
        store.clone(),
        engine.clone(),
        cache.clone(),
    ));

    // Settle pulls orphaned by the previous process before anything else
    // reads the pull table.
    let recovered = puller.recover_interrupted_pulls()?;
    if recovered > 0 {
        log::warn!("recovered {recovered} interrupted image pulls");
    }

    let notifier = Arc::new(BroadcastNotifier::new(NOTIFICATION_CAPACITY));

    let monitor = Arc::new(EventMonitor::new(
        engine.clone(),
        store.clone(),
        notifier.clone(),
        EventMonitorConfig {
            auto_reconnect: config.events.auto_reconnect,
            reconnect_delay: config.reconnect_delay(),
        },
    ));
    if config.events.enabled {
        monitor.start();
    }

    let sync = Arc::new(ContainerSyncService::new(engine.clone(), store.clone()));

    let sync_task = {
        let sync = Arc::clone(&sync);
        PeriodicTask::spawn("container-sync", config.sync_interval(), move || {
            let sync = Arc::clone(&sync);
            async move {
                if let Err(err) = sync.sync().await {
                    log::error!("container reconciliation failed: {err}");
                }
            }
        })
    };

    let update_task = {
        let sync = Arc::clone(&sync);
        let puller = Arc::clone(&puller);
        let cache = Arc::clone(&cache);
        PeriodicTask::spawn("update-check", config.update_check_interval(), move || {
            let sync = Arc::clone(&sync);
            let puller = Arc::clone(&puller);
            let cache = Arc::clone(&cache);
            async move {
                if let Err(err) = sync.check_container_updates().await {
                    log::error!("container update check failed: {err}");
                }
                if let Err(err) = puller.refresh_update_flags().await {
                    log::error!("image update check failed: {err}");
                }
                cache.sweep().await;
            }
        })
    };

    log::info!("dockhand running, press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    log::info!("shutting down");

    sync_task.cancel();
    update_task.cancel();
    monitor.stop();
    Ok(())
}
