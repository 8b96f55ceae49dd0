//! Engine event stream consumer.
//!
//! One long-lived subscription translates container events into mirror
//! mutations and UI notifications. Events for a given container are handled
//! strictly in delivery order; a failed subscription is reopened after a
//! fixed delay when auto-reconnect is enabled. Individual event failures are
//! logged and never terminate the loop.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::task::JoinHandle;

use crate::engine::{ContainerEngine, ContainerState, EngineError, EngineEvent};
use crate::notify::{EventKind, NotificationSink};
use crate::store::{MirrorStore, NewContainer, StoreError};

mod exit_code;
mod restart_stats;

pub use exit_code::{describe_exit_code, is_abnormal_exit};
pub use restart_stats::RestartTracker;

/// Restarts within the window before the notice escalates to a warning.
const RESTART_WARNING_THRESHOLD: u32 = 3;
const RESTART_WINDOW: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
pub struct EventMonitorConfig {
    pub auto_reconnect: bool,
    pub reconnect_delay: Duration,
}

impl Default for EventMonitorConfig {
    fn default() -> Self {
        EventMonitorConfig {
            auto_reconnect: true,
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum EventError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

pub struct EventMonitor {
    engine: Arc<dyn ContainerEngine>,
    store: MirrorStore,
    notifier: Arc<dyn NotificationSink>,
    restarts: RestartTracker,
    /// Last observed health per container, for transition detection only.
    health: Mutex<HashMap<String, String>>,
    config: EventMonitorConfig,
    running: AtomicBool,
    /// True only while a subscription is actually open; false during the
    /// reconnect gap.
    subscribed: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl EventMonitor {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        store: MirrorStore,
        notifier: Arc<dyn NotificationSink>,
        config: EventMonitorConfig,
    ) -> Self {
        EventMonitor {
            engine,
            store,
            notifier,
            restarts: RestartTracker::new(RESTART_WINDOW),
            health: Mutex::new(HashMap::new()),
            config,
            running: AtomicBool::new(false),
            subscribed: AtomicBool::new(false),
            task: Mutex::new(None),
        }
    }

    /// Open the subscription in a background task. Idempotent while running.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let monitor = Arc::clone(self);
        let handle = tokio::spawn(async move { monitor.run().await });
        *self.task.lock().expect("event monitor mutex poisoned") = Some(handle);
        log::info!("engine event monitor started");
    }

    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.task.lock().expect("event monitor mutex poisoned").take() {
            handle.abort();
        }
        self.subscribed.store(false, Ordering::SeqCst);
        log::info!("engine event monitor stopped");
    }

    /// Whether an event subscription is currently open. Reports false while
    /// the monitor waits out the reconnect delay.
    pub fn is_running(&self) -> bool {
        self.subscribed.load(Ordering::SeqCst)
    }

    async fn run(&self) {
        loop {
            let mut stream = self.engine.subscribe_events();
            self.subscribed.store(true, Ordering::SeqCst);
            log::info!("subscribed to container events");

            while let Some(item) = stream.next().await {
                if !self.running.load(Ordering::SeqCst) {
                    return;
                }
                match item {
                    Ok(event) => {
                        if let Err(e) = self.handle_event(&event).await {
                            log::error!(
                                "failed to handle {} event for {}: {e}",
                                event.action,
                                event.container_id
                            );
                        }
                    }
                    Err(e) => {
                        log::error!("event stream error: {e}");
                        break;
                    }
                }
            }

            self.subscribed.store(false, Ordering::SeqCst);
            if !self.config.auto_reconnect || !self.running.load(Ordering::SeqCst) {
                break;
            }
            log::info!(
                "event subscription lost, resubscribing in {:?}",
                self.config.reconnect_delay
            );
            tokio::time::sleep(self.config.reconnect_delay).await;
        }
        self.running.store(false, Ordering::SeqCst);
    }

    pub(crate) async fn handle_event(&self, event: &EngineEvent) -> Result<(), EventError> {
        log::debug!("engine event: {} {}", event.action, event.container_id);

        match event.action.as_str() {
            "create" => self.on_create(&event.container_id).await?,
            "start" => self.on_start(&event.container_id).await?,
            "stop" => self.on_stop(&event.container_id, true).await?,
            "kill" => self.on_stop(&event.container_id, false).await?,
            "die" => self.on_die(event).await?,
            "restart" => self.on_restart(&event.container_id).await?,
            "destroy" => self.on_destroy(&event.container_id).await?,
            "rename" => self.on_rename(&event.container_id).await?,
            "oom" => self.on_oom(&event.container_id).await?,
            action if action.starts_with("health_status") => self.on_health(event).await?,
            _ => {}
        }
        Ok(())
    }

    async fn on_create(&self, id: &str) -> Result<(), EventError> {
        if self.store.container_by_engine_id(id)?.is_some() {
            return Ok(());
        }

        let details = match self.engine.inspect_container(id).await {
            Ok(details) => details,
            // Already gone again; the next reconciliation pass settles it.
            Err(EngineError::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        self.store.insert_container(&NewContainer {
            engine_id: details.id.clone(),
            name: details.name.clone(),
            image: details.image.clone(),
            status: details.state,
        })?;
        log::info!("container created: {} ({id})", details.name);
        self.notifier.notify(
            EventKind::Create,
            id,
            &details.name,
            &format!("container {} created", details.name),
        );
        Ok(())
    }

    async fn on_start(&self, id: &str) -> Result<(), EventError> {
        let name = self.container_name(id).await;
        self.store.set_container_status(id, ContainerState::Running)?;
        log::info!("container started: {name}");
        self.notifier.notify(
            EventKind::Start,
            id,
            &name,
            &format!("container {name} started"),
        );
        Ok(())
    }

    /// stop and kill both settle in "exited"; only stop raises the plain
    /// stop notification.
    async fn on_stop(&self, id: &str, notify: bool) -> Result<(), EventError> {
        let name = self.container_name(id).await;
        self.store.set_container_status(id, ContainerState::Exited)?;
        log::info!("container stopped: {name}");
        if notify {
            self.notifier.notify(
                EventKind::Stop,
                id,
                &name,
                &format!("container {name} stopped"),
            );
        }
        Ok(())
    }

    async fn on_die(&self, event: &EngineEvent) -> Result<(), EventError> {
        let id = event.container_id.as_str();
        let name = self.container_name(id).await;
        let exit_code = event.exit_code();

        self.store.set_container_status(id, ContainerState::Exited)?;

        let description = describe_exit_code(exit_code);
        let message = if is_abnormal_exit(exit_code) {
            let rendered = match exit_code {
                Some(code) => format!("exit code {code}: {description}"),
                None => description.to_string(),
            };
            log::warn!("container died: {name} ({rendered})");
            format!("container {name} exited abnormally ({rendered})")
        } else {
            log::info!("container died: {name} ({description})");
            format!("container {name} exited ({description})")
        };

        self.notifier.notify(EventKind::Die, id, &name, &message);
        Ok(())
    }

    async fn on_restart(&self, id: &str) -> Result<(), EventError> {
        let name = self.container_name(id).await;
        let count = self.restarts.record_now(id);
        self.store
            .record_container_restart(id, count as i64, chrono::Utc::now())?;

        let message = if count >= RESTART_WARNING_THRESHOLD {
            log::warn!("frequent restarts detected for {name}: {count} within the window");
            format!("container {name} is restarting frequently ({count} restarts within 5 minutes)")
        } else {
            log::info!("container restarted: {name} (#{count})");
            format!("container {name} restarted (#{count})")
        };

        self.notifier.notify(EventKind::Restart, id, &name, &message);
        Ok(())
    }

    async fn on_destroy(&self, id: &str) -> Result<(), EventError> {
        let name = self.container_name(id).await;

        self.restarts.remove(id);
        self.health.lock().expect("health map mutex poisoned").remove(id);

        let removed = self.store.delete_containers_by_engine_id(id)?;
        if removed > 0 {
            log::info!("container removed: {name} ({id})");
        }
        self.notifier.notify(
            EventKind::Destroy,
            id,
            &name,
            &format!("container {name} removed"),
        );
        Ok(())
    }

    async fn on_rename(&self, id: &str) -> Result<(), EventError> {
        let old_name = self.container_name(id).await;
        let details = match self.engine.inspect_container(id).await {
            Ok(details) => details,
            Err(EngineError::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        self.store.rename_container(id, &details.name)?;
        log::info!("container renamed: {old_name} -> {}", details.name);
        self.notifier.notify(
            EventKind::Rename,
            id,
            &details.name,
            &format!("container {old_name} renamed to {}", details.name),
        );
        Ok(())
    }

    async fn on_oom(&self, id: &str) -> Result<(), EventError> {
        let name = self.container_name(id).await;
        log::warn!("container out of memory: {name}");
        self.notifier.notify(
            EventKind::Oom,
            id,
            &name,
            &format!("container {name} was killed by the kernel (out of memory)"),
        );
        Ok(())
    }

    async fn on_health(&self, event: &EngineEvent) -> Result<(), EventError> {
        let id = event.container_id.as_str();
        // Docker delivers the status either as an actor attribute or as a
        // suffix of the action string ("health_status: unhealthy").
        let status = event
            .health_status()
            .map(str::to_string)
            .or_else(|| {
                event
                    .action
                    .split_once(':')
                    .map(|(_, status)| status.trim().to_string())
            })
            .unwrap_or_default();

        if status != "healthy" && status != "unhealthy" {
            return Ok(());
        }

        let changed = {
            let mut health = self.health.lock().expect("health map mutex poisoned");
            health.insert(id.to_string(), status.clone()) != Some(status.clone())
        };
        if !changed {
            return Ok(());
        }

        let name = self.container_name(id).await;
        let message = if status == "unhealthy" {
            log::warn!("container health check failing: {name}");
            format!("container {name} is unhealthy")
        } else {
            log::info!("container health check recovered: {name}");
            format!("container {name} is healthy again")
        };
        self.notifier.notify(EventKind::HealthStatus, id, &name, &message);
        Ok(())
    }

    /// Best-effort name lookup: mirror first, engine second, short id last.
    async fn container_name(&self, id: &str) -> String {
        if let Ok(Some(record)) = self.store.container_by_engine_id(id) {
            return record.name;
        }
        if let Ok(details) = self.engine.inspect_container(id).await {
            if !details.name.is_empty() {
                return details.name;
            }
        }
        id.chars().take(12).collect()
    }
}
