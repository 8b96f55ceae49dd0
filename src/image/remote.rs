//! Remote registry lookups and their cache.
//!
//! Remote creation times come from `skopeo inspect` run as a subprocess
//! with a hard timeout. Lookups go through [`RemoteImageCache`], which
//! serves fresh entries without touching the registry and falls back to a
//! stale entry when the registry is unreachable.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::image::dates::parse_create_time;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("failed to run registry inspect tool: {0}")]
    Spawn(std::io::Error),
    #[error("registry lookup for {reference} timed out after {timeout:?}")]
    Timeout {
        reference: String,
        timeout: Duration,
    },
    #[error("registry inspect failed (exit {code:?}): {stderr}")]
    CommandFailed { code: Option<i32>, stderr: String },
    #[error("could not read registry inspect output: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed registry inspect output: {0}")]
    MalformedOutput(String),
}

/// Looks up the creation time of an image in its remote registry.
#[async_trait]
pub trait RegistryInspector: Send + Sync {
    async fn fetch_create_time(
        &self,
        name: &str,
        tag: &str,
    ) -> Result<DateTime<Utc>, RegistryError>;
}

/// Shells out to `skopeo inspect`. The child is killed when the deadline
/// passes or the future is dropped.
pub struct SkopeoInspector {
    timeout: Duration,
    proxy_url: Option<String>,
}

impl SkopeoInspector {
    pub fn new(timeout: Duration, proxy_url: Option<String>) -> Self {
        SkopeoInspector { timeout, proxy_url }
    }
}

#[async_trait]
impl RegistryInspector for SkopeoInspector {
    async fn fetch_create_time(
        &self,
        name: &str,
        tag: &str,
    ) -> Result<DateTime<Utc>, RegistryError> {
        let reference = format!("{name}:{tag}");
        let mut command = tokio::process::Command::new("skopeo");
        command
            .arg("inspect")
            .arg("--insecure-policy")
            .arg(format!("docker://{reference}"))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(proxy) = &self.proxy_url {
            command.env("HTTP_PROXY", proxy).env("HTTPS_PROXY", proxy);
        }

        log::debug!("registry lookup for {reference}");
        let child = command.spawn().map_err(RegistryError::Spawn)?;
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| RegistryError::Timeout {
                reference: reference.clone(),
                timeout: self.timeout,
            })??;

        if !output.status.success() {
            return Err(RegistryError::CommandFailed {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let manifest: serde_json::Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| RegistryError::MalformedOutput(e.to_string()))?;
        let created = manifest
            .get("Created")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                RegistryError::MalformedOutput("missing Created field".to_string())
            })?;

        parse_create_time(created).ok_or_else(|| {
            RegistryError::MalformedOutput(format!("unparseable Created value: {created}"))
        })
    }
}

struct CacheEntry {
    create_time: DateTime<Utc>,
    fetched_at: tokio::time::Instant,
}

/// TTL cache in front of a [`RegistryInspector`].
///
/// Entries older than the TTL are refreshed on access; if the refresh fails
/// the stale value is served instead of the error. [`sweep`] drops entries
/// past twice the TTL so a dead registry cannot pin values forever.
///
/// [`sweep`]: RemoteImageCache::sweep
pub struct RemoteImageCache {
    inspector: Arc<dyn RegistryInspector>,
    ttl: Duration,
    entries: Mutex<HashMap<(String, String), CacheEntry>>,
}

impl RemoteImageCache {
    pub fn new(inspector: Arc<dyn RegistryInspector>, ttl: Duration) -> Self {
        RemoteImageCache {
            inspector,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn remote_create_time(
        &self,
        name: &str,
        tag: &str,
    ) -> Result<DateTime<Utc>, RegistryError> {
        let key = (name.to_string(), tag.to_string());

        {
            let entries = self.entries.lock().await;
            if let Some(entry) = entries.get(&key) {
                if entry.fetched_at.elapsed() < self.ttl {
                    return Ok(entry.create_time);
                }
            }
        }

        match self.inspector.fetch_create_time(name, tag).await {
            Ok(create_time) => {
                self.entries.lock().await.insert(
                    key,
                    CacheEntry {
                        create_time,
                        fetched_at: tokio::time::Instant::now(),
                    },
                );
                Ok(create_time)
            }
            Err(err) => {
                // Serve the stale entry if we still have one.
                let entries = self.entries.lock().await;
                if let Some(entry) = entries.get(&key) {
                    log::warn!(
                        "registry lookup for {name}:{tag} failed, serving stale entry: {err}"
                    );
                    Ok(entry.create_time)
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Evict entries that have outlived twice the TTL.
    pub async fn sweep(&self) {
        let cutoff = self.ttl * 2;
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.fetched_at.elapsed() <= cutoff);
        let evicted = before - entries.len();
        if evicted > 0 {
            log::debug!("evicted {evicted} expired registry cache entries");
        }
    }
}

#[cfg(test)]
pub mod testing {
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Scripted inspector for cache tests.
    #[derive(Default)]
    pub struct FakeInspector {
        pub results: StdMutex<HashMap<(String, String), Result<DateTime<Utc>, String>>>,
        pub calls: AtomicUsize,
    }

    impl FakeInspector {
        pub fn set(&self, name: &str, tag: &str, result: Result<DateTime<Utc>, &str>) {
            self.results.lock().unwrap().insert(
                (name.to_string(), tag.to_string()),
                result.map_err(|e| e.to_string()),
            );
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RegistryInspector for FakeInspector {
        async fn fetch_create_time(
            &self,
            name: &str,
            tag: &str,
        ) -> Result<DateTime<Utc>, RegistryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self
                .results
                .lock()
                .unwrap()
                .get(&(name.to_string(), tag.to_string()))
            {
                Some(Ok(time)) => Ok(*time),
                Some(Err(message)) => Err(RegistryError::MalformedOutput(message.clone())),
                None => Err(RegistryError::MalformedOutput("unscripted lookup".to_string())),
            }
        }
    }
}
