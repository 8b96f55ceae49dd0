//! Image pull state machine.
//!
//! Pull lifecycle lives in the store so it survives restarts: a pull is
//! started, fed progress, and settled as completed or failed. Progress is a
//! serialized [`PullProgress`] document; failures are classified into
//! operator-friendly messages before being persisted.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::engine::ContainerEngine;
use crate::image::dates::parse_create_time;
use crate::image::remote::RemoteImageCache;
use crate::store::{MirrorStore, StoreError};

/// Progress document stored alongside a pull record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullProgress {
    pub phase: String,
    pub percentage: i32,
    pub message: String,
    pub timestamp: i64,
}

impl PullProgress {
    fn new(phase: &str, percentage: i32, message: &str) -> Self {
        PullProgress {
            phase: phase.to_string(),
            percentage,
            message: message.to_string(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Ordered substring rules; the first match wins, so more specific needles
/// come before generic ones.
const PULL_ERROR_RULES: &[(&[&str], &str)] = &[
    (
        &["requested access to the resource is denied"],
        "access to the image was denied; check the image name and registry permissions",
    ),
    (
        &["not found", "manifest unknown"],
        "image not found in the registry; check the name and tag",
    ),
    (
        &["unauthorized", "401"],
        "registry authentication failed; check the configured credentials",
    ),
    (
        &["timeout", "deadline exceeded"],
        "registry connection timed out; the registry may be slow or unreachable",
    ),
    (
        &["connection refused", "connection reset"],
        "could not connect to the registry; check the registry address and network",
    ),
    (
        &["no such host", "name resolution"],
        "registry hostname could not be resolved; check the registry address and DNS",
    ),
    (
        &["certificate", "tls", "ssl"],
        "TLS handshake with the registry failed; check the registry certificate",
    ),
    (
        &["too many requests", "rate limit"],
        "registry rate limit reached; wait before retrying",
    ),
    (
        &["disk", "space"],
        "not enough disk space to store the image",
    ),
    (
        &["interrupted"],
        "pull was interrupted; retry to resume",
    ),
    (
        &["skopeo"],
        "registry inspect tool is missing or failed; check the skopeo installation",
    ),
];

/// Map a raw pull error onto a short operator-facing message. Unmatched
/// errors pass through verbatim unless they are too long to be useful.
pub fn classify_pull_error(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    for (needles, friendly) in PULL_ERROR_RULES {
        if needles.iter().any(|needle| lowered.contains(needle)) {
            return (*friendly).to_string();
        }
    }
    if raw.len() > 100 {
        "image pull failed; check the service log for details and retry".to_string()
    } else {
        raw.to_string()
    }
}

pub struct ImagePullService {
    store: MirrorStore,
    engine: Arc<dyn ContainerEngine>,
    cache: Arc<RemoteImageCache>,
}

impl ImagePullService {
    pub fn new(
        store: MirrorStore,
        engine: Arc<dyn ContainerEngine>,
        cache: Arc<RemoteImageCache>,
    ) -> Self {
        ImagePullService {
            store,
            engine,
            cache,
        }
    }

    pub fn is_pulling(&self, name: &str, tag: &str) -> Result<bool, StoreError> {
        Ok(self
            .store
            .pull_record(name, tag)?
            .is_some_and(|record| record.pulling))
    }

    /// Begin a pull. A pull already in flight for the same (name, tag) makes
    /// this a logged no-op.
    pub fn start_pull(&self, name: &str, tag: &str) -> Result<bool, StoreError> {
        if self.is_pulling(name, tag)? {
            log::info!("pull of {name}:{tag} already in progress, ignoring");
            return Ok(false);
        }
        let progress = PullProgress::new("pulling", 0, "pull started");
        self.store.mark_pull_started(name, tag, &progress.to_json())?;
        log::info!("pull of {name}:{tag} started");
        Ok(true)
    }

    /// Record progress. A percentage of -1 means "unchanged": the previous
    /// percentage is carried forward while the message is replaced.
    pub fn update_progress(
        &self,
        name: &str,
        tag: &str,
        percentage: i32,
        message: &str,
    ) -> Result<(), StoreError> {
        let percentage = if percentage == -1 {
            self.stored_percentage(name, tag)?
        } else {
            percentage
        };
        let progress = PullProgress::new("pulling", percentage, message);
        self.store.set_pull_progress(name, tag, &progress.to_json())
    }

    pub async fn complete_pull(
        &self,
        name: &str,
        tag: &str,
        image_id: &str,
    ) -> Result<(), StoreError> {
        // Best-effort local creation time; a failed inspect is not fatal.
        let local_create_time = match self.engine.inspect_image(&format!("{name}:{tag}")).await {
            Ok(details) => details.created,
            Err(err) => {
                log::warn!("could not inspect {name}:{tag} after pull: {err}");
                None
            }
        };

        let progress = PullProgress::new("completed", 100, "pull completed");
        self.store.mark_pull_completed(
            name,
            tag,
            &progress.to_json(),
            Some(image_id),
            local_create_time.as_deref(),
        )?;
        log::info!("pull of {name}:{tag} completed as {image_id}");
        Ok(())
    }

    pub fn fail_pull(&self, name: &str, tag: &str, raw_error: &str) -> Result<(), StoreError> {
        let friendly = classify_pull_error(raw_error);
        log::error!("pull of {name}:{tag} failed: {raw_error}");
        let progress = PullProgress::new("failed", self.stored_percentage(name, tag)?, &friendly);
        self.store
            .mark_pull_failed(name, tag, &progress.to_json(), &friendly)
    }

    /// Settle records left in the pulling state by an earlier process. Run
    /// once at startup before anything else touches the pull table.
    pub fn recover_interrupted_pulls(&self) -> Result<usize, StoreError> {
        let interrupted = self.store.pulling_records()?;
        for record in &interrupted {
            log::warn!(
                "marking interrupted pull of {} as failed",
                record.reference()
            );
            let progress = PullProgress::new("failed", 0, "pull interrupted by service restart");
            self.store.mark_pull_failed(
                &record.name,
                &record.tag,
                &progress.to_json(),
                "pull interrupted by service restart",
            )?;
        }
        Ok(interrupted.len())
    }

    /// Compare each locally present pulled image against its registry
    /// counterpart and persist the need-update verdicts. Records whose image
    /// is no longer local, or whose timestamps fail to parse, are skipped.
    pub async fn refresh_update_flags(&self) -> Result<usize, StoreError> {
        let local_tags: std::collections::HashSet<String> = match self.engine.list_images().await {
            Ok(images) => images
                .into_iter()
                .flat_map(|image| image.repo_tags)
                .collect(),
            Err(err) => {
                log::warn!("skipping image update check, engine unavailable: {err}");
                return Ok(0);
            }
        };

        let mut checked = 0;
        for record in self.store.all_pull_records()? {
            if record.pulling || !local_tags.contains(&record.reference()) {
                continue;
            }
            let Some(local_raw) = record.local_create_time.as_deref() else {
                continue;
            };
            let Some(local) = parse_create_time(local_raw) else {
                log::warn!(
                    "unparseable local create time for {}: {local_raw}",
                    record.reference()
                );
                continue;
            };

            let remote = match self.cache.remote_create_time(&record.name, &record.tag).await {
                Ok(remote) => remote,
                Err(err) => {
                    log::warn!("registry check for {} failed: {err}", record.reference());
                    continue;
                }
            };

            let need_update = remote > local;
            self.store.record_remote_check(
                &record.name,
                &record.tag,
                &remote.to_rfc3339(),
                need_update,
            )?;
            checked += 1;
        }

        log::info!("image update check done, {checked} records checked");
        Ok(checked)
    }

    fn stored_percentage(&self, name: &str, tag: &str) -> Result<i32, StoreError> {
        let stored = self
            .store
            .pull_record(name, tag)?
            .and_then(|record| record.progress)
            .and_then(|raw| serde_json::from_str::<PullProgress>(&raw).ok())
            .map(|progress| progress.percentage)
            .unwrap_or(0);
        Ok(stored)
    }
}
