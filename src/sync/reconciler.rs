//! Full-inventory reconciliation between the engine and the mirror.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::engine::{ContainerEngine, EngineError};
use crate::store::{ContainerRecord, MirrorStore, NewContainer, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Mutation counts for one reconciliation pass. A pass over an unchanged
/// inventory reports zero mutations.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub duplicates_removed: usize,
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl SyncReport {
    pub fn mutations(&self) -> usize {
        self.duplicates_removed + self.inserted + self.updated + self.deleted
    }
}

/// Periodic reconciler. `sync` is guarded by a compare-and-set flag: a call
/// arriving while a pass is active returns immediately as a no-op instead of
/// queueing.
pub struct ContainerSyncService {
    engine: Arc<dyn ContainerEngine>,
    store: MirrorStore,
    syncing: AtomicBool,
}

struct SyncGuard<'a>(&'a AtomicBool);

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl ContainerSyncService {
    pub fn new(engine: Arc<dyn ContainerEngine>, store: MirrorStore) -> Self {
        ContainerSyncService {
            engine,
            store,
            syncing: AtomicBool::new(false),
        }
    }

    /// One full reconciliation pass. Returns `None` when another pass is
    /// already in flight.
    pub async fn sync(&self) -> Result<Option<SyncReport>, SyncError> {
        if self
            .syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log::info!("reconciliation already in progress, skipping this pass");
            return Ok(None);
        }
        let _guard = SyncGuard(&self.syncing);

        let report = self.do_sync().await?;
        log::debug!(
            "reconciliation pass done: {} duplicates removed, {} inserted, {} updated, {} deleted",
            report.duplicates_removed,
            report.inserted,
            report.updated,
            report.deleted
        );
        Ok(Some(report))
    }

    /// Query surface for the transport layer: reconcile, then return the
    /// merged mirror records.
    pub async fn container_list(&self) -> Result<Vec<ContainerRecord>, SyncError> {
        self.sync().await?;
        Ok(self.store.all_containers()?)
    }

    async fn do_sync(&self) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::default();

        // Duplicate cleanup must precede matching so that two-key lookups
        // see at most one candidate per engine id.
        report.duplicates_removed = self.cleanup_duplicates()?;

        let live = self.engine.list_containers().await?;
        let records = self.store.all_containers()?;

        let by_engine_id: HashMap<&str, &ContainerRecord> = records
            .iter()
            .map(|r| (r.engine_id.as_str(), r))
            .collect();
        let by_name: HashMap<&str, &ContainerRecord> =
            records.iter().map(|r| (r.name.as_str(), r)).collect();

        for container in &live {
            if let Some(record) = by_engine_id.get(container.id.as_str()) {
                // Exact match: refresh drift fields only when they drifted.
                if record.status != container.state || record.image != container.image {
                    self.store
                        .update_drift_fields(record.id, container.state, &container.image)?;
                    report.updated += 1;
                }
            } else if let Some(record) = by_name.get(container.name.as_str()) {
                // Same name, new engine id: the container was recreated in
                // place. Adopt the new id, keep the user metadata.
                log::debug!(
                    "container id churn for {}: {} -> {}",
                    container.name,
                    record.engine_id,
                    container.id
                );
                self.store
                    .adopt_engine_id(record.id, &container.id, container.state, &container.image)?;
                report.updated += 1;
            } else {
                self.store.insert_container(&NewContainer {
                    engine_id: container.id.clone(),
                    name: container.name.clone(),
                    image: container.image.clone(),
                    status: container.state,
                })?;
                log::debug!("new container record: {}", container.name);
                report.inserted += 1;
            }
        }

        // Records the engine no longer knows by either key are gone.
        let live_ids: HashSet<&str> = live.iter().map(|c| c.id.as_str()).collect();
        let live_names: HashSet<&str> = live.iter().map(|c| c.name.as_str()).collect();
        for record in &records {
            if !live_ids.contains(record.engine_id.as_str())
                && !live_names.contains(record.name.as_str())
            {
                self.store.delete_container(record.id)?;
                log::info!(
                    "removed stale container record: {} ({})",
                    record.name,
                    record.engine_id
                );
                report.deleted += 1;
            }
        }

        Ok(report)
    }

    /// Collapse groups of records sharing one engine id down to the single
    /// best record: latest updated_at, then latest created_at, then lowest
    /// row id.
    fn cleanup_duplicates(&self) -> Result<usize, StoreError> {
        let records = self.store.all_containers()?;
        let mut groups: HashMap<&str, Vec<&ContainerRecord>> = HashMap::new();
        for record in &records {
            groups.entry(record.engine_id.as_str()).or_default().push(record);
        }

        let mut removed = 0;
        for (engine_id, group) in groups {
            if group.len() < 2 {
                continue;
            }
            log::warn!("found {} duplicate records for container {engine_id}", group.len());

            let Some(keep) = group.iter().max_by(|a, b| {
                a.updated_at
                    .cmp(&b.updated_at)
                    .then(a.created_at.cmp(&b.created_at))
                    .then(b.id.cmp(&a.id))
            }) else {
                continue;
            };

            for record in &group {
                if record.id != keep.id {
                    self.store.delete_container(record.id)?;
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    /// Coarse update check: flag each live container whose running image id
    /// is no longer the newest local id for its image reference. An
    /// unresolvable reference is flagged as needing attention.
    pub async fn check_container_updates(&self) -> Result<usize, SyncError> {
        let images = self.engine.list_images().await?;
        let mut newest_by_tag: HashMap<String, String> = HashMap::new();
        for image in &images {
            for tag in &image.repo_tags {
                if tag != "<none>:<none>" {
                    newest_by_tag.insert(tag.clone(), image.id.clone());
                }
            }
        }

        let live = self.engine.list_containers().await?;
        let mut flagged = 0;
        for container in &live {
            let mut reference = container.image.clone();
            // Bare references resolve against the :latest tag.
            if !reference.contains(':') && !reference.contains('@') {
                let latest = format!("{reference}:latest");
                if newest_by_tag.contains_key(&latest) {
                    reference = latest;
                }
            }

            let need_update = match newest_by_tag.get(&reference) {
                Some(newest_id) => newest_id != &container.image_id,
                None => true,
            };

            if self.store.container_by_engine_id(&container.id)?.is_none() {
                self.store.insert_container(&NewContainer {
                    engine_id: container.id.clone(),
                    name: container.name.clone(),
                    image: container.image.clone(),
                    status: container.state,
                })?;
            }
            self.store.set_container_need_update(&container.id, need_update)?;
            if need_update {
                flagged += 1;
            }
        }

        log::info!("container update check done, {flagged} flagged");
        Ok(flagged)
    }
}
