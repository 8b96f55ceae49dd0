//! Container record access.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};

use crate::engine::ContainerState;

use super::{MirrorStore, StoreError, millis_to_datetime, now_millis};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    Success,
    Failed,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Success => "success",
            OperationStatus::Failed => "failed",
        }
    }

    fn parse(raw: &str) -> Self {
        match raw {
            "failed" => OperationStatus::Failed,
            _ => OperationStatus::Success,
        }
    }
}

/// One mirrored container. `user_metadata` is opaque to reconciliation and
/// is only ever written by the transport layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRecord {
    pub id: i64,
    pub engine_id: String,
    pub name: String,
    pub image: String,
    pub status: ContainerState,
    pub operation_status: OperationStatus,
    pub last_error: Option<String>,
    pub user_metadata: Option<String>,
    pub need_update: bool,
    pub restart_count: i64,
    pub last_restart_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewContainer {
    pub engine_id: String,
    pub name: String,
    pub image: String,
    pub status: ContainerState,
}

fn record_from_row(row: &Row<'_>) -> Result<ContainerRecord, rusqlite::Error> {
    Ok(ContainerRecord {
        id: row.get(0)?,
        engine_id: row.get(1)?,
        name: row.get(2)?,
        image: row.get(3)?,
        status: ContainerState::parse(&row.get::<_, String>(4)?),
        operation_status: OperationStatus::parse(&row.get::<_, String>(5)?),
        last_error: row.get(6)?,
        user_metadata: row.get(7)?,
        need_update: row.get::<_, i64>(8)? != 0,
        restart_count: row.get(9)?,
        last_restart_at: row.get::<_, Option<i64>>(10)?.map(millis_to_datetime),
        created_at: millis_to_datetime(row.get(11)?),
        updated_at: millis_to_datetime(row.get(12)?),
    })
}

const SELECT_COLUMNS: &str = "id, engine_id, name, image, status, operation_status, last_error, \
     user_metadata, need_update, restart_count, last_restart_at, created_at, updated_at";

impl MirrorStore {
    pub fn insert_container(&self, new: &NewContainer) -> Result<i64, StoreError> {
        let now = now_millis();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO containers (engine_id, name, image, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![new.engine_id, new.name, new.image, new.status.as_str(), now],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn all_containers(&self) -> Result<Vec<ContainerRecord>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {SELECT_COLUMNS} FROM containers ORDER BY id"))?;
            let rows = stmt.query_map([], record_from_row)?;
            rows.collect()
        })
    }

    pub fn container_by_engine_id(
        &self,
        engine_id: &str,
    ) -> Result<Option<ContainerRecord>, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM containers WHERE engine_id = ?1 LIMIT 1"),
                params![engine_id],
                record_from_row,
            )
            .optional()
        })
    }

    pub fn container_by_name(&self, name: &str) -> Result<Option<ContainerRecord>, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM containers WHERE name = ?1 LIMIT 1"),
                params![name],
                record_from_row,
            )
            .optional()
        })
    }

    /// Update lifecycle status on every row carrying this engine id.
    pub fn set_container_status(
        &self,
        engine_id: &str,
        status: ContainerState,
    ) -> Result<usize, StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE containers SET status = ?2, updated_at = ?3 WHERE engine_id = ?1",
                params![engine_id, status.as_str(), now_millis()],
            )
        })
    }

    /// Update only the drift fields (status, image). User metadata and the
    /// operational columns are untouched.
    pub fn update_drift_fields(
        &self,
        row_id: i64,
        status: ContainerState,
        image: &str,
    ) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE containers SET status = ?2, image = ?3, updated_at = ?4 WHERE id = ?1",
                params![row_id, status.as_str(), image, now_millis()],
            )?;
            Ok(())
        })
    }

    /// Re-key a record onto a new engine id (recreate-in-place id churn),
    /// refreshing drift fields and preserving everything else.
    pub fn adopt_engine_id(
        &self,
        row_id: i64,
        engine_id: &str,
        status: ContainerState,
        image: &str,
    ) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE containers SET engine_id = ?2, status = ?3, image = ?4, updated_at = ?5
                 WHERE id = ?1",
                params![row_id, engine_id, status.as_str(), image, now_millis()],
            )?;
            Ok(())
        })
    }

    pub fn rename_container(&self, engine_id: &str, new_name: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE containers SET name = ?2, updated_at = ?3 WHERE engine_id = ?1",
                params![engine_id, new_name, now_millis()],
            )?;
            Ok(())
        })
    }

    pub fn record_container_restart(
        &self,
        engine_id: &str,
        count: i64,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE containers SET status = 'restarting', restart_count = ?2,
                 last_restart_at = ?3, updated_at = ?4 WHERE engine_id = ?1",
                params![engine_id, count, at.timestamp_millis(), now_millis()],
            )?;
            Ok(())
        })
    }

    pub fn set_container_need_update(
        &self,
        engine_id: &str,
        need_update: bool,
    ) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE containers SET need_update = ?2, updated_at = ?3 WHERE engine_id = ?1",
                params![engine_id, need_update as i64, now_millis()],
            )?;
            Ok(())
        })
    }

    pub fn set_container_last_error(
        &self,
        engine_id: &str,
        operation_status: OperationStatus,
        last_error: Option<&str>,
    ) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE containers SET operation_status = ?2, last_error = ?3, updated_at = ?4
                 WHERE engine_id = ?1",
                params![engine_id, operation_status.as_str(), last_error, now_millis()],
            )?;
            Ok(())
        })
    }

    pub fn set_user_metadata(&self, row_id: i64, metadata: Option<&str>) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE containers SET user_metadata = ?2, updated_at = ?3 WHERE id = ?1",
                params![row_id, metadata, now_millis()],
            )?;
            Ok(())
        })
    }

    pub fn delete_container(&self, row_id: i64) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM containers WHERE id = ?1", params![row_id])?;
            Ok(())
        })
    }

    pub fn delete_containers_by_engine_id(&self, engine_id: &str) -> Result<usize, StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM containers WHERE engine_id = ?1",
                params![engine_id],
            )
        })
    }

    /// Test hook for duplicate-cleanup scenarios: inserts a fully specified
    /// row including timestamps.
    #[cfg(test)]
    pub(crate) fn insert_container_raw(
        &self,
        new: &NewContainer,
        created_at: i64,
        updated_at: i64,
    ) -> Result<i64, StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO containers (engine_id, name, image, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    new.engine_id,
                    new.name,
                    new.image,
                    new.status.as_str(),
                    created_at,
                    updated_at
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_container(engine_id: &str, name: &str) -> NewContainer {
        NewContainer {
            engine_id: engine_id.to_string(),
            name: name.to_string(),
            image: "app:1".to_string(),
            status: ContainerState::Running,
        }
    }

    #[test]
    fn insert_and_lookup_by_both_keys() {
        let store = MirrorStore::open_in_memory().unwrap();
        let id = store.insert_container(&new_container("abc", "web")).unwrap();

        let by_id = store.container_by_engine_id("abc").unwrap().unwrap();
        assert_eq!(by_id.id, id);
        assert_eq!(by_id.name, "web");
        assert_eq!(by_id.status, ContainerState::Running);
        assert_eq!(by_id.operation_status, OperationStatus::Success);

        let by_name = store.container_by_name("web").unwrap().unwrap();
        assert_eq!(by_name.id, id);
        assert!(store.container_by_engine_id("zzz").unwrap().is_none());
    }

    #[test]
    fn status_update_touches_every_row_with_the_engine_id() {
        let store = MirrorStore::open_in_memory().unwrap();
        store.insert_container(&new_container("abc", "web")).unwrap();
        store.insert_container(&new_container("abc", "web-dup")).unwrap();

        let changed = store
            .set_container_status("abc", ContainerState::Exited)
            .unwrap();
        assert_eq!(changed, 2);

        for record in store.all_containers().unwrap() {
            assert_eq!(record.status, ContainerState::Exited);
        }
    }

    #[test]
    fn adopt_engine_id_preserves_metadata() {
        let store = MirrorStore::open_in_memory().unwrap();
        let row = store.insert_container(&new_container("old", "web")).unwrap();
        store.set_user_metadata(row, Some("{\"icon\":\"x\"}")).unwrap();

        store
            .adopt_engine_id(row, "new", ContainerState::Running, "app:2")
            .unwrap();

        let record = store.container_by_engine_id("new").unwrap().unwrap();
        assert_eq!(record.id, row);
        assert_eq!(record.image, "app:2");
        assert_eq!(record.user_metadata.as_deref(), Some("{\"icon\":\"x\"}"));
        assert!(store.container_by_engine_id("old").unwrap().is_none());
    }

    #[test]
    fn last_error_follows_the_operation_outcome() {
        let store = MirrorStore::open_in_memory().unwrap();
        store.insert_container(&new_container("abc", "web")).unwrap();

        store
            .set_container_last_error("abc", OperationStatus::Failed, Some("port already in use"))
            .unwrap();
        let record = store.container_by_engine_id("abc").unwrap().unwrap();
        assert_eq!(record.operation_status, OperationStatus::Failed);
        assert_eq!(record.last_error.as_deref(), Some("port already in use"));

        // A later successful operation clears the error.
        store
            .set_container_last_error("abc", OperationStatus::Success, None)
            .unwrap();
        let record = store.container_by_engine_id("abc").unwrap().unwrap();
        assert_eq!(record.operation_status, OperationStatus::Success);
        assert!(record.last_error.is_none());
    }

    #[test]
    fn delete_by_engine_id_reports_removed_rows() {
        let store = MirrorStore::open_in_memory().unwrap();
        store.insert_container(&new_container("abc", "web")).unwrap();
        assert_eq!(store.delete_containers_by_engine_id("abc").unwrap(), 1);
        assert_eq!(store.delete_containers_by_engine_id("abc").unwrap(), 0);
    }
}
