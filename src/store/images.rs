//! Image-pull record access.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};

use super::{MirrorStore, StoreError, millis_to_datetime, now_millis};

/// Pull-state row keyed by (name, tag). `progress` holds the serialized
/// progress document written by the pull coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePullRecord {
    pub id: i64,
    pub name: String,
    pub tag: String,
    pub pulling: bool,
    pub progress: Option<String>,
    pub image_id: Option<String>,
    pub last_error: Option<String>,
    pub local_create_time: Option<String>,
    pub remote_create_time: Option<String>,
    pub need_update: bool,
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl ImagePullRecord {
    pub fn reference(&self) -> String {
        format!("{}:{}", self.name, self.tag)
    }
}

fn record_from_row(row: &Row<'_>) -> Result<ImagePullRecord, rusqlite::Error> {
    Ok(ImagePullRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        tag: row.get(2)?,
        pulling: row.get::<_, i64>(3)? != 0,
        progress: row.get(4)?,
        image_id: row.get(5)?,
        last_error: row.get(6)?,
        local_create_time: row.get(7)?,
        remote_create_time: row.get(8)?,
        need_update: row.get::<_, i64>(9)? != 0,
        last_checked_at: row.get::<_, Option<i64>>(10)?.map(millis_to_datetime),
    })
}

const SELECT_COLUMNS: &str = "id, name, tag, pulling, progress, image_id, last_error, \
     local_create_time, remote_create_time, need_update, last_checked_at";

impl MirrorStore {
    pub fn pull_record(&self, name: &str, tag: &str) -> Result<Option<ImagePullRecord>, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM image_pulls WHERE name = ?1 AND tag = ?2"),
                params![name, tag],
                record_from_row,
            )
            .optional()
        })
    }

    pub fn all_pull_records(&self) -> Result<Vec<ImagePullRecord>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {SELECT_COLUMNS} FROM image_pulls ORDER BY id"))?;
            let rows = stmt.query_map([], record_from_row)?;
            rows.collect()
        })
    }

    /// Create or reset the record for a new pull attempt.
    pub fn mark_pull_started(
        &self,
        name: &str,
        tag: &str,
        progress: &str,
    ) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO image_pulls (name, tag, pulling, progress, need_update)
                 VALUES (?1, ?2, 1, ?3, 0)
                 ON CONFLICT(name, tag) DO UPDATE SET
                     pulling = 1, progress = ?3, last_error = NULL, need_update = 0",
                params![name, tag, progress],
            )?;
            Ok(())
        })
    }

    pub fn set_pull_progress(&self, name: &str, tag: &str, progress: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE image_pulls SET pulling = 1, progress = ?3
                 WHERE name = ?1 AND tag = ?2",
                params![name, tag, progress],
            )?;
            Ok(())
        })
    }

    pub fn mark_pull_completed(
        &self,
        name: &str,
        tag: &str,
        progress: &str,
        image_id: Option<&str>,
        local_create_time: Option<&str>,
    ) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE image_pulls SET pulling = 0, progress = ?3, image_id = ?4,
                     local_create_time = ?5, last_error = NULL, need_update = 0
                 WHERE name = ?1 AND tag = ?2",
                params![name, tag, progress, image_id, local_create_time],
            )?;
            Ok(())
        })
    }

    pub fn mark_pull_failed(
        &self,
        name: &str,
        tag: &str,
        progress: &str,
        error: &str,
    ) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE image_pulls SET pulling = 0, progress = ?3, last_error = ?4
                 WHERE name = ?1 AND tag = ?2",
                params![name, tag, progress, error],
            )?;
            Ok(())
        })
    }

    pub fn pulling_records(&self) -> Result<Vec<ImagePullRecord>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM image_pulls WHERE pulling = 1 ORDER BY id"
            ))?;
            let rows = stmt.query_map([], record_from_row)?;
            rows.collect()
        })
    }

    pub fn record_remote_check(
        &self,
        name: &str,
        tag: &str,
        remote_create_time: &str,
        need_update: bool,
    ) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE image_pulls SET remote_create_time = ?3, need_update = ?4,
                     last_checked_at = ?5
                 WHERE name = ?1 AND tag = ?2",
                params![name, tag, remote_create_time, need_update as i64, now_millis()],
            )?;
            Ok(())
        })
    }

    pub fn delete_pull_record(&self, name: &str, tag: &str) -> Result<usize, StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM image_pulls WHERE name = ?1 AND tag = ?2",
                params![name, tag],
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_pull_started_is_an_upsert() {
        let store = MirrorStore::open_in_memory().unwrap();
        store.mark_pull_started("nginx", "latest", "{}").unwrap();
        store
            .mark_pull_failed("nginx", "latest", "{}", "boom")
            .unwrap();

        // A second start on the same key reuses the row and clears the error.
        store.mark_pull_started("nginx", "latest", "{}").unwrap();
        let records = store.all_pull_records().unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].pulling);
        assert!(records[0].last_error.is_none());
    }

    #[test]
    fn pulling_records_filters_settled_rows() {
        let store = MirrorStore::open_in_memory().unwrap();
        store.mark_pull_started("a", "1", "{}").unwrap();
        store.mark_pull_started("b", "1", "{}").unwrap();
        store
            .mark_pull_completed("b", "1", "{}", Some("sha256:x"), None)
            .unwrap();

        let pulling = store.pulling_records().unwrap();
        assert_eq!(pulling.len(), 1);
        assert_eq!(pulling[0].name, "a");
    }

    #[test]
    fn delete_pull_record_reports_removed_rows() {
        let store = MirrorStore::open_in_memory().unwrap();
        store.mark_pull_started("nginx", "latest", "{}").unwrap();

        assert_eq!(store.delete_pull_record("nginx", "latest").unwrap(), 1);
        assert!(store.pull_record("nginx", "latest").unwrap().is_none());
        assert_eq!(store.delete_pull_record("nginx", "latest").unwrap(), 0);
    }

    #[test]
    fn remote_check_updates_flag_and_timestamp() {
        let store = MirrorStore::open_in_memory().unwrap();
        store.mark_pull_started("a", "1", "{}").unwrap();
        store
            .record_remote_check("a", "1", "2025-01-01T00:00:00Z", true)
            .unwrap();

        let record = store.pull_record("a", "1").unwrap().unwrap();
        assert!(record.need_update);
        assert_eq!(
            record.remote_create_time.as_deref(),
            Some("2025-01-01T00:00:00Z")
        );
        assert!(record.last_checked_at.is_some());
    }
}
