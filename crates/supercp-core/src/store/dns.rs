use chrono::Utc;
use rusqlite::{OptionalExtension, Row, params};
use std::collections::HashSet;

use super::{RecordStore, parse_column};
use crate::error::{Error, Result};
use crate::model::{DnsRecord, DnsZone, RecordData, ResourceStatus};

const ZONE_COLUMNS: &str = "id, user_id, domain, status, created_at, updated_at";
const RECORD_COLUMNS: &str =
    "id, zone_id, name, record_type, value, ttl, priority, created_at, updated_at";

fn zone_from_row(row: &Row<'_>) -> rusqlite::Result<DnsZone> {
    Ok(DnsZone {
        id: row.get(0)?,
        user_id: row.get(1)?,
        domain: row.get(2)?,
        status: parse_column(row, 3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<DnsRecord> {
    Ok(DnsRecord {
        id: row.get(0)?,
        zone_id: row.get(1)?,
        name: row.get(2)?,
        record_type: parse_column(row, 3)?,
        value: row.get(4)?,
        ttl: row.get(5)?,
        priority: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn insert_record(conn: &rusqlite::Connection, zone_id: i64, data: &RecordData) -> rusqlite::Result<i64> {
    let now = Utc::now();
    conn.execute(
        "INSERT INTO dns_records (zone_id, name, record_type, value, ttl, priority, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        params![
            zone_id,
            data.name,
            data.record_type.as_str(),
            data.value,
            data.ttl,
            data.priority,
            now
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn touch_zone(conn: &rusqlite::Connection, zone_id: i64) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE dns_zones SET updated_at = ?1 WHERE id = ?2",
        params![Utc::now(), zone_id],
    )?;
    Ok(())
}

impl RecordStore {
    pub async fn insert_dns_zone(
        &self,
        user_id: i64,
        domain: &str,
        status: ResourceStatus,
    ) -> Result<DnsZone> {
        let now = Utc::now();
        let conn = self.conn().await;
        conn.execute(
            "INSERT INTO dns_zones (user_id, domain, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![user_id, domain, status.as_str(), now],
        )?;
        let id = conn.last_insert_rowid();
        Ok(conn.query_row(
            &format!("SELECT {ZONE_COLUMNS} FROM dns_zones WHERE id = ?1"),
            params![id],
            zone_from_row,
        )?)
    }

    pub async fn dns_zone(&self, id: i64) -> Result<Option<DnsZone>> {
        let conn = self.conn().await;
        Ok(conn
            .query_row(
                &format!("SELECT {ZONE_COLUMNS} FROM dns_zones WHERE id = ?1"),
                params![id],
                zone_from_row,
            )
            .optional()?)
    }

    pub async fn dns_zone_by_domain(&self, domain: &str) -> Result<Option<DnsZone>> {
        let conn = self.conn().await;
        Ok(conn
            .query_row(
                &format!("SELECT {ZONE_COLUMNS} FROM dns_zones WHERE domain = ?1"),
                params![domain],
                zone_from_row,
            )
            .optional()?)
    }

    /// Zones, optionally restricted to one owner, ordered by domain
    pub async fn list_dns_zones(&self, user_id: Option<i64>) -> Result<Vec<DnsZone>> {
        let conn = self.conn().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ZONE_COLUMNS} FROM dns_zones
             WHERE (?1 IS NULL OR user_id = ?1) ORDER BY domain"
        ))?;
        let zones = stmt
            .query_map(params![user_id], zone_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(zones)
    }

    pub async fn dns_zones_with_status(&self, status: ResourceStatus) -> Result<Vec<DnsZone>> {
        let conn = self.conn().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ZONE_COLUMNS} FROM dns_zones WHERE status = ?1 ORDER BY id"
        ))?;
        let zones = stmt
            .query_map(params![status.as_str()], zone_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(zones)
    }

    /// Delete a zone and its records
    pub async fn delete_dns_zone(&self, id: i64) -> Result<()> {
        let mut conn = self.conn().await;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM dns_records WHERE zone_id = ?1", params![id])?;
        tx.execute("DELETE FROM dns_zones WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(())
    }

    /// Insert several records in one transaction
    pub async fn insert_dns_records(&self, zone_id: i64, records: &[RecordData]) -> Result<()> {
        let mut conn = self.conn().await;
        let tx = conn.transaction()?;
        for data in records {
            insert_record(&tx, zone_id, data)?;
        }
        touch_zone(&tx, zone_id)?;
        tx.commit()?;
        Ok(())
    }

    /// Insert one record and bump the zone in one transaction
    pub async fn insert_dns_record(&self, zone_id: i64, data: &RecordData) -> Result<DnsRecord> {
        let mut conn = self.conn().await;
        let tx = conn.transaction()?;
        let id = insert_record(&tx, zone_id, data)?;
        touch_zone(&tx, zone_id)?;
        let record = tx.query_row(
            &format!("SELECT {RECORD_COLUMNS} FROM dns_records WHERE id = ?1"),
            params![id],
            record_from_row,
        )?;
        tx.commit()?;
        Ok(record)
    }

    pub async fn dns_record(&self, id: i64) -> Result<Option<DnsRecord>> {
        let conn = self.conn().await;
        Ok(conn
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM dns_records WHERE id = ?1"),
                params![id],
                record_from_row,
            )
            .optional()?)
    }

    pub async fn update_dns_record(&self, id: i64, data: &RecordData) -> Result<DnsRecord> {
        let mut conn = self.conn().await;
        let tx = conn.transaction()?;
        let changed = tx.execute(
            "UPDATE dns_records
             SET name = ?1, record_type = ?2, value = ?3, ttl = ?4, priority = ?5, updated_at = ?6
             WHERE id = ?7",
            params![
                data.name,
                data.record_type.as_str(),
                data.value,
                data.ttl,
                data.priority,
                Utc::now(),
                id
            ],
        )?;
        if changed == 0 {
            return Err(Error::not_found(format!("DNS record #{id}")));
        }
        let record = tx.query_row(
            &format!("SELECT {RECORD_COLUMNS} FROM dns_records WHERE id = ?1"),
            params![id],
            record_from_row,
        )?;
        touch_zone(&tx, record.zone_id)?;
        tx.commit()?;
        Ok(record)
    }

    pub async fn delete_dns_record(&self, id: i64) -> Result<()> {
        let mut conn = self.conn().await;
        let tx = conn.transaction()?;
        let zone_id: Option<i64> = tx
            .query_row(
                "SELECT zone_id FROM dns_records WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        tx.execute("DELETE FROM dns_records WHERE id = ?1", params![id])?;
        if let Some(zone_id) = zone_id {
            touch_zone(&tx, zone_id)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// The zone's full record set, in insertion order
    pub async fn dns_records(&self, zone_id: i64) -> Result<Vec<DnsRecord>> {
        let conn = self.conn().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM dns_records WHERE zone_id = ?1 ORDER BY id"
        ))?;
        let records = stmt
            .query_map(params![zone_id], record_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// Bulk edit in one transaction
    ///
    /// Entries with an id update that record, entries without one are
    /// inserted, and records of the zone not named by any entry are deleted.
    pub async fn apply_record_edits(
        &self,
        zone_id: i64,
        edits: &[(Option<i64>, RecordData)],
    ) -> Result<()> {
        let mut conn = self.conn().await;
        let tx = conn.transaction()?;

        let existing: HashSet<i64> = {
            let mut stmt = tx.prepare("SELECT id FROM dns_records WHERE zone_id = ?1")?;
            let ids = stmt
                .query_map(params![zone_id], |row| row.get(0))?
                .collect::<rusqlite::Result<HashSet<i64>>>()?;
            ids
        };

        let mut kept = HashSet::new();
        let now = Utc::now();
        for (id, data) in edits {
            match id {
                Some(id) if existing.contains(id) => {
                    tx.execute(
                        "UPDATE dns_records
                         SET name = ?1, record_type = ?2, value = ?3, ttl = ?4, priority = ?5, updated_at = ?6
                         WHERE id = ?7",
                        params![
                            data.name,
                            data.record_type.as_str(),
                            data.value,
                            data.ttl,
                            data.priority,
                            now,
                            id
                        ],
                    )?;
                    kept.insert(*id);
                }
                Some(id) => {
                    return Err(Error::not_found(format!(
                        "DNS record #{id} in zone #{zone_id}"
                    )));
                }
                None => {
                    let id = insert_record(&tx, zone_id, data)?;
                    kept.insert(id);
                }
            }
        }

        for id in existing.difference(&kept) {
            tx.execute("DELETE FROM dns_records WHERE id = ?1", params![id])?;
        }

        touch_zone(&tx, zone_id)?;
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DnsRecordType;
    use crate::store::Database;

    fn data(name: &str, value: &str) -> RecordData {
        RecordData {
            name: name.to_string(),
            record_type: DnsRecordType::A,
            value: value.to_string(),
            ttl: 3600,
            priority: 10,
        }
    }

    #[tokio::test]
    async fn bulk_edit_updates_inserts_and_deletes() {
        let store = RecordStore::new(Database::open_in_memory().unwrap())
            .await
            .unwrap();
        let zone = store
            .insert_dns_zone(1, "example.com", ResourceStatus::Active)
            .await
            .unwrap();
        store
            .insert_dns_records(zone.id, &[data("@", "1.1.1.1"), data("www", "1.1.1.1")])
            .await
            .unwrap();
        let before = store.dns_records(zone.id).await.unwrap();

        store
            .apply_record_edits(
                zone.id,
                &[
                    (Some(before[0].id), data("@", "2.2.2.2")),
                    (None, data("api", "3.3.3.3")),
                ],
            )
            .await
            .unwrap();

        let after = store.dns_records(zone.id).await.unwrap();
        assert_eq!(after.len(), 2);
        assert_eq!(after[0].id, before[0].id);
        assert_eq!(after[0].value, "2.2.2.2");
        assert_eq!(after[1].name, "api");
        assert!(after.iter().all(|r| r.name != "www"));
    }

    #[tokio::test]
    async fn bulk_edit_rejects_foreign_ids() {
        let store = RecordStore::new(Database::open_in_memory().unwrap())
            .await
            .unwrap();
        let a = store
            .insert_dns_zone(1, "a.com", ResourceStatus::Active)
            .await
            .unwrap();
        let b = store
            .insert_dns_zone(1, "b.com", ResourceStatus::Active)
            .await
            .unwrap();
        let foreign = store.insert_dns_record(b.id, &data("@", "1.1.1.1")).await.unwrap();

        let result = store
            .apply_record_edits(a.id, &[(Some(foreign.id), data("@", "9.9.9.9"))])
            .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
        assert_eq!(
            store.dns_record(foreign.id).await.unwrap().unwrap().value,
            "1.1.1.1"
        );
    }

    #[tokio::test]
    async fn single_insert_rolls_back_when_zone_bump_fails() {
        let store = RecordStore::new(Database::open_in_memory().unwrap())
            .await
            .unwrap();
        let zone = store
            .insert_dns_zone(1, "example.com", ResourceStatus::Active)
            .await
            .unwrap();
        store
            .conn()
            .await
            .execute_batch(
                "CREATE TRIGGER zones_frozen BEFORE UPDATE ON dns_zones
                 BEGIN SELECT RAISE(ABORT, 'zone is frozen'); END;",
            )
            .unwrap();

        let result = store.insert_dns_record(zone.id, &data("www", "1.1.1.1")).await;

        assert!(matches!(result, Err(Error::Database(_))));
        assert!(store.dns_records(zone.id).await.unwrap().is_empty());
    }
}
