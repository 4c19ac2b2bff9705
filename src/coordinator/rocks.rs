//! Persistent store using RocksDB
//!
//! Stores:
//! - Rooms (capacity, occupancy, descriptive metadata)
//! - Applications (status lifecycle, review, assigned room)
//! - Allocations (active/cancelled bed assignments)
//!
//! One column family per record kind, values bincode-encoded, plus an
//! `active_by_student` index of active allocations keyed
//! `student \0 semester \0 allocation_id`. A commit
//! stages the batch under the commit gate and lands it as a single RocksDB
//! `WriteBatch`, which RocksDB applies atomically, index entries included.

use async_trait::async_trait;
use rocksdb::{ColumnFamily, Direction, IteratorMode, Options, DB};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use tokio::sync::Mutex;

use crate::common::{Error, Result};
use crate::coordinator::records::{Allocation, Application, Room};
use crate::coordinator::store::{stage, SnapshotRead, Store, WriteBatch};

const CF_ROOMS: &str = "rooms";
const CF_APPLICATIONS: &str = "applications";
const CF_ALLOCATIONS: &str = "allocations";
const CF_ACTIVE_BY_STUDENT: &str = "active_by_student";

/// Ids and semesters never contain control characters, so `\0` separates
/// the key parts unambiguously.
fn student_prefix(student_id: &str, semester: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(student_id.len() + semester.len() + 2);
    key.extend_from_slice(student_id.as_bytes());
    key.push(0);
    key.extend_from_slice(semester.as_bytes());
    key.push(0);
    key
}

fn active_index_key(allocation: &Allocation) -> Vec<u8> {
    let mut key = student_prefix(&allocation.student_id, &allocation.semester);
    key.extend_from_slice(allocation.id.as_bytes());
    key
}

/// RocksDB-backed store
pub struct RocksStore {
    db: DB,
    commit_gate: Mutex<()>,
}

impl RocksStore {
    /// Open or create the store
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let db = DB::open_cf(
            &opts,
            path,
            vec![CF_ROOMS, CF_APPLICATIONS, CF_ALLOCATIONS, CF_ACTIVE_BY_STUDENT],
        )?;

        Ok(Self {
            db,
            commit_gate: Mutex::new(()),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Corrupted(format!("missing column family {}", name)))
    }

    fn get_record<T: DeserializeOwned>(&self, cf_name: &str, id: &str) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        match self.db.get_cf(cf, id.as_bytes())? {
            Some(bytes) => {
                let record = bincode::deserialize(&bytes)
                    .map_err(|e| Error::Corrupted(format!("{}/{}: {}", cf_name, id, e)))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    fn scan<T: DeserializeOwned>(&self, cf_name: &str) -> Result<Vec<T>> {
        let cf = self.cf(cf_name)?;
        let iter = self.db.iterator_cf(cf, IteratorMode::Start);

        let mut records = Vec::new();
        for item in iter {
            let (_, value_bytes) = item?;
            let record = bincode::deserialize(&value_bytes)
                .map_err(|e| Error::Corrupted(format!("{}: {}", cf_name, e)))?;
            records.push(record);
        }

        Ok(records)
    }

    fn put_encoded<T: Serialize>(
        &self,
        batch: &mut rocksdb::WriteBatch,
        cf_name: &str,
        id: &str,
        record: &T,
    ) -> Result<()> {
        let cf = self.cf(cf_name)?;
        let value = bincode::serialize(record)?;
        batch.put_cf(cf, id.as_bytes(), value);
        Ok(())
    }

    /// Flush to disk
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

impl SnapshotRead for RocksStore {
    fn room(&self, id: &str) -> Result<Option<Room>> {
        self.get_record(CF_ROOMS, id)
    }

    fn application(&self, id: &str) -> Result<Option<Application>> {
        self.get_record(CF_APPLICATIONS, id)
    }

    fn allocation(&self, id: &str) -> Result<Option<Allocation>> {
        self.get_record(CF_ALLOCATIONS, id)
    }

    fn active_allocation_ids(&self, student_id: &str, semester: &str) -> Result<Vec<String>> {
        let cf = self.cf(CF_ACTIVE_BY_STUDENT)?;
        let prefix = student_prefix(student_id, semester);
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward));

        let mut ids = Vec::new();
        for item in iter {
            let (key, _) = item?;
            let Some(id) = key.strip_prefix(prefix.as_slice()) else {
                break;
            };
            let id = String::from_utf8(id.to_vec())
                .map_err(|e| Error::Corrupted(format!("{}: {}", CF_ACTIVE_BY_STUDENT, e)))?;
            ids.push(id);
        }
        Ok(ids)
    }
}

#[async_trait]
impl Store for RocksStore {
    async fn get_room(&self, id: &str) -> Result<Option<Room>> {
        self.room(id)
    }

    async fn list_rooms(&self) -> Result<Vec<Room>> {
        self.scan(CF_ROOMS)
    }

    async fn get_application(&self, id: &str) -> Result<Option<Application>> {
        self.application(id)
    }

    async fn list_applications(&self) -> Result<Vec<Application>> {
        self.scan(CF_APPLICATIONS)
    }

    async fn get_allocation(&self, id: &str) -> Result<Option<Allocation>> {
        self.allocation(id)
    }

    async fn list_allocations(&self) -> Result<Vec<Allocation>> {
        self.scan(CF_ALLOCATIONS)
    }

    async fn apply(&self, batch: WriteBatch) -> Result<()> {
        let _gate = self.commit_gate.lock().await;
        // No await past this point.
        let staged = stage(self, &batch)?;
        if staged.is_empty() {
            return Ok(());
        }

        let mut write = rocksdb::WriteBatch::default();
        for room in staged.rooms.values() {
            self.put_encoded(&mut write, CF_ROOMS, &room.id, room)?;
        }
        for app in staged.applications.values() {
            self.put_encoded(&mut write, CF_APPLICATIONS, &app.id, app)?;
        }
        let index = self.cf(CF_ACTIVE_BY_STUDENT)?;
        for allocation in staged.allocations.values() {
            self.put_encoded(&mut write, CF_ALLOCATIONS, &allocation.id, allocation)?;
            let key = active_index_key(allocation);
            if allocation.is_active() {
                write.put_cf(index, key, b"");
            } else {
                write.delete_cf(index, key);
            }
        }
        self.db.write(write)?;
        Ok(())
    }
}
