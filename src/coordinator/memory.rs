//! In-memory store (default backend)

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use crate::common::Result;
use crate::coordinator::records::{Allocation, Application, Room};
use crate::coordinator::store::{stage, SnapshotRead, StagedWrites, Store, WriteBatch};

#[derive(Debug, Default)]
struct Tables {
    rooms: BTreeMap<String, Room>,
    applications: BTreeMap<String, Application>,
    allocations: BTreeMap<String, Allocation>,
}

impl Tables {
    fn commit(&mut self, staged: StagedWrites) {
        self.rooms.extend(staged.rooms);
        self.applications.extend(staged.applications);
        self.allocations.extend(staged.allocations);
    }
}

impl SnapshotRead for Tables {
    fn room(&self, id: &str) -> Result<Option<Room>> {
        Ok(self.rooms.get(id).cloned())
    }

    fn application(&self, id: &str) -> Result<Option<Application>> {
        Ok(self.applications.get(id).cloned())
    }

    fn allocation(&self, id: &str) -> Result<Option<Allocation>> {
        Ok(self.allocations.get(id).cloned())
    }

    fn active_allocation_ids(&self, student_id: &str, semester: &str) -> Result<Vec<String>> {
        Ok(self
            .allocations
            .values()
            .filter(|a| a.is_active() && a.student_id == student_id && a.semester == semester)
            .map(|a| a.id.clone())
            .collect())
    }
}

/// Tables behind one async lock; readers share it, a commit takes it exclusively
#[derive(Debug, Default)]
pub struct MemStore {
    tables: RwLock<Tables>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemStore {
    async fn get_room(&self, id: &str) -> Result<Option<Room>> {
        Ok(self.tables.read().await.rooms.get(id).cloned())
    }

    async fn list_rooms(&self) -> Result<Vec<Room>> {
        Ok(self.tables.read().await.rooms.values().cloned().collect())
    }

    async fn get_application(&self, id: &str) -> Result<Option<Application>> {
        Ok(self.tables.read().await.applications.get(id).cloned())
    }

    async fn list_applications(&self) -> Result<Vec<Application>> {
        Ok(self
            .tables
            .read()
            .await
            .applications
            .values()
            .cloned()
            .collect())
    }

    async fn get_allocation(&self, id: &str) -> Result<Option<Allocation>> {
        Ok(self.tables.read().await.allocations.get(id).cloned())
    }

    async fn list_allocations(&self) -> Result<Vec<Allocation>> {
        Ok(self
            .tables
            .read()
            .await
            .allocations
            .values()
            .cloned()
            .collect())
    }

    async fn apply(&self, batch: WriteBatch) -> Result<()> {
        let mut tables = self.tables.write().await;
        // No await past this point.
        let staged = stage(&*tables, &batch)?;
        tables.commit(staged);
        Ok(())
    }
}
