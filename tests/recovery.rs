//! Recovery test for roomalloc: allocations survive a restart of the RocksDB store

use roomalloc::common::{AuditLogger, CoordinatorConfig, Error, StorageBackend};
use roomalloc::coordinator::http::CoordState;
use roomalloc::coordinator::records::{AllocationDetails, AllocationStatus, ApplicationStatus};
use roomalloc::coordinator::review::NewApplication;
use roomalloc::coordinator::rooms::NewRoom;
use roomalloc::coordinator::{open_store, Store};
use roomalloc::ops::verify_store;
use std::sync::Arc;
use tempfile::TempDir;

fn config(dir: &TempDir) -> CoordinatorConfig {
    CoordinatorConfig {
        storage: StorageBackend::Rocksdb,
        db_path: dir.path().join("db"),
        ..Default::default()
    }
}

fn open(config: &CoordinatorConfig) -> CoordState {
    let store = open_store(config).unwrap();
    CoordState::new(store, config, Arc::new(AuditLogger::disabled()))
}

#[tokio::test]
async fn test_recovery_after_restart() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);

    let (room_id, allocation_id, waiting_id) = {
        let state = open(&config);
        let room = state
            .rooms
            .create_room(
                NewRoom {
                    room_number: "101".into(),
                    hostel_id: "north".into(),
                    capacity: 1,
                    ..Default::default()
                },
                "warden",
            )
            .await
            .unwrap();

        let mut ids = Vec::new();
        for student in ["s1", "s2"] {
            let app = state
                .desk
                .submit_application(NewApplication {
                    student_id: student.into(),
                    semester: "2024-S1".into(),
                    preferences: vec![],
                    gender: None,
                })
                .await
                .unwrap();
            state.desk.approve_application(&app.id, "warden").await.unwrap();
            ids.push(app.id);
        }

        let allocation = state
            .coordinator
            .allocate_room(&ids[0], &room.id, AllocationDetails::default())
            .await
            .unwrap();
        (room.id, allocation.id, ids[1].clone())
        // store dropped here, simulating a shutdown
    };

    let state = open(&config);
    let room = state.rooms.get_room(&room_id).await.unwrap();
    assert_eq!(room.occupied, 1);
    let allocation = state.store.get_allocation(&allocation_id).await.unwrap().unwrap();
    assert_eq!(allocation.status, AllocationStatus::Active);
    assert!(verify_store(state.store.as_ref()).await.unwrap().is_consistent());

    // the room is still full after restart
    let err = state
        .coordinator
        .allocate_room(&waiting_id, &room_id, AllocationDetails::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Full(_)));

    state
        .coordinator
        .cancel_allocation(&allocation_id, "warden")
        .await
        .unwrap();
    state
        .coordinator
        .allocate_room(&waiting_id, &room_id, AllocationDetails::default())
        .await
        .unwrap();

    assert_eq!(
        state.desk.get_application(&waiting_id).await.unwrap().status,
        ApplicationStatus::Allocated
    );
    assert_eq!(state.rooms.get_room(&room_id).await.unwrap().occupied, 1);
    assert!(verify_store(state.store.as_ref()).await.unwrap().is_consistent());
}
