//! Integration tests for the random-access backend.

mod common;

use bytes::Bytes;
use chunkstore_core::{
    ChunkStorage, Config, CoreError, ErrorSource, FinishedFile, MaterializeStrategy,
    RandomAccessStorage, RecvError, ResumableStorage,
};
use chunkstore_storage::{DirectoryHandleStore, HandleStore, InMemoryHandleStore, StorageBackend};
use common::{init_tracing, FaultyHandleStore};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

fn in_memory(id: u64, config: Config) -> (RandomAccessStorage, Arc<InMemoryHandleStore>) {
    let handles = Arc::new(InMemoryHandleStore::new());
    let storage = RandomAccessStorage::new(id, Arc::clone(&handles) as Arc<dyn HandleStore>, config);
    (storage, handles)
}

#[tokio::test]
async fn two_writers_assemble_file() {
    init_tracing();
    let (storage, _) = in_memory(7, Config::default());
    storage.init(false).await.unwrap();

    let a = storage.writer(0);
    let b = storage.writer(4);
    let done_b = b.write(Bytes::from_static(b"BBBB"));
    let done_a = a.write(Bytes::from_static(b"AAAA"));
    done_b.await;
    done_a.await;

    storage.persist(Some(8), true).await.unwrap();
    let file = storage.get_file().await.unwrap();

    assert!(matches!(file, FinishedFile::Handle { len: 8, .. }));
    assert_eq!(file.to_bytes().unwrap().as_ref(), b"AAAABBBB");
}

#[tokio::test]
async fn final_persist_drops_table() {
    let (storage, handles) = in_memory(7, Config::default());
    storage.init(false).await.unwrap();

    let writer = storage.writer(0);
    writer.write(Bytes::from_static(b"0123")).await;
    storage.persist(Some(4), false).await.unwrap();

    let handle = handles.open("7.part", true).unwrap();
    assert!(handle.size().unwrap() > 4);

    storage.persist(Some(4), true).await.unwrap();
    assert_eq!(handle.size().unwrap(), 4);
}

#[tokio::test]
async fn resume_after_reopen() {
    init_tracing();
    let dir = tempdir().unwrap();
    let total = 12u64;

    let before = {
        let handles = Arc::new(DirectoryHandleStore::open(dir.path()).unwrap());
        let storage = RandomAccessStorage::new(3, handles, Config::default());
        storage.init(false).await.unwrap();

        let a = storage.writer(0);
        let b = storage.writer(6);
        a.write(Bytes::from_static(b"abc")).await;
        b.write(Bytes::from_static(b"ghij")).await;

        storage.persist(Some(total), false).await.unwrap();
        vec![
            (a.start_position(), a.written_size()),
            (b.start_position(), b.written_size()),
        ]
    };
    assert_eq!(before, vec![(0, 3), (6, 4)]);

    let handles = Arc::new(DirectoryHandleStore::open(dir.path()).unwrap());
    let storage = RandomAccessStorage::new(3, handles, Config::default());
    storage.init(true).await.unwrap();

    let writers = storage.load(total).await.unwrap();
    let after: Vec<_> = writers
        .iter()
        .map(|w| (w.start_position(), w.written_size()))
        .collect();
    assert_eq!(after, before);

    // Loaded writers append after what they already wrote
    writers[0].write(Bytes::from_static(b"def")).await;
    writers[1].write(Bytes::from_static(b"kl")).await;

    storage.persist(Some(total), true).await.unwrap();
    let file = storage.get_file().await.unwrap();
    assert_eq!(file.to_bytes().unwrap().as_ref(), b"abcdefghijkl");
}

#[tokio::test]
async fn load_without_table_is_empty() {
    let (storage, _) = in_memory(1, Config::default());
    storage.init(true).await.unwrap();

    assert!(storage.load(0).await.unwrap().is_empty());
    assert!(storage.load(1_000).await.unwrap().is_empty());
}

#[tokio::test]
async fn load_truncated_table_is_empty() {
    let (storage, handles) = in_memory(1, Config::default());
    storage.init(false).await.unwrap();

    storage.writer(0).write(Bytes::from_static(b"aa")).await;
    storage.writer(2).write(Bytes::from_static(b"bb")).await;
    storage.persist(Some(4), false).await.unwrap();

    // Cut the table in the middle of its second pair
    let handle = handles.open("1.part", true).unwrap();
    handle.set_len(4 + 8 + 16 + 4).unwrap();

    storage.init(true).await.unwrap();
    assert!(storage.load(4).await.unwrap().is_empty());
}

#[tokio::test]
async fn load_absurd_count_is_empty() {
    let (storage, handles) = in_memory(1, Config::default());
    storage.init(false).await.unwrap();

    let handle = handles.open("1.part", true).unwrap();
    handle.write_at(0, &u64::MAX.to_le_bytes()).unwrap();

    assert!(storage.load(0).await.unwrap().is_empty());
}

#[tokio::test]
async fn reset_then_load_is_empty() {
    let (storage, handles) = in_memory(2, Config::default());
    storage.init(false).await.unwrap();

    let writer = storage.writer(0);
    writer.write(Bytes::from_static(b"data")).await;
    storage.persist(Some(4), false).await.unwrap();

    storage.reset().await.unwrap();

    assert_eq!(handles.open("2.part", true).unwrap().size().unwrap(), 0);
    assert!(storage.load(0).await.unwrap().is_empty());
}

#[tokio::test]
async fn reset_invalidates_earlier_writers() {
    let (storage, handles) = in_memory(2, Config::default());
    storage.init(false).await.unwrap();

    let old = storage.writer(0);
    old.write(Bytes::from_static(b"old")).await;

    storage.reset().await.unwrap();
    old.write(Bytes::from_static(b"late")).await;

    let fresh = storage.writer(0);
    fresh.write(Bytes::from_static(b"new")).await;
    storage.persist(Some(3), true).await.unwrap();

    let handle = handles.open("2.part", true).unwrap();
    assert_eq!(handle.read_at(0, 3).unwrap(), b"new");
    assert_eq!(storage.get_file().await.unwrap().len(), 3);
}

#[tokio::test]
async fn failed_write_reports_once_and_writer_recovers() {
    init_tracing();
    let handles = Arc::new(FaultyHandleStore::default());
    let storage = RandomAccessStorage::new(
        9,
        Arc::clone(&handles) as Arc<dyn HandleStore>,
        Config::default(),
    );
    storage.init(false).await.unwrap();
    let mut errors = storage.subscribe_errors();

    let writer = storage.writer(0);
    handles.handle("9.part").fail_next_writes(1);

    writer.write(Bytes::from_static(b"lost")).await;
    writer.write(Bytes::from_static(b"kept")).await;

    let event = errors.try_recv().unwrap();
    assert_eq!(event.storage_id, 9);
    assert_eq!(event.source, ErrorSource::Write);
    assert_eq!(event.writer_start, Some(0));
    assert!(matches!(*event.error, CoreError::Storage(_)));
    assert_eq!(errors.try_recv().unwrap_err(), RecvError::Empty);

    assert_eq!(writer.written_size(), 4);
    assert_eq!(handles.handle("9.part").data(), b"kept");
}

#[tokio::test]
async fn copy_through_temp_strategy() {
    let temp = tempdir().unwrap();
    let config = Config::new()
        .materialize(MaterializeStrategy::CopyThroughTemp)
        .temp_dir(temp.path());
    let (storage, _) = in_memory(4, config);
    storage.init(false).await.unwrap();

    storage.writer(0).write(Bytes::from_static(b"copy me")).await;
    storage.persist(Some(7), true).await.unwrap();

    let file = storage.get_file().await.unwrap();
    let FinishedFile::Copied { path, len } = &file else {
        panic!("expected a copy, got {file:?}");
    };
    assert_eq!(*len, 7);
    assert!(path.starts_with(temp.path()));
    assert_eq!(std::fs::read(path).unwrap(), b"copy me");

    storage.delete().await;
    assert!(!path.exists());
}

#[tokio::test]
async fn snapshot_strategy_caches_under_derived_name() {
    let config = Config::new().materialize(MaterializeStrategy::Snapshot);
    let (storage, handles) = in_memory(5, config);
    storage.init(false).await.unwrap();

    storage.writer(0).write(Bytes::from_static(b"snap")).await;
    storage.persist(Some(4), true).await.unwrap();

    let first = storage.get_file().await.unwrap();
    assert!(handles.contains("5.part.snapshot"));
    assert_eq!(first.to_bytes().unwrap().as_ref(), b"snap");

    // Later changes to the backing handle do not leak into the snapshot
    handles.open("5.part", true).unwrap().write_at(0, b"XXXX").unwrap();
    let second = storage.get_file().await.unwrap();
    assert_eq!(second.to_bytes().unwrap().as_ref(), b"snap");

    storage.delete().await;
    assert!(!handles.contains("5.part.snapshot"));
    assert!(!handles.contains("5.part"));
}

#[tokio::test]
async fn methods_stay_callable_after_delete() {
    let (storage, handles) = in_memory(6, Config::default());
    storage.init(false).await.unwrap();

    let writer = storage.writer(0);
    storage.delete().await;
    storage.delete().await;
    assert!(handles.is_empty());

    writer.write(Bytes::from_static(b"ab")).await;
    storage.writer(2).write(Bytes::from_static(b"cd")).await;
    storage.persist(Some(4), false).await.unwrap();
    storage.persist(Some(4), true).await.unwrap();
    assert_eq!(storage.read(0, 4).await.unwrap().as_ref(), b"abcd");
    assert_eq!(storage.get_file().await.unwrap().len(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writers_and_persists() {
    let dir = tempdir().unwrap();
    let handles = Arc::new(DirectoryHandleStore::open(dir.path()).unwrap());
    let storage = RandomAccessStorage::new(11, handles, Config::new().sync_on_persist(false));
    storage.init(false).await.unwrap();

    const REGIONS: u64 = 8;
    const REGION: u64 = 64;
    let total = REGIONS * REGION;

    let mut tasks = Vec::new();
    for region in 0..REGIONS {
        let storage = storage.clone();
        tasks.push(tokio::spawn(async move {
            let writer = storage.writer(region * REGION);
            for _ in 0..(REGION / 8) {
                writer.write(vec![region as u8; 8]);
                storage.persist(Some(total), false).await.unwrap();
            }
            writer.flush().await;
            writer.written_size()
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap(), REGION);
    }

    let writers = storage.load(total).await.unwrap();
    assert_eq!(writers.len() as u64, REGIONS);

    storage.persist(Some(total), true).await.unwrap();
    let bytes = storage.get_file().await.unwrap().to_bytes().unwrap();
    for region in 0..REGIONS {
        let start = (region * REGION) as usize;
        assert!(bytes[start..start + REGION as usize]
            .iter()
            .all(|&b| b == region as u8));
    }
}

#[tokio::test]
async fn snapshot_is_rebuilt_after_reset() {
    let config = Config::new().materialize(MaterializeStrategy::Snapshot);
    let (storage, handles) = in_memory(13, config);
    storage.init(false).await.unwrap();

    storage.writer(0).write(Bytes::from_static(b"OLD!")).await;
    storage.persist(Some(4), true).await.unwrap();
    let first = storage.get_file().await.unwrap();
    assert_eq!(first.to_bytes().unwrap().as_ref(), b"OLD!");

    storage.reset().await.unwrap();
    assert!(!handles.contains("13.part.snapshot"));

    storage.writer(0).write(Bytes::from_static(b"NEW!")).await;
    storage.persist(Some(4), true).await.unwrap();
    let second = storage.get_file().await.unwrap();
    assert_eq!(second.to_bytes().unwrap().as_ref(), b"NEW!");
}

#[tokio::test]
async fn fresh_init_discards_earlier_snapshot() {
    let handles = Arc::new(InMemoryHandleStore::new());
    let config = Config::new().materialize(MaterializeStrategy::Snapshot);

    let earlier = RandomAccessStorage::new(
        14,
        Arc::clone(&handles) as Arc<dyn HandleStore>,
        config.clone(),
    );
    earlier.init(false).await.unwrap();
    earlier.writer(0).write(Bytes::from_static(b"OLD!")).await;
    earlier.persist(Some(4), true).await.unwrap();
    earlier.get_file().await.unwrap();
    assert!(handles.contains("14.part.snapshot"));

    let storage = RandomAccessStorage::new(14, Arc::clone(&handles) as Arc<dyn HandleStore>, config);
    storage.init(false).await.unwrap();
    assert!(!handles.contains("14.part.snapshot"));

    storage.writer(0).write(Bytes::from_static(b"NEW!")).await;
    storage.persist(Some(4), true).await.unwrap();
    let file = storage.get_file().await.unwrap();
    assert_eq!(file.to_bytes().unwrap().as_ref(), b"NEW!");
}

#[tokio::test]
async fn reset_removes_temp_copies() {
    let temp = tempdir().unwrap();
    let config = Config::new()
        .materialize(MaterializeStrategy::CopyThroughTemp)
        .temp_dir(temp.path());
    let (storage, _) = in_memory(15, config);
    storage.init(false).await.unwrap();

    storage.writer(0).write(Bytes::from_static(b"copy")).await;
    storage.persist(Some(4), true).await.unwrap();
    let FinishedFile::Copied { path, .. } = storage.get_file().await.unwrap() else {
        panic!("expected a copy");
    };
    assert!(path.exists());

    storage.reset().await.unwrap();
    assert!(!path.exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 3)]
async fn writes_proceed_while_persist_syncs() {
    let handles = Arc::new(FaultyHandleStore::default());
    let storage = RandomAccessStorage::new(
        16,
        Arc::clone(&handles) as Arc<dyn HandleStore>,
        Config::default(),
    );
    storage.init(false).await.unwrap();
    let writer = storage.writer(0);

    let gate = handles.handle("16.part").hold_next_sync();
    let persisting = tokio::spawn({
        let storage = storage.clone();
        async move { storage.persist(Some(8), false).await }
    });
    let gate = tokio::task::spawn_blocking(move || {
        gate.wait_entered();
        gate
    })
    .await
    .unwrap();

    let write = tokio::time::timeout(
        Duration::from_secs(5),
        writer.write(Bytes::from_static(b"during")),
    )
    .await;
    gate.release();

    assert!(write.is_ok(), "write blocked behind the persist sync");
    persisting.await.unwrap().unwrap();
    assert_eq!(writer.written_size(), 6);
}
