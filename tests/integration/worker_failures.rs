#![allow(missing_docs)]

mod common;

use std::fs;
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Duration;

use common::{init_tracing, options, page, wait_until, Page};
use pagekeep::primitives::io::DiskStore;
use pagekeep::{
    JsonSerializer, ObjectId, PageSerializer, Result, SessionPageStore, StoreError, VersionKey,
};
use parking_lot::Mutex;
use tempfile::tempdir;

/// Fails for one object id, panics for another, delegates otherwise.
struct FlakySerializer {
    inner: JsonSerializer<Page>,
    fail_id: u32,
    panic_id: u32,
}

impl PageSerializer<Page> for FlakySerializer {
    fn serialize(&self, object: &Page) -> Result<Vec<u8>> {
        if object.id == self.fail_id {
            return Err(StoreError::Serialization("refusing".into()));
        }
        if object.id == self.panic_id {
            panic!("serializer blew up");
        }
        self.inner.serialize(object)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Page> {
        self.inner.deserialize(bytes)
    }
}

/// Blocks serialization of one object id until released.
struct GatedSerializer {
    inner: JsonSerializer<Page>,
    gated_id: u32,
    started: Mutex<Sender<()>>,
    release: Mutex<Receiver<()>>,
}

impl PageSerializer<Page> for GatedSerializer {
    fn serialize(&self, object: &Page) -> Result<Vec<u8>> {
        if object.id == self.gated_id {
            let _ = self.started.lock().send(());
            let _ = self.release.lock().recv();
        }
        self.inner.serialize(object)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Page> {
        self.inner.deserialize(bytes)
    }
}

/// Parks the worker on one id and holds an inline reader on another.
struct TwoGateSerializer {
    inner: JsonSerializer<Page>,
    park_id: u32,
    slow_id: u32,
    parked: Mutex<Sender<()>>,
    unpark: Mutex<Receiver<()>>,
    slow_started: Mutex<Sender<()>>,
    slow_release: Mutex<Receiver<()>>,
}

impl PageSerializer<Page> for TwoGateSerializer {
    fn serialize(&self, object: &Page) -> Result<Vec<u8>> {
        if object.id == self.park_id {
            let _ = self.parked.lock().send(());
            let _ = self.unpark.lock().recv();
        } else if object.id == self.slow_id {
            let _ = self.slow_started.lock().send(());
            let _ = self.slow_release.lock().recv();
        }
        self.inner.serialize(object)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Page> {
        self.inner.deserialize(bytes)
    }
}

#[test]
fn failed_serialization_reads_as_missing_and_worker_survives() -> Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let store = SessionPageStore::open(
        options(dir.path()),
        FlakySerializer {
            inner: JsonSerializer::new(),
            fail_id: 1,
            panic_id: 2,
        },
    )?;
    store.store("s", page("main", 1, 0, 0))?;
    store.store("s", page("main", 2, 0, 0))?;
    store.store("s", page("main", 3, 0, 0))?;

    assert!(store
        .get("s", Some("main"), ObjectId(1), Some(0), Some(0))?
        .is_none());
    assert!(store
        .get("s", Some("main"), ObjectId(2), Some(0), Some(0))?
        .is_none());
    assert!(store
        .get("s", Some("main"), ObjectId(3), Some(0), Some(0))?
        .is_some());

    // Work stored after the failures still reaches disk.
    store.store("s", page("main", 4, 0, 0))?;
    let disk = DiskStore::open(dir.path())?;
    let key = VersionKey::new("s", Some("main"), ObjectId(4), 0, 0);
    assert!(wait_until(Duration::from_secs(5), || disk.exists(&key)));

    store.destroy();
    let stats = store.stats();
    assert_eq!(stats.pipeline.serialization_failures, 2);
    assert_eq!(stats.pipeline.records_saved, 2);
    Ok(())
}

#[test]
fn reader_stalls_on_slow_serialization() -> Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let store = SessionPageStore::open(
        options(dir.path()).stall_timeout(Duration::from_millis(50)),
        GatedSerializer {
            inner: JsonSerializer::new(),
            gated_id: 9,
            started: Mutex::new(started_tx),
            release: Mutex::new(release_rx),
        },
    )?;
    store.store("s", page("main", 9, 0, 0))?;
    started_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("worker picked up the gated object");

    let outcome = store.get("s", Some("main"), ObjectId(9), Some(0), Some(1));
    assert!(matches!(outcome, Err(StoreError::Stalled { .. })));

    release_tx.send(()).expect("release");
    let page = store
        .get("s", Some("main"), ObjectId(9), Some(0), Some(0))?
        .expect("page after release");
    assert_eq!(page.id, 9);
    Ok(())
}

#[test]
fn second_reader_waits_on_entry_claimed_by_first_reader() -> Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let (parked_tx, parked_rx) = mpsc::channel();
    let (unpark_tx, unpark_rx) = mpsc::channel();
    let (slow_started_tx, slow_started_rx) = mpsc::channel();
    let (slow_release_tx, slow_release_rx) = mpsc::channel();
    let store = SessionPageStore::open(
        options(dir.path()).stall_timeout(Duration::from_millis(50)),
        TwoGateSerializer {
            inner: JsonSerializer::new(),
            park_id: 8,
            slow_id: 9,
            parked: Mutex::new(parked_tx),
            unpark: Mutex::new(unpark_rx),
            slow_started: Mutex::new(slow_started_tx),
            slow_release: Mutex::new(slow_release_rx),
        },
    )?;

    // Keep the worker busy elsewhere so session "s" is only drained by readers.
    store.store("x", page("main", 8, 0, 0))?;
    parked_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("worker parked");
    store.store("s", page("main", 9, 0, 0))?;
    store.store("s", page("main", 10, 0, 0))?;

    std::thread::scope(|scope| -> Result<()> {
        let slow_release_tx = slow_release_tx;
        let first = scope.spawn(|| store.get("s", Some("main"), ObjectId(9), Some(0), Some(0)));
        slow_started_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("first reader is serializing");

        // The claimed entry is still visible, so this reader waits instead of
        // reporting it missing.
        let second = store.get("s", Some("main"), ObjectId(9), Some(0), Some(0));
        assert!(matches!(second, Err(StoreError::Stalled { .. })));

        slow_release_tx.send(()).expect("release");
        let page = first
            .join()
            .expect("first reader")?
            .expect("first reader found the page");
        assert_eq!(page.id, 9);
        Ok(())
    })?;

    let page = store
        .get("s", Some("main"), ObjectId(9), Some(0), Some(0))?
        .expect("page after release");
    assert_eq!(page.id, 9);
    unpark_tx.send(()).expect("unpark");
    Ok(())
}

#[test]
fn disk_write_failures_keep_records_in_memory() -> Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let disk = DiskStore::open(dir.path())?;
    // A plain file where the session directory should go makes every write fail.
    fs::write(disk.session_dir("s"), b"in the way")?;

    let store = SessionPageStore::open(options(dir.path()), JsonSerializer::<Page>::new())?;
    store.store("s", page("main", 1, 0, 0))?;
    store.store("s", page("main", 2, 0, 0))?;
    assert!(wait_until(Duration::from_secs(5), || {
        store.stats().pipeline.save_failures == 2
    }));
    let fetched = store
        .get("s", Some("main"), ObjectId(1), Some(0), Some(0))?
        .expect("served from memory");
    assert_eq!(fetched.id, 1);
    Ok(())
}
